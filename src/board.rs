use serde::{Deserialize, Serialize};

use crate::error::BoardError;
use crate::{BOARD_HEIGHT, BOARD_WIDTH};

pub const CELL_EMPTY: u8 = 0;
/// Occupant tag for rows inserted by an opponent's attack. Piece colours use 1-7.
pub const CELL_GARBAGE: u8 = 8;

pub type Row = [u8; BOARD_WIDTH];

/// Playfield of `BOARD_HEIGHT` rows by `BOARD_WIDTH` columns. Row 0 is the top.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<WireCell>>", into = "Vec<Vec<u8>>")]
pub struct Board {
    cells: [Row; BOARD_HEIGHT],
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            cells: [[CELL_EMPTY; BOARD_WIDTH]; BOARD_HEIGHT],
        }
    }

    pub fn from_rows(rows: Vec<Vec<u8>>) -> Result<Self, BoardError> {
        if rows.len() != BOARD_HEIGHT {
            return Err(BoardError::RowCount {
                expected: BOARD_HEIGHT,
                actual: rows.len(),
            });
        }
        let mut board = Board::new();
        for (r, row) in rows.into_iter().enumerate() {
            if row.len() != BOARD_WIDTH {
                return Err(BoardError::RowWidth {
                    row: r,
                    expected: BOARD_WIDTH,
                    actual: row.len(),
                });
            }
            board.cells[r].copy_from_slice(&row);
        }
        Ok(board)
    }

    pub fn rows(&self) -> Vec<Vec<u8>> {
        self.cells.iter().map(|row| row.to_vec()).collect()
    }

    pub fn cell(&self, row: usize, col: usize) -> u8 {
        self.cells[row][col]
    }

    /// Collision query used by movement checks. Columns outside the board and
    /// rows below the floor are solid; rows above the top are open.
    pub fn is_occupied(&self, row: i32, col: i32) -> bool {
        if col < 0 || col >= BOARD_WIDTH as i32 {
            return true;
        }
        if row >= BOARD_HEIGHT as i32 {
            return true;
        }
        if row < 0 {
            return false;
        }
        self.cells[row as usize][col as usize] != CELL_EMPTY
    }

    /// Writes a tag into the board. Coordinates off the board are ignored.
    pub fn set_cell(&mut self, row: i32, col: i32, tag: u8) {
        if (0..BOARD_HEIGHT as i32).contains(&row) && (0..BOARD_WIDTH as i32).contains(&col) {
            self.cells[row as usize][col as usize] = tag;
        }
    }

    pub fn is_row_full(&self, row: usize) -> bool {
        self.cells[row].iter().all(|&c| c != CELL_EMPTY)
    }

    pub fn is_row_all_garbage_or_empty(&self, row: usize) -> bool {
        self.cells[row]
            .iter()
            .all(|&c| c == CELL_GARBAGE || c == CELL_EMPTY)
    }

    /// Removes every full row, scanning bottom-up. Rows above a removed row
    /// shift down and an empty row enters at the top; the same index is
    /// examined again after each removal.
    pub fn collapse_full_rows(&mut self) -> usize {
        let mut cleared = 0;
        let mut row = BOARD_HEIGHT;
        while row > 0 {
            let y = row - 1;
            if self.is_row_full(y) {
                self.remove_row(y);
                cleared += 1;
            } else {
                row -= 1;
            }
        }
        cleared
    }

    /// Drops the top row and appends a garbage row with a single hole at the
    /// bottom. Returns true when the dropped top row still held blocks.
    pub fn push_garbage_row(&mut self, hole: usize) -> bool {
        let overflow = self.cells[0].iter().any(|&c| c != CELL_EMPTY);
        for y in 0..BOARD_HEIGHT - 1 {
            self.cells[y] = self.cells[y + 1];
        }
        let mut row = [CELL_GARBAGE; BOARD_WIDTH];
        row[hole.min(BOARD_WIDTH - 1)] = CELL_EMPTY;
        self.cells[BOARD_HEIGHT - 1] = row;
        overflow
    }

    /// Pushes `count` garbage rows that all share the same hole column. More
    /// than a board's height of rows only repeats the same result.
    pub fn push_garbage_rows(&mut self, count: u32, hole: usize) -> bool {
        let mut overflow = false;
        for _ in 0..count.min(BOARD_HEIGHT as u32 + 1) {
            overflow |= self.push_garbage_row(hole);
        }
        overflow
    }

    /// Removes up to `max` rows made only of garbage (and holes), bottom-up.
    /// Fully empty rows are skipped so purging an empty board is a no-op.
    pub fn purge_garbage_rows(&mut self, max: usize) -> usize {
        let mut purged = 0;
        while purged < max {
            let target = (0..BOARD_HEIGHT).rev().find(|&y| {
                self.is_row_all_garbage_or_empty(y)
                    && self.cells[y].iter().any(|&c| c == CELL_GARBAGE)
            });
            match target {
                Some(y) => {
                    self.remove_row(y);
                    purged += 1;
                }
                None => break,
            }
        }
        purged
    }

    pub fn column_height(&self, col: usize) -> usize {
        (0..BOARD_HEIGHT)
            .find(|&y| self.cells[y][col] != CELL_EMPTY)
            .map(|y| BOARD_HEIGHT - y)
            .unwrap_or(0)
    }

    pub fn max_height(&self) -> usize {
        (0..BOARD_WIDTH).map(|c| self.column_height(c)).max().unwrap_or(0)
    }

    pub fn hole_count(&self) -> usize {
        let mut holes = 0;
        for x in 0..BOARD_WIDTH {
            let mut found = false;
            for y in 0..BOARD_HEIGHT {
                if self.cells[y][x] != CELL_EMPTY {
                    found = true;
                } else if found {
                    holes += 1;
                }
            }
        }
        holes
    }

    fn remove_row(&mut self, y: usize) {
        for pull in (1..=y).rev() {
            self.cells[pull] = self.cells[pull - 1];
        }
        self.cells[0] = [CELL_EMPTY; BOARD_WIDTH];
    }
}

/// Browser client colours, in tag order (I, O, T, S, Z, J, L).
const PIECE_COLORS: [&str; 7] = [
    "#00f0f0", "#f0f000", "#a000f0", "#00f000", "#f00000", "#0000f0", "#f0a000",
];

/// A cell as it arrives from a client: either a tag, or the CSS colour the
/// browser client stores in its grid.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireCell {
    Tag(u8),
    Color(String),
}

impl WireCell {
    /// Known piece colours map to their tag. Any other colour, the garbage
    /// grey included, is garbage.
    pub fn tag(self) -> u8 {
        match self {
            WireCell::Tag(tag) => tag,
            WireCell::Color(color) if color.is_empty() => CELL_EMPTY,
            WireCell::Color(color) => PIECE_COLORS
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&color))
                .map(|i| i as u8 + 1)
                .unwrap_or(CELL_GARBAGE),
        }
    }
}

impl TryFrom<Vec<Vec<WireCell>>> for Board {
    type Error = BoardError;

    fn try_from(rows: Vec<Vec<WireCell>>) -> Result<Self, Self::Error> {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(WireCell::tag).collect())
            .collect();
        Board::from_rows(rows)
    }
}

impl From<Board> for Vec<Vec<u8>> {
    fn from(board: Board) -> Self {
        board.rows()
    }
}
