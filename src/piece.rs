use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::BOARD_WIDTH;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum Tetromino {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

impl Tetromino {
    pub fn all() -> [Tetromino; 7] {
        [
            Tetromino::I,
            Tetromino::O,
            Tetromino::T,
            Tetromino::S,
            Tetromino::Z,
            Tetromino::J,
            Tetromino::L,
        ]
    }

    /// Uniform pick over the seven shapes; there is no bag.
    pub fn random(rng: &mut impl Rng) -> Tetromino {
        Tetromino::all()[rng.gen_range(0..7)]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Board tag written on lock. Distinct from `CELL_EMPTY` and `CELL_GARBAGE`.
    pub fn color_id(self) -> u8 {
        self.index() as u8 + 1
    }

    fn base_shape(self) -> Shape {
        let rows: &[&[u8]] = match self {
            Tetromino::I => &[&[1, 1, 1, 1]],
            Tetromino::O => &[&[1, 1], &[1, 1]],
            Tetromino::T => &[&[0, 1, 0], &[1, 1, 1]],
            Tetromino::S => &[&[0, 1, 1], &[1, 1, 0]],
            Tetromino::Z => &[&[1, 1, 0], &[0, 1, 1]],
            Tetromino::J => &[&[1, 0, 0], &[1, 1, 1]],
            Tetromino::L => &[&[0, 0, 1], &[1, 1, 1]],
        };
        Shape::from_rows(rows)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Rotation {
    Spawn = 0,
    Right = 1,
    Reverse = 2,
    Left = 3,
}

impl Rotation {
    pub fn rotate_cw(self) -> Rotation {
        match self {
            Rotation::Spawn => Rotation::Right,
            Rotation::Right => Rotation::Reverse,
            Rotation::Reverse => Rotation::Left,
            Rotation::Left => Rotation::Spawn,
        }
    }
}

/// Occupancy matrix of a piece in its current orientation, at most 4x4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    rows: usize,
    cols: usize,
    mask: [[bool; 4]; 4],
}

impl Shape {
    fn from_rows(rows: &[&[u8]]) -> Shape {
        let mut mask = [[false; 4]; 4];
        for (r, row) in rows.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                mask[r][c] = v != 0;
            }
        }
        Shape {
            rows: rows.len(),
            cols: rows[0].len(),
            mask,
        }
    }

    pub fn width(&self) -> usize {
        self.cols
    }

    pub fn height(&self) -> usize {
        self.rows
    }

    pub fn is_set(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.mask[row][col]
    }

    /// Quarter turn clockwise: transpose, then reverse each row.
    pub fn rotated_cw(&self) -> Shape {
        let mut mask = [[false; 4]; 4];
        for i in 0..self.cols {
            for j in 0..self.rows {
                mask[i][j] = self.mask[self.rows - 1 - j][i];
            }
        }
        Shape {
            rows: self.cols,
            cols: self.rows,
            mask,
        }
    }

    /// Offsets `(row, col)` of the occupied cells.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        (0..self.rows).flat_map(move |r| {
            (0..self.cols)
                .filter(move |&c| self.mask[r][c])
                .map(move |c| (r as i32, c as i32))
        })
    }
}

#[derive(Default)]
pub struct KickTable;

impl KickTable {
    /// SRS offsets `(dx, dy)` with y pointing up, tried in order.
    pub fn kicks(piece: Tetromino, from: Rotation, to: Rotation) -> &'static [(i32, i32)] {
        let idx = match (from, to) {
            (Rotation::Spawn, Rotation::Right) => 0,
            (Rotation::Right, Rotation::Spawn) => 1,
            (Rotation::Right, Rotation::Reverse) => 2,
            (Rotation::Reverse, Rotation::Right) => 3,
            (Rotation::Reverse, Rotation::Left) => 4,
            (Rotation::Left, Rotation::Reverse) => 5,
            (Rotation::Left, Rotation::Spawn) => 6,
            (Rotation::Spawn, Rotation::Left) => 7,
            _ => return &[(0, 0)],
        };
        const JLSTZ: [[(i32, i32); 5]; 8] = [
            [(0, 0), (-1, 0), (-1, 1), (0, -2), (-1, -2)], // 0->R
            [(0, 0), (1, 0), (1, -1), (0, 2), (1, 2)],     // R->0
            [(0, 0), (1, 0), (1, -1), (0, 2), (1, 2)],     // R->2
            [(0, 0), (-1, 0), (-1, 1), (0, -2), (-1, -2)], // 2->R
            [(0, 0), (1, 0), (1, 1), (0, -2), (1, -2)],    // 2->L
            [(0, 0), (-1, 0), (-1, -1), (0, 2), (-1, 2)],  // L->2
            [(0, 0), (-1, 0), (-1, -1), (0, 2), (-1, 2)],  // L->0
            [(0, 0), (1, 0), (1, 1), (0, -2), (1, -2)],    // 0->L
        ];
        const I: [[(i32, i32); 5]; 8] = [
            [(0, 0), (-2, 0), (1, 0), (-2, -1), (1, 2)], // 0->R
            [(0, 0), (2, 0), (-1, 0), (2, 1), (-1, -2)], // R->0
            [(0, 0), (-1, 0), (2, 0), (-1, 2), (2, -1)], // R->2
            [(0, 0), (1, 0), (-2, 0), (1, -2), (-2, 1)], // 2->R
            [(0, 0), (2, 0), (-1, 0), (2, 1), (-1, -2)], // 2->L
            [(0, 0), (-2, 0), (1, 0), (-2, -1), (1, 2)], // L->2
            [(0, 0), (1, 0), (-2, 0), (1, -2), (-2, 1)], // L->0
            [(0, 0), (-1, 0), (2, 0), (-1, 2), (2, -1)], // 0->L
        ];
        match piece {
            Tetromino::I => &I[idx],
            Tetromino::O => &[],
            _ => &JLSTZ[idx],
        }
    }
}

/// A falling piece. `x`/`y` locate the top-left of its shape matrix on the board.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Piece {
    pub kind: Tetromino,
    pub shape: Shape,
    pub rotation: Rotation,
    pub x: i32,
    pub y: i32,
    pub rotated_before_lock: bool,
}

impl Piece {
    pub fn spawn(kind: Tetromino) -> Piece {
        let shape = kind.base_shape();
        Piece {
            kind,
            shape,
            rotation: Rotation::Spawn,
            x: spawn_column(&shape),
            y: 0,
            rotated_before_lock: false,
        }
    }

    /// Back to the spawn column and row 0, keeping the orientation.
    pub fn recenter(&mut self) {
        self.x = spawn_column(&self.shape);
        self.y = 0;
    }

    /// Absolute `(row, col)` of every occupied cell.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.shape
            .cells()
            .map(move |(r, c)| (self.y + r, self.x + c))
    }

    /// Rows above the board are allowed; anything else must be in bounds and empty.
    pub fn fits(&self, board: &Board) -> bool {
        self.cells().all(|(row, col)| !board.is_occupied(row, col))
    }

    pub fn shifted(&self, dx: i32, dy: i32) -> Piece {
        Piece {
            x: self.x + dx,
            y: self.y + dy,
            ..self.clone()
        }
    }

    /// Clockwise rotation resolved against the kick table. On success the
    /// piece is marked as rotated; on failure it is left untouched.
    pub fn try_rotate(&mut self, board: &Board) -> bool {
        let from = self.rotation;
        let to = from.rotate_cw();
        let kicks = KickTable::kicks(self.kind, from, to);
        if kicks.is_empty() {
            return false;
        }
        let shape = self.shape.rotated_cw();
        for &(dx, dy) in kicks {
            let test = Piece {
                shape,
                rotation: to,
                x: self.x + dx,
                // kick tables are y-up, board rows grow downward
                y: self.y - dy,
                ..self.clone()
            };
            if test.fits(board) {
                *self = test;
                self.rotated_before_lock = true;
                return true;
            }
        }
        false
    }

    /// Lowest reachable position straight below the current one.
    pub fn dropped(&self, board: &Board) -> Piece {
        let mut landing = self.clone();
        loop {
            let next = landing.shifted(0, 1);
            if !next.fits(board) {
                return landing;
            }
            landing = next;
        }
    }
}

fn spawn_column(shape: &Shape) -> i32 {
    (BOARD_WIDTH / 2) as i32 - (shape.width() / 2) as i32
}
