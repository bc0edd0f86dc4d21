use crate::board::Board;
use crate::piece::{Piece, Tetromino};

/// What a single lock produced, before any scoring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearEvent {
    pub lines: u32,
    pub spin: bool,
}

impl ClearEvent {
    /// True when the lock neither cleared a row nor counted as a spin.
    pub fn is_empty(&self) -> bool {
        self.lines == 0 && !self.spin
    }
}

/// Corner test for T-spins. The corners are those of the 3x3 box anchored at
/// the piece origin; anything outside the board counts as filled.
pub fn detect_spin(board: &Board, piece: &Piece) -> bool {
    if piece.kind != Tetromino::T || !piece.rotated_before_lock {
        return false;
    }
    let (x, y) = (piece.x, piece.y);
    let corners = [(y, x), (y, x + 2), (y + 2, x), (y + 2, x + 2)];
    let filled = corners
        .iter()
        .filter(|&&(row, col)| row < 0 || board.is_occupied(row, col))
        .count();
    filled >= 3
}

/// True when part of the piece would lock above the visible board. Those
/// cells cannot be stored, so the lock ends the game.
pub fn is_lock_out(piece: &Piece) -> bool {
    piece.cells().any(|(row, _)| row < 0)
}

/// Writes the piece into the board, checks for a spin against the settled
/// cells, then collapses full rows.
pub fn resolve_lock(board: &mut Board, piece: &Piece) -> ClearEvent {
    let tag = piece.kind.color_id();
    for (row, col) in piece.cells() {
        if row >= 0 {
            board.set_cell(row, col, tag);
        }
    }
    let spin = detect_spin(board, piece);
    let lines = board.collapse_full_rows() as u32;
    ClearEvent { lines, spin }
}
