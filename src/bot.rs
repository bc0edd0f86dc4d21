use crate::board::Board;
use crate::clear::resolve_lock;
use crate::engine::Action;
use crate::piece::Piece;
use crate::BOARD_WIDTH;

#[derive(Clone, Copy, Debug)]
pub struct BotConfig {
    /// Pieces per second.
    pub pps: f32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self { pps: 1.5 }
    }
}

/// A chosen placement and the inputs that reach it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub rotations: u32,
    pub x: i32,
    pub score: i32,
    pub actions: Vec<Action>,
}

fn evaluate(board: &Board, landing: &Piece) -> i32 {
    let mut simulated = board.clone();
    let lines = resolve_lock(&mut simulated, landing).lines;
    let holes = simulated.hole_count();
    let height_penalty = simulated.max_height() as i32 * 2;
    (lines as i32 * 40) - (holes as i32 * 8) - height_penalty
}

/// Tries every rotation and column reachable with the engine's own movement
/// rules and keeps the best-scoring one.
pub fn plan(board: &Board, current: &Piece) -> Option<Placement> {
    let mut best: Option<Placement> = None;
    let mut rotated = current.clone();
    for rotations in 0..4u32 {
        if rotations > 0 && !rotated.try_rotate(board) {
            break;
        }
        for target in 0..BOARD_WIDTH as i32 {
            let Some((placed, moves)) = walk_to(board, &rotated, target) else {
                continue;
            };
            let landing = placed.dropped(board);
            let score = evaluate(board, &landing);
            if best.as_ref().is_none_or(|b| score > b.score) {
                let mut actions = vec![Action::Rotate; rotations as usize];
                actions.extend(moves);
                actions.push(Action::HardDrop);
                best = Some(Placement {
                    rotations,
                    x: target,
                    score,
                    actions,
                });
            }
        }
        if current.kind == crate::piece::Tetromino::O {
            break;
        }
    }
    best
}

fn walk_to(board: &Board, piece: &Piece, target: i32) -> Option<(Piece, Vec<Action>)> {
    let mut piece = piece.clone();
    let mut moves = Vec::new();
    while piece.x != target {
        let (dx, action) = if target < piece.x {
            (-1, Action::MoveLeft)
        } else {
            (1, Action::MoveRight)
        };
        let next = piece.shifted(dx, 0);
        if !next.fits(board) {
            return None;
        }
        piece = next;
        moves.push(action);
    }
    Some((piece, moves))
}

/// Paces the bot: hands out one placement's worth of inputs per piece time.
pub struct BotDriver {
    config: BotConfig,
    think_timer: f32,
}

impl BotDriver {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            think_timer: 0.0,
        }
    }

    pub fn update(
        &mut self,
        board: &Board,
        current: &Piece,
        skill_ready: bool,
        dt_ms: f32,
    ) -> Vec<Action> {
        self.think_timer += dt_ms;
        let piece_time = 1000.0 / self.config.pps.max(0.1);
        if self.think_timer < piece_time {
            return Vec::new();
        }
        self.think_timer = 0.0;
        let mut actions = Vec::new();
        if skill_ready {
            actions.push(Action::ActivateSkill);
        }
        match plan(board, current) {
            Some(placement) => actions.extend(placement.actions),
            None => actions.push(Action::HardDrop),
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::CELL_GARBAGE;
    use crate::piece::Tetromino;
    use crate::BOARD_HEIGHT;

    #[test]
    fn bot_takes_the_tetris() {
        let mut board = Board::new();
        for y in BOARD_HEIGHT - 4..BOARD_HEIGHT {
            for x in 0..BOARD_WIDTH - 1 {
                board.set_cell(y as i32, x as i32, CELL_GARBAGE);
            }
        }
        let piece = Piece::spawn(Tetromino::I);
        let placement = plan(&board, &piece).unwrap();
        assert_eq!(placement.rotations, 1);
        assert_eq!(placement.x, BOARD_WIDTH as i32 - 1);
        assert_eq!(placement.actions.last(), Some(&Action::HardDrop));
        assert_eq!(placement.score, 4 * 40);
    }

    #[test]
    fn flat_pieces_lie_flat_on_empty_board() {
        let placement = plan(&Board::new(), &Piece::spawn(Tetromino::O)).unwrap();
        assert_eq!(placement.rotations, 0);
        assert_eq!(placement.score, -4);
    }

    #[test]
    fn driver_waits_for_piece_time() {
        let mut driver = BotDriver::new(BotConfig { pps: 2.0 });
        let board = Board::new();
        let piece = Piece::spawn(Tetromino::T);
        assert!(driver.update(&board, &piece, false, 400.0).is_empty());
        let actions = driver.update(&board, &piece, true, 100.0);
        assert_eq!(actions.first(), Some(&Action::ActivateSkill));
        assert_eq!(actions.last(), Some(&Action::HardDrop));
    }
}
