//! Two-player competitive falling-block engine and its session authority.
//!
//! Each player runs an [`Engine`]; the server runs one [`session::Room`] per match
//! inside a room actor (see [`hub`]). Both sides share the scoring and ability
//! rules so the damage the authority computes matches what clients expect.

pub const BOARD_WIDTH: usize = 10;
pub const BOARD_HEIGHT: usize = 20;

pub mod ability;
pub mod board;
pub mod bot;
pub mod clear;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod hub;
pub mod logging;
pub mod net;
pub mod piece;
pub mod player;
pub mod protocol;
pub mod schedule;
pub mod scoring;
pub mod session;

pub use ability::{Character, DamageOutcome, Gauge};
pub use board::Board;
pub use config::GameRules;
pub use engine::{Action, Engine, EngineEvent};
pub use error::{BoardError, ConfigError, SessionError};
pub use piece::{Piece, Rotation, Tetromino};
pub use player::PlayerState;
pub use protocol::{ClientMessage, ServerMessage};
pub use scoring::{AttackEvent, AttackTable};
pub use session::{MatchPhase, Room};

/// Wall-clock milliseconds since the unix epoch. Engine and session code take
/// `now` as a parameter; only the runtime edges call this.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
