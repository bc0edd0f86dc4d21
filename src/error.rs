use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("board must have {expected} rows, got {actual}")]
    RowCount { expected: usize, actual: usize },
    #[error("row {row} must have {expected} cells, got {actual}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Failures surfaced by the session authority. The `Display` text is what the
/// client receives in an `error` message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("room {0} is full")]
    RoomFull(String),
    #[error("player {player} is already in room {room}")]
    DuplicatePlayer { room: String, player: String },
    #[error("player id must not be empty")]
    EmptyPlayerId,
    #[error("not joined to a room")]
    NotInRoom,
    #[error("already joined to room {0}")]
    AlreadyJoined(String),
    #[error("room {0} is closed")]
    RoomClosed(String),
    #[error("session hub is not running")]
    HubClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read rules file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rules file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid rule {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
