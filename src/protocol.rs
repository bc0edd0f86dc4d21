//! JSON frames exchanged between clients and the session authority. Every
//! frame is an object with a `type` discriminator and camelCase fields.

use serde::{Deserialize, Serialize};

use crate::ability::Character;
use crate::board::Board;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    JoinRoom {
        player_id: String,
        /// Missing or empty asks the hub to generate one.
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        character: Character,
    },
    Ready,
    #[serde(alias = "update")]
    BoardUpdate {
        board: Board,
        #[serde(default)]
        score: u32,
        #[serde(default = "first_level")]
        level: u32,
        #[serde(default)]
        hp: Option<u32>,
        #[serde(default)]
        skill_gauge: Option<u32>,
    },
    #[serde(alias = "attack")]
    LinesCleared {
        lines: u32,
        #[serde(default)]
        attack_type: Option<String>,
    },
    SkillActivated {
        #[serde(default)]
        character: Option<Character>,
    },
    GameOver,
    RematchReady,
    LeaveRoom,
}

fn first_level() -> u32 {
    1
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: String,
    pub ready: bool,
    pub character: Character,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub players: Vec<PlayerSummary>,
    pub player_count: usize,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    Knockout,
    TopOut,
    Forfeit,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Joined {
        player_id: String,
        room: RoomInfo,
    },
    PlayerJoined {
        player: PlayerSummary,
    },
    Error {
        message: String,
    },
    PlayerReady {
        player_id: String,
    },
    /// Start of the countdown. Clients unblock input `countdown_ms` later.
    GameStart {
        timestamp: u64,
        countdown_ms: u64,
    },
    OpponentUpdate {
        board: Board,
        score: u32,
        level: u32,
        hp: u32,
        skill_gauge: u32,
        player_id: String,
        character: Character,
    },
    Attack {
        lines: u32,
        from: String,
        attack_type: String,
        hp: u32,
    },
    AttackSent {
        lines: u32,
        to: String,
        attack_type: String,
        hp: u32,
    },
    SkillActivated {
        player_id: String,
        character: Character,
    },
    SkillDeactivated {
        player_id: String,
        character: Character,
    },
    GameEnd {
        winner: Option<String>,
        loser: Option<String>,
        reason: EndReason,
    },
    RematchReady {
        player_id: String,
    },
    PlayerLeft {
        player_id: String,
        player_count: usize,
    },
}

impl ServerMessage {
    pub fn error(err: impl ToString) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }
}
