use super::TokenType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two fixed participant positions in a lobby.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// The creator.
    Player1,
    /// The joiner.
    Player2,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::Player1 => Slot::Player2,
            Slot::Player2 => Slot::Player1,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Slot::Player1 => 0,
            Slot::Player2 => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Player1 => "player1",
            Slot::Player2 => "player2",
        }
    }

    pub fn parse(value: &str) -> Option<Slot> {
        match value {
            "player1" => Some(Slot::Player1),
            "player2" => Some(Slot::Player2),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lobby lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Waiting,
    InProgress,
    Finished,
}

/// Process-local handle of a live transport connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Entry of the open-lobby listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub lobby_id: String,
    pub creator_name: String,
    pub target_score: u32,
    pub token_type: TokenType,
    pub bet_amount: f64,
}
