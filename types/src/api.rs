//! JSON wire protocol spoken over `/ws/dice`.
//!
//! Inbound frames are an envelope whose `action` field selects the variant. Each variant's
//! fields are checked one by one so that any malformed input turns into a [DecodeError]
//! rather than a dropped connection.

use crate::dice::{LobbySummary, Slot, TokenType, DEFAULT_FIRST_NAME};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid action format")]
    Malformed,
    #[error("missing action")]
    MissingAction,
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("invalid or missing {0}")]
    InvalidField(&'static str),
}

/// A request sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    CreateLobby {
        target_score: u32,
        /// Validated against [TokenType] by the engine so the caller sees `InvalidToken`.
        token_type: String,
        bet_amount: f64,
        wallet: String,
        first_name: String,
    },
    JoinLobby {
        lobby_id: String,
        wallet: String,
        first_name: String,
    },
    RollDice {
        lobby_id: String,
    },
    ListLobbies,
    TerminateGame {
        lobby_id: String,
        winner: Slot,
    },
    DeleteLobby {
        lobby_id: String,
    },
    ConfirmReady {
        lobby_id: String,
    },
}

impl Action {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::Malformed)?;
        let Value::Object(fields) = value else {
            return Err(DecodeError::Malformed);
        };
        let fields = Fields(&fields);
        let action = match fields.0.get("action") {
            None | Some(Value::Null) => return Err(DecodeError::MissingAction),
            Some(Value::String(action)) => action.as_str(),
            Some(_) => return Err(DecodeError::Malformed),
        };

        match action {
            "create_lobby" => Ok(Action::CreateLobby {
                target_score: fields.positive_integer("target_score")?,
                token_type: fields.string("token_type")?,
                bet_amount: fields.positive_amount("bet_amount")?,
                wallet: fields.string("wallet")?,
                first_name: fields.first_name(),
            }),
            "join_lobby" => Ok(Action::JoinLobby {
                lobby_id: fields.string("lobby_id")?,
                wallet: fields.string("wallet")?,
                first_name: fields.first_name(),
            }),
            "roll_dice" => Ok(Action::RollDice {
                lobby_id: fields.string("lobby_id")?,
            }),
            "list_lobbies" => Ok(Action::ListLobbies),
            "terminate_game" => Ok(Action::TerminateGame {
                lobby_id: fields.string("lobby_id")?,
                winner: fields
                    .0
                    .get("winner")
                    .and_then(Value::as_str)
                    .and_then(Slot::parse)
                    .ok_or(DecodeError::InvalidField("winner"))?,
            }),
            "delete_lobby" => Ok(Action::DeleteLobby {
                lobby_id: fields.string("lobby_id")?,
            }),
            "confirm_ready" => Ok(Action::ConfirmReady {
                lobby_id: fields.string("lobby_id")?,
            }),
            other => Err(DecodeError::UnknownAction(other.to_string())),
        }
    }

    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateLobby { .. } => "create_lobby",
            Action::JoinLobby { .. } => "join_lobby",
            Action::RollDice { .. } => "roll_dice",
            Action::ListLobbies => "list_lobbies",
            Action::TerminateGame { .. } => "terminate_game",
            Action::DeleteLobby { .. } => "delete_lobby",
            Action::ConfirmReady { .. } => "confirm_ready",
        }
    }
}

struct Fields<'a>(&'a Map<String, Value>);

impl Fields<'_> {
    fn string(&self, name: &'static str) -> Result<String, DecodeError> {
        match self.0.get(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            _ => Err(DecodeError::InvalidField(name)),
        }
    }

    fn positive_integer(&self, name: &'static str) -> Result<u32, DecodeError> {
        // Browsers send every number as a double, so `25.0` is accepted.
        let number = self
            .0
            .get(name)
            .and_then(Value::as_f64)
            .ok_or(DecodeError::InvalidField(name))?;
        if number < 1.0 || number.fract() != 0.0 || number > u32::MAX as f64 {
            return Err(DecodeError::InvalidField(name));
        }
        Ok(number as u32)
    }

    fn positive_amount(&self, name: &'static str) -> Result<f64, DecodeError> {
        match self.0.get(name).and_then(Value::as_f64) {
            Some(amount) if amount.is_finite() && amount > 0.0 => Ok(amount),
            _ => Err(DecodeError::InvalidField(name)),
        }
    }

    fn first_name(&self) -> String {
        match self.0.get("first_name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
            _ => DEFAULT_FIRST_NAME.to_string(),
        }
    }
}

/// Sent to both participants when a match starts; `player_id` is the receiver's slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameStart {
    pub message: String,
    pub current_turn: Slot,
    pub player_id: Slot,
    pub player_name: String,
    pub lobby_id: String,
    pub target_score: u32,
    pub current_round: u32,
    pub token_type: TokenType,
    pub bet_amount: f64,
    pub player1_id: String,
    pub player2_id: String,
    pub player1_name: String,
    pub player2_name: String,
}

/// Outcome of a single roll, sent to both participants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round: u32,
    /// Identifier of the player who rolled.
    pub player: String,
    pub player_name: String,
    pub roll1: u8,
    pub roll2: u8,
    /// Sum of the dice, without the bonus.
    pub total_roll: u32,
    pub bonus: u32,
    pub player1_score: u32,
    pub player2_score: u32,
    pub player1_name: String,
    pub player2_name: String,
}

/// A message sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Frame {
    LobbyCreated {
        lobby_id: String,
        token_type: TokenType,
        bet_amount: f64,
        target_score: u32,
    },
    JoinedLobby {
        lobby_id: String,
    },
    GameStart(GameStart),
    PartialRoundResult(RoundResult),
    TurnChange {
        current_turn: Slot,
        current_round: u32,
    },
    GameOver {
        winner: Slot,
        winner_name: String,
    },
    GameTerminated {
        lobby_id: String,
        winner: Slot,
    },
    LobbyDeleted {
        lobby_id: String,
    },
    ReadyConfirmation {
        message: String,
    },
    LobbyList {
        lobbies: Vec<LobbySummary>,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
}

impl Frame {
    pub fn error(message: impl ToString) -> Self {
        Frame::Error {
            message: message.to_string(),
        }
    }

    pub fn warning(message: impl ToString) -> Self {
        Frame::Warning {
            message: message.to_string(),
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> String {
        // Every field is a string, number, or enum with a string form.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"action":"error","message":"internal encoding error"}"#.to_string()
        })
    }
}
