use super::TokenType;
use serde::{Deserialize, Serialize};

/// Durable projection of one finished match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Settlement identifier; repeated saves with the same id are ignored by the sink.
    pub match_id: String,
    /// Server-assigned sequence number (0 until the sink assigns one).
    #[serde(default)]
    pub counter: u64,
    pub player1_name: String,
    pub player2_name: String,
    pub player1_score: u32,
    pub player2_score: u32,
    /// Display name of the winner.
    pub winner: String,
    /// Net result for each player: payout for the winner, negative wager for the loser.
    pub player1_earnings: f64,
    pub player2_earnings: f64,
    pub token_type: TokenType,
    pub bet_amount: f64,
    pub player1_wallet: String,
    pub player2_wallet: String,
    /// Unix milliseconds.
    pub time_played: u64,
}
