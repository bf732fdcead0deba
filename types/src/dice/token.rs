use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Balance columns a lobby can be wagered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TokenType {
    #[serde(rename = "ton_balance")]
    Ton,
    #[serde(rename = "m5_balance")]
    M5,
    #[serde(rename = "dfc_balance")]
    Dfc,
}

impl TokenType {
    pub const ALL: [TokenType; 3] = [TokenType::Ton, TokenType::M5, TokenType::Dfc];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Ton => "ton_balance",
            TokenType::M5 => "m5_balance",
            TokenType::Dfc => "dfc_balance",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid token type: {0}")]
pub struct UnknownToken(pub String);

impl FromStr for TokenType {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenType::ALL
            .into_iter()
            .find(|token| token.as_str() == s)
            .ok_or_else(|| UnknownToken(s.to_string()))
    }
}

/// Whether a wager was placed against the house bot or another player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Bot,
    Pvp,
}
