use dicearena_types::dice::TokenType;
use std::{collections::BTreeMap, sync::Mutex};
use uuid::Uuid;

/// A participant bound to one live connection.
///
/// Identity fields are immutable after creation, so a player can be shared between the
/// connection that owns it, the lobby seat, and a running settlement.
#[derive(Debug)]
pub struct Player {
    id: String,
    wallet: String,
    name: String,
    balances: Mutex<BTreeMap<TokenType, f64>>,
}

impl Player {
    pub fn new(wallet: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            wallet: wallet.into(),
            name: name.into(),
            balances: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn wallet(&self) -> &str {
        &self.wallet
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last observed ledger balance. Informational only.
    pub fn cached_balance(&self, token: TokenType) -> Option<f64> {
        let balances = match self.balances.lock() {
            Ok(balances) => balances,
            Err(poisoned) => poisoned.into_inner(),
        };
        balances.get(&token).copied()
    }

    pub fn cache_balance(&self, token: TokenType, amount: f64) {
        let mut balances = match self.balances.lock() {
            Ok(balances) => balances,
            Err(poisoned) => poisoned.into_inner(),
        };
        balances.insert(token, amount);
    }
}
