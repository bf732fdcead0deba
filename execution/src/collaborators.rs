//! Contracts of the external systems settlement depends on.

use crate::Error;
use dicearena_types::dice::{MatchKind, MatchRecord, TokenType};
use std::{future::Future, time::Duration};

/// One settlement's balance movement.
#[derive(Clone, Debug, PartialEq)]
pub struct Transfer {
    /// Idempotency key: a ledger must apply a given id at most once.
    pub settlement_id: String,
    pub winner_wallet: String,
    pub loser_wallet: String,
    pub token: TokenType,
    pub credit: f64,
    pub debit: f64,
}

pub trait Ledger: Send + Sync {
    fn has_sufficient_balance(
        &self,
        wallet: &str,
        token: TokenType,
        amount: f64,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Current balance, `None` for an unknown wallet.
    fn balance(
        &self,
        wallet: &str,
        token: TokenType,
    ) -> impl Future<Output = Result<Option<f64>, Error>> + Send;

    /// Debit the loser and credit the winner in one step.
    ///
    /// Fails with `InsufficientFunds` (and changes nothing) if the loser's balance no longer
    /// covers the debit.
    fn update_balances(&self, transfer: &Transfer) -> impl Future<Output = Result<(), Error>> + Send;
}

pub trait ReferralPayout: Send + Sync {
    fn distribute_reward(
        &self,
        wallet: &str,
        reward_base: f64,
        token: TokenType,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

pub trait PointsLedger: Send + Sync {
    /// Returns the points awarded.
    fn add_points_for_bet(
        &self,
        wallet: &str,
        token: TokenType,
        bet_amount: f64,
        is_win: bool,
        kind: MatchKind,
    ) -> impl Future<Output = Result<f64, Error>> + Send;
}

pub trait HistorySink: Send + Sync {
    /// Persist a record and return its sequence counter.
    fn save(&self, record: &MatchRecord) -> impl Future<Output = Result<u64, Error>> + Send;
}

/// Everything settlement talks to, usually one storage backend.
pub trait Backend: Ledger + ReferralPayout + PointsLedger + HistorySink + 'static {}

impl<T> Backend for T where T: Ledger + ReferralPayout + PointsLedger + HistorySink + 'static {}

/// Await a collaborator call for at most `limit`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    call: &'static str,
    future: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Storage(format!(
            "{call} timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
