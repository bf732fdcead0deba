//! Turns a finished match into ledger, referral, points, and history effects.
//!
//! Steps run in order and are not transactional. Only the ledger move is fatal; later
//! steps log and report warnings. Each step is journaled so a restart can resume an
//! interrupted settlement from its first incomplete step.

use crate::{
    collaborators::{bounded, Backend, Transfer},
    journal::{IntentJournal, SettlementIntent, Step},
    Error,
};
use dicearena_types::dice::{
    MatchKind, MatchRecord, Slot, TokenType, BASIS_POINTS, DEFAULT_FEE_BPS,
    DEFAULT_REFERRAL_REWARD_BPS,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

/// How a match reached its end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finish {
    Natural,
    Terminated { by: Slot },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub wallet: String,
    pub name: String,
    pub score: u32,
}

/// Immutable outcome of one match, captured when its lobby leaves the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: String,
    pub lobby_id: String,
    pub winner: Slot,
    /// Indexed by slot.
    pub players: [Participant; 2],
    pub token_type: TokenType,
    pub bet_amount: f64,
    pub finish: Finish,
    /// Unix milliseconds.
    pub finished_at: u64,
}

impl MatchResult {
    pub fn winner(&self) -> &Participant {
        &self.players[self.winner.index()]
    }

    pub fn loser(&self) -> &Participant {
        &self.players[self.winner.other().index()]
    }
}

/// Fee and referral rates in basis points of the doubled wager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettlementPolicy {
    pub fee_bps: u64,
    pub referral_reward_bps: u64,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_FEE_BPS,
            referral_reward_bps: DEFAULT_REFERRAL_REWARD_BPS,
        }
    }
}

impl SettlementPolicy {
    /// Credit to the winner: the doubled wager minus the fee.
    pub fn payout(&self, bet_amount: f64) -> f64 {
        let gross = 2.0 * bet_amount;
        gross * BASIS_POINTS.saturating_sub(self.fee_bps) as f64 / BASIS_POINTS as f64
    }

    /// Amount distributed up the winner's referral chain.
    pub fn referral_base(&self, bet_amount: f64) -> f64 {
        2.0 * bet_amount * self.referral_reward_bps as f64 / BASIS_POINTS as f64
    }
}

/// What a completed settlement produced.
#[derive(Clone, Debug, PartialEq)]
pub struct SettlementReport {
    pub record: MatchRecord,
    /// Sequence counter assigned by the history sink, if the record was saved.
    pub counter: Option<u64>,
    /// Non-fatal problems only the winner should hear about.
    pub winner_warnings: Vec<String>,
    /// Non-fatal problems both players should hear about.
    pub shared_warnings: Vec<String>,
}

pub struct Settlement<B> {
    backend: Arc<B>,
    journal: Arc<dyn IntentJournal>,
    policy: SettlementPolicy,
    timeout: Duration,
}

impl<B: Backend> Settlement<B> {
    pub fn new(
        backend: Arc<B>,
        journal: Arc<dyn IntentJournal>,
        policy: SettlementPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            journal,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> SettlementPolicy {
        self.policy
    }

    pub async fn settle(&self, result: MatchResult) -> Result<SettlementReport, Error> {
        let intent = SettlementIntent::new(result);
        if let Err(e) = self.journal.record(&intent) {
            error!(settlement = intent.id(), error = %e, "failed to journal settlement intent");
        }
        self.run(intent).await
    }

    /// Resume every unresolved intent. Returns how many completed.
    pub async fn recover(&self) -> Result<usize, Error> {
        let pending = self.journal.pending()?;
        let mut recovered = 0;
        for intent in pending {
            info!(settlement = intent.id(), lobby_id = %intent.result.lobby_id, completed = ?intent.completed, "resuming settlement");
            match self.run(intent).await {
                Ok(_) => recovered += 1,
                Err(e) => warn!(error = %e, "settlement not recovered"),
            }
        }
        Ok(recovered)
    }

    async fn run(&self, intent: SettlementIntent) -> Result<SettlementReport, Error> {
        let result = &intent.result;
        let id = intent.id();
        let winner = result.winner();
        let loser = result.loser();
        let token = result.token_type;
        let bet = result.bet_amount;
        let payout = self.policy.payout(bet);
        let mut report = SettlementReport {
            record: record(result, payout),
            counter: None,
            winner_warnings: Vec::new(),
            shared_warnings: Vec::new(),
        };

        if !intent.is_done(Step::Ledger) {
            let transfer = Transfer {
                settlement_id: id.to_string(),
                winner_wallet: winner.wallet.clone(),
                loser_wallet: loser.wallet.clone(),
                token,
                credit: payout,
                debit: bet,
            };
            match bounded(
                self.timeout,
                "update_balances",
                self.backend.update_balances(&transfer),
            )
            .await
            {
                Ok(()) => {
                    info!(settlement = id, winner = %winner.wallet, loser = %loser.wallet, %token, credit = payout, debit = bet, "balances updated");
                    self.mark(id, Step::Ledger);
                }
                Err(Error::InsufficientFunds) => {
                    warn!(settlement = id, loser = %loser.wallet, %token, debit = bet, "loser can no longer cover the wager, settlement abandoned");
                    self.resolve(id);
                    return Err(Error::InsufficientFunds);
                }
                Err(e) => {
                    error!(settlement = id, error = %e, "ledger move failed, intent left pending");
                    return Err(e);
                }
            }
        }

        if !intent.is_done(Step::Referral) {
            let base = self.policy.referral_base(bet);
            if let Err(e) = bounded(
                self.timeout,
                "distribute_reward",
                self.backend.distribute_reward(&winner.wallet, base, token),
            )
            .await
            {
                warn!(settlement = id, wallet = %winner.wallet, error = %e, "referral reward failed");
                report
                    .winner_warnings
                    .push(format!("referral reward could not be distributed: {e}"));
            }
            self.mark(id, Step::Referral);
        }

        if !intent.is_done(Step::Points) {
            for (participant, is_win) in [(winner, true), (loser, false)] {
                if let Err(e) = bounded(
                    self.timeout,
                    "add_points_for_bet",
                    self.backend.add_points_for_bet(
                        &participant.wallet,
                        token,
                        bet,
                        is_win,
                        MatchKind::Pvp,
                    ),
                )
                .await
                {
                    warn!(settlement = id, wallet = %participant.wallet, is_win, error = %e, "points award failed");
                }
            }
            self.mark(id, Step::Points);
        }

        if !intent.is_done(Step::History) {
            match bounded(self.timeout, "save", self.backend.save(&report.record)).await {
                Ok(counter) => {
                    report.record.counter = counter;
                    report.counter = Some(counter);
                }
                Err(e) => {
                    error!(settlement = id, lobby_id = %result.lobby_id, error = %e, "match history not saved");
                    report
                        .shared_warnings
                        .push(format!("match history could not be saved: {e}"));
                }
            }
            self.mark(id, Step::History);
        }

        self.resolve(id);
        Ok(report)
    }

    fn mark(&self, id: &str, step: Step) {
        if let Err(e) = self.journal.complete(id, step) {
            warn!(settlement = id, ?step, error = %e, "failed to journal step");
        }
    }

    fn resolve(&self, id: &str) {
        if let Err(e) = self.journal.resolve(id) {
            warn!(settlement = id, error = %e, "failed to resolve settlement intent");
        }
    }
}

/// Durable projection of a settled match.
pub fn record(result: &MatchResult, payout: f64) -> MatchRecord {
    let [p1, p2] = &result.players;
    let earnings = |slot: Slot| {
        if slot == result.winner {
            payout
        } else {
            -result.bet_amount
        }
    };
    MatchRecord {
        match_id: result.match_id.clone(),
        counter: 0,
        player1_name: p1.name.clone(),
        player2_name: p2.name.clone(),
        player1_score: p1.score,
        player2_score: p2.score,
        winner: result.winner().name.clone(),
        player1_earnings: earnings(Slot::Player1),
        player2_earnings: earnings(Slot::Player2),
        token_type: result.token_type,
        bet_amount: result.bet_amount,
        player1_wallet: p1.wallet.clone(),
        player2_wallet: p2.wallet.clone(),
        time_played: result.finished_at,
    }
}
