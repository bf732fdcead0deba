//! Deterministic dice and failure-injecting collaborators for tests.

use crate::{
    collaborators::{HistorySink, Ledger, PointsLedger, ReferralPayout, Transfer},
    dice::{DiceRoller, Roll},
    Error,
};
use dicearena_types::dice::{MatchKind, MatchRecord, TokenType};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

/// Dice that replay a fixed sequence of throws, then keep throwing `(1, 2)`.
pub struct ScriptedDice {
    rolls: Arc<Mutex<VecDeque<Roll>>>,
}

impl ScriptedDice {
    pub fn new(rolls: impl IntoIterator<Item = (u8, u8)>) -> Self {
        Self {
            rolls: Arc::new(Mutex::new(
                rolls
                    .into_iter()
                    .map(|(die1, die2)| Roll::new(die1, die2))
                    .collect(),
            )),
        }
    }

    /// A second handle on the same script, to append throws after the dice were handed off.
    pub fn handle(&self) -> Self {
        Self {
            rolls: self.rolls.clone(),
        }
    }

    pub fn push(&self, die1: u8, die2: u8) {
        self.queue().push_back(Roll::new(die1, die2));
    }

    pub fn remaining(&self) -> usize {
        self.queue().len()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Roll>> {
        match self.rolls.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DiceRoller for ScriptedDice {
    fn roll(&mut self) -> Roll {
        self.queue().pop_front().unwrap_or(Roll::new(1, 2))
    }
}

/// Collaborator call that can be made to fail or stall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Fault {
    Balance,
    Ledger,
    Referral,
    Points,
    History,
}

#[derive(Default)]
struct Faults {
    failing: HashSet<Fault>,
    panicking: HashSet<Fault>,
    delays: HashMap<Fault, Duration>,
}

/// Wraps a backend and injects failures or delays per call kind.
pub struct Faulty<T> {
    inner: T,
    faults: Mutex<Faults>,
}

impl<T> Faulty<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn fail(self, fault: Fault) -> Self {
        self.faults().failing.insert(fault);
        self
    }

    pub fn delay(self, fault: Fault, by: Duration) -> Self {
        self.faults().delays.insert(fault, by);
        self
    }

    /// Start failing `fault` on a backend already handed to an engine.
    pub fn inject(&self, fault: Fault) {
        self.faults().failing.insert(fault);
    }

    /// Panic inside `fault` calls, as a broken collaborator client might.
    pub fn panic_on(&self, fault: Fault) {
        self.faults().panicking.insert(fault);
    }

    /// Stop injecting failures and panics.
    pub fn heal(&self) {
        let mut faults = self.faults();
        faults.failing.clear();
        faults.panicking.clear();
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        match self.faults.lock() {
            Ok(faults) => faults,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn check(&self, fault: Fault) -> Result<(), Error> {
        let (failing, panicking, delay) = {
            let faults = self.faults();
            (
                faults.failing.contains(&fault),
                faults.panicking.contains(&fault),
                faults.delays.get(&fault).copied(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panicking {
            panic!("injected {fault:?} panic");
        }
        if failing {
            return Err(Error::Storage(format!("injected {fault:?} failure")));
        }
        Ok(())
    }
}

impl<T: Ledger> Ledger for Faulty<T> {
    async fn has_sufficient_balance(
        &self,
        wallet: &str,
        token: TokenType,
        amount: f64,
    ) -> Result<bool, Error> {
        self.check(Fault::Balance).await?;
        self.inner.has_sufficient_balance(wallet, token, amount).await
    }

    async fn balance(&self, wallet: &str, token: TokenType) -> Result<Option<f64>, Error> {
        self.check(Fault::Balance).await?;
        self.inner.balance(wallet, token).await
    }

    async fn update_balances(&self, transfer: &Transfer) -> Result<(), Error> {
        self.check(Fault::Ledger).await?;
        self.inner.update_balances(transfer).await
    }
}

impl<T: ReferralPayout> ReferralPayout for Faulty<T> {
    async fn distribute_reward(
        &self,
        wallet: &str,
        reward_base: f64,
        token: TokenType,
    ) -> Result<(), Error> {
        self.check(Fault::Referral).await?;
        self.inner.distribute_reward(wallet, reward_base, token).await
    }
}

impl<T: PointsLedger> PointsLedger for Faulty<T> {
    async fn add_points_for_bet(
        &self,
        wallet: &str,
        token: TokenType,
        bet_amount: f64,
        is_win: bool,
        kind: MatchKind,
    ) -> Result<f64, Error> {
        self.check(Fault::Points).await?;
        self.inner
            .add_points_for_bet(wallet, token, bet_amount, is_win, kind)
            .await
    }
}

impl<T: HistorySink> HistorySink for Faulty<T> {
    async fn save(&self, record: &MatchRecord) -> Result<u64, Error> {
        self.check(Fault::History).await?;
        self.inner.save(record).await
    }
}
