//! In-process implementation of every collaborator, over one book of accounts.

use crate::{
    collaborators::{HistorySink, Ledger, PointsLedger, ReferralPayout, Transfer},
    points::points_for_bet,
    Error,
};
use dicearena_types::dice::{
    MatchKind, MatchRecord, TokenType, BASIS_POINTS, DEFAULT_REFERRAL_LEVEL_BPS,
    HISTORY_COUNTER_SEED,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, warn};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub wallet: String,
    #[serde(default)]
    pub name: String,
    /// Code other users cite when they sign up through this account.
    #[serde(default)]
    pub referral_code: Option<String>,
    /// Referral code of the account that recruited this one.
    #[serde(default)]
    pub referred_by: Option<String>,
    #[serde(default)]
    pub ton_balance: f64,
    #[serde(default)]
    pub m5_balance: f64,
    #[serde(default)]
    pub dfc_balance: f64,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub referral_earnings: f64,
}

impl Account {
    pub fn new(wallet: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            wallet: wallet.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_balance(mut self, token: TokenType, amount: f64) -> Self {
        *self.balance_mut(token) = amount;
        self
    }

    pub fn with_referral_code(mut self, code: impl Into<String>) -> Self {
        self.referral_code = Some(code.into());
        self
    }

    pub fn referred_by(mut self, code: impl Into<String>) -> Self {
        self.referred_by = Some(code.into());
        self
    }

    pub fn balance(&self, token: TokenType) -> f64 {
        match token {
            TokenType::Ton => self.ton_balance,
            TokenType::M5 => self.m5_balance,
            TokenType::Dfc => self.dfc_balance,
        }
    }

    fn balance_mut(&mut self, token: TokenType) -> &mut f64 {
        match token {
            TokenType::Ton => &mut self.ton_balance,
            TokenType::M5 => &mut self.m5_balance,
            TokenType::Dfc => &mut self.dfc_balance,
        }
    }
}

struct Book {
    accounts: HashMap<String, Account>,
    applied: HashSet<String>,
    counter: u64,
    saved: HashMap<String, u64>,
    records: Vec<MatchRecord>,
}

pub struct Memory {
    book: Mutex<Book>,
    referral_levels: Vec<u64>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Memory {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            book: Mutex::new(Book {
                accounts: accounts
                    .into_iter()
                    .map(|account| (account.wallet.clone(), account))
                    .collect(),
                applied: HashSet::new(),
                counter: HISTORY_COUNTER_SEED,
                saved: HashMap::new(),
                records: Vec::new(),
            }),
            referral_levels: DEFAULT_REFERRAL_LEVEL_BPS.to_vec(),
        }
    }

    /// Share of the reward base paid to each upstream level, in basis points.
    pub fn with_referral_levels(mut self, levels: Vec<u64>) -> Self {
        self.referral_levels = levels;
        self
    }

    /// Value of the counter before the first record is saved.
    pub fn with_counter_seed(self, seed: u64) -> Self {
        self.book().counter = seed;
        self
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        match self.book.lock() {
            Ok(book) => book,
            Err(poisoned) => {
                warn!("account book lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn upsert(&self, account: Account) {
        self.book().accounts.insert(account.wallet.clone(), account);
    }

    pub fn account(&self, wallet: &str) -> Option<Account> {
        self.book().accounts.get(wallet).cloned()
    }

    /// Saved match records, oldest first.
    pub fn records(&self) -> Vec<MatchRecord> {
        self.book().records.clone()
    }
}

impl Ledger for Memory {
    async fn has_sufficient_balance(
        &self,
        wallet: &str,
        token: TokenType,
        amount: f64,
    ) -> Result<bool, Error> {
        Ok(self
            .book()
            .accounts
            .get(wallet)
            .is_some_and(|account| account.balance(token) >= amount))
    }

    async fn balance(&self, wallet: &str, token: TokenType) -> Result<Option<f64>, Error> {
        Ok(self
            .book()
            .accounts
            .get(wallet)
            .map(|account| account.balance(token)))
    }

    async fn update_balances(&self, transfer: &Transfer) -> Result<(), Error> {
        let mut book = self.book();
        if book.applied.contains(&transfer.settlement_id) {
            debug!(settlement = %transfer.settlement_id, "transfer already applied");
            return Ok(());
        }
        for wallet in [&transfer.winner_wallet, &transfer.loser_wallet] {
            if !book.accounts.contains_key(wallet) {
                return Err(Error::Storage(format!("unknown wallet {wallet}")));
            }
        }

        let loser = book
            .accounts
            .get_mut(&transfer.loser_wallet)
            .ok_or_else(|| Error::Storage(format!("unknown wallet {}", transfer.loser_wallet)))?;
        if loser.balance(transfer.token) < transfer.debit {
            return Err(Error::InsufficientFunds);
        }
        *loser.balance_mut(transfer.token) -= transfer.debit;

        let winner = book
            .accounts
            .get_mut(&transfer.winner_wallet)
            .ok_or_else(|| Error::Storage(format!("unknown wallet {}", transfer.winner_wallet)))?;
        *winner.balance_mut(transfer.token) += transfer.credit;

        book.applied.insert(transfer.settlement_id.clone());
        Ok(())
    }
}

impl ReferralPayout for Memory {
    async fn distribute_reward(
        &self,
        wallet: &str,
        reward_base: f64,
        token: TokenType,
    ) -> Result<(), Error> {
        if reward_base.is_nan() || reward_base <= 0.0 {
            return Err(Error::Validation(
                "reward amount must be greater than zero".to_string(),
            ));
        }
        let mut book = self.book();
        let mut current = wallet.to_string();
        for (level, bps) in self.referral_levels.iter().enumerate() {
            let Some(code) = book
                .accounts
                .get(&current)
                .and_then(|account| account.referred_by.clone())
            else {
                break;
            };
            let referrer = book
                .accounts
                .values_mut()
                .find(|account| account.referral_code.as_deref() == Some(code.as_str()))
                .ok_or_else(|| Error::Storage(format!("unknown referral code {code}")))?;
            let reward = reward_base * *bps as f64 / BASIS_POINTS as f64;
            *referrer.balance_mut(token) += reward;
            referrer.referral_earnings += reward;
            debug!(level = level + 1, referrer = %referrer.wallet, reward, "referral reward");
            current = referrer.wallet.clone();
        }
        Ok(())
    }
}

impl PointsLedger for Memory {
    async fn add_points_for_bet(
        &self,
        wallet: &str,
        token: TokenType,
        bet_amount: f64,
        is_win: bool,
        kind: MatchKind,
    ) -> Result<f64, Error> {
        let points = points_for_bet(token, bet_amount, is_win, kind);
        let mut book = self.book();
        let account = book
            .accounts
            .get_mut(wallet)
            .ok_or_else(|| Error::Storage(format!("unknown wallet {wallet}")))?;
        account.points += points;
        Ok(points)
    }
}

impl HistorySink for Memory {
    async fn save(&self, record: &MatchRecord) -> Result<u64, Error> {
        let mut book = self.book();
        if let Some(counter) = book.saved.get(&record.match_id) {
            return Ok(*counter);
        }
        book.counter += 1;
        let counter = book.counter;
        let mut record = record.clone();
        record.counter = counter;
        book.saved.insert(record.match_id.clone(), counter);
        book.records.push(record);
        Ok(counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(id: &str, debit: f64) -> Transfer {
        Transfer {
            settlement_id: id.to_string(),
            winner_wallet: "EQa".to_string(),
            loser_wallet: "EQb".to_string(),
            token: TokenType::Ton,
            credit: debit * 1.8,
            debit,
        }
    }

    fn memory() -> Memory {
        Memory::new([
            Account::new("EQa", "Ann").with_balance(TokenType::Ton, 5.0),
            Account::new("EQb", "Bob").with_balance(TokenType::Ton, 1.5),
        ])
    }

    #[tokio::test]
    async fn test_balance_checks() {
        let memory = memory();
        assert!(memory.has_sufficient_balance("EQa", TokenType::Ton, 5.0).await.unwrap());
        assert!(!memory.has_sufficient_balance("EQa", TokenType::M5, 0.1).await.unwrap());
        assert!(!memory.has_sufficient_balance("EQz", TokenType::Ton, 0.1).await.unwrap());
        assert_eq!(memory.balance("EQb", TokenType::Ton).await.unwrap(), Some(1.5));
        assert_eq!(memory.balance("EQz", TokenType::Ton).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_balances_is_conditional_and_idempotent() {
        let memory = memory();
        memory.update_balances(&transfer("m1", 1.0)).await.unwrap();
        memory.update_balances(&transfer("m1", 1.0)).await.unwrap();
        assert!((memory.account("EQa").unwrap().ton_balance - 6.8).abs() < 1e-9);
        assert!((memory.account("EQb").unwrap().ton_balance - 0.5).abs() < 1e-9);

        assert_eq!(
            memory.update_balances(&transfer("m2", 1.0)).await,
            Err(Error::InsufficientFunds)
        );
        assert!((memory.account("EQa").unwrap().ton_balance - 6.8).abs() < 1e-9);

        let mut unknown = transfer("m3", 0.1);
        unknown.winner_wallet = "EQz".to_string();
        assert!(matches!(
            memory.update_balances(&unknown).await,
            Err(Error::Storage(_))
        ));
        assert!((memory.account("EQb").unwrap().ton_balance - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_referral_chain() {
        let memory = Memory::new([
            Account::new("EQw", "Winner").referred_by("L1"),
            Account::new("EQ1", "One").with_referral_code("L1").referred_by("L2"),
            Account::new("EQ2", "Two").with_referral_code("L2").referred_by("L3"),
            Account::new("EQ3", "Three").with_referral_code("L3").referred_by("L4"),
            Account::new("EQ4", "Four").with_referral_code("L4"),
        ]);
        memory.distribute_reward("EQw", 2.0, TokenType::M5).await.unwrap();
        assert!((memory.account("EQ1").unwrap().m5_balance - 0.1).abs() < 1e-9);
        assert!((memory.account("EQ2").unwrap().m5_balance - 0.04).abs() < 1e-9);
        assert!((memory.account("EQ3").unwrap().m5_balance - 0.02).abs() < 1e-9);
        assert_eq!(memory.account("EQ4").unwrap().m5_balance, 0.0);
        assert!((memory.account("EQ1").unwrap().referral_earnings - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_referral_errors() {
        let memory = Memory::new([Account::new("EQw", "Winner").referred_by("GONE")]);
        assert!(matches!(
            memory.distribute_reward("EQw", 1.0, TokenType::Ton).await,
            Err(Error::Storage(_))
        ));
        assert!(matches!(
            memory.distribute_reward("EQw", 0.0, TokenType::Ton).await,
            Err(Error::Validation(_))
        ));
        memory.distribute_reward("EQnobody", 1.0, TokenType::Ton).await.unwrap();
    }

    #[tokio::test]
    async fn test_points() {
        let memory = memory();
        let points = memory
            .add_points_for_bet("EQa", TokenType::Ton, 1.0, true, MatchKind::Pvp)
            .await
            .unwrap();
        assert!((points - 0.9).abs() < 1e-9);
        assert!((memory.account("EQa").unwrap().points - 0.9).abs() < 1e-9);
        assert!(memory
            .add_points_for_bet("EQz", TokenType::Ton, 1.0, true, MatchKind::Pvp)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_history_counter() {
        let memory = memory();
        let record = MatchRecord {
            match_id: "m1".to_string(),
            counter: 0,
            player1_name: "Ann".to_string(),
            player2_name: "Bob".to_string(),
            player1_score: 25,
            player2_score: 12,
            winner: "Ann".to_string(),
            player1_earnings: 1.8,
            player2_earnings: -1.0,
            token_type: TokenType::Ton,
            bet_amount: 1.0,
            player1_wallet: "EQa".to_string(),
            player2_wallet: "EQb".to_string(),
            time_played: 0,
        };
        assert_eq!(memory.save(&record).await.unwrap(), HISTORY_COUNTER_SEED + 1);
        assert_eq!(memory.save(&record).await.unwrap(), HISTORY_COUNTER_SEED + 1);
        let second = MatchRecord {
            match_id: "m2".to_string(),
            ..record
        };
        assert_eq!(memory.save(&second).await.unwrap(), HISTORY_COUNTER_SEED + 2);
        let records = memory.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].counter, 14_000);

        let seeded = Memory::default().with_counter_seed(99);
        assert_eq!(seeded.save(&second).await.unwrap(), 100);
    }
}
