//! Fan-out of saved match records to `/ws/history` subscribers.

use axum::extract::ws::{Message, WebSocket};
use dicearena_execution::{
    Error, HistorySink, Ledger, PointsLedger, ReferralPayout, Transfer,
};
use dicearena_types::dice::{MatchKind, MatchRecord, TokenType};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Records buffered per subscriber before it starts missing some.
pub const HISTORY_BUFFER: usize = 256;

/// Wraps a backend and publishes every record it saves.
pub struct BroadcastHistory<B> {
    inner: B,
    records: broadcast::Sender<MatchRecord>,
}

impl<B> BroadcastHistory<B> {
    pub fn new(inner: B) -> Self {
        let (records, _) = broadcast::channel(HISTORY_BUFFER);
        Self { inner, records }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchRecord> {
        self.records.subscribe()
    }
}

impl<B: Ledger> Ledger for BroadcastHistory<B> {
    async fn has_sufficient_balance(
        &self,
        wallet: &str,
        token: TokenType,
        amount: f64,
    ) -> Result<bool, Error> {
        self.inner.has_sufficient_balance(wallet, token, amount).await
    }

    async fn balance(&self, wallet: &str, token: TokenType) -> Result<Option<f64>, Error> {
        self.inner.balance(wallet, token).await
    }

    async fn update_balances(&self, transfer: &Transfer) -> Result<(), Error> {
        self.inner.update_balances(transfer).await
    }
}

impl<B: ReferralPayout> ReferralPayout for BroadcastHistory<B> {
    async fn distribute_reward(
        &self,
        wallet: &str,
        reward_base: f64,
        token: TokenType,
    ) -> Result<(), Error> {
        self.inner.distribute_reward(wallet, reward_base, token).await
    }
}

impl<B: PointsLedger> PointsLedger for BroadcastHistory<B> {
    async fn add_points_for_bet(
        &self,
        wallet: &str,
        token: TokenType,
        bet_amount: f64,
        is_win: bool,
        kind: MatchKind,
    ) -> Result<f64, Error> {
        self.inner
            .add_points_for_bet(wallet, token, bet_amount, is_win, kind)
            .await
    }
}

impl<B: HistorySink> HistorySink for BroadcastHistory<B> {
    async fn save(&self, record: &MatchRecord) -> Result<u64, Error> {
        let counter = self.inner.save(record).await?;
        let mut published = record.clone();
        published.counter = counter;
        // No subscribers is not an error.
        let _ = self.records.send(published);
        Ok(counter)
    }
}

/// Stream records to one subscriber until it goes away.
pub async fn stream(socket: WebSocket, mut records: broadcast::Receiver<MatchRecord>) {
    info!("history subscriber connected");
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "history socket error");
                        break;
                    }
                    _ => {}
                }
            }
            record = records.recv() => {
                match record {
                    Ok(record) => {
                        let text = match serde_json::to_string(&record) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(match_id = %record.match_id, error = %e, "failed to encode match record");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text)).await.is_err() {
                            debug!("history subscriber went away");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "history subscriber lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    let _ = sender.close().await;
    info!("history subscriber disconnected");
}
