use crate::{
    collaborators::{bounded, Backend},
    dice::DiceRoller,
    journal::IntentJournal,
    lobby::{Next, Rules},
    settlement::{MatchResult, Settlement, SettlementPolicy},
    store::{JoinOutcome, LobbyStore, Started},
    Error, Player,
};
use dicearena_types::{
    api::Frame,
    dice::{ConnectionId, LobbySummary, Slot, TokenType},
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Bound applied to every external collaborator call.
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    pub rules: Rules,
    pub policy: SettlementPolicy,
    pub collaborator_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules: Rules::default(),
            policy: SettlementPolicy::default(),
            collaborator_timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }
}

/// Frames produced by one operation, addressed to connections.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Effects {
    pub messages: Vec<(ConnectionId, Frame)>,
    /// The open-lobby listing changed and should be broadcast.
    pub lobbies_changed: bool,
}

impl Effects {
    fn send(&mut self, conn: ConnectionId, frame: Frame) {
        self.messages.push((conn, frame));
    }

    fn send_all(&mut self, conns: &[ConnectionId], frame: &Frame) {
        for conn in conns {
            self.messages.push((*conn, frame.clone()));
        }
    }

    fn start(&mut self, started: Started) {
        let Started { conns, frames } = started;
        for (conn, frame) in conns.into_iter().zip(frames) {
            self.send(conn, Frame::GameStart(frame));
        }
    }

    /// Frames addressed to `conn`, in order.
    pub fn frames_for(&self, conn: ConnectionId) -> Vec<&Frame> {
        self.messages
            .iter()
            .filter(|(to, _)| *to == conn)
            .map(|(_, frame)| frame)
            .collect()
    }
}

/// The match engine: lobby store, turn rules, and settlement behind one facade.
pub struct Engine<B> {
    store: LobbyStore,
    backend: Arc<B>,
    settlement: Settlement<B>,
    config: EngineConfig,
}

impl<B: Backend> Engine<B> {
    pub fn new(backend: Arc<B>, journal: Arc<dyn IntentJournal>, config: EngineConfig) -> Self {
        let settlement = Settlement::new(
            backend.clone(),
            journal,
            config.policy,
            config.collaborator_timeout,
        );
        Self {
            store: LobbyStore::default(),
            backend,
            settlement,
            config,
        }
    }

    /// Replace the dice. Must be called before any lobby exists.
    pub fn with_dice(mut self, dice: Box<dyn DiceRoller>) -> Self {
        self.store = LobbyStore::new(dice);
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &LobbyStore {
        &self.store
    }

    /// Finish settlements interrupted by a previous shutdown.
    pub async fn recover(&self) -> Result<usize, Error> {
        self.settlement.recover().await
    }

    pub fn open_lobbies(&self) -> Vec<LobbySummary> {
        self.store.open_lobbies()
    }

    pub fn lobby_list(&self) -> Frame {
        Frame::LobbyList {
            lobbies: self.open_lobbies(),
        }
    }

    async fn check_balance(
        &self,
        player: &Player,
        token: TokenType,
        amount: f64,
    ) -> Result<(), Error> {
        let timeout = self.config.collaborator_timeout;
        let sufficient = bounded(
            timeout,
            "has_sufficient_balance",
            self.backend
                .has_sufficient_balance(player.wallet(), token, amount),
        )
        .await?;
        if !sufficient {
            return Err(Error::InsufficientFunds);
        }
        match bounded(timeout, "balance", self.backend.balance(player.wallet(), token)).await {
            Ok(Some(balance)) => player.cache_balance(token, balance),
            Ok(None) => {}
            Err(e) => debug!(wallet = player.wallet(), error = %e, "balance not cached"),
        }
        Ok(())
    }

    pub async fn create_lobby(
        &self,
        conn: ConnectionId,
        wallet: &str,
        first_name: &str,
        target_score: u32,
        token_type: &str,
        bet_amount: f64,
    ) -> Result<(Arc<Player>, Effects), Error> {
        let token: TokenType = token_type
            .parse()
            .map_err(|_| Error::InvalidToken(token_type.to_string()))?;
        validate(wallet, target_score, bet_amount)?;

        if let Some(seated) = self.store.seated_in(conn) {
            return Err(Error::AlreadySeated(seated));
        }
        let player = Arc::new(Player::new(wallet, first_name));
        self.check_balance(&player, token, bet_amount).await?;
        let summary = self
            .store
            .create(player.clone(), conn, target_score, token, bet_amount)?;
        info!(lobby_id = %summary.lobby_id, %conn, player = player.id(), wallet, %token, amount = bet_amount, target_score, "lobby created");

        let mut effects = Effects {
            lobbies_changed: true,
            ..Default::default()
        };
        effects.send(
            conn,
            Frame::LobbyCreated {
                lobby_id: summary.lobby_id,
                token_type: token,
                bet_amount,
                target_score,
            },
        );
        Ok((player, effects))
    }

    pub async fn join_lobby(
        &self,
        conn: ConnectionId,
        lobby_id: &str,
        wallet: &str,
        first_name: &str,
    ) -> Result<(Arc<Player>, Effects), Error> {
        if wallet.trim().is_empty() {
            return Err(Error::Validation("wallet is required".to_string()));
        }
        let (token, bet_amount) = self.store.reserve(lobby_id, conn, wallet)?;
        let player = Arc::new(Player::new(wallet, first_name));
        if let Err(e) = self.check_balance(&player, token, bet_amount).await {
            self.store.release(lobby_id, conn);
            return Err(e);
        }
        let outcome = match self.store.commit_join(
            lobby_id,
            player.clone(),
            conn,
            self.config.rules.start_mode,
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.store.release(lobby_id, conn);
                return Err(e);
            }
        };
        info!(lobby_id, %conn, player = player.id(), wallet, "joined lobby");

        let mut effects = Effects {
            lobbies_changed: true,
            ..Default::default()
        };
        let joined = Frame::JoinedLobby {
            lobby_id: lobby_id.to_string(),
        };
        match outcome {
            JoinOutcome::Started(started) => {
                effects.send(conn, joined);
                effects.start(started);
            }
            JoinOutcome::Seated { creator } => {
                effects.send_all(&[conn, creator], &joined);
            }
        }
        Ok((player, effects))
    }

    pub async fn roll_dice(&self, conn: ConnectionId, lobby_id: &str) -> Result<Effects, Error> {
        let outcome = self
            .store
            .roll(lobby_id, conn, self.config.rules.tie_break)?;
        let effect = &outcome.effect;
        debug!(lobby_id, %conn, slot = %effect.slot, die1 = effect.roll.die1, die2 = effect.roll.die2, round = effect.result.round, "dice rolled");

        let mut effects = Effects::default();
        effects.send_all(
            &outcome.conns,
            &Frame::PartialRoundResult(effect.result.clone()),
        );
        match (&effect.next, outcome.finished) {
            (
                Next::Turn {
                    current_turn,
                    current_round,
                },
                _,
            ) => {
                effects.send_all(
                    &outcome.conns,
                    &Frame::TurnChange {
                        current_turn: *current_turn,
                        current_round: *current_round,
                    },
                );
            }
            (Next::Finished { winner }, Some(result)) => {
                info!(lobby_id, winner = %winner, p1 = result.players[0].score, p2 = result.players[1].score, "match finished");
                let frame = Frame::GameOver {
                    winner: *winner,
                    winner_name: result.winner().name.clone(),
                };
                self.conclude(result, &outcome.conns, frame, &mut effects)
                    .await;
            }
            (Next::Finished { .. }, None) => {
                error!(lobby_id, "finished match produced no result");
                effects.lobbies_changed = true;
            }
        }
        Ok(effects)
    }

    pub async fn terminate(
        &self,
        conn: ConnectionId,
        lobby_id: &str,
        winner: Slot,
    ) -> Result<Effects, Error> {
        let terminated =
            self.store
                .terminate(lobby_id, conn, winner, self.config.rules.termination)?;
        info!(lobby_id, %conn, %winner, "match terminated early");
        let frame = Frame::GameTerminated {
            lobby_id: lobby_id.to_string(),
            winner,
        };
        let mut effects = Effects::default();
        self.conclude(terminated.result, &terminated.conns, frame, &mut effects)
            .await;
        Ok(effects)
    }

    /// Settle a finished match and report the outcome to both players.
    async fn conclude(
        &self,
        result: MatchResult,
        conns: &[ConnectionId],
        outcome: Frame,
        effects: &mut Effects,
    ) {
        effects.lobbies_changed = true;
        let lobby_id = result.lobby_id.clone();
        let winner_conn = conns.get(result.winner.index()).copied();
        match self.settlement.settle(result).await {
            Ok(report) => {
                effects.send_all(conns, &outcome);
                if let Some(winner_conn) = winner_conn {
                    for warning in report.winner_warnings {
                        effects.send(winner_conn, Frame::warning(warning));
                    }
                }
                for warning in report.shared_warnings {
                    effects.send_all(conns, &Frame::warning(warning));
                }
            }
            Err(e) => {
                warn!(lobby_id, error = %e, "settlement failed");
                effects.send_all(conns, &Frame::error(format!("failed to update balances: {e}")));
            }
        }
    }

    pub fn delete_lobby(&self, conn: ConnectionId, lobby_id: &str) -> Result<Effects, Error> {
        let conns = self.store.delete(lobby_id, conn)?;
        info!(lobby_id, %conn, "lobby deleted");
        let mut effects = Effects {
            lobbies_changed: true,
            ..Default::default()
        };
        effects.send_all(
            &conns,
            &Frame::LobbyDeleted {
                lobby_id: lobby_id.to_string(),
            },
        );
        Ok(effects)
    }

    pub fn confirm_ready(&self, conn: ConnectionId, lobby_id: &str) -> Result<Effects, Error> {
        let started = self.store.confirm_ready(lobby_id, conn)?;
        let mut effects = Effects::default();
        effects.send(
            conn,
            Frame::ReadyConfirmation {
                message: "You have confirmed your readiness".to_string(),
            },
        );
        if let Some(started) = started {
            info!(lobby_id, "both players ready, match started");
            effects.start(started);
        }
        Ok(effects)
    }

    /// Release whatever a closed connection held.
    pub fn disconnect(&self, conn: ConnectionId) -> Effects {
        let outcome = self.store.disconnect(conn);
        let mut effects = Effects {
            lobbies_changed: outcome.lobbies_changed,
            ..Default::default()
        };
        for (lobby_id, others) in outcome.deleted {
            info!(%lobby_id, %conn, "creator left, lobby removed");
            effects.send_all(&others, &Frame::LobbyDeleted { lobby_id });
        }
        for lobby_id in outcome.abandoned {
            info!(%lobby_id, %conn, "player left a match in progress");
        }
        for lobby_id in outcome.dropped {
            warn!(%lobby_id, %conn, "both players left, match dropped without settlement");
        }
        effects
    }
}

fn validate(wallet: &str, target_score: u32, bet_amount: f64) -> Result<(), Error> {
    if wallet.trim().is_empty() {
        return Err(Error::Validation("wallet is required".to_string()));
    }
    if target_score == 0 {
        return Err(Error::Validation("target_score must be positive".to_string()));
    }
    if !bet_amount.is_finite() || bet_amount <= 0.0 {
        return Err(Error::Validation("bet_amount must be positive".to_string()));
    }
    Ok(())
}
