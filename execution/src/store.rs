use crate::{
    dice::{DiceRoller, RandomDice},
    lobby::{Lobby, Next, RollEffect, Seat, StartMode, TerminationPolicy, TieBreak},
    settlement::{Finish, MatchResult},
    Error, Player,
};
use dicearena_types::{
    api::GameStart,
    dice::{ConnectionId, LobbyStatus, LobbySummary, Slot, TokenType, LOBBY_ID_DIGITS, LOBBY_ID_SPACE},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, warn};

/// Attempts at drawing an unused lobby identifier before giving up.
const LOBBY_ID_ATTEMPTS: usize = 64;

/// Both players' connections and personalised start frames, indexed by slot.
#[derive(Clone, Debug)]
pub struct Started {
    pub conns: [ConnectionId; 2],
    pub frames: [GameStart; 2],
}

#[derive(Clone, Debug)]
pub enum JoinOutcome {
    Started(Started),
    /// Seated without starting; both players still have to confirm readiness.
    Seated { creator: ConnectionId },
}

#[derive(Clone, Debug)]
pub struct RollOutcome {
    pub conns: Vec<ConnectionId>,
    pub effect: RollEffect,
    /// Present when the roll finished the match; the lobby is gone from the store.
    pub finished: Option<MatchResult>,
}

#[derive(Clone, Debug)]
pub struct Terminated {
    pub conns: Vec<ConnectionId>,
    pub result: MatchResult,
}

#[derive(Clone, Debug, Default)]
pub struct Disconnected {
    /// Whether the open-lobby listing changed.
    pub lobbies_changed: bool,
    /// Lobbies removed because their creator left, with the connections still seated in them.
    pub deleted: Vec<(String, Vec<ConnectionId>)>,
    /// In-progress lobbies in which the connection held a seat.
    pub abandoned: Vec<String>,
    /// In-progress lobbies removed unsettled because no player is connected any more.
    pub dropped: Vec<String>,
}

struct Inner {
    lobbies: HashMap<String, Lobby>,
    dice: Box<dyn DiceRoller>,
    ids: ChaCha20Rng,
    id_space: u32,
}

impl Inner {
    fn seated_in(&self, conn: ConnectionId) -> Option<String> {
        self.lobbies
            .values()
            .find(|lobby| lobby.slot_of(conn).is_some() || lobby.reservation() == Some(conn))
            .map(|lobby| lobby.id().to_string())
    }

    fn fresh_id(&mut self) -> Result<String, Error> {
        for _ in 0..LOBBY_ID_ATTEMPTS {
            let n = self.ids.gen_range(0..self.id_space);
            let id = format!("{n:0width$}", width = LOBBY_ID_DIGITS);
            if !self.lobbies.contains_key(&id) {
                return Ok(id);
            }
            debug!(lobby_id = %id, "lobby id collision");
        }
        Err(Error::LobbyIdsExhausted)
    }
}

/// Authoritative map of live lobbies.
///
/// Every read and write goes through one mutex. Methods never await, so the lock is never
/// held across I/O; callers receive owned copies of whatever they need afterwards.
pub struct LobbyStore {
    inner: Mutex<Inner>,
}

impl Default for LobbyStore {
    fn default() -> Self {
        Self::new(Box::new(RandomDice::from_entropy()))
    }
}

impl LobbyStore {
    pub fn new(dice: Box<dyn DiceRoller>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lobbies: HashMap::new(),
                dice,
                ids: ChaCha20Rng::from_entropy(),
                id_space: LOBBY_ID_SPACE,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_id_space(dice: Box<dyn DiceRoller>, seed: u64, id_space: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                lobbies: HashMap::new(),
                dice,
                ids: ChaCha20Rng::seed_from_u64(seed),
                id_space,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => {
                warn!("lobby store lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Insert a waiting lobby with `player` in the creator slot.
    pub fn create(
        &self,
        player: Arc<Player>,
        conn: ConnectionId,
        target_score: u32,
        token_type: TokenType,
        bet_amount: f64,
    ) -> Result<LobbySummary, Error> {
        let mut inner = self.lock();
        if let Some(lobby_id) = inner.seated_in(conn) {
            return Err(Error::AlreadySeated(lobby_id));
        }
        let id = inner.fresh_id()?;
        let lobby = Lobby::new(
            id.clone(),
            Seat::new(player, conn),
            target_score,
            token_type,
            bet_amount,
        );
        let summary = lobby.summary();
        inner.lobbies.insert(id, lobby);
        Ok(summary)
    }

    /// Claim the joiner slot of an open lobby for `conn`.
    ///
    /// The lobby leaves the open listing until [LobbyStore::commit_join] or
    /// [LobbyStore::release], so a competing join fails with `LobbyNotFound`.
    pub fn reserve(
        &self,
        lobby_id: &str,
        conn: ConnectionId,
        wallet: &str,
    ) -> Result<(TokenType, f64), Error> {
        let mut inner = self.lock();
        if let Some(seated) = inner.seated_in(conn) {
            return Err(Error::AlreadySeated(seated));
        }
        let lobby = inner
            .lobbies
            .get_mut(lobby_id)
            .ok_or(Error::LobbyNotFound)?;
        // The creator's wallet never takes the opposing seat.
        let own = lobby
            .seat(Slot::Player1)
            .is_some_and(|creator| creator.player.wallet() == wallet);
        if own && lobby.is_open() {
            return Err(Error::Validation("cannot join your own lobby".to_string()));
        }
        lobby.reserve(conn)?;
        Ok((lobby.token_type(), lobby.bet_amount()))
    }

    pub fn commit_join(
        &self,
        lobby_id: &str,
        player: Arc<Player>,
        conn: ConnectionId,
        mode: StartMode,
    ) -> Result<JoinOutcome, Error> {
        let mut inner = self.lock();
        let lobby = inner
            .lobbies
            .get_mut(lobby_id)
            .ok_or(Error::LobbyNotFound)?;
        if lobby.seat_joiner(Seat::new(player, conn), mode)? {
            return started(lobby).map(JoinOutcome::Started);
        }
        let creator = lobby
            .seat(Slot::Player1)
            .map(|seat| seat.conn)
            .ok_or(Error::InvalidState("lobby has no creator"))?;
        Ok(JoinOutcome::Seated { creator })
    }

    /// Give up a reservation. Returns whether `conn` held one.
    pub fn release(&self, lobby_id: &str, conn: ConnectionId) -> bool {
        let mut inner = self.lock();
        inner
            .lobbies
            .get_mut(lobby_id)
            .is_some_and(|lobby| lobby.release(conn))
    }

    pub fn roll(
        &self,
        lobby_id: &str,
        conn: ConnectionId,
        tie_break: TieBreak,
    ) -> Result<RollOutcome, Error> {
        let mut inner = self.lock();
        let Inner { lobbies, dice, .. } = &mut *inner;
        let lobby = lobbies.get_mut(lobby_id).ok_or(Error::LobbyNotFound)?;
        if lobby.status() != LobbyStatus::InProgress {
            return Err(Error::LobbyNotFound);
        }
        let slot = lobby.slot_of(conn).ok_or(Error::NotAParticipant)?;
        let effect = lobby.roll(slot, dice.as_mut(), tie_break)?;
        let conns = lobby.connections();
        let finished = match effect.next {
            Next::Finished { winner } => {
                let result = lobby.result(winner, Finish::Natural);
                lobbies.remove(lobby_id);
                result
            }
            Next::Turn { .. } => None,
        };
        Ok(RollOutcome {
            conns,
            effect,
            finished,
        })
    }

    pub fn terminate(
        &self,
        lobby_id: &str,
        conn: ConnectionId,
        winner: Slot,
        policy: TerminationPolicy,
    ) -> Result<Terminated, Error> {
        let mut inner = self.lock();
        let lobby = inner
            .lobbies
            .get_mut(lobby_id)
            .ok_or(Error::LobbyNotFound)?;
        if lobby.status() != LobbyStatus::InProgress {
            return Err(Error::LobbyNotFound);
        }
        let caller = lobby.slot_of(conn).ok_or(Error::NotAParticipant)?;
        lobby.terminate(caller, winner, policy)?;
        let conns = lobby.connections();
        let result = lobby
            .result(winner, Finish::Terminated { by: caller })
            .ok_or(Error::InvalidState("match has an empty seat"))?;
        inner.lobbies.remove(lobby_id);
        Ok(Terminated { conns, result })
    }

    /// Remove a waiting lobby on behalf of its creator. Returns the connections seated in it.
    pub fn delete(&self, lobby_id: &str, conn: ConnectionId) -> Result<Vec<ConnectionId>, Error> {
        let mut inner = self.lock();
        let lobby = inner.lobbies.get(lobby_id).ok_or(Error::LobbyNotFound)?;
        if lobby.slot_of(conn) != Some(Slot::Player1) {
            return Err(Error::PermissionDenied("only the creator can delete a lobby"));
        }
        if lobby.status() != LobbyStatus::Waiting {
            return Err(Error::InvalidState("lobby has already started"));
        }
        let conns = lobby.connections();
        inner.lobbies.remove(lobby_id);
        Ok(conns)
    }

    /// Record readiness. Returns the start frames if this confirmation started the match.
    pub fn confirm_ready(
        &self,
        lobby_id: &str,
        conn: ConnectionId,
    ) -> Result<Option<Started>, Error> {
        let mut inner = self.lock();
        let lobby = inner
            .lobbies
            .get_mut(lobby_id)
            .ok_or(Error::LobbyNotFound)?;
        let slot = lobby.slot_of(conn).ok_or(Error::NotAParticipant)?;
        if lobby.confirm_ready(slot)? {
            return started(lobby).map(Some);
        }
        Ok(None)
    }

    /// Release everything held by a closed connection.
    pub fn disconnect(&self, conn: ConnectionId) -> Disconnected {
        let mut inner = self.lock();
        let mut outcome = Disconnected::default();

        let created: Vec<String> = inner
            .lobbies
            .values()
            .filter(|lobby| {
                lobby.status() == LobbyStatus::Waiting && lobby.slot_of(conn) == Some(Slot::Player1)
            })
            .map(|lobby| lobby.id().to_string())
            .collect();
        for lobby_id in created {
            if let Some(lobby) = inner.lobbies.remove(&lobby_id) {
                let others = lobby
                    .connections()
                    .into_iter()
                    .filter(|other| *other != conn)
                    .collect();
                outcome.deleted.push((lobby_id, others));
                outcome.lobbies_changed = true;
            }
        }

        for lobby in inner.lobbies.values_mut() {
            if lobby.release(conn) {
                outcome.lobbies_changed = true;
            }
            match lobby.status() {
                LobbyStatus::Waiting if lobby.slot_of(conn) == Some(Slot::Player2) => {
                    lobby.vacate_joiner();
                    outcome.lobbies_changed = true;
                }
                LobbyStatus::InProgress if lobby.mark_disconnected(conn) => {
                    outcome.abandoned.push(lobby.id().to_string());
                }
                _ => {}
            }
        }

        for lobby_id in &outcome.abandoned {
            let empty = inner
                .lobbies
                .get(lobby_id)
                .is_some_and(|lobby| !lobby.any_connected());
            if empty {
                inner.lobbies.remove(lobby_id);
                outcome.dropped.push(lobby_id.clone());
            }
        }
        outcome
    }

    /// Lobbies a new player could join, ordered by identifier.
    pub fn open_lobbies(&self) -> Vec<LobbySummary> {
        let inner = self.lock();
        let mut open: Vec<LobbySummary> = inner
            .lobbies
            .values()
            .filter(|lobby| lobby.is_open())
            .map(Lobby::summary)
            .collect();
        open.sort_by(|a, b| a.lobby_id.cmp(&b.lobby_id));
        open
    }

    /// Copy of a lobby's current state.
    pub fn get(&self, lobby_id: &str) -> Option<Lobby> {
        self.lock().lobbies.get(lobby_id).cloned()
    }

    /// Lobby in which `conn` holds a seat or reservation.
    pub fn seated_in(&self, conn: ConnectionId) -> Option<String> {
        self.lock().seated_in(conn)
    }

    pub fn len(&self) -> usize {
        self.lock().lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn started(lobby: &Lobby) -> Result<Started, Error> {
    let missing = Error::InvalidState("match has an empty seat");
    let p1 = lobby.seat(Slot::Player1).ok_or(missing.clone())?;
    let p2 = lobby.seat(Slot::Player2).ok_or(missing.clone())?;
    Ok(Started {
        conns: [p1.conn, p2.conn],
        frames: [
            lobby.game_start(Slot::Player1).ok_or(missing.clone())?,
            lobby.game_start(Slot::Player2).ok_or(missing)?,
        ],
    })
}
