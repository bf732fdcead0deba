//! Per-lobby state machine.
//!
//! A [Lobby] never touches the network or the ledger: every transition is a plain method
//! called by the store while its lock is held.

use crate::{
    dice::{DiceRoller, Roll},
    settlement::{Finish, MatchResult, Participant},
    Error, Player,
};
use dicearena_types::{
    api::{GameStart, RoundResult},
    dice::{ConnectionId, LobbyStatus, LobbySummary, Slot, TokenType},
};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use uuid::Uuid;

/// Resolution of equal scores when both players reach the target in the same round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The creator wins.
    #[default]
    Creator,
    /// The joiner wins.
    Joiner,
    /// Keep playing rounds until the scores differ.
    ExtraRound,
}

/// Who may end a match early and whom they may declare the winner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPolicy {
    /// Either participant may declare either slot the winner.
    #[default]
    ClaimedWinner,
    /// A participant may only concede, unless the opponent's connection is gone.
    ConcedeOnly,
}

/// How a lobby moves from `waiting` to `in_progress`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// The match starts as soon as a joiner is seated.
    #[default]
    Immediate,
    /// Both players must send `confirm_ready`.
    Handshake,
}

/// Match rules that are a matter of policy rather than protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rules {
    pub tie_break: TieBreak,
    pub termination: TerminationPolicy,
    pub start_mode: StartMode,
}

#[derive(Clone, Debug)]
pub struct Seat {
    pub player: Arc<Player>,
    pub conn: ConnectionId,
    pub score: u32,
    pub ready: bool,
    pub connected: bool,
}

impl Seat {
    pub fn new(player: Arc<Player>, conn: ConnectionId) -> Self {
        Self {
            player,
            conn,
            score: 0,
            ready: false,
            connected: true,
        }
    }

    fn participant(&self) -> Participant {
        Participant {
            id: self.player.id().to_string(),
            wallet: self.player.wallet().to_string(),
            name: self.player.name().to_string(),
            score: self.score,
        }
    }
}

/// What happens after a roll has been applied.
#[derive(Clone, Debug, PartialEq)]
pub enum Next {
    Turn { current_turn: Slot, current_round: u32 },
    Finished { winner: Slot },
}

/// Effect of one accepted roll.
#[derive(Clone, Debug)]
pub struct RollEffect {
    pub slot: Slot,
    pub roll: Roll,
    pub result: RoundResult,
    pub next: Next,
}

#[derive(Clone, Debug)]
pub struct Lobby {
    id: String,
    seats: [Option<Seat>; 2],
    target_score: u32,
    status: LobbyStatus,
    current_turn: Slot,
    current_round: u32,
    pending: [Option<u32>; 2],
    token_type: TokenType,
    bet_amount: f64,
    reservation: Option<ConnectionId>,
}

impl Lobby {
    pub fn new(
        id: String,
        creator: Seat,
        target_score: u32,
        token_type: TokenType,
        bet_amount: f64,
    ) -> Self {
        Self {
            id,
            seats: [Some(creator), None],
            target_score,
            status: LobbyStatus::Waiting,
            current_turn: Slot::Player1,
            current_round: 1,
            pending: [None, None],
            token_type,
            bet_amount,
            reservation: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> LobbyStatus {
        self.status
    }

    pub fn current_turn(&self) -> Slot {
        self.current_turn
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn target_score(&self) -> u32 {
        self.target_score
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn bet_amount(&self) -> f64 {
        self.bet_amount
    }

    pub fn seat(&self, slot: Slot) -> Option<&Seat> {
        self.seats[slot.index()].as_ref()
    }

    pub fn score(&self, slot: Slot) -> u32 {
        self.seat(slot).map(|seat| seat.score).unwrap_or(0)
    }

    pub fn pending(&self, slot: Slot) -> Option<u32> {
        self.pending[slot.index()]
    }

    pub fn reservation(&self) -> Option<ConnectionId> {
        self.reservation
    }

    pub fn slot_of(&self, conn: ConnectionId) -> Option<Slot> {
        [Slot::Player1, Slot::Player2]
            .into_iter()
            .find(|slot| self.seat(*slot).is_some_and(|seat| seat.conn == conn))
    }

    /// Connections of every seated player.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.seats.iter().flatten().map(|seat| seat.conn).collect()
    }

    /// Whether any seated player still has an open connection.
    pub fn any_connected(&self) -> bool {
        self.seats.iter().flatten().any(|seat| seat.connected)
    }

    /// Listed in `lobby_list`: waiting, joiner slot empty, and no join in flight.
    pub fn is_open(&self) -> bool {
        self.status == LobbyStatus::Waiting && self.seats[1].is_none() && self.reservation.is_none()
    }

    pub fn summary(&self) -> LobbySummary {
        LobbySummary {
            lobby_id: self.id.clone(),
            creator_name: self
                .seat(Slot::Player1)
                .map(|seat| seat.player.name().to_string())
                .unwrap_or_default(),
            target_score: self.target_score,
            token_type: self.token_type,
            bet_amount: self.bet_amount,
        }
    }

    pub fn reserve(&mut self, conn: ConnectionId) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::LobbyNotFound);
        }
        self.reservation = Some(conn);
        Ok(())
    }

    /// Drop a reservation held by `conn`. Returns whether one was held.
    pub fn release(&mut self, conn: ConnectionId) -> bool {
        if self.reservation == Some(conn) {
            self.reservation = None;
            return true;
        }
        false
    }

    /// Seat the joiner holding the reservation. Returns whether the match started.
    pub fn seat_joiner(&mut self, seat: Seat, mode: StartMode) -> Result<bool, Error> {
        if self.status != LobbyStatus::Waiting
            || self.seats[1].is_some()
            || self.reservation != Some(seat.conn)
        {
            return Err(Error::LobbyNotFound);
        }
        self.reservation = None;
        self.seats[1] = Some(seat);
        match mode {
            StartMode::Immediate => {
                self.start();
                Ok(true)
            }
            StartMode::Handshake => Ok(false),
        }
    }

    /// Empty the joiner slot of a lobby that has not started.
    pub fn vacate_joiner(&mut self) -> Option<Seat> {
        if self.status != LobbyStatus::Waiting {
            return None;
        }
        let seat = self.seats[1].take()?;
        for seat in self.seats.iter_mut().flatten() {
            seat.ready = false;
        }
        Some(seat)
    }

    /// Record readiness of `slot`. Returns whether the match started.
    pub fn confirm_ready(&mut self, slot: Slot) -> Result<bool, Error> {
        if self.status != LobbyStatus::Waiting {
            return Err(Error::InvalidState("lobby is not waiting for players"));
        }
        let seat = self.seats[slot.index()]
            .as_mut()
            .ok_or(Error::NotAParticipant)?;
        if seat.ready {
            return Err(Error::AlreadyReady);
        }
        seat.ready = true;
        if self.seats.iter().all(|seat| seat.as_ref().is_some_and(|s| s.ready)) {
            self.start();
            return Ok(true);
        }
        Ok(false)
    }

    fn start(&mut self) {
        self.status = LobbyStatus::InProgress;
        self.current_turn = Slot::Player1;
        self.current_round = 1;
        self.pending = [None, None];
    }

    /// Start notification addressed to the player in `receiver`.
    pub fn game_start(&self, receiver: Slot) -> Option<GameStart> {
        let p1 = self.seat(Slot::Player1)?;
        let p2 = self.seat(Slot::Player2)?;
        Some(GameStart {
            message: "Game starts! Player 1 rolls first.".to_string(),
            current_turn: self.current_turn,
            player_id: receiver,
            player_name: self.seat(receiver)?.player.name().to_string(),
            lobby_id: self.id.clone(),
            target_score: self.target_score,
            current_round: self.current_round,
            token_type: self.token_type,
            bet_amount: self.bet_amount,
            player1_id: p1.player.id().to_string(),
            player2_id: p2.player.id().to_string(),
            player1_name: p1.player.name().to_string(),
            player2_name: p2.player.name().to_string(),
        })
    }

    /// Apply a roll by the player in `slot`.
    ///
    /// Rejected rolls leave the lobby untouched and never consume dice.
    pub fn roll(
        &mut self,
        slot: Slot,
        dice: &mut dyn DiceRoller,
        tie_break: TieBreak,
    ) -> Result<RollEffect, Error> {
        if self.status != LobbyStatus::InProgress {
            return Err(Error::LobbyNotFound);
        }
        if self.current_turn != slot {
            return Err(Error::NotYourTurn);
        }
        let roll = dice.roll();
        let points = roll.points();
        let round = self.current_round;
        let seat = self.seats[slot.index()]
            .as_mut()
            .ok_or(Error::NotAParticipant)?;
        seat.score += points;
        let player = seat.player.clone();
        self.pending[slot.index()] = Some(points);

        let result = RoundResult {
            round,
            player: player.id().to_string(),
            player_name: player.name().to_string(),
            roll1: roll.die1,
            roll2: roll.die2,
            total_roll: roll.total(),
            bonus: roll.bonus(),
            player1_score: self.score(Slot::Player1),
            player2_score: self.score(Slot::Player2),
            player1_name: self.name(Slot::Player1),
            player2_name: self.name(Slot::Player2),
        };

        let next = if self.pending.iter().all(Option::is_some) {
            self.pending = [None, None];
            let scores = [self.score(Slot::Player1), self.score(Slot::Player2)];
            match decide_winner(scores, self.target_score, tie_break) {
                Some(winner) => {
                    self.status = LobbyStatus::Finished;
                    Next::Finished { winner }
                }
                None => {
                    self.current_round += 1;
                    self.current_turn = slot.other();
                    Next::Turn {
                        current_turn: self.current_turn,
                        current_round: self.current_round,
                    }
                }
            }
        } else {
            self.current_turn = slot.other();
            Next::Turn {
                current_turn: self.current_turn,
                current_round: self.current_round,
            }
        };

        Ok(RollEffect {
            slot,
            roll,
            result,
            next,
        })
    }

    /// End an in-progress match with a declared winner.
    pub fn terminate(
        &mut self,
        caller: Slot,
        winner: Slot,
        policy: TerminationPolicy,
    ) -> Result<(), Error> {
        if self.status != LobbyStatus::InProgress {
            return Err(Error::LobbyNotFound);
        }
        if policy == TerminationPolicy::ConcedeOnly && winner == caller {
            let opponent_connected = self
                .seat(caller.other())
                .is_some_and(|seat| seat.connected);
            if opponent_connected {
                return Err(Error::PermissionDenied(
                    "only the opponent can be declared the winner",
                ));
            }
        }
        self.status = LobbyStatus::Finished;
        Ok(())
    }

    /// Mark the seat held by `conn` as disconnected. Returns whether it was seated.
    pub fn mark_disconnected(&mut self, conn: ConnectionId) -> bool {
        let mut found = false;
        for seat in self.seats.iter_mut().flatten() {
            if seat.conn == conn {
                seat.connected = false;
                found = true;
            }
        }
        found
    }

    /// Immutable outcome of a finished match.
    pub fn result(&self, winner: Slot, finish: Finish) -> Option<MatchResult> {
        if self.status != LobbyStatus::Finished {
            return None;
        }
        let players = [
            self.seat(Slot::Player1)?.participant(),
            self.seat(Slot::Player2)?.participant(),
        ];
        Some(MatchResult {
            match_id: Uuid::new_v4().to_string(),
            lobby_id: self.id.clone(),
            winner,
            players,
            token_type: self.token_type,
            bet_amount: self.bet_amount,
            finish,
            finished_at: now_millis(),
        })
    }

    fn name(&self, slot: Slot) -> String {
        self.seat(slot)
            .map(|seat| seat.player.name().to_string())
            .unwrap_or_default()
    }
}

/// Winner of a completed round in which at least one score reached `target`.
///
/// The higher score wins. Equal scores follow `tie_break`; `None` means no winner yet.
pub fn decide_winner(scores: [u32; 2], target: u32, tie_break: TieBreak) -> Option<Slot> {
    let [p1, p2] = scores;
    if p1 < target && p2 < target {
        return None;
    }
    match p1.cmp(&p2) {
        std::cmp::Ordering::Greater => Some(Slot::Player1),
        std::cmp::Ordering::Less => Some(Slot::Player2),
        std::cmp::Ordering::Equal => match tie_break {
            TieBreak::Creator => Some(Slot::Player1),
            TieBreak::Joiner => Some(Slot::Player2),
            TieBreak::ExtraRound => None,
        },
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
