pub mod collaborators;
pub mod dice;
mod engine;
mod error;
pub mod journal;
pub mod lobby;
pub mod memory;
mod player;
pub mod points;
pub mod settlement;
pub mod store;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

#[cfg(test)]
mod integration_tests;

pub use collaborators::{Backend, HistorySink, Ledger, PointsLedger, ReferralPayout, Transfer};
pub use engine::{Effects, Engine, EngineConfig, DEFAULT_COLLABORATOR_TIMEOUT};
pub use error::{Error, ErrorKind};
pub use journal::{FileJournal, IntentJournal, MemoryJournal};
pub use lobby::{Rules, StartMode, TerminationPolicy, TieBreak};
pub use memory::{Account, Memory};
pub use player::Player;
pub use settlement::{SettlementPolicy, SettlementReport};
