//! Shared wire and domain types for the dice arena.

pub mod api;
pub mod dice;

pub use api::{Action, DecodeError, Frame};
