//! Shared domain types used across all StreetRace crates.
//!
//! Everything here is provider- and format-agnostic: the error taxonomy,
//! conversation messages, tool call shapes, runtime events, usage records,
//! and runtime configuration.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod usage;

pub use error::{Error, Result};
