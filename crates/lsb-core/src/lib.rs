//! Core domain + application logic for the lyceum schedule bot.
//!
//! This crate is framework-agnostic. Telegram lives behind the messaging port
//! implemented in the adapter crate; storage behind the repository port.

pub mod broadcast;
pub mod cache;
pub mod collator;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod schedule;
pub mod security;
pub mod storage;
pub mod supervisor;
pub mod utils;

pub use errors::{Error, Result};
