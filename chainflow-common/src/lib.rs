//! # Chainflow Common Library
//!
//! Shared code for the chainflow services including:
//! - Error type and result alias
//! - Configuration loading and root folder resolution
//! - Event types and the broadcast EventBus
//! - SQLite database initialization

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
