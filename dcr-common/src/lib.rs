//! # DCR Common Library
//!
//! Shared code for the device catalog reconciliation crates:
//! - Error type
//! - Bootstrap configuration and root folder resolution
//! - Event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
