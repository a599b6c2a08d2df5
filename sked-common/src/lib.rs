//! # Sked Common Library
//!
//! Shared code for the scheduling import services:
//! - Error taxonomy (validation / not found / conflict / transient / fatal)
//! - Event types (`ImportEvent`) and the broadcast `EventBus`
//! - TOML configuration resolution
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, ErrorKind, Result};
