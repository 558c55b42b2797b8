//! Multi-provider LLM gateway: format detection and translation, a
//! per-provider executor strategy layer, credential lifecycle management,
//! account/combo fallback orchestration, and streaming response
//! translation with usage tracking. See `SPEC_FULL.md` for the full
//! module-by-module specification this crate implements.

pub mod chat;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executors;
pub mod fallback;
pub mod formats;
pub mod gateway;
pub mod logging;
pub mod state;
pub mod stream;
pub mod translate;
pub mod usage;

pub use error::{GatewayError, Result};
