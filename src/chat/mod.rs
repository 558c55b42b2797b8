//! Chat Handler and Chat Core (spec §4.7/§4.8): top-level orchestration
//! composing format detection/translation, the provider executor layer,
//! credential selection, and the fallback policy into one request/response
//! cycle.

pub mod bypass;
pub mod core;
pub mod handler;

pub use core::ChatContext;
pub use handler::{handle, IncomingRequest};
