//! HTTP gateway layer (spec §6): axum router wiring, process bootstrap, and
//! local bearer-token auth for the config CRUD surface. Grounded on the
//! teacher's `gateway/daemon.rs` (port-fallback bind, PID file,
//! `CorsLayer::permissive()`) and `gateway/auth.rs` (token load-or-create
//! with `0600` permissions, bearer middleware).

pub mod auth;
pub mod daemon;
pub mod routes;

pub use daemon::{serve, BootstrapError};
