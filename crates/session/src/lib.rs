//! Session lifecycle: one live transport connection per tenant.
//!
//! The registry owns every session, drives its state machine from transport
//! events, reconnects on recoverable closures, and tears the tenant down on
//! an explicit logout.

pub mod error;
pub mod registry;
pub mod state;

pub use {
    error::{Error, Result},
    registry::SessionRegistry,
    state::SessionState,
};
