//! Shared types used across all pesan crates.

pub mod types;

pub use types::{
    ChatKind, ContentKind, Direction, MessageEvent, NormalizedMessage, RecipientCriterion,
};
