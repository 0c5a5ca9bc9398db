//! Reply arbitration: keyword auto-replies, complaint analytics, and
//! AI-generated replies.
//!
//! Flow per inbound text: complaint scan (analytics only) → ordered rule
//! match (longest keyword wins) → AI generation when the tenant has the
//! feature enabled → nothing.

pub mod arbitrator;
pub mod directive;
pub mod generator;
pub mod history;
pub mod rules;

pub use {
    arbitrator::{ReplyAction, ReplyArbitrator, ReplyDecision, ReplySource, TenantReplyConfig},
    directive::GeneratedReply,
    generator::{GenerationRequest, HistoryTurn, OpenAiCompatGenerator, ReplyGenerator},
    history::HistoryStore,
};
