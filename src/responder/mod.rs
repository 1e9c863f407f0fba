//! Eligibility & dedup engine — decides which inbound messages get a
//! canned reply, and runs the poll cycle that acts on those decisions.

pub mod cycle;
pub mod engine;
pub mod rules;
pub mod types;

pub use cycle::{CycleReport, Responder};
pub use engine::classify;
pub use rules::IgnoreList;
pub use types::{Decision, InboundMessage};
