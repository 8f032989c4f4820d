//! Turns raw similarity hits into ranked, explainable, deduplicated match
//! candidates, and screens new case drafts for likely duplicates.

mod duplicate;
mod resolver;

pub use duplicate::{CaseDraft, DuplicateCheck};
pub use resolver::{CaseLookup, MatchResolver};
