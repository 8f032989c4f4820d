//! The engine facade. External collaborators (intake, verification,
//! compliance, approval workflows) talk to [`Engine`]; everything behind it
//! is wired here.

mod cases;
mod engine;
mod error;

pub use cases::CaseDirectory;
pub use engine::{Engine, MatchOutcome, Requester};
pub use error::EngineError;
