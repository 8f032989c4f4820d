//! Privacy access gate. Every read path crosses this crate before any match
//! detail reaches a caller.

mod consent;
mod error;
mod gate;
mod policy;

pub use consent::ConsentStore;
pub use error::GateError;
pub use gate::PrivacyGate;
pub use policy::AccessRequest;
