//! Geo-alert dispatcher: computes recipient sets around a last-seen location
//! and pushes case alerts through an external transport with bounded retries.

mod dispatcher;
mod subscribers;
mod transport;

pub use dispatcher::{AlertDispatcher, DispatchError};
pub use subscribers::{Subscriber, SubscriberRegistry};
pub use transport::{CaseAlert, Transport, TransportError};
