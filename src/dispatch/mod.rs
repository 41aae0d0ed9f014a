pub mod dispatcher;

pub use dispatcher::{AdmissionGuard, DispatchDecision, Dispatcher, BLOCKED_MESSAGE};
