mod controller;
mod policy;

pub use controller::{RetryController, RetryPhase, RetryState};
pub use policy::{FailureKind, RetryPolicy};
