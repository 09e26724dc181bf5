//! The workflow orchestrator: snapshot model, pure transition rules, and the
//! store that drives them from stream events and request results.

mod machine;
mod record;
mod state;
mod store;

pub use machine::{CONNECTION_LOST, Transition, WorkflowMachine};
pub use record::SessionRecord;
pub use state::{ActiveTab, Message, Role, WorkflowSnapshot, WorkflowStatus};
pub use store::WorkflowStore;
