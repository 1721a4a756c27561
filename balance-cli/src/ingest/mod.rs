//! Run coordination and its runtime collaborators

pub mod coordinator;
pub mod events;
pub mod guard;
pub mod run;
pub mod snapshot;
pub mod watcher;

pub use coordinator::{Coordinator, CoordinatorSettings, RunOutcome};
pub use run::{IngestError, RunStatus};
