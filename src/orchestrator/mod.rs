pub mod fixloop;
pub mod machine;

pub use fixloop::{FixLoop, FixOutcome};
pub use machine::{SprintOrchestrator, SprintSummary};
