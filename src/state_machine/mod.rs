// Job lifecycle state machine
//
// queued -> running -> completed | failed | cancelled, plus queued -> cancelled.
// Terminal states accept no events.

pub mod errors;
pub mod events;
pub mod job_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::JobEvent;
pub use job_state_machine::JobStateMachine;
pub use states::JobState;
