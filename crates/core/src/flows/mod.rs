pub mod engine;
pub mod states;

pub use engine::{next_state, FlowDefinition, FlowEngine, FlowTransitionError, ProspectIntakeFlow};
pub use states::{ConversationMode, IntakeState, SenderRole, TransitionOutcome};
