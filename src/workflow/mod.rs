//! Workflow sequencing: step graphs, next-step selection and the engine

pub mod definition;
pub mod engine;
pub mod selector;

pub use definition::{StepSpec, WorkflowDefinition};
pub use engine::{RunOutcome, WorkflowEngine};
pub use selector::{
    parse_react_reply, DeterministicSelector, LlmStepSelector, Proposal, SelectionView,
    StepSelector,
};
