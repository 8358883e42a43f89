pub mod collaborator;
pub mod compiler;
pub mod pipeline;
pub mod prompts;
pub mod reconciler;
pub mod solver;
pub mod templates;

pub use collaborator::{Collaborator, CollaboratorError, LlmClient};
pub use compiler::{compile, CompileError, CompiledCriterion, CriterionKind, HardRule, OverlapPolicy};
pub use pipeline::{Pipeline, PipelineError, PipelineSettings, StageState, StageTracker, TurnOutcome};
pub use reconciler::{FeatureMatch, ReconcileError, Reconciler};
pub use solver::{SelectedItem, SelectionResult, SelectionStatus, SequentialSolver, SolverError};
pub use templates::{PromptTemplate, Stage, TemplateError, TemplateSet};
