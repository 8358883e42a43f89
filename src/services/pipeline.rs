use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::models::{Catalog, ClientProfile, FeatureSchema, Mention, MentionKind, Polarity, Sender, Session};
use crate::services::collaborator::{parse_json, Collaborator, CollaboratorError};
use crate::services::compiler::{self, CompileError, OverlapPolicy};
use crate::services::reconciler::{FeatureMatch, ReconcileError, Reconciler};
use crate::services::solver::{SelectionResult, SequentialSolver, SolverError};
use crate::services::templates::{Stage, TemplateSet};

/// Per-request pipeline failures
///
/// Any of these aborts the remaining stages; the session is left as it was.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage '{stage}' returned malformed output: {reason}")]
    MalformedOutput { stage: Stage, reason: String },

    #[error("Reconciliation failed: {0}")]
    Reconciliation(#[from] ReconcileError),

    #[error("Stage '{stage}' collaborator call failed: {source}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: CollaboratorError,
    },

    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Selection failed: {0}")]
    Solver(#[from] SolverError),

    #[error("Stage '{stage}' cannot start: {reason}")]
    StageOrder { stage: Stage, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Complete,
}

/// Enforces the strict extraction -> match -> categorize -> recommend chain
#[derive(Debug)]
pub struct StageTracker {
    states: [StageState; 4],
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            states: [StageState::Pending; 4],
        }
    }

    pub fn state(&self, stage: Stage) -> StageState {
        self.states[stage.position()]
    }

    pub fn begin(&mut self, stage: Stage) -> Result<(), PipelineError> {
        if let Some(previous) = stage.previous() {
            if self.state(previous) != StageState::Complete {
                return Err(PipelineError::StageOrder {
                    stage,
                    reason: "previous stage has not completed",
                });
            }
        }
        if self.state(stage) != StageState::Pending {
            return Err(PipelineError::StageOrder {
                stage,
                reason: "stage already started",
            });
        }

        self.states[stage.position()] = StageState::Running;
        tracing::debug!(stage = %stage, "Stage running");
        Ok(())
    }

    pub fn complete(&mut self, stage: Stage) -> Result<(), PipelineError> {
        if self.state(stage) != StageState::Running {
            return Err(PipelineError::StageOrder {
                stage,
                reason: "stage is not running",
            });
        }

        self.states[stage.position()] = StageState::Complete;
        tracing::debug!(stage = %stage, "Stage complete");
        Ok(())
    }
}

/// A mention as the extraction stage reports it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMention {
    pub name: String,
    pub polarity: Polarity,
    #[serde(default)]
    pub strength: Option<f64>,
}

/// Extraction stage answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedFeatures {
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub preferences: Vec<RawMention>,
    #[serde(default)]
    pub constraints: Vec<RawMention>,
}

impl ExtractedFeatures {
    /// Preferences become soft mentions, constraints hard ones
    fn into_mentions(self) -> Vec<Mention> {
        let tag = |kind: MentionKind| {
            move |raw: RawMention| Mention {
                name: raw.name,
                polarity: raw.polarity,
                strength: raw.strength,
                kind,
            }
        };

        self.preferences
            .into_iter()
            .map(tag(MentionKind::Soft))
            .chain(self.constraints.into_iter().map(tag(MentionKind::Hard)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Constraint,
    Preference,
}

/// Categorize stage answer for one canonical feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Categorization {
    pub feature: String,
    /// Kind of the mention this answers; `None` answers every mention of the feature
    #[serde(default)]
    pub kind: Option<MentionKind>,
    pub category: Category,
    #[serde(default)]
    pub pref: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    summary: String,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub overlap: OverlapPolicy,
    /// Number of past messages rendered into prompts
    pub history_window: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            overlap: OverlapPolicy::Stack,
            history_window: 10,
        }
    }
}

/// Result of one successful user turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub objective: String,
    pub selection: SelectionResult,
    pub summary: String,
    /// Raw names from this turn that matched no catalog feature
    pub unmatched: Vec<String>,
}

/// Sequences the four preference-analysis stages for a session
pub struct Pipeline {
    catalog: Arc<Catalog>,
    templates: TemplateSet,
    collaborator: Arc<dyn Collaborator>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        templates: TemplateSet,
        collaborator: Arc<dyn Collaborator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            catalog,
            templates,
            collaborator,
            settings,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs one user turn end to end
    ///
    /// All profile changes are made on a staged copy and written back, along
    /// with the user message and the summary, only once the recommend stage
    /// completes. Dropping the future part-way leaves the session untouched.
    #[instrument(skip_all, fields(session_id = %session.id, top_k = top_k))]
    pub async fn run_turn(
        &self,
        session: &mut Session,
        request_text: &str,
        top_k: usize,
    ) -> Result<TurnOutcome, PipelineError> {
        let mut tracker = StageTracker::new();
        let mut staged = session.profile.clone();
        let history = session.render_history(self.settings.history_window);
        let schema = self.catalog.schema();
        let reconciler = Reconciler::new(schema);

        // 1. Extraction
        tracker.begin(Stage::Extraction)?;
        let extracted = self.extract_features(&history, request_text).await?;
        let objective = extracted.objective.clone();
        let mentions = extracted.into_mentions();
        tracing::info!(mentions = mentions.len(), objective = %objective, "Extracted features");
        tracker.complete(Stage::Extraction)?;

        // 2. Match raw mentions to schema names
        tracker.begin(Stage::Match)?;
        let pending = reconciler.pending(&staged, &mentions)?;
        let matches = if pending.is_empty() || schema.is_empty() {
            tracing::debug!(pending = pending.len(), "Nothing for the collaborator to match");
            Vec::new()
        } else {
            self.reconcile(&pending, schema).await?
        };
        let unmatched_before = staged.unmatched.len();
        let matched = reconciler.apply(&mut staged, mentions, &matches)?;
        let unmatched: Vec<String> = staged.unmatched[unmatched_before..]
            .iter()
            .map(|m| m.name.clone())
            .collect();
        tracing::info!(matched = matched.len(), unmatched = unmatched.len(), "Reconciled mentions");
        tracker.complete(Stage::Match)?;

        // 3. Categorize hard vs soft
        tracker.begin(Stage::Categorize)?;
        let categorized = if matched.is_empty() {
            matched
        } else {
            let answers = self.categorize(&objective, &matched).await?;
            apply_categories(schema, matched, &answers)?
        };
        for mention in categorized {
            staged.record(mention);
        }
        tracker.complete(Stage::Categorize)?;

        // 4. Recommend
        tracker.begin(Stage::Recommend)?;
        let selection = self.select(&staged, top_k)?;
        let summary = self.summarize(&history, &objective, &selection).await?;
        tracker.complete(Stage::Recommend)?;

        session.profile = staged;
        session.push(Sender::User, request_text);
        session.push(Sender::Assistant, summary.clone());

        tracing::info!(
            selected = selection.items.len(),
            status = %selection.status,
            "Turn committed"
        );

        Ok(TurnOutcome {
            objective,
            selection,
            summary,
            unmatched,
        })
    }

    /// Compiles a profile and runs the sequential solver, no collaborator involved
    pub fn select(&self, profile: &ClientProfile, top_k: usize) -> Result<SelectionResult, PipelineError> {
        let criteria = compiler::compile(profile, self.catalog.schema(), self.settings.overlap)?;
        let selection = SequentialSolver::new(&self.catalog, &criteria)?.select(top_k)?;
        Ok(selection)
    }

    async fn extract_features(&self, history: &str, request_text: &str) -> Result<ExtractedFeatures, PipelineError> {
        let extracted: ExtractedFeatures = self
            .ask(
                Stage::Extraction,
                &[("history", history), ("request", request_text)],
            )
            .await?;

        if extracted
            .preferences
            .iter()
            .chain(extracted.constraints.iter())
            .any(|m| m.name.trim().is_empty())
        {
            return Err(PipelineError::MalformedOutput {
                stage: Stage::Extraction,
                reason: "mention with empty name".to_string(),
            });
        }

        Ok(extracted)
    }

    async fn reconcile(&self, pending: &[String], schema: &FeatureSchema) -> Result<Vec<FeatureMatch>, PipelineError> {
        let candidates = json!(pending).to_string();
        let schema_names = json!(schema.names()).to_string();
        self.ask(
            Stage::Match,
            &[("candidates", &candidates), ("schema", &schema_names)],
        )
        .await
    }

    async fn categorize(&self, objective: &str, matched: &[Mention]) -> Result<Vec<Categorization>, PipelineError> {
        let features = json!(matched
            .iter()
            .map(|m| json!({"feature": m.name, "polarity": m.polarity, "kind": m.kind}))
            .collect::<Vec<_>>())
        .to_string();
        self.ask(
            Stage::Categorize,
            &[("objective", objective), ("features", &features)],
        )
        .await
    }

    async fn summarize(
        &self,
        history: &str,
        objective: &str,
        selection: &SelectionResult,
    ) -> Result<String, PipelineError> {
        let recommendations = json!(selection.names()).to_string();
        let status = selection.status.to_string();
        let output: SummaryOutput = self
            .ask(
                Stage::Recommend,
                &[
                    ("history", history),
                    ("objective", objective),
                    ("recommendations", &recommendations),
                    ("status", &status),
                ],
            )
            .await?;
        Ok(output.summary)
    }

    /// Renders a stage prompt, calls the collaborator and parses its JSON answer
    async fn ask<T: DeserializeOwned>(&self, stage: Stage, vars: &[(&str, &str)]) -> Result<T, PipelineError> {
        let template = self.templates.get(stage);
        let prompt = self.templates.render(stage, vars);

        let raw = self
            .collaborator
            .complete(stage, &template.system, &prompt)
            .await
            .map_err(|source| PipelineError::Collaborator { stage, source })?;

        parse_json(&raw).map_err(|e| {
            tracing::warn!(stage = %stage, error = %e, "Unparseable collaborator output");
            PipelineError::MalformedOutput {
                stage,
                reason: e.to_string(),
            }
        })
    }
}

/// Applies categorize answers to this turn's matched mentions
///
/// `category` decides hard vs soft. For constraints a positive `pref` means
/// required and anything else excluded; for preferences a non-zero `pref`
/// sets polarity by sign and strength by magnitude. An answer naming a kind
/// wins over a kindless one for the same feature.
fn apply_categories(
    schema: &FeatureSchema,
    matched: Vec<Mention>,
    answers: &[Categorization],
) -> Result<Vec<Mention>, PipelineError> {
    let mut by_mention: HashMap<(&str, Option<MentionKind>), &Categorization> = HashMap::new();
    for answer in answers {
        if !schema.contains(&answer.feature) {
            return Err(ReconcileError::UnknownFeature {
                raw: answer.feature.clone(),
                feature: answer.feature.clone(),
            }
            .into());
        }
        if !matched.iter().any(|m| m.name == answer.feature) {
            tracing::debug!(feature = %answer.feature, "Ignoring category for feature not mentioned this turn");
            continue;
        }
        by_mention.insert((answer.feature.as_str(), answer.kind), answer);
    }

    let polarity_of = |pref: f64| {
        if pref > 0.0 {
            Polarity::Like
        } else {
            Polarity::Dislike
        }
    };

    Ok(matched
        .into_iter()
        .map(|mut mention| {
            let answer = by_mention
                .get(&(mention.name.as_str(), Some(mention.kind)))
                .or_else(|| by_mention.get(&(mention.name.as_str(), None)));
            if let Some(answer) = answer {
                match answer.category {
                    Category::Constraint => {
                        mention.kind = MentionKind::Hard;
                        if let Some(pref) = answer.pref {
                            mention.polarity = polarity_of(pref);
                        }
                    }
                    Category::Preference => {
                        mention.kind = MentionKind::Soft;
                        if let Some(pref) = answer.pref.filter(|p| *p != 0.0) {
                            mention.polarity = polarity_of(pref);
                            mention.strength = Some(pref.abs());
                        }
                    }
                }
            }
            mention
        })
        .collect())
}
