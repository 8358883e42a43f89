use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::models::{ClientProfile, FeatureSchema, MentionKind, Polarity};

/// Error types for criteria compilation
#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("Profile references unknown feature '{0}'")]
    UnknownFeature(String),
}

/// What to do when one feature is both a hard constraint and a soft preference
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Both the constraint and the objective term apply
    #[default]
    Stack,
    /// The soft term is dropped
    HardWins,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HardRule {
    /// Only items with a non-zero value in the column may be selected
    Required,
    /// No item with a non-zero value in the column may be selected
    Excluded,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(tag = "type", content = "rule", rename_all = "snake_case")]
pub enum CriterionKind {
    Constraint(HardRule),
    ObjectiveTerm,
}

/// A schema-indexed constraint or objective term
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompiledCriterion {
    pub feature_index: usize,
    pub kind: CriterionKind,
    pub polarity: Polarity,
    /// Signed objective coefficient; carries the polarity sign for constraints too
    pub weight: f64,
}

impl CompiledCriterion {
    pub fn required(feature_index: usize) -> Self {
        Self {
            feature_index,
            kind: CriterionKind::Constraint(HardRule::Required),
            polarity: Polarity::Like,
            weight: 1.0,
        }
    }

    pub fn excluded(feature_index: usize) -> Self {
        Self {
            feature_index,
            kind: CriterionKind::Constraint(HardRule::Excluded),
            polarity: Polarity::Dislike,
            weight: -1.0,
        }
    }

    pub fn objective(feature_index: usize, weight: f64) -> Self {
        let polarity = if weight < 0.0 {
            Polarity::Dislike
        } else {
            Polarity::Like
        };
        Self {
            feature_index,
            kind: CriterionKind::ObjectiveTerm,
            polarity,
            weight,
        }
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self.kind, CriterionKind::Constraint(_))
    }
}

/// Compiles a reconciled profile into solver criteria
///
/// Likes come before dislikes, each in insertion order. Hard likes become
/// `Required`, hard dislikes `Excluded`, and soft mentions objective terms
/// weighted `±strength` (default 1).
pub fn compile(
    profile: &ClientProfile,
    schema: &FeatureSchema,
    policy: OverlapPolicy,
) -> Result<Vec<CompiledCriterion>, CompileError> {
    let hard_features: HashSet<&str> = profile
        .matched()
        .filter(|m| m.kind == MentionKind::Hard)
        .map(|m| m.name.as_str())
        .collect();

    let mut criteria = Vec::new();

    for mention in profile.matched() {
        let feature_index = schema
            .index_of(&mention.name)
            .ok_or_else(|| CompileError::UnknownFeature(mention.name.clone()))?;

        let criterion = match (mention.kind, mention.polarity) {
            (MentionKind::Hard, Polarity::Like) => CompiledCriterion::required(feature_index),
            (MentionKind::Hard, Polarity::Dislike) => CompiledCriterion::excluded(feature_index),
            (MentionKind::Soft, polarity) => {
                if policy == OverlapPolicy::HardWins && hard_features.contains(mention.name.as_str()) {
                    tracing::debug!(
                        feature = %mention.name,
                        "Dropping soft term shadowed by hard constraint"
                    );
                    continue;
                }
                let magnitude = mention.strength.map(f64::abs).unwrap_or(1.0);
                CompiledCriterion {
                    feature_index,
                    kind: CriterionKind::ObjectiveTerm,
                    polarity,
                    weight: polarity.sign() * magnitude,
                }
            }
        };

        criteria.push(criterion);
    }

    tracing::debug!(
        constraints = criteria.iter().filter(|c| c.is_constraint()).count(),
        objective_terms = criteria.iter().filter(|c| !c.is_constraint()).count(),
        "Compiled selection criteria"
    );

    Ok(criteria)
}
