use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::models::{memo_key, ClientProfile, FeatureSchema, Mention, Resolution};

/// Marker the collaborator uses for "no schema feature fits"
pub const NO_MATCH: &str = "none";

/// Error types for feature reconciliation
#[derive(Debug, Error, PartialEq)]
pub enum ReconcileError {
    #[error("Mention has an empty name")]
    EmptyName,

    #[error("Reconciler mapped '{raw}' to '{feature}', which is not a catalog feature")]
    UnknownFeature { raw: String, feature: String },
}

/// One collaborator answer: raw feature text and its canonical name (or "none")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureMatch {
    pub feature: String,
    pub db_name: String,
}

impl FeatureMatch {
    fn is_none(&self) -> bool {
        self.db_name.trim().eq_ignore_ascii_case(NO_MATCH)
    }
}

/// Maps free-text mentions onto canonical schema names
pub struct Reconciler<'a> {
    schema: &'a FeatureSchema,
}

impl<'a> Reconciler<'a> {
    pub fn new(schema: &'a FeatureSchema) -> Self {
        Self { schema }
    }

    /// Raw names that still need a collaborator answer
    ///
    /// Deduplicated by raw name, first occurrence wins; names the profile
    /// has already resolved are skipped.
    pub fn pending(&self, profile: &ClientProfile, mentions: &[Mention]) -> Result<Vec<String>, ReconcileError> {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for mention in mentions {
            let name = mention.name.trim();
            if name.is_empty() {
                return Err(ReconcileError::EmptyName);
            }
            if profile.resolution(name).is_none() && seen.insert(memo_key(name)) {
                pending.push(name.to_string());
            }
        }

        Ok(pending)
    }

    /// Resolves `mentions` using the profile memo plus fresh `matches`
    ///
    /// Unmatched mentions are parked in the profile; matched ones are
    /// returned with their canonical name. All answers are validated before
    /// the profile is touched.
    pub fn apply(
        &self,
        profile: &mut ClientProfile,
        mentions: Vec<Mention>,
        matches: &[FeatureMatch],
    ) -> Result<Vec<Mention>, ReconcileError> {
        let mut answers: HashMap<String, Resolution> = HashMap::new();
        for answer in matches {
            let resolution = if answer.is_none() {
                Resolution::Unmatched
            } else if self.schema.contains(&answer.db_name) {
                Resolution::Canonical(answer.db_name.clone())
            } else {
                return Err(ReconcileError::UnknownFeature {
                    raw: answer.feature.clone(),
                    feature: answer.db_name.clone(),
                });
            };
            answers.insert(memo_key(&answer.feature), resolution);
        }

        let mut matched = Vec::new();

        for mut mention in mentions {
            let raw = mention.name.trim().to_string();
            if raw.is_empty() {
                return Err(ReconcileError::EmptyName);
            }

            let resolution = match profile.resolution(&raw) {
                Some(known) => known.clone(),
                None => {
                    let fresh = answers.get(&memo_key(&raw)).cloned().unwrap_or_else(|| {
                        tracing::warn!(feature = %raw, "Reconciler gave no answer, treating as unmatched");
                        Resolution::Unmatched
                    });
                    profile.remember(&raw, fresh.clone());
                    fresh
                }
            };

            match resolution {
                Resolution::Canonical(name) => {
                    tracing::debug!(raw = %raw, canonical = %name, "Reconciled mention");
                    mention.name = name;
                    matched.push(mention);
                }
                Resolution::Unmatched => {
                    mention.name = raw;
                    profile.mark_unmatched(mention);
                }
            }
        }

        Ok(matched)
    }
}
