use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use thiserror::Error;

use crate::services::prompts;

/// The four preference-analysis stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Match,
    Categorize,
    Recommend,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Extraction,
        Stage::Match,
        Stage::Categorize,
        Stage::Recommend,
    ];

    /// Template name this stage is resolved against
    pub fn name(self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Match => "match",
            Stage::Categorize => "categorize",
            Stage::Recommend => "recommend",
        }
    }

    pub fn position(self) -> usize {
        match self {
            Stage::Extraction => 0,
            Stage::Match => 1,
            Stage::Categorize => 2,
            Stage::Recommend => 3,
        }
    }

    pub fn previous(self) -> Option<Stage> {
        self.position().checked_sub(1).map(|i| Stage::ALL[i])
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error types for template loading
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to read template file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No template named '{0}'")]
    MissingStage(&'static str),
}

/// A named prompt template as stored in the template file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    #[serde(default)]
    pub system: String,
    pub template: String,
}

/// Stage-indexed template table, resolved once at startup
#[derive(Debug, Clone)]
pub struct TemplateSet {
    extraction: PromptTemplate,
    matching: PromptTemplate,
    categorize: PromptTemplate,
    recommend: PromptTemplate,
}

impl TemplateSet {
    /// Binds loaded templates to stages by name
    ///
    /// Fails if any stage has no template. Templates with other names are ignored.
    pub fn resolve(loaded: Vec<PromptTemplate>) -> Result<Self, TemplateError> {
        let mut by_name: HashMap<String, PromptTemplate> =
            loaded.into_iter().map(|t| (t.name.clone(), t)).collect();

        let mut take = |stage: Stage| {
            by_name
                .remove(stage.name())
                .ok_or(TemplateError::MissingStage(stage.name()))
        };

        let set = Self {
            extraction: take(Stage::Extraction)?,
            matching: take(Stage::Match)?,
            categorize: take(Stage::Categorize)?,
            recommend: take(Stage::Recommend)?,
        };

        if !by_name.is_empty() {
            tracing::debug!(
                unused = ?by_name.keys().collect::<Vec<_>>(),
                "Ignoring templates with no matching stage"
            );
        }

        Ok(set)
    }

    /// Loads a JSON array of templates from disk and resolves it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let loaded: Vec<PromptTemplate> = serde_json::from_str(&contents)?;
        let set = Self::resolve(loaded)?;

        tracing::info!(path = %path.as_ref().display(), "Loaded prompt templates");
        Ok(set)
    }

    /// Templates compiled into the binary
    pub fn builtin() -> Self {
        let template = |stage: Stage, body: &str| PromptTemplate {
            name: stage.name().to_string(),
            system: prompts::JSON_ONLY_SYSTEM.to_string(),
            template: body.to_string(),
        };

        Self {
            extraction: template(Stage::Extraction, prompts::EXTRACTION_TEMPLATE),
            matching: template(Stage::Match, prompts::MATCH_TEMPLATE),
            categorize: template(Stage::Categorize, prompts::CATEGORIZE_TEMPLATE),
            recommend: template(Stage::Recommend, prompts::RECOMMEND_TEMPLATE),
        }
    }

    pub fn get(&self, stage: Stage) -> &PromptTemplate {
        match stage {
            Stage::Extraction => &self.extraction,
            Stage::Match => &self.matching,
            Stage::Categorize => &self.categorize,
            Stage::Recommend => &self.recommend,
        }
    }

    /// Fills `{key}` placeholders in a stage template
    ///
    /// Substitution is single-pass: placeholder-looking text inside a value
    /// is left alone, as are braces that name no variable.
    pub fn render(&self, stage: Stage, vars: &[(&str, &str)]) -> String {
        let template = self.get(stage).template.as_str();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let substitution = after.find('}').and_then(|close| {
                let key = &after[..close];
                vars.iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, value)| (close, *value))
            });

            match substitution {
                Some((close, value)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str, body: &str) -> PromptTemplate {
        PromptTemplate {
            name: name.to_string(),
            system: String::new(),
            template: body.to_string(),
        }
    }

    fn all_stages() -> Vec<PromptTemplate> {
        Stage::ALL
            .iter()
            .map(|s| template(s.name(), &format!("{} {{input}}", s.name())))
            .collect()
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Extraction.previous(), None);
        assert_eq!(Stage::Match.previous(), Some(Stage::Extraction));
        assert_eq!(Stage::Recommend.previous(), Some(Stage::Categorize));
    }

    #[test]
    fn test_resolve_binds_templates_by_name() {
        let mut loaded = all_stages();
        loaded.push(template("greeting", "hello"));

        let set = TemplateSet::resolve(loaded).unwrap();
        assert_eq!(set.get(Stage::Categorize).template, "categorize {input}");
    }

    #[test]
    fn test_resolve_fails_on_missing_stage() {
        let loaded: Vec<PromptTemplate> = all_stages()
            .into_iter()
            .filter(|t| t.name != "match")
            .collect();

        let err = TemplateSet::resolve(loaded).unwrap_err();
        assert!(matches!(err, TemplateError::MissingStage("match")));
    }

    #[test]
    fn test_render_substitutes_known_keys_only() {
        let set = TemplateSet::resolve(vec![
            template("extraction", r#"Request: {request} -> {"objective": "..."} {unknown}"#),
            template("match", ""),
            template("categorize", ""),
            template("recommend", ""),
        ])
        .unwrap();

        let rendered = set.render(Stage::Extraction, &[("request", "no pork")]);
        assert_eq!(rendered, r#"Request: no pork -> {"objective": "..."} {unknown}"#);
    }

    #[test]
    fn test_render_does_not_expand_placeholders_in_values() {
        let set = TemplateSet::resolve(all_stages()).unwrap();
        let rendered = set.render(Stage::Match, &[("input", "{input}")]);
        assert_eq!(rendered, "match {input}");
    }

    #[test]
    fn test_builtin_templates_mention_their_placeholders() {
        let set = TemplateSet::builtin();
        assert!(set.get(Stage::Extraction).template.contains("{request}"));
        assert!(set.get(Stage::Match).template.contains("{schema}"));
        assert!(set.get(Stage::Categorize).template.contains("{features}"));
        assert!(set.get(Stage::Recommend).template.contains("{recommendations}"));
    }
}
