use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Direction of a stated preference
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Like,
    Dislike,
}

impl Polarity {
    /// +1 for likes, -1 for dislikes
    pub fn sign(self) -> f64 {
        match self {
            Polarity::Like => 1.0,
            Polarity::Dislike => -1.0,
        }
    }
}

impl Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarity::Like => write!(f, "like"),
            Polarity::Dislike => write!(f, "dislike"),
        }
    }
}

/// Whether a mention restricts the candidate set or only shapes the objective
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MentionKind {
    /// Hard constraint: required (like) or excluded (dislike)
    Hard,
    /// Soft preference: weighted objective term
    Soft,
}

impl Display for MentionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MentionKind::Hard => write!(f, "hard"),
            MentionKind::Soft => write!(f, "soft"),
        }
    }
}

/// A preference statement tied to a feature name
///
/// Before reconciliation `name` is free text from the extraction stage;
/// once it sits in a profile's likes or dislikes it is a schema feature name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Mention {
    pub name: String,
    pub polarity: Polarity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    pub kind: MentionKind,
}

impl Mention {
    pub fn new(name: impl Into<String>, polarity: Polarity, kind: MentionKind) -> Self {
        Self {
            name: name.into(),
            polarity,
            strength: None,
            kind,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }
}

/// Outcome of reconciling one raw feature name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "feature", rename_all = "snake_case")]
pub enum Resolution {
    Canonical(String),
    Unmatched,
}

/// Key under which a raw name is memoized
pub fn memo_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Accumulated likes, dislikes and unmatched mentions for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientProfile {
    pub likes: Vec<Mention>,
    pub dislikes: Vec<Mention>,
    pub unmatched: Vec<Mention>,
    /// Raw name -> resolution, so a mention is reconciled at most once
    #[serde(default)]
    resolutions: BTreeMap<String, Resolution>,
}

impl ClientProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.likes.is_empty() && self.dislikes.is_empty() && self.unmatched.is_empty()
    }

    /// Adds a reconciled mention to likes or dislikes
    ///
    /// A feature appears at most once per (set, kind). Restating it with
    /// the same polarity updates the entry in place; the opposite polarity
    /// moves it to the other set.
    pub fn record(&mut self, mention: Mention) {
        let (target, other) = match mention.polarity {
            Polarity::Like => (&mut self.likes, &mut self.dislikes),
            Polarity::Dislike => (&mut self.dislikes, &mut self.likes),
        };

        other.retain(|m| !(m.name == mention.name && m.kind == mention.kind));

        match target
            .iter_mut()
            .find(|m| m.name == mention.name && m.kind == mention.kind)
        {
            Some(existing) => {
                if mention.strength.is_some() {
                    existing.strength = mention.strength;
                }
            }
            None => target.push(mention),
        }
    }

    /// Parks a mention that matched no schema feature
    pub fn mark_unmatched(&mut self, mention: Mention) {
        let key = memo_key(&mention.name);
        if !self.unmatched.iter().any(|m| memo_key(&m.name) == key) {
            self.unmatched.push(mention);
        }
    }

    pub fn resolution(&self, raw: &str) -> Option<&Resolution> {
        self.resolutions.get(&memo_key(raw))
    }

    pub fn remember(&mut self, raw: &str, resolution: Resolution) {
        self.resolutions.insert(memo_key(raw), resolution);
    }

    /// Likes followed by dislikes, in insertion order
    pub fn matched(&self) -> impl Iterator<Item = &Mention> {
        self.likes.iter().chain(self.dislikes.iter())
    }

    pub fn find(&self, name: &str, kind: MentionKind) -> Option<&Mention> {
        self.matched().find(|m| m.name == name && m.kind == kind)
    }
}
