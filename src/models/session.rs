use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ClientProfile;

/// Who wrote a conversation message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
}

/// A single entry in a session's conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub sender: Sender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-conversation state: the accumulated profile and the transcript
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Last time a request read or changed this session
    pub last_active: DateTime<Utc>,
    pub profile: ClientProfile,
    pub history: Vec<Message>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_active: now,
            profile: ClientProfile::new(),
            history: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// Whether the session has seen no activity since `cutoff`
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_active < cutoff
    }

    pub fn push(&mut self, sender: Sender, content: impl Into<String>) {
        self.history.push(Message::new(sender, content));
    }

    /// Renders the last `window` messages as prompt context, oldest first
    pub fn render_history(&self, window: usize) -> String {
        let start = self.history.len().saturating_sub(window);
        self.history[start..]
            .iter()
            .map(|m| {
                let who = match m.sender {
                    Sender::User => "user",
                    Sender::Assistant => "assistant",
                };
                format!("{}: {}", who, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = Session::new();
        assert!(session.history.is_empty());
        assert!(session.profile.is_empty());
    }

    #[test]
    fn test_render_history_keeps_window() {
        let mut session = Session::new();
        session.push(Sender::User, "something with beef");
        session.push(Sender::Assistant, "Try the bulgogi.");
        session.push(Sender::User, "no pork please");

        assert_eq!(
            session.render_history(2),
            "assistant: Try the bulgogi.\nuser: no pork please"
        );
        assert_eq!(session.render_history(10).lines().count(), 3);
        assert_eq!(session.render_history(0), "");
    }

    #[test]
    fn test_touch_resets_idle() {
        let mut session = Session::new();
        session.last_active = Utc::now() - chrono::Duration::hours(2);
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        assert!(session.idle_since(cutoff));

        session.touch();
        assert!(!session.idle_since(cutoff));
    }
}
