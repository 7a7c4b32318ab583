//! Session event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key addressing one session: `(app, user, session id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app: String,
    pub user: String,
    pub id: String,
}

impl SessionKey {
    pub fn new(app: impl Into<String>, user: impl Into<String>, id: impl Into<String>) -> Self {
        Self { app: app.into(), user: user.into(), id: id.into() }
    }

    /// Relative file path of this session under the session root.
    pub fn rel_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.app)
            .join(&self.user)
            .join(format!("{}.json", self.id))
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.app, self.user, self.id)
    }
}

/// One ordered part of an event's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Part {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "function_call")]
    FunctionCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    #[serde(rename = "function_response")]
    FunctionResponse {
        id: String,
        name: String,
        response: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self { role: role.into(), parts: vec![Part::Text { text: text.into() }] }
    }

    /// All text parts joined with newlines.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Flags an event can carry besides content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventActions {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub escalate: bool,
}

/// One entry in the session log. `author` is `"user"` or an agent name
/// (`"system"` for synthetic events such as compaction summaries).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default)]
    pub actions: EventActions,
}

impl SessionEvent {
    pub fn new(author: impl Into<String>, content: Content) -> Self {
        Self {
            author: author.into(),
            timestamp: Utc::now(),
            content: Some(content),
            actions: EventActions::default(),
        }
    }

    pub fn text(author: impl Into<String>, role: &str, text: impl Into<String>) -> Self {
        Self::new(author, Content::text(role, text))
    }

    pub fn is_user(&self) -> bool {
        self.author == "user"
    }

    /// Plain text of this event, empty when it has none.
    pub fn plain_text(&self) -> String {
        self.content.as_ref().map(Content::joined_text).unwrap_or_default()
    }
}

/// A session: the append-only event log plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(flatten)]
    pub key: SessionKey,
    pub events: Vec<SessionEvent>,
    pub last_update: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self { key, events: Vec::new(), last_update: Utc::now() }
    }

    pub fn append(&mut self, event: SessionEvent) {
        self.events.push(event);
        self.last_update = Utc::now();
    }

    /// Most recent event authored by `"user"`.
    pub fn last_user_event(&self) -> Option<&SessionEvent> {
        self.events.iter().rev().find(|e| e.is_user())
    }

    /// Most recent event authored by anything but `"user"`/`"system"`.
    pub fn last_assistant_event(&self) -> Option<&SessionEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| !e.is_user() && e.author != "system")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builds_relative_path() {
        let key = SessionKey::new("myapp", "alice", "20260801-120000");
        assert_eq!(
            key.rel_path(),
            std::path::PathBuf::from("myapp/alice/20260801-120000.json")
        );
    }

    #[test]
    fn event_round_trips_through_json() {
        let ev = SessionEvent::new(
            "assistant",
            Content {
                role: "model".into(),
                parts: vec![
                    Part::Text { text: "calling".into() },
                    Part::FunctionCall {
                        id: "c1".into(),
                        name: "read_file".into(),
                        args: serde_json::json!({"path": "a.txt"}),
                    },
                ],
            },
        );
        let json = serde_json::to_string(&ev).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.author, "assistant");
        assert_eq!(back.content.unwrap().parts.len(), 2);
    }

    #[test]
    fn last_user_and_assistant_events() {
        let mut session = Session::new(SessionKey::new("a", "u", "s1"));
        session.append(SessionEvent::text("user", "user", "first"));
        session.append(SessionEvent::text("coder", "model", "reply"));
        session.append(SessionEvent::text("system", "system", "summary"));
        session.append(SessionEvent::text("user", "user", "second"));

        assert_eq!(session.last_user_event().unwrap().plain_text(), "second");
        assert_eq!(session.last_assistant_event().unwrap().plain_text(), "reply");
    }

    #[test]
    fn escalate_flag_omitted_when_false() {
        let ev = SessionEvent::text("coder", "model", "x");
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json["actions"].get("escalate").is_none());
    }
}
