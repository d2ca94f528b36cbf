//! Wire types for change notifications delivered to viewers.
//!
//! Every payload on the event bus is a serialized [`ChangeNotification`]:
//!
//! ```json
//! {"kind":"added","path":"notes/today.md","actorId":"session-42"}
//! ```

use serde::{Deserialize, Serialize};

/// What happened to the path in a [`ChangeNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A document joined the whitelist.
    Added,
    /// A document left the whitelist.
    Removed,
    /// The open document's content changed.
    Modified,
    /// Stream-level status, sent as the first frame of every connection.
    ConnectionStatus,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::ConnectionStatus => "connection_status",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single change published through the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub kind: ChangeKind,

    /// Root-relative path with `/` separators, or absolute when outside the root.
    pub path: String,

    /// External actor that last touched the file, when correlated in time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
}

impl ChangeNotification {
    pub fn new(kind: ChangeKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            actor_id: None,
        }
    }

    #[must_use]
    pub fn with_actor(mut self, actor_id: Option<String>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn added(path: impl Into<String>) -> Self {
        Self::new(ChangeKind::Added, path)
    }

    pub fn removed(path: impl Into<String>) -> Self {
        Self::new(ChangeKind::Removed, path)
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self::new(ChangeKind::Modified, path)
    }

    /// The status frame a stream opens with; `path` carries the watched root.
    pub fn connected(root: impl Into<String>) -> Self {
        Self::new(ChangeKind::ConnectionStatus, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_omits_missing_actor() {
        let json = serde_json::to_string(&ChangeNotification::removed("a/b.md")).unwrap();
        assert_eq!(json, r#"{"kind":"removed","path":"a/b.md"}"#);

        let json = serde_json::to_string(
            &ChangeNotification::added("a/d.md").with_actor(Some("s-1".to_string())),
        )
        .unwrap();
        assert_eq!(json, r#"{"kind":"added","path":"a/d.md","actorId":"s-1"}"#);
    }

    #[test]
    fn connection_status_uses_snake_case() {
        let json = serde_json::to_value(ChangeNotification::connected("/home/u")).unwrap();
        assert_eq!(json["kind"], "connection_status");
        assert_eq!(ChangeKind::ConnectionStatus.to_string(), "connection_status");
    }

    #[test]
    fn deserializes_without_actor() {
        let parsed: ChangeNotification =
            serde_json::from_str(r#"{"kind":"modified","path":"x.md"}"#).unwrap();
        assert_eq!(parsed, ChangeNotification::modified("x.md"));
    }
}
