use serde::{Deserialize, Serialize};

/// Name/email pair attached to commits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Display name for the individual.
    pub name: String,
    /// Email address recorded on commits.
    pub email: String,
}

impl Identity {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A commit created in (or read from) a workspace repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Full object identifier (hex git SHA).
    pub id: String,
    /// Complete commit message.
    pub message: String,
    /// Author of the commit.
    pub author: Identity,
    /// Paths touched by the commit, relative to the repository root, sorted.
    #[serde(default)]
    pub files: Vec<String>,
    /// Unix timestamp (seconds) of the commit.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl Commit {
    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_round_trip() {
        let commit = Commit {
            id: "0123456789abcdef0123456789abcdef01234567".into(),
            message: "Add example module\n\nLonger body.".into(),
            author: Identity::new("Example Author", "author@example.com"),
            files: vec!["src/lib.rs".into(), "src/main.rs".into()],
            timestamp: Some(1_690_000_000),
        };

        let json = serde_json::to_string(&commit).expect("serialize commit");
        let decoded: Commit = serde_json::from_str(&json).expect("deserialize commit");
        assert_eq!(commit, decoded);
    }

    #[test]
    fn commit_defaults() {
        let json = r#"{
            "id": "fedcba9876543210fedcba9876543210fedcba98",
            "message": "Initial commit",
            "author": {"name": "Test", "email": "test@example.com"}
        }"#;

        let commit: Commit = serde_json::from_str(json).expect("deserialize commit");
        assert!(commit.files.is_empty());
        assert!(commit.timestamp.is_none());
    }

    #[test]
    fn summary_is_first_line() {
        let commit = Commit {
            id: "1".into(),
            message: "Subject line\n\nBody".into(),
            author: Identity::new("a", "b"),
            files: Vec::new(),
            timestamp: None,
        };
        assert_eq!(commit.summary(), "Subject line");
    }
}
