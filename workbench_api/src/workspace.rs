use serde::{Deserialize, Serialize};

/// A named checkout registered under the base directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    /// Workspace name, unique per base directory.
    pub name: String,
    /// Absolute path to the repository checkout (`<base>/ws/<name>/<repo>`).
    pub path: String,
}

impl WorkspaceInfo {
    /// Create a new workspace descriptor.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_info_serializes_fields() {
        let info = WorkspaceInfo::new("ws1", "/tmp/base/ws/ws1/repo");
        let json = serde_json::to_string(&info).expect("serialize workspace");
        assert_eq!(json, r#"{"name":"ws1","path":"/tmp/base/ws/ws1/repo"}"#);
    }
}
