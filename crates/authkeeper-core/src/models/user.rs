use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form metadata attached to a user by the authority.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Profile snapshot as reported by the authority.
/// Never mutated locally; a newer snapshot replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub user_metadata: Metadata,
    #[serde(default)]
    pub app_metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Display name from `user_metadata.full_name`, falling back to the email
    pub fn display_name(&self) -> &str {
        self.user_metadata
            .get("full_name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.email)
    }
}
