//! Declarative view status, mapped to presentation by the renderer.

use serde::{Deserialize, Serialize};

/// Message shown for any failed load.
pub const LOAD_ERROR_MESSAGE: &str = "Error loading the data.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ViewStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    /// Ready and polling for new data.
    Following,
    /// The last load failed; holds the underlying error.
    Failed(String),
}

impl ViewStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, ViewStatus::Failed(_))
    }

    /// Status line for the user, if any.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            ViewStatus::Failed(_) => Some(LOAD_ERROR_MESSAGE),
            _ => None,
        }
    }
}

impl std::fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewStatus::Idle => write!(f, "idle"),
            ViewStatus::Loading => write!(f, "loading"),
            ViewStatus::Ready => write!(f, "ready"),
            ViewStatus::Following => write!(f, "following"),
            ViewStatus::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}
