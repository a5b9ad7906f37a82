use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectionError {
    /// A hard, non-relaxable constraint (explicit GPU type or an unmet
    /// dynamic port count) cannot be satisfied by any candidate node.
    /// Always transient; the caller should retry the placement later.
    #[error("Resources are not currently available: {0}")]
    ResourcesNotAvailable(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SelectionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SelectionError::ResourcesNotAvailable(_))
    }
}

impl From<serde_json::Error> for SelectionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<String> for SelectionError {
    fn from(e: String) -> Self {
        Self::InvalidConfiguration(e)
    }
}

impl From<&str> for SelectionError {
    fn from(e: &str) -> Self {
        Self::InvalidConfiguration(e.to_string())
    }
}
