use thiserror::Error;

#[derive(Error, Debug)]
pub enum OwnerGraphError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl OwnerGraphError {
    /// Input/config errors abort a run; everything else is contained.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            OwnerGraphError::Config(_)
                | OwnerGraphError::Validation(_)
                | OwnerGraphError::UnknownCategory(_)
        )
    }
}
