use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("send to endpoint {endpoint} failed: {reason}")]
    Send { endpoint: String, reason: String },

    #[error("state file i/o: {0}")]
    StateIo(#[from] std::io::Error),

    #[error("state file parse: {0}")]
    StateParse(#[from] serde_json::Error),
}
