//! Error types for engine configuration and hydration

#[derive(Debug)]
pub enum EngineError {
    /// Rejected rule set or window configuration; the previous one stays active
    InvalidConfig(String),
    /// `start()` was called outside a Tokio runtime
    SchedulerUnavailable,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            EngineError::SchedulerUnavailable => {
                write!(f, "Eviction scheduler requires a running Tokio runtime")
            }
        }
    }
}

impl std::error::Error for EngineError {}

#[derive(Debug)]
pub enum HydrateError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Fetch(String),
}

impl From<std::io::Error> for HydrateError {
    fn from(err: std::io::Error) -> Self {
        HydrateError::Io(err)
    }
}

impl From<serde_json::Error> for HydrateError {
    fn from(err: serde_json::Error) -> Self {
        HydrateError::Parse(err)
    }
}

impl std::fmt::Display for HydrateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HydrateError::Io(e) => write!(f, "IO error: {}", e),
            HydrateError::Parse(e) => write!(f, "Snapshot parse error: {}", e),
            HydrateError::Fetch(msg) => write!(f, "Snapshot fetch failed: {}", msg),
        }
    }
}

impl std::error::Error for HydrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HydrateError::Io(e) => Some(e),
            HydrateError::Parse(e) => Some(e),
            HydrateError::Fetch(_) => None,
        }
    }
}
