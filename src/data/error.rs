//! Error type shared by the data source clients.

/// Errors surfaced by a market data source after retries are exhausted.
#[derive(Debug, Clone)]
pub enum SourceError {
    /// HTTP-level failure with a known status code
    Http { status: u16, message: String },
    /// Transport failure before a status code was available
    Network(String),
    /// The payload could not be decoded into the expected shape
    Parse(String),
    /// All retry attempts were consumed
    Exhausted { status: Option<u16>, attempts: u32 },
}

impl SourceError {
    /// Whether the retry policy would consider this failure transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) => true,
            Self::Parse(_) => false,
            Self::Exhausted { .. } => false,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Exhausted { status, .. } => *status,
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http { status, message } => {
                write!(f, "HTTP {} error: {}", status, message)
            }
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Parse(msg) => write!(f, "Parse error: {}", msg),
            Self::Exhausted { status, attempts } => match status {
                Some(s) => write!(f, "Gave up after {} attempts (last status {})", attempts, s),
                None => write!(f, "Gave up after {} attempts", attempts),
            },
        }
    }
}

impl std::error::Error for SourceError {}
