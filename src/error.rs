//! Error taxonomy of the sandbox layer.

use thiserror::Error;

/// Errors raised by the sandbox support layer.
///
/// Loading failures are normally swallowed by [`crate::load_all`] and only
/// surface through the [`crate::LoadReport`]; the variants still carry enough
/// context to be logged meaningfully.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Network/HTTP or filesystem failure while fetching an artifact
    #[error("Failed to fetch '{location}': {reason}")]
    Fetch { location: String, reason: String },

    /// Location is outside the allowed origins
    #[error("Fetch blocked: origin '{origin}' is not in the allowlist")]
    OriginBlocked { origin: String },

    /// The fetched library threw while being instantiated
    #[error("Evaluating '{module}' failed: {reason}")]
    Evaluation { module: String, reason: String },

    /// The library ran but did not expose its global binding
    #[error("Module '{module}' did not expose a global named '{binding}'")]
    MissingBinding { module: String, binding: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid share payload: {0}")]
    SharePayload(String),

    /// TypeScript source could not be parsed or stripped of its types
    #[error("TypeScript error: {0}")]
    Transpile(String),

    #[error("Snippet timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_config_errors() {
        let err: SandboxError = serde_json::from_str::<Vec<String>>("{").unwrap_err().into();
        assert!(matches!(err, SandboxError::Config(_)));
        assert!(err.to_string().starts_with("Configuration error: "));
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            SandboxError::Transpile("Expected ';'".to_string()).to_string(),
            "TypeScript error: Expected ';'"
        );
        assert_eq!(
            SandboxError::Timeout { ms: 250 }.to_string(),
            "Snippet timed out after 250ms"
        );
        let err = SandboxError::from(anyhow::anyhow!("Uncaught boom"));
        assert_eq!(err.to_string(), "Uncaught boom");
    }
}
