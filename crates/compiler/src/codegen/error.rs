//! Code generation error types.

/// Error type for emission.
///
/// Emission failures are invariant violations: the analyser guarantees a
/// well-formed IR, so anything that goes wrong here is an internal
/// compiler error and aborts the unit.
#[derive(Debug)]
pub enum CodeGenError {
    /// A broken invariant (unresolved place, missing type, …).
    Internal(String),
    /// A formatting error while writing output text.
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Internal(s) => write!(f, "internal compiler error: {}", s),
            CodeGenError::Format(e) => write!(f, "internal compiler error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Internal(s)
    }
}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}
