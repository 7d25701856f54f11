use thiserror::Error;

/// Errors raised by the masking and accounting engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PixelsError {
    /// Contradictory or invalid parameter combination. Always a caller bug.
    #[error("invalid `{parameter}`: {reason}")]
    Configuration {
        parameter: &'static str,
        reason: String,
    },

    /// Raw band array does not follow the (band, row, column) layout.
    #[error("type compatibility: {0}")]
    TypeCompatibility(String),

    /// Configuration file could not be read or parsed.
    #[error("config file {path}: {reason}")]
    ConfigFile { path: String, reason: String },

    /// Statistics payload lacks a key the parser depends on.
    #[error("statistics response is missing `{0}`")]
    MissingKey(String),

    /// Statistics payload has the key but the value has the wrong shape.
    #[error("malformed statistics payload: {0}")]
    MalformedPayload(String),
}

impl PixelsError {
    pub fn configuration(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            parameter,
            reason: reason.into(),
        }
    }

    /// Whether an orchestration layer may retry the call that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MissingKey(_) | Self::MalformedPayload(_))
    }
}

pub type Result<T> = std::result::Result<T, PixelsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_message_names_parameter() {
        let e = PixelsError::configuration("assets", "cannot carry a mask");
        assert_eq!(e.to_string(), "invalid `assets`: cannot carry a mask");
        assert!(!e.is_transient());
    }

    #[test]
    fn payload_errors_are_transient() {
        assert!(PixelsError::MissingKey("statistics".into()).is_transient());
        assert!(PixelsError::MalformedPayload("min".into()).is_transient());
        assert!(!PixelsError::TypeCompatibility("2 dims".into()).is_transient());
    }
}
