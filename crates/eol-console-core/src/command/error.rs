//! Command errors

use thiserror::Error;

use super::flight::FlightClass;
use crate::oplog::LogLevel;
use crate::transport::TransportError;

/// Why a command did not succeed
#[derive(Error, Debug)]
pub enum CommandError {
    /// Parameter out of range; never reaches the transport
    #[error("{reason}")]
    Validation { reason: String },

    #[error("Refused: {reason}")]
    SafetyRefusal { reason: String },

    #[error("Busy: {class} command already in progress")]
    Busy { class: FlightClass },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered `ok = false`
    #[error("{reason}")]
    Remote { reason: String },

    #[error("Timed out waiting for the component to settle")]
    Timeout,

    #[error("Cancelled by operator")]
    Cancelled,
}

impl CommandError {
    /// Operator log level for this failure
    pub fn log_level(&self) -> LogLevel {
        match self {
            CommandError::Validation { .. } | CommandError::Busy { .. } => LogLevel::Info,
            CommandError::Cancelled => LogLevel::Info,
            CommandError::SafetyRefusal { .. } => LogLevel::Safety,
            CommandError::Transport(_) | CommandError::Remote { .. } => LogLevel::Error,
            CommandError::Timeout => LogLevel::Warning,
        }
    }

    /// Whether the operator gets a notification in addition to the log
    /// entry
    pub fn notifies(&self) -> bool {
        !matches!(self, CommandError::Busy { .. } | CommandError::Cancelled)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, CommandError::Busy { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert_eq!(
            CommandError::Validation { reason: "x".into() }.log_level(),
            LogLevel::Info
        );
        assert_eq!(
            CommandError::SafetyRefusal { reason: "x".into() }.log_level(),
            LogLevel::Safety
        );
        assert_eq!(
            CommandError::Remote { reason: "x".into() }.log_level(),
            LogLevel::Error
        );
        assert_eq!(CommandError::Timeout.log_level(), LogLevel::Warning);
        assert_eq!(
            CommandError::from(TransportError::Timeout).log_level(),
            LogLevel::Error
        );
    }

    #[test]
    fn test_busy_message() {
        let err = CommandError::Busy {
            class: FlightClass::RobotMotion,
        };
        assert_eq!(err.to_string(), "Busy: robot motion command already in progress");
        assert!(!err.notifies());
    }
}
