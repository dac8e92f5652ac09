#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("cycle detected: prism {label} read its own value while computing")]
    Cycle { label: String },

    #[error(
        "tick flush did not settle after {passes} passes (still pending: {})",
        .labels.join(", ")
    )]
    RunawayFlush { passes: usize, labels: Vec<String> },

    #[error("ticker {label} was ticked from inside its own flush")]
    ReentrantTick { label: String },

    #[error("prism {label} finished refreshing without a value")]
    Unsettled { label: String },

    #[error("{message}")]
    Compute { message: String },
}

impl Error {
    /// Failure raised by a compute function.
    #[must_use]
    pub fn compute(message: impl Into<String>) -> Self {
        Self::Compute {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runaway_message_lists_pending_labels() {
        let err = Error::RunawayFlush {
            passes: 10,
            labels: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "tick flush did not settle after 10 passes (still pending: a, b)"
        );
    }

    #[test]
    fn compute_error_displays_message() {
        let err = Error::compute("bad input");
        assert_eq!(err.to_string(), "bad input");
        assert!(!err.is_cycle());
        assert!(Error::Cycle { label: "x".into() }.is_cycle());
    }
}
