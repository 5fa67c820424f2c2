//! Error types for the reactive engine.
//!
//! Graph-integrity violations (cycles, writes from inside a derived
//! computation) are reported at the point where they happen. Effect failures
//! are wrapped and handed back to whichever write or batch triggered the run.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised by the reactive engine.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// A memo was read again while it was still computing.
    ///
    /// `path` lists the computations on the evaluation stack, starting and
    /// ending with the memo that was re-entered.
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    /// A signal was written from inside a memo's compute function.
    #[error("signal `{signal}` written from inside derived computation `{derived}`")]
    ReentrantWrite { signal: String, derived: String },

    /// An effect body returned an error.
    #[error("effect `{effect}` failed: {source}")]
    EffectExecution {
        effect: String,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },

    /// A single flush executed more effects than the configured limit.
    #[error("effect flush exceeded {limit} runs; an effect keeps re-triggering itself")]
    FlushLimitExceeded { limit: usize },

    /// An async effect was started outside of a tokio runtime.
    #[error("async effect `{effect}` requires a running tokio runtime")]
    NoAsyncRuntime { effect: String },
}

impl ReactiveError {
    pub(crate) fn effect(effect: impl Into<String>, err: anyhow::Error) -> Self {
        let boxed: Box<dyn StdError + Send + Sync> = err.into();
        ReactiveError::EffectExecution {
            effect: effect.into(),
            source: Arc::from(boxed),
        }
    }

    /// Returns `true` for errors that indicate a broken graph invariant.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            ReactiveError::CyclicDependency { .. } | ReactiveError::ReentrantWrite { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_joins_path() {
        let err = ReactiveError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn effect_error_keeps_source() {
        let err = ReactiveError::effect("save", anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "effect `save` failed: disk full");
        assert!(!err.is_integrity_violation());
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("disk full"));
    }
}
