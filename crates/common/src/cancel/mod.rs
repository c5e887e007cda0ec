//! Cooperative cancellation for pipeline runs
//!
//! A token is checked before each external call. Calls already in flight
//! are allowed to finish so the index is never left half-written.

use crate::errors::{AppError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag shared between a caller and one pipeline run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` if cancellation was requested before `operation`
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled { operation: operation.to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(observer.check("embed").is_ok());

        token.cancel();
        let err = observer.check("embed").unwrap_err();
        assert_eq!(err.to_string(), "Cancelled before embed");
    }
}
