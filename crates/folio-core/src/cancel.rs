use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::FolioError;
use crate::FolioResult;

/// Cooperative cancellation flag shared between a caller and running solvers.
///
/// Clones observe the same flag. The simulator calls [`CancelToken::check`]
/// once per period and the optimizers before every solve; both unwind with
/// [`FolioError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn check(&self) -> FolioResult<()> {
        if self.is_cancelled() {
            Err(FolioError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(other.check().is_ok());
        token.cancel();
        assert!(other.is_cancelled());
        assert!(matches!(other.check(), Err(FolioError::Cancelled)));
    }
}
