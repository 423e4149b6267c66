pub use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};

/// Checked at operation entry and before each backend round-trip.
pub fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::cancelled())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn test_fresh_token_passes() {
        let cancel = CancellationToken::new();
        assert!(ensure_not_cancelled(&cancel).is_ok());
    }

    #[test]
    fn test_cancelled_token_fails() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ensure_not_cancelled(&cancel).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
