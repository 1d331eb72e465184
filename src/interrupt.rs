// interrupt.rs - Cooperative cancellation
//
// Ctrl-C (and termination signals) set a process-wide flag instead of
// killing the process outright. Long-running loops call check() at their
// suspension points: per member while adding or extracting, per chunk while
// decompressing. Once the flag is set the operation unwinds with an
// Interrupted io error, so scoped handles close and staged temp files are
// removed on the way out; the CLI maps the error to exit code 130.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{TzstError, TzstResult};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the process-wide signal handler.
///
/// Called once at the CLI entry point; a second call fails. Library
/// embedders with their own signal setup can call [`request`] from their
/// handler instead.
pub fn install_handler() -> TzstResult<()> {
    ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
    })
    .map_err(|e| TzstError::Runtime(format!("failed to install signal handler: {e}")))
}

/// Ask in-flight operations to stop at their next suspension point.
pub fn request() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Clear a pending cancellation request (start of a new command).
pub fn clear() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Whether cancellation has been requested and not yet cleared.
pub fn is_requested() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fail with an Interrupted io error if cancellation was requested.
pub(crate) fn check() -> TzstResult<()> {
    guard(&INTERRUPTED)
}

fn guard(flag: &AtomicBool) -> TzstResult<()> {
    if flag.load(Ordering::SeqCst) {
        Err(TzstError::Io(io::Error::new(
            io::ErrorKind::Interrupted,
            "operation interrupted",
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_passes_when_flag_clear() {
        let flag = AtomicBool::new(false);
        assert!(guard(&flag).is_ok());
    }

    #[test]
    fn test_guard_fails_with_interrupted_kind() {
        let flag = AtomicBool::new(true);
        match guard(&flag) {
            Err(TzstError::Io(error)) => {
                assert_eq!(error.kind(), io::ErrorKind::Interrupted);
            }
            other => panic!("expected Interrupted io error, got {other:?}"),
        }
    }

    #[test]
    fn test_no_request_pending_by_default() {
        assert!(!is_requested());
        assert!(check().is_ok());
    }
}
