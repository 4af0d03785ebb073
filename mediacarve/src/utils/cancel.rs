use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Coarse cancellation signal shared between a scan and whoever started it.
///
/// The carve loop polls it once per candidate and the H.264 slice decoder
/// between macroblocks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
