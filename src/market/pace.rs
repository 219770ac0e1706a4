use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Provider-level call spacing gate. Every request to a provider passes
/// through its gate, regardless of which dataset triggered it, so a burst of
/// simultaneously-due refresh jobs cannot exceed the provider's rate limit.
///
/// The lock is held across the wait: queued callers drain one per spacing
/// window, in arrival order.
#[derive(Debug)]
pub struct PaceGate {
    min_spacing: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl PaceGate {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_call: Mutex::new(None),
        }
    }

    /// Waits until the provider may be called again, then claims the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
