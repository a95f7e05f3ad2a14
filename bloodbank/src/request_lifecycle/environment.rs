//! Environment for the request lifecycle reducer.

use crate::notification::Notifier;
use bloodbank_core::environment::Clock;
use std::sync::Arc;

/// Dependencies the request reducer reads.
///
/// Tests use `FixedClock` and `RecordingNotifier`.
pub trait RequestEnvironment: Send + Sync {
    /// Clock for processed-at and updated-at stamps.
    fn clock(&self) -> &dyn Clock;

    /// Dispatcher for request notifications.
    fn notifier(&self) -> Arc<dyn Notifier>;
}

/// Production environment for the request lifecycle.
#[derive(Clone)]
pub struct ProductionRequestEnvironment {
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl ProductionRequestEnvironment {
    /// Create a new environment.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self { clock, notifier }
    }
}

impl RequestEnvironment for ProductionRequestEnvironment {
    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }
}
