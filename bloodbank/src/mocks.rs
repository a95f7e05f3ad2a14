//! Test doubles for collaborators outside the engine.

use crate::error::{BloodBankError, Result};
use crate::inventory::{InMemoryInventoryStore, InventoryStore, UnitQuery};
use crate::notification::{Notification, Notifier, NotifyError};
use crate::types::{Actor, InventoryUnit, TestPanel, UnitId, UnitTransition};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Notifier that records everything it is asked to send.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail: bool,
}

impl RecordingNotifier {
    /// Create a recording notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails (after recording the attempt).
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            fail: true,
        }
    }

    /// Notifications received so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Event names received so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<&'static str> {
        self.sent().iter().map(Notification::event).collect()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            self.sent
                .lock()
                .map_err(|_| NotifyError::Delivery("recorder lock poisoned".to_string()))?
                .push(notification);
            if self.fail {
                return Err(NotifyError::Delivery("recording notifier set to fail".to_string()));
            }
            Ok(())
        })
    }
}

/// In-memory inventory that lets a test interfere with the engine's writes.
///
/// Two faults can be arranged: another writer changing a unit between a
/// query and the writes that follow it, and the store failing status
/// transitions after a number of successful ones.
#[derive(Debug, Clone, Default)]
pub struct FaultyInventoryStore {
    inner: InMemoryInventoryStore,
    after_query: Arc<Mutex<Vec<(UnitId, UnitTransition)>>>,
    writes_left: Arc<Mutex<Option<usize>>>,
}

impl FaultyInventoryStore {
    /// Create an empty store with no faults armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `transition` to `unit_id` right after the next query has taken
    /// its snapshot, as a concurrent writer would.
    pub fn interfere_after_query(&self, unit_id: UnitId, transition: UnitTransition) {
        if let Ok(mut pending) = self.after_query.lock() {
            pending.push((unit_id, transition));
        }
    }

    /// Let `writes` more status transitions through, then fail every one
    /// with a storage error.
    pub fn fail_transitions_after(&self, writes: usize) {
        if let Ok(mut left) = self.writes_left.lock() {
            *left = Some(writes);
        }
    }

    /// Stop failing transitions.
    pub fn heal(&self) {
        if let Ok(mut left) = self.writes_left.lock() {
            *left = None;
        }
    }
}

impl InventoryStore for FaultyInventoryStore {
    fn insert(&self, unit: InventoryUnit) -> impl Future<Output = Result<InventoryUnit>> + Send {
        self.inner.insert(unit)
    }

    fn get(&self, id: UnitId) -> impl Future<Output = Result<InventoryUnit>> + Send {
        self.inner.get(id)
    }

    fn transition(
        &self,
        id: UnitId,
        transition: UnitTransition,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<InventoryUnit>> + Send {
        let inner = self.inner.clone();
        let writes_left = Arc::clone(&self.writes_left);

        async move {
            {
                let mut left = writes_left.lock().map_err(|_| BloodBankError::poisoned())?;
                if let Some(left) = left.as_mut() {
                    if *left == 0 {
                        return Err(BloodBankError::Storage(
                            "injected transition failure".to_string(),
                        ));
                    }
                    *left -= 1;
                }
            }
            inner.transition(id, transition, actor, at).await
        }
    }

    fn query(&self, query: UnitQuery) -> impl Future<Output = Result<Vec<InventoryUnit>>> + Send {
        let inner = self.inner.clone();
        let after_query = Arc::clone(&self.after_query);

        async move {
            let snapshot = inner.query(query).await?;
            let writes = after_query
                .lock()
                .map(|mut pending| std::mem::take(&mut *pending))
                .unwrap_or_default();
            for (id, transition) in writes {
                inner.transition(id, transition, Actor::System, Utc::now()).await?;
            }
            Ok(snapshot)
        }
    }

    fn update_test_results(
        &self,
        id: UnitId,
        panel: TestPanel,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<InventoryUnit>> + Send {
        self.inner.update_test_results(id, panel, actor, at)
    }

    fn delete(&self, id: UnitId) -> impl Future<Output = Result<InventoryUnit>> + Send {
        self.inner.delete(id)
    }
}
