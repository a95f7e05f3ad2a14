//! Store for the request lifecycle.
//!
//! The store owns the request ledger and drives the allocation engine: it
//! does the inventory work a command needs, then dispatches the outcome to
//! the reducer. Effects returned by the reducer run after the ledger lock has
//! been dropped.

use crate::allocation::{AllocatedLot, AllocationEngine, ShortfallPolicy};
use crate::error::{BloodBankError, Result};
use crate::inventory::InventoryStore;
use crate::metrics;
use crate::notification::LowStockThresholds;
use crate::request_lifecycle::environment::{ProductionRequestEnvironment, RequestEnvironment};
use crate::request_lifecycle::types::{
    BloodRequest, NewRequest, RequestCommand, RequestLedger, RequestStatus, Urgency,
};
use crate::request_lifecycle::{RequestAction, RequestReducer};
use crate::types::{Actor, BloodType, RequestId};
use bloodbank_core::{effect::Effect, reducer::Reducer};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// Store for blood requests.
pub struct RequestLifecycleStore<S> {
    state: Arc<RwLock<RequestLedger>>,
    reducer: RequestReducer,
    env: ProductionRequestEnvironment,
    engine: AllocationEngine<S>,
    thresholds: LowStockThresholds,
    in_flight: Mutex<HashSet<RequestId>>,
}

/// Marks one request as being transitioned; cleared on drop.
pub(super) struct InFlight<'a> {
    set: &'a Mutex<HashSet<RequestId>>,
    request_id: RequestId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.request_id);
        }
    }
}

impl<S: InventoryStore> RequestLifecycleStore<S> {
    /// Create a store over `engine`.
    #[must_use]
    pub fn new(
        engine: AllocationEngine<S>,
        env: ProductionRequestEnvironment,
        thresholds: LowStockThresholds,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(RequestLedger::new())),
            reducer: RequestReducer::new(),
            env,
            engine,
            thresholds,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Submit a new request.
    ///
    /// A low-urgency request is approved on the spot when the shelf currently
    /// holds enough eligible units of its type. Nothing is reserved; the
    /// stock is allocated at fulfilment.
    ///
    /// # Errors
    ///
    /// - [`BloodBankError::Validation`] for out-of-range input
    /// - [`BloodBankError::Storage`] if the stock check fails
    pub async fn create(&self, request: NewRequest) -> Result<BloodRequest> {
        let now = self.env.clock().now();
        request.validate(now)?;

        let auto_approve = request.urgency == Urgency::Low
            && self.engine.available_units(request.blood_type, now).await?
                >= request.units_required;

        let request_id = RequestId::new();
        tracing::info!(
            %request_id,
            blood_type = %request.blood_type,
            units = request.units_required,
            urgency = ?request.urgency,
            auto_approve,
            "Request submitted"
        );

        let created = self
            .dispatch(
                request_id,
                RequestAction::Submit {
                    request_id,
                    request,
                    auto_approve,
                },
            )
            .await?;
        metrics::record_request_status(created.status);
        Ok(created)
    }

    /// Apply an operator command to a request.
    ///
    /// Transitions on the same request are serialised: a second command
    /// arriving while one is in progress fails with a conflict.
    ///
    /// # Errors
    ///
    /// - [`BloodBankError::NotFound`] if the request is unknown
    /// - [`BloodBankError::Conflict`] for an illegal transition or a
    ///   concurrent one
    /// - [`BloodBankError::InsufficientStock`] if approval or a fulfilment
    ///   top-up cannot be covered; the request keeps its status
    /// - [`BloodBankError::Validation`] for a missing rejection reason
    pub async fn transition(
        &self,
        request_id: RequestId,
        command: RequestCommand,
        actor: Actor,
    ) -> Result<BloodRequest> {
        let _guard = self.begin(request_id)?;
        let current = self.get(request_id).await?;
        tracing::debug!(%request_id, command = command.name(), status = %current.status, "Applying command");

        let updated = match command {
            RequestCommand::Approve { accept_partial } => {
                self.approve(current, accept_partial, actor).await?
            },
            RequestCommand::Reject { reason } => {
                self.dispatch(
                    request_id,
                    RequestAction::Reject {
                        request_id,
                        actor,
                        reason,
                    },
                )
                .await?
            },
            RequestCommand::Cancel => self.cancel(current, actor).await?,
            RequestCommand::Fulfill => self.fulfill(current, actor).await?,
        };

        metrics::record_request_status(updated.status);
        tracing::info!(%request_id, status = %updated.status, %actor, "Request transitioned");
        Ok(updated)
    }

    /// Look up a request.
    ///
    /// # Errors
    ///
    /// [`BloodBankError::NotFound`] if the request is unknown.
    pub async fn get(&self, request_id: RequestId) -> Result<BloodRequest> {
        self.state
            .read()
            .await
            .get(&request_id)
            .cloned()
            .ok_or_else(|| BloodBankError::not_found("request", request_id))
    }

    /// Requests filtered by status and type, oldest first.
    pub async fn list(
        &self,
        status: Option<RequestStatus>,
        blood_type: Option<BloodType>,
    ) -> Vec<BloodRequest> {
        let state = self.state.read().await;
        let mut requests: Vec<BloodRequest> = state
            .iter()
            .filter(|request| status.is_none_or(|status| request.status == status))
            .filter(|request| blood_type.is_none_or(|blood_type| request.blood_type == blood_type))
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        requests
    }

    /// Snapshot of the ledger.
    pub async fn state(&self) -> RequestLedger {
        self.state.read().await.clone()
    }

    /// The allocation engine the store drives.
    #[must_use]
    pub const fn engine(&self) -> &AllocationEngine<S> {
        &self.engine
    }

    async fn approve(
        &self,
        current: BloodRequest,
        accept_partial: bool,
        actor: Actor,
    ) -> Result<BloodRequest> {
        ensure_transition(&current, RequestStatus::Approved, "approve")?;

        let now = self.env.clock().now();
        let policy = if accept_partial {
            ShortfallPolicy::AcceptPartial
        } else {
            ShortfallPolicy::Reject
        };
        let before = self.engine.available_units(current.blood_type, now).await?;
        let allocation = self
            .engine
            .allocate(
                current.id,
                current.blood_type,
                current.units_required,
                policy,
                actor,
                now,
            )
            .await?;

        let approved = self
            .dispatch_or_release(
                &current,
                RequestAction::Approve {
                    request_id: current.id,
                    actor,
                    lots: allocation.lots.clone(),
                },
                &allocation.lots,
                actor,
            )
            .await?;

        self.check_low_stock(current.blood_type, before).await;
        Ok(approved)
    }

    /// Lots are returned to the shelf before the cancellation is recorded.
    /// If the release fails the request keeps its status and the cancel can
    /// be retried; lots released on the first attempt are skipped.
    async fn cancel(&self, current: BloodRequest, actor: Actor) -> Result<BloodRequest> {
        ensure_transition(&current, RequestStatus::Cancelled, "cancel")?;

        // Lots of a partially fulfilled request are already used
        let holds_lots =
            current.status == RequestStatus::Approved && !current.allocated_blood.is_empty();
        if holds_lots {
            let now = self.env.clock().now();
            let released = self
                .engine
                .release(current.id, &current.allocated_blood, actor, now)
                .await?;
            tracing::info!(request_id = %current.id, released, "Reserved lots returned to shelf");
        }

        let cancelled = self
            .dispatch(
                current.id,
                RequestAction::Cancel {
                    request_id: current.id,
                    actor,
                },
            )
            .await?;
        if holds_lots {
            self.report_stock(current.blood_type).await;
        }
        Ok(cancelled)
    }

    async fn fulfill(&self, current: BloodRequest, actor: Actor) -> Result<BloodRequest> {
        if !matches!(
            current.status,
            RequestStatus::Approved | RequestStatus::PartiallyFulfilled
        ) {
            return Err(BloodBankError::conflict(
                "request",
                current.id,
                current.status,
                format!("cannot fulfill a {} request", current.status),
            ));
        }

        let now = self.env.clock().now();
        let top_up = current.outstanding() > 0
            && (current.status == RequestStatus::PartiallyFulfilled
                || (current.auto_approved && current.allocated_blood.is_empty()));

        let before = self.engine.available_units(current.blood_type, now).await?;
        let additional_lots = if top_up {
            tracing::info!(
                request_id = %current.id,
                outstanding = current.outstanding(),
                "Allocating at fulfilment"
            );
            self.engine
                .allocate(
                    current.id,
                    current.blood_type,
                    current.outstanding(),
                    ShortfallPolicy::Reject,
                    actor,
                    now,
                )
                .await?
                .lots
        } else {
            Vec::new()
        };

        let mut to_consume = additional_lots.clone();
        if current.status == RequestStatus::Approved {
            to_consume.extend(current.allocated_blood.iter().cloned());
        }

        if let Err(error) = self
            .engine
            .consume(current.id, &to_consume, actor, now)
            .await
        {
            self.release_quietly(current.id, &additional_lots, actor).await;
            return Err(error);
        }

        let fulfilled = self
            .dispatch(
                current.id,
                RequestAction::Fulfill {
                    request_id: current.id,
                    actor,
                    additional_lots,
                },
            )
            .await?;

        if top_up {
            self.check_low_stock(current.blood_type, before).await;
        }
        Ok(fulfilled)
    }

    /// Dispatch, releasing `lots` if the reducer refuses.
    async fn dispatch_or_release(
        &self,
        current: &BloodRequest,
        action: RequestAction,
        lots: &[AllocatedLot],
        actor: Actor,
    ) -> Result<BloodRequest> {
        match self.dispatch(current.id, action).await {
            Ok(request) => Ok(request),
            Err(error) => {
                tracing::warn!(request_id = %current.id, %error, "Request refused after reservation, releasing");
                self.release_quietly(current.id, lots, actor).await;
                Err(error)
            },
        }
    }

    async fn release_quietly(&self, request_id: RequestId, lots: &[AllocatedLot], actor: Actor) {
        if lots.is_empty() {
            return;
        }
        let now = self.env.clock().now();
        if let Err(error) = self.engine.release(request_id, lots, actor, now).await {
            tracing::error!(%request_id, %error, "Compensating release failed");
        }
    }

    /// Reduce `action`, then run its effects with the lock released.
    async fn dispatch(&self, request_id: RequestId, action: RequestAction) -> Result<BloodRequest> {
        let (effects, outcome) = {
            let mut state = self.state.write().await;
            let effects = self.reducer.reduce(&mut state, action, &self.env);
            let outcome = match state.last_error.clone() {
                Some(error) => Err(error),
                None => state
                    .get(&request_id)
                    .cloned()
                    .ok_or_else(|| BloodBankError::not_found("request", request_id)),
            };
            (effects, outcome)
        };

        for effect in effects {
            self.run_effect(effect).await;
        }
        outcome
    }

    /// Feed an action produced by an effect back through the reducer.
    async fn feedback(&self, action: RequestAction) {
        let effects = {
            let mut state = self.state.write().await;
            self.reducer.reduce(&mut state, action, &self.env)
        };
        for effect in effects {
            self.run_effect(effect).await;
        }
    }

    fn run_effect(&self, effect: Effect<RequestAction>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match effect {
                Effect::None => {},
                Effect::Future(future) => {
                    if let Some(action) = future.await {
                        self.feedback(action).await;
                    }
                },
                Effect::Sequential(effects) => {
                    for effect in effects {
                        self.run_effect(effect).await;
                    }
                },
                Effect::Parallel(effects) => {
                    futures::future::join_all(effects.into_iter().map(|effect| self.run_effect(effect)))
                        .await;
                },
            }
        })
    }

    pub(super) fn begin(&self, request_id: RequestId) -> Result<InFlight<'_>> {
        let mut set = self.in_flight.lock().map_err(|_| BloodBankError::poisoned())?;
        if !set.insert(request_id) {
            return Err(BloodBankError::conflict(
                "request",
                request_id,
                "in_progress",
                "transition in progress",
            ));
        }
        Ok(InFlight {
            set: &self.in_flight,
            request_id,
        })
    }

    pub(crate) async fn check_low_stock(&self, blood_type: BloodType, before: u32) {
        let Some(after) = self.report_stock(blood_type).await else {
            return;
        };
        if let Some(notification) = self.thresholds.check(blood_type, before, after) {
            tracing::warn!(%blood_type, available = after, "Stock below minimum");
            if let Err(error) = self.env.notifier().notify(notification).await {
                tracing::warn!(%error, "Low-stock notification not delivered");
            }
        }
    }

    async fn report_stock(&self, blood_type: BloodType) -> Option<u32> {
        let now = self.env.clock().now();
        match self.engine.available_units(blood_type, now).await {
            Ok(available) => {
                metrics::update_stock_available(blood_type, available);
                Some(available)
            },
            Err(error) => {
                tracing::warn!(%blood_type, %error, "Stock level unavailable");
                None
            },
        }
    }
}

fn ensure_transition(request: &BloodRequest, next: RequestStatus, verb: &str) -> Result<()> {
    if request.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(BloodBankError::conflict(
            "request",
            request.id,
            request.status,
            format!("cannot {verb} a {} request", request.status),
        ))
    }
}
