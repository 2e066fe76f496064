// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Shared fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use paywall_ledger::{
    ChargePolicy, ChargeRequest, DeliveryReport, DeliverySink, EntitlementRecord,
    EntitlementRepository, EntitlementStore, EventSink, Fingerprint, GatewayResponse,
    LedgerError, MemoryStore, MobileMoneyGateway, PaymentEvent, PaymentGatewayAdapter,
    PricingEngine, RailFailure, Reconciler, SessionId, StoreError, StoreResult, SystemConfig,
    Transaction, TransactionId, TransactionLedger, TransactionRepository, Transition, fingerprint,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const PAYER: &str = "258841234567";

pub fn fp(name: &str) -> Fingerprint {
    fingerprint(name, 48_213, 1280, 720)
}

pub fn session() -> SessionId {
    SessionId::new("session_test")
}

// === Gateway ===

#[derive(Debug, Clone)]
pub enum Behaviour {
    Approve { transaction_id: String },
    Decline { code: String },
    Fail(RailFailure),
    /// Never answers; the adapter's timeout must cut it off.
    Hang,
}

pub struct FakeGateway {
    name: &'static str,
    behaviour: Mutex<Behaviour>,
    pub calls: AtomicUsize,
    /// In-flight submissions dropped before they finished.
    pub abandoned: Arc<AtomicUsize>,
    pub requests: Mutex<Vec<ChargeRequest>>,
}

impl FakeGateway {
    pub fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour: Mutex::new(behaviour),
            calls: AtomicUsize::new(0),
            abandoned: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn approving(name: &'static str, transaction_id: &str) -> Arc<Self> {
        Self::new(
            name,
            Behaviour::Approve {
                transaction_id: transaction_id.to_string(),
            },
        )
    }

    pub fn failing(name: &'static str, failure: RailFailure) -> Arc<Self> {
        Self::new(name, Behaviour::Fail(failure))
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock() = behaviour;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChargeRequest> {
        self.requests.lock().last().cloned()
    }
}

/// Counts a submission as abandoned if dropped before completion.
struct InFlight {
    abandoned: Arc<AtomicUsize>,
    finished: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl MobileMoneyGateway for FakeGateway {
    fn name(&self) -> &str {
        self.name
    }

    async fn submit(&self, request: &ChargeRequest) -> Result<GatewayResponse, RailFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let behaviour = self.behaviour.lock().clone();

        let mut in_flight = InFlight {
            abandoned: self.abandoned.clone(),
            finished: false,
        };
        let result = match behaviour {
            Behaviour::Approve { transaction_id } => Ok(GatewayResponse {
                success: true,
                conversation_id: Some(format!("conv-{transaction_id}")),
                transaction_id: Some(transaction_id),
                response_code: Some("INS-0".to_string()),
                response_desc: Some("Request processed successfully".to_string()),
                error: None,
            }),
            Behaviour::Decline { code } => Ok(GatewayResponse {
                success: false,
                response_code: Some(code),
                response_desc: Some("Declined".to_string()),
                ..GatewayResponse::default()
            }),
            Behaviour::Fail(failure) => Err(failure),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RailFailure::Transport("unreachable".to_string()))
            }
        };
        in_flight.finished = true;
        result
    }
}

// === Events and delivery ===

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<PaymentEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<PaymentEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(PaymentEvent::kind).collect()
    }
}

impl EventSink for RecordingEvents {
    fn publish(&self, event: PaymentEvent) {
        self.events.lock().push(event);
    }
}

/// Delivers everything except fingerprints marked missing.
#[derive(Default)]
pub struct RecordingDelivery {
    missing: Mutex<HashSet<Fingerprint>>,
    calls: Mutex<Vec<Vec<Fingerprint>>>,
}

impl RecordingDelivery {
    pub fn mark_missing(&self, fingerprint: Fingerprint) {
        self.missing.lock().insert(fingerprint);
    }

    pub fn restore(&self, fingerprint: &Fingerprint) {
        self.missing.lock().remove(fingerprint);
    }

    pub fn calls(&self) -> Vec<Vec<Fingerprint>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingDelivery {
    async fn deliver(&self, _session: &SessionId, fingerprints: &[Fingerprint]) -> DeliveryReport {
        self.calls.lock().push(fingerprints.to_vec());
        let missing = self.missing.lock().clone();
        let (missing, delivered): (Vec<_>, Vec<_>) = fingerprints
            .iter()
            .cloned()
            .partition(|fp| missing.contains(fp));
        DeliveryReport { delivered, missing }
    }
}

// === Failure injection ===

/// Entitlement table whose reads or inserts can be switched off.
pub struct FlakyEntitlements {
    pub inner: Arc<MemoryStore>,
    pub fail_reads: AtomicBool,
    pub fail_inserts: AtomicBool,
}

impl FlakyEntitlements {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_inserts: AtomicBool::new(false),
        })
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("entitlement table unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementRepository for FlakyEntitlements {
    async fn find(
        &self,
        session: &SessionId,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<EntitlementRecord>> {
        self.check_reads()?;
        self.inner.find(session, fingerprint).await
    }

    async fn list(&self, session: &SessionId) -> StoreResult<Vec<EntitlementRecord>> {
        self.check_reads()?;
        self.inner.list(session).await
    }

    async fn insert_if_absent(&self, record: EntitlementRecord) -> StoreResult<bool> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("entitlement table offline".to_string()));
        }
        self.inner.insert_if_absent(record).await
    }

    async fn record_download(
        &self,
        session: &SessionId,
        fingerprint: &Fingerprint,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.record_download(session, fingerprint, at).await
    }
}

/// Transaction table that refuses to record completions when switched.
pub struct FlakyTransactions {
    pub inner: Arc<MemoryStore>,
    pub fail_completions: AtomicBool,
}

#[async_trait]
impl TransactionRepository for FlakyTransactions {
    async fn insert(&self, transaction: Transaction) -> StoreResult<()> {
        self.inner.insert(transaction).await
    }

    async fn get(&self, id: &TransactionId) -> StoreResult<Option<Transaction>> {
        self.inner.get(id).await
    }

    async fn transition(
        &self,
        id: &TransactionId,
        transition: Transition,
    ) -> Result<Transaction, LedgerError> {
        if matches!(transition, Transition::Complete { .. })
            && self.fail_completions.load(Ordering::SeqCst)
        {
            return Err(StoreError::Unavailable("transactions table offline".to_string()).into());
        }
        self.inner.transition(id, transition).await
    }

    async fn list_by_session(&self, session: &SessionId) -> StoreResult<Vec<Transaction>> {
        self.inner.list_by_session(session).await
    }
}

// === Harness ===

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub primary: Arc<FakeGateway>,
    pub secondary: Arc<FakeGateway>,
    pub events: Arc<RecordingEvents>,
    pub delivery: Arc<RecordingDelivery>,
    pub entitlements: Arc<EntitlementStore>,
    pub pricing: Arc<PricingEngine>,
    pub ledger: Arc<TransactionLedger>,
    pub reconciler: Reconciler,
}

pub struct HarnessBuilder {
    config: SystemConfig,
    primary: Arc<FakeGateway>,
    secondary: Arc<FakeGateway>,
    policy: ChargePolicy,
    entitlement_repo: Option<Arc<dyn EntitlementRepository>>,
    transaction_repo: Option<Arc<dyn TransactionRepository>>,
    store: Arc<MemoryStore>,
}

impl HarnessBuilder {
    pub fn primary(mut self, gateway: Arc<FakeGateway>) -> Self {
        self.primary = gateway;
        self
    }

    pub fn secondary(mut self, gateway: Arc<FakeGateway>) -> Self {
        self.secondary = gateway;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.policy.attempt_timeout = timeout;
        self
    }

    /// Shares an existing store, e.g. one wrapped by a flaky repository.
    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn entitlement_repo(mut self, repo: Arc<dyn EntitlementRepository>) -> Self {
        self.entitlement_repo = Some(repo);
        self
    }

    pub fn transaction_repo(mut self, repo: Arc<dyn TransactionRepository>) -> Self {
        self.transaction_repo = Some(repo);
        self
    }

    pub fn build(self) -> Harness {
        let store = self.store;
        store.set_config(self.config);

        let entitlement_repo = self
            .entitlement_repo
            .unwrap_or_else(|| store.clone() as Arc<dyn EntitlementRepository>);
        let transaction_repo = self
            .transaction_repo
            .unwrap_or_else(|| store.clone() as Arc<dyn TransactionRepository>);

        let entitlements = Arc::new(EntitlementStore::new(entitlement_repo));
        let pricing = Arc::new(PricingEngine::new(store.clone()));
        let ledger = Arc::new(TransactionLedger::new(transaction_repo, "RDP_"));
        let events = Arc::new(RecordingEvents::default());
        let delivery = Arc::new(RecordingDelivery::default());

        let gateway = PaymentGatewayAdapter::new(
            self.primary.clone(),
            self.secondary.clone(),
            self.policy,
        );
        let reconciler = Reconciler::new(
            entitlements.clone(),
            pricing.clone(),
            ledger.clone(),
            Arc::new(gateway),
            delivery.clone(),
            events.clone(),
        );

        Harness {
            store,
            primary: self.primary,
            secondary: self.secondary,
            events,
            delivery,
            entitlements,
            pricing,
            ledger,
            reconciler,
        }
    }
}

impl Harness {
    pub fn builder(config: SystemConfig) -> HarnessBuilder {
        HarnessBuilder {
            config,
            primary: FakeGateway::approving("primary", "PRI-1"),
            secondary: FakeGateway::approving("secondary", "SEC-1"),
            policy: ChargePolicy::default(),
            entitlement_repo: None,
            transaction_repo: None,
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn new(config: SystemConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn gateway_calls(&self) -> usize {
        self.primary.calls() + self.secondary.calls()
    }
}
