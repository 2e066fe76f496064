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

//! Entitlement reconciler.
//!
//! Decides, for one requested batch, what is already owned, what must be paid
//! for, drives the charge, records the outcome and releases the artifacts.
//!
//! ```text
//! REQUESTED ──► QUOTING ──┬──► FREE_PATH ───────────┐
//!     │                   │                         ▼
//!     │                   └──► PAYING ──► RECORDING ──► GRANTING ──► DELIVERING ──► DONE
//!     │                          │           │
//!     │                          └───────────┴──► FAILED
//!     │
//!     └── nothing owed ──────────────────────────────────────────────► DELIVERING
//! ```
//!
//! Steps run strictly in sequence within one request. Two requests for the
//! same session may run concurrently; grants are idempotent atomic inserts,
//! so a fingerprint is never entitled twice.

use crate::base::{PaymentType, SessionId};
use crate::delivery::{DeliveryReport, DeliverySink};
use crate::entitlement::EntitlementStore;
use crate::error::{ChargeError, PromoRejection, ReconcileError, ValidationError};
use crate::event::{EventSink, PaymentEvent};
use crate::fingerprint::Fingerprint;
use crate::gateway::{PaymentGatewayAdapter, Rail};
use crate::ledger::TransactionLedger;
use crate::pricing::{PricingEngine, Quote};
use crate::transaction::{OpenTransaction, Transaction};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a reconciliation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStage {
    Requested,
    Quoting,
    FreePath,
    Paying,
    Recording,
    Granting,
    Delivering,
    Done,
    Failed,
}

impl fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Quoting => "quoting",
            Self::FreePath => "free_path",
            Self::Paying => "paying",
            Self::Recording => "recording",
            Self::Granting => "granting",
            Self::Delivering => "delivering",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A request to download a batch of processed artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub session: SessionId,
    pub fingerprints: Vec<Fingerprint>,
    pub payment_type: PaymentType,
    /// Raw payer number as typed by the user.
    pub payer: String,
    pub promo_code: Option<String>,
    /// Receipt address, carried into the completion event.
    pub email: Option<String>,
}

impl ReconcileRequest {
    /// Request with the payment type inferred from the batch size.
    pub fn new(session: SessionId, fingerprints: Vec<Fingerprint>, payer: impl Into<String>) -> Self {
        let payment_type = PaymentType::for_batch(fingerprints.len());
        Self {
            session,
            fingerprints,
            payment_type,
            payer: payer.into(),
            promo_code: None,
            email: None,
        }
    }

    pub fn with_promo_code(mut self, code: impl Into<String>) -> Self {
        self.promo_code = Some(code.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_payment_type(mut self, payment_type: PaymentType) -> Self {
        self.payment_type = payment_type;
        self
    }
}

/// How the batch was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePath {
    /// Everything requested was already owned; nothing was charged.
    AlreadyEntitled,
    /// The quote came to zero; completed without a gateway call.
    Free,
    /// Charged through the gateway.
    Paid { rail: Rail },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub path: ReconcilePath,
    /// The ledger row, absent when nothing was owed.
    pub transaction: Option<Transaction>,
    pub quote: Option<Quote>,
    pub already_entitled: Vec<Fingerprint>,
    pub newly_entitled: Vec<Fingerprint>,
    pub delivery: DeliveryReport,
}

impl ReconcileOutcome {
    /// Distinct fingerprints in the request.
    pub fn requested(&self) -> usize {
        self.already_entitled.len() + self.newly_entitled.len()
    }

    pub fn delivered(&self) -> usize {
        self.delivery.delivered_count()
    }

    /// Why a supplied promotional code was not applied.
    pub fn promo_warning(&self) -> Option<&PromoRejection> {
        self.quote.as_ref().and_then(|q| q.promo_rejection.as_ref())
    }
}

/// Orchestrates entitlement, pricing, charging, recording and delivery.
pub struct Reconciler {
    entitlements: Arc<EntitlementStore>,
    pricing: Arc<PricingEngine>,
    ledger: Arc<TransactionLedger>,
    gateway: Arc<PaymentGatewayAdapter>,
    delivery: Arc<dyn DeliverySink>,
    events: Arc<dyn EventSink>,
}

impl Reconciler {
    pub fn new(
        entitlements: Arc<EntitlementStore>,
        pricing: Arc<PricingEngine>,
        ledger: Arc<TransactionLedger>,
        gateway: Arc<PaymentGatewayAdapter>,
        delivery: Arc<dyn DeliverySink>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            entitlements,
            pricing,
            ledger,
            gateway,
            delivery,
            events,
        }
    }

    pub fn entitlements(&self) -> &EntitlementStore {
        &self.entitlements
    }

    pub fn ledger(&self) -> &TransactionLedger {
        &self.ledger
    }

    /// Reconciles one download request.
    ///
    /// Only the fingerprints the session does not already own are priced.
    /// The whole distinct batch is handed to the delivery sink once access is
    /// settled; a delivery shortfall is logged, never returned as an error.
    ///
    /// # Errors
    ///
    /// - [`ReconcileError::Validation`] - rejected before any durable write.
    /// - [`ReconcileError::Store`] / [`ReconcileError::Ledger`] - storage
    ///   failed before money moved.
    /// - [`ReconcileError::CriticalGatewayFailure`] - both rails failed; the
    ///   transaction is recorded as failed.
    /// - [`ReconcileError::PaidButUnrecorded`] - charged, ledger write failed.
    /// - [`ReconcileError::EntitlementGrantFailed`] - recorded, grant failed.
    pub async fn reconcile(
        &self,
        request: ReconcileRequest,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let session = request.session.clone();
        stage(&session, ReconcileStage::Requested);

        let fingerprints = dedupe(&request.fingerprints);
        if let Err(e) = self.validate_batch(request.payment_type, &fingerprints).await {
            return Err(self.reject(&session, e));
        }

        if let Err(e) = self.entitlements.load_all(&session).await {
            warn!(%session, error = %e, "entitlement refresh failed, relying on per-item lookups");
        }
        let partition = self.entitlements.partition(&session, &fingerprints).await;

        if partition.not_entitled.is_empty() {
            info!(%session, count = fingerprints.len(), "batch already entitled, nothing to charge");
            let delivery = self.deliver(&session, &fingerprints).await;
            return Ok(ReconcileOutcome {
                path: ReconcilePath::AlreadyEntitled,
                transaction: None,
                quote: None,
                already_entitled: partition.entitled,
                newly_entitled: Vec::new(),
                delivery,
            });
        }

        stage(&session, ReconcileStage::Quoting);
        let unit_price = self.pricing.current_unit_price().await?;
        let count = u32::try_from(partition.not_entitled.len()).unwrap_or(u32::MAX);
        let quote = self
            .pricing
            .quote(unit_price, count, request.promo_code.as_deref())
            .await;
        debug!(
            %session,
            count,
            original_amount = %quote.original_amount,
            final_amount = %quote.final_amount,
            "batch quoted"
        );

        let (path, transaction) = if quote.is_free() {
            stage(&session, ReconcileStage::FreePath);
            let transaction = self.settle_free(&request, &quote, &partition.not_entitled).await?;
            (ReconcilePath::Free, transaction)
        } else {
            stage(&session, ReconcileStage::Paying);
            let (rail, transaction) = self.settle_paid(&request, &quote, &partition.not_entitled).await?;
            (ReconcilePath::Paid { rail }, transaction)
        };

        stage(&session, ReconcileStage::Granting);
        self.grant(&transaction).await?;
        self.publish_completed(&request, &transaction);

        let delivery = self.deliver(&session, &fingerprints).await;
        Ok(ReconcileOutcome {
            path,
            transaction: Some(transaction),
            quote: Some(quote),
            already_entitled: partition.entitled,
            newly_entitled: partition.not_entitled,
            delivery,
        })
    }

    /// Releases again whatever the session already owns, without charging.
    ///
    /// Fingerprints the session does not own are reported as missing.
    pub async fn redeliver(&self, session: &SessionId, fingerprints: &[Fingerprint]) -> DeliveryReport {
        let fingerprints = dedupe(fingerprints);
        let partition = self.entitlements.partition(session, &fingerprints).await;
        let mut report = self.deliver(session, &partition.entitled).await;
        report.missing.extend(partition.not_entitled);
        report
    }

    async fn validate_batch(
        &self,
        payment_type: PaymentType,
        fingerprints: &[Fingerprint],
    ) -> Result<(), ValidationError> {
        if fingerprints.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        if payment_type == PaymentType::Individual && fingerprints.len() != 1 {
            return Err(ValidationError::PaymentTypeMismatch {
                payment_type,
                count: fingerprints.len(),
            });
        }
        self.pricing.check_batch_size(fingerprints.len()).await
    }

    /// Zero-amount batch: recorded and completed without the gateway.
    async fn settle_free(
        &self,
        request: &ReconcileRequest,
        quote: &Quote,
        owed: &[Fingerprint],
    ) -> Result<Transaction, ReconcileError> {
        let opened = self
            .ledger
            .open(open_transaction(request, request.payer.trim().to_string(), quote, owed))
            .await?;

        stage(&request.session, ReconcileStage::Recording);
        let transaction = self.ledger.complete(&opened.id, None, None).await?;
        self.redeem(&transaction).await;
        Ok(transaction)
    }

    /// Charged batch: payer and amount are checked before the ledger row
    /// exists, so a malformed request never reaches the ledger or the gateway.
    async fn settle_paid(
        &self,
        request: &ReconcileRequest,
        quote: &Quote,
        owed: &[Fingerprint],
    ) -> Result<(Rail, Transaction), ReconcileError> {
        let session = &request.session;
        let payer = match self.gateway.parse_payer(&request.payer) {
            Ok(payer) => payer,
            Err(e) => return Err(self.reject(session, e)),
        };
        if let Err(e) = self.gateway.check_amount(quote.final_amount) {
            return Err(self.reject(session, e));
        }

        let opened = self
            .ledger
            .open(open_transaction(request, payer.to_string(), quote, owed))
            .await?;

        let charge = self
            .gateway
            .charge(
                payer.as_str(),
                opened.amount,
                &opened.reference,
                &opened.third_party_reference,
            )
            .await;

        stage(session, ReconcileStage::Recording);
        let receipt = match charge {
            Ok(receipt) => receipt,
            Err(ChargeError::BothRailsFailed { primary, secondary }) => {
                stage(session, ReconcileStage::Failed);
                let reason = format!("primary: {primary}; secondary: {secondary}");
                self.record_failure(&opened, &reason).await;
                self.events.publish(PaymentEvent::CriticalGatewayFailure {
                    transaction_id: opened.id,
                    session: session.clone(),
                    amount: opened.amount,
                    primary: primary.clone(),
                    secondary: secondary.clone(),
                });
                return Err(ReconcileError::CriticalGatewayFailure {
                    transaction_id: opened.id,
                    primary,
                    secondary,
                });
            }
            Err(ChargeError::Validation(e)) => {
                stage(session, ReconcileStage::Failed);
                self.record_failure(&opened, &e.to_string()).await;
                self.events.publish(PaymentEvent::PaymentFailed {
                    transaction_id: opened.id,
                    session: session.clone(),
                    amount: opened.amount,
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let transaction = match self
            .ledger
            .complete(
                &opened.id,
                receipt.gateway_transaction_id.clone(),
                receipt.gateway_conversation_id.clone(),
            )
            .await
        {
            Ok(transaction) => transaction,
            Err(source) => {
                error!(
                    alert = "paid_but_unrecorded",
                    transaction_id = %opened.id,
                    %session,
                    gateway_transaction_id = ?receipt.gateway_transaction_id,
                    amount = %opened.amount,
                    error = %source,
                    "payer was charged but the ledger could not record it"
                );
                return Err(ReconcileError::PaidButUnrecorded {
                    transaction_id: opened.id,
                    gateway_transaction_id: receipt.gateway_transaction_id,
                    source,
                });
            }
        };

        self.redeem(&transaction).await;
        Ok((receipt.rail, transaction))
    }

    async fn grant(&self, transaction: &Transaction) -> Result<(), ReconcileError> {
        match self
            .entitlements
            .grant(transaction, &transaction.fingerprints)
            .await
        {
            Ok(inserted) => {
                debug!(transaction_id = %transaction.id, inserted, "entitlements recorded");
                Ok(())
            }
            Err(source) => {
                error!(
                    alert = "entitlement_grant_failed",
                    transaction_id = %transaction.id,
                    session = %transaction.session,
                    amount = %transaction.amount,
                    error = %source,
                    "transaction completed but entitlements were not granted"
                );
                Err(ReconcileError::EntitlementGrantFailed {
                    transaction_id: transaction.id,
                    source,
                })
            }
        }
    }

    /// Promotion accounting never fails a settled payment.
    async fn redeem(&self, transaction: &Transaction) {
        if let Err(e) = self.pricing.redeem(transaction).await {
            warn!(
                transaction_id = %transaction.id,
                promo_code = ?transaction.promo_code,
                error = %e,
                "promotion use not counted"
            );
        }
    }

    async fn record_failure(&self, transaction: &Transaction, reason: &str) {
        if let Err(e) = self.ledger.fail(&transaction.id, reason).await {
            error!(
                alert = "ledger_write_failed",
                transaction_id = %transaction.id,
                error = %e,
                "failed charge could not be recorded, row left pending"
            );
        }
    }

    async fn deliver(&self, session: &SessionId, fingerprints: &[Fingerprint]) -> DeliveryReport {
        stage(session, ReconcileStage::Delivering);
        let report = self.delivery.deliver(session, fingerprints).await;

        for fingerprint in &report.delivered {
            if let Err(e) = self.entitlements.record_download(session, fingerprint).await {
                warn!(%session, %fingerprint, error = %e, "download not counted");
            }
        }

        if report.delivered_count() < fingerprints.len() {
            warn!(
                %session,
                requested = fingerprints.len(),
                delivered = report.delivered_count(),
                "delivery shortfall, artifacts can be redelivered without paying"
            );
        }
        stage(session, ReconcileStage::Done);
        report
    }

    fn publish_completed(&self, request: &ReconcileRequest, transaction: &Transaction) {
        self.events.publish(PaymentEvent::PaymentCompleted {
            transaction_id: transaction.id,
            session: transaction.session.clone(),
            payer: Some(transaction.payer.clone()).filter(|p| !p.is_empty()),
            amount: transaction.amount,
            original_amount: transaction.original_amount,
            discount_amount: transaction.discount_amount,
            promo_code: transaction.promo_code.clone(),
            batch_size: transaction.batch_size,
            payment_type: transaction.payment_type,
            gateway_transaction_id: transaction.gateway_transaction_id.clone(),
            email: request.email.clone(),
        });
    }

    fn reject(&self, session: &SessionId, error: ValidationError) -> ReconcileError {
        info!(%session, reason = %error, "request rejected");
        self.events.publish(PaymentEvent::UserValidationError {
            session: session.clone(),
            reason: error.to_string(),
        });
        error.into()
    }
}

fn stage(session: &SessionId, stage: ReconcileStage) {
    debug!(%session, %stage, "reconcile stage");
}

/// Drops repeated fingerprints, keeping first-seen order.
fn dedupe(fingerprints: &[Fingerprint]) -> Vec<Fingerprint> {
    let mut seen = HashSet::with_capacity(fingerprints.len());
    fingerprints
        .iter()
        .filter(|fp| seen.insert(*fp))
        .cloned()
        .collect()
}

fn open_transaction(
    request: &ReconcileRequest,
    payer: String,
    quote: &Quote,
    owed: &[Fingerprint],
) -> OpenTransaction {
    OpenTransaction {
        session: request.session.clone(),
        payer,
        amount: quote.final_amount.max(Decimal::ZERO),
        original_amount: quote.original_amount,
        discount_amount: quote.discount_amount,
        discount_percent: quote.discount_percent,
        promo_code: quote.promo_code.clone(),
        payment_type: request.payment_type,
        fingerprints: owed.to_vec(),
    }
}
