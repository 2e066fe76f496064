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

//! # Paywall Ledger
//!
//! Payment and entitlement reconciliation for pay-per-download artifacts sold
//! over a mobile-money rail.
//!
//! ## Core Components
//!
//! - [`Reconciler`]: decides free vs. paid per batch, drives the charge,
//!   records it and releases the artifacts
//! - [`EntitlementStore`]: which session may download which fingerprint
//! - [`PricingEngine`]: per-unit pricing and the single active promotion
//! - [`PaymentGatewayAdapter`]: primary/secondary charge with bounded timeouts
//! - [`TransactionLedger`]: append-then-transition record of every charge
//! - [`DeliverySink`]: releases entitled artifacts after reconciliation
//!
//! ## Example
//!
//! ```
//! use paywall_ledger::pricing::{Promotion, SystemConfig};
//! use paywall_ledger::{
//!     ArtifactDescriptor, ArtifactVault, ChargePolicy, EntitlementStore, HttpGateway,
//!     MemoryStore, PaymentGatewayAdapter, PricingEngine, ReconcilePath, ReconcileRequest,
//!     Reconciler, SessionId, TracingEventSink, TransactionLedger,
//! };
//! use bytes::Bytes;
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::with_config(SystemConfig {
//!     price_per_unit: dec!(10),
//!     promotion: Promotion {
//!         code: "FREE".to_string(),
//!         discount_percent: dec!(100),
//!         enabled: true,
//!         ..Promotion::default()
//!     },
//!     ..SystemConfig::default()
//! }));
//!
//! let timeout = Duration::from_secs(5);
//! let gateway = PaymentGatewayAdapter::new(
//!     Arc::new(HttpGateway::new("primary", "http://localhost:3000", None, None, timeout)?),
//!     Arc::new(HttpGateway::new("secondary", "http://localhost:3001", None, None, timeout)?),
//!     ChargePolicy::default(),
//! );
//! let (vault, mut released) = ArtifactVault::new();
//! let fingerprint = vault.register(
//!     ArtifactDescriptor::new("beach.jpg", 48_213, 1280, 720),
//!     Bytes::from_static(b"..."),
//! );
//!
//! let reconciler = Reconciler::new(
//!     Arc::new(EntitlementStore::new(store.clone())),
//!     Arc::new(PricingEngine::new(store.clone())),
//!     Arc::new(TransactionLedger::new(store.clone(), "RDP_")),
//!     Arc::new(gateway),
//!     Arc::new(vault),
//!     Arc::new(TracingEventSink),
//! );
//!
//! // A full discount settles without calling the gateway.
//! let request = ReconcileRequest::new(SessionId::new("session_1"), vec![fingerprint], "841234567")
//!     .with_promo_code("FREE");
//! let outcome = reconciler.reconcile(request).await?;
//!
//! assert_eq!(outcome.path, ReconcilePath::Free);
//! assert_eq!(outcome.delivered(), 1);
//! assert_eq!(released.recv().await.map(|a| a.name), Some("beach.jpg".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Every component is `Send + Sync` and shared behind `Arc`. Caches use
//! sharded maps, and no lock is held across an `.await`.

mod base;
pub mod config;
pub mod delivery;
pub mod entitlement;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod gateway;
pub mod ledger;
pub mod pricing;
pub mod reconciler;
pub mod store;
pub mod transaction;

pub use base::{PaymentType, SessionId, TransactionId};
pub use config::{AppConfig, GatewayConfig};
pub use delivery::{ArtifactVault, DeliveredArtifact, DeliveryReport, DeliverySink};
pub use entitlement::{EntitlementStore, Partition};
pub use error::{
    ChargeError, ConfigError, EntitlementError, LedgerError, PromoRejection, RailFailure,
    ReconcileError, StoreError, ValidationError,
};
pub use event::{ChannelEventSink, EventSink, PaymentEvent, TracingEventSink};
pub use fingerprint::{ArtifactDescriptor, Fingerprint, fingerprint};
pub use gateway::{
    ChargePolicy, ChargeReceipt, ChargeRequest, GatewayResponse, HttpGateway, MobileMoneyGateway,
    Msisdn, MsisdnRules, PaymentGatewayAdapter, Rail,
};
pub use ledger::TransactionLedger;
pub use pricing::{PricingEngine, Promotion, PromotionInfo, Quote, SystemConfig};
pub use reconciler::{ReconcileOutcome, ReconcilePath, ReconcileRequest, ReconcileStage, Reconciler};
pub use store::{
    EntitlementRecord, EntitlementRepository, MemoryStore, StoreResult, SystemConfigRepository,
    TransactionRepository,
};
pub use transaction::{OpenTransaction, Transaction, TransactionStatus, Transition};
