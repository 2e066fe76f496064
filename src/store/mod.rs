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

//! Durable store boundary.
//!
//! The reconciler never talks to a database directly. Entitlements,
//! transactions and the system configuration row each sit behind an async
//! repository trait so a relational backend or the in-memory
//! [`MemoryStore`] can be plugged in.

mod memory;

pub use memory::MemoryStore;

use crate::base::{SessionId, TransactionId};
use crate::error::{LedgerError, StoreError};
use crate::fingerprint::Fingerprint;
use crate::pricing::SystemConfig;
use crate::transaction::{Transaction, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A persisted entitlement: `(session, fingerprint)` paid by one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub session: SessionId,
    pub fingerprint: Fingerprint,
    pub transaction_id: TransactionId,
    pub granted_at: DateTime<Utc>,
    pub download_count: u32,
    pub last_downloaded_at: Option<DateTime<Utc>>,
}

impl EntitlementRecord {
    pub fn new(session: SessionId, fingerprint: Fingerprint, transaction_id: TransactionId) -> Self {
        Self {
            session,
            fingerprint,
            transaction_id,
            granted_at: Utc::now(),
            download_count: 0,
            last_downloaded_at: None,
        }
    }
}

/// Entitlement table, always scoped by session.
#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    async fn find(
        &self,
        session: &SessionId,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<EntitlementRecord>>;

    async fn list(&self, session: &SessionId) -> StoreResult<Vec<EntitlementRecord>>;

    /// Inserts the record unless `(session, fingerprint)` already exists.
    ///
    /// Returns `true` when a new row was written. Must be atomic: two
    /// concurrent inserts of the same key write one row.
    async fn insert_if_absent(&self, record: EntitlementRecord) -> StoreResult<bool>;

    /// Bumps the download counter. Returns `false` when no entitlement exists.
    async fn record_download(
        &self,
        session: &SessionId,
        fingerprint: &Fingerprint,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Transaction table.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserts a new row; fails with [`StoreError::Duplicate`] on an existing id.
    async fn insert(&self, transaction: Transaction) -> StoreResult<()>;

    async fn get(&self, id: &TransactionId) -> StoreResult<Option<Transaction>>;

    /// Applies a transition atomically and returns the updated row.
    async fn transition(
        &self,
        id: &TransactionId,
        transition: Transition,
    ) -> Result<Transaction, LedgerError>;

    /// All transactions for a session, oldest first.
    async fn list_by_session(&self, session: &SessionId) -> StoreResult<Vec<Transaction>>;
}

/// The single system configuration row, owned by the admin collaborator.
#[async_trait]
pub trait SystemConfigRepository: Send + Sync {
    async fn load(&self) -> StoreResult<SystemConfig>;

    /// Increments the active promotion's use count on behalf of a transaction
    /// that applied `code`.
    ///
    /// Returns `false` without incrementing when promotions are disabled, the
    /// active code no longer matches `code` (ignoring case), or the
    /// transaction has already redeemed.
    async fn redeem_promotion(&self, transaction_id: &TransactionId, code: &str)
    -> StoreResult<bool>;
}
