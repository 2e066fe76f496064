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

//! Entitlement store.
//!
//! Two tiers: a per-session cache answering most checks without I/O, and the
//! durable [`EntitlementRepository`] behind it. Entitlements are never
//! revoked, so a cached positive is always safe; a cached negative is not,
//! which is why every decision that leans on "nothing owed" first calls
//! [`EntitlementStore::load_all`].
//!
//! ```text
//! is_entitled(session, fp)
//!        │
//!        ▼
//!   cache hit? ──yes──► true
//!        │no
//!        ▼
//!   durable lookup ──found──► cache + true
//!        │
//!   not found / store error
//!        │
//!        ▼
//!      false (fail closed)
//! ```

use crate::base::SessionId;
use crate::error::{EntitlementError, StoreError};
use crate::fingerprint::Fingerprint;
use crate::store::{EntitlementRecord, EntitlementRepository};
use crate::transaction::Transaction;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fingerprints split by whether the session already owns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub entitled: Vec<Fingerprint>,
    pub not_entitled: Vec<Fingerprint>,
}

pub struct EntitlementStore {
    repository: Arc<dyn EntitlementRepository>,
    /// Session-scoped mirror of the durable table. Mutated only by `grant`
    /// and `load_all`, always under the shard lock.
    cache: DashMap<SessionId, HashSet<Fingerprint>>,
}

impl EntitlementStore {
    pub fn new(repository: Arc<dyn EntitlementRepository>) -> Self {
        Self {
            repository,
            cache: DashMap::new(),
        }
    }

    /// Whether `session` may download `fingerprint` without paying.
    ///
    /// Fails closed: a store error answers `false`.
    pub async fn is_entitled(&self, session: &SessionId, fingerprint: &Fingerprint) -> bool {
        if self.is_cached(session, fingerprint) {
            debug!(%session, %fingerprint, "entitlement cache hit");
            return true;
        }

        match self.repository.find(session, fingerprint).await {
            Ok(Some(_)) => {
                self.cache_insert(session, fingerprint.clone());
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(%session, %fingerprint, error = %e, "entitlement lookup failed, treating as not entitled");
                false
            }
        }
    }

    /// Splits `fingerprints` into already-entitled and still-owed, keeping order.
    pub async fn partition(&self, session: &SessionId, fingerprints: &[Fingerprint]) -> Partition {
        let mut partition = Partition::default();
        for fingerprint in fingerprints {
            if self.is_entitled(session, fingerprint).await {
                partition.entitled.push(fingerprint.clone());
            } else {
                partition.not_entitled.push(fingerprint.clone());
            }
        }
        partition
    }

    /// Grants `fingerprints` to the transaction's session.
    ///
    /// Idempotent: already-entitled fingerprints are skipped. Returns how many
    /// new entitlements were written.
    ///
    /// # Errors
    ///
    /// - [`EntitlementError::TransactionNotCompleted`] - the transaction is
    ///   pending or failed; nothing is written.
    /// - [`EntitlementError::Store`] - the durable write failed. Fingerprints
    ///   written before the failure stay granted.
    pub async fn grant(
        &self,
        transaction: &Transaction,
        fingerprints: &[Fingerprint],
    ) -> Result<usize, EntitlementError> {
        if !transaction.is_completed() {
            return Err(EntitlementError::TransactionNotCompleted {
                id: transaction.id,
                status: transaction.status,
            });
        }

        let session = &transaction.session;
        let mut inserted = 0;
        for fingerprint in fingerprints {
            let record = EntitlementRecord::new(session.clone(), fingerprint.clone(), transaction.id);
            if self.repository.insert_if_absent(record).await? {
                inserted += 1;
            }
            self.cache_insert(session, fingerprint.clone());
        }

        debug!(%session, transaction_id = %transaction.id, inserted, "entitlements granted");
        Ok(inserted)
    }

    /// Replaces the session's cache with the durable view.
    ///
    /// On failure the existing cache is kept; it can only hold positives that
    /// remain true.
    pub async fn load_all(&self, session: &SessionId) -> Result<usize, StoreError> {
        let records = self.repository.list(session).await?;
        let fingerprints: HashSet<Fingerprint> =
            records.into_iter().map(|record| record.fingerprint).collect();
        let count = fingerprints.len();
        self.cache.insert(session.clone(), fingerprints);
        debug!(%session, count, "entitlement cache refreshed");
        Ok(count)
    }

    /// Counts a delivered download against an existing entitlement.
    pub async fn record_download(
        &self,
        session: &SessionId,
        fingerprint: &Fingerprint,
    ) -> Result<bool, StoreError> {
        self.repository
            .record_download(session, fingerprint, Utc::now())
            .await
    }

    /// Durable entitlement records for a session.
    pub async fn records(&self, session: &SessionId) -> Result<Vec<EntitlementRecord>, StoreError> {
        self.repository.list(session).await
    }

    /// Number of cached fingerprints for a session.
    pub fn cached_len(&self, session: &SessionId) -> usize {
        self.cache.get(session).map_or(0, |set| set.len())
    }

    fn is_cached(&self, session: &SessionId, fingerprint: &Fingerprint) -> bool {
        self.cache
            .get(session)
            .is_some_and(|set| set.contains(fingerprint))
    }

    fn cache_insert(&self, session: &SessionId, fingerprint: Fingerprint) {
        self.cache.entry(session.clone()).or_default().insert(fingerprint);
    }
}
