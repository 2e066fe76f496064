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

//! In-memory store backend.

use super::{
    EntitlementRecord, EntitlementRepository, StoreResult, SystemConfigRepository,
    TransactionRepository,
};
use crate::base::{SessionId, TransactionId};
use crate::error::{LedgerError, StoreError};
use crate::fingerprint::Fingerprint;
use crate::pricing::SystemConfig;
use crate::transaction::{Transaction, Transition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
struct ConfigRow {
    config: SystemConfig,
    /// Transactions that already bumped the promotion counter.
    redeemed: HashSet<TransactionId>,
}

/// Store backend keeping every table in memory.
///
/// Entitlements are sharded per session in a [`DashMap`], so inserts for one
/// session are serialized by the shard lock while different sessions proceed
/// in parallel.
#[derive(Debug)]
pub struct MemoryStore {
    entitlements: DashMap<SessionId, HashMap<Fingerprint, EntitlementRecord>>,
    transactions: DashMap<TransactionId, Transaction>,
    config: Mutex<ConfigRow>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(SystemConfig::default())
    }

    pub fn with_config(config: SystemConfig) -> Self {
        Self {
            entitlements: DashMap::new(),
            transactions: DashMap::new(),
            config: Mutex::new(ConfigRow {
                config,
                redeemed: HashSet::new(),
            }),
        }
    }

    /// Replaces the configuration row, as the admin console would.
    pub fn set_config(&self, config: SystemConfig) {
        self.config.lock().config = config;
    }

    /// Current configuration row.
    pub fn config(&self) -> SystemConfig {
        self.config.lock().config.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntitlementRepository for MemoryStore {
    async fn find(
        &self,
        session: &SessionId,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<EntitlementRecord>> {
        Ok(self
            .entitlements
            .get(session)
            .and_then(|records| records.get(fingerprint).cloned()))
    }

    async fn list(&self, session: &SessionId) -> StoreResult<Vec<EntitlementRecord>> {
        let mut records: Vec<EntitlementRecord> = self
            .entitlements
            .get(session)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.granted_at.cmp(&b.granted_at));
        Ok(records)
    }

    async fn insert_if_absent(&self, record: EntitlementRecord) -> StoreResult<bool> {
        let mut records = self.entitlements.entry(record.session.clone()).or_default();
        match records.entry(record.fingerprint.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(false),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(true)
            }
        }
    }

    async fn record_download(
        &self,
        session: &SessionId,
        fingerprint: &Fingerprint,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let Some(mut records) = self.entitlements.get_mut(session) else {
            return Ok(false);
        };
        match records.get_mut(fingerprint) {
            Some(record) => {
                record.download_count = record.download_count.saturating_add(1);
                record.last_downloaded_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn insert(&self, transaction: Transaction) -> StoreResult<()> {
        // Entry API for an atomic check-and-insert
        match self.transactions.entry(transaction.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!(
                "transaction {}",
                transaction.id
            ))),
            Entry::Vacant(entry) => {
                entry.insert(transaction);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &TransactionId) -> StoreResult<Option<Transaction>> {
        Ok(self.transactions.get(id).map(|tx| tx.value().clone()))
    }

    async fn transition(
        &self,
        id: &TransactionId,
        transition: Transition,
    ) -> Result<Transaction, LedgerError> {
        let mut tx = self
            .transactions
            .get_mut(id)
            .ok_or(LedgerError::TransactionNotFound(*id))?;
        tx.apply(transition)?;
        Ok(tx.value().clone())
    }

    async fn list_by_session(&self, session: &SessionId) -> StoreResult<Vec<Transaction>> {
        let mut transactions: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|tx| &tx.session == session)
            .map(|tx| tx.value().clone())
            .collect();
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(transactions)
    }
}

#[async_trait]
impl SystemConfigRepository for MemoryStore {
    async fn load(&self) -> StoreResult<SystemConfig> {
        Ok(self.config.lock().config.clone())
    }

    async fn redeem_promotion(&self, transaction_id: &TransactionId, code: &str) -> StoreResult<bool> {
        let mut row = self.config.lock();
        let promotion = &row.config.promotion;
        if !promotion.enabled || !promotion.code.trim().eq_ignore_ascii_case(code.trim()) {
            return Ok(false);
        }
        if !row.redeemed.insert(*transaction_id) {
            return Ok(false);
        }
        row.config.promotion.current_uses = row.config.promotion.current_uses.saturating_add(1);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::PaymentType;
    use crate::pricing::Promotion;
    use crate::transaction::{OpenTransaction, TransactionStatus};
    use rust_decimal::Decimal;

    fn session() -> SessionId {
        SessionId::new("s1")
    }

    fn save20() -> SystemConfig {
        SystemConfig {
            promotion: Promotion {
                code: "SAVE20".to_string(),
                discount_percent: Decimal::from(20),
                enabled: true,
                ..Promotion::default()
            },
            ..SystemConfig::default()
        }
    }

        fn pending(session: SessionId) -> Transaction {
        Transaction::pending(
            TransactionId::new(),
            OpenTransaction {
                session,
                payer: "258841234567".to_string(),
                amount: Decimal::ONE,
                original_amount: Decimal::ONE,
                discount_amount: Decimal::ZERO,
                discount_percent: Decimal::ZERO,
                promo_code: None,
                payment_type: PaymentType::Individual,
                fingerprints: vec![Fingerprint::from_raw("fp")],
            },
            "RDP_",
        )
    }

    #[tokio::test]
    async fn insert_if_absent_is_idempotent() {
        let store = MemoryStore::new();
        let fp = Fingerprint::from_raw("fp");
        let first = EntitlementRecord::new(session(), fp.clone(), TransactionId::new());
        let second = EntitlementRecord::new(session(), fp.clone(), TransactionId::new());

        assert!(store.insert_if_absent(first.clone()).await.unwrap());
        assert!(!store.insert_if_absent(second).await.unwrap());

        let found = store.find(&session(), &fp).await.unwrap().unwrap();
        assert_eq!(found.transaction_id, first.transaction_id);
    }

    #[tokio::test]
    async fn entitlements_are_session_scoped() {
        let store = MemoryStore::new();
        let fp = Fingerprint::from_raw("fp");
        store
            .insert_if_absent(EntitlementRecord::new(session(), fp.clone(), TransactionId::new()))
            .await
            .unwrap();

        assert!(store.find(&SessionId::new("other"), &fp).await.unwrap().is_none());
        assert!(store.list(&SessionId::new("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_download_counts() {
        let store = MemoryStore::new();
        let fp = Fingerprint::from_raw("fp");
        assert!(!store.record_download(&session(), &fp, Utc::now()).await.unwrap());

        store
            .insert_if_absent(EntitlementRecord::new(session(), fp.clone(), TransactionId::new()))
            .await
            .unwrap();
        store.record_download(&session(), &fp, Utc::now()).await.unwrap();
        store.record_download(&session(), &fp, Utc::now()).await.unwrap();

        let record = store.find(&session(), &fp).await.unwrap().unwrap();
        assert_eq!(record.download_count, 2);
        assert!(record.last_downloaded_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_transaction_rejected() {
        let store = MemoryStore::new();
        let tx = pending(session());
        store.insert(tx.clone()).await.unwrap();
        assert!(matches!(
            store.insert(tx).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn transition_unknown_transaction() {
        let store = MemoryStore::new();
        let id = TransactionId::new();
        let result = store
            .transition(
                &id,
                Transition::Fail {
                    reason: "x".to_string(),
                    at: Utc::now(),
                },
            )
            .await;
        assert_eq!(result, Err(LedgerError::TransactionNotFound(id)));
    }

    #[tokio::test]
    async fn transition_updates_stored_row() {
        let store = MemoryStore::new();
        let tx = pending(session());
        store.insert(tx.clone()).await.unwrap();
        store
            .transition(
                &tx.id,
                Transition::Complete {
                    gateway_transaction_id: None,
                    gateway_conversation_id: None,
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let stored = store.get(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn redemption_counted_once_per_transaction() {
        let store = MemoryStore::with_config(save20());
        let id = TransactionId::new();
        assert!(store.redeem_promotion(&id, "save20").await.unwrap());
        assert!(!store.redeem_promotion(&id, "SAVE20").await.unwrap());
        assert_eq!(store.config().promotion.current_uses, 1);
    }

    #[tokio::test]
    async fn redemption_ignores_other_or_disabled_codes() {
        let store = MemoryStore::with_config(save20());
        assert!(!store.redeem_promotion(&TransactionId::new(), "NEW50").await.unwrap());

        let mut disabled = save20();
        disabled.promotion.enabled = false;
        store.set_config(disabled);
        assert!(!store.redeem_promotion(&TransactionId::new(), "SAVE20").await.unwrap());
        assert_eq!(store.config().promotion.current_uses, 0);
    }
}
