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

//! Transaction ledger.
//!
//! Every charge attempt is written `Pending` before the gateway sees it, so a
//! crash mid-charge leaves an auditable row carrying the gateway references
//! instead of nothing at all.

use crate::base::{SessionId, TransactionId};
use crate::error::{LedgerError, StoreError};
use crate::store::TransactionRepository;
use crate::transaction::{OpenTransaction, Transaction, TransactionStatus, Transition};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct TransactionLedger {
    repository: Arc<dyn TransactionRepository>,
    reference_prefix: String,
}

impl TransactionLedger {
    pub fn new(repository: Arc<dyn TransactionRepository>, reference_prefix: impl Into<String>) -> Self {
        Self {
            repository,
            reference_prefix: reference_prefix.into(),
        }
    }

    /// Inserts a pending row and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the row could not be written; in that case
    /// no charge may be attempted.
    pub async fn open(&self, open: OpenTransaction) -> Result<Transaction, StoreError> {
        let transaction = Transaction::pending(TransactionId::new(), open, &self.reference_prefix);
        self.repository.insert(transaction.clone()).await?;
        info!(
            transaction_id = %transaction.id,
            session = %transaction.session,
            amount = %transaction.amount,
            original_amount = %transaction.original_amount,
            discount_amount = %transaction.discount_amount,
            batch_size = transaction.batch_size,
            reference = %transaction.reference,
            "transaction opened"
        );
        Ok(transaction)
    }

    /// Moves a pending transaction to completed and stamps completion time.
    pub async fn complete(
        &self,
        id: &TransactionId,
        gateway_transaction_id: Option<String>,
        gateway_conversation_id: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let transaction = self
            .repository
            .transition(
                id,
                Transition::Complete {
                    gateway_transaction_id,
                    gateway_conversation_id,
                    at: Utc::now(),
                },
            )
            .await?;
        info!(transaction_id = %id, amount = %transaction.amount, "transaction completed");
        Ok(transaction)
    }

    /// Moves a pending transaction to failed. Terminal; retries open a new row.
    pub async fn fail(&self, id: &TransactionId, reason: impl Into<String>) -> Result<Transaction, LedgerError> {
        let reason = reason.into();
        let transaction = self
            .repository
            .transition(
                id,
                Transition::Fail {
                    reason: reason.clone(),
                    at: Utc::now(),
                },
            )
            .await?;
        warn!(transaction_id = %id, %reason, "transaction failed");
        Ok(transaction)
    }

    pub async fn get(&self, id: &TransactionId) -> Result<Transaction, LedgerError> {
        self.repository
            .get(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(*id))
    }

    /// All transactions for a session, oldest first.
    pub async fn history(&self, session: &SessionId) -> Result<Vec<Transaction>, StoreError> {
        self.repository.list_by_session(session).await
    }

    /// Pending transactions for a session. These are the anchors for an
    /// out-of-band status check against the gateway.
    pub async fn pending(&self, session: &SessionId) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .history(session)
            .await?
            .into_iter()
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::PaymentType;
    use crate::fingerprint::Fingerprint;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn ledger() -> TransactionLedger {
        TransactionLedger::new(Arc::new(MemoryStore::new()), "RDP_")
    }

    fn open(session: &str) -> OpenTransaction {
        OpenTransaction {
            session: SessionId::new(session),
            payer: "258841234567".to_string(),
            amount: dec!(16),
            original_amount: dec!(20),
            discount_amount: dec!(4),
            discount_percent: dec!(20),
            promo_code: Some("SAVE20".to_string()),
            payment_type: PaymentType::Bulk,
            fingerprints: vec![Fingerprint::from_raw("a"), Fingerprint::from_raw("b")],
        }
    }

    #[tokio::test]
    async fn open_writes_pending_row() {
        let ledger = ledger();
        let tx = ledger.open(open("s1")).await.unwrap();

        let stored = ledger.get(&tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
        assert_eq!(stored.amount, dec!(16));
        assert_eq!(stored.discount_amount, dec!(4));
        assert_eq!(stored.batch_size, 2);
        assert_eq!(ledger.pending(&SessionId::new("s1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_then_fail_is_rejected() {
        let ledger = ledger();
        let tx = ledger.open(open("s1")).await.unwrap();
        ledger
            .complete(&tx.id, Some("gw".to_string()), Some("conv".to_string()))
            .await
            .unwrap();

        let err = ledger.fail(&tx.id, "late").await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
        assert!(ledger.pending(&SessionId::new("s1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fail_records_reason() {
        let ledger = ledger();
        let tx = ledger.open(open("s1")).await.unwrap();
        let failed = ledger.fail(&tx.id, "gateway down").await.unwrap();

        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("gateway down"));
        assert_eq!(failed.amount, dec!(16));
    }

    #[tokio::test]
    async fn history_is_session_scoped() {
        let ledger = ledger();
        ledger.open(open("s1")).await.unwrap();
        ledger.open(open("s1")).await.unwrap();
        ledger.open(open("s2")).await.unwrap();

        assert_eq!(ledger.history(&SessionId::new("s1")).await.unwrap().len(), 2);
        assert_eq!(ledger.history(&SessionId::new("s2")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_unknown() {
        let ledger = ledger();
        let id = TransactionId::new();
        assert_eq!(
            ledger.get(&id).await,
            Err(LedgerError::TransactionNotFound(id))
        );
    }
}
