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

//! Ledger transaction records.
//!
//! A transaction is created `Pending` before the gateway is called and moves
//! to exactly one terminal state:
//! - [`Pending`] → [`Completed`] (via complete)
//! - [`Pending`] → [`Failed`] (via fail)
//!
//! Terminal states never change again. Amount and discount fields are fixed
//! at open time.
//!
//! [`Pending`]: TransactionStatus::Pending
//! [`Completed`]: TransactionStatus::Completed
//! [`Failed`]: TransactionStatus::Failed

use crate::base::{PaymentType, SessionId, TransactionId};
use crate::error::LedgerError;
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything known about a charge attempt before it is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTransaction {
    pub session: SessionId,
    pub payer: String,
    pub amount: Decimal,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub discount_percent: Decimal,
    pub promo_code: Option<String>,
    pub payment_type: PaymentType,
    /// Fingerprints this charge pays for.
    pub fingerprints: Vec<Fingerprint>,
}

/// A state change applied to a pending transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Complete {
        gateway_transaction_id: Option<String>,
        gateway_conversation_id: Option<String>,
        at: DateTime<Utc>,
    },
    Fail {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl Transition {
    pub fn target(&self) -> TransactionStatus {
        match self {
            Self::Complete { .. } => TransactionStatus::Completed,
            Self::Fail { .. } => TransactionStatus::Failed,
        }
    }
}

/// One reconciliation attempt for one batch of fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    pub session: SessionId,
    pub payer: String,
    pub amount: Decimal,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub discount_percent: Decimal,
    pub promo_code: Option<String>,
    pub status: TransactionStatus,
    pub batch_size: u32,
    pub payment_type: PaymentType,
    pub fingerprints: Vec<Fingerprint>,
    /// Gateway `reference` sent with the charge.
    pub reference: String,
    /// Gateway `thirdPartyReference` sent with the charge.
    pub third_party_reference: String,
    pub gateway_transaction_id: Option<String>,
    pub gateway_conversation_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    const DECIMAL_PRECISION: u32 = 2;

    /// Builds a new pending row, deriving the gateway references from the id.
    pub fn pending(id: TransactionId, open: OpenTransaction, reference_prefix: &str) -> Self {
        let (reference, third_party_reference) = gateway_references(&id, reference_prefix);
        Self {
            id,
            session: open.session,
            payer: open.payer,
            amount: open.amount,
            original_amount: open.original_amount,
            discount_amount: open.discount_amount,
            discount_percent: open.discount_percent,
            promo_code: open.promo_code,
            status: TransactionStatus::Pending,
            batch_size: u32::try_from(open.fingerprints.len()).unwrap_or(u32::MAX),
            payment_type: open.payment_type,
            fingerprints: open.fingerprints,
            reference,
            third_party_reference,
            gateway_transaction_id: None,
            gateway_conversation_id: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Applies a transition, refusing anything but `Pending` → terminal.
    pub fn apply(&mut self, transition: Transition) -> Result<(), LedgerError> {
        if self.status != TransactionStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: transition.target(),
            });
        }

        match transition {
            Transition::Complete {
                gateway_transaction_id,
                gateway_conversation_id,
                at,
            } => {
                self.status = TransactionStatus::Completed;
                self.gateway_transaction_id = gateway_transaction_id;
                self.gateway_conversation_id = gateway_conversation_id;
                self.completed_at = Some(at);
            }
            Transition::Fail { reason, at } => {
                self.status = TransactionStatus::Failed;
                self.failure_reason = Some(reason);
                self.completed_at = Some(at);
            }
        }
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

/// Derives `(reference, third_party_reference)` for a transaction.
///
/// The reference is the prefix plus 10 hex digits of the id and stays within
/// the provider's 20 character limit for the default prefix; the third party
/// reference is the last 5 hex digits.
pub fn gateway_references(id: &TransactionId, prefix: &str) -> (String, String) {
    let hex = id.0.simple().to_string();
    let reference = format!("{prefix}{}", &hex[..10].to_uppercase());
    let third_party = hex[hex.len() - 5..].to_uppercase();
    (reference, third_party)
}

impl Serialize for Transaction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Transaction", 18)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("session", &self.session)?;
        state.serialize_field("payer", &self.payer)?;
        state.serialize_field("amount", &self.amount.round_dp(Self::DECIMAL_PRECISION))?;
        state.serialize_field(
            "original_amount",
            &self.original_amount.round_dp(Self::DECIMAL_PRECISION),
        )?;
        state.serialize_field(
            "discount_amount",
            &self.discount_amount.round_dp(Self::DECIMAL_PRECISION),
        )?;
        state.serialize_field("discount_percent", &self.discount_percent)?;
        state.serialize_field("promo_code", &self.promo_code)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("failure_reason", &self.failure_reason)?;
        state.serialize_field("batch_size", &self.batch_size)?;
        state.serialize_field("payment_type", &self.payment_type)?;
        state.serialize_field("reference", &self.reference)?;
        state.serialize_field("third_party_reference", &self.third_party_reference)?;
        state.serialize_field("gateway_transaction_id", &self.gateway_transaction_id)?;
        state.serialize_field("gateway_conversation_id", &self.gateway_conversation_id)?;
        state.serialize_field("created_at", &self.created_at)?;
        state.serialize_field("completed_at", &self.completed_at)?;
        state.end()
    }
}
