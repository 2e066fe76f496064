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

//! Error types for entitlement reconciliation.

use crate::base::{PaymentType, TransactionId};
use crate::transaction::TransactionStatus;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Durable store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or refused the operation
    #[error("durable store unavailable: {0}")]
    Unavailable(String),

    /// A row that must exist does not
    #[error("record not found: {0}")]
    NotFound(String),

    /// A row with the same key already exists
    #[error("duplicate record: {0}")]
    Duplicate(String),
}

/// Transaction ledger errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Referenced transaction ID does not exist
    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// Only pending transactions may change state
    #[error("transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Entitlement store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// Entitlements only come from completed transactions
    #[error("transaction {id} is {status}, entitlements require a completed transaction")]
    TransactionNotCompleted {
        id: TransactionId,
        status: TransactionStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input rejected before any durable write or network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Nothing was requested
    #[error("no artifacts requested")]
    EmptyBatch,

    /// Batch exceeds the configured maximum
    #[error("batch of {requested} exceeds the maximum of {max}")]
    BatchTooLarge { requested: usize, max: u32 },

    /// Payment type does not fit the batch size
    #[error("payment type {payment_type} does not fit a batch of {count}")]
    PaymentTypeMismatch {
        payment_type: PaymentType,
        count: usize,
    },

    /// Payer is not a supported mobile-money number
    #[error("invalid payer number: {0}")]
    InvalidPayer(String),

    /// Amount outside the gateway's accepted range
    #[error("amount {amount} outside accepted range [{min}, {max}]")]
    AmountOutOfRange {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    /// Gateway reference is too short
    #[error("reference must be at least {min} characters")]
    ReferenceTooShort { min: usize },
}

/// Why a promotional code was not applied.
///
/// Never fails a reconciliation; pricing falls back to full price.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromoRejection {
    /// Promotions are switched off system-wide
    #[error("promotions are not enabled")]
    Disabled,

    /// Code does not match the active promotion
    #[error("unknown promotional code")]
    UnknownCode,

    /// Promotion is past its expiry
    #[error("promotional code has expired")]
    Expired,

    /// Usage cap reached
    #[error("promotional code has reached its usage limit")]
    Exhausted,

    /// Promotion could not be checked
    #[error("promotion could not be verified: {0}")]
    Unavailable(String),
}

/// Why a single gateway endpoint did not produce a successful charge.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RailFailure {
    /// No response within the per-attempt budget
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx HTTP status
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Response body could not be understood
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Gateway answered with a failure code
    #[error(
        "declined ({}): {}",
        .code.as_deref().unwrap_or("no code"),
        .description.as_deref().unwrap_or("no description")
    )]
    Declined {
        code: Option<String>,
        description: Option<String>,
    },
}

/// Payment gateway adapter errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChargeError {
    /// Rejected before any network call
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Primary and secondary endpoints both failed for one charge
    #[error("both payment rails failed (primary: {primary}; secondary: {secondary})")]
    BothRailsFailed {
        primary: RailFailure,
        secondary: RailFailure,
    },
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures surfaced by the reconciler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Both payment rails failed; the transaction is recorded as failed
    #[error("payment gateway outage on transaction {transaction_id}: primary: {primary}; secondary: {secondary}")]
    CriticalGatewayFailure {
        transaction_id: TransactionId,
        primary: RailFailure,
        secondary: RailFailure,
    },

    /// The payer was charged but the ledger could not record it
    #[error("transaction {transaction_id} was charged but could not be recorded: {source}")]
    PaidButUnrecorded {
        transaction_id: TransactionId,
        gateway_transaction_id: Option<String>,
        source: LedgerError,
    },

    /// The ledger recorded the payment but access was not granted
    #[error("transaction {transaction_id} completed but entitlements were not granted: {source}")]
    EntitlementGrantFailed {
        transaction_id: TransactionId,
        source: EntitlementError,
    },
}

impl ReconcileError {
    /// Conditions that warrant operator escalation rather than a user retry.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::CriticalGatewayFailure { .. }
                | Self::PaidButUnrecorded { .. }
                | Self::EntitlementGrantFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn validation_display_messages() {
        assert_eq!(ValidationError::EmptyBatch.to_string(), "no artifacts requested");
        assert_eq!(
            ValidationError::BatchTooLarge {
                requested: 60,
                max: 50
            }
            .to_string(),
            "batch of 60 exceeds the maximum of 50"
        );
        assert_eq!(
            ValidationError::PaymentTypeMismatch {
                payment_type: PaymentType::Individual,
                count: 3
            }
            .to_string(),
            "payment type individual does not fit a batch of 3"
        );
        assert_eq!(
            ValidationError::InvalidPayer("123456".to_string()).to_string(),
            "invalid payer number: 123456"
        );
        assert_eq!(
            ValidationError::AmountOutOfRange {
                amount: dec!(0.5),
                min: dec!(1),
                max: dec!(999999)
            }
            .to_string(),
            "amount 0.5 outside accepted range [1, 999999]"
        );
        assert_eq!(
            ValidationError::ReferenceTooShort { min: 3 }.to_string(),
            "reference must be at least 3 characters"
        );
    }

    #[test]
    fn promo_rejection_display_messages() {
        assert_eq!(PromoRejection::Disabled.to_string(), "promotions are not enabled");
        assert_eq!(PromoRejection::UnknownCode.to_string(), "unknown promotional code");
        assert_eq!(PromoRejection::Expired.to_string(), "promotional code has expired");
        assert_eq!(
            PromoRejection::Exhausted.to_string(),
            "promotional code has reached its usage limit"
        );
    }

    #[test]
    fn rail_failure_display_messages() {
        assert_eq!(
            RailFailure::Timeout { after_ms: 30000 }.to_string(),
            "timed out after 30000ms"
        );
        assert_eq!(RailFailure::HttpStatus(502).to_string(), "unexpected HTTP status 502");
        assert_eq!(
            RailFailure::Declined {
                code: Some("INS-2006".to_string()),
                description: Some("Insufficient balance".to_string())
            }
            .to_string(),
            "declined (INS-2006): Insufficient balance"
        );
        assert_eq!(
            RailFailure::Declined {
                code: None,
                description: None
            }
            .to_string(),
            "declined (no code): no description"
        );
    }

    #[test]
    fn ledger_display_messages() {
        let id = TransactionId(Uuid::nil());
        assert_eq!(
            LedgerError::TransactionNotFound(id).to_string(),
            "transaction 00000000-0000-0000-0000-000000000000 not found"
        );
        assert_eq!(
            LedgerError::InvalidTransition {
                id,
                from: TransactionStatus::Failed,
                to: TransactionStatus::Completed
            }
            .to_string(),
            "transaction 00000000-0000-0000-0000-000000000000 cannot move from failed to completed"
        );
        assert_eq!(
            LedgerError::Store(StoreError::Unavailable("down".to_string())).to_string(),
            "durable store unavailable: down"
        );
    }

    #[test]
    fn critical_classification() {
        let id = TransactionId(Uuid::nil());
        let outage = ReconcileError::CriticalGatewayFailure {
            transaction_id: id,
            primary: RailFailure::Timeout { after_ms: 1 },
            secondary: RailFailure::HttpStatus(500),
        };
        assert!(outage.is_critical());

        let grant = ReconcileError::EntitlementGrantFailed {
            transaction_id: id,
            source: EntitlementError::Store(StoreError::Unavailable("down".to_string())),
        };
        assert!(grant.is_critical());

        let invalid = ReconcileError::Validation(ValidationError::InvalidPayer("1".to_string()));
        assert!(!invalid.is_critical());
    }

    #[test]
    fn errors_are_cloneable() {
        let error = ChargeError::BothRailsFailed {
            primary: RailFailure::Transport("refused".to_string()),
            secondary: RailFailure::Malformed("eof".to_string()),
        };
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
