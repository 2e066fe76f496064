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

//! Payment gateway adapter.
//!
//! Wraps a mobile-money charge API behind a normalised contract and owns the
//! primary/secondary failover.
//!
//! ```text
//! charge(payer, amount, reference, correlation)
//!        │
//!        ▼
//!   validate ──invalid──► ChargeError::Validation (no network call)
//!        │
//!        ▼
//!   primary (fresh timeout) ──ok──► receipt
//!        │ any failure
//!        ▼
//!   secondary (fresh timeout) ──ok──► receipt
//!        │ any failure
//!        ▼
//!   ChargeError::BothRailsFailed
//! ```

mod http;
mod msisdn;

pub use http::HttpGateway;
pub use msisdn::{Msisdn, MsisdnRules};

use crate::error::{ChargeError, RailFailure, ValidationError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Normalised charge request sent to one gateway endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeRequest {
    pub amount: Decimal,
    pub payer: Msisdn,
    pub reference: String,
    pub third_party_reference: String,
}

/// What an endpoint answered, before interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub conversation_id: Option<String>,
    pub response_code: Option<String>,
    pub response_desc: Option<String>,
    pub error: Option<String>,
}

/// One mobile-money endpoint.
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Submits a charge. Transport-level problems map to [`RailFailure`];
    /// an answered request, even a declined one, is a [`GatewayResponse`].
    async fn submit(&self, request: &ChargeRequest) -> Result<GatewayResponse, RailFailure>;
}

/// Which endpoint settled a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rail {
    Primary,
    Secondary,
}

/// A successful charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub rail: Rail,
    pub gateway_transaction_id: Option<String>,
    pub gateway_conversation_id: Option<String>,
    pub response_code: Option<String>,
    pub response_desc: Option<String>,
}

/// Limits and interpretation rules applied to every charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargePolicy {
    /// Budget for each attempt; primary and secondary each get a fresh one.
    pub attempt_timeout: Duration,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub min_reference_len: usize,
    /// Provider response code meaning the charge went through.
    pub success_code: String,
    pub msisdn: MsisdnRules,
}

impl Default for ChargePolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(30),
            min_amount: dec!(1),
            max_amount: dec!(999999),
            min_reference_len: 3,
            success_code: "INS-0".to_string(),
            msisdn: MsisdnRules::default(),
        }
    }
}

pub struct PaymentGatewayAdapter {
    primary: Arc<dyn MobileMoneyGateway>,
    secondary: Arc<dyn MobileMoneyGateway>,
    policy: ChargePolicy,
}

impl PaymentGatewayAdapter {
    pub fn new(
        primary: Arc<dyn MobileMoneyGateway>,
        secondary: Arc<dyn MobileMoneyGateway>,
        policy: ChargePolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy,
        }
    }

    pub fn policy(&self) -> &ChargePolicy {
        &self.policy
    }

    /// Normalises the payer number without touching the network.
    pub fn parse_payer(&self, payer: &str) -> Result<Msisdn, ValidationError> {
        self.policy.msisdn.parse(payer)
    }

    /// Checks the amount against the accepted range.
    pub fn check_amount(&self, amount: Decimal) -> Result<(), ValidationError> {
        if amount < self.policy.min_amount || amount > self.policy.max_amount {
            return Err(ValidationError::AmountOutOfRange {
                amount,
                min: self.policy.min_amount,
                max: self.policy.max_amount,
            });
        }
        Ok(())
    }

    /// Builds a charge request, rejecting anything the gateway would refuse.
    pub fn validate(
        &self,
        payer: &str,
        amount: Decimal,
        reference: &str,
        correlation_id: &str,
    ) -> Result<ChargeRequest, ValidationError> {
        self.check_amount(amount)?;
        let payer = self.parse_payer(payer)?;
        if reference.trim().len() < self.policy.min_reference_len {
            return Err(ValidationError::ReferenceTooShort {
                min: self.policy.min_reference_len,
            });
        }
        Ok(ChargeRequest {
            amount,
            payer,
            reference: reference.to_string(),
            third_party_reference: correlation_id.to_string(),
        })
    }

    /// Charges the payer, failing over to the secondary endpoint once.
    ///
    /// # Errors
    ///
    /// - [`ChargeError::Validation`] - input rejected, no network call made.
    /// - [`ChargeError::BothRailsFailed`] - primary and secondary both failed.
    pub async fn charge(
        &self,
        payer: &str,
        amount: Decimal,
        reference: &str,
        correlation_id: &str,
    ) -> Result<ChargeReceipt, ChargeError> {
        let request = self.validate(payer, amount, reference, correlation_id)?;

        let primary = match self.attempt(self.primary.as_ref(), Rail::Primary, &request).await {
            Ok(receipt) => return Ok(receipt),
            Err(failure) => failure,
        };
        warn!(
            gateway = self.primary.name(),
            reference,
            failure = %primary,
            "primary payment rail failed, falling back to secondary"
        );

        match self.attempt(self.secondary.as_ref(), Rail::Secondary, &request).await {
            Ok(receipt) => {
                info!(gateway = self.secondary.name(), reference, "charge settled on secondary rail");
                Ok(receipt)
            }
            Err(secondary) => {
                error!(
                    alert = "payment_rails_down",
                    primary_gateway = self.primary.name(),
                    secondary_gateway = self.secondary.name(),
                    reference,
                    primary_failure = %primary,
                    secondary_failure = %secondary,
                    "both payment rails failed"
                );
                Err(ChargeError::BothRailsFailed { primary, secondary })
            }
        }
    }

    /// One bounded attempt against one endpoint.
    ///
    /// The submit future is dropped on timeout, which aborts the in-flight
    /// request and releases its connection.
    async fn attempt(
        &self,
        gateway: &dyn MobileMoneyGateway,
        rail: Rail,
        request: &ChargeRequest,
    ) -> Result<ChargeReceipt, RailFailure> {
        debug!(gateway = gateway.name(), ?rail, reference = %request.reference, "submitting charge");

        let timeout = self.policy.attempt_timeout;
        let response = match tokio::time::timeout(timeout, gateway.submit(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RailFailure::Timeout {
                    after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        self.interpret(rail, response)
    }

    /// Only the provider's own success code counts as a charge.
    fn interpret(&self, rail: Rail, response: GatewayResponse) -> Result<ChargeReceipt, RailFailure> {
        let succeeded = response.response_code.as_deref() == Some(self.policy.success_code.as_str());
        if !succeeded {
            return Err(RailFailure::Declined {
                code: response.response_code,
                description: response.response_desc.or(response.error),
            });
        }

        Ok(ChargeReceipt {
            rail,
            gateway_transaction_id: meaningful(response.transaction_id),
            gateway_conversation_id: meaningful(response.conversation_id),
            response_code: response.response_code,
            response_desc: response.response_desc,
        })
    }
}

/// Providers send "N/A" or "" for missing identifiers.
fn meaningful(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty() && v != "N/A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        response: Result<GatewayResponse, RailFailure>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, response: Result<GatewayResponse, RailFailure>) -> Arc<Self> {
            Arc::new(Self {
                name,
                response,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MobileMoneyGateway for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn submit(&self, _request: &ChargeRequest) -> Result<GatewayResponse, RailFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn approved(id: &str) -> GatewayResponse {
        GatewayResponse {
            success: true,
            transaction_id: Some(id.to_string()),
            conversation_id: Some(format!("conv-{id}")),
            response_code: Some("INS-0".to_string()),
            response_desc: Some("Request processed successfully".to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn http_200_with_failure_code_is_declined() {
        let declined = GatewayResponse {
            success: true,
            response_code: Some("INS-2006".to_string()),
            response_desc: Some("Insufficient balance".to_string()),
            ..GatewayResponse::default()
        };
        let primary = Scripted::new("primary", Ok(declined.clone()));
        let secondary = Scripted::new("secondary", Ok(declined));
        let adapter = PaymentGatewayAdapter::new(primary, secondary, ChargePolicy::default());

        let err = adapter
            .charge("258841234567", dec!(10), "RDP_0001", "00001")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChargeError::BothRailsFailed {
                primary: RailFailure::Declined { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn placeholder_ids_are_dropped() {
        let primary = Scripted::new(
            "primary",
            Ok(GatewayResponse {
                transaction_id: Some("N/A".to_string()),
                ..approved("x")
            }),
        );
        let secondary = Scripted::new("secondary", Err(RailFailure::HttpStatus(500)));
        let adapter = PaymentGatewayAdapter::new(primary, secondary, ChargePolicy::default());

        let receipt = adapter
            .charge("258841234567", dec!(10), "RDP_0001", "00001")
            .await
            .unwrap();
        assert_eq!(receipt.gateway_transaction_id, None);
        assert_eq!(receipt.gateway_conversation_id.as_deref(), Some("conv-x"));
    }

    #[tokio::test]
    async fn primary_success_skips_secondary() {
        let primary = Scripted::new("primary", Ok(approved("p-1")));
        let secondary = Scripted::new("secondary", Ok(approved("s-1")));
        let adapter =
            PaymentGatewayAdapter::new(primary.clone(), secondary.clone(), ChargePolicy::default());

        let receipt = adapter
            .charge("841234567", dec!(10), "RDP_0001", "00001")
            .await
            .unwrap();
        assert_eq!(receipt.rail, Rail::Primary);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn validate_bounds() {
        let primary = Scripted::new("primary", Ok(approved("p")));
        let secondary = Scripted::new("secondary", Ok(approved("s")));
        let adapter = PaymentGatewayAdapter::new(primary, secondary, ChargePolicy::default());

        assert!(matches!(
            adapter.validate("258841234567", dec!(0.5), "RDP_1", "1"),
            Err(ValidationError::AmountOutOfRange { .. })
        ));
        assert!(matches!(
            adapter.validate("258841234567", dec!(1000000), "RDP_1", "1"),
            Err(ValidationError::AmountOutOfRange { .. })
        ));
        assert_eq!(
            adapter.validate("258841234567", dec!(5), "ab", "1"),
            Err(ValidationError::ReferenceTooShort { min: 3 })
        );
        let request = adapter.validate("84 123 4567", dec!(5), "RDP_1", "12345").unwrap();
        assert_eq!(request.payer.as_str(), "258841234567");
        assert_eq!(request.third_party_reference, "12345");
    }
}
