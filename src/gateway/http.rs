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

//! HTTP client for the external mobile-money payment server.

use super::{ChargeRequest, GatewayResponse, MobileMoneyGateway};
use crate::error::{ConfigError, RailFailure};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PAYMENT_PATH: &str = "/api/mpesa/payment";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentPayload<'a> {
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    customer_msisdn: &'a str,
    reference: &'a str,
    third_party_reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentReply {
    #[serde(default)]
    success: bool,
    transaction_id: Option<String>,
    conversation_id: Option<String>,
    response_code: Option<String>,
    response_desc: Option<String>,
    error: Option<String>,
}

impl From<PaymentReply> for GatewayResponse {
    fn from(reply: PaymentReply) -> Self {
        Self {
            success: reply.success,
            transaction_id: reply.transaction_id,
            conversation_id: reply.conversation_id,
            response_code: reply.response_code,
            response_desc: reply.response_desc,
            error: reply.error,
        }
    }
}

/// One payment server reachable over HTTP.
pub struct HttpGateway {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    project_id: Option<String>,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
        project_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            project_id,
            timeout,
        })
    }

    fn payment_url(&self) -> String {
        format!("{}{PAYMENT_PATH}", self.base_url)
    }
}

#[async_trait]
impl MobileMoneyGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, request: &ChargeRequest) -> Result<GatewayResponse, RailFailure> {
        let payload = PaymentPayload {
            amount: request.amount,
            customer_msisdn: request.payer.as_str(),
            reference: &request.reference,
            third_party_reference: &request.third_party_reference,
            project_id: self.project_id.as_deref(),
        };

        let mut builder = self
            .client
            .post(self.payment_url())
            .header("Accept", "application/json")
            .json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-Key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_failure(e, self.timeout))?;
        let status = response.status();
        debug!(gateway = %self.name, %status, "payment server replied");
        if !status.is_success() {
            return Err(RailFailure::HttpStatus(status.as_u16()));
        }

        let reply: PaymentReply = response
            .json()
            .await
            .map_err(|e| RailFailure::Malformed(e.to_string()))?;
        Ok(reply.into())
    }
}

fn transport_failure(error: reqwest::Error, timeout: Duration) -> RailFailure {
    if error.is_timeout() {
        RailFailure::Timeout {
            after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        RailFailure::Transport(error.to_string())
    }
}
