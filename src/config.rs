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

//! Configuration loaded from a TOML file.

use crate::error::ConfigError;
use crate::gateway::{ChargePolicy, HttpGateway, MsisdnRules, PaymentGatewayAdapter};
use crate::pricing::SystemConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default tracing filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Seed for the pricing row when no durable store provides one.
    #[serde(default)]
    pub pricing: SystemConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            gateway: GatewayConfig::default(),
            pricing: SystemConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway.validate()?;
        if self.pricing.price_per_unit < Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "pricing.price_per_unit must not be negative".to_string(),
            ));
        }
        if self.pricing.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "pricing.max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Payment server endpoints and charge limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_primary_url")]
    pub primary_url: String,

    #[serde(default = "default_secondary_url")]
    pub secondary_url: String,

    /// Sent as `X-API-Key` when set.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub project_id: Option<String>,

    /// Budget for each attempt, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_min_amount")]
    pub min_amount: Decimal,

    #[serde(default = "default_max_amount")]
    pub max_amount: Decimal,

    #[serde(default = "default_min_reference_len")]
    pub min_reference_len: usize,

    #[serde(default = "default_reference_prefix")]
    pub reference_prefix: String,

    #[serde(default = "default_success_code")]
    pub success_code: String,

    #[serde(default = "default_country_code")]
    pub country_code: String,

    #[serde(default = "default_accepted_prefixes")]
    pub accepted_prefixes: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_primary_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_secondary_url() -> String {
    "http://localhost:3001".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_min_amount() -> Decimal {
    dec!(1)
}

fn default_max_amount() -> Decimal {
    dec!(999999)
}

const fn default_min_reference_len() -> usize {
    3
}

fn default_reference_prefix() -> String {
    "RDP_".to_string()
}

fn default_success_code() -> String {
    "INS-0".to_string()
}

fn default_country_code() -> String {
    "258".to_string()
}

fn default_accepted_prefixes() -> Vec<String> {
    vec!["84".to_string(), "85".to_string()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            secondary_url: default_secondary_url(),
            api_key: None,
            project_id: None,
            timeout_secs: default_timeout_secs(),
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            min_reference_len: default_min_reference_len(),
            reference_prefix: default_reference_prefix(),
            success_code: default_success_code(),
            country_code: default_country_code(),
            accepted_prefixes: default_accepted_prefixes(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_url.trim().is_empty() || self.secondary_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "gateway.primary_url and gateway.secondary_url are required".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.min_amount > self.max_amount {
            return Err(ConfigError::Invalid(format!(
                "gateway.min_amount {} exceeds gateway.max_amount {}",
                self.min_amount, self.max_amount
            )));
        }
        if self.accepted_prefixes.is_empty() {
            return Err(ConfigError::Invalid(
                "gateway.accepted_prefixes must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn msisdn_rules(&self) -> MsisdnRules {
        MsisdnRules {
            country_code: self.country_code.clone(),
            accepted_prefixes: self.accepted_prefixes.clone(),
        }
    }

    pub fn charge_policy(&self) -> ChargePolicy {
        ChargePolicy {
            attempt_timeout: self.timeout(),
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            min_reference_len: self.min_reference_len,
            success_code: self.success_code.clone(),
            msisdn: self.msisdn_rules(),
        }
    }

    /// Builds an adapter over the two configured HTTP payment servers.
    pub fn build_adapter(&self) -> Result<PaymentGatewayAdapter, ConfigError> {
        self.validate()?;
        let primary = HttpGateway::new(
            "primary",
            &self.primary_url,
            self.api_key.clone(),
            self.project_id.clone(),
            self.timeout(),
        )?;
        let secondary = HttpGateway::new(
            "secondary",
            &self.secondary_url,
            self.api_key.clone(),
            self.project_id.clone(),
            self.timeout(),
        )?;
        Ok(PaymentGatewayAdapter::new(
            Arc::new(primary),
            Arc::new(secondary),
            self.charge_policy(),
        ))
    }
}
