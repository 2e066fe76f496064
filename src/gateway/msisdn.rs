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

//! Mobile-money payer numbers.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

const LOCAL_DIGITS: usize = 9;

/// A payer number normalised to `<country code><local number>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Msisdn(String);

impl Msisdn {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Msisdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which numbers the supported carriers accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsisdnRules {
    pub country_code: String,
    /// Leading digits of the local number, one entry per carrier range.
    pub accepted_prefixes: Vec<String>,
}

impl Default for MsisdnRules {
    fn default() -> Self {
        Self {
            country_code: "258".to_string(),
            accepted_prefixes: vec!["84".to_string(), "85".to_string()],
        }
    }
}

impl MsisdnRules {
    /// Normalises a raw payer number.
    ///
    /// Separators are dropped. A local number of 9 digits, or the same number
    /// already carrying the country code, is accepted when it starts with one
    /// of the accepted prefixes.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPayer`] for anything else.
    pub fn parse(&self, raw: &str) -> Result<Msisdn, ValidationError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

        let local = if digits.len() == self.country_code.len() + LOCAL_DIGITS {
            digits.strip_prefix(self.country_code.as_str())
        } else if digits.len() == LOCAL_DIGITS {
            Some(digits.as_str())
        } else {
            None
        };

        match local {
            Some(local)
                if self
                    .accepted_prefixes
                    .iter()
                    .any(|prefix| local.starts_with(prefix.as_str())) =>
            {
                Ok(Msisdn(format!("{}{local}", self.country_code)))
            }
            _ => Err(ValidationError::InvalidPayer(raw.to_string())),
        }
    }

    pub fn is_valid(&self, raw: &str) -> bool {
        self.parse(raw).is_ok()
    }
}
