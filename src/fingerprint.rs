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

//! Content fingerprints for processed artifacts.
//!
//! An artifact is identified by its name, processed byte size and processed
//! pixel dimensions. Two artifacts sharing all four attributes share one
//! fingerprint and are treated as the same paid artifact.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a processed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps an already-computed fingerprint, e.g. one read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the fingerprint of a processed artifact.
///
/// The attributes are joined as `name_size_WxH` and encoded as unpadded
/// URL-safe base64. The encoding is reversible, so distinct attribute tuples
/// never map to the same fingerprint.
pub fn fingerprint(name: &str, byte_size: u64, width: u32, height: u32) -> Fingerprint {
    let content = format!("{name}_{byte_size}_{width}x{height}");
    Fingerprint(URL_SAFE_NO_PAD.encode(content.as_bytes()))
}

/// The descriptive attributes of a processed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
}

impl ArtifactDescriptor {
    pub fn new(name: impl Into<String>, byte_size: u64, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            byte_size,
            width,
            height,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.name, self.byte_size, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_attributes_same_fingerprint() {
        let a = fingerprint("cat.png", 2048, 800, 600);
        let b = fingerprint("cat.png", 2048, 800, 600);
        assert_eq!(a, b);
    }

    #[test]
    fn known_encoding_is_stable() {
        // "a_1_2x3"
        assert_eq!(fingerprint("a", 1, 2, 3).as_str(), "YV8xXzJ4Mw");
    }

    #[test]
    fn any_attribute_change_changes_fingerprint() {
        let base = fingerprint("cat.png", 2048, 800, 600);
        assert_ne!(base, fingerprint("dog.png", 2048, 800, 600));
        assert_ne!(base, fingerprint("cat.png", 2049, 800, 600));
        assert_ne!(base, fingerprint("cat.png", 2048, 801, 600));
        assert_ne!(base, fingerprint("cat.png", 2048, 800, 601));
    }

    #[test]
    fn fingerprint_is_url_safe() {
        let fp = fingerprint("ção ü/?.jpg", 10, 1, 1);
        assert!(
            fp.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn descriptor_matches_free_function() {
        let descriptor = ArtifactDescriptor::new("x.webp", 99, 10, 20);
        assert_eq!(descriptor.fingerprint(), fingerprint("x.webp", 99, 10, 20));
    }
}
