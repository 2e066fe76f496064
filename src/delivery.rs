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

//! Delivery trigger.
//!
//! After a reconciliation the orchestrator hands the full requested batch to a
//! [`DeliverySink`]. The sink reports what it managed to release; a shortfall
//! is never a payment failure.

use crate::base::SessionId;
use crate::fingerprint::{ArtifactDescriptor, Fingerprint};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

/// What a delivery attempt released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<Fingerprint>,
    pub missing: Vec<Fingerprint>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, session: &SessionId, fingerprints: &[Fingerprint]) -> DeliveryReport;
}

/// A processed artifact released to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredArtifact {
    pub session: SessionId,
    pub fingerprint: Fingerprint,
    pub name: String,
    pub blob: Bytes,
}

struct StoredArtifact {
    descriptor: ArtifactDescriptor,
    blob: Bytes,
}

/// Holds processed blobs in memory until they are paid for.
///
/// Delivered artifacts go out on the channel returned by [`ArtifactVault::new`];
/// the vault keeps them so a later delivery retry can release them again.
pub struct ArtifactVault {
    artifacts: DashMap<Fingerprint, StoredArtifact>,
    outbox: UnboundedSender<DeliveredArtifact>,
}

impl ArtifactVault {
    pub fn new() -> (Self, UnboundedReceiver<DeliveredArtifact>) {
        let (outbox, receiver) = unbounded_channel();
        (
            Self {
                artifacts: DashMap::new(),
                outbox,
            },
            receiver,
        )
    }

    /// Stores a processed artifact and returns its fingerprint.
    pub fn register(&self, descriptor: ArtifactDescriptor, blob: Bytes) -> Fingerprint {
        let fingerprint = descriptor.fingerprint();
        self.artifacts
            .insert(fingerprint.clone(), StoredArtifact { descriptor, blob });
        fingerprint
    }

    pub fn evict(&self, fingerprint: &Fingerprint) -> bool {
        self.artifacts.remove(fingerprint).is_some()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.artifacts.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl DeliverySink for ArtifactVault {
    async fn deliver(&self, session: &SessionId, fingerprints: &[Fingerprint]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for fingerprint in fingerprints {
            // Clone out of the shard so no map guard is held while sending.
            let found = self.artifacts.get(fingerprint).map(|entry| {
                let stored = entry.value();
                (stored.descriptor.name.clone(), stored.blob.clone())
            });

            let Some((name, blob)) = found else {
                debug!(session = %session, %fingerprint, "artifact no longer held");
                report.missing.push(fingerprint.clone());
                continue;
            };

            let artifact = DeliveredArtifact {
                session: session.clone(),
                fingerprint: fingerprint.clone(),
                name,
                blob,
            };
            if self.outbox.send(artifact).is_err() {
                warn!(session = %session, %fingerprint, "delivery receiver closed");
                report.missing.push(fingerprint.clone());
            } else {
                report.delivered.push(fingerprint.clone());
            }
        }

        report
    }
}
