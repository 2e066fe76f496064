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

//! Payment notifications.
//!
//! Events are fire-and-forget: publishing never fails and never blocks the
//! reconciliation that produced them.

use crate::base::{PaymentType, SessionId, TransactionId};
use crate::error::RailFailure;
use crossbeam::channel::{Receiver, Sender, unbounded};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    PaymentCompleted {
        transaction_id: TransactionId,
        session: SessionId,
        payer: Option<String>,
        amount: Decimal,
        original_amount: Decimal,
        discount_amount: Decimal,
        promo_code: Option<String>,
        batch_size: u32,
        payment_type: PaymentType,
        gateway_transaction_id: Option<String>,
        /// Where the payer asked for a receipt.
        email: Option<String>,
    },
    PaymentFailed {
        transaction_id: TransactionId,
        session: SessionId,
        amount: Decimal,
        reason: String,
    },
    CriticalGatewayFailure {
        transaction_id: TransactionId,
        session: SessionId,
        amount: Decimal,
        primary: RailFailure,
        secondary: RailFailure,
    },
    UserValidationError {
        session: SessionId,
        reason: String,
    },
}

impl PaymentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaymentCompleted { .. } => "payment_completed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::CriticalGatewayFailure { .. } => "critical_gateway_failure",
            Self::UserValidationError { .. } => "user_validation_error",
        }
    }

    pub fn session(&self) -> &SessionId {
        match self {
            Self::PaymentCompleted { session, .. }
            | Self::PaymentFailed { session, .. }
            | Self::CriticalGatewayFailure { session, .. }
            | Self::UserValidationError { session, .. } => session,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: PaymentEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: PaymentEvent) {
        match &event {
            PaymentEvent::PaymentCompleted {
                transaction_id,
                amount,
                batch_size,
                ..
            } => info!(
                event = event.kind(),
                session = %event.session(),
                %transaction_id,
                %amount,
                batch_size,
                "payment completed"
            ),
            PaymentEvent::PaymentFailed {
                transaction_id,
                reason,
                ..
            } => warn!(
                event = event.kind(),
                session = %event.session(),
                %transaction_id,
                reason,
                "payment failed"
            ),
            PaymentEvent::CriticalGatewayFailure {
                transaction_id,
                primary,
                secondary,
                ..
            } => error!(
                event = event.kind(),
                alert = "payment_rails_down",
                session = %event.session(),
                %transaction_id,
                %primary,
                %secondary,
                "payment gateway outage"
            ),
            PaymentEvent::UserValidationError { reason, .. } => info!(
                event = event.kind(),
                session = %event.session(),
                reason,
                "request rejected"
            ),
        }
    }
}

/// Hands events to a consumer thread, such as an e-mail dispatcher.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: Sender<PaymentEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, Receiver<PaymentEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: PaymentEvent) {
        let kind = event.kind();
        if self.sender.send(event).is_err() {
            warn!(event = kind, "notification consumer is gone, event dropped");
        }
    }
}
