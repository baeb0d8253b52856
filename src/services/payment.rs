//! payment.rs
//!
//! Платёжный шаг после создания бронирования.
//!
//! Бронирование и запись платежа в статусе `PENDING` уже зафиксированы в
//! одной транзакции. Здесь выполняется списание через [`PaymentProcessor`],
//! после чего запись платежа переводится в `COMPLETED` или `FAILED`.
//! Неудачный платёж не откатывает бронирование.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::collaborators::{ChargeRequest, PaymentProcessor};
use crate::error::{ReservationError, Result};
use crate::models::{Booking, PaymentId, PaymentRecord, PaymentStatus};
use crate::repository::BookingRepository;

/// Краткая сводка платежа для ответа клиенту.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSummary {
    pub payment_id: PaymentId,
    pub amount_cents: i64,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_ref: Option<String>,
}

impl From<PaymentRecord> for PaymentSummary {
    fn from(record: PaymentRecord) -> Self {
        Self {
            payment_id: record.id,
            amount_cents: record.amount_cents,
            method: record.method,
            status: record.status,
            transaction_ref: record.transaction_ref,
        }
    }
}

pub struct PaymentStep {
    repo: Arc<dyn BookingRepository>,
    processor: Arc<dyn PaymentProcessor>,
}

impl PaymentStep {
    pub fn new(repo: Arc<dyn BookingRepository>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { repo, processor }
    }

    /// Списывает оплату за бронирование и обновляет запись платежа.
    ///
    /// Ошибка списания возвращается как `PaymentFailed`; бронирование при
    /// этом остаётся `CONFIRMED`.
    pub async fn settle(&self, booking: &Booking, pending: PaymentRecord) -> Result<PaymentSummary> {
        let request = ChargeRequest {
            booking_id: booking.id,
            user_id: booking.user_id,
            amount_cents: pending.amount_cents,
            method: pending.method.clone(),
        };

        match self.processor.charge(&request).await {
            Ok(receipt) => {
                info!(
                    booking_id = booking.id,
                    payment_id = pending.id,
                    amount_cents = pending.amount_cents,
                    transaction_ref = %receipt.transaction_ref,
                    "💳 Payment completed"
                );
                match self
                    .repo
                    .update_payment(pending.id, PaymentStatus::Completed, Some(&receipt.transaction_ref))
                    .await
                {
                    Ok(record) => Ok(record.into()),
                    Err(e) => {
                        // Деньги списаны; запись будет сверена позже.
                        error!(payment_id = pending.id, error = %e, "Failed to record completed payment");
                        let mut summary = PaymentSummary::from(pending);
                        summary.status = PaymentStatus::Completed;
                        summary.transaction_ref = Some(receipt.transaction_ref);
                        Ok(summary)
                    }
                }
            }
            Err(charge_error) => {
                warn!(
                    booking_id = booking.id,
                    payment_id = pending.id,
                    error = %charge_error,
                    "💳 Payment failed, booking kept"
                );
                if let Err(e) = self
                    .repo
                    .update_payment(pending.id, PaymentStatus::Failed, None)
                    .await
                {
                    error!(payment_id = pending.id, error = %e, "Failed to record failed payment");
                }
                Err(ReservationError::PaymentFailed {
                    booking_id: booking.id,
                    reason: charge_error.to_string(),
                })
            }
        }
    }
}
