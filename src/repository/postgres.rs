use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, warn};

use super::{BookingRepository, CreatedBooking};
use crate::error::{ReservationError, Result};
use crate::models::{
    Booking, BookingId, BookingRow, CancelledBooking, EventCapacityRow, EventCapacityState,
    EventId, NewBooking, NewPayment, PaymentId, PaymentRecord, PaymentRow, PaymentStatus, SeatId,
};

const BOOKING_COLUMNS: &str = "id, reference_code, user_id, event_id, quantity, total_cents, \
     status, version, created_at, updated_at, cancelled_at";

const PAYMENT_COLUMNS: &str =
    "id, booking_id, amount_cents, method, status, transaction_ref, created_at";

#[derive(Clone)]
pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Seats of `seat_ids` that a committed booking holds right now.
    /// Called after losing the insert race, when the winner has committed.
    async fn contended_seats(&self, event_id: EventId, seat_ids: &[SeatId]) -> Result<Vec<SeatId>> {
        let taken = self.booked_seats(event_id, seat_ids).await?;
        if taken.is_empty() {
            // The winner was cancelled in between; the request is still stale.
            return Ok(seat_ids.to_vec());
        }
        Ok(taken)
    }
}

#[derive(Clone, Copy)]
enum RowLock {
    /// Serialises every capacity change on the event.
    Update,
    /// Keeps the event row stable without blocking other seat-level bookings.
    Share,
}

async fn lock_event(
    conn: &mut PgConnection,
    event_id: EventId,
    lock: RowLock,
) -> Result<EventCapacityState> {
    let clause = match lock {
        RowLock::Update => "FOR UPDATE",
        RowLock::Share => "FOR SHARE",
    };
    let sql = format!(
        "SELECT id, status, total_capacity, booked_count, unit_price_cents
         FROM events WHERE id = $1 {clause}"
    );

    let row: Option<EventCapacityRow> = sqlx::query_as(&sql)
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.ok_or(ReservationError::EventNotFound { event_id })?
        .try_into()
}

async fn insert_booking(conn: &mut PgConnection, booking: &NewBooking) -> Result<BookingRow> {
    let sql = format!(
        "INSERT INTO bookings (reference_code, user_id, event_id, quantity, total_cents, status, version)
         VALUES ($1, $2, $3, $4, $5, 'CONFIRMED', 1)
         RETURNING {BOOKING_COLUMNS}"
    );
    let row = sqlx::query_as::<_, BookingRow>(&sql)
        .bind(&booking.reference_code)
        .bind(booking.user_id)
        .bind(booking.event_id)
        .bind(booking.quantity)
        .bind(booking.total_cents)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row)
}

async fn insert_payment(
    conn: &mut PgConnection,
    booking_id: BookingId,
    payment: &NewPayment,
) -> Result<PaymentRecord> {
    let sql = format!(
        "INSERT INTO payments (booking_id, amount_cents, method, status)
         VALUES ($1, $2, $3, 'PENDING')
         RETURNING {PAYMENT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, PaymentRow>(&sql)
        .bind(booking_id)
        .bind(payment.amount_cents)
        .bind(&payment.method)
        .fetch_one(&mut *conn)
        .await?;
    row.try_into()
}

async fn seat_ids_for(conn: &mut PgConnection, booking_id: BookingId) -> Result<Vec<SeatId>> {
    let seats = sqlx::query_scalar::<_, SeatId>(
        "SELECT seat_id FROM seat_bookings WHERE booking_id = $1 ORDER BY seat_id",
    )
    .bind(booking_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(seats)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn create_with_capacity_check(
        &self,
        booking: &NewBooking,
        payment: Option<&NewPayment>,
    ) -> Result<CreatedBooking> {
        let quantity = booking.quantity.ok_or_else(|| {
            ReservationError::InvalidInput("quantity booking requires a quantity".into())
        })?;

        // Any early return drops the transaction, which rolls it back.
        let mut tx = self.pool.begin().await?;

        let state = lock_event(&mut tx, booking.event_id, RowLock::Update).await?;
        let new_count = state.admit(quantity)?;

        let row = insert_booking(&mut tx, booking).await?;

        sqlx::query("UPDATE events SET booked_count = $2 WHERE id = $1")
            .bind(booking.event_id)
            .bind(new_count)
            .execute(&mut *tx)
            .await?;

        let payment = match payment {
            Some(p) => Some(insert_payment(&mut tx, row.id, p).await?),
            None => None,
        };

        tx.commit().await?;

        info!(
            booking_id = row.id,
            event_id = booking.event_id,
            quantity,
            booked_count = new_count,
            total_capacity = state.total_capacity,
            "Quantity booking committed"
        );

        Ok(CreatedBooking {
            booking: row.into_booking(Vec::new())?,
            payment,
        })
    }

    async fn create_with_seats(
        &self,
        booking: &NewBooking,
        payment: Option<&NewPayment>,
    ) -> Result<CreatedBooking> {
        // Ascending order keeps concurrent inserts from waiting on each other in a cycle.
        let mut seat_ids = booking.seat_ids.clone();
        seat_ids.sort_unstable();

        let mut tx = self.pool.begin().await?;

        lock_event(&mut tx, booking.event_id, RowLock::Share)
            .await?
            .ensure_bookable()?;

        let conflicts = sqlx::query_scalar::<_, SeatId>(
            r#"
            SELECT sb.seat_id
            FROM seat_bookings sb
            JOIN bookings b ON b.id = sb.booking_id
            WHERE sb.event_id = $1
              AND sb.seat_id = ANY($2)
              AND b.status <> 'CANCELLED'
            ORDER BY sb.seat_id
            FOR UPDATE OF sb
            "#,
        )
        .bind(booking.event_id)
        .bind(&seat_ids[..])
        .fetch_all(&mut *tx)
        .await?;

        if !conflicts.is_empty() {
            debug!(event_id = booking.event_id, seats = ?conflicts, "Seat conflict, rolling back");
            return Err(ReservationError::SeatsAlreadyBooked { seat_ids: conflicts });
        }

        let row = insert_booking(&mut tx, booking).await?;

        // The (seat_id, event_id) unique constraint catches a concurrent
        // insert that slipped past the check above.
        let inserted = sqlx::query(
            r#"
            INSERT INTO seat_bookings (booking_id, seat_id, event_id)
            SELECT $1, seat_id, $2 FROM UNNEST($3::bigint[]) AS t(seat_id)
            "#,
        )
        .bind(row.id)
        .bind(booking.event_id)
        .bind(&seat_ids[..])
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if !is_unique_violation(&e) {
                return Err(e.into());
            }
            tx.rollback().await?;
            let contended = self.contended_seats(booking.event_id, &seat_ids).await?;
            warn!(event_id = booking.event_id, seats = ?contended, "Lost seat insert race");
            return Err(ReservationError::SeatsAlreadyBooked { seat_ids: contended });
        }

        let payment = match payment {
            Some(p) => Some(insert_payment(&mut tx, row.id, p).await?),
            None => None,
        };

        tx.commit().await?;

        info!(
            booking_id = row.id,
            event_id = booking.event_id,
            seats = ?seat_ids,
            "Seat booking committed"
        );

        Ok(CreatedBooking {
            booking: row.into_booking(seat_ids)?,
            payment,
        })
    }

    async fn find(&self, booking_id: BookingId) -> Result<Option<Booking>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");

        let Some(row) = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };

        let seats = seat_ids_for(&mut conn, booking_id).await?;
        row.into_booking(seats).map(Some)
    }

    async fn cancel_if_version(
        &self,
        booking_id: BookingId,
        expected_version: i32,
    ) -> Result<Option<CancelledBooking>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE bookings
             SET status = 'CANCELLED', version = version + 1,
                 cancelled_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND version = $2 AND status = 'CONFIRMED'
             RETURNING {BOOKING_COLUMNS}"
        );
        let Some(row) = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .bind(expected_version)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let freed = sqlx::query_scalar::<_, SeatId>(
            "DELETE FROM seat_bookings WHERE booking_id = $1 RETURNING seat_id",
        )
        .bind(booking_id)
        .fetch_all(&mut *tx)
        .await?;

        let released_quantity = row.quantity.unwrap_or(0);
        if released_quantity > 0 {
            sqlx::query(
                "UPDATE events SET booked_count = GREATEST(booked_count - $2, 0) WHERE id = $1",
            )
            .bind(row.event_id)
            .bind(released_quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut freed_seat_ids = freed;
        freed_seat_ids.sort_unstable();
        Ok(Some(CancelledBooking {
            booking: row.into_booking(freed_seat_ids.clone())?,
            freed_seat_ids,
            released_quantity,
        }))
    }

    async fn booked_seats(&self, event_id: EventId, seat_ids: &[SeatId]) -> Result<Vec<SeatId>> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let seats = sqlx::query_scalar::<_, SeatId>(
            r#"
            SELECT sb.seat_id
            FROM seat_bookings sb
            JOIN bookings b ON b.id = sb.booking_id
            WHERE sb.event_id = $1 AND sb.seat_id = ANY($2) AND b.status = 'CONFIRMED'
            ORDER BY sb.seat_id
            "#,
        )
        .bind(event_id)
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn update_payment(
        &self,
        payment_id: PaymentId,
        status: PaymentStatus,
        transaction_ref: Option<&str>,
    ) -> Result<PaymentRecord> {
        let sql = format!(
            "UPDATE payments
             SET status = $2, transaction_ref = COALESCE($3, transaction_ref), updated_at = NOW()
             WHERE id = $1
             RETURNING {PAYMENT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment_id)
            .bind(status.as_str())
            .bind(transaction_ref)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ReservationError::Storage(format!("payment {payment_id} not found")))?;
        row.try_into()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
