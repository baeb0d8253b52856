mod common;

use std::time::Duration;

use common::{hold_request, Harness, EVENT, OTHER_EVENT, SEAT_PRICE, TICKET_PRICE};
use seat_reservation::models::{
    BookingStatus, EffectiveSeatStatus, HoldInvalidReason, PaymentStatus, WaitlistEligibility,
    WaitlistStatus,
};
use seat_reservation::repository::BookingRepository;
use seat_reservation::services::QuantityBookingRequest;
use seat_reservation::{ErrorKind, ReservationError};

fn entry(status: WaitlistStatus, notified: bool, expired: bool) -> WaitlistEligibility {
    WaitlistEligibility {
        status,
        notified,
        expired,
    }
}

#[tokio::test]
async fn hold_then_confirm_books_exactly_the_held_seats() {
    let h = Harness::new(10, 5);
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[2, 1]))
        .await
        .unwrap();
    assert_eq!(hold.seat_ids, vec![1, 2]);

    let confirmation = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap();

    assert_eq!(confirmation.seat_ids, vec![1, 2]);
    assert_eq!(confirmation.status, BookingStatus::Confirmed);
    assert_eq!(confirmation.version, 1);
    assert_eq!(confirmation.total_cents, 2 * SEAT_PRICE);
    assert!(confirmation.reference_code.starts_with("BK-"));
    assert_eq!(confirmation.payment.status, PaymentStatus::Completed);
    assert_eq!(confirmation.payment.amount_cents, 2 * SEAT_PRICE);
    assert!(confirmation.payment.transaction_ref.is_some());

    // The hold is consumed by the confirmation.
    let err = h.orchestrator.hold_details(hold.hold_id).await.unwrap_err();
    assert!(matches!(err, ReservationError::HoldNotFound { .. }));
    assert_eq!(h.holds.lock_count(), 0);

    let seats = h.orchestrator.check_seat_availability(EVENT, &[1, 2, 3]).await.unwrap();
    let statuses: Vec<_> = seats.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            EffectiveSeatStatus::Booked,
            EffectiveSeatStatus::Booked,
            EffectiveSeatStatus::Available
        ]
    );

    let err = h
        .orchestrator
        .hold_seats(hold_request(11, EVENT, &[1]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::SeatsAlreadyBooked { ref seat_ids } if seat_ids == &vec![1]));
}

#[tokio::test]
async fn hold_for_another_event_cannot_confirm() {
    let h = Harness::new(10, 5);
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, OTHER_EVENT, &[1]))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReservationError::HoldEventMismatch { held_for: OTHER_EVENT, requested: EVENT }
    ));
    assert!(h.payments.charges().is_empty());
}

#[tokio::test]
async fn someone_elses_hold_is_rejected() {
    let h = Harness::new(10, 5);
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[3]))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .confirm_booking(99, hold.hold_id, EVENT, "card")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReservationError::HoldRejected { reason: HoldInvalidReason::WrongOwner, .. }
    ));

    let err = h.orchestrator.release_hold(hold.hold_id, 99).await.unwrap_err();
    assert!(matches!(err, ReservationError::HoldNotFound { .. }));
    assert_eq!(h.orchestrator.release_hold(hold.hold_id, 10).await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_hold_must_start_over() {
    let h = Harness::new(10, 5);
    let mut request = hold_request(10, EVENT, &[4]);
    request.ttl_secs = Some(60);
    let hold = h.orchestrator.hold_seats(request).await.unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;

    let err = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReservationError::HoldRejected { reason: HoldInvalidReason::Missing, .. }
    ));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let fresh = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[4]))
        .await
        .unwrap();
    assert_ne!(fresh.hold_id, hold.hold_id);
    h.orchestrator
        .confirm_booking(10, fresh.hold_id, EVENT, "card")
        .await
        .unwrap();
}

#[tokio::test]
async fn queued_waitlist_user_cannot_confirm() {
    let h = Harness::new(10, 5);
    h.waitlist
        .set_entry(10, EVENT, entry(WaitlistStatus::Waiting, false, false));
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1]))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::WaitlistIneligible(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);

    // Nothing was booked and the hold is still there.
    assert!(h.orchestrator.hold_details(hold.hold_id).await.is_ok());
    assert!(h.bookings.booked_seats(EVENT, &[1]).await.unwrap().is_empty());
}

#[tokio::test]
async fn lapsed_waitlist_notification_cannot_confirm() {
    let h = Harness::new(10, 5);
    h.waitlist
        .set_entry(10, EVENT, entry(WaitlistStatus::Notified, true, true));
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1]))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::WaitlistIneligible(_)));
}

#[tokio::test]
async fn notified_waitlist_user_books_and_is_converted() {
    let h = Harness::new(10, 5);
    h.waitlist
        .set_entry(10, EVENT, entry(WaitlistStatus::Notified, true, false));
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[5]))
        .await
        .unwrap();

    let confirmation = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap();
    assert_eq!(h.waitlist.converted(), vec![(10, EVENT, confirmation.booking_id)]);
}

#[tokio::test]
async fn failed_conversion_does_not_fail_the_booking() {
    let h = Harness::new(10, 5);
    h.waitlist
        .set_entry(10, EVENT, entry(WaitlistStatus::Notified, true, false));
    h.waitlist.fail_conversions(true);
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[5]))
        .await
        .unwrap();

    h.orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap();
    assert!(h.waitlist.converted().is_empty());
    assert_eq!(h.holds.lock_count(), 0);
}

#[tokio::test]
async fn declined_payment_keeps_the_booking() {
    let h = Harness::new(10, 5);
    h.payments.decline_all(true);
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1, 2]))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap_err();
    let booking_id = match err {
        ReservationError::PaymentFailed { booking_id, .. } => booking_id,
        other => panic!("expected PaymentFailed, got {other:?}"),
    };

    let booking = h.orchestrator.get_booking(booking_id, 10).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.seat_ids, vec![1, 2]);

    let payments = h.bookings.payments_for(booking_id);
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Failed);
    assert_eq!(h.holds.lock_count(), 0);
}

#[tokio::test]
async fn cancel_frees_seats_and_notifies_the_waitlist() {
    let h = Harness::new(10, 5);
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1, 2]))
        .await
        .unwrap();
    let confirmation = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap();

    let cancelled = h
        .orchestrator
        .cancel_booking(confirmation.booking_id, confirmation.version, 10)
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.booking.version, 2);
    assert_eq!(cancelled.freed_seat_ids, vec![1, 2]);

    // Seats are free again in the same step as the cancel.
    h.orchestrator
        .hold_seats(hold_request(11, EVENT, &[1]))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .cancel_booking(confirmation.booking_id, confirmation.version, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::VersionMismatch { .. }));

    h.orchestrator.shutdown().await;
    assert_eq!(h.waitlist.notifications(), vec![(EVENT, 2)]);
    assert_eq!(h.orchestrator.notifier_stats().delivered, 1);
}

#[tokio::test]
async fn notification_failure_does_not_undo_the_cancel() {
    let h = Harness::new(10, 5);
    h.waitlist.fail_notifications(true);
    let hold = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[3]))
        .await
        .unwrap();
    let confirmation = h
        .orchestrator
        .confirm_booking(10, hold.hold_id, EVENT, "card")
        .await
        .unwrap();

    h.orchestrator
        .update_booking_status(confirmation.booking_id, 1, 10, BookingStatus::Cancelled)
        .await
        .unwrap();
    h.orchestrator.shutdown().await;

    assert_eq!(h.orchestrator.notifier_stats().failed, 1);
    let booking = h.orchestrator.get_booking(confirmation.booking_id, 10).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn general_admission_respects_capacity_and_returns_it_on_cancel() {
    let h = Harness::new(3, 0);
    let request = |user_id, quantity| QuantityBookingRequest {
        user_id,
        event_id: EVENT,
        quantity,
        payment_method: "card".into(),
    };

    let first = h
        .orchestrator
        .book_general_admission(request(10, 2))
        .await
        .unwrap();
    assert_eq!(first.quantity, Some(2));
    assert_eq!(first.total_cents, 2 * TICKET_PRICE);

    let err = h
        .orchestrator
        .book_general_admission(request(11, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::InsufficientCapacity { requested: 2, remaining: 1 }));

    h.orchestrator
        .cancel_booking(first.booking_id, first.version, 10)
        .await
        .unwrap();
    assert_eq!(h.bookings.event_state(EVENT).unwrap().booked_count, 0);

    h.orchestrator
        .book_general_admission(request(11, 3))
        .await
        .unwrap();
    let err = h
        .orchestrator
        .book_general_admission(request(12, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::FullyBooked { event_id: EVENT }));

    h.orchestrator.shutdown().await;
    assert_eq!(h.waitlist.notifications(), vec![(EVENT, 2)]);
}

#[tokio::test]
async fn blocked_and_unknown_seats_cannot_be_held() {
    let h = Harness::new(10, 5);
    h.block_seat(EVENT, 2);

    let err = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1, 2]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::SeatBlocked { ref seat_ids } if seat_ids == &vec![2]));

    let err = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1, 42]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::SeatNotFound { ref seat_ids } if seat_ids == &vec![42]));
    assert_eq!(h.holds.lock_count(), 0);
}

#[tokio::test]
async fn availability_follows_precedence() {
    let h = Harness::new(10, 5);
    h.block_seat(EVENT, 5);

    let booked = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1]))
        .await
        .unwrap();
    h.orchestrator
        .confirm_booking(10, booked.hold_id, EVENT, "card")
        .await
        .unwrap();
    let held = h
        .orchestrator
        .hold_seats(hold_request(11, EVENT, &[2]))
        .await
        .unwrap();

    let seats = h
        .orchestrator
        .check_seat_availability(EVENT, &[1, 2, 3, 5])
        .await
        .unwrap();
    let statuses: Vec<_> = seats.iter().map(|s| (s.seat_id, s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (1, EffectiveSeatStatus::Booked),
            (2, EffectiveSeatStatus::Held),
            (3, EffectiveSeatStatus::Available),
            (5, EffectiveSeatStatus::Blocked),
        ]
    );
    assert_eq!(seats[1].held_by.map(|o| o.hold_id), Some(held.hold_id));
}

#[tokio::test]
async fn store_outage_disables_holding() {
    let h = Harness::new(10, 5);
    h.holds.set_unavailable(true);

    let err = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);

    h.holds.set_unavailable(false);
    h.bookings.set_unavailable(true);
    let err = h
        .orchestrator
        .hold_seats(hold_request(10, EVENT, &[1]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::StoreUnavailable { store: "postgres", .. }));
}
