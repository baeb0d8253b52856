#![allow(dead_code)]

use std::sync::Arc;

use seat_reservation::holds::InMemoryHoldStore;
use seat_reservation::mocks::{MockPaymentProcessor, MockWaitlist, StaticEventDirectory};
use seat_reservation::models::{
    EventCapacityState, EventId, EventStatus, SeatId, SeatInfo, SeatStatus, UserId,
};
use seat_reservation::repository::InMemoryBookingRepository;
use seat_reservation::services::{HoldRequest, OrchestratorSettings, ReservationOrchestrator};

pub const EVENT: EventId = 1;
pub const OTHER_EVENT: EventId = 2;
pub const SEAT_PRICE: i64 = 2_500;
pub const TICKET_PRICE: i64 = 4_000;

pub struct Harness {
    pub holds: Arc<InMemoryHoldStore>,
    pub bookings: Arc<InMemoryBookingRepository>,
    pub events: Arc<StaticEventDirectory>,
    pub waitlist: Arc<MockWaitlist>,
    pub payments: Arc<MockPaymentProcessor>,
    pub orchestrator: Arc<ReservationOrchestrator>,
}

pub fn event(event_id: EventId, total_capacity: i32) -> EventCapacityState {
    EventCapacityState {
        event_id,
        status: EventStatus::OnSale,
        total_capacity,
        booked_count: 0,
        unit_price_cents: TICKET_PRICE,
    }
}

pub fn seat(id: SeatId) -> SeatInfo {
    SeatInfo {
        id,
        section_id: 1,
        row_label: "A".into(),
        seat_number: id as i32,
        status: SeatStatus::Available,
        price_cents: SEAT_PRICE,
    }
}

impl Harness {
    /// Two on-sale events sharing one venue with seats `1..=seat_count`.
    pub fn new(total_capacity: i32, seat_count: SeatId) -> Self {
        let holds = Arc::new(InMemoryHoldStore::new());
        let bookings = Arc::new(InMemoryBookingRepository::new());
        let events = Arc::new(StaticEventDirectory::new());
        let waitlist = Arc::new(MockWaitlist::new());
        let payments = Arc::new(MockPaymentProcessor::new());

        for event_id in [EVENT, OTHER_EVENT] {
            let state = event(event_id, total_capacity);
            bookings.add_event(state.clone());
            events.add_event(state);
            for id in 1..=seat_count {
                events.add_seat(event_id, seat(id));
            }
        }

        let orchestrator = Arc::new(ReservationOrchestrator::new(
            holds.clone(),
            bookings.clone(),
            events.clone(),
            waitlist.clone(),
            payments.clone(),
            OrchestratorSettings::default(),
        ));

        Self {
            holds,
            bookings,
            events,
            waitlist,
            payments,
            orchestrator,
        }
    }

    pub fn block_seat(&self, event_id: EventId, id: SeatId) {
        let mut blocked = seat(id);
        blocked.status = SeatStatus::Blocked;
        self.events.add_seat(event_id, blocked);
    }
}

pub fn hold_request(user_id: UserId, event_id: EventId, seat_ids: &[SeatId]) -> HoldRequest {
    HoldRequest {
        user_id,
        event_id,
        seat_ids: seat_ids.to_vec(),
        ttl_secs: None,
    }
}
