pub mod booking;
pub mod event;
pub mod hold;
pub mod payment;
pub mod seat;
pub mod waitlist;

pub use booking::{
    generate_reference_code, Booking, BookingRow, BookingStatus, CancelledBooking, NewBooking,
};
pub use event::{EventCapacityRow, EventCapacityState, EventStatus};
pub use hold::{
    HoldDetails, HoldId, HoldInvalidReason, HoldRecord, HoldValidation, SeatLockOwner,
};
pub use payment::{NewPayment, PaymentRecord, PaymentRow, PaymentStatus};
pub use seat::{EffectiveSeatStatus, SeatAvailability, SeatInfo, SeatRow, SeatStatus};
pub use waitlist::{WaitlistEligibility, WaitlistStatus};

pub type UserId = i64;
pub type EventId = i64;
pub type SeatId = i64;
pub type BookingId = i64;
pub type PaymentId = i64;
