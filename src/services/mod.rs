pub mod capacity;
pub mod notifier;
pub mod orchestrator;
pub mod payment;
pub mod seat_lock;
pub mod versioned;

pub use capacity::{CapacityGate, QuantityBookingRequest};
pub use notifier::{CapacityFreed, NotifierStats, WaitlistNotifier};
pub use orchestrator::{BookingConfirmation, OrchestratorSettings, ReservationOrchestrator};
pub use payment::{PaymentStep, PaymentSummary};
pub use seat_lock::{HoldRequest, SeatLockManager};
pub use versioned::VersionedMutator;
