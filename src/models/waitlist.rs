use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistStatus {
    Waiting,
    Notified,
    Converted,
    Expired,
    Cancelled,
}

/// Waitlist standing of one user for one event, as reported by the
/// waitlist subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEligibility {
    pub status: WaitlistStatus,
    pub notified: bool,
    pub expired: bool,
}

impl WaitlistEligibility {
    /// `Ok(())` if this entry lets the user confirm a booking, otherwise the
    /// reason to show them.
    pub fn check(&self) -> Result<(), String> {
        match self.status {
            WaitlistStatus::Converted => Ok(()),
            WaitlistStatus::Notified if self.notified && !self.expired => Ok(()),
            WaitlistStatus::Notified | WaitlistStatus::Expired => {
                Err("waitlist notification window has expired".to_string())
            }
            WaitlistStatus::Waiting => {
                Err("still queued on the waitlist; wait for a notification".to_string())
            }
            // Left the waitlist: books like any other user.
            WaitlistStatus::Cancelled => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: WaitlistStatus, notified: bool, expired: bool) -> WaitlistEligibility {
        WaitlistEligibility { status, notified, expired }
    }

    #[test]
    fn notified_within_window_may_book() {
        assert!(entry(WaitlistStatus::Notified, true, false).check().is_ok());
        assert!(entry(WaitlistStatus::Converted, true, false).check().is_ok());
    }

    #[test]
    fn queued_or_lapsed_may_not_book() {
        assert!(entry(WaitlistStatus::Waiting, false, false).check().is_err());
        assert!(entry(WaitlistStatus::Notified, true, true).check().is_err());
        assert!(entry(WaitlistStatus::Expired, true, true).check().is_err());
    }
}
