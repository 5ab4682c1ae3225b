//! Log severity for repeated tick failures

use crate::error::ErrorClass;
use tracing::Level;

/// Consecutive failures of one class before logging at ERROR
pub const ESCALATE_AFTER: u32 = 3;

#[derive(Debug, Default)]
pub struct Escalation {
    class: Option<ErrorClass>,
    consecutive: u32,
}

impl Escalation {
    /// Count a failure and return the level to log it at
    pub fn record(&mut self, class: ErrorClass) -> Level {
        if self.class == Some(class) {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.class = Some(class);
            self.consecutive = 1;
        }
        if self.consecutive >= ESCALATE_AFTER {
            Level::ERROR
        } else {
            Level::WARN
        }
    }

    pub fn reset(&mut self) {
        self.class = None;
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_consecutive_failure_escalates() {
        let mut e = Escalation::default();
        assert_eq!(e.record(ErrorClass::Transient), Level::WARN);
        assert_eq!(e.record(ErrorClass::Transient), Level::WARN);
        assert_eq!(e.record(ErrorClass::Transient), Level::ERROR);

        // A different class starts over
        assert_eq!(e.record(ErrorClass::Auth), Level::WARN);
        assert_eq!(e.consecutive(), 1);

        e.reset();
        assert_eq!(e.record(ErrorClass::Auth), Level::WARN);
    }
}
