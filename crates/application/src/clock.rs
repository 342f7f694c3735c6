use chrono::Utc;
use domain::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

#[cfg(any(test, feature = "testing"))]
pub use fixed::FixedClock;

#[cfg(any(test, feature = "testing"))]
mod fixed {
    use std::sync::Mutex;

    use chrono::Duration;
    use domain::Timestamp;

    use super::Clock;

    /// 手动推进的时钟，测试中用来跨越令牌过期和配额日边界。
    #[derive(Debug)]
    pub struct FixedClock {
        now: Mutex<Timestamp>,
    }

    impl FixedClock {
        pub fn new(now: Timestamp) -> Self {
            Self {
                now: Mutex::new(now),
            }
        }

        pub fn set(&self, now: Timestamp) {
            if let Ok(mut guard) = self.now.lock() {
                *guard = now;
            }
        }

        pub fn advance(&self, by: Duration) {
            if let Ok(mut guard) = self.now.lock() {
                *guard += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            match self.now.lock() {
                Ok(guard) => *guard,
                Err(poisoned) => *poisoned.into_inner(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn fixed_clock_moves_only_when_told() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 23, 59, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(2));
        assert_eq!(clock.now(), start + Duration::minutes(2));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
