use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Source of "now" in the configured zone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;
}

pub struct SystemClock {
    zone: Tz,
}

impl SystemClock {
    pub fn new(zone: Tz) -> Self {
        SystemClock { zone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.zone)
    }
}

/// Clock pinned to one instant, for tests.
#[cfg(test)]
pub struct FixedClock {
    at: DateTime<Tz>,
}

#[cfg(test)]
impl FixedClock {
    pub fn new(at: DateTime<Tz>) -> Self {
        FixedClock { at }
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        self.at
    }
}
