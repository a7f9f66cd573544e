// Wall-clock source for the whole process.
//
// Every component draws "now" from a Clock value so tests can pin time.
// Schedules are evaluated in the configured regional zone, which keeps the
// day/night scrape cadence and the 03:00 statistics job correct across
// daylight-saving transitions.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Clock {
    zone: Tz,
    fixed: Option<DateTime<Utc>>,
}

impl Clock {
    /// System clock in the given zone. Fails on an unknown zone name so a
    /// config typo surfaces at startup.
    pub fn new(zone_name: &str) -> Result<Self, String> {
        let zone: Tz = zone_name
            .parse()
            .map_err(|_| format!("unknown timezone: {zone_name}"))?;
        Ok(Clock { zone, fixed: None })
    }

    /// Clock pinned to a fixed instant, for tests.
    pub fn fixed(zone_name: &str, instant: DateTime<Utc>) -> Result<Self, String> {
        let mut clock = Self::new(zone_name)?;
        clock.fixed = Some(instant);
        Ok(clock)
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// Current instant in the configured zone.
    pub fn now(&self) -> DateTime<Tz> {
        match self.fixed {
            Some(instant) => instant.with_timezone(&self.zone),
            None => Utc::now().with_timezone(&self.zone),
        }
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.fixed.unwrap_or_else(Utc::now)
    }

    /// Interpret a naive local datetime in the configured zone.
    /// Ambiguous instants (DST fall-back) resolve to the earlier offset.
    pub fn localize(&self, naive: chrono::NaiveDateTime) -> Option<DateTime<Tz>> {
        self.zone.from_local_datetime(&naive).earliest()
    }
}
