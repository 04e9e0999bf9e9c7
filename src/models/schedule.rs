//! Schedule configuration for time-of-day (`horario`) and interval
//! (`intervalo`) triggers.
//!
//! The configuration is stored as opaque JSON on the response and only
//! interpreted here, for the two trigger types that need it.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Daily wall-clock window, optionally restricted to ISO weekdays (1 = Monday).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub weekdays: Vec<u32>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Parsed form of [`TimeWindow`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedWindow {
    start: NaiveTime,
    end: NaiveTime,
    weekdays: Vec<u32>,
    offset: FixedOffset,
}

impl TimeWindow {
    pub fn from_value(value: &serde_json::Value) -> Result<ParsedWindow, String> {
        let window: TimeWindow =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        window.parse()
    }

    pub fn parse(&self) -> Result<ParsedWindow, String> {
        let start = parse_hhmm(&self.start)?;
        let end = parse_hhmm(&self.end)?;
        if start == end {
            return Err("window start and end must differ".to_string());
        }
        if let Some(day) = self.weekdays.iter().find(|d| !(1..=7).contains(*d)) {
            return Err(format!("weekday {day} out of range 1-7"));
        }
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or_else(|| format!("utc offset {} out of range", self.utc_offset_minutes))?;
        Ok(ParsedWindow {
            start,
            end,
            weekdays: self.weekdays.clone(),
            offset,
        })
    }
}

impl ParsedWindow {
    /// Start instant of the window occurrence containing `at`, if any.
    ///
    /// A window with `start > end` wraps midnight; its occurrence began on
    /// the previous local day when `at` falls before `end`.
    pub fn occurrence_start(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = at.with_timezone(&self.offset);
        let time = local.time();

        let started_today = if self.start < self.end {
            if time >= self.start && time < self.end {
                true
            } else {
                return None;
            }
        } else if time >= self.start {
            true
        } else if time < self.end {
            false
        } else {
            return None;
        };

        let start_date = if started_today {
            local.date_naive()
        } else {
            local.date_naive() - Duration::days(1)
        };

        if !self.weekdays.is_empty()
            && !self
                .weekdays
                .contains(&start_date.weekday().number_from_monday())
        {
            return None;
        }

        start_date
            .and_time(self.start)
            .and_local_timezone(self.offset)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.occurrence_start(at).is_some()
    }
}

/// Minimum elapsed time between two runs of an interval rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntervalSpec {
    pub interval_secs: u64,
}

impl IntervalSpec {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, String> {
        let spec: IntervalSpec =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        if spec.interval_secs == 0 {
            return Err("interval_secs must be positive".to_string());
        }
        Ok(spec)
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(
            i64::try_from(self.interval_secs)
                .unwrap_or(i64::MAX)
                .min(i64::MAX / 1000),
        )
    }
}

fn parse_hhmm(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| format!("'{raw}' is not a HH:MM time"))
}
