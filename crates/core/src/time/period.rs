use crate::error::PipelineError;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Week,
    Month,
    Quarter,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Week, Period::Month, Period::Quarter];

    pub fn label(self) -> &'static str {
        match self {
            Period::Week => "Week",
            Period::Month => "Month",
            Period::Quarter => "Quarter",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Period {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "quarter" => Ok(Period::Quarter),
            other => Err(PipelineError::InvalidPeriod(other.to_string())),
        }
    }
}

/// Inclusive `[start, end]` pair of instants in the reporting timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl DateRange {
    /// SOQL datetime literal, e.g. `2026-10-19T00:00:00-04:00`.
    pub fn start_literal(&self) -> String {
        soql_datetime(&self.start.fixed_offset())
    }

    pub fn end_literal(&self) -> String {
        soql_datetime(&self.end.fixed_offset())
    }
}

pub fn soql_datetime(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[derive(Debug, Clone, Copy)]
pub struct DateRangeCalculator {
    tz: Tz,
}

impl Default for DateRangeCalculator {
    fn default() -> Self {
        Self::new(chrono_tz::America::New_York)
    }
}

impl DateRangeCalculator {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn compute(&self, period: Period, now: DateTime<Utc>) -> Result<DateRange, PipelineError> {
        let today = now.with_timezone(&self.tz).date_naive();

        let (first_day, last_day) = match period {
            Period::Week => {
                let monday =
                    today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
                (monday, monday + Duration::days(6))
            }
            Period::Month => {
                let first = first_of_month(today.year(), today.month())?;
                (first, first_of_next(today.year(), today.month(), 1)? - Duration::days(1))
            }
            Period::Quarter => {
                let first_month = (today.month0() / 3) * 3 + 1;
                let first = first_of_month(today.year(), first_month)?;
                (
                    first,
                    first_of_next(today.year(), first_month, 3)? - Duration::days(1),
                )
            }
        };

        let start = self.localize(first_day, NaiveTime::MIN)?;
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)
            .ok_or_else(|| PipelineError::LocalTime("23:59:59".to_string()))?;
        let end = self.localize(last_day, end_of_day)?;

        Ok(DateRange { start, end })
    }

    fn localize(&self, date: NaiveDate, time: NaiveTime) -> Result<DateTime<Tz>, PipelineError> {
        let naive = date.and_time(time);
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| PipelineError::LocalTime(format!("{naive} in {}", self.tz)))
    }
}

fn first_of_month(year: i32, month: u32) -> Result<NaiveDate, PipelineError> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| PipelineError::LocalTime(format!("{year}-{month:02}-01")))
}

fn first_of_next(year: i32, month: u32, months_ahead: u32) -> Result<NaiveDate, PipelineError> {
    let zero_based = month - 1 + months_ahead;
    let year = year + (zero_based / 12) as i32;
    first_of_month(year, zero_based % 12 + 1)
}
