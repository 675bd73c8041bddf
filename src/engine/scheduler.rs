//! Run-time schedule.
//!
//! Fixed wall-clock run times on selected weekdays in one IANA time zone,
//! e.g. 09:35/11:30/13:30/15:30 Mon–Fri in America/Toronto.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::ScheduleConfig;

#[derive(Debug, Clone)]
pub struct Schedule {
    tz: Tz,
    days: Vec<Weekday>,
    /// Sorted ascending.
    times: Vec<NaiveTime>,
}

impl Schedule {
    pub fn from_config(cfg: &ScheduleConfig) -> Result<Self> {
        let tz: Tz = cfg
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid schedule timezone '{}': {e}", cfg.timezone))?;

        let days = cfg
            .days
            .iter()
            .map(|d| {
                d.parse::<Weekday>()
                    .map_err(|_| anyhow::anyhow!("Invalid schedule day '{d}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut times = cfg
            .run_times
            .iter()
            .map(|t| {
                NaiveTime::parse_from_str(t, "%H:%M")
                    .with_context(|| format!("Invalid run time '{t}' (expected HH:MM)"))
            })
            .collect::<Result<Vec<_>>>()?;
        times.sort();
        times.dedup();

        if days.is_empty() || times.is_empty() {
            bail!("Schedule needs at least one day and one run time");
        }

        Ok(Self { tz, days, times })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First scheduled instant strictly after `now`.
    ///
    /// Local times that do not exist (DST gap) are skipped; ambiguous ones
    /// resolve to the earlier instant.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.tz).date_naive();
        for offset in 0..=7 {
            let date = today + Duration::days(offset);
            if !self.days.contains(&date.weekday()) {
                continue;
            }
            for time in &self.times {
                let Some(local) = self.tz.from_local_datetime(&date.and_time(*time)).earliest()
                else {
                    continue;
                };
                let at = local.with_timezone(&Utc);
                if at > now {
                    return Some(at);
                }
            }
        }
        None
    }

    pub fn describe(&self) -> String {
        let days: Vec<String> = self.days.iter().map(|d| d.to_string()).collect();
        let times: Vec<String> = self.times.iter().map(|t| t.format("%H:%M").to_string()).collect();
        format!("{} on {} ({})", times.join(", "), days.join(","), self.tz)
    }
}
