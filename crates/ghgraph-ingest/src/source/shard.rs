//! Hourly archive shard identifiers.

use crate::{Error, Result};
use chrono::{Days, NaiveDate};
use std::fmt;
use std::ops::Range;

/// One hour of the archive, stored as `YYYY-MM-DD-H.json.gz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId {
    date: NaiveDate,
    hour: u8,
}

impl ShardId {
    pub fn new(date: NaiveDate, hour: u8) -> Result<Self> {
        if hour > 23 {
            return Err(Error::Config(format!("shard hour out of range: {hour}")));
        }
        Ok(Self { date, hour })
    }

    /// Every shard in `days` consecutive days starting at `start`, limited to `hours`.
    pub fn range(start: NaiveDate, days: u32, hours: Range<u8>) -> Result<Vec<ShardId>> {
        if hours.end > 24 {
            return Err(Error::Config(format!(
                "hour range {}..{} exceeds a day",
                hours.start, hours.end
            )));
        }

        let mut shards = Vec::with_capacity(days as usize * hours.len());
        for offset in 0..days {
            let date = start
                .checked_add_days(Days::new(u64::from(offset)))
                .ok_or_else(|| Error::Config(format!("date overflow adding {offset} days")))?;
            for hour in hours.clone() {
                shards.push(ShardId { date, hour });
            }
        }
        Ok(shards)
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// The file name the archive publishes this shard under.
    pub fn file_name(&self) -> String {
        format!("{}-{}.json.gz", self.date.format("%Y-%m-%d"), self.hour)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} hour {}", self.date, self.hour)
    }
}
