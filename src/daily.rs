//! The "daily" alarm type: rings once per calendar day at a fixed wall-clock
//! time, and stays due for a grace window of `max_delay_minutes` afterwards so
//! a late wake up still rings it.

use std::io::{Read, Write};

use chrono::{DateTime, Local, NaiveTime, TimeZone, Timelike};

use crate::{
    alarm::{
        Alarm, AlarmId, AlarmType, ConfigurationItem, Properties, PropertyKind, PropertyValue,
        Rule,
    },
    calendar,
    error::Result,
    AlarmError,
};

pub const DAILY_TIME: &str = "dailyTime";
pub const MAX_DELAY_MINUTES: &str = "maxDelayMinutes";
pub const DEFAULT_MAX_DELAY_MINUTES: u32 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct DailyAlarmType;

impl DailyAlarmType {
    pub const ID: &'static str = "daily";
}

impl AlarmType for DailyAlarmType {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn create(&self, id: AlarmId, initial_time: Option<&DateTime<Local>>) -> Alarm {
        let daily_time = initial_time.map_or(NaiveTime::MIN, calendar::time_of_day);
        Alarm::new(
            id,
            Self::ID,
            "daily alarm",
            Rule::Daily(DailyRule::new(daily_time, DEFAULT_MAX_DELAY_MINUTES)),
        )
    }

    fn decode(&self, input: &mut dyn Read) -> Result<Rule> {
        let mut millis = [0; 8];
        input.read_exact(&mut millis)?;
        let mut delay = [0; 4];
        input.read_exact(&mut delay)?;

        let millis = i64::from_be_bytes(millis);
        let daily_time = calendar::from_epoch_millis(millis)
            .ok_or_else(|| AlarmError::Corrupt(format!("daily time {millis} out of range")))?;
        let delay = i32::from_be_bytes(delay);
        let max_delay_minutes = u32::try_from(delay)
            .map_err(|_| AlarmError::Corrupt(format!("negative max delay {delay}")))?;
        Ok(Rule::Daily(DailyRule::new(
            calendar::time_of_day(&daily_time),
            max_delay_minutes,
        )))
    }

    fn configuration_metadata(&self) -> Vec<ConfigurationItem> {
        vec![
            ConfigurationItem {
                name: DAILY_TIME,
                kind: PropertyKind::Timestamp,
                default: None,
            },
            ConfigurationItem {
                name: MAX_DELAY_MINUTES,
                kind: PropertyKind::Int,
                default: Some(PropertyValue::Int(i64::from(DEFAULT_MAX_DELAY_MINUTES))),
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyRule {
    daily_time: NaiveTime,
    max_delay_minutes: u32,
}

impl DailyRule {
    /// seconds of `daily_time` are ignored, alarms ring on the minute
    #[must_use]
    pub fn new(daily_time: NaiveTime, max_delay_minutes: u32) -> Self {
        Self {
            daily_time: NaiveTime::from_hms_opt(daily_time.hour(), daily_time.minute(), 0)
                .unwrap_or(daily_time),
            max_delay_minutes,
        }
    }

    #[must_use]
    pub const fn daily_time(&self) -> NaiveTime {
        self.daily_time
    }

    #[must_use]
    pub const fn max_delay_minutes(&self) -> u32 {
        self.max_delay_minutes
    }

    /// first ring strictly after `time`: today if still ahead, else tomorrow
    #[must_use]
    pub fn following_ring_time<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> DateTime<Tz> {
        let candidate = calendar::same_day_at(time, self.daily_time);
        if candidate > *time {
            candidate
        } else {
            calendar::day_at(time, 1, self.daily_time)
        }
    }

    /// last ring at or before `time`, whether or not it actually rang
    #[must_use]
    pub fn previous_scheduled_time<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> DateTime<Tz> {
        let candidate = calendar::same_day_at(time, self.daily_time);
        if candidate <= *time {
            candidate
        } else {
            calendar::day_at(time, -1, self.daily_time)
        }
    }

    #[must_use]
    pub fn should_ring<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        let previous = self.previous_scheduled_time(time);
        calendar::add_minutes(&previous, i64::from(self.max_delay_minutes)) > *time
    }

    /// the ring time as a timestamp on 1970-01-01, only its hour and minute mean anything
    #[must_use]
    pub fn daily_time_millis(&self) -> i64 {
        calendar::from_components(
            &Local,
            1970,
            1,
            1,
            self.daily_time.hour(),
            self.daily_time.minute(),
        )
        .map_or(0, |time| time.timestamp_millis())
    }

    #[must_use]
    pub fn properties(&self) -> Properties {
        [
            (
                DAILY_TIME.to_string(),
                PropertyValue::Int(self.daily_time_millis()),
            ),
            (
                MAX_DELAY_MINUTES.to_string(),
                PropertyValue::Int(i64::from(self.max_delay_minutes)),
            ),
        ]
        .into_iter()
        .collect()
    }

    /// # Errors
    /// if either key holds something other than an in range int
    pub fn set_properties(&mut self, properties: &Properties) -> Result<()> {
        let daily_time = match properties.get(DAILY_TIME) {
            Some(value) => {
                let millis = value.as_int().ok_or_else(|| {
                    AlarmError::invalid_property(
                        DAILY_TIME,
                        format!("expected a timestamp, got {value}"),
                    )
                })?;
                let time = calendar::from_epoch_millis(millis).ok_or_else(|| {
                    AlarmError::invalid_property(DAILY_TIME, format!("{millis} is out of range"))
                })?;
                calendar::time_of_day(&time)
            }
            None => self.daily_time,
        };
        let max_delay_minutes = match properties.get(MAX_DELAY_MINUTES) {
            Some(value) => {
                let minutes = value.as_int().ok_or_else(|| {
                    AlarmError::invalid_property(
                        MAX_DELAY_MINUTES,
                        format!("expected minutes, got {value}"),
                    )
                })?;
                u32::try_from(minutes)
                    .ok()
                    .filter(|minutes| i32::try_from(*minutes).is_ok())
                    .ok_or_else(|| {
                        AlarmError::invalid_property(
                            MAX_DELAY_MINUTES,
                            format!("{minutes} is not a valid number of minutes"),
                        )
                    })?
            }
            None => self.max_delay_minutes,
        };
        self.daily_time = daily_time;
        self.max_delay_minutes = max_delay_minutes;
        Ok(())
    }

    /// # Errors
    /// if writing fails
    pub fn encode(&self, output: &mut dyn Write) -> Result<()> {
        let delay = i32::try_from(self.max_delay_minutes).map_err(|_| {
            AlarmError::invalid_property(MAX_DELAY_MINUTES, "too large to persist")
        })?;
        output.write_all(&self.daily_time_millis().to_be_bytes())?;
        output.write_all(&delay.to_be_bytes())?;
        Ok(())
    }
}
