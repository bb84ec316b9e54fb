use std::{
    collections::BTreeMap,
    fmt,
    io::{Read, Write},
};

use chrono::{DateTime, Local};

use crate::{daily::DailyRule, error::Result, AlarmError};

/// Unique alarm identifier, handed out by the registry and never reused
pub type AlarmId = u32;

/// Flat configuration of an alarm, both what editors read/write and what gets persisted
pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PropertyValue {
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> PropertyKind {
        match self {
            Self::Bool(_) => PropertyKind::Bool,
            Self::Int(_) => PropertyKind::Int,
            Self::Text(_) => PropertyKind::Text,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Int,
    /// epoch milliseconds, stored as an int
    Timestamp,
    Text,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Timestamp => "timestamp",
            Self::Text => "text",
        })
    }
}

/// describes one configuration key of an alarm type so an editor knows what to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationItem {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub default: Option<PropertyValue>,
}

/// A kind of alarm that can be created and restored by the registry.
///
/// The recurrence behaviour itself lives on [`Rule`], the type only knows how
/// to build one, either fresh or from a persisted payload.
pub trait AlarmType: fmt::Debug + Send + Sync {
    /// stable identifier, also written into every persisted record
    fn id(&self) -> &'static str;

    /// builds a new alarm, seeding its schedule from `initial_time` if given
    fn create(&self, id: AlarmId, initial_time: Option<&DateTime<Local>>) -> Alarm;

    /// reads the type specific payload written by [`Rule::encode`]
    fn decode(&self, input: &mut dyn Read) -> Result<Rule>;

    fn configuration_metadata(&self) -> Vec<ConfigurationItem>;
}

/// recurrence rule of an alarm, one variant per alarm type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Daily(DailyRule),
}

impl Rule {
    #[must_use]
    pub fn following_ring_time(&self, time: &DateTime<Local>) -> DateTime<Local> {
        match self {
            Self::Daily(rule) => rule.following_ring_time(time),
        }
    }

    #[must_use]
    pub fn should_ring(&self, time: &DateTime<Local>) -> bool {
        match self {
            Self::Daily(rule) => rule.should_ring(time),
        }
    }

    #[must_use]
    pub fn properties(&self) -> Properties {
        match self {
            Self::Daily(rule) => rule.properties(),
        }
    }

    /// # Errors
    /// if a value has the wrong kind or is out of range, the rule is left untouched
    pub fn set_properties(&mut self, properties: &Properties) -> Result<()> {
        match self {
            Self::Daily(rule) => rule.set_properties(properties),
        }
    }

    /// # Errors
    /// if writing to `output` fails
    pub fn encode(&self, output: &mut dyn Write) -> Result<()> {
        match self {
            Self::Daily(rule) => rule.encode(output),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alarm {
    id: AlarmId,
    type_id: String,
    pub name: String,
    // only touched by the scheduler
    scheduled: bool,
    rule: Rule,
}

impl Alarm {
    #[must_use]
    pub fn new(id: AlarmId, type_id: impl Into<String>, name: impl Into<String>, rule: Rule) -> Self {
        Self {
            id,
            type_id: type_id.into(),
            name: name.into(),
            scheduled: false,
            rule,
        }
    }

    #[must_use]
    pub const fn id(&self) -> AlarmId {
        self.id
    }

    #[must_use]
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// true while the scheduler has a timer armed for this alarm
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub(crate) fn set_scheduled(&mut self, scheduled: bool) {
        self.scheduled = scheduled;
    }

    #[must_use]
    pub const fn rule(&self) -> &Rule {
        &self.rule
    }

    /// first ring strictly after `time`
    #[must_use]
    pub fn following_ring_time(&self, time: &DateTime<Local>) -> DateTime<Local> {
        self.rule.following_ring_time(time)
    }

    /// the `order`th ring after `time`, counting from 0
    ///
    /// # Errors
    /// [`AlarmError::UnsupportedOrder`] for anything past the next ring
    pub fn following_ring_time_nth(
        &self,
        time: &DateTime<Local>,
        order: u32,
    ) -> Result<DateTime<Local>> {
        if order > 0 {
            return Err(AlarmError::UnsupportedOrder(order));
        }
        Ok(self.following_ring_time(time))
    }

    /// whether the alarm is due at `time`, including the grace window after its ring time
    #[must_use]
    pub fn should_ring(&self, time: &DateTime<Local>) -> bool {
        self.rule.should_ring(time)
    }

    #[must_use]
    pub fn properties(&self) -> Properties {
        self.rule.properties()
    }

    /// Applies a partial configuration, keys missing from `properties` keep their value.
    ///
    /// # Errors
    /// if a value is invalid, nothing is changed in that case
    pub fn set_properties(&mut self, properties: &Properties) -> Result<()> {
        self.rule.set_properties(properties)
    }
}
