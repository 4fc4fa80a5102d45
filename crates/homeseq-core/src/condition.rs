//! Condition taxonomy: discretizing continuous context into named bins (C1).

use std::fmt;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// The closed set of condition kinds the system understands.
///
/// New kinds are added here; no schema change is required on the events the
/// kind is attached to, only a new `Bin` variant and a new `from_real`/`from_enum` arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionKind {
    Temperature,
    TimeOfDay,
}

impl ConditionKind {
    /// Parses the catalog's case-insensitive condition type string.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "temperature" => Some(Self::Temperature),
            "time_of_day" => Some(Self::TimeOfDay),
            _ => None,
        }
    }

    fn as_kind_int(self) -> i64 {
        match self {
            Self::Temperature => 0,
            Self::TimeOfDay => 1,
        }
    }

    fn from_kind_int(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Temperature),
            1 => Some(Self::TimeOfDay),
            _ => None,
        }
    }
}

/// Temperature bins, in ascending order of `°C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TemperatureBin {
    VeryCold,
    Cold,
    VeryCool,
    Cool,
    Comfortable,
    Warm,
    VeryWarm,
    Hot,
    VeryHot,
}

impl TemperatureBin {
    fn from_celsius(celsius: f64) -> Self {
        if celsius < -15.0 {
            Self::VeryCold
        } else if celsius < -10.0 {
            Self::Cold
        } else if celsius < -5.0 {
            Self::VeryCool
        } else if celsius < 0.0 {
            Self::Cool
        } else if celsius <= 15.0 {
            Self::Comfortable
        } else if celsius <= 20.0 {
            Self::Warm
        } else if celsius <= 25.0 {
            Self::VeryWarm
        } else if celsius <= 30.0 {
            Self::Hot
        } else {
            Self::VeryHot
        }
    }

    fn as_bin_int(self) -> i64 {
        match self {
            Self::VeryCold => 0,
            Self::Cold => 1,
            Self::VeryCool => 2,
            Self::Cool => 3,
            Self::Comfortable => 4,
            Self::Warm => 5,
            Self::VeryWarm => 6,
            Self::Hot => 7,
            Self::VeryHot => 8,
        }
    }

    fn from_bin_int(v: i64) -> Option<Self> {
        Some(match v {
            0 => Self::VeryCold,
            1 => Self::Cold,
            2 => Self::VeryCool,
            3 => Self::Cool,
            4 => Self::Comfortable,
            5 => Self::Warm,
            6 => Self::VeryWarm,
            7 => Self::Hot,
            8 => Self::VeryHot,
            _ => return None,
        })
    }
}

/// Time-of-day bins. `Night` is the catch-all else-branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeOfDayBin {
    Morning,
    Forenoon,
    Noon,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDayBin {
    fn from_time(time: NaiveTime) -> Self {
        let minutes = time.hour() * 60 + time.minute();
        let in_range = |start_h: u32, end_h: u32| (start_h * 60..end_h * 60).contains(&minutes);
        if in_range(7, 11) {
            Self::Morning
        } else if in_range(11, 13) {
            Self::Forenoon
        } else if in_range(13, 15) {
            Self::Noon
        } else if in_range(15, 18) {
            Self::Afternoon
        } else if in_range(18, 21) {
            Self::Evening
        } else {
            Self::Night
        }
    }

    fn as_bin_int(self) -> i64 {
        match self {
            Self::Morning => 0,
            Self::Forenoon => 1,
            Self::Noon => 2,
            Self::Afternoon => 3,
            Self::Evening => 4,
            Self::Night => 5,
        }
    }

    fn from_bin_int(v: i64) -> Option<Self> {
        Some(match v {
            0 => Self::Morning,
            1 => Self::Forenoon,
            2 => Self::Noon,
            3 => Self::Afternoon,
            4 => Self::Evening,
            5 => Self::Night,
            _ => return None,
        })
    }
}

/// A discretized contextual fact, optionally scoped to a named item.
///
/// Equality and hashing cover all three fields: the system treats the same
/// bin attached to different items as distinct conditions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    bin: Bin,
    pub associated_item: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
enum Bin {
    Temperature(TemperatureBin),
    TimeOfDay(TimeOfDayBin),
}

impl Condition {
    /// Buckets a continuous value (`°C` for temperature, naive local time for
    /// time-of-day) into the matching condition.
    pub fn from_real_temperature(celsius: f64, associated_item: Option<String>) -> Self {
        Self {
            kind: ConditionKind::Temperature,
            bin: Bin::Temperature(TemperatureBin::from_celsius(celsius)),
            associated_item,
        }
    }

    pub fn from_real_time_of_day(time: NaiveTime, associated_item: Option<String>) -> Self {
        Self {
            kind: ConditionKind::TimeOfDay,
            bin: Bin::TimeOfDay(TimeOfDayBin::from_time(time)),
            associated_item,
        }
    }

    pub fn temperature_bin(&self) -> Option<TemperatureBin> {
        match self.bin {
            Bin::Temperature(b) => Some(b),
            Bin::TimeOfDay(_) => None,
        }
    }

    pub fn time_of_day_bin(&self) -> Option<TimeOfDayBin> {
        match self.bin {
            Bin::TimeOfDay(b) => Some(b),
            Bin::Temperature(_) => None,
        }
    }

    /// Encodes as the `(kind, bin)` integer pair used by the storage layer,
    /// plus the item name (or the `"NULL"` sentinel when absent).
    pub fn encode(&self) -> (i64, i64, String) {
        let bin_int = match self.bin {
            Bin::Temperature(b) => b.as_bin_int(),
            Bin::TimeOfDay(b) => b.as_bin_int(),
        };
        (
            self.kind.as_kind_int(),
            bin_int,
            self.associated_item.clone().unwrap_or_else(|| "NULL".to_string()),
        )
    }

    /// Inverse of [`Condition::encode`].
    pub fn decode(kind_int: i64, bin_int: i64, item_name: &str) -> Option<Self> {
        let kind = ConditionKind::from_kind_int(kind_int)?;
        let associated_item = if item_name == "NULL" {
            None
        } else {
            Some(item_name.to_string())
        };
        let bin = match kind {
            ConditionKind::Temperature => Bin::Temperature(TemperatureBin::from_bin_int(bin_int)?),
            ConditionKind::TimeOfDay => Bin::TimeOfDay(TimeOfDayBin::from_bin_int(bin_int)?),
        };
        Some(Self {
            kind,
            bin,
            associated_item,
        })
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.bin, &self.associated_item) {
            (Bin::Temperature(b), Some(item)) => write!(f, "{b:?}@{item}"),
            (Bin::Temperature(b), None) => write!(f, "{b:?}"),
            (Bin::TimeOfDay(b), Some(item)) => write!(f, "{b:?}@{item}"),
            (Bin::TimeOfDay(b), None) => write!(f, "{b:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_bin_boundaries() {
        assert_eq!(TemperatureBin::from_celsius(-20.0), TemperatureBin::VeryCold);
        assert_eq!(TemperatureBin::from_celsius(-15.0), TemperatureBin::Cold);
        assert_eq!(TemperatureBin::from_celsius(-10.0), TemperatureBin::VeryCool);
        assert_eq!(TemperatureBin::from_celsius(-5.0), TemperatureBin::Cool);
        assert_eq!(TemperatureBin::from_celsius(0.0), TemperatureBin::Comfortable);
        assert_eq!(TemperatureBin::from_celsius(15.0), TemperatureBin::Comfortable);
        assert_eq!(TemperatureBin::from_celsius(15.1), TemperatureBin::Warm);
        assert_eq!(TemperatureBin::from_celsius(20.0), TemperatureBin::Warm);
        assert_eq!(TemperatureBin::from_celsius(25.0), TemperatureBin::VeryWarm);
        assert_eq!(TemperatureBin::from_celsius(30.0), TemperatureBin::Hot);
        assert_eq!(TemperatureBin::from_celsius(30.1), TemperatureBin::VeryHot);
    }

    #[test]
    fn time_of_day_boundaries() {
        let t = |h: u32, m: u32| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert_eq!(TimeOfDayBin::from_time(t(6, 59)), TimeOfDayBin::Night);
        assert_eq!(TimeOfDayBin::from_time(t(7, 0)), TimeOfDayBin::Morning);
        assert_eq!(TimeOfDayBin::from_time(t(10, 59)), TimeOfDayBin::Morning);
        assert_eq!(TimeOfDayBin::from_time(t(11, 0)), TimeOfDayBin::Forenoon);
        assert_eq!(TimeOfDayBin::from_time(t(13, 0)), TimeOfDayBin::Noon);
        assert_eq!(TimeOfDayBin::from_time(t(15, 0)), TimeOfDayBin::Afternoon);
        assert_eq!(TimeOfDayBin::from_time(t(18, 0)), TimeOfDayBin::Evening);
        assert_eq!(TimeOfDayBin::from_time(t(21, 0)), TimeOfDayBin::Night);
        assert_eq!(TimeOfDayBin::from_time(t(23, 59)), TimeOfDayBin::Night);
    }

    #[test]
    fn condition_encode_decode_roundtrip() {
        let c = Condition::from_real_temperature(-20.0, Some("outside".to_string()));
        let (k, b, item) = c.encode();
        let back = Condition::decode(k, b, &item).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn condition_encode_decode_roundtrip_no_item() {
        let c = Condition::from_real_time_of_day(
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            None,
        );
        let (k, b, item) = c.encode();
        assert_eq!(item, "NULL");
        let back = Condition::decode(k, b, &item).unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn condition_kind_parse_case_insensitive() {
        assert_eq!(ConditionKind::parse("TEMPERATURE"), Some(ConditionKind::Temperature));
        assert_eq!(ConditionKind::parse("Time_Of_Day"), Some(ConditionKind::TimeOfDay));
        assert_eq!(ConditionKind::parse("humidity"), None);
    }
}
