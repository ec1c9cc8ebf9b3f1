use std::str::FromStr;

use strum::{Display, EnumIter, EnumString};
use tracing::warn;

use crate::recorder::HitRecord;

/// Line format of persisted hits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum HitFormat {
    /// `timestamp,thread,unit,line`, the thread given by its id
    #[default]
    Csv,
    /// `hit\tthread=<id>\tunit=<unit>\tline=<line>\ttime=<timestamp>`, the profile log style
    /// of `coz`
    Coz,
}

impl HitFormat {
    /// Look up a format by name, falling back to [`HitFormat::Csv`] for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        HitFormat::from_str(name).unwrap_or_else(|_| {
            warn!(format = name, "unknown hit format, using csv");
            HitFormat::Csv
        })
    }

    /// First line of a new log, if the format has one.
    #[must_use]
    pub fn header(self) -> Option<&'static str> {
        match self {
            HitFormat::Csv => Some("timestamp,thread,unit,line\n"),
            HitFormat::Coz => None,
        }
    }

    /// One record as a complete line, newline included.
    #[must_use]
    pub fn format(self, record: &HitRecord) -> String {
        match self {
            HitFormat::Csv => format!(
                "{},{},{},{}\n",
                record.timestamp_nanos, record.thread.id, record.unit, record.line
            ),
            HitFormat::Coz => format!(
                "hit\tthread={}\tunit={}\tline={}\ttime={}\n",
                record.thread.id, record.unit, record.line, record.timestamp_nanos
            ),
        }
    }
}
