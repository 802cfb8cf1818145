/// Types for extracted schedule data
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One class meeting occurrence extracted from the weekly grid.
///
/// Events carry no identity beyond structural equality; the same meeting
/// scraped twice produces two equal records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    /// Monday of the week the event was scraped from
    pub week_of: NaiveDate,
    /// Actual occurrence day, within `[week_of, week_of + 6]`
    pub date: NaiveDate,
    /// Course code/name with internal whitespace collapsed
    pub course: String,
    #[serde(rename = "type")]
    pub kind: MeetingKind,
    /// 24-hour time range, e.g. "09:30 - 10:20"
    pub time: String,
    pub location: String,
}

/// Meeting type as rendered in a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeetingKind {
    Lecture,
    Tutorial,
    Lab,
    Laboratory,
    Core,
}

impl FromStr for MeetingKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lecture" => Ok(MeetingKind::Lecture),
            "tutorial" => Ok(MeetingKind::Tutorial),
            "lab" => Ok(MeetingKind::Lab),
            "laboratory" => Ok(MeetingKind::Laboratory),
            "core" => Ok(MeetingKind::Core),
            _ => Err(()),
        }
    }
}

impl fmt::Display for MeetingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeetingKind::Lecture => "Lecture",
            MeetingKind::Tutorial => "Tutorial",
            MeetingKind::Lab => "Lab",
            MeetingKind::Laboratory => "Laboratory",
            MeetingKind::Core => "Core",
        };
        write!(f, "{name}")
    }
}
