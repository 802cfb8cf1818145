//! Calendar-sync collaborator.
//!
//! Maps decoded schedule events into typed Google Calendar payloads and
//! inserts them over HTTP. The core never manages the OAuth token's contents
//! or refresh; the token file's existence is the only authorization signal
//! it checks.

use crate::scrape::ScheduleEvent;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

/// Errors from the calendar collaborator. Per-event failures are counted by
/// the orchestrator, never raised past it.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// The stored authorization is missing or unreadable
    #[error("Calendar is not authorized: {message}")]
    NotAuthorized { message: String },

    /// An event's time range could not be parsed
    #[error("Invalid event time '{time}': {message}")]
    InvalidTime { time: String, message: String },

    /// The insert request failed or returned a non-success status
    #[error("Calendar request failed: {message}")]
    Request { message: String },
}

impl From<reqwest::Error> for CalendarError {
    fn from(err: reqwest::Error) -> Self {
        CalendarError::Request {
            message: err.to_string(),
        }
    }
}

/// Returns true if a stored authorization exists for calendar sync.
pub fn is_authorized(token_file: &Path) -> bool {
    token_file.exists()
}

/// Minimal slice of the stored OAuth token the client needs.
#[derive(Debug, Deserialize)]
struct StoredToken {
    access_token: String,
}

/// Zoned timestamp in the calendar API's wire shape: a naive local
/// date-time plus a named time zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone")]
    pub time_zone: String,
}

/// Typed calendar payload for one event insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventPayload {
    pub summary: String,
    pub location: String,
    pub description: String,
    pub start: EventTime,
    pub end: EventTime,
}

/// Builds the calendar payload for one decoded event.
///
/// Validated independently of any HTTP call; the orchestrator counts a
/// mapping failure as one failed event.
pub fn event_payload(event: &ScheduleEvent, time_zone: &str) -> Result<EventPayload, CalendarError> {
    let (start, end) = parse_time_range(&event.time)?;

    let zoned = |time: NaiveTime| EventTime {
        date_time: format!("{}T{}", event.date, time.format("%H:%M:%S")),
        time_zone: time_zone.to_string(),
    };

    Ok(EventPayload {
        summary: format!("{} - {}", event.course, event.kind),
        location: event.location.clone(),
        description: format!(
            "Course: {}\nType: {}\nImported from week of {}",
            event.course, event.kind, event.week_of
        ),
        start: zoned(start),
        end: zoned(end),
    })
}

/// Parses an extracted `"HH:MM - HH:MM"` range. Hours may be one digit.
fn parse_time_range(range: &str) -> Result<(NaiveTime, NaiveTime), CalendarError> {
    let invalid = |message: &str| CalendarError::InvalidTime {
        time: range.to_string(),
        message: message.to_string(),
    };

    let (start_raw, end_raw) = range
        .split_once('-')
        .ok_or_else(|| invalid("expected a 'start - end' range"))?;

    let parse_one = |raw: &str| -> Result<NaiveTime, CalendarError> {
        let (hour_raw, minute_raw) = raw
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("expected HH:MM"))?;
        let hour: u32 = hour_raw.parse().map_err(|_| invalid("bad hour"))?;
        let minute: u32 = minute_raw.parse().map_err(|_| invalid("bad minute"))?;
        NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| invalid("time out of range"))
    };

    Ok((parse_one(start_raw)?, parse_one(end_raw)?))
}

/// Sink the orchestrator hands finished events to, one at a time.
#[allow(async_fn_in_trait)]
pub trait EventSink {
    /// Creates one calendar event, returning a created-resource indicator.
    async fn create_event(&self, event: &ScheduleEvent) -> Result<String, CalendarError>;
}

/// Google Calendar HTTP client authorized by the stored token file.
pub struct GoogleCalendar {
    client: reqwest::Client,
    access_token: String,
    calendar_id: String,
    time_zone: String,
}

impl GoogleCalendar {
    /// Builds a client from the stored token file.
    pub fn from_token_file(
        token_file: &Path,
        calendar_id: &str,
        time_zone: &str,
    ) -> Result<Self, CalendarError> {
        let raw = fs::read_to_string(token_file).map_err(|e| CalendarError::NotAuthorized {
            message: format!("could not read token file: {e}"),
        })?;
        let token: StoredToken =
            serde_json::from_str(&raw).map_err(|e| CalendarError::NotAuthorized {
                message: format!("malformed token file: {e}"),
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            access_token: token.access_token,
            calendar_id: calendar_id.to_string(),
            time_zone: time_zone.to_string(),
        })
    }
}

impl EventSink for GoogleCalendar {
    async fn create_event(&self, event: &ScheduleEvent) -> Result<String, CalendarError> {
        let payload = event_payload(event, &self.time_zone)?;
        let url = format!("{CALENDAR_API}/calendars/{}/events", self.calendar_id);

        debug!(summary = %payload.summary, date = %event.date, "inserting calendar event");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Request {
                message: format!("calendar insert returned {status}: {body}"),
            });
        }

        let created: serde_json::Value = response.json().await?;
        let link = created
            .get("htmlLink")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        info!(summary = %payload.summary, "calendar event created");
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::MeetingKind;
    use chrono::NaiveDate;

    fn sample_event() -> ScheduleEvent {
        ScheduleEvent {
            week_of: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            date: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
            course: "ENGINEER 1P13B".to_string(),
            kind: MeetingKind::Lecture,
            time: "09:30 - 10:20".to_string(),
            location: "Peter George Centre for L&L M21".to_string(),
        }
    }

    #[test]
    fn payload_maps_event_fields() {
        let payload = event_payload(&sample_event(), "America/Toronto").unwrap();

        assert_eq!(payload.summary, "ENGINEER 1P13B - Lecture");
        assert_eq!(payload.location, "Peter George Centre for L&L M21");
        assert_eq!(payload.start.date_time, "2025-01-09T09:30:00");
        assert_eq!(payload.end.date_time, "2025-01-09T10:20:00");
        assert_eq!(payload.start.time_zone, "America/Toronto");
        assert!(payload.description.contains("week of 2025-01-06"));
    }

    #[test]
    fn single_digit_hours_are_zero_padded() {
        let mut event = sample_event();
        event.time = "9:30 - 10:20".to_string();
        let payload = event_payload(&event, "America/Toronto").unwrap();
        assert_eq!(payload.start.date_time, "2025-01-09T09:30:00");
    }

    #[test]
    fn payload_serializes_camel_case_time_fields() {
        let payload = event_payload(&sample_event(), "America/Toronto").unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["start"]["dateTime"], "2025-01-09T09:30:00");
        assert_eq!(json["start"]["timeZone"], "America/Toronto");
        assert!(json["start"].get("date_time").is_none());
    }

    #[test]
    fn invalid_time_ranges_are_rejected() {
        let mut event = sample_event();
        for bad in ["09:30", "nine - ten", "25:00 - 26:00", "09:61 - 10:20"] {
            event.time = bad.to_string();
            assert!(
                event_payload(&event, "America/Toronto").is_err(),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn authorization_is_token_file_existence() {
        assert!(!is_authorized(Path::new("/definitely/not/here/token.json")));
        // Any existing file counts; the contents are not inspected here.
        let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        assert!(is_authorized(&manifest));
    }
}
