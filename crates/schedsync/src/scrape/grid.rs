//! Week-grid decoding for the portal's rendered schedule table.
//!
//! The portal renders the weekly schedule as a plain HTML table whose cells
//! carry no day-of-week or time-slot coordinates. The decoder reconstructs the
//! calendar day of each cell purely from visit order: a signed day offset is
//! advanced per cell under a 6-then-7 column wrap, and a 7-slot delay buffer
//! holds the offset in place while a row-spanning cell still occupies a day.
//! The wrap constants were reverse-engineered from this portal's rendering
//! and must not be generalized to other grid sizes.

use super::types::{MeetingKind, ScheduleEvent};
use chrono::{Duration, NaiveDate};
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, warn};

// Static selectors and patterns - compiled once
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("table#WEEKLY_SCHED_HTMLAREA td[class*='PSLEVEL3GRID']").unwrap()
});
static EVENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Course code/name, skipped section ("- C01"), meeting kind, 24-hour
    // time range, location. Example:
    // "ENGINEER    1P13B - C01 Lecture 09:30 - 10:20 Peter George Centre for L&L M21"
    Regex::new(
        r"(?is)^(?P<course>[A-Z\s]+\s+\w+)\s+-\s+\w+\s+(?P<kind>Lecture|Tutorial|Lab|Laboratory|Core)\s+(?P<time>\d{1,2}:\d{2}\s*-\s*\d{1,2}:\d{2})\s+(?P<location>.+)",
    )
    .unwrap()
});
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Offsets outside this range indicate an unexpected cell count.
const OFFSET_RANGE: std::ops::RangeInclusive<i64> = -2..=12;

/// Decodes one rendered week table into schedule events.
///
/// Pure function: all offset/delay bookkeeping is local to the call, so
/// decoding the same markup twice yields identical sequences. Events are
/// emitted in document order, not chronological order. An empty result is
/// valid (empty week, or a page that never rendered).
pub fn decode_week(html: &str, week_of: NaiveDate) -> Vec<ScheduleEvent> {
    let document = Html::parse_document(html);
    let mut events = Vec::new();

    let mut offset: i64 = -2;
    let mut wrap_count: u8 = 0;
    let mut delay = [0i64; 7];

    for cell in document.select(&CELL_SELECTOR) {
        // Advance under the 6-then-7 column wrap.
        if offset > 5 && wrap_count == 0 {
            offset -= 6;
            wrap_count = 1;
        } else if offset > 5 && wrap_count == 1 {
            offset -= 7;
            wrap_count = 0;
        } else {
            offset += 1;
        }

        // A row-spanning cell from an earlier grid row still occupies this
        // day; hold the offset in place for each outstanding visit.
        while delay[slot(offset)] > 0 {
            delay[slot(offset)] -= 1;
            if offset < 6 {
                offset += 1;
            } else if wrap_count == 0 {
                offset -= 5;
                wrap_count = 1;
            } else {
                offset -= 6;
                wrap_count = 0;
            }
        }

        if !OFFSET_RANGE.contains(&offset) {
            warn!(offset, %week_of, "grid offset drifted out of range; unexpected cell count");
        }

        let text = flatten_text(&cell);
        if text.is_empty() {
            continue;
        }

        if let Some(caps) = EVENT_REGEX.captures(&text) {
            let course = normalize_course(&caps["course"]);
            // The alternation only admits known kinds, so this parse cannot fail.
            let kind: MeetingKind = caps["kind"].parse().unwrap_or(MeetingKind::Lecture);
            let date = week_of + Duration::days(offset);
            debug!(%date, course = %course, "decoded grid cell");
            events.push(ScheduleEvent {
                week_of,
                date,
                course,
                kind,
                time: caps["time"].to_string(),
                location: caps["location"].to_string(),
            });
        }

        // Rowspan suppression applies to any non-empty cell, matched or not;
        // -1 is the sentinel for "no valid day yet".
        let rowspan = parse_rowspan(&cell);
        if rowspan > 1 && offset != -1 {
            delay[slot(offset)] = rowspan - 1;
        }
    }

    events
}

/// Maps an offset (possibly negative) onto its delay slot.
fn slot(offset: i64) -> usize {
    offset.rem_euclid(7) as usize
}

/// Joins a cell's stripped text fragments with single spaces.
fn flatten_text(cell: &scraper::ElementRef) -> String {
    cell.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a cell's rowspan attribute, defaulting malformed values to 1.
fn parse_rowspan(cell: &scraper::ElementRef) -> i64 {
    cell.value()
        .attr("rowspan")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|&v| v >= 1)
        .unwrap_or(1)
}

/// Collapses internal whitespace runs in a course name to single spaces.
fn normalize_course(raw: &str) -> String {
    WHITESPACE_RUN.replace_all(raw.trim(), " ").into_owned()
}
