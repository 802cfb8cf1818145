//! Schedule extraction pipeline.
//!
//! One import run owns one browser session for its whole duration: login,
//! locate the weekly view, then refresh and decode the grid week by week.
//! Authentication and initial navigation failures abort the run; a single
//! bad week is skipped with zero events contributed.

mod error;
pub mod grid;
pub mod session;
mod types;

pub use error::ScrapeError;
pub use types::{MeetingKind, ScheduleEvent};

use crate::calendar::{self, CalendarError, EventSink, GoogleCalendar};
use crate::config::Config;
use crate::tasks::{ProgressHandle, TaskStatus};
use chrono::{Datelike, Duration, NaiveDate};
use session::{PortalSession, SchedulePortal};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Portal login credentials for one run. Never logged.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Inclusive date range to extract.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// First Monday at or before `start`, so a mid-week start still captures
    /// its week in full.
    pub fn first_monday(&self) -> NaiveDate {
        self.start - Duration::days(i64::from(self.start.weekday().num_days_from_monday()))
    }

    /// Number of week strides the loop will take, floored at 1.
    pub fn total_weeks(&self) -> i64 {
        ((self.end - self.first_monday()).num_days() / 7 + 1).max(1)
    }
}

// Three-phase progress allocation: setup/login/navigate, scraping, sync.
const SETUP_PCT: u8 = 10;
const LOGIN_PCT: u8 = 15;
const NAVIGATE_PCT: u8 = 20;
const SCRAPE_START_PCT: u8 = 30;
const SCRAPE_RANGE_PCT: u8 = 40;
const SYNC_CONNECT_PCT: u8 = 75;
const SYNC_START_PCT: u8 = 80;
const SYNC_RANGE_PCT: u8 = 20;

/// Runs one full import: scrape the range, then sync into the calendar.
///
/// Terminal status and message are always written to the progress record,
/// and the browser session is released on every exit path.
pub async fn run_import(
    progress: ProgressHandle,
    credentials: Credentials,
    range: DateRange,
    config: Arc<Config>,
) {
    progress.update("Setting up browser driver...", SETUP_PCT);
    let portal = match PortalSession::connect(&config.webdriver_url, config.portal.clone()).await {
        Ok(portal) => portal,
        Err(e) => {
            error!(error = %e, "browser driver setup failed");
            progress.finish(
                format!("Error setting up browser: {e}"),
                SETUP_PCT,
                TaskStatus::Error,
            );
            return;
        }
    };
    import_with_portal(portal, progress, credentials, range, &config, |config: &Config| {
        GoogleCalendar::from_token_file(&config.token_file, &config.calendar_id, &config.time_zone)
    })
    .await;
}

/// Drives a connected portal through scrape and sync and finalizes the
/// progress record. The calendar sink is built lazily, only once there are
/// events to push.
async fn import_with_portal<P, S, F>(
    mut portal: P,
    progress: ProgressHandle,
    credentials: Credentials,
    range: DateRange,
    config: &Config,
    connect_sink: F,
) where
    P: SchedulePortal,
    S: EventSink,
    F: FnOnce(&Config) -> Result<S, CalendarError>,
{
    let result = scrape_range(&mut portal, &progress, &credentials, &range).await;

    // The automation resource is released before any status is finalized,
    // fatal errors included.
    if let Err(e) = portal.close().await {
        warn!(error = %e, "failed to close browser session");
    }

    let events = match result {
        Ok(events) => events,
        Err(e) => {
            error!(error = %e, "import aborted");
            progress.finish(
                format!("Error during scraping: {e}"),
                progress.percentage(),
                TaskStatus::Error,
            );
            return;
        }
    };

    progress.update(
        format!(
            "Scraping complete. Found {} events. Processing...",
            events.len()
        ),
        SCRAPE_START_PCT + SCRAPE_RANGE_PCT,
    );

    if events.is_empty() {
        progress.finish(
            "No schedule data found for the given dates.",
            100,
            TaskStatus::CompleteWithInfo,
        );
        return;
    }

    progress.update("Connecting to the calendar service...", SYNC_CONNECT_PCT);
    if !calendar::is_authorized(&config.token_file) {
        progress.finish(
            "Error: calendar is not authorized.",
            SYNC_CONNECT_PCT,
            TaskStatus::Error,
        );
        return;
    }
    let sink = match connect_sink(config) {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "calendar client setup failed");
            progress.finish(
                format!("Error: could not connect to the calendar service: {e}"),
                SYNC_CONNECT_PCT,
                TaskStatus::Error,
            );
            return;
        }
    };

    let (created, failed) = sync_events(&sink, &events, &progress).await;
    let (status, message) = final_outcome(created, failed);
    info!(created, failed, status = ?status, "import finished");
    progress.finish(message, 100, status);
}

/// Drives the portal through every week stride and accumulates decoded
/// events in chronological stride order.
async fn scrape_range<P: SchedulePortal>(
    portal: &mut P,
    progress: &ProgressHandle,
    credentials: &Credentials,
    range: &DateRange,
) -> Result<Vec<ScheduleEvent>, ScrapeError> {
    progress.update("Logging into the portal...", LOGIN_PCT);
    portal
        .login(&credentials.username, &credentials.password)
        .await?;

    progress.update("Navigating to the weekly schedule page...", NAVIGATE_PCT);
    portal.open_weekly_view().await?;

    let total_weeks = range.total_weeks();
    let mut current = range.first_monday();
    let mut events = Vec::new();
    let mut weeks_done: i64 = 0;

    while current <= range.end {
        weeks_done += 1;
        let pct =
            SCRAPE_START_PCT + (weeks_done * i64::from(SCRAPE_RANGE_PCT) / total_weeks) as u8;
        progress.update(
            format!("Scraping week {weeks_done}/{total_weeks} (starting {current})..."),
            pct,
        );

        match portal.week_html(current).await {
            Ok(html) => {
                let week_events = grid::decode_week(&html, current);
                info!(week = %current, count = week_events.len(), "week decoded");
                events.extend(week_events);
            }
            Err(e) if !e.is_fatal() => {
                warn!(week = %current, error = %e, "skipping week after refresh failure");
            }
            Err(e) => return Err(e),
        }

        current += Duration::days(7);
    }

    Ok(events)
}

/// Hands events to the calendar sink one at a time, counting outcomes.
/// Per-event failures are counted, never raised.
async fn sync_events<S: EventSink>(
    sink: &S,
    events: &[ScheduleEvent],
    progress: &ProgressHandle,
) -> (usize, usize) {
    let total = events.len();
    let mut created = 0;
    let mut failed = 0;

    for (i, event) in events.iter().enumerate() {
        let pct =
            SYNC_START_PCT + ((i + 1) * usize::from(SYNC_RANGE_PCT) / total.max(1)) as u8;
        progress.update(
            format!(
                "Adding event {}/{total} to the calendar ({})...",
                i + 1,
                event.course
            ),
            pct,
        );

        match sink.create_event(event).await {
            Ok(_) => created += 1,
            Err(e) => {
                error!(
                    error = %e,
                    course = %event.course,
                    date = %event.date,
                    "failed to create calendar event"
                );
                failed += 1;
            }
        }
    }

    (created, failed)
}

/// Terminal status for a finished sync pass.
fn final_outcome(created: usize, failed: usize) -> (TaskStatus, String) {
    let message = format!("Successfully created {created} events. Failed: {failed} events.");
    let status = if created == 0 && failed == 0 {
        TaskStatus::CompleteWithInfo
    } else if created == 0 {
        TaskStatus::Error
    } else if failed > 0 {
        TaskStatus::CompleteWithWarnings
    } else {
        TaskStatus::Complete
    };
    (status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskRegistry;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn handle() -> (Arc<TaskRegistry>, ProgressHandle) {
        let registry = Arc::new(TaskRegistry::new());
        let progress = ProgressHandle::new(Arc::clone(&registry), "test-token".to_string());
        (registry, progress)
    }

    /// Grid markup with one Monday lecture, preceded by the time-column cell.
    fn week_markup() -> String {
        "<table id='WEEKLY_SCHED_HTMLAREA'><tr>\
         <td class='PSLEVEL3GRIDODDROW'>&nbsp;</td>\
         <td class='PSLEVEL3GRIDODDROW'>MATH 1ZB3 - C01 Lecture 09:30 - 10:20 HH 109</td>\
         </tr></table>"
            .to_string()
    }

    #[derive(Default)]
    struct FakePortal {
        visited: Vec<NaiveDate>,
        observed_pcts: Vec<u8>,
        failing_weeks: Vec<NaiveDate>,
        login_error: Option<ScrapeError>,
        registry: Option<(Arc<TaskRegistry>, String)>,
        empty_grid: bool,
        closed: Arc<AtomicBool>,
    }

    impl FakePortal {
        fn observing(registry: Arc<TaskRegistry>, token: &str) -> Self {
            Self {
                registry: Some((registry, token.to_string())),
                ..Self::default()
            }
        }

        fn record_pct(&mut self) {
            if let Some((registry, token)) = &self.registry {
                self.observed_pcts.push(registry.progress(token).percentage);
            }
        }
    }

    impl SchedulePortal for FakePortal {
        async fn login(&mut self, _username: &str, _password: &str) -> Result<(), ScrapeError> {
            if let Some(e) = self.login_error.take() {
                return Err(e);
            }
            Ok(())
        }

        async fn open_weekly_view(&mut self) -> Result<(), ScrapeError> {
            Ok(())
        }

        async fn week_html(&mut self, week_of: NaiveDate) -> Result<String, ScrapeError> {
            self.record_pct();
            self.visited.push(week_of);
            if self.failing_weeks.contains(&week_of) {
                return Err(ScrapeError::WeekRefresh {
                    week_of,
                    message: "refresh timed out".to_string(),
                });
            }
            if self.empty_grid {
                return Ok("<table id='WEEKLY_SCHED_HTMLAREA'></table>".to_string());
            }
            Ok(week_markup())
        }

        async fn close(self) -> Result<(), ScrapeError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Sink factory for runs that must never reach the calendar.
    fn never_sink(_config: &Config) -> Result<FakeSink, CalendarError> {
        panic!("calendar sink should not be built");
    }

    struct FakeSink {
        fail_courses: Vec<&'static str>,
    }

    impl EventSink for FakeSink {
        async fn create_event(&self, event: &ScheduleEvent) -> Result<String, CalendarError> {
            if self.fail_courses.contains(&event.course.as_str()) {
                Err(CalendarError::Request {
                    message: "insert returned 503".to_string(),
                })
            } else {
                Ok("https://calendar.example/event".to_string())
            }
        }
    }

    #[test]
    fn first_monday_rewinds_mid_week_starts() {
        let range = DateRange {
            start: date(2025, 1, 8), // a Wednesday
            end: date(2025, 1, 26),
        };
        assert_eq!(range.first_monday(), date(2025, 1, 6));

        let monday_range = DateRange {
            start: date(2025, 1, 6),
            end: date(2025, 1, 6),
        };
        assert_eq!(monday_range.first_monday(), date(2025, 1, 6));
    }

    #[test]
    fn total_weeks_floors_at_one() {
        let same_day = DateRange {
            start: date(2025, 1, 6),
            end: date(2025, 1, 6),
        };
        assert_eq!(same_day.total_weeks(), 1);

        let two_weeks = DateRange {
            start: date(2025, 1, 6),
            end: date(2025, 1, 19),
        };
        assert_eq!(two_weeks.total_weeks(), 2);

        // A mid-week start still counts its full week.
        let partial = DateRange {
            start: date(2025, 1, 8),
            end: date(2025, 1, 12),
        };
        assert_eq!(partial.total_weeks(), 1);
    }

    #[tokio::test]
    async fn scrape_range_strides_weeks_in_order() {
        let (registry, progress) = handle();
        let mut portal = FakePortal::observing(registry, "test-token");
        let range = DateRange {
            start: date(2025, 1, 8),
            end: date(2025, 1, 26),
        };

        let events = scrape_range(&mut portal, &progress, &creds(), &range)
            .await
            .unwrap();

        assert_eq!(
            portal.visited,
            vec![date(2025, 1, 6), date(2025, 1, 13), date(2025, 1, 20)]
        );
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].week_of, date(2025, 1, 6));
        assert_eq!(events[2].week_of, date(2025, 1, 20));

        // Percentage observed at each week visit never decreases.
        let pcts = &portal.observed_pcts;
        assert!(pcts.windows(2).all(|w| w[0] <= w[1]), "pcts: {pcts:?}");
    }

    #[tokio::test]
    async fn failed_week_is_skipped_not_fatal() {
        let (_, progress) = handle();
        let mut portal = FakePortal {
            failing_weeks: vec![date(2025, 1, 13)],
            ..FakePortal::default()
        };
        let range = DateRange {
            start: date(2025, 1, 6),
            end: date(2025, 1, 26),
        };

        let events = scrape_range(&mut portal, &progress, &creds(), &range)
            .await
            .unwrap();

        // Three weeks visited, the failing one contributed zero events.
        assert_eq!(portal.visited.len(), 3);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.week_of != date(2025, 1, 13)));
    }

    #[tokio::test]
    async fn authentication_failure_aborts_the_run() {
        let (_, progress) = handle();
        let mut portal = FakePortal {
            login_error: Some(ScrapeError::AuthenticationTimeout { waited_secs: 90 }),
            ..FakePortal::default()
        };
        let range = DateRange {
            start: date(2025, 1, 6),
            end: date(2025, 1, 12),
        };

        let err = scrape_range(&mut portal, &progress, &creds(), &range)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(portal.visited.is_empty());
    }

    #[tokio::test]
    async fn sync_counts_per_event_outcomes() {
        let (_, progress) = handle();
        let sink = FakeSink {
            fail_courses: vec!["CHEM 1E03"],
        };
        let events = vec![
            event("MATH 1ZB3"),
            event("CHEM 1E03"),
            event("ENGINEER 1P13B"),
        ];

        let (created, failed) = sync_events(&sink, &events, &progress).await;
        assert_eq!(created, 2);
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn fatal_error_still_releases_the_browser() {
        let (registry, progress) = handle();
        let closed = Arc::new(AtomicBool::new(false));
        let portal = FakePortal {
            login_error: Some(ScrapeError::AuthenticationTimeout { waited_secs: 90 }),
            closed: Arc::clone(&closed),
            ..FakePortal::default()
        };
        let range = DateRange {
            start: date(2025, 1, 6),
            end: date(2025, 1, 12),
        };
        let config = Config::default();

        import_with_portal(portal, progress, creds(), range, &config, never_sink).await;

        assert!(closed.load(Ordering::SeqCst));
        let record = registry.progress("test-token");
        assert_eq!(record.status, TaskStatus::Error);
        // Recorded at the stage the run had reached when it aborted.
        assert_eq!(record.percentage, LOGIN_PCT);
        assert!(record.message.contains("Error during scraping"));
    }

    #[tokio::test]
    async fn empty_grid_ends_complete_with_info_without_sync() {
        let (registry, progress) = handle();
        let closed = Arc::new(AtomicBool::new(false));
        let portal = FakePortal {
            empty_grid: true,
            closed: Arc::clone(&closed),
            ..FakePortal::default()
        };
        let range = DateRange {
            start: date(2025, 1, 6),
            end: date(2025, 1, 12),
        };
        let config = Config::default();

        import_with_portal(portal, progress, creds(), range, &config, never_sink).await;

        assert!(closed.load(Ordering::SeqCst));
        let record = registry.progress("test-token");
        assert_eq!(record.status, TaskStatus::CompleteWithInfo);
        assert_eq!(record.percentage, 100);
        assert!(record.message.contains("No schedule data found"));
    }

    #[tokio::test]
    async fn full_run_syncs_decoded_events() {
        let (registry, progress) = handle();
        let closed = Arc::new(AtomicBool::new(false));
        let portal = FakePortal {
            closed: Arc::clone(&closed),
            ..FakePortal::default()
        };
        let range = DateRange {
            start: date(2025, 1, 6),
            end: date(2025, 1, 12),
        };
        // Any existing file passes the authorization check.
        let config = Config {
            token_file: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml"),
            ..Config::default()
        };

        import_with_portal(portal, progress, creds(), range, &config, |_config: &Config| {
            Ok::<_, CalendarError>(FakeSink {
                fail_courses: vec![],
            })
        })
        .await;

        assert!(closed.load(Ordering::SeqCst));
        let record = registry.progress("test-token");
        assert_eq!(record.status, TaskStatus::Complete);
        assert_eq!(record.percentage, 100);
        assert!(record.message.contains("Successfully created 1 events"));
    }

    #[test]
    fn terminal_status_matrix() {
        assert_eq!(final_outcome(0, 0).0, TaskStatus::CompleteWithInfo);
        assert_eq!(final_outcome(5, 0).0, TaskStatus::Complete);
        assert_eq!(final_outcome(3, 2).0, TaskStatus::CompleteWithWarnings);
        assert_eq!(final_outcome(0, 2).0, TaskStatus::Error);
    }

    fn creds() -> Credentials {
        Credentials {
            username: "student".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn event(course: &str) -> ScheduleEvent {
        ScheduleEvent {
            week_of: date(2025, 1, 6),
            date: date(2025, 1, 6),
            course: course.to_string(),
            kind: MeetingKind::Lecture,
            time: "09:30 - 10:20".to_string(),
            location: "HH 109".to_string(),
        }
    }
}
