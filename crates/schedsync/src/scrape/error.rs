//! Error types for the scraping subsystem.

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur while driving the portal and extracting a schedule.
#[derive(Debug, Error, Clone)]
pub enum ScrapeError {
    /// The WebDriver session could not be created
    #[error("WebDriver setup failed: {message}")]
    DriverSetup { message: String },

    /// The post-login landing page never appeared within the bounded wait
    #[error("Login timed out after {waited_secs}s waiting for the portal homepage")]
    AuthenticationTimeout { waited_secs: u64 },

    /// An expected login form element was not found
    #[error("Login element missing: {element}")]
    AuthenticationElementMissing { element: String },

    /// Locating the weekly schedule view timed out
    #[error("Navigation to the weekly schedule timed out: {message}")]
    NavigationTimeout { message: String },

    /// An expected navigation element was not found
    #[error("Weekly schedule element missing: {element}")]
    NavigationElementMissing { element: String },

    /// A single week's refresh failed; the run continues without that week
    #[error("Week refresh failed for {week_of}: {message}")]
    WeekRefresh { week_of: NaiveDate, message: String },

    /// A WebDriver command failed outside the cases above
    #[error("WebDriver command failed: {message}")]
    Driver { message: String },
}

impl ScrapeError {
    /// Returns true if this error aborts the whole run.
    ///
    /// Only per-week refresh failures are isolated; everything else
    /// (setup, authentication, initial navigation, stray driver errors)
    /// terminates the import.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScrapeError::WeekRefresh { .. })
    }
}

impl From<thirtyfour::error::WebDriverError> for ScrapeError {
    fn from(err: thirtyfour::error::WebDriverError) -> Self {
        ScrapeError::Driver {
            message: err.to_string(),
        }
    }
}
