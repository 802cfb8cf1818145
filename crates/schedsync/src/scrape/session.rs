//! WebDriver-backed session control for the portal's weekly schedule pages.
//!
//! The portal is a stateful, iframe-structured PeopleSoft UI; one session
//! walks the fixed protocol login -> student center -> weekly view, then
//! refreshes the view once per requested week. Every remote wait is bounded.

use super::error::ScrapeError;
use chrono::NaiveDate;
use std::time::{Duration, Instant};
use thirtyfour::prelude::*;
use tracing::{debug, info, warn};

const USERNAME_INPUT_ID: &str = "userid";
const PASSWORD_INPUT_ID: &str = "pwd";
const LOGIN_SUBMIT_NAME: &str = "Submit";
const CONTENT_FRAME_NAME: &str = "TargetContent";
const WEEKLY_SCHEDULE_LINK_ID: &str = "DERIVED_SSS_SCL_SS_WEEKLY_SCHEDULE";
const WEEK_START_INPUT_ID: &str = "DERIVED_CLASS_S_START_DT";
const REFRESH_BUTTON_ID: &str = "DERIVED_CLASS_S_SSR_REFRESH_CAL$8$";

/// Title fragment of the post-login landing page.
const LANDING_TITLE: &str = "Homepage";

/// Date format the week-start input expects.
const WEEK_INPUT_FORMAT: &str = "%d/%m/%Y";

/// Capability abstraction over the browser-automation driver.
///
/// The orchestrator only depends on this trait, so its stride and progress
/// logic can be exercised against an in-memory portal in tests.
#[allow(async_fn_in_trait)]
pub trait SchedulePortal {
    /// Submits credentials and waits for the post-login landing page.
    async fn login(&mut self, username: &str, password: &str) -> Result<(), ScrapeError>;

    /// Locates and activates the weekly-schedule view.
    async fn open_weekly_view(&mut self) -> Result<(), ScrapeError>;

    /// Refreshes the weekly view for `week_of` and returns the rendered page.
    async fn week_html(&mut self, week_of: NaiveDate) -> Result<String, ScrapeError>;

    /// Releases the underlying automation resource.
    async fn close(self) -> Result<(), ScrapeError>;
}

/// Protocol stage of one portal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Unauthenticated,
    Authenticating,
    Authenticated,
    LocatingSchedule,
    InWeeklyContext,
    RefreshingWeek,
    WeekReady,
}

/// Timeouts and entry points for one portal instance.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub login_url: String,
    pub student_center_url: String,
    /// Bounded wait for the landing page; covers an out-of-band MFA approval
    pub login_timeout: Duration,
    pub nav_timeout: Duration,
    pub poll_interval: Duration,
    /// Fixed delay for asynchronous content re-render after a refresh
    pub settle_delay: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://csprd.mcmaster.ca/psp/prcsprd/?cmd=login".to_string(),
            student_center_url:
                "https://csprd.mcmaster.ca/psp/prcsprd/EMPLOYEE/SA/c/SA_LEARNER_SERVICES.SSS_STUDENT_CENTER.GBL"
                    .to_string(),
            login_timeout: Duration::from_secs(90),
            nav_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Formats a Monday for the portal's week-start input.
pub fn week_input_value(week_of: NaiveDate) -> String {
    week_of.format(WEEK_INPUT_FORMAT).to_string()
}

/// A live WebDriver session against the portal.
pub struct PortalSession {
    driver: WebDriver,
    config: PortalConfig,
    stage: SessionStage,
}

impl PortalSession {
    /// Creates a fresh browser session against a running WebDriver server.
    pub async fn connect(webdriver_url: &str, config: PortalConfig) -> Result<Self, ScrapeError> {
        let caps = DesiredCapabilities::chrome();
        let driver = WebDriver::new(webdriver_url, caps)
            .await
            .map_err(|e| ScrapeError::DriverSetup {
                message: e.to_string(),
            })?;
        Ok(Self {
            driver,
            config,
            stage: SessionStage::Unauthenticated,
        })
    }

    /// Polls the page title until it contains `needle`.
    async fn wait_for_title(&self, needle: &str, timeout: Duration) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + timeout;
        loop {
            let title = self.driver.title().await?;
            if title.contains(needle) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::AuthenticationTimeout {
                    waited_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Polls for an element until it appears or the timeout elapses.
    async fn wait_for_element(
        &self,
        by: By,
        timeout: Duration,
    ) -> Result<WebElement, ScrapeError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.driver.find(by.clone()).await {
                Ok(elem) => return Ok(elem),
                Err(_) if Instant::now() < deadline => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    return Err(ScrapeError::Driver {
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    /// Switches execution context into the portal's content iframe.
    ///
    /// The frame attaches asynchronously after navigation, so this polls
    /// within the navigation timeout.
    async fn enter_content_frame(&self) -> Result<(), ScrapeError> {
        let frame = self
            .wait_for_element(By::Name(CONTENT_FRAME_NAME), self.config.nav_timeout)
            .await
            .map_err(|e| ScrapeError::NavigationTimeout {
                message: format!("content frame '{CONTENT_FRAME_NAME}' never appeared: {e}"),
            })?;
        frame.enter_frame().await?;
        Ok(())
    }

    /// Restores the top-level browsing context, logging rather than masking
    /// an original failure.
    async fn restore_top_level(&self) {
        if let Err(e) = self.driver.enter_default_frame().await {
            warn!(error = %e, "failed to restore top-level browsing context");
        }
    }

    async fn activate_weekly_link(&self) -> Result<(), ScrapeError> {
        self.enter_content_frame().await?;
        let link = self
            .wait_for_element(By::Id(WEEKLY_SCHEDULE_LINK_ID), self.config.nav_timeout)
            .await
            .map_err(|_| ScrapeError::NavigationElementMissing {
                element: WEEKLY_SCHEDULE_LINK_ID.to_string(),
            })?;
        tokio::time::sleep(self.config.settle_delay).await;
        link.click().await?;
        Ok(())
    }

    async fn refresh_and_read(&self, week_of: NaiveDate) -> Result<String, ScrapeError> {
        self.enter_content_frame().await?;

        let formatted = week_input_value(week_of);
        let date_box = self.driver.find(By::Id(WEEK_START_INPUT_ID)).await?;
        date_box.clear().await?;
        date_box.send_keys(formatted.as_str()).await?;

        self.driver
            .find(By::Id(REFRESH_BUTTON_ID))
            .await?
            .click()
            .await?;

        // The refresh is accepted once the input reflects the new value.
        self.wait_for_input_value(WEEK_START_INPUT_ID, &formatted)
            .await?;
        tokio::time::sleep(self.config.settle_delay).await;

        Ok(self.driver.source().await?)
    }

    async fn wait_for_input_value(
        &self,
        id: &'static str,
        expected: &str,
    ) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + self.config.nav_timeout;
        loop {
            let elem = self.driver.find(By::Id(id)).await?;
            if elem.attr("value").await?.as_deref() == Some(expected) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScrapeError::Driver {
                    message: format!("input '{id}' never reflected '{expected}'"),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

impl SchedulePortal for PortalSession {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), ScrapeError> {
        self.stage = SessionStage::Authenticating;
        info!(url = %self.config.login_url, "opening portal login page");
        self.driver.goto(&self.config.login_url).await?;

        let user_box = self.driver.find(By::Id(USERNAME_INPUT_ID)).await.map_err(|_| {
            ScrapeError::AuthenticationElementMissing {
                element: USERNAME_INPUT_ID.to_string(),
            }
        })?;
        user_box.send_keys(username).await?;

        let pass_box = self.driver.find(By::Id(PASSWORD_INPUT_ID)).await.map_err(|_| {
            ScrapeError::AuthenticationElementMissing {
                element: PASSWORD_INPUT_ID.to_string(),
            }
        })?;
        pass_box.send_keys(password).await?;

        self.driver
            .find(By::Name(LOGIN_SUBMIT_NAME))
            .await
            .map_err(|_| ScrapeError::AuthenticationElementMissing {
                element: LOGIN_SUBMIT_NAME.to_string(),
            })?
            .click()
            .await?;

        // The MFA prompt, if any, is approved out of band while we wait.
        self.wait_for_title(LANDING_TITLE, self.config.login_timeout)
            .await?;

        self.stage = SessionStage::Authenticated;
        info!("portal login complete");
        Ok(())
    }

    async fn open_weekly_view(&mut self) -> Result<(), ScrapeError> {
        self.stage = SessionStage::LocatingSchedule;
        self.driver.goto(&self.config.student_center_url).await?;

        let result = self.activate_weekly_link().await;
        // The caller must never be left inside the iframe, even on failure.
        self.restore_top_level().await;
        result?;

        self.stage = SessionStage::InWeeklyContext;
        info!("weekly schedule view activated");
        Ok(())
    }

    async fn week_html(&mut self, week_of: NaiveDate) -> Result<String, ScrapeError> {
        self.stage = SessionStage::RefreshingWeek;
        debug!(stage = ?self.stage, %week_of, "refreshing weekly view");

        let result = self.refresh_and_read(week_of).await;
        self.restore_top_level().await;

        match result {
            Ok(html) => {
                self.stage = SessionStage::WeekReady;
                let html_len = html.len();
                debug!(%week_of, html_len, "week refreshed");
                self.stage = SessionStage::InWeeklyContext;
                Ok(html)
            }
            Err(e) => {
                self.stage = SessionStage::InWeeklyContext;
                Err(ScrapeError::WeekRefresh {
                    week_of,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn close(self) -> Result<(), ScrapeError> {
        self.driver.quit().await.map_err(Into::into)
    }
}
