//! Service configuration, read from the environment with defaults that match
//! the known portal deployment.

use crate::scrape::session::PortalConfig;
use std::env;
use std::path::PathBuf;

/// Runtime configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to (`SCHEDSYNC_BIND`)
    pub bind_addr: String,
    /// WebDriver server the browser sessions connect through (`WEBDRIVER_URL`)
    pub webdriver_url: String,
    /// Stored calendar authorization; existence gates imports (`TOKEN_FILE`)
    pub token_file: PathBuf,
    /// Target calendar (`CALENDAR_ID`)
    pub calendar_id: String,
    /// Named time zone for created events (`CALENDAR_TIME_ZONE`)
    pub time_zone: String,
    /// Portal entry points and timeouts
    pub portal: PortalConfig,
}

impl Config {
    /// Loads configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = env::var("SCHEDSYNC_BIND") {
            config.bind_addr = addr;
        }
        if let Ok(url) = env::var("WEBDRIVER_URL") {
            config.webdriver_url = url;
        }
        if let Ok(path) = env::var("TOKEN_FILE") {
            config.token_file = PathBuf::from(path);
        }
        if let Ok(id) = env::var("CALENDAR_ID") {
            config.calendar_id = id;
        }
        if let Ok(tz) = env::var("CALENDAR_TIME_ZONE") {
            config.time_zone = tz;
        }
        if let Ok(url) = env::var("PORTAL_LOGIN_URL") {
            config.portal.login_url = url;
        }
        if let Ok(url) = env::var("PORTAL_STUDENT_CENTER_URL") {
            config.portal.student_center_url = url;
        }
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            webdriver_url: "http://localhost:9515".to_string(),
            token_file: PathBuf::from("token.json"),
            calendar_id: "primary".to_string(),
            time_zone: "America/Toronto".to_string(),
            portal: PortalConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_known_deployment() {
        let config = Config::default();
        assert_eq!(config.calendar_id, "primary");
        assert_eq!(config.time_zone, "America/Toronto");
        assert_eq!(config.token_file, PathBuf::from("token.json"));
        assert!(config.portal.login_url.contains("mcmaster"));
    }
}
