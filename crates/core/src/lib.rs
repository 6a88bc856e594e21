pub mod aggregate;
pub mod chart;
pub mod domain;
pub mod error;
pub mod query;
pub mod salesforce;
pub mod session;
pub mod shaping;
pub mod time;

pub use error::PipelineError;

pub mod config {
    use anyhow::Context;

    const DEFAULT_DOMAIN: &str = "login";
    const DEFAULT_API_VERSION: &str = "59.0";
    const DEFAULT_TIMEZONE: &str = "America/New_York";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_QUERY_RETRIES: u32 = 3;
    const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
    const DEFAULT_MAX_PAGES: usize = 50;
    const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub sf_username: Option<String>,
        pub sf_password: Option<String>,
        pub sf_security_token: Option<String>,
        pub sf_domain: String,
        pub sf_api_version: String,
        pub timeout_secs: u64,
        pub query_retries: u32,
        pub retry_backoff_ms: u64,
        pub max_pages: usize,
        pub timezone: String,
        pub session_idle_secs: u64,
        pub sentry_dsn: Option<String>,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                sf_username: None,
                sf_password: None,
                sf_security_token: None,
                sf_domain: DEFAULT_DOMAIN.to_string(),
                sf_api_version: DEFAULT_API_VERSION.to_string(),
                timeout_secs: DEFAULT_TIMEOUT_SECS,
                query_retries: DEFAULT_QUERY_RETRIES,
                retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
                max_pages: DEFAULT_MAX_PAGES,
                timezone: DEFAULT_TIMEZONE.to_string(),
                session_idle_secs: DEFAULT_SESSION_IDLE_SECS,
                sentry_dsn: None,
            }
        }
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let defaults = Self::default();
            Ok(Self {
                sf_username: non_empty_var("SF_USERNAME_PRO"),
                sf_password: non_empty_var("SF_PASSWORD_PRO"),
                // An empty token is legitimate for IP-allowlisted orgs.
                sf_security_token: std::env::var("SF_SECURITY_TOKEN_PRO").ok(),
                sf_domain: non_empty_var("SF_DOMAIN").unwrap_or(defaults.sf_domain),
                sf_api_version: non_empty_var("SF_API_VERSION")
                    .unwrap_or(defaults.sf_api_version),
                timeout_secs: parsed_var("SF_TIMEOUT_SECS")?.unwrap_or(defaults.timeout_secs),
                query_retries: parsed_var("SF_QUERY_RETRIES")?
                    .unwrap_or(defaults.query_retries),
                retry_backoff_ms: parsed_var("SF_RETRY_BACKOFF_MS")?
                    .unwrap_or(defaults.retry_backoff_ms),
                max_pages: parsed_var("SF_MAX_PAGES")?.unwrap_or(defaults.max_pages),
                timezone: non_empty_var("DASHBOARD_TIMEZONE").unwrap_or(defaults.timezone),
                session_idle_secs: parsed_var("SESSION_IDLE_SECS")?
                    .unwrap_or(defaults.session_idle_secs),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }

        pub fn require_sf_username(&self) -> anyhow::Result<&str> {
            self.sf_username
                .as_deref()
                .context("SF_USERNAME_PRO is required")
        }

        pub fn require_sf_password(&self) -> anyhow::Result<&str> {
            self.sf_password
                .as_deref()
                .context("SF_PASSWORD_PRO is required")
        }

        pub fn require_sf_security_token(&self) -> anyhow::Result<&str> {
            self.sf_security_token
                .as_deref()
                .context("SF_SECURITY_TOKEN_PRO is required")
        }

        pub fn login_url(&self) -> String {
            format!("https://{}.salesforce.com", self.sf_domain.trim())
        }

        pub fn timezone(&self) -> anyhow::Result<chrono_tz::Tz> {
            self.timezone.parse::<chrono_tz::Tz>().map_err(|err| {
                anyhow::anyhow!("invalid DASHBOARD_TIMEZONE {:?}: {err}", self.timezone)
            })
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn parsed_var<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = non_empty_var(key) else {
            return Ok(None);
        };
        raw.parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{key} must be numeric (got {raw:?}): {err}"))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn default_timezone_is_us_eastern() {
            let tz = Settings::default().timezone().unwrap();
            assert_eq!(tz, chrono_tz::America::New_York);
        }

        #[test]
        fn sandbox_domain_changes_login_url() {
            let settings = Settings {
                sf_domain: "test".to_string(),
                ..Settings::default()
            };
            assert_eq!(settings.login_url(), "https://test.salesforce.com");
        }

        #[test]
        fn missing_credentials_name_the_env_key() {
            let err = Settings::default().require_sf_username().unwrap_err();
            assert!(err.to_string().contains("SF_USERNAME_PRO"));
        }

        #[test]
        fn rejects_unknown_timezone() {
            let settings = Settings {
                timezone: "Mars/Olympus_Mons".to_string(),
                ..Settings::default()
            };
            assert!(settings.timezone().is_err());
        }
    }
}
