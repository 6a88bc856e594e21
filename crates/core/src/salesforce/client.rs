use crate::config::Settings;
use crate::error::PipelineError;
use crate::salesforce::auth::{self, Credentials, SalesforceSession};
use crate::salesforce::types::{describe_api_errors, QueryPage};
use crate::salesforce::QueryTransport;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use std::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SalesforceClient {
    http: reqwest::Client,
    session: SalesforceSession,
    api_version: String,
    retries: u32,
    retry_backoff: Duration,
}

enum Attempt {
    Done(QueryPage),
    Retry(String),
}

impl SalesforceClient {
    /// Builds the HTTP client and logs in once. There is no token refresh:
    /// an expired session surfaces as `PipelineError::Auth`.
    pub async fn connect(settings: &Settings) -> Result<Self, PipelineError> {
        let creds = credentials(settings)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| PipelineError::Auth(format!("failed to build http client: {err}")))?;

        let login_url = settings.login_url();
        let session = auth::login(&http, &login_url, &settings.sf_api_version, &creds).await?;
        tracing::info!(
            instance_url = %session.instance_url,
            username = %creds.username,
            "salesforce login succeeded"
        );

        Ok(Self {
            http,
            session,
            api_version: settings.sf_api_version.clone(),
            retries: settings.query_retries.max(1),
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    pub fn instance_url(&self) -> &str {
        &self.session.instance_url
    }

    fn query_url(&self) -> String {
        format!(
            "{}/services/data/v{}/query",
            self.session.instance_url.trim_end_matches('/'),
            self.api_version
        )
    }

    fn cursor_url(&self, cursor: &str) -> String {
        if cursor.starts_with("http://") || cursor.starts_with("https://") {
            return cursor.to_string();
        }
        let path = if cursor.starts_with('/') {
            cursor.to_string()
        } else {
            format!("/{cursor}")
        };
        format!("{}{}", self.session.instance_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap, PipelineError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.session.session_id))
            .map_err(|_| PipelineError::Auth("session id is not a valid header value".into()))?;
        headers.insert("Authorization", bearer);
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn get_page(&self, url: &str, soql: Option<&str>) -> Result<QueryPage, PipelineError> {
        let headers = self.headers()?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(url, soql, headers.clone()).await? {
                Attempt::Done(page) => return Ok(page),
                Attempt::Retry(reason) => {
                    if attempt >= self.retries {
                        return Err(PipelineError::Query(reason));
                    }
                    let backoff = backoff_delay(self.retry_backoff, attempt);
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        error = %reason,
                        "salesforce query failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn get_once(
        &self,
        url: &str,
        soql: Option<&str>,
        headers: HeaderMap,
    ) -> Result<Attempt, PipelineError> {
        let mut req = self.http.get(url).headers(headers);
        if let Some(q) = soql {
            req = req.query(&[("q", q)]);
        }

        let res = match req.send().await {
            Ok(res) => res,
            Err(err) => return Ok(Attempt::Retry(format!("request failed: {err}"))),
        };

        let status = res.status();
        let text = match res.text().await {
            Ok(text) => text,
            Err(err) => return Ok(Attempt::Retry(format!("failed to read response: {err}"))),
        };

        classify(status, &text)
    }
}

/// 401 ends the session, 429 and 5xx are worth another try, anything else
/// non-2xx is a query error.
fn classify(status: StatusCode, text: &str) -> Result<Attempt, PipelineError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(PipelineError::Auth(describe_api_errors(text)));
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Ok(Attempt::Retry(format!(
            "HTTP {status}: {}",
            describe_api_errors(text)
        )));
    }
    if !status.is_success() {
        return Err(PipelineError::Query(format!(
            "HTTP {status}: {}",
            describe_api_errors(text)
        )));
    }

    serde_json::from_str::<QueryPage>(text)
        .map(Attempt::Done)
        .map_err(|err| PipelineError::Query(format!("unexpected query response: {err}")))
}

/// Doubles `base` per attempt, capped at `MAX_BACKOFF`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[async_trait::async_trait]
impl QueryTransport for SalesforceClient {
    async fn first_page(&self, soql: &str) -> Result<QueryPage, PipelineError> {
        let url = self.query_url();
        self.get_page(&url, Some(soql)).await
    }

    async fn next_page(&self, cursor: &str) -> Result<QueryPage, PipelineError> {
        let url = self.cursor_url(cursor);
        self.get_page(&url, None).await
    }
}

fn credentials(settings: &Settings) -> Result<Credentials, PipelineError> {
    let auth_err = |err: anyhow::Error| PipelineError::Auth(format!("{err:#}"));
    Ok(Credentials {
        username: settings.require_sf_username().map_err(auth_err)?.to_string(),
        password: settings.require_sf_password().map_err(auth_err)?.to_string(),
        security_token: settings
            .require_sf_security_token()
            .map_err(auth_err)?
            .to_string(),
    })
}
