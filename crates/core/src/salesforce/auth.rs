use crate::error::PipelineError;
use reqwest::Url;

const CLIENT_ID: &str = "policy-dash";

/// Authenticated handle returned by the partner `login` call.
#[derive(Clone)]
pub struct SalesforceSession {
    pub instance_url: String,
    pub session_id: String,
}

impl std::fmt::Debug for SalesforceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceSession")
            .field("instance_url", &self.instance_url)
            .field("session_id", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub security_token: String,
}

/// Username/password/security-token login against the SOAP partner endpoint.
pub async fn login(
    http: &reqwest::Client,
    login_url: &str,
    api_version: &str,
    creds: &Credentials,
) -> Result<SalesforceSession, PipelineError> {
    let url = format!(
        "{}/services/Soap/u/{}",
        login_url.trim_end_matches('/'),
        api_version
    );

    let res = http
        .post(url)
        .header("Content-Type", "text/xml; charset=UTF-8")
        .header("SOAPAction", "login")
        .body(login_envelope(creds))
        .send()
        .await
        .map_err(|err| PipelineError::Auth(format!("login request failed: {err}")))?;

    let status = res.status();
    let text = res
        .text()
        .await
        .map_err(|err| PipelineError::Auth(format!("failed to read login response: {err}")))?;

    if !status.is_success() {
        let detail = xml_element(&text, "faultstring").unwrap_or_else(|| text.trim().to_string());
        return Err(PipelineError::Auth(format!("login HTTP {status}: {detail}")));
    }

    parse_login_response(&text)
}

fn login_envelope(creds: &Credentials) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<env:Envelope
        xmlns:xsd="http://www.w3.org/2001/XMLSchema"
        xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
        xmlns:env="http://schemas.xmlsoap.org/soap/envelope/"
        xmlns:urn="urn:partner.soap.sforce.com">
    <env:Header>
        <urn:CallOptions>
            <urn:client>{client}</urn:client>
        </urn:CallOptions>
    </env:Header>
    <env:Body>
        <n1:login xmlns:n1="urn:partner.soap.sforce.com">
            <n1:username>{username}</n1:username>
            <n1:password>{password}{token}</n1:password>
        </n1:login>
    </env:Body>
</env:Envelope>"#,
        client = CLIENT_ID,
        username = xml_escape(&creds.username),
        password = xml_escape(&creds.password),
        token = xml_escape(&creds.security_token),
    )
}

fn parse_login_response(xml: &str) -> Result<SalesforceSession, PipelineError> {
    if let Some(fault) = xml_element(xml, "faultstring") {
        return Err(PipelineError::Auth(fault));
    }

    let session_id = xml_element(xml, "sessionId")
        .ok_or_else(|| PipelineError::Auth("login response has no sessionId".to_string()))?;
    let server_url = xml_element(xml, "serverUrl")
        .ok_or_else(|| PipelineError::Auth("login response has no serverUrl".to_string()))?;

    let parsed = Url::parse(&server_url)
        .map_err(|err| PipelineError::Auth(format!("invalid serverUrl {server_url:?}: {err}")))?;

    Ok(SalesforceSession {
        instance_url: parsed.origin().ascii_serialization(),
        session_id,
    })
}

/// Text content of the first `<tag>` element, ignoring any namespace prefix.
fn xml_element(xml: &str, tag: &str) -> Option<String> {
    let mut rest = xml;
    while let Some(lt) = rest.find('<') {
        rest = &rest[lt + 1..];
        let gt = rest.find('>')?;
        let name = rest[..gt].split_whitespace().next().unwrap_or("");
        let local = name.rsplit(':').next().unwrap_or(name);
        if local == tag && !name.starts_with('/') && !rest[..gt].ends_with('/') {
            let body = &rest[gt + 1..];
            let end = body.find("</")?;
            return Some(xml_unescape(body[..end].trim()));
        }
        rest = &rest[gt + 1..];
    }
    None
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
