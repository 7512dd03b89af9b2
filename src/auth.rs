//! Session authentication and renewal.
//!
//! [`SessionManager`] is the seam the stream supervisor authenticates through.
//! [`VoyagerSessionManager`] implements it against the LinkedIn web login and
//! the voyager `/me` endpoint using reqwest.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::{redirect, Client, ClientBuilder, StatusCode, Url};
use scraper::{Html, Selector};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RealtimeOptions;
use crate::retry::{retry_async, RetryPolicy};
use crate::urn::Urn;

pub const LINKEDIN_BASE_URL: &str = "https://www.linkedin.com";
const SEED_PATH: &str = "/uas/login";
const LOGIN_PATH: &str = "/checkpoint/lg/login-submit";
const VERIFY_PATH: &str = "/checkpoint/challenge/verify";
const LOGOUT_PATH: &str = "/uas/logout";
const ME_PATH: &str = "/voyager/api/me";

const AUTH_COOKIE: &str = "li_at";
const SESSION_COOKIE: &str = "JSESSIONID";
/// Value LinkedIn writes into cookies it is clearing.
const DELETED_COOKIE_VALUE: &str = "delete me";
const ERROR_BODY_SNIPPET_LEN: usize = 220;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_5) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.116 Safari/537.36";
const LI_TRACK: &str = r#"{"clientVersion":"1.2.6216","osName":"web","timezoneOffset":10,"deviceFormFactor":"DESKTOP","mpName":"voyager-web"}"#;

const CHALLENGE_FIELDS: &[&str] = &[
    "csrfToken",
    "pageInstance",
    "resendUrl",
    "challengeId",
    "displayTime",
    "challengeSource",
    "requestSubmissionId",
    "challengeType",
    "challengeData",
    "challengeDetails",
    "failureRedirectUri",
    "flowTreeId",
];

/// Initial login material supplied by the caller.
#[derive(Clone, Debug)]
pub enum Credentials {
    /// Email/password web login.
    Password { email: String, password: SecretString },
    /// Cookies from an earlier login, validated before use.
    Cookies {
        li_at: SecretString,
        jsession_id: SecretString,
    },
}

impl Credentials {
    pub fn password(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            email: email.into(),
            password: SecretString::new(password.into()),
        }
    }

    pub fn cookies(li_at: impl Into<String>, jsession_id: impl Into<String>) -> Self {
        Self::Cookies {
            li_at: SecretString::new(li_at.into()),
            jsession_id: SecretString::new(jsession_id.into()),
        }
    }
}

/// Authenticated context required to open the stream.
///
/// A session is never mutated in place; renewal returns a replacement.
#[derive(Clone, Debug)]
pub struct Session {
    account_id: String,
    li_at: SecretString,
    jsession_id: SecretString,
    expires_at: Option<SystemTime>,
}

impl Session {
    pub fn new(
        account_id: impl Into<String>,
        li_at: SecretString,
        jsession_id: SecretString,
        expires_at: Option<SystemTime>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            li_at,
            jsession_id,
            expires_at,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// CSRF token echoed in the `csrf-token` header; the JSESSIONID value
    /// without its surrounding quotes.
    pub fn anti_forgery_token(&self) -> &str {
        self.jsession_id.expose_secret().trim_matches('"')
    }

    /// `Cookie` header value carrying both auth cookies.
    pub fn cookie_header(&self) -> String {
        format!(
            "{AUTH_COOKIE}={}; {SESSION_COOKIE}=\"{}\"",
            self.li_at.expose_secret(),
            self.anti_forgery_token()
        )
    }

    fn has_auth_cookies(&self) -> bool {
        !self.li_at.expose_secret().is_empty() && !self.anti_forgery_token().is_empty()
    }
}

/// Hidden form state of a two-factor login challenge.
///
/// Carries the cookies of the interrupted login so
/// [`VoyagerSessionManager::verify_challenge`] can resume it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    fields: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
}

impl Challenge {
    /// Kind of challenge the backend issued, e.g. an email PIN.
    pub fn challenge_type(&self) -> Option<&str> {
        self.fields.get("challengeType").map(String::as_str)
    }
}

/// Authentication failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("login challenge required")]
    ChallengeRequired(Challenge),

    #[error("session expired")]
    Expired,

    #[error("session revoked")]
    Revoked,

    #[error("network error: {0}")]
    NetworkError(String),
}

impl AuthError {
    /// Transient failures worth retrying with the same material.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_))
    }

    fn from_transport(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timeout"
        } else if err.is_connect() {
            "connect"
        } else {
            "request"
        };
        Self::NetworkError(format!("{kind}: {err}"))
    }
}

/// Owner of authentication and renewal.
pub trait SessionManager: Send + Sync + 'static {
    /// Logs in with the supplied material.
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Session, AuthError>> + Send;

    /// Refreshes an existing session.
    fn renew(&self, session: &Session) -> impl Future<Output = Result<Session, AuthError>> + Send;

    /// Local freshness check, no network.
    fn is_valid(&self, session: &Session) -> bool;
}

/// Session manager for the LinkedIn web login.
#[derive(Clone)]
pub struct VoyagerSessionManager {
    http: Client,
    base_url: String,
    retry_policy: RetryPolicy,
    connect_timeout: Duration,
    session_lifetime: Duration,
    renew_skew: Duration,
}

impl VoyagerSessionManager {
    pub fn new(options: &RealtimeOptions) -> Result<Self, AuthError> {
        let http = client_builder(options.connect_timeout)
            .build()
            .map_err(AuthError::from_transport)?;

        Ok(Self {
            http,
            base_url: LINKEDIN_BASE_URL.to_string(),
            retry_policy: RetryPolicy::auth_requests(),
            connect_timeout: options.connect_timeout,
            session_lifetime: options.session_lifetime,
            renew_skew: options.renew_skew,
        })
    }

    /// Sets an explicit base URL override for the web endpoints.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end().trim_end_matches('/').to_string();
        self
    }

    /// Sets the retry policy for login and session-check requests.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Completes a login that failed with [`AuthError::ChallengeRequired`].
    pub async fn verify_challenge(
        &self,
        challenge: &Challenge,
        pin: &str,
    ) -> Result<Session, AuthError> {
        let cookies = FlowCookies::restore(&self.base_url, &challenge.cookies)?;
        let http = self.flow_client(&cookies)?;
        let mut form: Vec<(&str, &str)> = challenge
            .fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        form.push(("pin", pin));

        http.post(self.endpoint(VERIFY_PATH))
            .form(&form)
            .send()
            .await
            .map_err(AuthError::from_transport)?;

        match cookies.auth_pair() {
            Some((li_at, jsession_id)) => {
                info!(event = "login_challenge_passed");
                self.session_from_cookies(li_at, jsession_id, AuthError::InvalidCredentials)
                    .await
            }
            None => Err(AuthError::InvalidCredentials),
        }
    }

    /// Ends the session server-side. Returns whether the backend confirmed it.
    pub async fn logout(&self, session: &Session) -> Result<bool, AuthError> {
        let response = self
            .http
            .get(self.endpoint(LOGOUT_PATH))
            .query(&[("csrfToken", session.anti_forgery_token())])
            .header(COOKIE, session.cookie_header())
            .send()
            .await
            .map_err(AuthError::from_transport)?;
        Ok(response.status() == StatusCode::SEE_OTHER)
    }

    async fn login_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, AuthError> {
        let cookies = FlowCookies::new(&self.base_url)?;
        let http = self.flow_client(&cookies)?;

        let seed = retry_async(
            &self.retry_policy,
            |_| http.get(self.endpoint(SEED_PATH)).send(),
            |err: &reqwest::Error| err.is_timeout() || err.is_connect(),
        )
        .await
        .map_err(AuthError::from_transport)?;
        if seed.status() != StatusCode::OK {
            return Err(AuthError::NetworkError(format!(
                "login seed page returned {}",
                seed.status()
            )));
        }
        let seed_html = seed.text().await.map_err(AuthError::from_transport)?;
        let login_csrf = form_inputs(&seed_html)
            .remove("loginCsrfParam")
            .ok_or_else(|| {
                AuthError::NetworkError("login seed page has no loginCsrfParam".to_string())
            })?;

        let response = http
            .post(self.endpoint(LOGIN_PATH))
            .form(&[
                ("loginCsrfParam", login_csrf.as_str()),
                ("session_key", email),
                ("session_password", password.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(AuthError::from_transport)?;

        if let Some((li_at, jsession_id)) = cookies.auth_pair() {
            return self
                .session_from_cookies(li_at, jsession_id, AuthError::InvalidCredentials)
                .await;
        }

        let body = response.text().await.map_err(AuthError::from_transport)?;
        let mut inputs = form_inputs(&body);
        if inputs.contains_key("challengeId") {
            let mut fields: BTreeMap<String, String> = CHALLENGE_FIELDS
                .iter()
                .filter_map(|name| inputs.remove(*name).map(|value| (name.to_string(), value)))
                .collect();
            fields.insert("language".to_string(), "en-US".to_string());
            fields.insert("recognizedDevice".to_string(), "on".to_string());
            info!(event = "login_challenge_required");
            return Err(AuthError::ChallengeRequired(Challenge {
                fields,
                cookies: cookies.snapshot(),
            }));
        }

        warn!(event = "login_rejected");
        Err(AuthError::InvalidCredentials)
    }

    /// Validates cookie material against `/me` and builds a session from it.
    ///
    /// `rejected` is the error returned when the backend refuses the cookies.
    async fn session_from_cookies(
        &self,
        li_at: String,
        jsession_id: String,
        rejected: AuthError,
    ) -> Result<Session, AuthError> {
        let candidate = Session::new(
            String::new(),
            SecretString::new(li_at),
            SecretString::new(jsession_id),
            None,
        );
        match self.fetch_me(&candidate).await {
            Ok(me) => Ok(me.into_session(candidate, self.session_lifetime)),
            Err(AuthError::Expired | AuthError::Revoked) => Err(rejected),
            Err(err) => Err(err),
        }
    }

    async fn fetch_me(&self, session: &Session) -> Result<MeResult, AuthError> {
        retry_async(
            &self.retry_policy,
            |_| self.fetch_me_attempt(session),
            AuthError::is_retryable,
        )
        .await
    }

    async fn fetch_me_attempt(&self, session: &Session) -> Result<MeResult, AuthError> {
        let response = self
            .http
            .get(self.endpoint(ME_PATH))
            .header(COOKIE, session.cookie_header())
            .header("csrf-token", session.anti_forgery_token())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(AuthError::from_transport)?;

        let rotated = FlowCookies::new(&self.base_url)?;
        rotated.absorb(response.headers(), response.url());
        let status = response.status();
        let body = response.text().await.map_err(AuthError::from_transport)?;

        match status {
            status if status.is_success() => {
                let profile: MeResponse = serde_json::from_str(&body).map_err(|err| {
                    AuthError::NetworkError(format!("unexpected /me response: {err}"))
                })?;
                Ok(MeResult {
                    account_id: profile.account_id(),
                    rotated,
                })
            }
            StatusCode::UNAUTHORIZED => Err(AuthError::Expired),
            StatusCode::FORBIDDEN => Err(AuthError::Revoked),
            status => {
                debug!(
                    event = "session_check_failed",
                    status = status.as_u16(),
                    body = %summarize_error_body(&body)
                );
                Err(AuthError::NetworkError(format!("/me returned {status}")))
            }
        }
    }

    /// Client for one login flow, storing every cookie the flow receives.
    fn flow_client(&self, cookies: &FlowCookies) -> Result<Client, AuthError> {
        client_builder(self.connect_timeout)
            .cookie_provider(Arc::clone(&cookies.jar))
            .build()
            .map_err(AuthError::from_transport)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl SessionManager for VoyagerSessionManager {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        match credentials {
            Credentials::Password { email, password } => {
                self.login_with_password(email, password).await
            }
            Credentials::Cookies { li_at, jsession_id } => {
                self.session_from_cookies(
                    li_at.expose_secret().clone(),
                    jsession_id.expose_secret().clone(),
                    AuthError::InvalidCredentials,
                )
                .await
            }
        }
    }

    async fn renew(&self, session: &Session) -> Result<Session, AuthError> {
        let me = self.fetch_me(session).await?;
        debug!(event = "session_renewed", account_id = %me.account_id);
        Ok(me.into_session(session.clone(), self.session_lifetime))
    }

    fn is_valid(&self, session: &Session) -> bool {
        session_is_fresh(session, self.renew_skew, SystemTime::now())
    }
}

pub(crate) fn session_is_fresh(session: &Session, skew: Duration, now: SystemTime) -> bool {
    if !session.has_auth_cookies() {
        return false;
    }
    match session.expires_at {
        Some(expires_at) => now
            .checked_add(skew)
            .map_or(false, |deadline| expires_at > deadline),
        None => true,
    }
}

fn client_builder(connect_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .redirect(redirect::Policy::none())
        .connect_timeout(connect_timeout)
        .default_headers(browser_headers())
}

/// Headers the web frontend sends with every request.
pub(crate) fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        "accept-language",
        HeaderValue::from_static("en-AU,en-GB;q=0.9,en-US;q=0.8,en;q=0.7"),
    );
    headers.insert("x-li-lang", HeaderValue::from_static("en_US"));
    headers.insert("x-restli-protocol-version", HeaderValue::from_static("2.0.0"));
    headers.insert("x-li-track", HeaderValue::from_static(LI_TRACK));
    headers
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    #[serde(default)]
    plain_id: Option<serde_json::Value>,
    #[serde(default)]
    mini_profile: Option<MiniProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MiniProfile {
    #[serde(default)]
    entity_urn: Option<Urn>,
}

impl MeResponse {
    fn account_id(&self) -> String {
        match &self.plain_id {
            Some(serde_json::Value::String(id)) => return id.clone(),
            Some(serde_json::Value::Number(id)) => return id.to_string(),
            _ => {}
        }
        self.mini_profile
            .as_ref()
            .and_then(|profile| profile.entity_urn.as_ref())
            .and_then(|urn| urn.last_id())
            .unwrap_or_default()
            .to_string()
    }
}

struct MeResult {
    account_id: String,
    rotated: FlowCookies,
}

impl MeResult {
    fn into_session(self, previous: Session, lifetime: Duration) -> Session {
        let li_at = self
            .rotated
            .get(AUTH_COOKIE)
            .map(SecretString::new)
            .unwrap_or(previous.li_at);
        let jsession_id = self
            .rotated
            .get(SESSION_COOKIE)
            .map(SecretString::new)
            .unwrap_or(previous.jsession_id);
        Session {
            account_id: self.account_id,
            li_at,
            jsession_id,
            expires_at: SystemTime::now().checked_add(lifetime),
        }
    }
}

/// Cookie jar of one login flow or session check, read back at the site
/// origin so Domain and Path scoping are honoured.
struct FlowCookies {
    jar: Arc<Jar>,
    origin: Url,
}

impl FlowCookies {
    fn new(base_url: &str) -> Result<Self, AuthError> {
        let origin = Url::parse(base_url).map_err(|err| {
            AuthError::NetworkError(format!("invalid base url {base_url}: {err}"))
        })?;
        Ok(Self {
            jar: Arc::new(Jar::default()),
            origin,
        })
    }

    fn restore(base_url: &str, cookies: &BTreeMap<String, String>) -> Result<Self, AuthError> {
        let flow = Self::new(base_url)?;
        for (name, value) in cookies {
            flow.jar
                .add_cookie_str(&format!("{name}={value}; Path=/"), &flow.origin);
        }
        Ok(flow)
    }

    fn absorb(&self, headers: &HeaderMap, url: &Url) {
        let mut set_cookies = headers.get_all(SET_COOKIE).iter();
        self.jar.set_cookies(&mut set_cookies, url);
    }

    /// Live cookies the jar would send to the origin.
    fn snapshot(&self) -> BTreeMap<String, String> {
        let Some(header) = self.jar.cookies(&self.origin) else {
            return BTreeMap::new();
        };
        header
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let cleared = value.is_empty() || value.trim_matches('"') == DELETED_COOKIE_VALUE;
                (!cleared).then(|| (name.to_string(), value.to_string()))
            })
            .collect()
    }

    fn get(&self, name: &str) -> Option<String> {
        self.snapshot().remove(name)
    }

    fn auth_pair(&self) -> Option<(String, String)> {
        let mut cookies = self.snapshot();
        Some((cookies.remove(AUTH_COOKIE)?, cookies.remove(SESSION_COOKIE)?))
    }
}

/// Named `<input>` values of a login page. The first input with a given name
/// wins.
fn form_inputs(html: &str) -> BTreeMap<String, String> {
    let mut inputs = BTreeMap::new();
    let Ok(selector) = Selector::parse("input[name]") else {
        return inputs;
    };
    let document = Html::parse_document(html);
    for input in document.select(&selector) {
        let element = input.value();
        if let (Some(name), Some(value)) = (element.attr("name"), element.attr("value")) {
            inputs
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    inputs
}

fn summarize_error_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use secrecy::SecretString;

    use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
    use reqwest::Url;

    use super::{form_inputs, session_is_fresh, AuthError, FlowCookies, MeResponse, Session};

    fn session(expires_at: Option<SystemTime>) -> Session {
        Session::new(
            "12345",
            SecretString::new("AQEDAR-token".to_string()),
            SecretString::new("\"ajax:0123456789\"".to_string()),
            expires_at,
        )
    }

    #[test]
    fn anti_forgery_token_strips_quotes() {
        let session = session(None);
        assert_eq!(session.anti_forgery_token(), "ajax:0123456789");
        assert_eq!(
            session.cookie_header(),
            "li_at=AQEDAR-token; JSESSIONID=\"ajax:0123456789\""
        );
    }

    #[test]
    fn session_without_expiry_is_fresh() {
        assert!(session_is_fresh(&session(None), Duration::from_secs(60), SystemTime::now()));
    }

    #[test]
    fn session_inside_renew_skew_is_not_fresh() {
        let now = SystemTime::now();
        let expiring = session(Some(now + Duration::from_secs(30)));
        assert!(!session_is_fresh(&expiring, Duration::from_secs(60), now));

        let healthy = session(Some(now + Duration::from_secs(600)));
        assert!(session_is_fresh(&healthy, Duration::from_secs(60), now));
    }

    #[test]
    fn session_missing_cookies_is_not_fresh() {
        let empty = Session::new(
            "1",
            SecretString::new(String::new()),
            SecretString::new("\"ajax:1\"".to_string()),
            None,
        );
        assert!(!session_is_fresh(&empty, Duration::ZERO, SystemTime::now()));
    }

    #[test]
    fn extracts_hidden_input_values() {
        let html = r#"<form><input type="hidden" name="loginCsrfParam" value="a&amp;b-123" />
            <input name="challengeId" value="AQH" type="hidden"></form>"#;
        let inputs = form_inputs(html);
        assert_eq!(inputs.get("loginCsrfParam").map(String::as_str), Some("a&b-123"));
        assert_eq!(inputs.get("challengeId").map(String::as_str), Some("AQH"));
        assert!(!inputs.contains_key("pin"));
    }

    #[test]
    fn input_value_ignores_lookalike_attributes_and_accepts_single_quotes() {
        let html = r#"<html><body>
            <input name="loginCsrfParam" data-value="decoy" value="real-token">
            <input type='hidden' name='challengeId' value='AQH-single'>
            <input name="loginCsrfParam" value="second-form">
            </body></html>"#;
        let inputs = form_inputs(html);
        assert_eq!(inputs.get("loginCsrfParam").map(String::as_str), Some("real-token"));
        assert_eq!(inputs.get("challengeId").map(String::as_str), Some("AQH-single"));
    }

    fn set_cookies(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(SET_COOKIE, HeaderValue::from_str(value).expect("header"));
        }
        headers
    }

    #[test]
    fn flow_cookies_honour_domain_and_expiry() {
        let cookies = FlowCookies::new("https://www.linkedin.com").expect("origin");
        let login = Url::parse("https://www.linkedin.com/checkpoint/lg/login-submit").expect("url");
        cookies.absorb(
            &set_cookies(&[
                "li_at=AQEDAR; Path=/; Domain=.www.linkedin.com; Secure; HttpOnly",
                "JSESSIONID=\"ajax:42\"; Path=/; Domain=.www.linkedin.com; Secure",
                "bcookie=tracked; Path=/; Domain=.evil.example",
            ]),
            &login,
        );

        let (li_at, jsession_id) = cookies.auth_pair().expect("auth cookies");
        assert_eq!(li_at, "AQEDAR");
        assert_eq!(jsession_id.trim_matches('"'), "ajax:42");
        assert_eq!(cookies.get("bcookie"), None);

        cookies.absorb(
            &set_cookies(&[
                "li_at=; Path=/; Domain=.www.linkedin.com; Secure; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            ]),
            &login,
        );
        assert_eq!(cookies.get("li_at"), None);
        assert!(cookies.auth_pair().is_none());
    }

    #[test]
    fn restored_challenge_cookies_are_sent_again() {
        let saved = [("JSESSIONID".to_string(), "\"ajax:7\"".to_string())]
            .into_iter()
            .collect();
        let cookies = FlowCookies::restore("https://www.linkedin.com", &saved).expect("restore");
        assert_eq!(
            cookies.get("JSESSIONID").as_deref().map(|value| value.trim_matches('"')),
            Some("ajax:7")
        );
        assert!(cookies.auth_pair().is_none());
    }

    #[test]
    fn me_response_prefers_plain_id() {
        let me: MeResponse = serde_json::from_str(
            r#"{"plainId":987,"miniProfile":{"entityUrn":"urn:li:fs_miniProfile:ACoAAB"}}"#,
        )
        .expect("parse");
        assert_eq!(me.account_id(), "987");

        let me: MeResponse =
            serde_json::from_str(r#"{"miniProfile":{"entityUrn":"urn:li:fs_miniProfile:ACoAAB"}}"#)
                .expect("parse");
        assert_eq!(me.account_id(), "ACoAAB");
    }

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(AuthError::NetworkError("connect".to_string()).is_retryable());
        assert!(!AuthError::Expired.is_retryable());
        assert!(!AuthError::Revoked.is_retryable());
        assert!(!AuthError::InvalidCredentials.is_retryable());
    }
}
