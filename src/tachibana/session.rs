//! Session value object
//!
//! A `Session` is one authenticated API grant: the four endpoint URLs the
//! provider issued at login, the cookie store scoped to that login, the
//! secondary trade-authorization credential, and the per-session request
//! sequence counter. Only the session managers construct or discard
//! sessions; everything else borrows one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::common::errors::{ClientError, Result};
use crate::tachibana::messages::LoginResponse;

/// One authenticated API grant
#[derive(Debug)]
pub struct Session {
    /// Result code/text of the login that created this session
    pub result_code: String,
    pub result_text: String,

    /// Secondary trade-authorization credential, copied in at creation
    pub second_password: String,

    /// Endpoint URLs granted by the login response
    pub request_url: String,
    pub master_url: String,
    pub price_url: String,
    pub event_url: String,

    /// Raw `Set-Cookie` values captured at login, kept for persistence and
    /// for the WebSocket handshake
    cookies: Vec<String>,

    /// Cookie store exclusive to this session. The server may invalidate a
    /// prior login's cookies when the same account logs in again, so jars
    /// are never shared across sessions.
    jar: Arc<Jar>,

    /// HTTP client bound to this session's jar
    http: Client,

    /// Request sequence counter; strictly increasing for the session's
    /// lifetime, first value handed out is 1
    p_no: AtomicU32,
}

/// Durable snapshot of a session, used by the date-based policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub result_code: String,
    pub result_text: String,
    pub second_password: String,
    pub request_url: String,
    pub master_url: String,
    pub price_url: String,
    pub event_url: String,
    pub cookies: Vec<String>,
    /// Last sequence value handed out, so a restored session continues the
    /// counter monotonically instead of restarting at 1
    pub p_no: u32,
}

impl Session {
    /// Build a session from a successful login exchange. The jar/client pair
    /// must be the ones the login was performed with, so the provider's
    /// cookies are already inside.
    pub fn from_login(
        login: &LoginResponse,
        set_cookies: Vec<String>,
        jar: Arc<Jar>,
        http: Client,
        second_password: &str,
    ) -> Self {
        let session = Self {
            result_code: login.result_code.clone(),
            result_text: login.result_text.clone(),
            second_password: second_password.to_string(),
            request_url: login.request_url.clone(),
            master_url: login.master_url.clone(),
            price_url: login.price_url.clone(),
            event_url: login.event_url.clone(),
            cookies: set_cookies,
            jar,
            http,
            p_no: AtomicU32::new(0),
        };
        // The granted endpoints can differ from the auth host; make the
        // login cookies visible to all of them.
        session.seed_jar();
        session
    }

    /// Rebuild a session from a persisted record
    pub fn from_record(record: SessionRecord) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| ClientError::Session(format!("http client build failed: {}", e)))?;

        let session = Self {
            result_code: record.result_code,
            result_text: record.result_text,
            second_password: record.second_password,
            request_url: record.request_url,
            master_url: record.master_url,
            price_url: record.price_url,
            event_url: record.event_url,
            cookies: record.cookies,
            jar,
            http,
            p_no: AtomicU32::new(record.p_no),
        };
        session.seed_jar();
        Ok(session)
    }

    /// Snapshot the serializable state for durable storage
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            result_code: self.result_code.clone(),
            result_text: self.result_text.clone(),
            second_password: self.second_password.clone(),
            request_url: self.request_url.clone(),
            master_url: self.master_url.clone(),
            price_url: self.price_url.clone(),
            event_url: self.event_url.clone(),
            cookies: self.cookies.clone(),
            p_no: self.p_no.load(Ordering::SeqCst),
        }
    }

    /// Consume and return the next request sequence number. Atomic, so
    /// concurrent requests sharing this session never reuse a value.
    pub fn next_p_no(&self) -> u32 {
        self.p_no.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The HTTP client bound to this session's cookie store
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Render the session cookies as a `Cookie` request header value for
    /// the WebSocket handshake, where reqwest's jar cannot help us
    pub fn cookie_header(&self) -> Option<String> {
        let pairs: Vec<&str> = self
            .cookies
            .iter()
            .filter_map(|c| c.split(';').next())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    fn seed_jar(&self) {
        for endpoint in [
            &self.request_url,
            &self.master_url,
            &self.price_url,
            &self.event_url,
        ] {
            if let Ok(url) = Url::parse(endpoint) {
                for cookie in &self.cookies {
                    self.jar.add_cookie_str(cookie, &url);
                }
            }
        }
    }
}
