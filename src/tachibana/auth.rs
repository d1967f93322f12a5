//! Login/logout exchanges
//!
//! The only place sessions are born. `login` performs the authentication
//! exchange with a fresh cookie jar (created before the request so the
//! provider's cookies land in the session's own store, never a shared one)
//! and turns a successful response into a [`Session`].

use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::{Client, Method};
use tracing::{info, instrument};

use crate::common::errors::{ClientError, Result};
use crate::tachibana::marshal::{from_map, to_flat_map};
use crate::tachibana::messages::{
    LoginRequest, LoginResponse, LogoutRequest, LogoutResponse, RequestEnvelope, CLMID_LOGIN,
    CLMID_LOGOUT,
};
use crate::tachibana::session::Session;
use crate::tachibana::transport::Transport;

/// Performs the authentication exchanges against the provider
#[derive(Debug, Clone)]
pub struct AuthClient {
    base_url: String,
    transport: Transport,
}

impl AuthClient {
    pub fn new(base_url: &str, transport: Transport) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    /// Authenticate and produce a new session.
    ///
    /// A rejected login (non-zero result code) is surfaced as
    /// [`ClientError::Authentication`] carrying the provider's own
    /// code/text; no session is created in that case.
    #[instrument(skip(self, password, second_password), fields(user_id = user_id))]
    pub async fn login(
        &self,
        user_id: &str,
        password: &str,
        second_password: &str,
    ) -> Result<Session> {
        let url = format!("{}/auth/", self.base_url);

        let request = LoginRequest {
            // The login request itself always carries sequence number 1;
            // the granted session's counter starts fresh afterwards.
            envelope: RequestEnvelope::new(CLMID_LOGIN, 1),
            user_id: user_id.to_string(),
            password: password.to_string(),
        };
        let params = to_flat_map(&request)?;

        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| ClientError::Session(format!("http client build failed: {}", e)))?;

        let reply = self
            .transport
            .exchange(&http, Method::GET, &url, &params)
            .await?;

        let login: LoginResponse = from_map(&reply.body)?;
        if login.result_code != "0" {
            return Err(ClientError::Authentication {
                code: login.result_code,
                text: login.result_text,
            });
        }

        info!(request_url = %login.request_url, "login successful");
        Ok(Session::from_login(
            &login,
            reply.set_cookies,
            jar,
            http,
            second_password,
        ))
    }

    /// Notify the provider that the session is ending. Consumes one
    /// sequence number like any other request.
    #[instrument(skip(self, session))]
    pub async fn logout(&self, session: &Session) -> Result<LogoutResponse> {
        let request = LogoutRequest {
            envelope: RequestEnvelope::new(CLMID_LOGOUT, session.next_p_no()),
        };
        let params = to_flat_map(&request)?;

        let reply = self
            .transport
            .exchange(session.http(), Method::GET, &session.request_url, &params)
            .await?;

        let logout: LogoutResponse = from_map(&reply.body)?;
        info!(result_code = %logout.result_code, "logout exchange completed");
        Ok(logout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_client(server: &MockServer) -> AuthClient {
        AuthClient::new(
            &server.uri(),
            Transport::new(1, Duration::from_millis(10), Duration::from_secs(5)),
        )
    }

    fn login_body(result_code: &str) -> String {
        format!(
            r#"{{"sResultCode":"{}","sResultText":"","sUrlRequest":"https://r.example.com/req/","sUrlMaster":"https://r.example.com/master/","sUrlPrice":"https://r.example.com/price/","sUrlEvent":"https://r.example.com/event/"}}"#,
            result_code
        )
    }

    #[tokio::test]
    async fn login_builds_session_from_granted_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(login_body("0"))
                    .insert_header("set-cookie", "JSESSIONID=xyz; Path=/"),
            )
            .mount(&server)
            .await;

        let session = auth_client(&server)
            .login("user", "pass", "second")
            .await
            .unwrap();

        assert_eq!(session.result_code, "0");
        assert_eq!(session.request_url, "https://r.example.com/req/");
        assert_eq!(session.second_password, "second");
        assert_eq!(session.cookie_header().unwrap(), "JSESSIONID=xyz");
        assert_eq!(session.next_p_no(), 1);
    }

    #[tokio::test]
    async fn rejected_login_surfaces_provider_code_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"sResultCode":"E001","sResultText":"invalid credentials"}"#,
            ))
            .mount(&server)
            .await;

        let err = auth_client(&server)
            .login("user", "wrong", "second")
            .await
            .unwrap_err();

        match err {
            ClientError::Authentication { code, text } => {
                assert_eq!(code, "E001");
                assert_eq!(text, "invalid credentials");
            }
            other => panic!("expected Authentication error, got {:?}", other),
        }
    }
}
