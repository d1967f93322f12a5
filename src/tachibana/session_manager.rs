//! Session lifecycle management
//!
//! Two interchangeable policies own the one live [`Session`] and decide when
//! it is stale: [`TimeBasedSessionManager`] expires a session after a fixed
//! duration since login, [`DateBasedSessionManager`] keys the session to the
//! current business day and persists it on disk so a process restart within
//! the same day resumes the previous login. Both serialize their mutating
//! paths behind a write lock; the authenticated fast path takes the read
//! lock only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Local, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::common::errors::{ClientError, Result};
use crate::tachibana::auth::AuthClient;
use crate::tachibana::session::{Session, SessionRecord};

/// Default staleness budget for the time-based policy
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);
/// Default directory for persisted session records
pub const DEFAULT_SESSION_DIR: &str = "./data/sessions";

/// Login credentials handed to a manager at construction
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
    /// Secondary trade-authorization credential, attached to every new session
    pub second_password: String,
}

/// Common interface over the two lifecycle policies
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Make sure a valid session is held, logging in if necessary.
    /// Authentication failures are always surfaced, never swallowed.
    async fn ensure_authenticated(&self) -> Result<()>;

    /// Return the held session, authenticating first if needed
    async fn get_session(&self) -> Result<Arc<Session>>;

    /// Whether a session is currently held and not stale
    async fn is_authenticated(&self) -> bool;

    /// Notify the server best-effort and unconditionally clear local state
    async fn logout(&self) -> Result<()>;
}

/// Lifecycle policy selector, chosen at construction time
#[derive(Debug, Clone)]
pub enum SessionPolicy {
    /// Fixed-duration expiry since the last successful login
    Time { timeout: Duration },
    /// Business-day rollover with on-disk persistence
    Date { session_dir: PathBuf },
}

/// Build the manager variant for the given policy
pub fn create_session_manager(
    policy: SessionPolicy,
    auth: AuthClient,
    credentials: Credentials,
) -> Arc<dyn SessionManager> {
    match policy {
        SessionPolicy::Time { timeout } => {
            info!(?timeout, "creating time-based session manager");
            Arc::new(TimeBasedSessionManager::new(auth, credentials, timeout))
        }
        SessionPolicy::Date { session_dir } => {
            info!(dir = %session_dir.display(), "creating date-based session manager");
            Arc::new(DateBasedSessionManager::new(auth, credentials, session_dir))
        }
    }
}

// ============================================================================
// Time-based policy
// ============================================================================

/// Re-authenticates once wall-clock time since login exceeds a fixed budget
pub struct TimeBasedSessionManager {
    auth: AuthClient,
    credentials: Credentials,
    timeout: Duration,
    state: RwLock<TimeState>,
}

#[derive(Default)]
struct TimeState {
    session: Option<Arc<Session>>,
    last_login: Option<Instant>,
}

impl TimeState {
    fn is_fresh(&self, timeout: Duration) -> bool {
        match (&self.session, self.last_login) {
            (Some(_), Some(at)) => at.elapsed() < timeout,
            _ => false,
        }
    }
}

impl TimeBasedSessionManager {
    pub fn new(auth: AuthClient, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            auth,
            credentials,
            timeout,
            state: RwLock::new(TimeState::default()),
        }
    }
}

#[async_trait]
impl SessionManager for TimeBasedSessionManager {
    #[instrument(skip(self))]
    async fn ensure_authenticated(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.is_fresh(self.timeout) {
            return Ok(());
        }

        info!(timeout = ?self.timeout, "authenticating");
        let session = self
            .auth
            .login(
                &self.credentials.user_id,
                &self.credentials.password,
                &self.credentials.second_password,
            )
            .await?;

        state.session = Some(Arc::new(session));
        state.last_login = Some(Instant::now());
        info!("authentication successful");
        Ok(())
    }

    async fn get_session(&self) -> Result<Arc<Session>> {
        self.ensure_authenticated().await?;
        let state = self.state.read().await;
        state
            .session
            .clone()
            .ok_or_else(|| ClientError::Session("no session held".to_string()))
    }

    async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_fresh(self.timeout)
    }

    #[instrument(skip(self))]
    async fn logout(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(session) = state.session.take() else {
            return Ok(()); // already logged out
        };
        state.last_login = None;

        // Local state is already cleared; the server notification is
        // best-effort and must not leave us stuck authenticated.
        if let Err(e) = self.auth.logout(&session).await {
            warn!(error = %e, "logout notification failed");
        }
        info!("logout completed");
        Ok(())
    }
}

// ============================================================================
// Date-based policy
// ============================================================================

/// On-disk shape of one persisted session record
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    session: SessionRecord,
    /// Business day this record was issued for; trusted only if it equals
    /// the day computed at load time
    date: NaiveDate,
    created_at: DateTime<Utc>,
    last_used_at: DateTime<Utc>,
}

/// Keys the session to the current business day and persists it so process
/// restarts within the same day resume the previous login.
///
/// The business day is today's date, with weekends rolling back to the
/// preceding Friday. No holiday calendar is consulted: an exchange holiday
/// falling on a weekday is treated as a business day. Known limitation.
pub struct DateBasedSessionManager {
    auth: AuthClient,
    credentials: Credentials,
    session_dir: PathBuf,
    state: RwLock<DateState>,
}

struct DateState {
    session: Option<Arc<Session>>,
    /// Business day last observed by this manager
    current_date: NaiveDate,
}

/// Business day for a given calendar date: weekends roll back to Friday
pub fn business_day_of(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - chrono::Days::new(1),
        Weekday::Sun => date - chrono::Days::new(2),
        _ => date,
    }
}

fn current_business_day() -> NaiveDate {
    business_day_of(Local::now().date_naive())
}

impl DateBasedSessionManager {
    pub fn new(auth: AuthClient, credentials: Credentials, session_dir: PathBuf) -> Self {
        Self {
            auth,
            credentials,
            session_dir,
            state: RwLock::new(DateState {
                session: None,
                current_date: current_business_day(),
            }),
        }
    }

    fn record_path(&self, date: NaiveDate) -> PathBuf {
        self.session_dir
            .join(format!("tachibana_session_{}.json", date))
    }

    /// Load and validate the persisted record for the given business day
    async fn load_record(&self, date: NaiveDate) -> Result<Session> {
        let path = self.record_path(date);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| ClientError::Session(format!("no session record: {}", e)))?;

        let mut persisted: PersistedSession = serde_json::from_slice(&data)
            .map_err(|e| ClientError::Session(format!("session record parse error: {}", e)))?;

        if persisted.date != date {
            return Err(ClientError::Session(format!(
                "session record day mismatch: expected {}, got {}",
                date, persisted.date
            )));
        }

        let session = Session::from_record(persisted.session.clone())?;

        persisted.last_used_at = Utc::now();
        if let Err(e) = write_record(&path, &persisted).await {
            warn!(error = %e, "failed to refresh last-used time");
        }

        Ok(session)
    }

    /// Persist the freshly created session, keyed by the business day.
    /// Failure is logged, never fatal: an unsaved-but-valid session beats a
    /// failed call.
    async fn save_record(&self, session: &Session, date: NaiveDate) {
        if let Err(e) = tokio::fs::create_dir_all(&self.session_dir).await {
            warn!(error = %e, "failed to create session directory");
            return;
        }

        let now = Utc::now();
        let persisted = PersistedSession {
            session: session.to_record(),
            date,
            created_at: now,
            last_used_at: now,
        };
        let path = self.record_path(date);
        if let Err(e) = write_record(&path, &persisted).await {
            warn!(error = %e, path = %path.display(), "failed to save session record");
        } else {
            info!(path = %path.display(), "session record saved");
        }
    }

    #[cfg(test)]
    async fn force_observed_day(&self, date: NaiveDate) {
        self.state.write().await.current_date = date;
    }
}

async fn write_record(path: &Path, persisted: &PersistedSession) -> Result<()> {
    let data = serde_json::to_vec_pretty(persisted)
        .map_err(|e| ClientError::Session(format!("record encode error: {}", e)))?;
    tokio::fs::write(path, data)
        .await
        .map_err(|e| ClientError::Session(format!("record write error: {}", e)))?;

    // Session cookies are credentials; keep the record owner-only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        if let Err(e) = tokio::fs::set_permissions(path, perms).await {
            warn!(error = %e, "failed to restrict record permissions");
        }
    }

    Ok(())
}

#[async_trait]
impl SessionManager for DateBasedSessionManager {
    #[instrument(skip(self))]
    async fn ensure_authenticated(&self) -> Result<()> {
        let mut state = self.state.write().await;

        // Handle overnight/weekend rollover while the process keeps running
        let today = current_business_day();
        if today != state.current_date {
            info!(old = %state.current_date, new = %today, "business day changed");
            state.session = None;
            state.current_date = today;
        }

        if state.session.is_some() {
            return Ok(());
        }

        // Resume the previous login within the same business day if a
        // trusted record exists
        match self.load_record(state.current_date).await {
            Ok(session) => {
                info!(date = %state.current_date, "session restored from record");
                state.session = Some(Arc::new(session));
                return Ok(());
            }
            Err(e) => {
                info!(reason = %e, "no restorable session record");
            }
        }

        info!(date = %state.current_date, "performing new login");
        let session = self
            .auth
            .login(
                &self.credentials.user_id,
                &self.credentials.password,
                &self.credentials.second_password,
            )
            .await?;

        self.save_record(&session, state.current_date).await;
        state.session = Some(Arc::new(session));
        info!(date = %state.current_date, "login successful");
        Ok(())
    }

    async fn get_session(&self) -> Result<Arc<Session>> {
        self.ensure_authenticated().await?;
        let state = self.state.read().await;
        state
            .session
            .clone()
            .ok_or_else(|| ClientError::Session("no session held".to_string()))
    }

    async fn is_authenticated(&self) -> bool {
        let state = self.state.read().await;
        state.session.is_some() && state.current_date == current_business_day()
    }

    #[instrument(skip(self))]
    async fn logout(&self) -> Result<()> {
        let mut state = self.state.write().await;
        let Some(session) = state.session.take() else {
            return Ok(());
        };

        if let Err(e) = self.auth.logout(&session).await {
            warn!(error = %e, "logout notification failed");
        }

        let path = self.record_path(state.current_date);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(error = %e, path = %path.display(), "failed to remove session record");
        }

        info!("logout completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tachibana::transport::Transport;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            user_id: "user".to_string(),
            password: "pass".to_string(),
            second_password: "second".to_string(),
        }
    }

    fn auth_client(server: &MockServer) -> AuthClient {
        AuthClient::new(
            &server.uri(),
            Transport::new(1, Duration::from_millis(10), Duration::from_secs(5)),
        )
    }

    fn login_body(server: &MockServer) -> String {
        format!(
            r#"{{"sResultCode":"0","sResultText":"","sUrlRequest":"{0}/request/","sUrlMaster":"{0}/master/","sUrlPrice":"{0}/price/","sUrlEvent":"{0}/event/"}}"#,
            server.uri()
        )
    }

    async fn mount_login(server: &MockServer, expected_logins: u64) {
        Mock::given(method("GET"))
            .and(path("/auth/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(login_body(server))
                    .insert_header("set-cookie", "JSESSIONID=abc; Path=/"),
            )
            .expect(expected_logins)
            .mount(server)
            .await;
    }

    #[test]
    fn business_day_rolls_weekends_back_to_friday() {
        let cases = [
            // (input, expected)
            ("2026-08-21", "2026-08-21"), // Friday stays
            ("2026-08-22", "2026-08-21"), // Saturday -> Friday
            ("2026-08-23", "2026-08-21"), // Sunday -> Friday
            ("2026-08-24", "2026-08-24"), // Monday stays
            ("2026-08-26", "2026-08-26"), // Wednesday stays
        ];
        for (input, expected) in cases {
            let input: NaiveDate = input.parse().unwrap();
            let expected: NaiveDate = expected.parse().unwrap();
            assert_eq!(business_day_of(input), expected, "input {}", input);
        }
    }

    #[tokio::test]
    async fn time_based_reuses_session_within_budget() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;

        let manager = TimeBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            Duration::from_secs(3600),
        );

        let first = manager.get_session().await.unwrap();
        let second = manager.get_session().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn time_based_relogs_in_after_expiry() {
        let server = MockServer::start().await;
        mount_login(&server, 2).await;

        // Zero budget: every call is past the deadline
        let manager =
            TimeBasedSessionManager::new(auth_client(&server), credentials(), Duration::ZERO);

        let first = manager.get_session().await.unwrap();
        let second = manager.get_session().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second), "stale session must be replaced");
    }

    #[tokio::test]
    async fn time_based_logout_clears_state_even_when_notify_fails() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        // No mock for the request endpoint: the logout notification fails
        let manager = TimeBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            Duration::from_secs(3600),
        );

        manager.ensure_authenticated().await.unwrap();
        manager.logout().await.unwrap();
        assert!(!manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn authentication_failure_is_always_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"sResultCode":"E9","sResultText":"rejected"}"#),
            )
            .mount(&server)
            .await;

        let manager = TimeBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            Duration::from_secs(3600),
        );

        let err = manager.get_session().await.unwrap_err();
        assert!(matches!(err, ClientError::Authentication { .. }));
        assert!(!manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn date_based_persists_and_restores_within_the_day() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        let dir = tempfile::tempdir().unwrap();

        let manager = DateBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            dir.path().to_path_buf(),
        );
        manager.ensure_authenticated().await.unwrap();

        let record = dir
            .path()
            .join(format!("tachibana_session_{}.json", current_business_day()));
        assert!(record.exists(), "record file written after login");

        // A second manager simulates a process restart: it must adopt the
        // record instead of logging in again (the login mock allows 1 call).
        let restarted = DateBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            dir.path().to_path_buf(),
        );
        restarted.ensure_authenticated().await.unwrap();
        let session = restarted.get_session().await.unwrap();
        assert_eq!(session.result_code, "0");
    }

    #[tokio::test]
    async fn date_based_rejects_record_for_a_different_day() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        let dir = tempfile::tempdir().unwrap();

        // Plant a record whose stored day is stale
        let today = current_business_day();
        let stale_day = today - chrono::Days::new(7);
        let persisted = PersistedSession {
            session: SessionRecord {
                result_code: "0".to_string(),
                result_text: String::new(),
                second_password: "second".to_string(),
                request_url: format!("{}/request/", server.uri()),
                master_url: format!("{}/master/", server.uri()),
                price_url: format!("{}/price/", server.uri()),
                event_url: format!("{}/event/", server.uri()),
                cookies: vec![],
                p_no: 42,
            },
            date: stale_day,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
        };
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            dir.path().join(format!("tachibana_session_{}.json", today)),
            serde_json::to_vec(&persisted).unwrap(),
        )
        .unwrap();

        let manager = DateBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            dir.path().to_path_buf(),
        );
        manager.ensure_authenticated().await.unwrap();

        // The stale record was never adopted: the fresh login's counter
        // starts at 1, not at the planted 42.
        let session = manager.get_session().await.unwrap();
        assert_eq!(session.next_p_no(), 1);
    }

    #[tokio::test]
    async fn date_rollover_performs_exactly_one_fresh_login() {
        let server = MockServer::start().await;
        mount_login(&server, 2).await;
        let dir = tempfile::tempdir().unwrap();

        let manager = DateBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            dir.path().to_path_buf(),
        );
        let first = manager.get_session().await.unwrap();

        // Simulate the manager having last observed the previous business
        // day; the next call must detect the change and re-login once.
        let yesterday = current_business_day() - chrono::Days::new(3);
        manager.force_observed_day(yesterday).await;
        // The rollover also drops the old day's record so the new day's
        // lookup misses; delete to mimic the fresh-day state.
        let _ = std::fs::remove_file(dir.path().join(format!(
            "tachibana_session_{}.json",
            current_business_day()
        )));

        let second = manager.get_session().await.unwrap();
        assert!(
            !Arc::ptr_eq(&first, &second),
            "previously held session must not be reused across business days"
        );

        let third = manager.get_session().await.unwrap();
        assert!(Arc::ptr_eq(&second, &third), "no extra login after rollover");
    }

    #[tokio::test]
    async fn date_based_logout_removes_the_record() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/request/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"sResultCode":"0"}"#))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();

        let manager = DateBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            dir.path().to_path_buf(),
        );
        manager.ensure_authenticated().await.unwrap();
        let record = dir
            .path()
            .join(format!("tachibana_session_{}.json", current_business_day()));
        assert!(record.exists());

        manager.logout().await.unwrap();
        assert!(!record.exists(), "record deleted on logout");
        assert!(!manager.is_authenticated().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn record_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        let dir = tempfile::tempdir().unwrap();

        let manager = DateBasedSessionManager::new(
            auth_client(&server),
            credentials(),
            dir.path().to_path_buf(),
        );
        manager.ensure_authenticated().await.unwrap();

        let record = dir
            .path()
            .join(format!("tachibana_session_{}.json", current_business_day()));
        let mode = std::fs::metadata(&record).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
