//! Session-aware client for the club management portal.
//!
//! The portal is cookie-authenticated and reports an expired session in
//! shape-specific ways (an explicit `sesion: false` flag in JSON
//! envelopes, a fixed sentinel string on plain-text pages). Every
//! operation classifies its response before parsing and, on expiry, runs
//! the bounded re-login/retry loop in [`run_with_relogin`].

use crate::config::SourceConfig;
use crate::error::app_error::AppError;
use crate::models::access::AccessRecord;
use crate::models::user::{AbmUser, User};
use crate::source::{SourcePortal, extract, mapper};
use crate::util;
use reqwest::header;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore, SemaphorePermit};
use tokio::time::timeout;
use tracing::{info, warn};

const ADMIN_ONLY_SENTINEL: &str = "OPCION DISPONIBLE SOLO PARA ADMINISTRADORES";
const CONTACT_NOT_FOUND_SENTINEL: &str = "Contacto no encontrado";
const NO_RECORDS_FOLDER_SENTINEL: &str = "No se encontró la carpeta de registros";

/// Login retries after the initial attempt; 4 operation attempts total.
const MAX_LOGIN_RETRIES: u32 = 3;

/// Pre-classification of a raw portal response, decided before any full
/// parsing is attempted.
#[derive(Debug)]
pub(crate) enum Fetched<T> {
    Ready(T),
    SessionExpired,
}

fn is_retryable(e: &AppError) -> bool {
    matches!(e, AppError::Authentication { .. } | AppError::Transport { .. })
}

/// Bounded re-login/retry loop shared by every portal operation.
///
/// The initial attempt runs the operation as-is; only an explicit expiry
/// signal enters the loop. Each round re-runs `login` unconditionally and
/// then the original operation. Login rejections and transport failures
/// inside the loop consume an attempt; anything else propagates
/// unchanged. Exhaustion fails with the last observed cause.
pub(crate) async fn run_with_relogin<T, L, LFut, O, OFut>(mut login: L, mut op: O) -> Result<T, AppError>
where
    L: FnMut() -> LFut,
    LFut: Future<Output = Result<(), AppError>>,
    O: FnMut() -> OFut,
    OFut: Future<Output = Result<Fetched<T>, AppError>>,
{
    match op().await? {
        Fetched::Ready(value) => return Ok(value),
        Fetched::SessionExpired => {}
    }

    let mut last_cause: Option<AppError> = None;
    for attempt in 1..=MAX_LOGIN_RETRIES {
        info!(attempt, max_retries = MAX_LOGIN_RETRIES, "re-authenticating against the source portal");

        match login().await {
            Ok(()) => match op().await {
                Ok(Fetched::Ready(value)) => return Ok(value),
                Ok(Fetched::SessionExpired) => {
                    warn!(attempt, "session still reported expired after a fresh login");
                    last_cause = None;
                }
                Err(e) if is_retryable(&e) => {
                    warn!(attempt, error = %e, "retried operation failed");
                    last_cause = Some(e);
                }
                Err(e) => return Err(e),
            },
            Err(e) if is_retryable(&e) => {
                warn!(attempt, error = %e, "login attempt failed");
                last_cause = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    let detail = last_cause
        .map(|e| e.to_string())
        .unwrap_or_else(|| "session still reported expired".to_string());
    Err(AppError::authentication(format!(
        "giving up after {} attempts: {}",
        MAX_LOGIN_RETRIES + 1,
        detail
    )))
}

fn session_expired(body: &Value) -> bool {
    body.get("sesion").and_then(Value::as_bool) == Some(false)
}

fn html_field(body: &Value) -> Result<&str, AppError> {
    body.get("html")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::parse("portal envelope is missing the html field"))
}

/// The listing is filtered upstream, but the first row is not guaranteed
/// to be the requested member; its RUN must match case-insensitively.
fn directory_row_to_user(row: extract::DirectoryRow, run_upper: &str) -> Result<Option<AbmUser>, AppError> {
    if row.run.to_uppercase() != run_upper {
        return Ok(None);
    }

    let external_id = row.external_id.parse::<i64>().map_err(|_| {
        AppError::parse(format!(
            "directory row carries a non-numeric contact id '{}'",
            row.external_id
        ))
    })?;

    Ok(Some(AbmUser {
        external_id,
        run: run_upper.to_string(),
        first_name: row.first_name,
        last_name: row.last_name,
    }))
}

/// One instance per process; shared by all request handlers.
pub struct SourceClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    pool_timeout: Duration,
    // Cookie pairs of the last successful login, prebuilt as one header
    // value. Replaced wholesale on re-login, never partially mutated.
    // Concurrent re-logins may race; the last writer wins and any fresh
    // session is valid.
    session: RwLock<Option<String>>,
    // reqwest only bounds idle connections, so in-flight requests to the
    // portal are capped here.
    permits: Semaphore,
}

impl SourceClient {
    pub fn new(config: &SourceConfig) -> Result<Self, AppError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.read_timeout))
            .pool_max_idle_per_host(config.max_idle_connections)
            // The portal rejects some default client identities.
            .user_agent("");

        if let Some(proxy) = &config.proxy {
            info!(proxy = %proxy, "using outbound proxy for portal requests");
            builder = builder
                .proxy(reqwest::Proxy::all(proxy.as_str()).map_err(|e| AppError::transport("invalid proxy address", e))?);
        }

        let http = builder
            .build()
            .map_err(|e| AppError::transport("failed to build the portal HTTP client", e))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            pool_timeout: Duration::from_secs(config.pool_timeout),
            session: RwLock::new(None),
            permits: Semaphore::new(config.max_connections),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn acquire_slot(&self) -> Result<SemaphorePermit<'_>, AppError> {
        timeout(self.pool_timeout, self.permits.acquire())
            .await
            .map_err(|_| AppError::transport_msg("timed out waiting for an upstream connection slot"))?
            .map_err(|_| AppError::transport_msg("upstream connection pool is closed"))
    }

    async fn cookie_header(&self) -> Option<String> {
        self.session.read().await.clone()
    }

    /// POST to the generic query endpoint and decode the JSON envelope.
    async fn post_query(&self, form: &[(&str, String)]) -> Result<Value, AppError> {
        let _slot = self.acquire_slot().await?;

        let mut req = self.http.post(self.url("main_servidor.php")).form(form);
        if let Some(cookie) = self.cookie_header().await {
            req = req.header(header::COOKIE, cookie);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::transport("query request to the portal failed", e))?
            .error_for_status()
            .map_err(|e| AppError::transport("portal query returned an error status", e))?;

        resp.json()
            .await
            .map_err(|e| AppError::transport("portal query response was not JSON", e))
    }

    async fn get_directory_page(&self, run: &str) -> Result<String, AppError> {
        let _slot = self.acquire_slot().await?;

        let mut req = self
            .http
            .get(self.url("abm/abm_socios.php"))
            .query(&[("CONTACTOCAMPO7", run)]);
        if let Some(cookie) = self.cookie_header().await {
            req = req.header(header::COOKIE, cookie);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AppError::transport("directory request to the portal failed", e))?
            .error_for_status()
            .map_err(|e| AppError::transport("portal directory returned an error status", e))?;

        resp.text()
            .await
            .map_err(|e| AppError::transport("failed to read the directory page", e))
    }

    /// Authenticate with the configured credentials and replace the held
    /// session. The acknowledgment must explicitly confirm the session;
    /// an absent flag counts as a rejection.
    pub async fn login(&self) -> Result<(), AppError> {
        let form = [("LOGIN", self.username.clone()), ("CLAVE", self.password.clone())];

        let _slot = self.acquire_slot().await?;
        let resp = self
            .http
            .post(self.url("login_servidor.php"))
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::transport("login request to the portal failed", e))?
            .error_for_status()
            .map_err(|e| AppError::transport("portal login returned an error status", e))?;

        let cookies: Vec<String> = resp
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| !pair.is_empty())
            .collect();

        let ack: Value = resp
            .json()
            .await
            .map_err(|e| AppError::transport("portal login acknowledgment was not JSON", e))?;

        let active = ack.pointer("/estado/sesion").and_then(Value::as_bool).unwrap_or(false);
        if !active {
            return Err(AppError::authentication("login rejected by the portal"));
        }

        *self.session.write().await = if cookies.is_empty() { None } else { Some(cookies.join("; ")) };
        info!("logged in to the source portal");
        Ok(())
    }

    async fn fetch_today_access(&self) -> Result<Fetched<Vec<AccessRecord>>, AppError> {
        let today = util::santiago_today();
        let form = [
            ("QUERY", "ACCESOS".to_string()),
            ("DATOSFORM", format!("FECHAINI={today}&FECHAFIN={today}")),
        ];

        let body = self.post_query(&form).await?;
        if session_expired(&body) {
            return Ok(Fetched::SessionExpired);
        }

        let html = html_field(&body)?;
        match extract::embedded_access_rows(html)? {
            Some(rows) => Ok(Fetched::Ready(mapper::map_access_records(&rows)?)),
            None => {
                warn!("access log page carried no embedded reservation array");
                Ok(Fetched::Ready(Vec::new()))
            }
        }
    }

    async fn fetch_abm_user(&self, run: &str) -> Result<Fetched<Option<AbmUser>>, AppError> {
        let run = run.to_uppercase();

        let body = self.get_directory_page(&run).await?;
        if body == ADMIN_ONLY_SENTINEL {
            return Ok(Fetched::SessionExpired);
        }

        let Some(row) = extract::first_directory_row(&body) else {
            return Ok(Fetched::Ready(None));
        };

        Ok(Fetched::Ready(directory_row_to_user(row, &run)?))
    }

    async fn fetch_user_profile(&self, external_id: i64) -> Result<Fetched<Option<User>>, AppError> {
        let form = [
            ("QUERY", "VERPERFIL".to_string()),
            ("IDCONTACTO", external_id.to_string()),
        ];

        let body = self.post_query(&form).await?;
        if session_expired(&body) {
            return Ok(Fetched::SessionExpired);
        }

        let html = html_field(&body)?;
        if html.contains(CONTACT_NOT_FOUND_SENTINEL) {
            return Ok(Fetched::Ready(None));
        }

        let user = mapper::map_user_profile(extract::profile_fragment(html))?;
        Ok(Fetched::Ready(Some(user)))
    }

    async fn fetch_inbody_links(&self, external_id: i64) -> Result<Fetched<Vec<String>>, AppError> {
        let form = [
            ("QUERY", "ADJUNTARARCHIVOINBODY".to_string()),
            ("IDCONTACTO", external_id.to_string()),
        ];

        let body = self.post_query(&form).await?;
        if session_expired(&body) {
            return Ok(Fetched::SessionExpired);
        }

        let html = html_field(&body)?;
        if html.contains(NO_RECORDS_FOLDER_SENTINEL) {
            return Ok(Fetched::Ready(Vec::new()));
        }

        Ok(Fetched::Ready(extract::attachment_links(html, &self.base_url)))
    }
}

#[async_trait::async_trait]
impl SourcePortal for SourceClient {
    async fn login(&self) -> Result<(), AppError> {
        SourceClient::login(self).await
    }

    async fn today_access(&self) -> Result<Vec<AccessRecord>, AppError> {
        run_with_relogin(|| self.login(), || self.fetch_today_access()).await
    }

    async fn abm_user_by_run(&self, run: &str) -> Result<Option<AbmUser>, AppError> {
        run_with_relogin(|| self.login(), || self.fetch_abm_user(run)).await
    }

    async fn user_by_external_id(&self, external_id: i64) -> Result<Option<User>, AppError> {
        run_with_relogin(|| self.login(), || self.fetch_user_profile(external_id)).await
    }

    async fn inbody_links_by_external_id(&self, external_id: i64) -> Result<Vec<String>, AppError> {
        run_with_relogin(|| self.login(), || self.fetch_inbody_links(external_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn expiry_flag_only_matches_explicit_false() {
        assert!(session_expired(&json!({"sesion": false, "html": ""})));
        assert!(!session_expired(&json!({"sesion": true, "html": ""})));
        assert!(!session_expired(&json!({"html": ""})));
        assert!(!session_expired(&json!({"sesion": "false"})));
    }

    #[test]
    fn directory_row_with_mismatched_run_is_discarded() {
        let row = extract::DirectoryRow {
            external_id: "4821".to_string(),
            run: "99999999-9".to_string(),
            last_name: "Rojas".to_string(),
            first_name: "Ana".to_string(),
        };
        assert_eq!(directory_row_to_user(row, "12345678-9").unwrap(), None);
    }

    #[test]
    fn directory_row_matches_case_insensitively() {
        let row = extract::DirectoryRow {
            external_id: "4821".to_string(),
            run: "12345678-k".to_string(),
            last_name: "Rojas".to_string(),
            first_name: "Ana".to_string(),
        };
        let user = directory_row_to_user(row, "12345678-K").unwrap().unwrap();
        assert_eq!(user.external_id, 4821);
        assert_eq!(user.run, "12345678-K");
        assert_eq!(user.first_name, "Ana");
        assert_eq!(user.last_name, "Rojas");
    }

    #[test]
    fn directory_row_with_non_numeric_id_is_a_parse_error() {
        let row = extract::DirectoryRow {
            external_id: "n/a".to_string(),
            run: "12345678-9".to_string(),
            last_name: "Rojas".to_string(),
            first_name: "Ana".to_string(),
        };
        assert!(matches!(
            directory_row_to_user(row, "12345678-9"),
            Err(AppError::Parse { .. })
        ));
    }

    #[test]
    fn envelope_without_html_is_a_parse_error() {
        assert!(matches!(html_field(&json!({"sesion": true})), Err(AppError::Parse { .. })));
        assert_eq!(html_field(&json!({"html": "<p></p>"})).unwrap(), "<p></p>");
    }

    #[tokio::test]
    async fn first_attempt_success_skips_login() {
        let logins = Cell::new(0u32);
        let ops = Cell::new(0u32);

        let result = run_with_relogin(
            || {
                logins.set(logins.get() + 1);
                async { Ok::<(), AppError>(()) }
            },
            || {
                ops.set(ops.get() + 1);
                async { Ok::<_, AppError>(Fetched::Ready(7)) }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(logins.get(), 0);
        assert_eq!(ops.get(), 1);
    }

    #[tokio::test]
    async fn single_expiry_triggers_one_login_and_one_retry() {
        let logins = Cell::new(0u32);
        let ops = Cell::new(0u32);

        let result = run_with_relogin(
            || {
                logins.set(logins.get() + 1);
                async { Ok::<(), AppError>(()) }
            },
            || {
                ops.set(ops.get() + 1);
                let expired = ops.get() == 1;
                async move {
                    if expired {
                        Ok::<_, AppError>(Fetched::SessionExpired)
                    } else {
                        Ok(Fetched::Ready("data"))
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "data");
        assert_eq!(logins.get(), 1);
        assert_eq!(ops.get(), 2);
    }

    #[tokio::test]
    async fn persistent_expiry_exhausts_exactly_four_attempts() {
        let logins = Cell::new(0u32);
        let ops = Cell::new(0u32);

        let result: Result<(), AppError> = run_with_relogin(
            || {
                logins.set(logins.get() + 1);
                async { Ok::<(), AppError>(()) }
            },
            || {
                ops.set(ops.get() + 1);
                async { Ok::<_, AppError>(Fetched::SessionExpired) }
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::Authentication { .. })));
        assert_eq!(ops.get(), 4);
        assert_eq!(logins.get(), 3);
    }

    #[tokio::test]
    async fn rejected_login_consumes_the_retry_budget() {
        let logins = Cell::new(0u32);
        let ops = Cell::new(0u32);

        let result: Result<(), AppError> = run_with_relogin(
            || {
                logins.set(logins.get() + 1);
                async { Err::<(), _>(AppError::authentication("rejected")) }
            },
            || {
                ops.set(ops.get() + 1);
                async { Ok::<_, AppError>(Fetched::SessionExpired) }
            },
        )
        .await;

        match result {
            Err(AppError::Authentication { message }) => assert!(message.contains("rejected")),
            other => panic!("expected authentication failure, got {:?}", other),
        }
        assert_eq!(ops.get(), 1);
        assert_eq!(logins.get(), 3);
    }

    #[tokio::test]
    async fn transport_failure_inside_the_loop_is_retried() {
        let logins = Cell::new(0u32);
        let ops = Cell::new(0u32);

        let result = run_with_relogin(
            || {
                logins.set(logins.get() + 1);
                async { Ok::<(), AppError>(()) }
            },
            || {
                ops.set(ops.get() + 1);
                let call = ops.get();
                async move {
                    match call {
                        1 => Ok::<_, AppError>(Fetched::SessionExpired),
                        2 => Err(AppError::transport_msg("connection reset")),
                        _ => Ok(Fetched::Ready(99)),
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(ops.get(), 3);
        assert_eq!(logins.get(), 2);
    }

    #[tokio::test]
    async fn parse_failure_inside_the_loop_propagates() {
        let logins = Cell::new(0u32);
        let ops = Cell::new(0u32);

        let result: Result<(), AppError> = run_with_relogin(
            || {
                logins.set(logins.get() + 1);
                async { Ok::<(), AppError>(()) }
            },
            || {
                ops.set(ops.get() + 1);
                let call = ops.get();
                async move {
                    match call {
                        1 => Ok::<_, AppError>(Fetched::SessionExpired),
                        _ => Err(AppError::parse("marker found but garbage inside")),
                    }
                }
            },
        )
        .await;

        assert!(matches!(result, Err(AppError::Parse { .. })));
        assert_eq!(ops.get(), 2);
        assert_eq!(logins.get(), 1);
    }

    #[tokio::test]
    async fn initial_transport_failure_is_not_retried() {
        let logins = Cell::new(0u32);

        let result: Result<(), AppError> = run_with_relogin(
            || {
                logins.set(logins.get() + 1);
                async { Ok::<(), AppError>(()) }
            },
            || async { Err::<Fetched<()>, _>(AppError::transport_msg("timed out")) },
        )
        .await;

        assert!(matches!(result, Err(AppError::Transport { .. })));
        assert_eq!(logins.get(), 0);
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let config = SourceConfig {
            base_url: "https://portal.example.com/".to_string(),
            ..SourceConfig::default()
        };
        let client = SourceClient::new(&config).unwrap();
        assert_eq!(client.url("main_servidor.php"), "https://portal.example.com/main_servidor.php");
    }
}
