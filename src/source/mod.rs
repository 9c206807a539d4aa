pub mod client;
pub(crate) mod extract;
pub(crate) mod mapper;

pub use client::SourceClient;

use crate::error::app_error::AppError;
use crate::models::access::AccessRecord;
use crate::models::user::{AbmUser, User};
use rocket::fairing::AdHoc;
use std::sync::Arc;

/// The seam between the HTTP layer and the portal client. Route handlers
/// only see this trait; tests substitute a mock.
#[async_trait::async_trait]
pub trait SourcePortal: Send + Sync {
    /// Authenticate and replace the held session credential.
    async fn login(&self) -> Result<(), AppError>;

    /// Today's access log, empty when the portal returns a data-less page.
    async fn today_access(&self) -> Result<Vec<AccessRecord>, AppError>;

    /// Directory lookup by RUN (case-insensitive).
    async fn abm_user_by_run(&self, run: &str) -> Result<Option<AbmUser>, AppError>;

    /// Profile lookup by the portal's contact id.
    async fn user_by_external_id(&self, external_id: i64) -> Result<Option<User>, AppError>;

    /// Attachment links for a contact, most recently uploaded first.
    async fn inbody_links_by_external_id(&self, external_id: i64) -> Result<Vec<String>, AppError>;
}

/// Manage the portal in Rocket state and warm the session up during
/// ignition; a failed warm-up login aborts the launch.
pub fn stage_portal(portal: Arc<dyn SourcePortal>) -> AdHoc {
    AdHoc::try_on_ignite("Source portal", |rocket| async move {
        match portal.login().await {
            Ok(()) => {
                tracing::info!("source portal session established");
                Ok(rocket.manage(portal))
            }
            Err(e) => {
                tracing::error!(error = %e, "initial source portal login failed");
                Err(rocket)
            }
        }
    })
}
