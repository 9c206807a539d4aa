use crate::config::Config;
use crate::error::app_error::AppError;
use crate::models::access::AccessRecord;
use crate::models::user::{AbmUser, User};
use crate::source::SourcePortal;

/// Canned portal for route tests: `login` always succeeds and every
/// operation answers from the preloaded fields.
#[derive(Default)]
pub struct MockPortal {
    pub access: Vec<AccessRecord>,
    pub abm_user: Option<AbmUser>,
    pub user: Option<User>,
    pub links: Vec<String>,
}

#[async_trait::async_trait]
impl SourcePortal for MockPortal {
    async fn login(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn today_access(&self) -> Result<Vec<AccessRecord>, AppError> {
        Ok(self.access.clone())
    }

    async fn abm_user_by_run(&self, run: &str) -> Result<Option<AbmUser>, AppError> {
        Ok(self
            .abm_user
            .clone()
            .filter(|user| user.run.eq_ignore_ascii_case(run)))
    }

    async fn user_by_external_id(&self, _external_id: i64) -> Result<Option<User>, AppError> {
        Ok(self.user.clone())
    }

    async fn inbody_links_by_external_id(&self, _external_id: i64) -> Result<Vec<String>, AppError> {
        Ok(self.links.clone())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.auth_string = "test-secret".to_string();
    config
}
