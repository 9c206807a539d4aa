use crate::config::AuthConfig;
use crate::error::app_error::AppError;
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};

pub const AUTH_HEADER: &str = "X-Auth-String";

/// Request guard for the API's shared-secret header. Every route except
/// the health check requires it.
#[derive(Debug, Clone)]
pub struct AuthString(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthString {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let auth = match req.rocket().state::<AuthConfig>() {
            Some(auth) => auth,
            None => return Outcome::Error((Status::InternalServerError, AppError::Unauthorized)),
        };

        match req.headers().get_one(AUTH_HEADER) {
            Some(value) if value == auth.auth_string => Outcome::Success(AuthString(value.to_string())),
            Some(_) | None => Outcome::Error((Status::Unauthorized, AppError::Unauthorized)),
        }
    }
}
