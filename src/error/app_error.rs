use rocket::http::Status;
use rocket::response::Responder;
use rocket::{Request, Response};
use std::io::Cursor;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Portal authentication failed: {message}")]
    Authentication { message: String },
    #[error("Portal response could not be parsed: {message}")]
    Parse { message: String },
    #[error("Invalid local timestamp: {message}")]
    Format { message: String },
    #[error("Portal request failed: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn transport_msg(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::transport("request to the source portal failed", e)
    }
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::Unauthorized => Status::Unauthorized,
            AppError::Authentication { .. } => Status::BadGateway,
            AppError::Parse { .. } => Status::BadGateway,
            AppError::Format { .. } => Status::BadGateway,
            AppError::Transport { .. } => Status::BadGateway,
            AppError::NotFound(_) => Status::NotFound,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let uri = req.uri();

        let request_id = req
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        error!(
            error = ?self,
            request_id = %request_id,
            method = %method,
            uri = %uri,
            "request failed"
        );

        let status = Status::from(&self);
        let body = self.to_string();

        Response::build().status(status).sized_body(body.len(), Cursor::new(body)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_upstream_failures() {
        assert_eq!(Status::from(&AppError::Unauthorized), Status::Unauthorized);
        assert_eq!(Status::from(&AppError::authentication("rejected")), Status::BadGateway);
        assert_eq!(Status::from(&AppError::parse("bad payload")), Status::BadGateway);
        assert_eq!(Status::from(&AppError::transport_msg("timed out")), Status::BadGateway);
        assert_eq!(Status::from(&AppError::NotFound("user".into())), Status::NotFound);
    }
}
