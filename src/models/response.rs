use rocket::serde::Serialize;
use rocket::serde::json::serde_json;

/// Standard response envelope for the API.
#[derive(Serialize, Debug)]
pub struct ApiResponse {
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub authenticated: bool,
}
