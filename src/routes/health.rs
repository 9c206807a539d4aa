use crate::models::response::ApiResponse;
use rocket::routes;
use rocket::serde::json::{Json, serde_json::json};

#[rocket::get("/")]
pub async fn healthcheck() -> Json<ApiResponse> {
    Json(ApiResponse {
        message: "club-source is running".to_string(),
        data: Some(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
        })),
        authenticated: false,
    })
}

pub fn routes() -> Vec<rocket::Route> {
    routes![healthcheck]
}
