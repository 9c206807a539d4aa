use crate::auth::AuthString;
use crate::error::app_error::AppError;
use crate::models::response::ApiResponse;
use crate::source::SourcePortal;
use rocket::serde::json::{Json, serde_json::json};
use rocket::{State, routes};
use std::sync::Arc;

#[rocket::get("/")]
pub async fn get_today_access(
    portal: &State<Arc<dyn SourcePortal>>,
    _auth: AuthString,
) -> Result<Json<ApiResponse>, AppError> {
    let records = portal.today_access().await?;

    Ok(Json(ApiResponse {
        message: "Today's access data retrieved successfully".to_string(),
        data: Some(json!({
            "count": records.len(),
            "records": records,
        })),
        authenticated: true,
    }))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![get_today_access]
}
