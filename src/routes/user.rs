use crate::auth::AuthString;
use crate::error::app_error::AppError;
use crate::models::user::{AbmUser, User};
use crate::source::SourcePortal;
use rocket::serde::json::{Json, Value, serde_json::json};
use rocket::{State, routes};
use std::sync::Arc;

#[rocket::get("/abm/<run>")]
pub async fn get_abm_user(
    portal: &State<Arc<dyn SourcePortal>>,
    _auth: AuthString,
    run: &str,
) -> Result<Json<Option<AbmUser>>, AppError> {
    Ok(Json(portal.abm_user_by_run(run).await?))
}

#[rocket::get("/<external_id>")]
pub async fn get_user(
    portal: &State<Arc<dyn SourcePortal>>,
    _auth: AuthString,
    external_id: i64,
) -> Result<Json<Option<User>>, AppError> {
    Ok(Json(portal.user_by_external_id(external_id).await?))
}

#[rocket::get("/<run>/inbody", rank = 2)]
pub async fn get_user_inbody(
    portal: &State<Arc<dyn SourcePortal>>,
    _auth: AuthString,
    run: &str,
) -> Result<Json<Value>, AppError> {
    let Some(abm_user) = portal.abm_user_by_run(run).await? else {
        return Err(AppError::NotFound("USER_NOT_FOUND".to_string()));
    };

    let links = portal.inbody_links_by_external_id(abm_user.external_id).await?;
    Ok(Json(json!({ "data": links })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![get_abm_user, get_user, get_user_inbody]
}
