use rocket::serde::Serialize;

/// Directory (member administration) lookup result. The RUN is always
/// upper-cased; it is the identity key upstream.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AbmUser {
    pub external_id: i64,
    pub run: String,
    pub first_name: String,
    pub last_name: String,
}

/// One row of a member's access history, in document order.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserAccess {
    pub location: i64,
    pub entry_at: String,
    pub exit_at: Option<String>,
}

/// Profile-page lookup result.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub image_url: Option<String>,
    pub run: String,
    pub first_name: String,
    pub last_name: String,
    pub access_history: Vec<UserAccess>,
}
