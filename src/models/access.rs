use rocket::serde::Serialize;

/// One turnstile pass scraped from the portal's daily access log.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRecord {
    pub external_id: i64,
    pub run: String,
    pub full_name: String,
    pub entry_at: String,
    pub exit_at: Option<String>,
    pub activity: String,
    /// Branch code from the fixed location table; "0" when unrecognized.
    pub location: String,
}
