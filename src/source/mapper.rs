//! Pure transformations from raw portal payloads into the API's records.

use crate::error::app_error::AppError;
use crate::models::access::AccessRecord;
use crate::models::user::{User, UserAccess};
use crate::source::extract::ProfileFragment;
use crate::util::santiago_to_utc;
use serde_json::Value;

/// Fixed branch-name table as the portal renders the names. Unlisted or
/// renamed branches fall back to the "0" sentinel rather than failing.
pub fn location_code(name: &str) -> &'static str {
    match name {
        "Antofagasta Espacio Urbano" => "102",
        "Calama" => "104",
        "Antofagasta Pacífico" => "105",
        "Antofagasta Arauco" => "106",
        "Iquique" => "107",
        "Antofagasta Angamos" => "108",
        _ => "0",
    }
}

fn str_field(record: &Value, key: &str) -> String {
    record.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

fn non_empty_field(record: &Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// The portal is inconsistent about whether the contact id comes back as a
// number or a numeric string.
fn int_field(record: &Value, key: &str) -> i64 {
    match record.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Map the raw rows of the embedded reservation array into access records.
/// A row without a date is assumed to belong to the current civil day.
pub fn map_access_records(rows: &[Value]) -> Result<Vec<AccessRecord>, AppError> {
    let mut mapped = Vec::with_capacity(rows.len());

    for row in rows {
        let date = non_empty_field(row, "FECHA");
        let entry = str_field(row, "TURNOINI");
        let exit = non_empty_field(row, "TURNOFIN");

        mapped.push(AccessRecord {
            external_id: int_field(row, "IDCONTACTO"),
            run: str_field(row, "RUT"),
            full_name: str_field(row, "SOCIO"),
            entry_at: santiago_to_utc(date.as_deref(), &entry)?,
            exit_at: match exit {
                Some(t) => Some(santiago_to_utc(date.as_deref(), &t)?),
                None => None,
            },
            activity: str_field(row, "ACTIVIDAD"),
            location: location_code(&str_field(row, "SEDE")).to_string(),
        });
    }

    Ok(mapped)
}

/// Assemble a profile lookup result, converting each history row's
/// combined `HH:MM [HH:MM]` record cell into UTC entry/exit instants.
pub fn map_user_profile(fragment: ProfileFragment) -> Result<User, AppError> {
    let mut history = Vec::with_capacity(fragment.history.len());

    for row in fragment.history {
        let location = location_code(&row.location).parse::<i64>().unwrap_or(0);

        let mut tokens = row.record.split_whitespace();
        let entry = tokens.next().map(|t| format!("{}:00", t)).unwrap_or_default();
        let exit = tokens.next().map(|t| format!("{}:00", t));

        history.push(UserAccess {
            location,
            entry_at: santiago_to_utc(Some(&row.date), &entry)?,
            exit_at: match exit {
                Some(t) => Some(santiago_to_utc(Some(&row.date), &t)?),
                None => None,
            },
        });
    }

    Ok(User {
        image_url: fragment.image_url,
        run: fragment.run,
        first_name: fragment.first_name,
        last_name: fragment.last_name,
        access_history: history,
    })
}
