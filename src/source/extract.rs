//! Narrow parsing functions over the portal's markup.
//!
//! The portal serves three fragile shapes: a JSON array embedded in a
//! script block, plain HTML listing tables, and JSON-wrapped HTML
//! fragments. Each shape is handled by one function here so that an
//! upstream markup change stays local to a single place.

use crate::error::app_error::AppError;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::sync::LazyLock;

/// Only images hosted on the portal's storage bucket are trusted.
pub(crate) const TRUSTED_IMAGE_PREFIX: &str = "https://storage.googleapis.com/";

static ACCESS_ROWS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)tablaReser\s*=\s*(\[.*?\]);").expect("valid regex"));

static FIRST_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""CONTACTOCAMPO2":"([^"]*)""#).expect("valid regex"));
static LAST_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""CONTACTOCAMPO1":"([^"]*)""#).expect("valid regex"));
static RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""CONTACTOCAMPO7":"([^"]*)""#).expect("valid regex"));

static DIRECTORY_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table#listado tbody tr").expect("valid selector"));
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("valid selector"));
static IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").expect("valid selector"));
static ADMIN_COMMENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.adminComment").expect("valid selector"));
static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static HEADER_CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").expect("valid selector"));
static BODY_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody tr").expect("valid selector"));
static UPLOADS_PANEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.archivosSubidos").expect("valid selector"));
static PANEL_BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.panel-body").expect("valid selector"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("valid selector"));

/// First row of the member-administration listing, columns as rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryRow {
    pub external_id: String,
    pub run: String,
    pub last_name: String,
    pub first_name: String,
}

/// Raw access-history table row; times still combined in `record`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub date: String,
    pub location: String,
    pub record: String,
}

/// Everything extractable from a profile-page fragment, before mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileFragment {
    pub image_url: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub run: String,
    pub history: Vec<HistoryRow>,
}

fn node_text(el: ElementRef) -> String {
    el.text().map(str::trim).collect()
}

fn capture(re: &Regex, text: &str) -> String {
    re.captures(text).map(|c| c[1].to_string()).unwrap_or_default()
}

fn string_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

/// Locate the `tablaReser = [...]` array the access-log page embeds in a
/// script block. `None` when the marker is absent from the page; `Parse`
/// when the marker is present but the captured segment is not a JSON array.
pub fn embedded_access_rows(html: &str) -> Result<Option<Vec<Value>>, AppError> {
    let Some(caps) = ACCESS_ROWS_RE.captures(html) else {
        return Ok(None);
    };

    let rows: Vec<Value> = serde_json::from_str(&caps[1])
        .map_err(|e| AppError::parse(format!("embedded reservation array is not valid JSON: {}", e)))?;
    Ok(Some(rows))
}

/// First result row of the directory listing table, or `None` when the
/// table, body, or row is missing or the row is too short to carry the
/// expected columns.
pub fn first_directory_row(html: &str) -> Option<DirectoryRow> {
    let doc = Html::parse_document(html);
    let row = doc.select(&DIRECTORY_ROW).next()?;

    let mut cells = row.select(&CELL).map(node_text);
    let external_id = cells.next()?;
    let run = cells.next()?;
    let last_name = cells.next()?;
    let first_name = cells.next()?;

    Some(DirectoryRow {
        external_id,
        run,
        last_name,
        first_name,
    })
}

/// Pull the structured pieces out of a profile-page fragment.
///
/// The profile page keeps the member's names and RUN inside a JSON blob
/// in an administrative comment node, and that blob is occasionally
/// mangled by the markup. When the structured parse fails each field is
/// salvaged independently, missing ones left empty.
pub fn profile_fragment(html: &str) -> ProfileFragment {
    let doc = Html::parse_document(html);

    // The member photo URL lives in the img's `name` attribute, not `src`.
    let image_url = doc
        .select(&IMAGE)
        .next()
        .and_then(|img| img.value().attr("name"))
        .filter(|src| src.starts_with(TRUSTED_IMAGE_PREFIX))
        .map(str::to_string);

    let mut first_name = String::new();
    let mut last_name = String::new();
    let mut run = String::new();

    if let Some(comment) = doc.select(&ADMIN_COMMENT).next() {
        let text: String = comment.text().collect();
        if let Some((_, json_part)) = text.split_once("CONTACTO: ") {
            match serde_json::from_str::<Value>(json_part) {
                Ok(contact) => {
                    first_name = string_field(&contact, "CONTACTOCAMPO2");
                    last_name = string_field(&contact, "CONTACTOCAMPO1");
                    run = string_field(&contact, "CONTACTOCAMPO7");
                }
                Err(_) => {
                    first_name = capture(&FIRST_NAME_RE, json_part);
                    last_name = capture(&LAST_NAME_RE, json_part);
                    run = capture(&RUN_RE, json_part);
                }
            }
        }
    }

    ProfileFragment {
        image_url,
        first_name,
        last_name,
        run,
        history: access_history_rows(&doc),
    }
}

/// The profile page carries several tables; the access history is the
/// first one whose headers name the expected columns. Scanning stops at
/// the first match.
fn access_history_rows(doc: &Html) -> Vec<HistoryRow> {
    const REQUIRED_COLUMNS: [&str; 4] = ["fecha", "sede", "actividad", "registro"];

    for table in doc.select(&TABLE) {
        let joined = table
            .select(&HEADER_CELL)
            .map(|th| node_text(th).to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        let is_history = REQUIRED_COLUMNS.iter().all(|col| joined.contains(col))
            || joined.contains("historial de accesos");
        if !is_history {
            continue;
        }

        let mut rows = Vec::new();
        for row in table.select(&BODY_ROW) {
            let cells: Vec<String> = row.select(&CELL).map(node_text).collect();
            if cells.len() >= 4 {
                rows.push(HistoryRow {
                    date: cells[0].clone(),
                    location: cells[1].clone(),
                    record: cells[3].clone(),
                });
            }
        }
        return rows;
    }

    Vec::new()
}

/// Collect the attachment links from the uploaded-files panel, rewriting
/// relative hrefs against the portal base. Upstream appends new uploads
/// at the end of the panel, so the list is returned newest-first.
pub fn attachment_links(html: &str, base_url: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Some(panel) = doc.select(&UPLOADS_PANEL).next() else {
        return Vec::new();
    };
    let Some(body) = panel.select(&PANEL_BODY).next() else {
        return Vec::new();
    };

    let base = base_url.trim_end_matches('/');
    let mut links = Vec::new();
    for anchor in body.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if href.starts_with("uploads_inbody/") {
            links.push(format!("{}/{}", base, href));
        } else if href.starts_with("http") {
            links.push(href.to_string());
        }
    }

    links.reverse();
    links
}
