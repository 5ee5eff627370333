// src/csv_import.rs

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::TryStreamExt;
use log::{info, warn};
use serde::Serialize;

use crate::actor::Actor;
use crate::app_state::AppState;
use crate::error::CrmError;
use crate::models::{Lead, LeadStatus};

const BATCH_SIZE: usize = 100;
const PREVIEW_ROWS: usize = 5;

/// Splits one line on commas. A `"` flips the in-quotes state and is dropped;
/// commas inside quotes are kept. Escaped quotes are not supported.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Header line plus data rows. Blank lines and a leading byte-order mark are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn parse(content: &str) -> Self {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut lines = content
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.trim().is_empty());

        let headers = lines.next().map(split_line).unwrap_or_default();
        let rows = lines.map(split_line).collect();
        CsvTable { headers, rows }
    }

    /// Value of `column` in `row`; missing columns read as empty.
    pub fn field<'a>(&self, row: &'a [String], column: &str) -> &'a str {
        self.headers
            .iter()
            .position(|header| header == column)
            .and_then(|index| row.get(index))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn preview(&self, limit: usize) -> ImportPreview {
        let rows = self
            .rows
            .iter()
            .take(limit)
            .map(|row| {
                self.headers
                    .iter()
                    .map(|header| {
                        let value = self.field(row, header).to_string();
                        (header.clone(), serde_json::Value::String(value))
                    })
                    .collect()
            })
            .collect();
        ImportPreview {
            headers: self.headers.clone(),
            rows,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImportPreview {
    pub headers: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// `"LastName FirstName [Middle...]"`: the first token is the surname.
pub fn parse_name(name: &str) -> Result<(String, String), String> {
    let mut tokens = name.split_whitespace();
    let last_name = tokens.next().ok_or_else(|| "name is empty".to_string())?;
    let first_name = tokens.collect::<Vec<_>>().join(" ");
    if first_name.is_empty() {
        return Err(format!("name '{}' has no given name", last_name));
    }
    Ok((first_name, last_name.to_string()))
}

#[derive(Debug, Default, PartialEq)]
pub struct ParsedAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

/// `"Street, City, State, Zip"`; absent parts come back empty.
pub fn parse_address(address: &str) -> ParsedAddress {
    let mut parts = address.split(',').map(str::trim);
    let mut next = || parts.next().unwrap_or("").to_string();
    ParsedAddress {
        street: next(),
        city: next(),
        state: next(),
        zip_code: next(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn coordinate(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Builds one lead from a data row, owned by `owner_id`.
pub fn lead_from_row(table: &CsvTable, row: &[String], owner_id: &str) -> Result<Lead, String> {
    let (first_name, last_name) = parse_name(table.field(row, "Name"))?;
    let address = parse_address(table.field(row, "Address"));

    let mut lead = Lead::new(first_name, last_name, Utc::now());
    lead.street = non_empty(&address.street);
    lead.city = non_empty(&address.city);
    lead.state = non_empty(&address.state);
    lead.zip_code = non_empty(&address.zip_code);
    lead.latitude = coordinate(table.field(row, "Latitude"));
    lead.longitude = coordinate(table.field(row, "Longitude"));
    lead.source = non_empty(table.field(row, "Occupancy_Status")).map(|status| format!("{}-Occupied", status));
    lead.description = non_empty(table.field(row, "Occupancy_Reason"));
    lead.status = LeadStatus::New;
    lead.assigned_to_id = Some(owner_id.to_string());
    Ok(lead)
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct ImportReport {
    pub total: usize,
    pub created: u64,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Imports every data row in batches. Bad rows are reported and skipped;
/// duplicates are left to the store and simply not counted as created.
pub async fn import_leads(state: &AppState, actor: &Actor, table: &CsvTable) -> Result<ImportReport, CrmError> {
    let mut report = ImportReport {
        total: table.rows.len(),
        ..Default::default()
    };

    for (batch_index, batch) in table.rows.chunks(BATCH_SIZE).enumerate() {
        let mut leads = Vec::with_capacity(batch.len());
        for (offset, row) in batch.iter().enumerate() {
            if table.field(row, "Name").trim().is_empty() {
                report.skipped += 1;
                continue;
            }
            match lead_from_row(table, row, &actor.user_id) {
                Ok(lead) => leads.push(lead),
                Err(reason) => {
                    // +2: one for the header line, one for 1-based numbering.
                    let row_number = batch_index * BATCH_SIZE + offset + 2;
                    report.errors.push(format!("Row {}: {}", row_number, reason));
                    report.skipped += 1;
                }
            }
        }
        if !leads.is_empty() {
            report.created += state.leads.insert_many_skip_duplicates(leads).await?;
        }
    }

    info!(
        "CSV import by {}: {} rows, {} created, {} skipped",
        actor.user_id, report.total, report.created, report.skipped
    );
    Ok(report)
}

/// Reads the `file` field of a multipart upload as UTF-8 text.
async fn read_upload(mut payload: Multipart, max_bytes: usize) -> Result<String, CrmError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| CrmError::invalid("file", e.to_string()))?
    {
        if field.name() != Some("file") {
            while field
                .try_next()
                .await
                .map_err(|e| CrmError::invalid("file", e.to_string()))?
                .is_some()
            {}
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| CrmError::invalid("file", e.to_string()))?
        {
            if bytes.len() + chunk.len() > max_bytes {
                warn!("Rejected CSV upload over {} bytes", max_bytes);
                return Err(CrmError::invalid("file", format!("File exceeds {} bytes", max_bytes)));
            }
            bytes.extend_from_slice(&chunk);
        }
        return String::from_utf8(bytes).map_err(|_| CrmError::invalid("file", "File must be UTF-8 text"));
    }
    Err(CrmError::invalid("file", "No file provided"))
}

async fn read_table(payload: Multipart, max_bytes: usize) -> Result<CsvTable, CrmError> {
    let content = read_upload(payload, max_bytes).await?;
    let table = CsvTable::parse(&content);
    if table.rows.is_empty() {
        return Err(CrmError::invalid("file", "No data found in CSV"));
    }
    Ok(table)
}

/// POST /leads/import
pub async fn import_handler(
    data: web::Data<AppState>,
    actor: Actor,
    payload: Multipart,
) -> Result<HttpResponse, CrmError> {
    let table = read_table(payload, data.config.import_max_bytes).await?;
    let report = import_leads(&data, &actor, &table).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("Imported {} leads", report.created),
        "details": report,
    })))
}

/// POST /leads/import/preview
pub async fn preview_handler(
    data: web::Data<AppState>,
    _actor: Actor,
    payload: Multipart,
) -> Result<HttpResponse, CrmError> {
    let table = read_table(payload, data.config.import_max_bytes).await?;
    Ok(HttpResponse::Ok().json(table.preview(PREVIEW_ROWS)))
}
