//! Repository export
//!
//! Writes the stored repositories, most starred first, as CSV or JSON.

use crate::crawler::RepositoryRecord;
use crate::storage::Storage;
use crate::HarvestError;
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unsupported export format: {}", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Json => write!(f, "json"),
        }
    }
}

const CSV_HEADER: [&str; 16] = [
    "github_id",
    "name",
    "owner_login",
    "full_name",
    "description",
    "stargazers_count",
    "forks_count",
    "open_issues_count",
    "language",
    "created_at",
    "updated_at",
    "pushed_at",
    "disk_usage_kb",
    "archived",
    "disabled",
    "license_key",
];

/// Exports every stored repository to `out`
///
/// # Returns
///
/// * `Ok(usize)` - Number of repositories written
/// * `Err(HarvestError)` - Query, serialization, or I/O failed
pub fn export_repositories<W: Write>(
    storage: &dyn Storage,
    format: ExportFormat,
    out: &mut W,
) -> Result<usize, HarvestError> {
    let records = storage.list_repositories_by_stars(None)?;

    match format {
        ExportFormat::Csv => write_csv(&records, out)?,
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &records)?;
            writeln!(out)?;
        }
    }

    tracing::info!("Exported {} repositories as {}", records.len(), format);
    Ok(records.len())
}

fn write_csv<W: Write>(records: &[RepositoryRecord], out: &mut W) -> std::io::Result<()> {
    writeln!(out, "{}", CSV_HEADER.join(","))?;

    for r in records {
        let fields = [
            csv_field(&r.github_id),
            csv_field(&r.name),
            csv_field(&r.owner_login),
            csv_field(&r.full_name),
            csv_field(r.description.as_deref().unwrap_or("")),
            r.stargazers_count.to_string(),
            r.forks_count.to_string(),
            r.open_issues_count.to_string(),
            csv_field(r.language.as_deref().unwrap_or("")),
            csv_field(r.created_at.as_deref().unwrap_or("")),
            csv_field(r.updated_at.as_deref().unwrap_or("")),
            csv_field(r.pushed_at.as_deref().unwrap_or("")),
            r.disk_usage_kb.map(|v| v.to_string()).unwrap_or_default(),
            r.archived.to_string(),
            r.disabled.to_string(),
            csv_field(r.license_key.as_deref().unwrap_or("")),
        ];
        writeln!(out, "{}", fields.join(","))?;
    }

    Ok(())
}

/// Quotes a field when it contains a delimiter, quote, or line break (RFC 4180)
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
