// Shared export plumbing for the evidence and audit managers: the format
// selector plus CSV/XML escaping helpers.

use std::str::FromStr;

use crate::error::GlassBoxError;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Xml,
}

impl FromStr for ExportFormat {
    type Err = GlassBoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "xml" => Ok(ExportFormat::Xml),
            other => Err(GlassBoxError::validation(format!(
                "Unsupported export format: {other}"
            ))),
        }
    }
}

/// Quote a CSV field when it contains separators, quotes or newlines.
pub(crate) fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Escape text content for XML output.
pub(crate) fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
