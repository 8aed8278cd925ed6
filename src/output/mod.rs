use serde::Serialize;

use crate::runner::{Finding, FindingKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

pub fn infer_format_from_path(path: &str) -> Option<OutputFormat> {
    let lower = path.trim().to_lowercase();
    if lower.ends_with(".json") {
        return Some(OutputFormat::Json);
    }
    if lower.ends_with(".txt") {
        return Some(OutputFormat::Text);
    }
    None
}

#[derive(Clone, Debug, Serialize)]
pub struct DifferenceRecord {
    pub attribute: String,
    pub break_value: String,
    pub no_break_value: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutputRecord {
    pub kind: String,
    pub url: String,
    pub method: String,
    pub location: String,
    pub param: String,
    pub probe: String,
    pub break_payload: String,
    pub escape_payload: String,
    pub samples: usize,
    pub differences: Vec<DifferenceRecord>,
}

pub fn build_records(findings: &[Finding]) -> Vec<OutputRecord> {
    findings
        .iter()
        .map(|f| OutputRecord {
            kind: match f.kind {
                FindingKind::Injection => "injection".to_string(),
                FindingKind::BackendParameter => "backend_parameter".to_string(),
            },
            url: f.url.clone(),
            method: f.method.clone(),
            location: f.location.clone(),
            param: f.param.clone(),
            probe: f.probe.clone(),
            break_payload: f.break_payload.clone(),
            escape_payload: f.escape_payload.clone(),
            samples: f.samples,
            differences: f
                .differences
                .iter()
                .map(|d| DifferenceRecord {
                    attribute: d.attribute.clone(),
                    break_value: d.break_value.to_string(),
                    no_break_value: d.no_break_value.to_string(),
                })
                .collect(),
        })
        .collect()
}

/// One finding per line: `url param probe break|escape attr=a/b ...`
pub fn render_text(records: &[OutputRecord]) -> Vec<u8> {
    let mut out = String::new();
    for r in records {
        out.push_str(&format!(
            "[{}] {} {} {}:{} probe={} break={:?} escape={:?}",
            r.kind, r.method, r.url, r.location, r.param, r.probe, r.break_payload, r.escape_payload
        ));
        for d in r.differences.iter() {
            out.push_str(&format!(" {}={}/{}", d.attribute, d.break_value, d.no_break_value));
        }
        out.push('\n');
    }
    out.into_bytes()
}

pub fn render_json(records: &[OutputRecord]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(records)
}

pub fn render(format: OutputFormat, records: &[OutputRecord]) -> serde_json::Result<Vec<u8>> {
    match format {
        OutputFormat::Text => Ok(render_text(records)),
        OutputFormat::Json => render_json(records),
    }
}

pub async fn write_report(
    path: &str,
    format: OutputFormat,
    findings: &[Finding],
) -> Result<(), std::io::Error> {
    let records = build_records(findings);
    let rendered = render(format, &records)?;
    tokio::fs::write(path, rendered).await
}
