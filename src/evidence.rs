// Evidence manager: content-addressed evidence records with secondary
// indexes and verifiable chains. Every record is hashed over its canonical
// content on insertion; verification recomputes that hash on demand.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::{canonicalize, content_hash, md5_hex, parse_iso, utc_now_iso, VerificationReport};
use crate::error::{GlassBoxError, Result};
use crate::export::{csv_field, xml_escape, ExportFormat};
use crate::storage::{MemoryBackend, StorageBackend};
use crate::value::{truthy, value_to_string, values_equal};

/// Kinds of evidence the manager accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Log,
    Document,
    Metric,
    UserInput,
    SystemEvent,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceType::Log => "log",
            EvidenceType::Document => "document",
            EvidenceType::Metric => "metric",
            EvidenceType::UserInput => "user_input",
            EvidenceType::SystemEvent => "system_event",
        }
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EvidenceType {
    type Err = GlassBoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(EvidenceType::Log),
            "document" => Ok(EvidenceType::Document),
            "metric" => Ok(EvidenceType::Metric),
            "user_input" => Ok(EvidenceType::UserInput),
            "system_event" => Ok(EvidenceType::SystemEvent),
            other => Err(GlassBoxError::evidence(format!(
                "Invalid evidence type: {other}"
            ))),
        }
    }
}

/// A stored, hashed evidence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: EvidenceType,
    pub content: Value,
    pub timestamp: String,
    pub source: String,
    pub hash: String,
}

/// One verified link of an evidence chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainLink {
    pub evidence_id: String,
    pub evidence: EvidenceRecord,
    pub verification: VerificationReport,
}

/// An ordered, verified list of evidence records with an aggregate hash
/// over the member hashes in input order.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceChain {
    pub chain_id: String,
    pub evidence_count: usize,
    pub chain_hash: String,
    pub chain: Vec<ChainLink>,
    pub created: String,
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceStatistics {
    pub total_evidence: usize,
    pub by_type: HashMap<String, usize>,
    pub by_source: HashMap<String, usize>,
    pub oldest_evidence: Option<String>,
    pub newest_evidence: Option<String>,
}

/// Manager for creating, indexing, verifying and exporting evidence.
pub struct EvidenceManager {
    store: Box<dyn StorageBackend<EvidenceRecord>>,
    by_type: HashMap<String, Vec<String>>,
    by_source: HashMap<String, Vec<String>>,
    by_timestamp: HashMap<String, Vec<String>>,
}

impl EvidenceManager {
    pub fn new() -> Self {
        EvidenceManager::with_backend(Box::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Box<dyn StorageBackend<EvidenceRecord>>) -> Self {
        EvidenceManager {
            store: backend,
            by_type: HashMap::new(),
            by_source: HashMap::new(),
            by_timestamp: HashMap::new(),
        }
    }

    /// Create, hash, store and index a new evidence record.
    pub fn create_evidence(
        &mut self,
        record_type: EvidenceType,
        content: Value,
        source: &str,
        evidence_id: Option<String>,
    ) -> Result<EvidenceRecord> {
        if !truthy(&content) {
            return Err(GlassBoxError::evidence("Evidence content cannot be empty"));
        }

        let id = evidence_id.unwrap_or_else(|| {
            let seed = format!("{record_type}_{source}_{}", utc_now_iso());
            format!("evd_{}", &md5_hex(&seed)[..16])
        });

        if self.store.contains(&id) {
            return Err(GlassBoxError::evidence_id("Duplicate evidence id", id));
        }

        let record = EvidenceRecord {
            id: id.clone(),
            record_type,
            hash: content_hash(&content),
            content,
            timestamp: utc_now_iso(),
            source: source.to_string(),
        };

        self.index(&record);
        self.store.insert(id.clone(), record.clone());
        debug!("stored evidence {id} ({record_type} from {source})");

        Ok(record)
    }

    /// Re-insert externally produced records (e.g. a JSON export). Hashes
    /// are kept as-is, so integrity verification still applies.
    pub fn import_evidence(&mut self, json: &str) -> Result<Vec<String>> {
        let records: Vec<EvidenceRecord> = serde_json::from_str(json)?;
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            if self.store.contains(&record.id) {
                return Err(GlassBoxError::evidence_id(
                    "Duplicate evidence id",
                    record.id,
                ));
            }
            ids.push(record.id.clone());
            self.index(&record);
            self.store.insert(record.id.clone(), record);
        }

        Ok(ids)
    }

    pub fn get_evidence(&self, evidence_id: &str) -> Option<EvidenceRecord> {
        self.store.get(evidence_id).cloned()
    }

    pub fn evidence_by_type(&self, record_type: EvidenceType) -> Vec<EvidenceRecord> {
        self.resolve_ids(self.by_type.get(record_type.as_str()))
    }

    pub fn evidence_by_source(&self, source: &str) -> Vec<EvidenceRecord> {
        self.resolve_ids(self.by_source.get(source))
    }

    /// Records whose timestamp falls inside `[start, end]`, sorted by
    /// timestamp (ties keep insertion order).
    pub fn evidence_by_timerange(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<EvidenceRecord> {
        let mut records: Vec<EvidenceRecord> = self
            .by_timestamp
            .values()
            .flatten()
            .filter_map(|id| self.store.get(id))
            .filter(|record| {
                parse_iso(&record.timestamp)
                    .map(|ts| ts >= start && ts <= end)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        records
    }

    /// Search with query criteria: `type`, `source`, `content_contains`,
    /// `content.<key>`, `after`, `before`.
    pub fn search_evidence(&self, query: &Map<String, Value>) -> Vec<EvidenceRecord> {
        self.store
            .records()
            .into_iter()
            .filter(|record| matches_query(record, query))
            .cloned()
            .collect()
    }

    /// Recompute the canonical content hash and compare with the stored
    /// hash.
    pub fn verify_evidence_integrity(&self, evidence_id: &str) -> VerificationReport {
        let Some(record) = self.store.get(evidence_id) else {
            return VerificationReport::failure("Evidence not found");
        };

        let calculated = content_hash(&record.content);
        let report = VerificationReport::compare(&record.hash, &calculated);
        if !report.valid {
            warn!("evidence {evidence_id} failed integrity verification");
        }
        report
    }

    /// Verify each member, then chain the member hashes in input order.
    pub fn create_evidence_chain(&self, evidence_ids: &[String]) -> Result<EvidenceChain> {
        let mut chain = Vec::with_capacity(evidence_ids.len());
        let mut concatenated = String::new();

        for evidence_id in evidence_ids {
            let record = self.get_evidence(evidence_id).ok_or_else(|| {
                GlassBoxError::evidence_id("Evidence not found", evidence_id.clone())
            })?;

            let verification = self.verify_evidence_integrity(evidence_id);
            if !verification.valid {
                return Err(GlassBoxError::evidence_id(
                    "Evidence integrity check failed",
                    evidence_id.clone(),
                ));
            }

            concatenated.push_str(&record.hash);
            chain.push(ChainLink {
                evidence_id: evidence_id.clone(),
                evidence: record,
                verification,
            });
        }

        let chain_hash = crate::canonical::sha256_hex(&concatenated);
        let chain_id = format!("chain_{}", &chain_hash[..16]);
        info!("created evidence chain {chain_id} over {} records", chain.len());

        Ok(EvidenceChain {
            chain_id,
            evidence_count: chain.len(),
            chain_hash,
            chain,
            created: utc_now_iso(),
        })
    }

    /// Export the given records as JSON, CSV or XML.
    pub fn export_evidence(
        &self,
        evidence_ids: &[String],
        format: ExportFormat,
    ) -> Result<String> {
        let records: Vec<EvidenceRecord> = evidence_ids
            .iter()
            .filter_map(|id| self.get_evidence(id))
            .collect();

        if records.is_empty() {
            return Err(GlassBoxError::evidence("No evidence found to export"));
        }

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&records)?),
            ExportFormat::Csv => Ok(to_csv(&records)),
            ExportFormat::Xml => Ok(to_xml(&records)),
        }
    }

    /// Remove a record and all of its index entries.
    pub fn delete_evidence(&mut self, evidence_id: &str) -> bool {
        let Some(record) = self.store.remove(evidence_id) else {
            return false;
        };

        remove_index_entry(&mut self.by_type, record.record_type.as_str(), evidence_id);
        remove_index_entry(&mut self.by_source, &record.source, evidence_id);
        remove_index_entry(&mut self.by_timestamp, date_key(&record.timestamp), evidence_id);

        info!("deleted evidence {evidence_id}");
        true
    }

    pub fn statistics(&self) -> EvidenceStatistics {
        let mut timestamps: Vec<&str> = self
            .store
            .records()
            .into_iter()
            .map(|record| record.timestamp.as_str())
            .collect();
        timestamps.sort_unstable();

        EvidenceStatistics {
            total_evidence: self.store.len(),
            by_type: self
                .by_type
                .iter()
                .map(|(key, ids)| (key.clone(), ids.len()))
                .collect(),
            by_source: self
                .by_source
                .iter()
                .map(|(key, ids)| (key.clone(), ids.len()))
                .collect(),
            oldest_evidence: timestamps.first().map(|s| s.to_string()),
            newest_evidence: timestamps.last().map(|s| s.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn index(&mut self, record: &EvidenceRecord) {
        self.by_type
            .entry(record.record_type.as_str().to_string())
            .or_default()
            .push(record.id.clone());
        self.by_source
            .entry(record.source.clone())
            .or_default()
            .push(record.id.clone());
        self.by_timestamp
            .entry(date_key(&record.timestamp).to_string())
            .or_default()
            .push(record.id.clone());
    }

    fn resolve_ids(&self, ids: Option<&Vec<String>>) -> Vec<EvidenceRecord> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.store.get(id))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }
}

impl Default for EvidenceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Date component (`YYYY-MM-DD`) of an ISO timestamp, used as the
/// timestamp index key.
fn date_key(timestamp: &str) -> &str {
    timestamp.get(..10).unwrap_or(timestamp)
}

fn remove_index_entry(index: &mut HashMap<String, Vec<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn matches_query(record: &EvidenceRecord, query: &Map<String, Value>) -> bool {
    for (key, expected) in query {
        match key.as_str() {
            "type" => {
                if expected.as_str() != Some(record.record_type.as_str()) {
                    return false;
                }
            }
            "source" => {
                if expected.as_str() != Some(record.source.as_str()) {
                    return false;
                }
            }
            "content_contains" => {
                let needle = value_to_string(expected);
                if !canonicalize(&record.content).contains(&needle) {
                    return false;
                }
            }
            "after" => {
                let in_range = match (parse_iso(&record.timestamp), timestamp_of(expected)) {
                    (Some(ts), Some(bound)) => ts >= bound,
                    _ => false,
                };
                if !in_range {
                    return false;
                }
            }
            "before" => {
                let in_range = match (parse_iso(&record.timestamp), timestamp_of(expected)) {
                    (Some(ts), Some(bound)) => ts <= bound,
                    _ => false,
                };
                if !in_range {
                    return false;
                }
            }
            other if other.starts_with("content.") => {
                let content_key = &other["content.".len()..];
                match record.content.get(content_key) {
                    Some(actual) if values_equal(actual, expected) => {}
                    _ => return false,
                }
            }
            _ => {}
        }
    }
    true
}

fn timestamp_of(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(parse_iso)
}

fn to_csv(records: &[EvidenceRecord]) -> String {
    let mut out = String::from("ID,Type,Source,Timestamp,Content,Hash\r\n");
    for record in records {
        let row = [
            csv_field(&record.id),
            csv_field(record.record_type.as_str()),
            csv_field(&record.source),
            csv_field(&record.timestamp),
            csv_field(&canonicalize(&record.content)),
            csv_field(&record.hash),
        ];
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

fn to_xml(records: &[EvidenceRecord]) -> String {
    let mut lines = vec![
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>".to_string(),
        "<evidence>".to_string(),
    ];

    for record in records {
        lines.push("  <item>".to_string());
        lines.push(format!("    <id>{}</id>", xml_escape(&record.id)));
        lines.push(format!("    <type>{}</type>", record.record_type));
        lines.push(format!("    <source>{}</source>", xml_escape(&record.source)));
        lines.push(format!(
            "    <timestamp>{}</timestamp>",
            xml_escape(&record.timestamp)
        ));
        lines.push(format!("    <hash>{}</hash>", record.hash));
        lines.push("    <content>".to_string());

        if let Some(map) = record.content.as_object() {
            for (key, value) in map {
                lines.push(format!(
                    "      <{key}>{}</{key}>",
                    xml_escape(&value_to_string(value))
                ));
            }
        }

        lines.push("    </content>".to_string());
        lines.push("  </item>".to_string());
    }

    lines.push("</evidence>".to_string());
    lines.join("\n")
}
