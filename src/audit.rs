// Audit trail manager: hashed, append-only records of actor-performed
// actions, with aggregation into integrity-checked bundles and
// time-bounded reports. An entry hash covers action, user, canonical
// details and timestamp; a bundle checksum covers the member hashes in
// timestamp-sorted order.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::{
    canonicalize, md5_hex, parse_iso, sha256_hex, utc_now_iso, VerificationReport,
};
use crate::error::{GlassBoxError, Result};
use crate::export::{csv_field, xml_escape, ExportFormat};
use crate::storage::{MemoryBackend, StorageBackend};
use crate::value::{value_to_string, values_equal};

/// A stored, hashed audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: String,
    pub action: String,
    pub user: String,
    pub details: Value,
    pub bundle_id: Option<String>,
    pub hash: String,
}

impl AuditEntry {
    /// Hash input: `action:user:canonical(details):timestamp`.
    fn compute_hash(action: &str, user: &str, details: &Value, timestamp: &str) -> String {
        sha256_hex(&format!(
            "{action}:{user}:{}:{timestamp}",
            canonicalize(details)
        ))
    }
}

/// A named aggregate of verified audit entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditBundle {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created: String,
    pub modified: String,
    pub version: String,
    pub entry_count: usize,
    pub bundle_hash: String,
    pub entries: Vec<AuditEntry>,
    pub checksum: String,
}

/// Result of re-verifying an audit bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleVerification {
    pub valid: bool,
    pub all_entries_valid: bool,
    pub checksum_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated_checksum: Option<String>,
    pub entry_verifications: Vec<VerificationReport>,
    pub reason: String,
}

impl BundleVerification {
    fn failure(reason: impl Into<String>) -> Self {
        BundleVerification {
            valid: false,
            all_entries_valid: false,
            checksum_valid: false,
            stored_checksum: None,
            calculated_checksum: None,
            entry_verifications: Vec::new(),
            reason: reason.into(),
        }
    }
}

/// Statistics over a set of entries (used in reports).
#[derive(Debug, Clone, Serialize)]
pub struct AuditStatistics {
    pub total_entries: usize,
    pub unique_users: usize,
    pub unique_actions: usize,
    pub by_user: HashMap<String, usize>,
    pub by_action: HashMap<String, usize>,
    pub by_hour: HashMap<String, usize>,
    pub by_day: HashMap<String, usize>,
}

/// A time-bounded audit report.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub report_id: String,
    pub period_start: String,
    pub period_end: String,
    pub generated: String,
    pub total_entries: usize,
    pub entries: Vec<AuditEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<AuditStatistics>,
}

/// Manager-level statistics over the whole trail.
#[derive(Debug, Clone, Serialize)]
pub struct TrailStatistics {
    pub total_entries: usize,
    pub total_bundles: usize,
    pub by_user: HashMap<String, usize>,
    pub by_action: HashMap<String, usize>,
    pub by_bundle: HashMap<String, usize>,
    pub oldest_entry: Option<String>,
    pub newest_entry: Option<String>,
}

/// Manager for creating, bundling, verifying and exporting audit entries.
pub struct AuditTrail {
    store: Box<dyn StorageBackend<AuditEntry>>,
    bundles: HashMap<String, AuditBundle>,
    by_user: HashMap<String, Vec<String>>,
    by_action: HashMap<String, Vec<String>>,
    by_timestamp: HashMap<String, Vec<String>>,
    by_bundle: HashMap<String, Vec<String>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        AuditTrail::with_backend(Box::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Box<dyn StorageBackend<AuditEntry>>) -> Self {
        AuditTrail {
            store: backend,
            bundles: HashMap::new(),
            by_user: HashMap::new(),
            by_action: HashMap::new(),
            by_timestamp: HashMap::new(),
            by_bundle: HashMap::new(),
        }
    }

    /// Create, hash, store and index a new audit entry.
    pub fn create_audit_entry(
        &mut self,
        action: &str,
        user: &str,
        details: Value,
        audit_id: Option<String>,
        bundle_id: Option<String>,
    ) -> Result<AuditEntry> {
        if action.is_empty() {
            return Err(GlassBoxError::audit("Action cannot be empty"));
        }
        if user.is_empty() {
            return Err(GlassBoxError::audit("User cannot be empty"));
        }

        let id = audit_id.unwrap_or_else(|| {
            let seed = format!("{action}_{user}_{}", utc_now_iso());
            format!("aud_{}", &md5_hex(&seed)[..16])
        });

        if self.store.contains(&id) {
            return Err(GlassBoxError::audit_id("Duplicate audit id", id));
        }

        let timestamp = utc_now_iso();
        let entry = AuditEntry {
            id: id.clone(),
            hash: AuditEntry::compute_hash(action, user, &details, &timestamp),
            timestamp,
            action: action.to_string(),
            user: user.to_string(),
            details,
            bundle_id,
        };

        self.index(&entry);
        self.store.insert(id.clone(), entry.clone());
        debug!("stored audit entry {id} ({action} by {user})");

        Ok(entry)
    }

    pub fn get_audit_entry(&self, audit_id: &str) -> Option<AuditEntry> {
        self.store.get(audit_id).cloned()
    }

    pub fn entries_by_user(&self, user: &str) -> Vec<AuditEntry> {
        self.resolve_ids(self.by_user.get(user))
    }

    pub fn entries_by_action(&self, action: &str) -> Vec<AuditEntry> {
        self.resolve_ids(self.by_action.get(action))
    }

    pub fn entries_by_bundle(&self, bundle_id: &str) -> Vec<AuditEntry> {
        self.resolve_ids(self.by_bundle.get(bundle_id))
    }

    /// Entries whose timestamp falls inside `[start, end]`, sorted by
    /// timestamp (ties keep insertion order).
    pub fn entries_by_timerange(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = self
            .by_timestamp
            .values()
            .flatten()
            .filter_map(|id| self.store.get(id))
            .filter(|entry| {
                parse_iso(&entry.timestamp)
                    .map(|ts| ts >= start && ts <= end)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        entries
    }

    /// Search with query criteria: `user`, `action`, `bundle_id`,
    /// `details.<key>`, `after`, `before`.
    pub fn search_entries(&self, query: &Map<String, Value>) -> Vec<AuditEntry> {
        self.store
            .records()
            .into_iter()
            .filter(|entry| matches_query(entry, query))
            .cloned()
            .collect()
    }

    /// Recompute an entry's hash from its stored fields.
    pub fn verify_audit_entry_integrity(&self, audit_id: &str) -> VerificationReport {
        let Some(entry) = self.store.get(audit_id) else {
            return VerificationReport::failure("Audit entry not found");
        };

        let calculated =
            AuditEntry::compute_hash(&entry.action, &entry.user, &entry.details, &entry.timestamp);
        let report = VerificationReport::compare(&entry.hash, &calculated);
        if !report.valid {
            warn!("audit entry {audit_id} failed integrity verification");
        }
        report
    }

    /// Aggregate entries into a bundle. Every member is verified before
    /// admission; the checksum covers member hashes in timestamp-sorted
    /// order, so it is stable against the order the ids were listed in.
    pub fn create_audit_bundle(
        &mut self,
        name: &str,
        description: &str,
        audit_ids: &[String],
        bundle_id: Option<String>,
    ) -> Result<AuditBundle> {
        if name.is_empty() {
            return Err(GlassBoxError::audit("Bundle name cannot be empty"));
        }
        if audit_ids.is_empty() {
            return Err(GlassBoxError::audit("Audit IDs list cannot be empty"));
        }

        let id = bundle_id.unwrap_or_else(|| {
            let seed = format!("{name}_{}", utc_now_iso());
            format!("bundle_{}", &md5_hex(&seed)[..16])
        });

        let mut entries = Vec::with_capacity(audit_ids.len());
        for audit_id in audit_ids {
            let entry = self
                .get_audit_entry(audit_id)
                .ok_or_else(|| GlassBoxError::audit_id("Audit entry not found", audit_id.clone()))?;

            let verification = self.verify_audit_entry_integrity(audit_id);
            if !verification.valid {
                return Err(GlassBoxError::audit_id(
                    "Audit entry integrity check failed",
                    audit_id.clone(),
                ));
            }

            entries.push(entry);
        }

        let checksum = bundle_checksum(&entries);
        for entry in &mut entries {
            entry.bundle_id = Some(id.clone());
        }

        let timestamp = utc_now_iso();
        let bundle = AuditBundle {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            created: timestamp.clone(),
            modified: timestamp,
            version: "1.0".to_string(),
            entry_count: entries.len(),
            bundle_hash: checksum.clone(),
            entries,
            checksum,
        };

        // Back-fill membership on the stored entries and the index.
        for audit_id in audit_ids {
            if let Some(entry) = self.store.remove(audit_id) {
                self.store.insert(
                    audit_id.clone(),
                    AuditEntry {
                        bundle_id: Some(id.clone()),
                        ..entry
                    },
                );
            }
            self.by_bundle
                .entry(id.clone())
                .or_default()
                .push(audit_id.clone());
        }

        info!("created audit bundle {id} over {} entries", bundle.entry_count);
        self.bundles.insert(id.clone(), bundle.clone());
        Ok(bundle)
    }

    pub fn get_audit_bundle(&self, bundle_id: &str) -> Option<&AuditBundle> {
        self.bundles.get(bundle_id)
    }

    /// Re-verify every member entry and the bundle checksum.
    pub fn verify_audit_bundle_integrity(&self, bundle_id: &str) -> BundleVerification {
        let Some(bundle) = self.bundles.get(bundle_id) else {
            return BundleVerification::failure("Audit bundle not found");
        };

        let mut all_entries_valid = true;
        let mut entry_verifications = Vec::with_capacity(bundle.entries.len());
        for entry in &bundle.entries {
            let verification = self.verify_audit_entry_integrity(&entry.id);
            if !verification.valid {
                all_entries_valid = false;
            }
            entry_verifications.push(verification);
        }

        let calculated_checksum = bundle_checksum(&bundle.entries);
        let checksum_valid = calculated_checksum == bundle.checksum;
        let valid = all_entries_valid && checksum_valid;

        if !valid {
            warn!("audit bundle {bundle_id} failed integrity verification");
        }

        BundleVerification {
            valid,
            all_entries_valid,
            checksum_valid,
            stored_checksum: Some(bundle.checksum.clone()),
            calculated_checksum: Some(calculated_checksum),
            entry_verifications,
            reason: if valid {
                "Bundle integrity verified".to_string()
            } else {
                "Bundle integrity check failed".to_string()
            },
        }
    }

    /// Export entries as JSON, CSV or XML: a whole bundle, an explicit id
    /// list, or the full trail.
    pub fn export_audit_trail(
        &self,
        format: ExportFormat,
        audit_ids: Option<&[String]>,
        bundle_id: Option<&str>,
    ) -> Result<String> {
        let entries: Vec<AuditEntry> = if let Some(bundle_id) = bundle_id {
            let bundle = self.bundles.get(bundle_id).ok_or_else(|| {
                GlassBoxError::audit_id("Audit bundle not found", bundle_id.to_string())
            })?;
            bundle.entries.clone()
        } else if let Some(ids) = audit_ids {
            ids.iter().filter_map(|id| self.get_audit_entry(id)).collect()
        } else {
            let mut all: Vec<AuditEntry> = self.store.records().into_iter().cloned().collect();
            all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            all
        };

        if entries.is_empty() {
            return Err(GlassBoxError::audit("No audit entries found to export"));
        }

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&entries)?),
            ExportFormat::Csv => Ok(to_csv(&entries)),
            ExportFormat::Xml => Ok(to_xml(&entries)),
        }
    }

    /// Generate a time-bounded report with optional aggregate statistics.
    pub fn generate_audit_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        include_statistics: bool,
    ) -> AuditReport {
        let entries = self.entries_by_timerange(start, end);
        let period_start = start.to_rfc3339();
        let period_end = end.to_rfc3339();

        let statistics = include_statistics.then(|| entry_statistics(&entries));

        AuditReport {
            report_id: format!(
                "report_{}",
                &md5_hex(&format!("{period_start}_{period_end}"))[..16]
            ),
            period_start,
            period_end,
            generated: utc_now_iso(),
            total_entries: entries.len(),
            entries,
            statistics,
        }
    }

    pub fn statistics(&self) -> TrailStatistics {
        let mut timestamps: Vec<&str> = self
            .store
            .records()
            .into_iter()
            .map(|entry| entry.timestamp.as_str())
            .collect();
        timestamps.sort_unstable();

        TrailStatistics {
            total_entries: self.store.len(),
            total_bundles: self.bundles.len(),
            by_user: count_index(&self.by_user),
            by_action: count_index(&self.by_action),
            by_bundle: count_index(&self.by_bundle),
            oldest_entry: timestamps.first().map(|s| s.to_string()),
            newest_entry: timestamps.last().map(|s| s.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn index(&mut self, entry: &AuditEntry) {
        self.by_user
            .entry(entry.user.clone())
            .or_default()
            .push(entry.id.clone());
        self.by_action
            .entry(entry.action.clone())
            .or_default()
            .push(entry.id.clone());
        self.by_timestamp
            .entry(date_key(&entry.timestamp).to_string())
            .or_default()
            .push(entry.id.clone());
        if let Some(bundle_id) = &entry.bundle_id {
            self.by_bundle
                .entry(bundle_id.clone())
                .or_default()
                .push(entry.id.clone());
        }
    }

    fn resolve_ids(&self, ids: Option<&Vec<String>>) -> Vec<AuditEntry> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.store.get(id))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum over member hashes in timestamp-sorted order. The sort is
/// stable, so entries sharing a timestamp keep their input order.
pub fn bundle_checksum(entries: &[AuditEntry]) -> String {
    let mut sorted: Vec<&AuditEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let concatenated: String = sorted.iter().map(|entry| entry.hash.as_str()).collect();
    sha256_hex(&concatenated)
}

fn entry_statistics(entries: &[AuditEntry]) -> AuditStatistics {
    let mut by_user: HashMap<String, usize> = HashMap::new();
    let mut by_action: HashMap<String, usize> = HashMap::new();
    let mut by_hour: HashMap<String, usize> = HashMap::new();
    let mut by_day: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        *by_user.entry(entry.user.clone()).or_default() += 1;
        *by_action.entry(entry.action.clone()).or_default() += 1;
        *by_hour
            .entry(hour_key(&entry.timestamp).to_string())
            .or_default() += 1;
        *by_day
            .entry(date_key(&entry.timestamp).to_string())
            .or_default() += 1;
    }

    AuditStatistics {
        total_entries: entries.len(),
        unique_users: entries.iter().map(|e| e.user.as_str()).collect::<HashSet<_>>().len(),
        unique_actions: entries
            .iter()
            .map(|e| e.action.as_str())
            .collect::<HashSet<_>>()
            .len(),
        by_user,
        by_action,
        by_hour,
        by_day,
    }
}

fn count_index(index: &HashMap<String, Vec<String>>) -> HashMap<String, usize> {
    index
        .iter()
        .map(|(key, ids)| (key.clone(), ids.len()))
        .collect()
}

/// `YYYY-MM-DD` component of an ISO timestamp.
fn date_key(timestamp: &str) -> &str {
    timestamp.get(..10).unwrap_or(timestamp)
}

/// `YYYY-MM-DDTHH` component of an ISO timestamp.
fn hour_key(timestamp: &str) -> &str {
    timestamp.get(..13).unwrap_or(timestamp)
}

fn matches_query(entry: &AuditEntry, query: &Map<String, Value>) -> bool {
    for (key, expected) in query {
        match key.as_str() {
            "user" => {
                if expected.as_str() != Some(entry.user.as_str()) {
                    return false;
                }
            }
            "action" => {
                if expected.as_str() != Some(entry.action.as_str()) {
                    return false;
                }
            }
            "bundle_id" => {
                if expected.as_str() != entry.bundle_id.as_deref() {
                    return false;
                }
            }
            "after" => {
                let in_range = match (parse_iso(&entry.timestamp), bound_of(expected)) {
                    (Some(ts), Some(bound)) => ts >= bound,
                    _ => false,
                };
                if !in_range {
                    return false;
                }
            }
            "before" => {
                let in_range = match (parse_iso(&entry.timestamp), bound_of(expected)) {
                    (Some(ts), Some(bound)) => ts <= bound,
                    _ => false,
                };
                if !in_range {
                    return false;
                }
            }
            other if other.starts_with("details.") => {
                let details_key = &other["details.".len()..];
                match entry.details.get(details_key) {
                    Some(actual) if values_equal(actual, expected) => {}
                    _ => return false,
                }
            }
            _ => {}
        }
    }
    true
}

fn bound_of(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(parse_iso)
}

fn to_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::from("ID,Timestamp,Action,User,Bundle ID,Details,Hash\r\n");
    for entry in entries {
        let row = [
            csv_field(&entry.id),
            csv_field(&entry.timestamp),
            csv_field(&entry.action),
            csv_field(&entry.user),
            csv_field(entry.bundle_id.as_deref().unwrap_or("")),
            csv_field(&canonicalize(&entry.details)),
            csv_field(&entry.hash),
        ];
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

fn to_xml(entries: &[AuditEntry]) -> String {
    let mut lines = vec![
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>".to_string(),
        "<audit_trail>".to_string(),
    ];

    for entry in entries {
        lines.push("  <entry>".to_string());
        lines.push(format!("    <id>{}</id>", xml_escape(&entry.id)));
        lines.push(format!(
            "    <timestamp>{}</timestamp>",
            xml_escape(&entry.timestamp)
        ));
        lines.push(format!("    <action>{}</action>", xml_escape(&entry.action)));
        lines.push(format!("    <user>{}</user>", xml_escape(&entry.user)));
        if let Some(bundle_id) = &entry.bundle_id {
            lines.push(format!("    <bundle_id>{}</bundle_id>", xml_escape(bundle_id)));
        }
        lines.push(format!("    <hash>{}</hash>", entry.hash));
        lines.push("    <details>".to_string());

        if let Some(map) = entry.details.as_object() {
            for (key, value) in map {
                lines.push(format!(
                    "      <{key}>{}</{key}>",
                    xml_escape(&value_to_string(value))
                ));
            }
        }

        lines.push("    </details>".to_string());
        lines.push("  </entry>".to_string());
    }

    lines.push("</audit_trail>".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trail_with_entries() -> (AuditTrail, Vec<String>) {
        let mut trail = AuditTrail::new();
        let a = trail
            .create_audit_entry("bundle_created", "alice", json!({"bundle": "b1"}), None, None)
            .unwrap();
        let b = trail
            .create_audit_entry("rule_executed", "bob", json!({"rule": "r1"}), None, None)
            .unwrap();
        let c = trail
            .create_audit_entry("bundle_created", "alice", json!({"bundle": "b2"}), None, None)
            .unwrap();
        (trail, vec![a.id, b.id, c.id])
    }

    #[test]
    fn entries_are_hashed_and_indexed() {
        let (trail, ids) = trail_with_entries();

        let entry = trail.get_audit_entry(&ids[0]).unwrap();
        assert!(entry.id.starts_with("aud_"));
        assert_eq!(
            entry.hash,
            AuditEntry::compute_hash(&entry.action, &entry.user, &entry.details, &entry.timestamp)
        );

        assert_eq!(trail.entries_by_user("alice").len(), 2);
        assert_eq!(trail.entries_by_action("rule_executed").len(), 1);
        assert!(trail.verify_audit_entry_integrity(&ids[0]).valid);
        assert!(!trail.verify_audit_entry_integrity("missing").valid);
    }

    #[test]
    fn empty_action_or_user_is_rejected() {
        let mut trail = AuditTrail::new();
        assert!(trail
            .create_audit_entry("", "alice", json!({}), None, None)
            .is_err());
        assert!(trail
            .create_audit_entry("act", "", json!({}), None, None)
            .is_err());
    }

    #[test]
    fn bundle_checksum_is_order_independent() {
        let (mut trail, ids) = trail_with_entries();

        let forward = trail
            .create_audit_bundle("Forward", "input order", &ids, None)
            .unwrap();
        let reversed_ids: Vec<String> = ids.iter().rev().cloned().collect();
        let reversed = trail
            .create_audit_bundle("Reversed", "reverse order", &reversed_ids, None)
            .unwrap();

        // Hashing is over timestamp-sorted member hashes, so the listing
        // order cannot change the checksum.
        assert_eq!(forward.checksum, reversed.checksum);
        assert_eq!(forward.bundle_hash, forward.checksum);
    }

    #[test]
    fn bundle_creation_backfills_membership() {
        let (mut trail, ids) = trail_with_entries();
        let bundle = trail
            .create_audit_bundle("Review", "weekly review", &ids, None)
            .unwrap();

        assert_eq!(bundle.entry_count, 3);
        assert!(bundle.id.starts_with("bundle_"));
        assert_eq!(trail.entries_by_bundle(&bundle.id).len(), 3);
        for id in &ids {
            assert_eq!(
                trail.get_audit_entry(id).unwrap().bundle_id.as_deref(),
                Some(bundle.id.as_str())
            );
        }
        for entry in &bundle.entries {
            assert_eq!(entry.bundle_id.as_deref(), Some(bundle.id.as_str()));
        }
    }

    #[test]
    fn bundle_verification_detects_checksum_drift() {
        let (mut trail, ids) = trail_with_entries();
        let bundle = trail
            .create_audit_bundle("Review", "desc", &ids, None)
            .unwrap();

        let verification = trail.verify_audit_bundle_integrity(&bundle.id);
        assert!(verification.valid);
        assert!(verification.checksum_valid);
        assert!(verification.all_entries_valid);
        assert_eq!(verification.entry_verifications.len(), 3);

        // Corrupt the stored bundle checksum.
        if let Some(stored) = trail.bundles.get_mut(&bundle.id) {
            stored.checksum = "0".repeat(64);
        }
        let verification = trail.verify_audit_bundle_integrity(&bundle.id);
        assert!(!verification.valid);
        assert!(!verification.checksum_valid);
        assert!(verification.all_entries_valid);
    }

    #[test]
    fn bundle_requires_known_valid_entries() {
        let (mut trail, _) = trail_with_entries();
        assert!(trail
            .create_audit_bundle("X", "d", &["aud_missing".to_string()], None)
            .is_err());
        assert!(trail.create_audit_bundle("", "d", &[], None).is_err());
    }

    #[test]
    fn tampered_entries_fail_entry_and_bundle_verification() {
        let (mut trail, ids) = trail_with_entries();
        let bundle = trail
            .create_audit_bundle("Review", "desc", &ids, None)
            .unwrap();

        let mut entry = trail.store.remove(&ids[1]).unwrap();
        entry.details = json!({"rule": "forged"});
        trail.store.insert(ids[1].clone(), entry);

        assert!(!trail.verify_audit_entry_integrity(&ids[1]).valid);
        let verification = trail.verify_audit_bundle_integrity(&bundle.id);
        assert!(!verification.valid);
        assert!(!verification.all_entries_valid);
    }

    #[test]
    fn report_counts_by_user_action_and_time() {
        let (trail, _) = trail_with_entries();
        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now() + chrono::Duration::hours(1);

        let report = trail.generate_audit_report(start, end, true);
        assert!(report.report_id.starts_with("report_"));
        assert_eq!(report.total_entries, 3);

        let stats = report.statistics.unwrap();
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.unique_actions, 2);
        assert_eq!(stats.by_user.get("alice"), Some(&2));
        assert_eq!(stats.by_action.get("bundle_created"), Some(&2));
        assert_eq!(stats.by_day.len(), 1);

        let empty = trail.generate_audit_report(start, start, false);
        assert_eq!(empty.total_entries, 0);
        assert!(empty.statistics.is_none());
    }

    #[test]
    fn export_shapes() {
        let (mut trail, ids) = trail_with_entries();
        let bundle = trail
            .create_audit_bundle("Review", "desc", &ids[..2], None)
            .unwrap();

        let csv = trail
            .export_audit_trail(ExportFormat::Csv, Some(&ids), None)
            .unwrap();
        assert!(csv.starts_with("ID,Timestamp,Action,User,Bundle ID,Details,Hash"));

        let xml = trail
            .export_audit_trail(ExportFormat::Xml, None, Some(&bundle.id))
            .unwrap();
        assert!(xml.contains("<audit_trail>"));
        assert!(xml.contains("<entry>"));
        assert!(xml.contains(&format!("<bundle_id>{}</bundle_id>", bundle.id)));

        let json_all = trail
            .export_audit_trail(ExportFormat::Json, None, None)
            .unwrap();
        let parsed: Vec<AuditEntry> = serde_json::from_str(&json_all).unwrap();
        assert_eq!(parsed.len(), 3);

        assert!(trail
            .export_audit_trail(ExportFormat::Json, Some(&["nope".to_string()]), None)
            .is_err());
    }

    #[test]
    fn search_and_statistics() {
        let (mut trail, ids) = trail_with_entries();
        trail
            .create_audit_bundle("Review", "desc", &ids[..1], None)
            .unwrap();

        let mut query = Map::new();
        query.insert("user".to_string(), json!("alice"));
        query.insert("details.bundle".to_string(), json!("b1"));
        assert_eq!(trail.search_entries(&query).len(), 1);

        let stats = trail.statistics();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.total_bundles, 1);
        assert_eq!(stats.by_user.get("alice"), Some(&2));
        assert!(stats.oldest_entry.is_some());
    }
}
