// End-to-end scenarios across the whole SDK: bundle loading, rule
// execution, evidence chains and audit bundles.

use serde_json::json;

use glassbox::{
    sha256_hex, AuditTrail, DecisionBundle, DecisionBundleBuilder, Domain, EvidenceManager,
    EvidenceType, ExecutionContext, ExportFormat, Rule, RuleEngine,
};

fn dsl_rule(id: &str, dsl: &str) -> Rule {
    Rule {
        id: id.to_string(),
        name: format!("rule {id}"),
        rule_type: "dsl".to_string(),
        definition: json!({ "dsl": dsl }),
        description: None,
        severity: None,
        category: None,
    }
}

fn single_rule_bundle(rule: Rule) -> DecisionBundle {
    DecisionBundleBuilder::new()
        .name("Integration Bundle")
        .description("integration test bundle")
        .jurisdiction("TEST")
        .domain(Domain::General)
        .add_rule(rule)
        .build()
        .unwrap()
}

#[test]
fn gdpr_consent_rule_passes() {
    let bundle = single_rule_bundle(dsl_rule(
        "gdpr-consent",
        "WHEN consent.processing_data THEN MUST consent.given = TRUE \
         AND consent.specific = TRUE AND consent.informed = TRUE",
    ));
    let mut context = ExecutionContext::new(json!({
        "consent": {
            "processing_data": true,
            "given": true,
            "specific": true,
            "informed": true,
        }
    }));

    let report = RuleEngine::new().execute_bundle(&bundle, &mut context);

    assert!(report.overall_result);
    assert_eq!(report.rules_passed, 1);
    assert!(report.rule_results[0].result);
}

#[test]
fn aml_high_risk_transaction_is_flagged() {
    let bundle = single_rule_bundle(dsl_rule(
        "aml-flag",
        "WHEN transaction.amount > 10000 AND transaction.country IN ['IR','KP','SY'] \
         THEN DO FLAG transaction",
    ));
    let mut context = ExecutionContext::new(json!({
        "transaction": {"amount": 25000, "country": "IR"}
    }));

    let report = RuleEngine::new().execute_bundle(&bundle, &mut context);

    assert!(report.overall_result);
    let result = &report.rule_results[0];
    assert!(result.result);
    assert_eq!(
        result.details["evaluation"]["details"]["action"]["action_type"],
        json!("FLAG")
    );
}

#[test]
fn inapplicable_rule_passes_with_condition_not_met() {
    let bundle = single_rule_bundle(dsl_rule(
        "age-gate",
        "WHEN user.age >= 18 THEN MUST account.is_active = TRUE",
    ));
    let mut context = ExecutionContext::new(json!({
        "user": {"age": 16},
        "account": {"is_active": false},
    }));

    let report = RuleEngine::new().execute_bundle(&bundle, &mut context);

    assert!(report.overall_result);
    assert_eq!(report.rule_results[0].reason, "Condition not met");
}

#[test]
fn regex_condition_enforces_verification() {
    let bundle = single_rule_bundle(dsl_rule(
        "bank-email",
        r"WHEN email MATCHES '.*@bank\.com' THEN MUST user.is_verified = TRUE",
    ));
    let mut context = ExecutionContext::new(json!({
        "email": "x@bank.com",
        "user": {"is_verified": false},
    }));

    let report = RuleEngine::new().execute_bundle(&bundle, &mut context);

    assert!(!report.overall_result);
    assert!(!report.rule_results[0].result);
}

#[test]
fn tampered_evidence_is_detected_after_import() {
    let mut manager = EvidenceManager::new();
    let record = manager
        .create_evidence(
            EvidenceType::UserInput,
            json!({"consent": true, "user_id": "u-1"}),
            "consent_portal",
            None,
        )
        .unwrap();

    let export = manager
        .export_evidence(&[record.id.clone()], ExportFormat::Json)
        .unwrap();

    // Mutate the content outside the manager, then re-import.
    let tampered = export.replace("\"consent\": true", "\"consent\": false");
    assert_ne!(export, tampered);

    let mut other = EvidenceManager::new();
    other.import_evidence(&tampered).unwrap();

    let report = other.verify_evidence_integrity(&record.id);
    assert!(!report.valid);
    assert_eq!(report.reason, "Hashes do not match");

    // The untampered export still verifies.
    let mut clean = EvidenceManager::new();
    clean.import_evidence(&export).unwrap();
    assert!(clean.verify_evidence_integrity(&record.id).valid);
}

#[test]
fn audit_bundle_checksum_matches_sorted_member_hashes() {
    let mut trail = AuditTrail::new();
    let ids: Vec<String> = (0..3)
        .map(|i| {
            trail
                .create_audit_entry(
                    "workflow_step",
                    "system",
                    json!({"step": i}),
                    None,
                    None,
                )
                .unwrap()
                .id
        })
        .collect();

    let bundle = trail
        .create_audit_bundle("Workflow", "three steps", &ids, None)
        .unwrap();

    // Recompute the checksum independently over the member hashes in
    // timestamp order.
    let mut entries: Vec<_> = ids
        .iter()
        .map(|id| trail.get_audit_entry(id).unwrap())
        .collect();
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let concatenated: String = entries.iter().map(|e| e.hash.as_str()).collect();
    assert_eq!(bundle.checksum, sha256_hex(&concatenated));
    assert_eq!(bundle.bundle_hash, bundle.checksum);

    let verification = trail.verify_audit_bundle_integrity(&bundle.id);
    assert!(verification.valid);
    assert!(verification.checksum_valid);
    assert!(verification.all_entries_valid);
}

#[test]
fn invalid_bundles_fail_before_any_rule_runs() {
    let invalid_domain = json!({
        "version": "1.0",
        "metadata": {
            "id": "b", "name": "n", "description": "d",
            "created": "2024-05-01T12:00:00+00:00",
            "jurisdiction": "TEST", "domain": "space",
        },
        "rules": [],
        "decisions": [],
    });
    assert!(DecisionBundle::from_value(invalid_domain).is_err());

    let invalid_version = json!({
        "version": "2.0",
        "metadata": {
            "id": "b", "name": "n", "description": "d",
            "created": "2024-05-01T12:00:00+00:00",
            "jurisdiction": "TEST", "domain": "general",
        },
        "rules": [],
        "decisions": [],
    });
    assert!(DecisionBundle::from_value(invalid_version).is_err());
}

#[test]
fn bundle_roundtrips_through_file() {
    let bundle = DecisionBundleBuilder::new()
        .name("File Roundtrip")
        .description("d")
        .jurisdiction("TEST")
        .domain(Domain::Finance)
        .add_rule(dsl_rule("r1", "WHEN a THEN MUST b = TRUE"))
        .build()
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip_bundle.json");
    std::fs::write(&path, bundle.to_json().unwrap()).unwrap();

    let reloaded = DecisionBundle::from_file(&path).unwrap();
    assert_eq!(reloaded.metadata.id, bundle.metadata.id);
    assert_eq!(reloaded.metadata.domain, Domain::Finance);
    assert_eq!(reloaded.rules.len(), 1);
    assert_eq!(
        serde_json::to_value(&reloaded).unwrap(),
        serde_json::to_value(&bundle).unwrap()
    );
}

#[test]
fn repeated_execution_is_deterministic_and_cached() {
    let rule = dsl_rule("cache-me", "WHEN a.n > 1 THEN MUST a.ok = TRUE");
    let mut engine = RuleEngine::new();

    let mut first = ExecutionContext::new(json!({"a": {"n": 5, "ok": true}}));
    let mut second = ExecutionContext::new(json!({"a": {"n": 5, "ok": true}}));

    let first_result = engine.execute_rule(&rule, &mut first).unwrap();
    let second_result = engine.execute_rule(&rule, &mut second).unwrap();

    assert_eq!(first_result.result, second_result.result);
    assert_eq!(first_result.reason, second_result.reason);
    assert!(!first_result.cached);
    assert!(second_result.cached);
}

#[test]
fn complete_compliance_workflow() {
    let mut evidence_manager = EvidenceManager::new();
    let mut audit_trail = AuditTrail::new();
    let mut engine = RuleEngine::new();

    let audit_entry = audit_trail
        .create_audit_entry(
            "workflow_started",
            "system",
            json!({"workflow": "consent_check"}),
            None,
            None,
        )
        .unwrap();

    let evidence = evidence_manager
        .create_evidence(
            EvidenceType::UserInput,
            json!({"consent": true, "user_id": "test_user"}),
            "consent_portal",
            None,
        )
        .unwrap();

    let bundle = single_rule_bundle(dsl_rule(
        "consent-verification",
        "WHEN user.consent_given THEN MUST user.consent_valid = TRUE",
    ));
    let mut context = ExecutionContext::new(json!({
        "user": {"consent_given": true, "consent_valid": true}
    }));

    let report = engine.execute_bundle(&bundle, &mut context);
    assert!(report.overall_result);
    assert_eq!(report.rules_passed, 1);

    audit_trail
        .create_audit_entry(
            "bundle_executed",
            "system",
            json!({
                "bundle_id": report.bundle_id,
                "execution_id": report.execution_id,
                "overall_result": report.overall_result,
            }),
            None,
            None,
        )
        .unwrap();

    let audit_bundle = audit_trail
        .create_audit_bundle("Consent Workflow", "full run", &[audit_entry.id.clone()], None)
        .unwrap();
    assert!(audit_trail
        .verify_audit_bundle_integrity(&audit_bundle.id)
        .valid);
    assert!(evidence_manager
        .verify_evidence_integrity(&evidence.id)
        .valid);

    let chain = evidence_manager
        .create_evidence_chain(&[evidence.id.clone()])
        .unwrap();
    assert_eq!(chain.evidence_count, 1);

    let stats = audit_trail.statistics();
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.total_bundles, 1);
}

#[test]
fn expression_and_structured_rules_run_in_one_bundle() {
    let expression_rule = Rule {
        id: "expr".to_string(),
        name: "age and active".to_string(),
        rule_type: "expression".to_string(),
        definition: json!({
            "expression": "user.age >= 18 and account.is_active == true",
            "variables": {"user.age": "number", "account.is_active": "boolean"},
        }),
        description: None,
        severity: None,
        category: None,
    };
    let table_rule = Rule {
        id: "table".to_string(),
        name: "amount gate".to_string(),
        rule_type: "decision_table".to_string(),
        definition: json!({"table": {
            "conditions": [
                {"field": "transaction.amount", "operator": "<=", "value": 50000},
            ],
            "actions": [{"result": true, "reason": "within limits"}],
        }}),
        description: None,
        severity: None,
        category: None,
    };
    let tree_rule = Rule {
        id: "tree".to_string(),
        name: "country gate".to_string(),
        rule_type: "decision_tree".to_string(),
        definition: json!({"tree": {
            "condition": {"field": "transaction.country", "operator": "=", "value": "US"},
            "true_branch": {"result": true, "reason": "domestic"},
            "false_branch": {"result": false, "reason": "needs review"},
        }}),
        description: None,
        severity: None,
        category: None,
    };

    let bundle = DecisionBundleBuilder::new()
        .name("Mixed")
        .description("mixed rule types")
        .jurisdiction("TEST")
        .add_rule(expression_rule)
        .add_rule(table_rule)
        .add_rule(tree_rule)
        .build()
        .unwrap();

    let mut context = ExecutionContext::new(json!({
        "user": {"age": 25},
        "account": {"is_active": true},
        "transaction": {"amount": 12000, "country": "US"},
    }));

    let report = RuleEngine::new().execute_bundle(&bundle, &mut context);
    assert_eq!(report.rules_executed, 3);
    assert_eq!(report.rules_passed, 3);
    assert!(report.overall_result);
}
