// GlassBox: a compliance rule engine. DecisionBundles carry declarative
// rules (DSL, infix expressions, decision tables, decision trees); the
// engine evaluates them against caller-supplied context data while the
// evidence and audit managers keep tamper-evident records of what ran.

pub mod ast;
pub mod audit;
pub mod bundle;
pub mod canonical;
pub mod decision_table;
pub mod decision_tree;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod evidence;
pub mod export;
pub mod expression;
pub mod parser;
pub mod storage;
pub mod tokenizer;
pub mod value;

pub use error::{GlassBoxError, Result};

pub use canonical::{
    canonicalize, content_hash, md5_hex, parse_iso, sha256_hex, utc_now_iso, VerificationReport,
};

pub use bundle::{
    AuditHeader, BundleMetadata, Decision, DecisionBundle, DecisionBundleBuilder, Domain, Rule,
    BUNDLE_VERSION, VALID_DOMAINS, VALID_RULE_TYPES,
};

pub use tokenizer::{tokenize, Token, TokenKind, KEYWORDS, TIME_UNITS};

pub use ast::{
    ActionNode, ActionType, BoolOp, CompareOp, Condition, Consequence, PatternOp, RequirementKind,
    RuleAst, RuleBody, TemporalOp, ValueNode, VariableRef,
};

pub use parser::DslParser;

pub use evaluator::{DslEvaluator, EvalOutcome};

pub use expression::{ExpressionEvaluator, ExpressionOutcome};

pub use decision_table::{evaluate_table, TableCondition, TableDefinition, TableOutcome};

pub use decision_tree::{traverse_tree, TreeOutcome};

pub use engine::{
    CacheStats, ExecutionContext, ExecutionReport, RuleEngine, RuleHandler, RuleOutcome,
    RuleResult,
};

pub use storage::{MemoryBackend, StorageBackend};

pub use export::ExportFormat;

pub use evidence::{
    ChainLink, EvidenceChain, EvidenceManager, EvidenceRecord, EvidenceStatistics, EvidenceType,
};

pub use audit::{
    bundle_checksum, AuditBundle, AuditEntry, AuditReport, AuditStatistics, AuditTrail,
    BundleVerification, TrailStatistics,
};
