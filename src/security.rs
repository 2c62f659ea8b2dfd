//! Field security validation
//!
//! Two-tier injection screening for import records. The overwhelming
//! majority of fields in a bulk import are ordinary data (names, prices,
//! descriptions) and get a short pattern list targeting unambiguous
//! injection syntax. Fields whose *name* marks them as carriers of query
//! text (`query`, `sql`, ...) get the exhaustive list on top.
//!
//! Running the exhaustive list on every field is exactly what this split
//! exists to avoid: it collapses throughput and rejects benign values —
//! an ordinary text field ending in two hyphens is not a SQL comment.
//!
//! The validator is stateless and side-effect-free; concurrent workers
//! share one instance without locking. Rule tables are compiled once at
//! process start.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::warn;

use crate::config::SecuritySettings;
use crate::db::types::{FieldValue, Record};

/// Sensitivity classification of a field name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTier {
    /// Ordinary data field: short pattern list
    Standard,
    /// Field that can itself contain executable query text: exhaustive list
    Critical,
}

/// Per-field check outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected {
        /// Identifier of the rule that fired
        rule: &'static str,
    },
}

/// A record-level rejection: the offending field and rule, never the value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRejection {
    /// Name of the field that failed its check
    pub field: String,
    /// Identifier of the rule that fired
    pub rule: &'static str,
}

/// A named pattern in one of the static rule tables
struct SecurityRule {
    id: &'static str,
    pattern: Regex,
}

impl SecurityRule {
    fn new(id: &'static str, pattern: &str) -> Self {
        Self {
            id,
            // Table patterns are literals compiled at startup
            pattern: Regex::new(pattern).expect("invalid built-in security pattern"),
        }
    }
}

/// Patterns every field is checked against: a statement terminator followed
/// by a comment marker, a set-combination sequence, or a destructive
/// statement, plus plain script-injection markers.
static STANDARD_RULES: LazyLock<Vec<SecurityRule>> = LazyLock::new(|| {
    vec![
        SecurityRule::new("stacked_comment", r";\s*--"),
        SecurityRule::new("stacked_union_select", r"(?i);\s*union(\s+all)?\s+select\b"),
        SecurityRule::new("stacked_destructive", r"(?i);\s*(drop|delete|truncate)\b"),
        SecurityRule::new("script_injection", r"(?i)<script|javascript:"),
    ]
});

/// Additional patterns for critical-tier fields: embedded comment blocks,
/// stacked DDL, embedded UPDATE statements, and dangerous call names.
static CRITICAL_RULES: LazyLock<Vec<SecurityRule>> = LazyLock::new(|| {
    vec![
        SecurityRule::new(
            "stacked_table_ddl",
            r"(?i);\s*(drop|delete|truncate|alter)\s+table\b",
        ),
        SecurityRule::new("block_comment", r"/\*|\*/"),
        SecurityRule::new("embedded_update", r"(?i)\bupdate\s+\w+\s+set\b"),
        SecurityRule::new("dangerous_call", r"(?i)\b(exec|execute|eval)\s*\("),
    ]
});

/// Two-tier field validator
#[derive(Debug, Clone)]
pub struct FieldValidator {
    critical_fields: HashSet<String>,
    max_value_len: usize,
}

impl FieldValidator {
    /// Build a validator from settings
    pub fn new(settings: &SecuritySettings) -> Self {
        Self {
            critical_fields: settings
                .critical_fields
                .iter()
                .map(|f| f.to_ascii_lowercase())
                .collect(),
            max_value_len: settings.max_value_len,
        }
    }

    /// Classify a field name into its sensitivity tier
    pub fn classify(&self, field: &str) -> FieldTier {
        if self.critical_fields.contains(&field.to_ascii_lowercase()) {
            FieldTier::Critical
        } else {
            FieldTier::Standard
        }
    }

    /// Check a single field value against its tier's rule tables
    pub fn check(&self, field: &str, value: &str) -> Verdict {
        if value.len() > self.max_value_len {
            return Verdict::Rejected {
                rule: "value_too_long",
            };
        }

        for rule in STANDARD_RULES.iter() {
            if rule.pattern.is_match(value) {
                return Verdict::Rejected { rule: rule.id };
            }
        }

        if self.classify(field) == FieldTier::Critical {
            for rule in CRITICAL_RULES.iter() {
                if rule.pattern.is_match(value) {
                    return Verdict::Rejected { rule: rule.id };
                }
            }
        }

        Verdict::Accepted
    }

    /// Check a whole record; the first failing field rejects it.
    ///
    /// Only text values are scanned (numbers, booleans and NULLs cannot
    /// carry statement fragments). The rejection names the field and rule
    /// but never the value, so audit logs cannot leak the input.
    pub fn validate_record(&self, record: &Record) -> Option<FieldRejection> {
        for (name, value) in record.fields() {
            if let FieldValue::Text(text) = value {
                if let Verdict::Rejected { rule } = self.check(name, text) {
                    warn!(field = name, rule, "record rejected by field check");
                    return Some(FieldRejection {
                        field: name.to_string(),
                        rule,
                    });
                }
            }
        }
        None
    }
}

/// Validate a SQL identifier (table or column name).
///
/// Must start with an ASCII letter or underscore, continue with ASCII
/// alphanumerics or underscores, and fit in PostgreSQL's 63-byte
/// identifier limit. Char iteration instead of a regex keeps this
/// allocation-free on the per-column path.
pub fn validate_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
