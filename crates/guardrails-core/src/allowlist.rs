use crate::error::AllowlistFormatError;
use crate::report::{Evidence, Finding, Severity};
use crate::rules::env_secret;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

/// Default allowlist file name, looked up in the working directory.
pub const DEFAULT_ALLOWLIST: &str = ".guardrails-allow.json";

pub const EXPIRED_RULE: &str = "allowlist_expired";

/// Legacy names carry their expiry as `NAME__EXP_YYYY-MM-DD`.
const EXPIRY_MARKER: &str = "__EXP_";

/// A time-boxed exception for one environment or source key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowlistEntry {
    pub key: String,
    pub reason: Option<String>,
    pub owner: Option<String>,
    /// Raw expiry text as written in the document.
    pub expires_at: Option<String>,
    /// Position in the document, e.g. `env_names[2]`.
    pub location: String,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    key: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default, rename = "expiresAt", alias = "expires_at")]
    expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "kebab-case")]
pub enum EntryStatus {
    Active(NaiveDate),
    Expired(NaiveDate),
    MissingExpiry,
    InvalidExpiry(String),
}

impl EntryStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, EntryStatus::Active(_))
    }

    pub fn describe(&self) -> String {
        match self {
            EntryStatus::Active(date) => format!("active until {}", date),
            EntryStatus::Expired(date) => format!("expired on {}", date),
            EntryStatus::MissingExpiry => "no expiry date".to_string(),
            EntryStatus::InvalidExpiry(raw) => format!("invalid expiry '{}'", raw),
        }
    }
}

impl AllowlistEntry {
    /// Active only when the expiry parses and is strictly after `today`.
    pub fn status(&self, today: NaiveDate) -> EntryStatus {
        let Some(raw) = self.expires_at.as_deref() else {
            return EntryStatus::MissingExpiry;
        };
        match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
            Ok(date) if date > today => EntryStatus::Active(date),
            Ok(date) => EntryStatus::Expired(date),
            Err(_) => EntryStatus::InvalidExpiry(raw.to_string()),
        }
    }

    /// Case-insensitive match against an environment key or a finding id.
    pub fn matches(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }

    fn from_legacy_name(name: &str, location: String) -> Self {
        let upper = name.to_ascii_uppercase();
        let (key, expires_at) = match upper.find(EXPIRY_MARKER) {
            Some(pos) => (
                name[..pos].to_string(),
                Some(name[pos + EXPIRY_MARKER.len()..].to_string()),
            ),
            None => (name.to_string(), None),
        };
        Self {
            key,
            reason: None,
            owner: None,
            expires_at,
            location,
        }
    }
}

/// A parsed allowlist. Format problems are kept as data, never raised.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    pub source: String,
    pub entries: Vec<AllowlistEntry>,
    pub errors: Vec<AllowlistFormatError>,
}

impl Allowlist {
    /// Load an allowlist file. A missing file is an empty allowlist.
    pub fn load(path: &Path) -> Self {
        let source = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, &source),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %source, "no allowlist file");
                Self {
                    source,
                    ..Self::default()
                }
            }
            Err(e) => Self {
                errors: vec![format_error(&source, format!("cannot read file: {}", e))],
                source,
                ..Self::default()
            },
        }
    }

    /// Parse any of the accepted document shapes.
    pub fn parse(content: &str, source: &str) -> Self {
        let mut allowlist = Self {
            source: source.to_string(),
            ..Self::default()
        };
        let doc: Value = match serde_json::from_str(content) {
            Ok(doc) => doc,
            Err(e) => {
                allowlist
                    .errors
                    .push(format_error(source, format!("not valid JSON: {}", e)));
                return allowlist;
            }
        };

        match &doc {
            Value::Array(items) => allowlist.parse_items(items, ""),
            Value::Object(map) => {
                let mut recognised = false;
                if let Some(entries) = map.get("entries") {
                    recognised = true;
                    allowlist.parse_list(entries, "entries");
                }
                if let Some(names) = map.get("env_names") {
                    recognised = true;
                    allowlist.parse_list(names, "env_names");
                }
                if !recognised {
                    allowlist.errors.push(format_error(
                        source,
                        "expected 'entries' or 'env_names'".to_string(),
                    ));
                }
            }
            _ => allowlist
                .errors
                .push(format_error(source, "unrecognized allowlist document".to_string())),
        }

        if !allowlist.errors.is_empty() {
            warn!(
                path = %source,
                errors = allowlist.errors.len(),
                "allowlist contains malformed entries"
            );
        }
        allowlist
    }

    fn parse_list(&mut self, value: &Value, field: &str) {
        match value {
            Value::Array(items) => self.parse_items(items, field),
            Value::String(name) => self
                .entries
                .push(AllowlistEntry::from_legacy_name(name, field.to_string())),
            _ => self.errors.push(format_error(
                field,
                "expected a list of names or entries".to_string(),
            )),
        }
    }

    fn parse_items(&mut self, items: &[Value], field: &str) {
        for (i, item) in items.iter().enumerate() {
            let location = format!("{}[{}]", field, i);
            match item {
                Value::String(name) if !name.trim().is_empty() => self
                    .entries
                    .push(AllowlistEntry::from_legacy_name(name, location)),
                Value::Object(_) => match serde_json::from_value::<RawEntry>(item.clone()) {
                    Ok(raw) if !raw.key.trim().is_empty() => self.entries.push(AllowlistEntry {
                        key: raw.key,
                        reason: raw.reason,
                        owner: raw.owner,
                        expires_at: raw.expires_at,
                        location,
                    }),
                    Ok(_) => self
                        .errors
                        .push(format_error(&location, "empty key".to_string())),
                    Err(e) => self.errors.push(format_error(&location, e.to_string())),
                },
                _ => self.errors.push(format_error(
                    &location,
                    "expected a name or an entry object".to_string(),
                )),
            }
        }
    }

    /// Each entry with its status on `today`, in document order.
    pub fn statuses(&self, today: NaiveDate) -> Vec<(&AllowlistEntry, EntryStatus)> {
        self.entries.iter().map(|e| (e, e.status(today))).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.errors.is_empty()
    }
}

fn format_error(location: &str, message: String) -> AllowlistFormatError {
    AllowlistFormatError {
        location: location.to_string(),
        message,
    }
}

/// Result of applying an allowlist to raw findings.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub findings: Vec<Finding>,
    pub suppressed: usize,
}

/// Suppress secret findings covered by an active entry; surface expired or
/// malformed entries as `allowlist_expired` findings.
pub fn apply(allowlist: &Allowlist, findings: Vec<Finding>, today: NaiveDate) -> FilterOutcome {
    let statuses = allowlist.statuses(today);
    let mut matched = vec![false; statuses.len()];
    let mut kept = Vec::with_capacity(findings.len());
    let mut added = Vec::new();
    let mut suppressed = 0;

    for finding in findings {
        if finding.rule != env_secret::RULE_NAME {
            kept.push(finding);
            continue;
        }

        // Source literals carry no key; their finding id is the only handle.
        let key = finding.evidence.key.as_deref();
        let hits: Vec<usize> = statuses
            .iter()
            .enumerate()
            .filter(|(_, (entry, _))| {
                key.is_some_and(|k| entry.matches(k)) || entry.matches(&finding.id)
            })
            .map(|(i, _)| i)
            .collect();
        if hits.is_empty() {
            kept.push(finding);
            continue;
        }
        for &i in &hits {
            matched[i] = true;
        }

        if hits.iter().any(|&i| statuses[i].1.is_active()) {
            debug!(finding = %finding.id, "suppressed by allowlist");
            suppressed += 1;
            continue;
        }

        let (entry, status) = &statuses[hits[0]];
        added.push(
            Finding::new(
                EXPIRED_RULE,
                Severity::High,
                &finding.resource_id,
                &finding.id,
                format!(
                    "Allowlist entry '{}' for '{}' no longer applies ({})",
                    entry.key,
                    finding.resource_id,
                    status.describe()
                ),
                "Rotate and remove the secret, or renew the entry with an owner, reason and future expiresAt.",
            )
            .with_evidence(Evidence {
                key: Some(entry.key.clone()),
                detector: Some("allowlist".to_string()),
                file: Some(allowlist.source.clone()),
                related_finding: Some(finding.id.clone()),
                ..Evidence::default()
            }),
        );
        kept.push(finding);
    }

    for (i, (entry, status)) in statuses.iter().enumerate() {
        if matched[i] || status.is_active() {
            continue;
        }
        added.push(
            Finding::new(
                EXPIRED_RULE,
                Severity::High,
                "allowlist",
                &entry.location,
                format!("Allowlist entry '{}' is not valid: {}", entry.key, status.describe()),
                "Give every allowlist entry a future expiresAt (YYYY-MM-DD) or remove it.",
            )
            .with_evidence(Evidence {
                key: Some(entry.key.clone()),
                detector: Some("allowlist".to_string()),
                file: Some(allowlist.source.clone()),
                ..Evidence::default()
            }),
        );
    }

    for error in &allowlist.errors {
        added.push(
            Finding::new(
                EXPIRED_RULE,
                Severity::High,
                "allowlist",
                &format!("format:{}", error.location),
                format!("Allowlist is malformed: {}", error),
                "Fix the allowlist document; malformed entries suppress nothing.",
            )
            .with_evidence(Evidence {
                detector: Some("allowlist".to_string()),
                file: Some(allowlist.source.clone()),
                ..Evidence::default()
            }),
        );
    }

    kept.extend(added);
    FilterOutcome {
        findings: kept,
        suppressed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn secret_finding(key: &str) -> Finding {
        Finding::new(
            env_secret::RULE_NAME,
            Severity::High,
            "Fn",
            &format!("env:{}", key),
            "hardcoded",
            "move it",
        )
        .with_evidence(Evidence {
            key: Some(key.to_string()),
            ..Evidence::default()
        })
    }

    fn expanded(expires: &str) -> Allowlist {
        Allowlist::parse(
            &format!(
                r#"{{"entries": [{{"key": "api_key", "reason": "migration", "owner": "team-a", "expiresAt": "{}"}}]}}"#,
                expires
            ),
            "allow.json",
        )
    }

    #[test]
    fn test_future_expiry_suppresses() {
        let outcome = apply(&expanded("2026-10-17"), vec![secret_finding("API_KEY")], today());
        assert_eq!(outcome.suppressed, 1);
        assert!(outcome.findings.is_empty());
    }

    #[test]
    fn test_past_expiry_keeps_finding_and_adds_expired() {
        let outcome = apply(&expanded("2026-10-15"), vec![secret_finding("API_KEY")], today());
        assert_eq!(outcome.suppressed, 0);
        assert_eq!(outcome.findings.len(), 2);
        assert_eq!(outcome.findings[0].rule, env_secret::RULE_NAME);
        let expired = &outcome.findings[1];
        assert_eq!(expired.rule, EXPIRED_RULE);
        assert_eq!(expired.severity, Severity::High);
        assert_eq!(
            expired.evidence.related_finding.as_deref(),
            Some("env_secret::Fn::env:API_KEY")
        );
    }

    #[test]
    fn test_expiry_today_is_not_active() {
        let outcome = apply(&expanded("2026-10-16"), vec![secret_finding("API_KEY")], today());
        assert_eq!(outcome.suppressed, 0);
    }

    #[test]
    fn test_legacy_names() {
        let allowlist = Allowlist::parse(
            r#"{"env_names": ["LEGACY_TOKEN", "DB_PASSWORD__EXP_2027-01-31", "OLD__exp_2020-01-01"]}"#,
            "allow.json",
        );
        let statuses = allowlist.statuses(today());
        assert_eq!(statuses[0].1, EntryStatus::MissingExpiry);
        assert_eq!(statuses[1].0.key, "DB_PASSWORD");
        assert!(statuses[1].1.is_active());
        assert_eq!(statuses[2].0.key, "OLD");
        assert!(matches!(statuses[2].1, EntryStatus::Expired(_)));

        let outcome = apply(
            &allowlist,
            vec![secret_finding("db_password"), secret_finding("LEGACY_TOKEN")],
            today(),
        );
        assert_eq!(outcome.suppressed, 1);
        let expired: Vec<&str> = outcome
            .findings
            .iter()
            .filter(|f| f.rule == EXPIRED_RULE)
            .map(|f| f.resource_id.as_str())
            .collect();
        // LEGACY_TOKEN matched a finding; OLD matched nothing.
        assert_eq!(expired, vec!["Fn", "allowlist"]);
    }

    #[test]
    fn test_expanded_entries_inside_env_names_and_top_level_array() {
        let nested = Allowlist::parse(
            r#"{"env_names": [{"key": "A", "expiresAt": "2030-01-01"}]}"#,
            "a.json",
        );
        assert_eq!(nested.entries.len(), 1);
        let array = Allowlist::parse(
            r#"[{"key": "B", "owner": "ops", "expires_at": "2030-01-01"}, "C__EXP_2030-02-02"]"#,
            "b.json",
        );
        assert_eq!(array.entries.len(), 2);
        assert_eq!(array.entries[0].owner.as_deref(), Some("ops"));
        assert!(array.errors.is_empty());
    }

    #[test]
    fn test_malformed_documents_become_findings() {
        let broken = Allowlist::parse("{not json", "allow.json");
        assert_eq!(broken.errors.len(), 1);
        let outcome = apply(&broken, vec![secret_finding("X")], today());
        assert_eq!(outcome.findings.len(), 2);
        assert_eq!(outcome.findings[1].rule, EXPIRED_RULE);

        let bad_entries = Allowlist::parse(r#"{"entries": [42, {"reason": "no key"}]}"#, "a.json");
        assert_eq!(bad_entries.errors.len(), 2);
        assert_eq!(bad_entries.errors[0].location, "entries[0]");
    }

    #[test]
    fn test_invalid_date_does_not_suppress() {
        let outcome = apply(&expanded("next tuesday"), vec![secret_finding("API_KEY")], today());
        assert_eq!(outcome.suppressed, 0);
        assert!(outcome.findings[1].message.contains("invalid expiry"));
    }

    #[test]
    fn test_keyless_literal_matched_by_finding_id() {
        let literal = Finding::new(
            env_secret::RULE_NAME,
            Severity::Critical,
            "Fn",
            "app.py:7",
            "hardcoded",
            "move it",
        );
        let allowlist = Allowlist::parse(
            r#"{"entries": [{"key": "env_secret::fn::app.py:7", "owner": "team-a", "expiresAt": "2027-01-01"}]}"#,
            "allow.json",
        );
        let outcome = apply(&allowlist, vec![literal.clone()], today());
        assert_eq!(outcome.suppressed, 1);
        assert!(outcome.findings.is_empty());

        let outcome = apply(&expanded("2030-01-01"), vec![literal], today());
        assert_eq!(outcome.suppressed, 0);
        assert_eq!(outcome.findings.len(), 1);
    }

    #[test]
    fn test_other_rules_are_untouched() {
        let iam = Finding::new("iam_leastpriv", Severity::Critical, "Role", "s0", "m", "r")
            .with_evidence(Evidence {
                key: Some("API_KEY".into()),
                ..Evidence::default()
            });
        let outcome = apply(&expanded("2030-01-01"), vec![iam], today());
        assert_eq!(outcome.suppressed, 0);
        assert_eq!(outcome.findings.len(), 1);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let allowlist = Allowlist::load(Path::new("/nonexistent/.guardrails-allow.json"));
        assert!(allowlist.is_empty());
    }
}
