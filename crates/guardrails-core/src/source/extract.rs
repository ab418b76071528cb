use super::SourceOrigin;
use regex::Regex;
use std::sync::LazyLock;

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:export\s+)?["']?([A-Za-z_][A-Za-z0-9_.\-]*)["']?\s*[:=]\s*(.*?)\s*[,;]?\s*$"#)
        .expect("assignment pattern is valid")
});

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)*)"|'((?:[^'\\]|\\.)*)'"#).expect("literal pattern is valid")
});

/// A candidate value found on one line of a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineExtract {
    pub origin: SourceOrigin,
    pub key: Option<String>,
    pub value: String,
}

/// Extract assignment-like declarations and quoted literals from a single line.
pub fn extract_line(line: &str, min_literal_length: usize) -> Vec<LineExtract> {
    let mut found = Vec::new();

    if let Some(caps) = ASSIGNMENT.captures(line) {
        let key = &caps[1];
        let raw = &caps[2];
        if let Some(value) = declared_value(raw) {
            found.push(LineExtract {
                origin: SourceOrigin::EnvDeclaration,
                key: Some(key.to_string()),
                value,
            });
        }
    }

    for caps in QUOTED.captures_iter(line) {
        let Some(literal) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let literal = literal.as_str();
        if literal.chars().count() < min_literal_length {
            continue;
        }
        if !found.iter().any(|e| e.value == literal) {
            found.push(LineExtract {
                origin: SourceOrigin::Literal,
                key: None,
                value: literal.to_string(),
            });
        }
    }

    found
}

/// The right-hand side of an assignment, if it is a single quoted string or a bare token.
fn declared_value(raw: &str) -> Option<String> {
    if raw.is_empty() || raw.starts_with('=') {
        return None;
    }
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            let inner = &raw[1..raw.len() - 1];
            if inner.contains(quote) {
                return None;
            }
            return Some(inner.to_string());
        }
    }
    let bare = raw
        .chars()
        .all(|c| !c.is_whitespace() && !"()[]{},\"'#".contains(c));
    bare.then(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_constant_is_one_declaration() {
        let found = extract_line(r#"HARDCODED_ACCESS_KEY = "AKIAEXAMPLE1234567890AB""#, 8);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].origin, SourceOrigin::EnvDeclaration);
        assert_eq!(found[0].key.as_deref(), Some("HARDCODED_ACCESS_KEY"));
        assert_eq!(found[0].value, "AKIAEXAMPLE1234567890AB");
    }

    #[test]
    fn test_dotenv_and_export_forms() {
        let dotenv = extract_line("DB_PASSWORD=hunter2", 8);
        assert_eq!(dotenv[0].key.as_deref(), Some("DB_PASSWORD"));
        assert_eq!(dotenv[0].value, "hunter2");

        let export = extract_line("export API_TOKEN='abc123'", 8);
        assert_eq!(export[0].key.as_deref(), Some("API_TOKEN"));
        assert_eq!(export[0].value, "abc123");
    }

    #[test]
    fn test_yaml_and_json_keys() {
        let yaml = extract_line("  password: changeme", 8);
        assert_eq!(yaml[0].key.as_deref(), Some("password"));

        let json = extract_line(r#"  "apiKey": "k-1234567890","#, 8);
        assert_eq!(json.len(), 1);
        assert_eq!(json[0].key.as_deref(), Some("apiKey"));
        assert_eq!(json[0].value, "k-1234567890");
    }

    #[test]
    fn test_expressions_are_not_declarations() {
        let found = extract_line(
            r#"    api_key = os.environ.get("API_KEY", HARDCODED_ACCESS_KEY)"#,
            4,
        );
        assert!(found.iter().all(|e| e.origin == SourceOrigin::Literal));
        assert_eq!(found[0].value, "API_KEY");

        assert!(extract_line("if a == b:", 1).is_empty());
    }

    #[test]
    fn test_short_literals_are_skipped() {
        let found = extract_line(r#"print("hi", 'a longer literal')"#, 8);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "a longer literal");
    }
}
