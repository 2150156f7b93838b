//! Conjunctive filter expressions for vector search
//!
//! The pipelines talk to the vector store through an opaque expression
//! string such as:
//!
//! ```text
//! tenant_user_id == "u1" && kb_id == 3 && source_type in ["chat_private"]
//! ```
//!
//! String literals are JSON-encoded, so any value round-trips. Each backend
//! parses the string back into [`FilterExpr`] and evaluates it natively.

use super::VectorSearchHit;
use crate::error::{Error, Result};
use qdrant_client::qdrant::{Condition, Filter};
use std::fmt;
use std::sync::OnceLock;

/// A literal on the right-hand side of `==`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Str(String),
    Int(i64),
}

/// One conjunct
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Eq(String, FilterValue),
    In(String, Vec<String>),
}

/// A conjunction of clauses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExpr {
    clauses: Vec<Clause>,
}

fn clause_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r#"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(==|in)\s*("(?:[^"\\]|\\.)*"|-?\d+|\[(?:\s*"(?:[^"\\]|\\.)*"\s*,?)*\s*\])\s*(&&|$)"#,
        )
        .expect("valid clause regex")
    })
}

impl FilterExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq_str(mut self, field: &str, value: &str) -> Self {
        self.clauses
            .push(Clause::Eq(field.to_string(), FilterValue::Str(value.to_string())));
        self
    }

    pub fn eq_int(mut self, field: &str, value: i64) -> Self {
        self.clauses
            .push(Clause::Eq(field.to_string(), FilterValue::Int(value)));
        self
    }

    /// Add `field in [...]`; blank values are dropped and an empty list adds nothing
    pub fn in_list<S: AsRef<str>>(mut self, field: &str, values: &[S]) -> Self {
        let values: Vec<String> = values
            .iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if !values.is_empty() {
            self.clauses.push(Clause::In(field.to_string(), values));
        }
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Parse an expression produced by `Display`
    pub fn parse(expr: &str) -> Result<Self> {
        let mut clauses = Vec::new();
        let mut rest = expr.trim();

        while !rest.is_empty() {
            let caps = clause_regex().captures(rest).ok_or_else(|| {
                Error::VectorStore(format!("Invalid filter expression near '{}'", rest))
            })?;
            let field = caps[1].to_string();
            let literal = &caps[3];

            let clause = match &caps[2] {
                "==" if literal.starts_with('"') => {
                    Clause::Eq(field, FilterValue::Str(serde_json::from_str(literal)?))
                }
                "==" => Clause::Eq(
                    field,
                    FilterValue::Int(literal.parse().map_err(|_| {
                        Error::VectorStore(format!("Invalid integer in filter: {}", literal))
                    })?),
                ),
                _ if literal.starts_with('[') => {
                    let normalized = normalize_list(literal);
                    Clause::In(field, serde_json::from_str(&normalized)?)
                }
                _ => {
                    return Err(Error::VectorStore(format!(
                        "'in' needs a list, got {}",
                        literal
                    )))
                }
            };
            clauses.push(clause);

            let consumed = caps.get(0).map_or(rest.len(), |m| m.end());
            rest = rest[consumed..].trim_start();
            if &caps[4] == "&&" && rest.is_empty() {
                return Err(Error::VectorStore(
                    "Filter expression ends with '&&'".to_string(),
                ));
            }
        }

        Ok(Self { clauses })
    }

    /// Evaluate against a hit
    pub fn matches(&self, hit: &VectorSearchHit) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(field, FilterValue::Str(v)) => {
                string_field(hit, field).map_or(false, |f| f == v)
            }
            Clause::Eq(field, FilterValue::Int(v)) => int_field(hit, field) == Some(*v),
            Clause::In(field, values) => string_field(hit, field)
                .map_or(false, |f| values.iter().any(|v| v == f)),
        })
    }

    /// Translate into a Qdrant payload filter (`None` when unconstrained)
    pub fn to_qdrant_filter(&self) -> Option<Filter> {
        if self.clauses.is_empty() {
            return None;
        }

        let conditions: Vec<Condition> = self
            .clauses
            .iter()
            .map(|clause| match clause {
                Clause::Eq(field, FilterValue::Str(v)) => Condition::matches(field, v.clone()),
                Clause::Eq(field, FilterValue::Int(v)) => Condition::matches(field, *v),
                Clause::In(field, values) => Condition::matches(field, values.clone()),
            })
            .collect();

        Some(Filter::must(conditions))
    }
}

/// Drop a trailing comma the clause grammar tolerates but JSON does not
fn normalize_list(literal: &str) -> String {
    let inner = literal.trim_start_matches('[').trim_end_matches(']').trim_end();
    let inner = inner.strip_suffix(',').unwrap_or(inner);
    format!("[{}]", inner)
}

fn string_field<'a>(hit: &'a VectorSearchHit, field: &str) -> Option<&'a str> {
    match field {
        "id" => Some(&hit.id),
        "tenant_user_id" => Some(&hit.tenant_user_id),
        "source_type" => Some(&hit.source_type),
        "source_key" => Some(&hit.source_key),
        _ => None,
    }
}

fn int_field(hit: &VectorSearchHit, field: &str) -> Option<i64> {
    match field {
        "kb_id" => Some(hit.kb_id),
        "chunk_id" => Some(hit.chunk_id),
        _ => None,
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| match clause {
                Clause::Eq(field, FilterValue::Str(v)) => format!("{} == {}", field, quote(v)),
                Clause::Eq(field, FilterValue::Int(v)) => format!("{} == {}", field, v),
                Clause::In(field, values) => {
                    let list: Vec<String> = values.iter().map(|v| quote(v)).collect();
                    format!("{} in [{}]", field, list.join(", "))
                }
            })
            .collect();
        f.write_str(&parts.join(" && "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(tenant: &str, kb_id: i64, source_type: &str, source_key: &str) -> VectorSearchHit {
        VectorSearchHit {
            id: "v1".to_string(),
            score: 0.5,
            tenant_user_id: tenant.to_string(),
            kb_id,
            source_type: source_type.to_string(),
            source_key: source_key.to_string(),
            chunk_id: 1,
            content: String::new(),
            metadata_json: "{}".to_string(),
        }
    }

    #[test]
    fn test_display_format() {
        let expr = FilterExpr::new()
            .eq_str("tenant_user_id", "U1")
            .eq_int("kb_id", 7)
            .in_list("source_type", &["chat_private", " ", "contact_profile"])
            .in_list::<&str>("source_key", &[]);

        assert_eq!(
            expr.to_string(),
            r#"tenant_user_id == "U1" && kb_id == 7 && source_type in ["chat_private", "contact_profile"]"#
        );
    }

    #[test]
    fn test_parse_round_trip_with_awkward_values() {
        let expr = FilterExpr::new()
            .eq_str("tenant_user_id", r#"we"ird && ]id"#)
            .eq_int("kb_id", -2)
            .in_list("source_key", &["a,b", "[c]"]);

        let parsed = FilterExpr::parse(&expr.to_string()).unwrap();
        assert_eq!(parsed, expr);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(FilterExpr::parse("tenant_user_id = 'x'").is_err());
        assert!(FilterExpr::parse(r#"kb_id in 3"#).is_err());
        assert!(FilterExpr::parse(r#"a == "x" &&"#).is_err());
        assert_eq!(FilterExpr::parse("  ").unwrap(), FilterExpr::new());
    }

    #[test]
    fn test_matches() {
        let expr = FilterExpr::parse(
            r#"tenant_user_id == "A" && kb_id == 1 && source_type in ["chat_private", "chat_group"]"#,
        )
        .unwrap();

        assert!(expr.matches(&hit("A", 1, "chat_group", "G1")));
        assert!(!expr.matches(&hit("B", 1, "chat_group", "G1")));
        assert!(!expr.matches(&hit("A", 2, "chat_group", "G1")));
        assert!(!expr.matches(&hit("A", 1, "self_profile", "A")));

        let unknown = FilterExpr::new().eq_str("owner", "A");
        assert!(!unknown.matches(&hit("A", 1, "chat_group", "G1")));
    }

    #[test]
    fn test_to_qdrant_filter() {
        let expr = FilterExpr::new()
            .eq_str("tenant_user_id", "A")
            .eq_int("kb_id", 1)
            .in_list("source_type", &["x"]);
        let filter = expr.to_qdrant_filter().unwrap();
        assert_eq!(filter.must.len(), 3);

        assert!(FilterExpr::new().to_qdrant_filter().is_none());
    }
}
