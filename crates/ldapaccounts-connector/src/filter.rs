//! Filter codec
//!
//! Compact JSON encoding of record filters. Each key of the object is a column
//! name and each value is an encoded predicate:
//!
//! - `">10"`, `"<10"`, `">=10"`, `"<=10"`: comparison. The operand may be
//!   wrapped in double quotes (`">=\"5\""`) so that it can start with `=` or `"`.
//! - any value containing `*`: case-insensitive pattern match, `*` matching any
//!   run of characters.
//! - anything else: equality.
//!
//! Predicates are combined with AND. An empty object matches every record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConnectorError, ConnectorResult};
use crate::operation::Record;
use crate::schema::RecordSchema;

/// Escape character used in stored pattern values.
pub const LIKE_ESCAPE: char = '\\';

/// Comparison applied by a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    /// Pattern match; the value uses `%` as wildcard and `\` as escape.
    Like,
}

impl Operator {
    /// Prefix used in the compact encoding (empty for equality and patterns).
    pub fn prefix(&self) -> &'static str {
        match self {
            Operator::Eq | Operator::Like => "",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
        }
    }

    /// Whether this is one of the ordering comparisons.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge
        )
    }
}

/// A single condition on one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

impl Predicate {
    /// Create a predicate.
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Create an equality predicate.
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    /// Create a pattern predicate from a `*` wildcard value.
    pub fn like(field: impl Into<String>, wildcard: &str) -> Self {
        Self::new(field, Operator::Like, wildcard_to_pattern(wildcard))
    }

    /// Decode one encoded value.
    fn decode(field: &str, encoded: &str) -> Self {
        if let Some((operator, rest)) = split_operator(encoded) {
            return Self::new(field, operator, unquote(rest));
        }
        if encoded.contains('*') {
            return Self::like(field, encoded);
        }
        Self::eq(field, encoded)
    }

    /// Encode back to the compact form.
    fn encode(&self) -> String {
        match self.operator {
            Operator::Eq => self.value.clone(),
            Operator::Like => pattern_to_wildcard(&self.value),
            op => {
                if self.value.starts_with('=') || self.value.starts_with('"') {
                    format!("{}\"{}\"", op.prefix(), self.value)
                } else {
                    format!("{}{}", op.prefix(), self.value)
                }
            }
        }
    }
}

/// Ordered set of predicates, at most one per field, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    predicates: Vec<Predicate>,
}

impl FilterSet {
    /// Create an empty filter set (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate, replacing any existing predicate on the same field.
    pub fn insert(&mut self, predicate: Predicate) {
        match self
            .predicates
            .iter_mut()
            .find(|p| p.field == predicate.field)
        {
            Some(existing) => *existing = predicate,
            None => self.predicates.push(predicate),
        }
    }

    /// Append a predicate even when its field already has one.
    ///
    /// Used for bounds layered on top of a decoded filter; such a set no
    /// longer round-trips through [`encode`].
    pub fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    /// Add a predicate using builder pattern.
    pub fn with(mut self, predicate: Predicate) -> Self {
        self.insert(predicate);
        self
    }

    /// Get the predicate on a field.
    pub fn get(&self, field: &str) -> Option<&Predicate> {
        self.predicates.iter().find(|p| p.field == field)
    }

    /// Iterate over predicates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Predicate> {
        self.predicates.iter()
    }

    /// Iterate over the referenced field names.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.predicates.iter().map(|p| p.field.as_str())
    }

    /// Number of predicates.
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Check if the set has no predicates.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl Predicate {
    /// Evaluate the predicate against a record in memory.
    ///
    /// Comparisons are numeric when both sides parse as integers and textual
    /// otherwise. Patterns match case-insensitively. A missing or null column
    /// never matches.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(value) = record.get(&self.field).filter(|v| !v.is_null()) else {
            return false;
        };
        let text = value.to_text();

        if self.operator == Operator::Like {
            return like_matches(&self.value, &text);
        }

        let ordering = match (text.trim().parse::<i64>(), self.value.trim().parse::<i64>()) {
            (Ok(left), Ok(right)) => left.cmp(&right),
            _ => text.as_str().cmp(self.value.as_str()),
        };
        match self.operator {
            Operator::Eq => ordering.is_eq(),
            Operator::Lt => ordering.is_lt(),
            Operator::Gt => ordering.is_gt(),
            Operator::Le => ordering.is_le(),
            Operator::Ge => ordering.is_ge(),
            Operator::Like => false,
        }
    }
}

impl FilterSet {
    /// Evaluate every predicate against a record in memory.
    pub fn matches(&self, record: &Record) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }
}

/// Decode the compact JSON representation into a filter set.
pub fn decode(text: &str) -> ConnectorResult<FilterSet> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ConnectorError::decode(format!("invalid json provided: {e}")))?;

    let Value::Object(entries) = value else {
        return Err(ConnectorError::decode(
            "invalid json provided: expected an object",
        ));
    };

    let mut filter = FilterSet::new();
    for (field, raw) in entries {
        let encoded = match raw {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => {
                return Err(ConnectorError::decode(format!(
                    "value of '{field}' must be a string or a number"
                )));
            }
        };
        filter.insert(Predicate::decode(&field, &encoded));
    }
    Ok(filter)
}

/// Encode a filter set to the compact JSON representation.
pub fn encode(filter: &FilterSet) -> String {
    let object: serde_json::Map<String, Value> = filter
        .iter()
        .map(|p| (p.field.clone(), Value::String(p.encode())))
        .collect();
    Value::Object(object).to_string()
}

/// Fail with `UnknownField` if the filter references a column not in the schema.
pub fn validate(filter: &FilterSet, schema: &RecordSchema) -> ConnectorResult<()> {
    schema.validate_fields(filter.fields())
}

fn split_operator(encoded: &str) -> Option<(Operator, &str)> {
    [
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        (">", Operator::Gt),
        ("<", Operator::Lt),
    ]
    .into_iter()
    .find_map(|(prefix, op)| encoded.strip_prefix(prefix).map(|rest| (op, rest)))
}

fn unquote(operand: &str) -> &str {
    match operand.strip_prefix('"') {
        Some(inner) => inner.strip_suffix('"').unwrap_or(inner),
        None => operand,
    }
}

/// Escape `\`, `%` and `_`, then turn `*` into `%`.
fn wildcard_to_pattern(wildcard: &str) -> String {
    let mut pattern = String::with_capacity(wildcard.len() + 4);
    for c in wildcard.chars() {
        match c {
            '*' => pattern.push('%'),
            '\\' | '%' | '_' => {
                pattern.push(LIKE_ESCAPE);
                pattern.push(c);
            }
            _ => pattern.push(c),
        }
    }
    pattern
}

#[derive(Clone, Copy, PartialEq)]
enum PatternToken {
    AnyRun,
    AnyOne,
    Literal(char),
}

fn tokenize_pattern(pattern: &str) -> Vec<PatternToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        let token = match c {
            LIKE_ESCAPE => match chars.next() {
                Some(escaped) => PatternToken::Literal(escaped),
                None => PatternToken::Literal(LIKE_ESCAPE),
            },
            '%' => PatternToken::AnyRun,
            '_' => PatternToken::AnyOne,
            _ => PatternToken::Literal(c),
        };
        tokens.push(token);
    }
    tokens
}

/// Case-insensitive `LIKE` matching with backtracking on the last `%`.
fn like_matches(pattern: &str, text: &str) -> bool {
    let tokens = tokenize_pattern(&pattern.to_lowercase());
    let text: Vec<char> = text.to_lowercase().chars().collect();

    let (mut t, mut s) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while s < text.len() {
        match tokens.get(t) {
            Some(PatternToken::AnyRun) => {
                backtrack = Some((t, s));
                t += 1;
            }
            Some(PatternToken::AnyOne) => {
                t += 1;
                s += 1;
            }
            Some(PatternToken::Literal(c)) if *c == text[s] => {
                t += 1;
                s += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    t = star + 1;
                    s = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    tokens[t..].iter().all(|token| *token == PatternToken::AnyRun)
}

fn pattern_to_wildcard(pattern: &str) -> String {
    let mut wildcard = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            LIKE_ESCAPE => {
                if let Some(escaped) = chars.next() {
                    wildcard.push(escaped);
                }
            }
            '%' => wildcard.push('*'),
            _ => wildcard.push(c),
        }
    }
    wildcard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    #[test]
    fn test_decode_equality_and_pattern() {
        let filter = decode(r#"{"deleted":0,"email":"*example.org"}"#).unwrap();

        assert_eq!(filter.len(), 2);
        assert_eq!(filter.get("deleted"), Some(&Predicate::eq("deleted", "0")));
        assert_eq!(
            filter.get("email"),
            Some(&Predicate::new("email", Operator::Like, "%example.org"))
        );
    }

    #[test]
    fn test_decode_keeps_key_order() {
        let filter = decode(r#"{"email":"a@x.org","auth":"ldap","deleted":"0"}"#).unwrap();
        let fields: Vec<&str> = filter.fields().collect();
        assert_eq!(fields, vec!["email", "auth", "deleted"]);
    }

    #[test]
    fn test_decode_comparisons() {
        let filter = decode(
            r#"{"a":">100","b":"<5","c":">=7","d":"<=8","e":">=\"5\"","f":"<\"=x\""}"#,
        )
        .unwrap();

        assert_eq!(filter.get("a"), Some(&Predicate::new("a", Operator::Gt, "100")));
        assert_eq!(filter.get("b"), Some(&Predicate::new("b", Operator::Lt, "5")));
        assert_eq!(filter.get("c"), Some(&Predicate::new("c", Operator::Ge, "7")));
        assert_eq!(filter.get("d"), Some(&Predicate::new("d", Operator::Le, "8")));
        assert_eq!(filter.get("e"), Some(&Predicate::new("e", Operator::Ge, "5")));
        assert_eq!(filter.get("f"), Some(&Predicate::new("f", Operator::Lt, "=x")));
    }

    #[test]
    fn test_comparison_wins_over_wildcard() {
        let filter = decode(r#"{"lastname":">M*"}"#).unwrap();
        assert_eq!(
            filter.get("lastname"),
            Some(&Predicate::new("lastname", Operator::Gt, "M*"))
        );
    }

    #[test]
    fn test_decode_escapes_literal_wildcards() {
        let filter = decode(r#"{"email":"100%_*"}"#).unwrap();
        assert_eq!(filter.get("email").unwrap().value, r"100\%\_%");

        let filter = decode(r#"{"email":"a\\b*"}"#).unwrap();
        assert_eq!(filter.get("email").unwrap().value, r"a\\b%");
    }

    #[test]
    fn test_literal_percent_without_wildcard_is_equality() {
        let filter = decode(r#"{"email":"100%"}"#).unwrap();
        assert_eq!(filter.get("email"), Some(&Predicate::eq("email", "100%")));
    }

    #[test]
    fn test_decode_empty_object() {
        let filter = decode("{}").unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        for input in ["", "[1,2]", "\"email\"", "{bad json", "null", "42"] {
            let err = decode(input).unwrap_err();
            assert!(
                matches!(err, ConnectorError::Decode { .. }),
                "{input:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_decode_rejects_nested_values() {
        let err = decode(r#"{"email":["a","b"]}"#).unwrap_err();
        assert!(matches!(err, ConnectorError::Decode { .. }));
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn test_decode_boolean_value() {
        let filter = decode(r#"{"confirmed":true}"#).unwrap();
        assert_eq!(
            filter.get("confirmed"),
            Some(&Predicate::eq("confirmed", "true"))
        );
    }

    #[test]
    fn test_encode_then_decode_is_stable() {
        let inputs = [
            r#"{"deleted":"0","email":"*@example.org"}"#,
            r#"{"a":">=\"=5\"","b":"<\"\"x\"","c":"*100%_\\*"}"#,
            r#"{"timecreated":">1700000000"}"#,
        ];
        for input in inputs {
            let decoded = decode(input).unwrap();
            assert_eq!(decode(&encode(&decoded)).unwrap(), decoded, "{input}");
        }
    }

    #[test]
    fn test_encode_compact_form() {
        let filter = FilterSet::new()
            .with(Predicate::eq("deleted", "0"))
            .with(Predicate::like("email", "*example.org"))
            .with(Predicate::new("id", Operator::Gt, "10"));
        assert_eq!(
            encode(&filter),
            r#"{"deleted":"0","email":"*example.org","id":">10"}"#
        );
    }

    #[test]
    fn test_insert_replaces_same_field() {
        let filter = FilterSet::new()
            .with(Predicate::eq("deleted", "0"))
            .with(Predicate::eq("deleted", "1"));
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.get("deleted").unwrap().value, "1");
    }

    #[test]
    fn test_in_memory_matching() {
        let record = Record::new()
            .with("id", 12i64)
            .with("email", "Bob@Example.org")
            .with("deleted", 0i64)
            .with("lastname", None::<String>);

        let filter = decode(r#"{"deleted":0,"email":"*example.org","id":">9"}"#).unwrap();
        assert!(filter.matches(&record));

        let filter = decode(r#"{"email":"bob@*"}"#).unwrap();
        assert!(filter.matches(&record));

        let filter = decode(r#"{"email":"*example.com"}"#).unwrap();
        assert!(!filter.matches(&record));

        let filter = decode(r#"{"id":"<=11"}"#).unwrap();
        assert!(!filter.matches(&record));

        let filter = decode(r#"{"lastname":"*"}"#).unwrap();
        assert!(!filter.matches(&record));

        assert!(FilterSet::new().matches(&record));
    }

    #[test]
    fn test_like_escapes_are_literal() {
        assert!(like_matches(r"100\%", "100%"));
        assert!(!like_matches(r"100\%", "1000"));
        assert!(like_matches(r"a\_c%", "a_cdef"));
        assert!(!like_matches(r"a\_c%", "abcdef"));
        assert!(like_matches("%x%y", "axbxy"));
    }

    #[test]
    fn test_validate() {
        let schema = RecordSchema::new("mdl_user", "id")
            .with_column("email", ColumnType::Text)
            .with_column("deleted", ColumnType::Integer);

        let filter = decode(r#"{"deleted":0,"email":"*x.org"}"#).unwrap();
        assert!(validate(&filter, &schema).is_ok());

        let filter = decode(r#"{"deleted":0,"shoesize":"42"}"#).unwrap();
        let err = validate(&filter, &schema).unwrap_err();
        assert!(matches!(err, ConnectorError::UnknownField { ref field } if field == "shoesize"));
    }
}
