use crate::time::period::soql_datetime;
use chrono::{DateTime, FixedOffset};
use std::fmt;

/// A typed value bound into a SOQL predicate.
///
/// The REST query endpoint has no bind-variable support, so values are kept
/// apart from the statement and only turned into text through `render`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoqlValue {
    Null,
    Text(String),
    DateTime(DateTime<FixedOffset>),
    Integer(i64),
}

impl SoqlValue {
    pub fn render(&self) -> String {
        match self {
            SoqlValue::Null => "NULL".to_string(),
            SoqlValue::Text(s) => quote(s),
            SoqlValue::DateTime(dt) => soql_datetime(dt),
            SoqlValue::Integer(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gte,
    Lte,
}

impl CmpOp {
    fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Gte => ">=",
            CmpOp::Lte => "<=",
        }
    }
}

/// `field op value`; the field is always a compile-time name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub field: &'static str,
    pub op: CmpOp,
    pub value: SoqlValue,
}

impl Predicate {
    pub fn new(field: &'static str, op: CmpOp, value: SoqlValue) -> Self {
        Self { field, op, value }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.as_str(), self.value.render())
    }
}

/// Quote a string literal using the escapes SOQL recognises.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
