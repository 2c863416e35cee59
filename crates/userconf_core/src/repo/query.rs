//! Query and patch types for the SQLite document adapter.
//!
//! # Responsibility
//! - Express field-match criteria, sort keys and merge patches.
//! - Compile criteria into SQL predicates over `documents.body`.
//!
//! # Invariants
//! - Field names are validated before they reach SQL; JSON paths are always
//!   bound as parameters, never spliced into statement text.
//! - A patch may not touch the document identifier.

use crate::model::document::{DocumentId, ID_FIELD};
use crate::repo::document_repo::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use serde_json::{Map, Value};

static FIELD_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("valid field path regex")
});

/// Match criterion for one field.
///
/// Comparison semantics are SQLite's: values of different storage classes
/// order as `NULL < numbers < text`. Booleans are stored as `0`/`1`.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// Field equals value. `Null` matches both explicit null and missing.
    Eq(Value),
    /// Field differs from value. Missing fields match unless value is `Null`.
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Field equals any listed value. An empty list matches nothing.
    In(Vec<Value>),
    /// Field is present (`true`) or absent (`false`).
    Exists(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Conjunction of field criteria plus optional sort keys.
///
/// An empty query matches every document in the collection. Without sort
/// keys, documents come back in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    clauses: Vec<(String, Criterion)>,
    sort: Vec<(String, SortOrder)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches the single document with the given identifier.
    pub fn by_id(id: &DocumentId) -> Self {
        Self::new().eq(ID_FIELD, id.as_str())
    }

    /// Adds one criterion for `field`.
    pub fn filter(mut self, field: impl Into<String>, criterion: Criterion) -> Self {
        self.clauses.push((field.into(), criterion));
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Criterion::Eq(value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Criterion::Ne(value.into()))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Criterion::Gt(value.into()))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Criterion::Gte(value.into()))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Criterion::Lt(value.into()))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, Criterion::Lte(value.into()))
    }

    pub fn is_in<V: Into<Value>>(
        self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filter(field, Criterion::In(values))
    }

    pub fn exists(self, field: impl Into<String>, present: bool) -> Self {
        self.filter(field, Criterion::Exists(present))
    }

    /// Appends a sort key. Earlier keys take precedence.
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Returns whether the query has no criteria (sort keys are ignored).
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(String, Criterion)] {
        &self.clauses
    }

    /// Compiles criteria and sort keys into SQL fragments.
    pub(crate) fn compile(&self) -> RepoResult<CompiledQuery> {
        let mut compiled = CompiledQuery::default();

        for (field, criterion) in &self.clauses {
            let target = FieldTarget::parse(field)?;
            let predicate = compile_criterion(&target, criterion, &mut compiled.predicate_binds)?;
            compiled.predicate.push_str(" AND (");
            compiled.predicate.push_str(&predicate);
            compiled.predicate.push(')');
        }

        compiled.order.push_str(" ORDER BY ");
        for (field, order) in &self.sort {
            let target = FieldTarget::parse(field)?;
            compiled
                .order
                .push_str(&target.value_expr(&mut compiled.order_binds));
            compiled.order.push_str(match order {
                SortOrder::Ascending => " ASC, ",
                SortOrder::Descending => " DESC, ",
            });
        }
        compiled.order.push_str("seq ASC");

        Ok(compiled)
    }
}

/// SQL fragments produced from a `Query`.
///
/// `predicate` starts with ` AND` so it can follow the collection filter;
/// binds are positional and must be appended in field order.
#[derive(Debug, Default)]
pub(crate) struct CompiledQuery {
    pub predicate: String,
    pub predicate_binds: Vec<SqlValue>,
    pub order: String,
    pub order_binds: Vec<SqlValue>,
}

/// Partial update applied as a JSON merge-patch.
///
/// Present fields overwrite, `null` removes a field, absent fields are left
/// untouched. Nested objects merge recursively. Unlike `Query`, field names
/// are top-level keys only; dotted names are rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Removes `field` from matched documents.
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), Value::Null);
        self
    }

    /// Builds a patch from any value serializing to a JSON object.
    pub fn from_value<P: Serialize + ?Sized>(value: &P) -> RepoResult<Self> {
        match serde_json::to_value(value) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(other) => Err(RepoError::InvalidPatch(format!(
                "patch must be a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(err) => Err(RepoError::Serialization(err.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn to_json(&self) -> RepoResult<String> {
        if self.fields.contains_key(ID_FIELD) {
            return Err(RepoError::InvalidPatch(format!(
                "`{ID_FIELD}` is assigned by the store and cannot be patched"
            )));
        }
        if let Some(field) = self.fields.keys().find(|field| field.contains('.')) {
            return Err(RepoError::InvalidPatch(format!(
                "dotted field `{field}` is not a path here; nest an object value instead"
            )));
        }
        serde_json::to_string(&self.fields).map_err(|err| RepoError::Serialization(err.to_string()))
    }
}

enum FieldTarget {
    Id,
    Body(String),
}

impl FieldTarget {
    fn parse(field: &str) -> RepoResult<Self> {
        if field == ID_FIELD {
            return Ok(Self::Id);
        }
        if !FIELD_PATH_RE.is_match(field) {
            return Err(RepoError::InvalidQuery(format!(
                "invalid field name `{field}`"
            )));
        }
        Ok(Self::Body(format!("$.{field}")))
    }

    fn value_expr(&self, binds: &mut Vec<SqlValue>) -> String {
        match self {
            Self::Id => "id".to_string(),
            Self::Body(path) => {
                binds.push(SqlValue::Text(path.clone()));
                "json_extract(body, ?)".to_string()
            }
        }
    }

    /// Expression yielding the JSON type name, or `'null'` when missing.
    fn type_expr(&self, binds: &mut Vec<SqlValue>) -> String {
        match self {
            Self::Id => "'text'".to_string(),
            Self::Body(path) => {
                binds.push(SqlValue::Text(path.clone()));
                "COALESCE(json_type(body, ?), 'null')".to_string()
            }
        }
    }
}

fn compile_criterion(
    target: &FieldTarget,
    criterion: &Criterion,
    binds: &mut Vec<SqlValue>,
) -> RepoResult<String> {
    let sql = match criterion {
        Criterion::Eq(Value::Null) => format!("{} = 'null'", target.type_expr(binds)),
        Criterion::Ne(Value::Null) => format!("{} != 'null'", target.type_expr(binds)),
        Criterion::Eq(value) => {
            let lhs = target.value_expr(binds);
            format!("{lhs} = {}", bind_operand(value, binds))
        }
        Criterion::Ne(value) => {
            let lhs = target.value_expr(binds);
            format!("{lhs} IS NOT {}", bind_operand(value, binds))
        }
        Criterion::Gt(value) => compile_range(target, ">", value, binds)?,
        Criterion::Gte(value) => compile_range(target, ">=", value, binds)?,
        Criterion::Lt(value) => compile_range(target, "<", value, binds)?,
        Criterion::Lte(value) => compile_range(target, "<=", value, binds)?,
        Criterion::In(values) => compile_in(target, values, binds),
        Criterion::Exists(present) => match target {
            FieldTarget::Id => if *present { "1" } else { "0" }.to_string(),
            FieldTarget::Body(path) => {
                binds.push(SqlValue::Text(path.clone()));
                if *present {
                    "json_type(body, ?) IS NOT NULL".to_string()
                } else {
                    "json_type(body, ?) IS NULL".to_string()
                }
            }
        },
    };
    Ok(sql)
}

fn compile_range(
    target: &FieldTarget,
    operator: &str,
    value: &Value,
    binds: &mut Vec<SqlValue>,
) -> RepoResult<String> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => Err(RepoError::InvalidQuery(format!(
            "range comparison requires a scalar, got {}",
            json_kind(value)
        ))),
        _ => {
            let lhs = target.value_expr(binds);
            Ok(format!("{lhs} {operator} {}", bind_operand(value, binds)))
        }
    }
}

fn compile_in(target: &FieldTarget, values: &[Value], binds: &mut Vec<SqlValue>) -> String {
    let matches_null = values.iter().any(Value::is_null);
    let listed: Vec<&Value> = values.iter().filter(|value| !value.is_null()).collect();

    let mut alternatives = Vec::new();
    if !listed.is_empty() {
        let lhs = target.value_expr(binds);
        let operands: Vec<String> = listed
            .iter()
            .map(|value| bind_operand(value, binds))
            .collect();
        alternatives.push(format!("{lhs} IN ({})", operands.join(", ")));
    }
    if matches_null {
        alternatives.push(format!("{} = 'null'", target.type_expr(binds)));
    }

    if alternatives.is_empty() {
        "0".to_string()
    } else {
        alternatives.join(" OR ")
    }
}

/// Binds a non-null JSON value and returns the placeholder expression.
fn bind_operand(value: &Value, binds: &mut Vec<SqlValue>) -> String {
    match value {
        Value::Null => {
            binds.push(SqlValue::Null);
            "?".to_string()
        }
        Value::Bool(flag) => {
            binds.push(SqlValue::Integer(i64::from(*flag)));
            "?".to_string()
        }
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                binds.push(SqlValue::Integer(integer));
            } else {
                binds.push(SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)));
            }
            "?".to_string()
        }
        Value::String(text) => {
            binds.push(SqlValue::Text(text.clone()));
            "?".to_string()
        }
        Value::Array(_) | Value::Object(_) => {
            binds.push(SqlValue::Text(value.to_string()));
            "json(?)".to_string()
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
