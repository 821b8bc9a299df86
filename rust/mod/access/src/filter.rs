//! Declarative row filters attached to capabilities.
//!
//! A filter is a flat map from record field to required scalar value. It is
//! pure data: handlers merge it into their query, and it can be evaluated
//! against an in-memory JSON record with [`Filter::matches`].
//!
//! String values may reference the caller with `$caller.id` or
//! `$caller.role`; [`Filter::bind`] substitutes them once per request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use vidyarth_core::Caller;
use vidyarth_sql::Value;

use crate::error::AccessError;

const CALLER_ID: &str = "$caller.id";
const CALLER_ROLE: &str = "$caller.role";

/// Structural predicate merged into a data query.
///
/// An empty filter means "no additional restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, Json>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style constraint: `field` must equal `value`.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Json>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Build a filter from a JSON object literal.
    pub fn from_json(value: Json) -> Result<Self, AccessError> {
        let filter: Filter = serde_json::from_value(value)
            .map_err(|e| AccessError::InvalidFilter(e.to_string()))?;
        filter.validate()?;
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Json> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Json)> {
        self.0.iter()
    }

    /// Reject anything a query cannot express safely: non-identifier keys
    /// and nested values.
    pub fn validate(&self) -> Result<(), AccessError> {
        for (key, value) in &self.0 {
            let ident = !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !ident {
                return Err(AccessError::InvalidFilter(format!(
                    "field '{key}' is not an identifier"
                )));
            }
            if value.is_array() || value.is_object() {
                return Err(AccessError::InvalidFilter(format!(
                    "field '{key}' must map to a scalar"
                )));
            }
        }
        Ok(())
    }

    /// Substitute caller placeholders. A `$caller.role` reference for a
    /// caller without a role becomes `null`, which matches nothing.
    pub fn bind(&self, caller: &Caller) -> Filter {
        let bound = self
            .0
            .iter()
            .map(|(k, v)| {
                let v = match v.as_str() {
                    Some(CALLER_ID) => Json::String(caller.id.clone()),
                    Some(CALLER_ROLE) => caller
                        .role
                        .clone()
                        .map(Json::String)
                        .unwrap_or(Json::Null),
                    _ => v.clone(),
                };
                (k.clone(), v)
            })
            .collect();
        Filter(bound)
    }

    /// True if every constraint holds for the given JSON record.
    pub fn matches(&self, record: &Json) -> bool {
        self.0.iter().all(|(field, expected)| {
            let actual = record.get(field).unwrap_or(&Json::Null);
            scalar_eq(actual, expected)
        })
    }

    /// Render the filter as `WHERE` fragments over a JSON text column.
    ///
    /// Placeholders are numbered from `first_idx`. Returns the clauses and
    /// the parameters to append, in order.
    pub fn sql_clauses(&self, column: &str, first_idx: usize) -> (Vec<String>, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        let mut idx = first_idx;

        for (field, expected) in &self.0 {
            let path = format!("json_extract({column}, '$.{field}')");
            match sql_value(expected) {
                None => clauses.push(format!("{path} IS NULL")),
                Some(v) => {
                    clauses.push(format!("{path} = ?{idx}"));
                    params.push(v);
                    idx += 1;
                }
            }
        }

        (clauses, params)
    }
}

fn scalar_eq(actual: &Json, expected: &Json) -> bool {
    match (actual, expected) {
        (Json::Number(a), Json::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// json_extract yields 1/0 for booleans, so bind them as integers.
fn sql_value(v: &Json) -> Option<Value> {
    match v {
        Json::Null => None,
        Json::Bool(b) => Some(Value::Integer(*b as i64)),
        Json::Number(n) => Some(match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        }),
        Json::String(s) => Some(Value::Text(s.clone())),
        Json::Array(_) | Json::Object(_) => None,
    }
}
