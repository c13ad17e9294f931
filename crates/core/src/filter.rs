//! The three-layer query filter language.
//!
//! A filter is JSON of the shape
//! `{"sequence": {..}, "topic": {..}, "ontology": {..}, "include_timestamp_range": bool}`.
//! Inside a layer, keys are dotted field paths and leaves carry exactly one
//! `$`-prefixed operator, e.g. `{"acceleration.x": {"$gt": 5.0}}`. Nested
//! objects extend the path, so `{"user_metadata": {"driver": {"$eq": "ana"}}}`
//! addresses `user_metadata.driver`.

use crate::stats::FieldStats;
use crate::value::{Scalar, lookup};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Comparison applied to a single field.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Eq(Scalar),
    Neq(Scalar),
    Lt(Scalar),
    Gt(Scalar),
    Leq(Scalar),
    Geq(Scalar),
    Between(Scalar, Scalar),
    In(Vec<Scalar>),
    Match(String),
    Exists,
    NotExists,
}

impl Predicate {
    /// Parse one `$op` / operand pair.
    pub fn parse(op: &str, operand: &Value) -> Result<Self> {
        let malformed = |msg: String| Error::MalformedFilter(format!("{op}: {msg}"));
        let scalar = |v: &Value| {
            Scalar::from_json(v).ok_or_else(|| malformed(format!("expected a scalar, got {v}")))
        };
        let ordered = |v: &Value| {
            let s = scalar(v)?;
            if matches!(s, Scalar::Bool(_)) {
                return Err(malformed("ordering needs a number or string".to_string()));
            }
            Ok(s)
        };

        let predicate = match op {
            "$eq" => Self::Eq(scalar(operand)?),
            "$neq" => Self::Neq(scalar(operand)?),
            "$lt" => Self::Lt(ordered(operand)?),
            "$gt" => Self::Gt(ordered(operand)?),
            "$leq" => Self::Leq(ordered(operand)?),
            "$geq" => Self::Geq(ordered(operand)?),
            "$between" => {
                let items = operand
                    .as_array()
                    .filter(|a| a.len() == 2)
                    .ok_or_else(|| malformed("expected a [low, high] pair".to_string()))?;
                let low = ordered(&items[0])?;
                let high = ordered(&items[1])?;
                match low.compare(&high) {
                    Some(Ordering::Less | Ordering::Equal) => Self::Between(low, high),
                    Some(Ordering::Greater) => {
                        return Err(malformed("low bound exceeds high bound".to_string()));
                    }
                    None => return Err(malformed("bounds have different types".to_string())),
                }
            }
            "$in" => {
                let items = operand
                    .as_array()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| malformed("expected a non-empty array".to_string()))?;
                Self::In(items.iter().map(|v| scalar(v)).collect::<Result<_>>()?)
            }
            "$match" => match operand {
                Value::String(s) => Self::Match(s.clone()),
                other => return Err(malformed(format!("expected a string, got {other}"))),
            },
            "$exists" | "$not_exists" => {
                if operand != &Value::Bool(true) {
                    return Err(malformed("operand must be true".to_string()));
                }
                if op == "$exists" {
                    Self::Exists
                } else {
                    Self::NotExists
                }
            }
            other => {
                return Err(Error::MalformedFilter(format!("unknown operator '{other}'")));
            }
        };
        Ok(predicate)
    }

    /// Evaluate against a field value; `None` means missing or null.
    pub fn eval(&self, value: Option<&Scalar>) -> bool {
        let Some(value) = value else {
            return matches!(self, Self::NotExists);
        };
        let cmp = |operand: &Scalar| value.compare(operand);
        match self {
            Self::Eq(v) => cmp(v) == Some(Ordering::Equal),
            Self::Neq(v) => cmp(v) != Some(Ordering::Equal),
            Self::Lt(v) => cmp(v) == Some(Ordering::Less),
            Self::Gt(v) => cmp(v) == Some(Ordering::Greater),
            Self::Leq(v) => matches!(cmp(v), Some(Ordering::Less | Ordering::Equal)),
            Self::Geq(v) => matches!(cmp(v), Some(Ordering::Greater | Ordering::Equal)),
            Self::Between(low, high) => {
                matches!(cmp(low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(cmp(high), Some(Ordering::Less | Ordering::Equal))
            }
            Self::In(items) => items.iter().any(|v| cmp(v) == Some(Ordering::Equal)),
            Self::Match(needle) => matches!(value, Scalar::Text(s) if s.contains(needle.as_str())),
            Self::Exists => true,
            Self::NotExists => false,
        }
    }

    /// Conservative chunk pruning: `false` only when no row summarised by
    /// `stats` can satisfy this predicate. `None` stats means the field is absent.
    pub fn could_match(&self, stats: Option<&FieldStats>) -> bool {
        let Some(stats) = stats else {
            return matches!(self, Self::NotExists);
        };
        match self {
            Self::NotExists => return stats.has_null(),
            Self::Exists => return stats.has_value(),
            _ if !stats.has_value() => return false,
            _ => {}
        }
        if let Self::In(items) = self {
            return items
                .iter()
                .any(|v| Self::Eq(v.clone()).could_match(Some(stats)));
        }

        match stats {
            FieldStats::Numeric {
                min: Some(min),
                max: Some(max),
                ..
            } => self.could_match_range(&Scalar::Number(*min), &Scalar::Number(*max), false),
            FieldStats::Textual {
                min: Some(min),
                max: Some(max),
                values,
                ..
            } => {
                if let Some(values) = values {
                    return values.iter().any(|v| self.eval(Some(&Scalar::Text(v.clone()))));
                }
                self.could_match_range(
                    &Scalar::Text(min.clone()),
                    &Scalar::Text(max.clone()),
                    true,
                )
            }
            FieldStats::Boolean {
                has_true,
                has_false,
                ..
            } => {
                let present: Vec<Scalar> = [(*has_false, false), (*has_true, true)]
                    .into_iter()
                    .filter(|(seen, _)| *seen)
                    .map(|(_, b)| Scalar::Bool(b))
                    .collect();
                present.iter().any(|v| self.eval(Some(v)))
            }
            // has_value() guarantees bounds; keep the chunk if that ever breaks.
            _ => true,
        }
    }

    /// Range rule shared by numeric and textual bounds.
    ///
    /// `textual` marks string bounds without a value set, where `$match` cannot be decided.
    fn could_match_range(&self, min: &Scalar, max: &Scalar, textual: bool) -> bool {
        let le = |a: &Scalar, b: &Scalar| matches!(a.compare(b), Some(Ordering::Less | Ordering::Equal));
        let lt = |a: &Scalar, b: &Scalar| a.compare(b) == Some(Ordering::Less);
        match self {
            Self::Eq(v) => le(min, v) && le(v, max),
            // Only a chunk whose every value equals `v` is excluded.
            Self::Neq(v) => min.compare(v).is_none() || !(le(v, min) && le(max, v)),
            Self::Lt(v) => lt(min, v),
            Self::Leq(v) => le(min, v),
            Self::Gt(v) => lt(v, max),
            Self::Geq(v) => le(v, max),
            Self::Between(low, high) => le(low, max) && le(min, high),
            Self::Match(_) => textual,
            // In/Exists/NotExists are decided before range checks.
            _ => true,
        }
    }
}

/// A predicate bound to a dotted field path.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub field: String,
    pub predicate: Predicate,
}

impl Condition {
    /// Evaluate against a JSON document (a record or a metadata view).
    pub fn eval_doc(&self, doc: &Value) -> bool {
        let value = lookup(doc, &self.field).and_then(Scalar::from_json);
        self.predicate.eval(value.as_ref())
    }
}

/// Conjunction of conditions over distinct field paths.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerFilter {
    pub conditions: Vec<Condition>,
}

impl LayerFilter {
    /// Parse a layer object, flattening nested paths.
    pub fn parse(layer: &str, value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            Error::MalformedFilter(format!("'{layer}' layer must be an object"))
        })?;
        let mut conditions = Vec::new();
        flatten(layer, object, "", &mut conditions)?;
        Ok(Self { conditions })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Every condition holds on `doc`.
    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions.iter().all(|c| c.eval_doc(doc))
    }

    /// Check every field against the allowed roots of a catalog layer.
    fn check_fields(&self, layer: &str, plain: &[&str]) -> Result<()> {
        for condition in &self.conditions {
            let field = condition.field.as_str();
            let ok = plain.contains(&field)
                || field
                    .strip_prefix("user_metadata.")
                    .is_some_and(|rest| !rest.is_empty());
            if !ok {
                return Err(Error::MalformedFilter(format!(
                    "unknown {layer} field '{field}'"
                )));
            }
        }
        Ok(())
    }
}

fn is_leaf(object: &Map<String, Value>) -> bool {
    !object.is_empty() && object.keys().all(|k| k.starts_with('$'))
}

fn flatten(
    layer: &str,
    object: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<Condition>,
) -> Result<()> {
    for (key, value) in object {
        if key.is_empty() || key.starts_with('$') {
            return Err(Error::MalformedFilter(format!(
                "unexpected key '{key}' in '{layer}' layer"
            )));
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let inner = value.as_object().ok_or_else(|| {
            Error::MalformedFilter(format!("'{path}' must map to an operator object"))
        })?;

        if is_leaf(inner) {
            if inner.len() != 1 {
                return Err(Error::MalformedFilter(format!(
                    "'{path}' carries {} operators; use $between for bounded ranges",
                    inner.len()
                )));
            }
            let Some((op, operand)) = inner.iter().next() else {
                continue;
            };
            if out.iter().any(|c| c.field == path) {
                return Err(Error::MalformedFilter(format!(
                    "field '{path}' appears twice in '{layer}' layer"
                )));
            }
            out.push(Condition {
                field: path,
                predicate: Predicate::parse(op, operand)?,
            });
        } else if inner.keys().any(|k| k.starts_with('$')) {
            return Err(Error::MalformedFilter(format!(
                "'{path}' mixes operators and nested fields"
            )));
        } else if inner.is_empty() {
            return Err(Error::MalformedFilter(format!("'{path}' is empty")));
        } else {
            flatten(layer, inner, &path, out)?;
        }
    }
    Ok(())
}

/// Fields addressable in the sequence layer besides `user_metadata.*`.
pub const SEQUENCE_FIELDS: &[&str] = &["name", "created_at", "state"];

/// Fields addressable in the topic layer besides `user_metadata.*`.
pub const TOPIC_FIELDS: &[&str] = &[
    "path",
    "locator",
    "ontology_tag",
    "serialization_format",
    "created_at",
];

/// A parsed three-layer query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryFilter {
    pub sequence: Option<LayerFilter>,
    pub topic: Option<LayerFilter>,
    pub ontology: Option<LayerFilter>,
    pub include_timestamp_range: bool,
}

impl QueryFilter {
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::MalformedFilter("query must be an object".to_string()))?;

        let mut filter = Self::default();
        for (key, value) in object {
            match key.as_str() {
                "sequence" => filter.sequence = Some(LayerFilter::parse(key, value)?),
                "topic" => filter.topic = Some(LayerFilter::parse(key, value)?),
                "ontology" => filter.ontology = Some(LayerFilter::parse(key, value)?),
                "include_timestamp_range" => {
                    filter.include_timestamp_range = value.as_bool().ok_or_else(|| {
                        Error::MalformedFilter(
                            "include_timestamp_range must be a boolean".to_string(),
                        )
                    })?;
                }
                other => {
                    return Err(Error::MalformedFilter(format!(
                        "unknown query section '{other}'"
                    )));
                }
            }
        }

        if let Some(layer) = &filter.sequence {
            layer.check_fields("sequence", SEQUENCE_FIELDS)?;
        }
        if let Some(layer) = &filter.topic {
            layer.check_fields("topic", TOPIC_FIELDS)?;
        }
        Ok(filter)
    }

    /// Ontology conditions, or none.
    pub fn ontology_conditions(&self) -> &[Condition] {
        self.ontology
            .as_ref()
            .map(|l| l.conditions.as_slice())
            .unwrap_or(&[])
    }
}
