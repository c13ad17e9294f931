//! Per-chunk skip-index statistics.

use crate::ontology::{FieldKind, Schema};
use crate::timestamp::{TIMESTAMP_FIELD, TimestampRange};
use crate::value::{Number, lookup};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Summary of one field over the rows of a chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldStats {
    /// Integer, float and timestamp fields. Bounds are absent when every value is null.
    Numeric {
        min: Option<Number>,
        max: Option<Number>,
        has_null: bool,
    },
    /// Text fields. `values` is dropped once the distinct count exceeds the cap.
    Textual {
        min: Option<String>,
        max: Option<String>,
        values: Option<BTreeSet<String>>,
        has_null: bool,
    },
    Boolean {
        has_true: bool,
        has_false: bool,
        has_null: bool,
    },
}

impl FieldStats {
    fn empty(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Int | FieldKind::Float => Self::Numeric {
                min: None,
                max: None,
                has_null: false,
            },
            FieldKind::Text => Self::Textual {
                min: None,
                max: None,
                values: Some(BTreeSet::new()),
                has_null: false,
            },
            FieldKind::Bool => Self::Boolean {
                has_true: false,
                has_false: false,
                has_null: false,
            },
        }
    }

    fn observe(&mut self, value: Option<&Value>, max_value_set: usize) {
        match (self, value) {
            (
                Self::Numeric { has_null, .. }
                | Self::Textual { has_null, .. }
                | Self::Boolean { has_null, .. },
                None | Some(Value::Null),
            ) => *has_null = true,
            (Self::Numeric { min, max, .. }, Some(Value::Number(n))) => {
                if let Some(n) = Number::from_json(n) {
                    if min.is_none_or(|m| n.compare(&m) == Some(Ordering::Less)) {
                        *min = Some(n);
                    }
                    if max.is_none_or(|m| n.compare(&m) == Some(Ordering::Greater)) {
                        *max = Some(n);
                    }
                }
            }
            (Self::Textual { min, max, values, .. }, Some(Value::String(s))) => {
                if min.as_ref().is_none_or(|m| s < m) {
                    *min = Some(s.clone());
                }
                if max.as_ref().is_none_or(|m| s > m) {
                    *max = Some(s.clone());
                }
                if let Some(set) = values {
                    set.insert(s.clone());
                    if set.len() > max_value_set {
                        *values = None;
                    }
                }
            }
            (Self::Boolean { has_true, has_false, .. }, Some(Value::Bool(b))) => {
                if *b {
                    *has_true = true;
                } else {
                    *has_false = true;
                }
            }
            // Values of the wrong type never reach a buffer; validation excludes them.
            _ => {}
        }
    }

    /// Whether at least one row carries a non-null value.
    pub fn has_value(&self) -> bool {
        match self {
            Self::Numeric { min, .. } => min.is_some(),
            Self::Textual { min, .. } => min.is_some(),
            Self::Boolean {
                has_true,
                has_false,
                ..
            } => *has_true || *has_false,
        }
    }

    pub fn has_null(&self) -> bool {
        match self {
            Self::Numeric { has_null, .. }
            | Self::Textual { has_null, .. }
            | Self::Boolean { has_null, .. } => *has_null,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Numeric { .. } => "numeric",
            Self::Textual { .. } => "textual",
            Self::Boolean { .. } => "boolean",
        }
    }
}

/// Statistics of every schema field plus the timestamp column of one chunk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStats {
    pub row_count: u64,
    pub fields: BTreeMap<String, FieldStats>,
}

impl ChunkStats {
    /// Compute statistics over exactly `rows`, which must already be validated.
    pub fn compute(schema: &Schema, rows: &[Value], max_value_set: usize) -> Self {
        let mut fields: BTreeMap<String, FieldStats> = BTreeMap::new();
        fields.insert(TIMESTAMP_FIELD.to_string(), FieldStats::empty(FieldKind::Int));
        for spec in &schema.fields {
            fields.insert(spec.path.clone(), FieldStats::empty(spec.kind));
        }

        for row in rows {
            for (path, stats) in fields.iter_mut() {
                stats.observe(lookup(row, path), max_value_set);
            }
        }

        Self {
            row_count: rows.len() as u64,
            fields,
        }
    }

    pub fn field(&self, path: &str) -> Option<&FieldStats> {
        self.fields.get(path)
    }

    /// Closed range of the timestamp column, if the chunk has rows.
    pub fn timestamp_range(&self) -> Option<TimestampRange> {
        match self.fields.get(TIMESTAMP_FIELD) {
            Some(FieldStats::Numeric {
                min: Some(Number::Int(start)),
                max: Some(Number::Int(end)),
                ..
            }) => Some(TimestampRange {
                start: *start,
                end: *end,
            }),
            _ => None,
        }
    }
}
