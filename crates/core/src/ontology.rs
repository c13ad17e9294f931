//! Topic schemas and the static ontology registry.

use crate::resource::SerializationFormat;
use crate::timestamp::{TIMESTAMP_FIELD, Timestamp};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Value kind of a schema field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Int,
    Float,
    Bool,
    Text,
}

/// One leaf field of a record, addressed by dotted path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub path: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub nullable: bool,
}

impl FieldSpec {
    pub fn required(path: &str, kind: FieldKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            nullable: false,
        }
    }

    pub fn optional(path: &str, kind: FieldKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            nullable: true,
        }
    }
}

/// Ordered record layout of a topic. The `timestamp_ns` column is implicit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        let schema = Self { fields };
        schema.check()?;
        Ok(schema)
    }

    /// Reject duplicate, empty or reserved field paths.
    pub fn check(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for field in &self.fields {
            if field.path.is_empty() || field.path.split('.').any(str::is_empty) {
                return Err(Error::SchemaMismatch(format!(
                    "invalid field path '{}'",
                    field.path
                )));
            }
            if field.path == TIMESTAMP_FIELD {
                return Err(Error::SchemaMismatch(format!(
                    "'{TIMESTAMP_FIELD}' is reserved"
                )));
            }
            if !seen.insert(field.path.as_str()) {
                return Err(Error::SchemaMismatch(format!(
                    "duplicate field '{}'",
                    field.path
                )));
            }
        }
        // A path may not be both a leaf and the parent of another leaf.
        for field in &self.fields {
            let nested = format!("{}.", field.path);
            if self.fields.iter().any(|f| f.path.starts_with(&nested)) {
                return Err(Error::SchemaMismatch(format!(
                    "field '{}' is both a leaf and a parent",
                    field.path
                )));
            }
        }
        Ok(())
    }

    pub fn field(&self, path: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// Validate one record and return its timestamp.
    pub fn validate(&self, record: &Value) -> Result<Timestamp> {
        let object = record
            .as_object()
            .ok_or_else(|| Error::SchemaMismatch("record is not a JSON object".to_string()))?;

        let timestamp = match object.get(TIMESTAMP_FIELD) {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                Error::SchemaMismatch(format!("'{TIMESTAMP_FIELD}' must be an i64"))
            })?,
            Some(_) => {
                return Err(Error::SchemaMismatch(format!(
                    "'{TIMESTAMP_FIELD}' must be an integer"
                )));
            }
            None => {
                return Err(Error::SchemaMismatch(format!(
                    "missing '{TIMESTAMP_FIELD}'"
                )));
            }
        };

        let mut leaves = Vec::new();
        collect_leaves(object, "", &mut leaves);
        for (path, value) in leaves {
            if path == TIMESTAMP_FIELD {
                continue;
            }
            let spec = self
                .field(&path)
                .ok_or_else(|| Error::SchemaMismatch(format!("unexpected field '{path}'")))?;
            check_kind(spec, value)?;
        }

        for spec in &self.fields {
            let present = crate::value::lookup(record, &spec.path).is_some_and(|v| !v.is_null());
            if !present && !spec.nullable {
                return Err(Error::SchemaMismatch(format!(
                    "missing required field '{}'",
                    spec.path
                )));
            }
        }

        Ok(timestamp)
    }
}

fn collect_leaves<'a>(object: &'a Map<String, Value>, prefix: &str, out: &mut Vec<(String, &'a Value)>) {
    for (key, value) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => collect_leaves(inner, &path, out),
            _ => out.push((path, value)),
        }
    }
}

fn check_kind(spec: &FieldSpec, value: &Value) -> Result<()> {
    let ok = match (spec.kind, value) {
        (_, Value::Null) => spec.nullable,
        (FieldKind::Int, Value::Number(n)) => n.is_i64(),
        (FieldKind::Float, Value::Number(_)) => true,
        (FieldKind::Bool, Value::Bool(_)) => true,
        (FieldKind::Text, Value::String(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::SchemaMismatch(format!(
            "field '{}' expects {:?}{}, got {}",
            spec.path,
            spec.kind,
            if spec.nullable { " or null" } else { "" },
            value
        )))
    }
}

/// Registered type behind an ontology tag.
#[derive(Clone, Debug)]
pub struct OntologyEntry {
    pub schema: Schema,
    pub format: SerializationFormat,
}

/// Tag → schema mapping, built once at process start.
#[derive(Clone, Debug, Default)]
pub struct OntologyRegistry {
    entries: BTreeMap<String, OntologyEntry>,
}

static BUILTIN: LazyLock<OntologyRegistry> = LazyLock::new(OntologyRegistry::build_builtin);

impl OntologyRegistry {
    /// The process-wide registry of built-in sensor types.
    pub fn builtin() -> &'static OntologyRegistry {
        &BUILTIN
    }

    pub fn get(&self, tag: &str) -> Option<&OntologyEntry> {
        self.entries.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn register(&mut self, tag: &str, format: SerializationFormat, fields: Vec<FieldSpec>) {
        self.entries.insert(
            tag.to_string(),
            OntologyEntry {
                schema: Schema { fields },
                format,
            },
        );
    }

    fn build_builtin() -> Self {
        use FieldKind::{Float, Int, Text};

        let vector3 = |prefix: &str| {
            ["x", "y", "z"]
                .into_iter()
                .map(|axis| FieldSpec::required(&format!("{prefix}.{axis}"), Float))
                .collect::<Vec<_>>()
        };

        let mut registry = Self::default();

        let mut imu = vector3("acceleration");
        imu.extend(vector3("angular_velocity"));
        imu.extend(
            ["x", "y", "z", "w"]
                .into_iter()
                .map(|axis| FieldSpec::optional(&format!("orientation.{axis}"), Float)),
        );
        registry.register("imu", SerializationFormat::Default, imu);

        registry.register(
            "gps",
            SerializationFormat::Default,
            vec![
                FieldSpec::required("latitude", Float),
                FieldSpec::required("longitude", Float),
                FieldSpec::required("altitude", Float),
                FieldSpec::optional("status", Int),
                FieldSpec::optional("satellites", Int),
            ],
        );

        for tag in ["temperature", "pressure"] {
            registry.register(
                tag,
                SerializationFormat::Default,
                vec![
                    FieldSpec::required("value", Float),
                    FieldSpec::optional("variance", Float),
                ],
            );
        }

        registry.register(
            "magnetometer",
            SerializationFormat::Default,
            vector3("magnetic_field"),
        );

        registry.register(
            "range",
            SerializationFormat::Default,
            vec![
                FieldSpec::required("radiation_type", Int),
                FieldSpec::required("field_of_view", Float),
                FieldSpec::required("min_range", Float),
                FieldSpec::required("max_range", Float),
                FieldSpec::required("range", Float),
            ],
        );

        registry.register(
            "nmea",
            SerializationFormat::Ragged,
            vec![FieldSpec::required("sentence", Text)],
        );

        registry.register(
            "image",
            SerializationFormat::Image,
            vec![
                FieldSpec::required("encoding", Text),
                FieldSpec::required("width", Int),
                FieldSpec::required("height", Int),
                FieldSpec::required("data", Text),
            ],
        );

        registry
    }
}
