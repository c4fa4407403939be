use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Value – a single cell of a datapoint
// ---------------------------------------------------------------------------

/// A dynamically-typed scalar, one cell of a datapoint row.
/// Used as a `BTreeMap` key downstream so `Value` must be `Ord`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

// -- Manual Eq/Ord so we can key BTreeMaps with Value --

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use Value::*;
        fn discriminant(v: &Value) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Null => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => Ok(()),
        }
    }
}

impl Value {
    /// Try to interpret the value as an `f64` for numeric axes.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Convert a JSON scalar. Arrays/objects are kept as their JSON text.
    pub fn from_json(val: &JsonValue) -> Value {
        match val {
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::String(n.to_string())
                }
            }
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Null => Value::Null,
            other => Value::String(other.to_string()),
        }
    }

    /// Infer the type of a raw CSV cell.
    pub fn infer(s: &str) -> Value {
        if s.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return Value::Float(f);
        }
        if s == "true" || s == "false" {
            return Value::Bool(s == "true");
        }
        Value::String(s.to_string())
    }

    /// Coercibility class used by column validation: Integer and Float share
    /// a class, Null belongs to none.
    fn class(&self) -> Option<&'static str> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some("bool"),
            Value::Integer(_) | Value::Float(_) => Some("numeric"),
            Value::String(_) => Some("string"),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Columns that live on the datapoint itself, not inside `values`.
pub const RESERVED_COLUMNS: [&str; 2] = ["uid", "from_uid"];

/// A structural invariant of an [`Experiment`] was violated.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("not a single datapoint")]
    Empty,
    #[error("datapoint {uid} contains a value for reserved column \"{column}\"")]
    ReservedColumn { uid: String, column: String },
    #[error("datapoint {uid} parent {from_uid} not found")]
    MissingParent { uid: String, from_uid: String },
    #[error("circular reference in parents of datapoint {uid}")]
    CircularReference { uid: String },
    #[error("column \"{column}\" mixes {expected} and {found} values")]
    MixedColumnTypes {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Datapoint – one row of the Experiment
// ---------------------------------------------------------------------------

/// A single measurement: one line in the parallel plot, one row in the table.
/// `from_uid` links to the datapoint it originates from (e.g. the previous
/// training epoch), forming lineage chains the front-end can follow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datapoint {
    pub uid: String,
    pub from_uid: Option<String>,
    /// Dynamic columns: column_name → value.
    pub values: BTreeMap<String, Value>,
}

impl Datapoint {
    pub fn new(uid: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Datapoint {
            uid: uid.into(),
            from_uid: None,
            values,
        }
    }

    pub fn with_parent(mut self, from_uid: impl Into<String>) -> Self {
        self.from_uid = Some(from_uid.into());
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for reserved in RESERVED_COLUMNS {
            if self.values.contains_key(reserved) {
                return Err(ValidationError::ReservedColumn {
                    uid: self.uid.clone(),
                    column: reserved.to_string(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Experiment – the complete normalized dataset
// ---------------------------------------------------------------------------

/// The full parsed experiment with a pre-computed column vocabulary.
///
/// Construction normalizes row shape: every datapoint carries an entry for
/// every known column, with `Value::Null` standing in for missing cells, so
/// the rendering layer always sees homogeneous rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experiment {
    /// All datapoints (rows), in source order.
    pub datapoints: Vec<Datapoint>,
    /// Sorted list of value column names (excludes uid, from_uid).
    pub column_names: Vec<String>,
}

impl Experiment {
    /// Build the column vocabulary and fill missing cells with `Null`.
    pub fn from_datapoints(mut datapoints: Vec<Datapoint>) -> Self {
        let column_names_set: BTreeSet<String> = datapoints
            .iter()
            .flat_map(|dp| dp.values.keys().cloned())
            .collect();

        for dp in &mut datapoints {
            for col in &column_names_set {
                dp.values.entry(col.clone()).or_insert(Value::Null);
            }
        }

        Experiment {
            datapoints,
            column_names: column_names_set.into_iter().collect(),
        }
    }

    /// Build from row maps. A `uid` entry becomes the datapoint uid (row
    /// index otherwise), a non-empty `from_uid` entry becomes the lineage
    /// link; both are hoisted out of the value columns.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = BTreeMap<String, Value>>,
    {
        let datapoints = rows
            .into_iter()
            .enumerate()
            .map(|(k, mut row)| {
                let uid = match row.remove("uid") {
                    Some(Value::Null) | None => k.to_string(),
                    Some(v) => v.to_string(),
                };
                let from_uid = match row.remove("from_uid") {
                    Some(Value::Null) | None => None,
                    Some(v) => {
                        let s = v.to_string();
                        (!s.is_empty()).then_some(s)
                    }
                };
                Datapoint {
                    uid,
                    from_uid,
                    values: row,
                }
            })
            .collect();
        Experiment::from_datapoints(datapoints)
    }

    /// Number of datapoints.
    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    /// Whether the experiment is empty.
    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    /// Check structural invariants, returning the experiment unchanged so
    /// callers can chain construct → validate → use.
    ///
    /// Fails on: an empty row set, reserved columns inside `values`,
    /// lineage links to non-existent datapoints, circular lineage, or a
    /// column mixing incompatible value classes across rows.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.datapoints.is_empty() {
            return Err(ValidationError::Empty);
        }
        self.validate_lineage()?;
        self.validate_column_types()?;
        Ok(self)
    }

    /// Every `from_uid` must resolve and no lineage chain may loop.
    fn validate_lineage(&self) -> Result<(), ValidationError> {
        let dp_lookup: BTreeMap<&str, &Datapoint> = self
            .datapoints
            .iter()
            .map(|dp| (dp.uid.as_str(), dp))
            .collect();

        // Walk each lineage chain once; `seen` caps the overall work.
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for p in &self.datapoints {
            if !seen.contains(p.uid.as_str()) {
                let mut seen_now: BTreeSet<&str> = BTreeSet::new();
                seen_now.insert(p.uid.as_str());
                let mut dp = p;
                while let Some(from_uid) = dp.from_uid.as_deref() {
                    if seen.contains(from_uid) {
                        break;
                    }
                    if seen_now.contains(from_uid) {
                        return Err(ValidationError::CircularReference {
                            uid: p.uid.clone(),
                        });
                    }
                    seen_now.insert(from_uid);
                    dp = dp_lookup.get(from_uid).copied().ok_or_else(|| {
                        ValidationError::MissingParent {
                            uid: dp.uid.clone(),
                            from_uid: from_uid.to_string(),
                        }
                    })?;
                }
                seen.append(&mut seen_now);
            }
            p.validate()?;
        }
        Ok(())
    }

    /// Per-column type consistency: the first non-null value fixes the
    /// column's class, later rows must match it.
    fn validate_column_types(&self) -> Result<(), ValidationError> {
        let mut classes: BTreeMap<&str, &'static str> = BTreeMap::new();
        for dp in &self.datapoints {
            for (col, val) in &dp.values {
                let Some(class) = val.class() else { continue };
                match classes.get(col.as_str()) {
                    None => {
                        classes.insert(col, class);
                    }
                    Some(expected) if *expected != class => {
                        return Err(ValidationError::MixedColumnTypes {
                            column: col.clone(),
                            expected,
                            found: class,
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Clear `from_uid` links that point at no existing datapoint.
    pub fn remove_missing_parents(mut self) -> Self {
        let existing: BTreeSet<String> =
            self.datapoints.iter().map(|dp| dp.uid.clone()).collect();
        for dp in &mut self.datapoints {
            if let Some(from_uid) = &dp.from_uid {
                if !existing.contains(from_uid) {
                    dp.from_uid = None;
                }
            }
        }
        self
    }

    /// Merge several named experiments into a single one. Uids gain the
    /// experiment name as a prefix and an `exp` column records the origin.
    pub fn merge(experiments: BTreeMap<String, Experiment>) -> Experiment {
        let mut datapoints = Vec::new();
        for (name, xp) in experiments {
            for dp in xp.datapoints {
                let mut values = dp.values;
                values.insert("exp".to_string(), Value::String(name.clone()));
                datapoints.push(Datapoint {
                    uid: format!("{name}_{}", dp.uid),
                    from_uid: dp.from_uid.map(|f| format!("{name}_{f}")),
                    values,
                });
            }
        }
        Experiment::from_datapoints(datapoints)
    }

    /// Dump as CSV: `uid`, `from_uid`, then the sorted value columns.
    /// `Null` cells render empty.
    pub fn to_csv<W: Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["uid".to_string(), "from_uid".to_string()];
        header.extend(self.column_names.iter().cloned());
        wtr.write_record(&header)?;

        for dp in &self.datapoints {
            let mut record = vec![dp.uid.clone(), dp.from_uid.clone().unwrap_or_default()];
            for col in &self.column_names {
                record.push(
                    dp.values
                        .get(col)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
