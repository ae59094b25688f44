use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{DuplicateKey, ReconError};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Equality used by the diff: numbers compare numerically across
    /// `Int`/`Float`, NaN equals NaN, and `Null` equals only `Null`.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
                _ => false,
            },
        }
    }

    /// `Null` becomes `None`; everything else is kept.
    pub fn non_null(&self) -> Option<Value> {
        if self.is_null() {
            None
        } else {
            Some(self.clone())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Integer,
    Float,
}

impl FromStr for FieldKind {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(FieldKind::Text),
            "integer" | "int" => Ok(FieldKind::Integer),
            "float" | "number" => Ok(FieldKind::Float),
            other => Err(ReconError::ConfigValidation(format!(
                "unknown field kind '{other}' (expected text, integer or float)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Ordered field list shared by every record of a [`RecordSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    /// All-text schema from a list of names.
    pub fn text<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(
            names
                .iter()
                .map(|n| FieldDescriptor::new(n.as_ref(), FieldKind::Text))
                .collect(),
        )
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Values aligned with the owning set's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Identity of a record within its set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(Vec<String>);

impl RecordKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn single(part: impl Into<String>) -> Self {
        Self(vec![part.into()])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [one] => write!(f, "{one:?}"),
            parts => write!(f, "({})", parts.iter().map(|p| format!("{p:?}")).collect::<Vec<_>>().join(", ")),
        }
    }
}

impl Serialize for RecordKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [one] => serializer.serialize_str(one),
            parts => parts.serialize(serializer),
        }
    }
}

/// How records are identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySpec {
    Field(String),
    Fields(Vec<String>),
    /// SHA-256 over the normalized text of the listed fields.
    ContentHash(Vec<String>),
}

const HASH_SEPARATOR: &str = "\u{1f}";

impl KeySpec {
    pub fn fields(&self) -> &[String] {
        match self {
            KeySpec::Field(f) => std::slice::from_ref(f),
            KeySpec::Fields(fs) | KeySpec::ContentHash(fs) => fs,
        }
    }

    /// Fields whose values are carried by the key itself and therefore not
    /// repeated as diff cells. Hashed fields stay ordinary columns.
    pub fn carried_fields(&self) -> &[String] {
        match self {
            KeySpec::ContentHash(_) => &[],
            _ => self.fields(),
        }
    }

    /// True when both specs key records the same way, whatever the variant
    /// spelling: `Field("id")` and `Fields(["id"])` are the same key.
    pub fn same_key(&self, other: &KeySpec) -> bool {
        self.fields() == other.fields()
            && matches!(self, KeySpec::ContentHash(_)) == matches!(other, KeySpec::ContentHash(_))
    }

    /// Column headers used when the key is flattened for export.
    pub fn columns(&self) -> Vec<String> {
        match self {
            KeySpec::ContentHash(_) => vec!["KeyHash".to_string()],
            _ => self.fields().to_vec(),
        }
    }

    fn resolve(&self, schema: &Schema) -> Result<Vec<usize>, ReconError> {
        if self.fields().is_empty() {
            return Err(ReconError::ConfigValidation("key needs at least one field".into()));
        }
        self.fields()
            .iter()
            .map(|f| schema.index_of(f).ok_or_else(|| ReconError::MissingKeyField(f.clone())))
            .collect()
    }

    /// Compute the key of one record. `row` is only used for error messages.
    pub fn key_for(&self, schema: &Schema, record: &Record, row: usize) -> Result<RecordKey, ReconError> {
        let indices = self.resolve(schema)?;
        self.key_at(&indices, record, row)
    }

    fn key_at(&self, indices: &[usize], record: &Record, row: usize) -> Result<RecordKey, ReconError> {
        match self {
            KeySpec::ContentHash(_) => {
                let mut hasher = Sha256::new();
                for (n, &i) in indices.iter().enumerate() {
                    if n > 0 {
                        hasher.update(HASH_SEPARATOR.as_bytes());
                    }
                    let text = record.get(i).map(|v| v.to_string()).unwrap_or_default();
                    hasher.update(text.trim().to_lowercase().as_bytes());
                }
                Ok(RecordKey::single(format!("{:x}", hasher.finalize())))
            }
            _ => {
                let mut parts = Vec::with_capacity(indices.len());
                for (&i, name) in indices.iter().zip(self.fields()) {
                    match record.get(i) {
                        Some(v) if !v.is_null() => parts.push(v.to_string()),
                        _ => {
                            return Err(ReconError::NullKey { row, field: name.clone() });
                        }
                    }
                }
                Ok(RecordKey::new(parts))
            }
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Field(name) => write!(f, "field '{name}'"),
            KeySpec::Fields(names) => write!(f, "fields [{}]", names.join(", ")),
            KeySpec::ContentHash(names) => write!(f, "hash of [{}]", names.join(", ")),
        }
    }
}

// ---------------------------------------------------------------------------
// Record sets
// ---------------------------------------------------------------------------

/// Records sharing a schema, uniquely keyed.
#[derive(Debug, Clone)]
pub struct RecordSet {
    schema: Schema,
    key: KeySpec,
    records: Vec<Record>,
    keys: Vec<RecordKey>,
    index: HashMap<RecordKey, usize>,
}

impl RecordSet {
    /// Build a set, validating row widths, key fields and key uniqueness.
    pub fn new(schema: Schema, key: KeySpec, records: Vec<Record>) -> Result<Self, ReconError> {
        let indices = key.resolve(&schema)?;

        let mut keys = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            if record.values().len() != schema.len() {
                return Err(ReconError::RowWidth {
                    row,
                    expected: schema.len(),
                    found: record.values().len(),
                });
            }
            keys.push(key.key_at(&indices, record, row)?);
        }

        let mut index: HashMap<RecordKey, usize> = HashMap::with_capacity(keys.len());
        let mut counts: HashMap<&RecordKey, usize> = HashMap::new();
        for (i, k) in keys.iter().enumerate() {
            *counts.entry(k).or_insert(0) += 1;
            index.entry(k.clone()).or_insert(i);
        }
        let mut duplicates: Vec<DuplicateKey> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(k, count)| DuplicateKey { key: k.clone(), count })
            .collect();
        if !duplicates.is_empty() {
            duplicates.sort_by(|a, b| a.key.cmp(&b.key));
            return Err(ReconError::DuplicateKeys(duplicates));
        }

        Ok(Self { schema, key, records, keys, index })
    }

    pub fn empty(schema: Schema, key: KeySpec) -> Self {
        Self { schema, key, records: Vec::new(), keys: Vec::new(), index: HashMap::new() }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn key_spec(&self) -> &KeySpec {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.keys.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordKey, &Record)> {
        self.keys.iter().zip(self.records.iter())
    }

    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.index.contains_key(key)
    }

    /// Value of `field` in `record`, if the field is in this schema.
    pub fn value<'a>(&self, record: &'a Record, field: &str) -> Option<&'a Value> {
        self.schema.index_of(field).and_then(|i| record.get(i))
    }

    /// A new set with only the given keys, in the given order. Unknown keys
    /// are skipped.
    pub fn subset<'k>(&self, keys: impl IntoIterator<Item = &'k RecordKey>) -> RecordSet {
        let mut out = RecordSet::empty(self.schema.clone(), self.key.clone());
        for k in keys {
            if let Some(&i) = self.index.get(k) {
                if out.index.contains_key(k) {
                    continue;
                }
                out.index.insert(k.clone(), out.records.len());
                out.keys.push(k.clone());
                out.records.push(self.records[i].clone());
            }
        }
        out
    }
}
