//! Domain models for the dataset catalog and the outbox
//!
//! Records are persisted as camelCase JSON so they stay readable by the
//! dashboard front end that shares the same storage layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

// =============================================================================
// Catalog
// =============================================================================

/// Where a dataset was imported from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetSource {
    LocalFile,
    LocalFolder,
    Cloud,
}

impl DatasetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSource::LocalFile => "local-file",
            DatasetSource::LocalFolder => "local-folder",
            DatasetSource::Cloud => "cloud",
        }
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Inferred column type, e.g. `number`, `date`, `string`
    #[serde(rename = "type")]
    pub column_type: String,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

/// A registered data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMeta {
    /// Locally generated identifier, stable for the life of the record
    pub id: String,
    pub name: String,
    pub source: DatasetSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<ColumnSchema>,
    /// Last confirmed remote sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
    /// Remote identifier, only present once an upsert has succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,
}

impl DatasetMeta {
    /// Validate dataset metadata
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Dataset id cannot be empty".to_string());
        }

        if self.name.trim().is_empty() {
            return Err("Dataset name cannot be empty".to_string());
        }

        if let Some(dup) = first_duplicate(self.schema.iter().map(|c| c.name.as_str())) {
            return Err(format!("Duplicate column '{}' in schema", dup));
        }

        Ok(())
    }

    pub fn is_synced(&self) -> bool {
        self.cloud_id.is_some()
    }
}

fn first_duplicate<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = std::collections::HashSet::new();
    names.into_iter().find(|name| !seen.insert(*name))
}

/// Dataset details supplied by the import layer before an id is assigned
#[derive(Debug, Clone, PartialEq)]
pub struct NewDataset {
    pub name: String,
    pub source: DatasetSource,
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub fields: Vec<String>,
    pub schema: Vec<ColumnSchema>,
}

impl NewDataset {
    pub fn new(name: impl Into<String>, source: DatasetSource) -> Self {
        Self {
            name: name.into(),
            source,
            size: None,
            modified_at: None,
            fields: Vec::new(),
            schema: Vec::new(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified_at(mut self, modified_at: DateTime<Utc>) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    /// Sets the column schema; `fields` follows the schema's column names.
    pub fn with_schema(mut self, schema: Vec<ColumnSchema>) -> Self {
        self.fields = schema.iter().map(|c| c.name.clone()).collect();
        self.schema = schema;
        self
    }

    pub fn into_meta(self, id: impl Into<String>) -> DatasetMeta {
        DatasetMeta {
            id: id.into(),
            name: self.name,
            source: self.source,
            size: self.size,
            modified_at: self.modified_at,
            fields: self.fields,
            schema: self.schema,
            last_synced: None,
            cloud_id: None,
        }
    }
}

// =============================================================================
// Outbox
// =============================================================================

pub const UPSERT_DATASET: &str = "UPSERT_DATASET";
pub const UPSERT_SAMPLE: &str = "UPSERT_SAMPLE";
pub const DELETE_DATASET: &str = "DELETE_DATASET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SamplePayload {
    dataset_id: String,
    sample: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeletePayload {
    dataset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cloud_id: Option<String>,
}

/// A remote operation waiting in the outbox
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxOp {
    UpsertDataset(DatasetMeta),
    UpsertSample {
        dataset_id: String,
        sample: Vec<Value>,
    },
    DeleteDataset {
        dataset_id: String,
        cloud_id: Option<String>,
    },
    /// A record this build does not understand, kept byte-for-byte
    Unknown { kind: String, payload: Value },
}

impl OutboxOp {
    /// Wire name stored in the record's `type` field
    pub fn kind(&self) -> &str {
        match self {
            OutboxOp::UpsertDataset(_) => UPSERT_DATASET,
            OutboxOp::UpsertSample { .. } => UPSERT_SAMPLE,
            OutboxOp::DeleteDataset { .. } => DELETE_DATASET,
            OutboxOp::Unknown { kind, .. } => kind,
        }
    }

    pub fn dataset_id(&self) -> Option<&str> {
        match self {
            OutboxOp::UpsertDataset(meta) => Some(&meta.id),
            OutboxOp::UpsertSample { dataset_id, .. }
            | OutboxOp::DeleteDataset { dataset_id, .. } => Some(dataset_id),
            OutboxOp::Unknown { .. } => None,
        }
    }

    fn to_payload(&self) -> Value {
        let encoded = match self {
            OutboxOp::UpsertDataset(meta) => serde_json::to_value(meta),
            OutboxOp::UpsertSample { dataset_id, sample } => serde_json::to_value(SamplePayload {
                dataset_id: dataset_id.clone(),
                sample: sample.clone(),
            }),
            OutboxOp::DeleteDataset {
                dataset_id,
                cloud_id,
            } => serde_json::to_value(DeletePayload {
                dataset_id: dataset_id.clone(),
                cloud_id: cloud_id.clone(),
            }),
            OutboxOp::Unknown { payload, .. } => return payload.clone(),
        };
        // These payload types contain only strings, numbers and JSON values
        encoded.unwrap_or(Value::Null)
    }

    fn from_payload(kind: String, payload: Value) -> Self {
        let decoded = match kind.as_str() {
            UPSERT_DATASET => serde_json::from_value::<DatasetMeta>(payload.clone())
                .map(OutboxOp::UpsertDataset),
            UPSERT_SAMPLE => serde_json::from_value::<SamplePayload>(payload.clone()).map(|p| {
                OutboxOp::UpsertSample {
                    dataset_id: p.dataset_id,
                    sample: p.sample,
                }
            }),
            DELETE_DATASET => serde_json::from_value::<DeletePayload>(payload.clone()).map(|p| {
                OutboxOp::DeleteDataset {
                    dataset_id: p.dataset_id,
                    cloud_id: p.cloud_id,
                }
            }),
            _ => return OutboxOp::Unknown { kind, payload },
        };

        decoded.unwrap_or_else(|e| {
            warn!(op = %kind, error = %e, "Outbox payload does not match its type; keeping it opaque");
            OutboxOp::Unknown { kind, payload }
        })
    }
}

/// On-disk shape of an outbox record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawOutboxItem {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    ts: DateTime<Utc>,
    #[serde(default)]
    retries: u32,
}

/// One pending remote-delivery intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawOutboxItem", into = "RawOutboxItem")]
pub struct OutboxItem {
    pub id: String,
    pub op: OutboxOp,
    /// Enqueue time
    pub ts: DateTime<Utc>,
    /// Transient-failure attempts so far
    pub retries: u32,
}

impl From<RawOutboxItem> for OutboxItem {
    fn from(raw: RawOutboxItem) -> Self {
        Self {
            id: raw.id,
            op: OutboxOp::from_payload(raw.kind, raw.payload),
            ts: raw.ts,
            retries: raw.retries,
        }
    }
}

impl From<OutboxItem> for RawOutboxItem {
    fn from(item: OutboxItem) -> Self {
        Self {
            id: item.id,
            kind: item.op.kind().to_string(),
            payload: item.op.to_payload(),
            ts: item.ts,
            retries: item.retries,
        }
    }
}

/// An outbox operation before the store assigns its id
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxItem {
    pub op: OutboxOp,
}

impl NewOutboxItem {
    pub fn new(op: OutboxOp) -> Self {
        Self { op }
    }

    pub fn upsert_dataset(meta: DatasetMeta) -> Self {
        Self::new(OutboxOp::UpsertDataset(meta))
    }

    pub fn upsert_sample(dataset_id: impl Into<String>, sample: Vec<Value>) -> Self {
        Self::new(OutboxOp::UpsertSample {
            dataset_id: dataset_id.into(),
            sample,
        })
    }

    pub fn delete_dataset(dataset_id: impl Into<String>, cloud_id: Option<String>) -> Self {
        Self::new(OutboxOp::DeleteDataset {
            dataset_id: dataset_id.into(),
            cloud_id,
        })
    }

    pub fn into_item(self, id: String, ts: DateTime<Utc>) -> OutboxItem {
        OutboxItem {
            id,
            op: self.op,
            ts,
            retries: 0,
        }
    }
}

impl From<OutboxItem> for NewOutboxItem {
    fn from(item: OutboxItem) -> Self {
        Self { op: item.op }
    }
}
