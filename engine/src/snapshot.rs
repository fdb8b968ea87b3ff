//! Backup snapshots for export and bulk restore.
//!
//! A snapshot is one JSON document holding every record of one owner:
//! `{version, exportDate, transactions, debts, tobacco, user}`. Record arrays
//! are kept as raw JSON so fields this engine does not know survive a
//! round trip through a backup file.

use crate::{error::Result, record::Entity, Error, Schema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Version of the backup format written by this engine.
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// A full export of one owner's remote data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    /// Format version; files from newer writers are refused
    #[serde(deserialize_with = "deserialize_version")]
    pub version: u32,
    #[serde(default)]
    pub export_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transactions: Vec<serde_json::Value>,
    #[serde(default)]
    pub debts: Vec<serde_json::Value>,
    #[serde(default)]
    pub tobacco: Vec<serde_json::Value>,
    #[serde(default)]
    pub user: serde_json::Value,
}

impl BackupSnapshot {
    /// Create an empty snapshot stamped with `export_date`.
    pub fn new(export_date: DateTime<Utc>) -> Self {
        Self {
            version: BACKUP_FORMAT_VERSION,
            export_date: Some(export_date),
            transactions: Vec::new(),
            debts: Vec::new(),
            tobacco: Vec::new(),
            user: serde_json::Value::Null,
        }
    }

    pub fn records(&self, entity: Entity) -> &[serde_json::Value] {
        match entity {
            Entity::Transaction => &self.transactions,
            Entity::Debt => &self.debts,
            Entity::Tobacco => &self.tobacco,
        }
    }

    pub fn records_mut(&mut self, entity: Entity) -> &mut Vec<serde_json::Value> {
        match entity {
            Entity::Transaction => &mut self.transactions,
            Entity::Debt => &mut self.debts,
            Entity::Tobacco => &mut self.tobacco,
        }
    }

    /// Count records across all entities.
    pub fn record_count(&self) -> usize {
        Entity::ALL.iter().map(|e| self.records(*e).len()).sum()
    }

    /// Split the records of `entity` into those the schema accepts and the
    /// number it rejected.
    pub fn valid_records(&self, entity: Entity, schema: &Schema) -> (Vec<serde_json::Value>, usize) {
        let mut valid = Vec::new();
        let mut rejected = 0;
        for record in self.records(entity) {
            match schema.validate_record(entity, record) {
                Ok(()) => valid.push(record.clone()),
                Err(e) => {
                    tracing::debug!(entity = %entity, error = %e, "Skipping invalid backup record");
                    rejected += 1;
                }
            }
        }
        (valid, rejected)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON, the form written to backup files.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.version > BACKUP_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported backup version: {} (max supported: {})",
                snapshot.version, BACKUP_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Accepts `1`, `"1"` and `"1.0"`; only the major part is kept.
fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawVersion {
        Number(u32),
        Text(String),
    }

    match RawVersion::deserialize(deserializer)? {
        RawVersion::Number(n) => Ok(n),
        RawVersion::Text(s) => s
            .split('.')
            .next()
            .and_then(|major| major.trim().parse().ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid version '{}'", s))),
    }
}
