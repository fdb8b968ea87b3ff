//! Payload schemas for the ledger entities.
//!
//! Schemas describe the fields each entity record carries and let the queue
//! reject malformed intents before they are persisted. Unknown fields are
//! always allowed; the remote store keeps them verbatim.

use crate::{error::Result, record::Entity, Error, NewOperation, OpKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Bool,
    /// ISO calendar date, `YYYY-MM-DD`
    Date,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Number => write!(f, "Number"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Date => write!(f, "Date"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in an entity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    ///
    /// With `partial` set, a missing required field is accepted; this is how
    /// update payloads, which carry only the changed fields, are checked.
    pub fn validate(&self, value: Option<&serde_json::Value>, partial: bool) -> Result<()> {
        let required = self.required && !partial;
        match value {
            None | Some(serde_json::Value::Null) if required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Date => value
                .as_str()
                .map(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
                .unwrap_or(false),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(_) => "Number",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Schema for one entity's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    pub entity: Entity,
    pub fields: Vec<FieldDef>,
}

impl EntitySchema {
    pub fn new(entity: Entity, fields: Vec<FieldDef>) -> Self {
        Self { entity, fields }
    }

    /// Validate a full record.
    pub fn validate_record(&self, record: &serde_json::Value) -> Result<()> {
        self.validate(record, false)
    }

    /// Validate a partial record (changed fields plus the key).
    pub fn validate_partial(&self, record: &serde_json::Value) -> Result<()> {
        self.validate(record, true)
    }

    fn validate(&self, record: &serde_json::Value, partial: bool) -> Result<()> {
        let obj = record
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

        for field in &self.fields {
            field.validate(obj.get(&field.name), partial)?;
        }

        Ok(())
    }
}

/// Schemas for all ledger entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub entities: HashMap<Entity, EntitySchema>,
}

impl Schema {
    /// An empty schema; every entity accepts any object.
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
        }
    }

    /// The field layout the bookkeeping app writes.
    pub fn ledger() -> Self {
        Self::new()
            .with_entity(EntitySchema::new(
                Entity::Transaction,
                vec![
                    FieldDef::required("client_id", FieldType::String),
                    FieldDef::required("amount", FieldType::Number),
                    FieldDef::optional("type", FieldType::String),
                    FieldDef::optional("category", FieldType::String),
                    FieldDef::optional("note", FieldType::String),
                    FieldDef::optional("date", FieldType::Date),
                ],
            ))
            .with_entity(EntitySchema::new(
                Entity::Debt,
                vec![
                    FieldDef::required("name", FieldType::String),
                    FieldDef::optional("amount", FieldType::Number),
                    FieldDef::optional("expression", FieldType::String),
                ],
            ))
            .with_entity(EntitySchema::new(
                Entity::Tobacco,
                vec![
                    FieldDef::required("client_id", FieldType::String),
                    FieldDef::optional("brand", FieldType::String),
                    FieldDef::optional("quantity", FieldType::Number),
                    FieldDef::optional("price", FieldType::Number),
                    FieldDef::optional("date", FieldType::Date),
                ],
            ))
    }

    pub fn with_entity(mut self, schema: EntitySchema) -> Self {
        self.entities.insert(schema.entity, schema);
        self
    }

    pub fn get(&self, entity: Entity) -> Option<&EntitySchema> {
        self.entities.get(&entity)
    }

    /// Validate a record destined for `entity`.
    pub fn validate_record(&self, entity: Entity, record: &serde_json::Value) -> Result<()> {
        if entity.natural_key(record).is_none() {
            return Err(Error::MissingRequiredField(entity.key_field().to_string()));
        }
        match self.get(entity) {
            Some(schema) => schema.validate_record(record),
            None => Ok(()),
        }
    }

    /// Validate an intent before it is queued.
    ///
    /// Every operation must carry its correlation key. Adds are checked as
    /// full records, updates as partial ones, deletes need only the key.
    pub fn validate_operation(&self, op: &NewOperation) -> Result<()> {
        let entity = op.op_type.entity();
        if op.correlation_key().is_none() {
            return Err(Error::MissingCorrelationKey {
                op_type: op.op_type,
                field: entity.key_field(),
            });
        }

        let Some(schema) = self.get(entity) else {
            return Ok(());
        };

        match op.op_type.kind() {
            OpKind::Add => schema.validate_record(&op.data),
            OpKind::Update => schema.validate_partial(&op.data),
            OpKind::Delete => Ok(()),
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::ledger()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperationType;
    use serde_json::json;

    #[test]
    fn validate_valid_transaction() {
        let schema = Schema::ledger();
        let tx = json!({"client_id": "tx_1", "amount": 50, "date": "2024-05-01"});
        assert!(schema.validate_record(Entity::Transaction, &tx).is_ok());
    }

    #[test]
    fn validate_missing_required_field() {
        let schema = Schema::ledger();
        let tx = json!({"client_id": "tx_1"});
        let result = schema.validate_record(Entity::Transaction, &tx);
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "amount"));
    }

    #[test]
    fn validate_wrong_type() {
        let schema = Schema::ledger();
        let tx = json!({"client_id": "tx_1", "amount": "fifty"});
        let result = schema.validate_record(Entity::Transaction, &tx);
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "amount"));
    }

    #[test]
    fn validate_bad_date() {
        let schema = Schema::ledger();
        let tx = json!({"client_id": "tx_1", "amount": 1, "date": "05/01/2024"});
        let result = schema.validate_record(Entity::Transaction, &tx);
        assert!(matches!(result, Err(Error::TypeMismatch { field, .. }) if field == "date"));
    }

    #[test]
    fn operation_requires_correlation_key() {
        let schema = Schema::ledger();
        let op = NewOperation::new(OperationType::AddTransaction, json!({"amount": 50}));
        assert!(matches!(
            schema.validate_operation(&op),
            Err(Error::MissingCorrelationKey { field: "client_id", .. })
        ));

        let op = NewOperation::new(OperationType::DeleteDebt, json!({"client_id": "x"}));
        assert!(matches!(
            schema.validate_operation(&op),
            Err(Error::MissingCorrelationKey { field: "name", .. })
        ));
    }

    #[test]
    fn update_is_partial_delete_is_key_only() {
        let schema = Schema::ledger();

        let update = NewOperation::new(
            OperationType::UpdateTransaction,
            json!({"client_id": "tx_1", "note": "lunch"}),
        );
        assert!(schema.validate_operation(&update).is_ok());

        let bad_update = NewOperation::new(
            OperationType::UpdateTransaction,
            json!({"client_id": "tx_1", "amount": "lots"}),
        );
        assert!(schema.validate_operation(&bad_update).is_err());

        let delete = NewOperation::new(OperationType::DeleteTobacco, json!({"client_id": "tb_1"}));
        assert!(schema.validate_operation(&delete).is_ok());
    }

    #[test]
    fn null_required_field() {
        let schema = Schema::ledger();
        let debt = json!({"name": null});
        let result = schema.validate_record(Entity::Debt, &debt);
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "name"));
    }

    #[test]
    fn empty_schema_accepts_any_object_with_key() {
        let schema = Schema::new();
        assert!(schema
            .validate_record(Entity::Tobacco, &json!({"client_id": "tb", "x": [1, 2]}))
            .is_ok());
    }

    #[test]
    fn json_field_accepts_any() {
        let entity = EntitySchema::new(
            Entity::Debt,
            vec![FieldDef::required("data", FieldType::Json)],
        );
        assert!(entity.validate_record(&json!({"data": "string"})).is_ok());
        assert!(entity.validate_record(&json!({"data": [1, 2, 3]})).is_ok());
        assert!(entity
            .validate_record(&json!({"data": {"nested": "object"}}))
            .is_ok());
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::String.to_string(), "String");
        assert_eq!(FieldType::Date.to_string(), "Date");
    }
}
