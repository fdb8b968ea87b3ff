//! Ledger record types.
//!
//! Two shapes of data live here: the per-entity records that travel through
//! the operation queue, and the whole-dataset [`LedgerDocument`] used by the
//! bulk load/save path and the local mirror. The document is a view over the
//! transaction and debt records: [`LedgerDocument::from_records`] and
//! [`LedgerDocument::to_records`] convert between the two.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `type` of a transaction filed under a day's incomes.
pub const INCOME: &str = "income";
/// `type` of a transaction filed under a day's expenses.
pub const EXPENSE: &str = "expense";

/// Transaction fields a [`LineItem`] holds outside its `extra` map.
const LINE_FIELDS: [&str; 6] = ["client_id", "amount", "type", "date", "category", "note"];

/// Entity collections known to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    /// Income and expense line items
    Transaction,
    /// Debt ledger entries, keyed by the debtor's name
    Debt,
    /// Tobacco purchases
    Tobacco,
}

impl Entity {
    /// All entities, in restore order.
    pub const ALL: [Entity; 3] = [Entity::Transaction, Entity::Debt, Entity::Tobacco];

    /// Name of the field holding the natural key of a record.
    pub fn key_field(self) -> &'static str {
        match self {
            Entity::Debt => "name",
            Entity::Transaction | Entity::Tobacco => "client_id",
        }
    }

    /// Collection name used on the wire.
    pub fn collection(self) -> &'static str {
        match self {
            Entity::Transaction => "transactions",
            Entity::Debt => "debts",
            Entity::Tobacco => "tobacco",
        }
    }

    /// Parse a wire collection name.
    pub fn from_collection(name: &str) -> Option<Self> {
        Entity::ALL.into_iter().find(|e| e.collection() == name)
    }

    /// Extract the natural key from a record payload.
    pub fn natural_key(self, record: &serde_json::Value) -> Option<String> {
        match record.get(self.key_field())? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

/// One income or expense line of a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Locally unique identity, assigned at load time when missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Fields this engine does not interpret, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The incomes and expenses recorded on one date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayBook {
    #[serde(default)]
    pub incomes: Vec<LineItem>,
    #[serde(default)]
    pub expenses: Vec<LineItem>,
}

/// A debt ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debt {
    pub name: String,
    #[serde(default)]
    pub amount: f64,
    /// Arithmetic expression the amount was accumulated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LineItem {
    fn from_record(record: &Value) -> Self {
        let text = |field: &str| record.get(field).and_then(Value::as_str).map(str::to_string);
        Self {
            id: Entity::Transaction.natural_key(record),
            amount: record.get("amount").and_then(Value::as_f64).unwrap_or_default(),
            category: text("category"),
            note: text("note"),
            extra: record
                .as_object()
                .into_iter()
                .flatten()
                .filter(|(field, _)| !LINE_FIELDS.contains(&field.as_str()))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        }
    }

    /// The transaction record for this item, `None` while it has no id.
    fn to_record(&self, date: &str, kind: &str) -> Option<Value> {
        let id = self.id.as_deref().filter(|id| !id.is_empty())?;
        let mut record = self.extra.clone();
        record.insert("client_id".into(), id.into());
        record.insert("amount".into(), self.amount.into());
        record.insert("type".into(), kind.into());
        record.insert("date".into(), date.into());
        if let Some(category) = &self.category {
            record.insert("category".into(), category.as_str().into());
        }
        if let Some(note) = &self.note {
            record.insert("note".into(), note.as_str().into());
        }
        Some(Value::Object(record))
    }
}

impl Debt {
    pub fn new(name: impl Into<String>, amount: f64) -> Self {
        Self {
            name: name.into(),
            amount,
            expression: None,
            extra: serde_json::Map::new(),
        }
    }

    fn to_record(&self) -> Value {
        let mut record = self.extra.clone();
        record.insert("name".into(), self.name.as_str().into());
        record.insert("amount".into(), self.amount.into());
        if let Some(expression) = &self.expression {
            record.insert("expression".into(), expression.as_str().into());
        }
        Value::Object(record)
    }
}

/// The whole of one user's bookkeeping data, as loaded and saved in bulk.
///
/// `history` is keyed by ISO date; a `BTreeMap` keeps serialization stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(default)]
    pub history: BTreeMap<String, DayBook>,
    #[serde(default)]
    pub debts: Vec<Debt>,
}

impl LedgerDocument {
    /// Build the document from the transaction and debt collections.
    ///
    /// Transactions are filed under their `date` and split on `type`;
    /// anything but [`INCOME`] is an expense. A transaction without a date
    /// has no day to live in and is left out, as is any malformed record.
    pub fn from_records(transactions: Vec<Value>, debts: Vec<Value>) -> Self {
        let mut document = Self::default();

        for record in &transactions {
            let Some(fields) = record.as_object() else {
                tracing::warn!("Skipping non-object transaction record");
                continue;
            };
            let Some(date) = fields.get("date").and_then(Value::as_str) else {
                tracing::warn!(
                    client_id = ?fields.get("client_id"),
                    "Transaction has no date, leaving it out of the ledger"
                );
                continue;
            };
            let day = document.history.entry(date.to_string()).or_default();
            let item = LineItem::from_record(record);
            match fields.get("type").and_then(Value::as_str) {
                Some(INCOME) => day.incomes.push(item),
                _ => day.expenses.push(item),
            }
        }

        for record in debts {
            match serde_json::from_value::<Debt>(record) {
                Ok(debt) => document.debts.push(debt),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed debt record"),
            }
        }

        document
    }

    /// Flatten the document into transaction and debt records.
    ///
    /// Line items without an id are left out; run
    /// [`ensure_item_ids`](Self::ensure_item_ids) first.
    pub fn to_records(&self) -> (Vec<Value>, Vec<Value>) {
        let transactions = self
            .history
            .iter()
            .flat_map(|(date, day)| {
                let incomes = day.incomes.iter().filter_map(move |i| i.to_record(date, INCOME));
                let expenses = day.expenses.iter().filter_map(move |i| i.to_record(date, EXPENSE));
                incomes.chain(expenses)
            })
            .collect();
        let debts = self.debts.iter().map(Debt::to_record).collect();
        (transactions, debts)
    }

    /// Give every line item without an id a fresh one.
    ///
    /// Returns how many ids were assigned.
    pub fn ensure_item_ids(&mut self) -> usize {
        let mut assigned = 0;
        for day in self.history.values_mut() {
            for item in day.incomes.iter_mut().chain(day.expenses.iter_mut()) {
                if item.id.as_deref().map_or(true, str::is_empty) {
                    item.id = Some(uuid::Uuid::new_v4().to_string());
                    assigned += 1;
                }
            }
        }
        assigned
    }

    /// Look up a debt by name.
    pub fn debt(&self, name: &str) -> Option<&Debt> {
        self.debts.iter().find(|d| d.name == name)
    }

    /// Total number of line items across all days.
    pub fn item_count(&self) -> usize {
        self.history
            .values()
            .map(|d| d.incomes.len() + d.expenses.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.debts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use serde_json::json;

    #[test]
    fn natural_keys() {
        let tx = json!({"client_id": "tx_1", "amount": 50});
        assert_eq!(Entity::Transaction.natural_key(&tx), Some("tx_1".into()));
        assert_eq!(Entity::Debt.natural_key(&tx), None);

        let debt = json!({"name": "张三", "amount": 500});
        assert_eq!(Entity::Debt.natural_key(&debt), Some("张三".into()));

        let empty = json!({"client_id": ""});
        assert_eq!(Entity::Tobacco.natural_key(&empty), None);
    }

    #[test]
    fn collection_names() {
        for entity in Entity::ALL {
            assert_eq!(Entity::from_collection(entity.collection()), Some(entity));
        }
        assert_eq!(Entity::from_collection("users"), None);
    }

    #[test]
    fn ensure_item_ids_fills_only_missing() {
        let mut doc: LedgerDocument = serde_json::from_value(json!({
            "history": {
                "2024-05-01": {
                    "incomes": [{"id": "keep", "amount": 10}],
                    "expenses": [{"amount": 3.5, "category": "food"}, {"id": "", "amount": 1}]
                }
            },
            "debts": []
        }))
        .unwrap();

        assert_eq!(doc.ensure_item_ids(), 2);
        let day = &doc.history["2024-05-01"];
        assert_eq!(day.incomes[0].id.as_deref(), Some("keep"));
        assert!(day.expenses.iter().all(|i| i.id.is_some()));
        assert_ne!(day.expenses[0].id, day.expenses[1].id);

        // Second pass is a no-op
        assert_eq!(doc.ensure_item_ids(), 0);
    }

    #[test]
    fn records_are_filed_by_date_and_type() {
        let transactions = vec![
            json!({"client_id": "tx_1", "amount": 20, "type": "income", "date": "2024-05-01"}),
            json!({"client_id": "tx_2", "amount": 3.5, "type": "expense", "date": "2024-05-01",
                   "category": "food", "shop": "corner"}),
            json!({"client_id": "tx_3", "amount": 9, "date": "2024-05-02"}),
            json!({"client_id": "tx_4", "amount": 1}),
        ];
        let debts = vec![json!({"name": "张三", "amount": 500}), json!({"amount": 1})];

        let doc = LedgerDocument::from_records(transactions, debts);
        assert_eq!(doc.item_count(), 3);
        assert_eq!(doc.history["2024-05-01"].incomes[0].id.as_deref(), Some("tx_1"));
        let expense = &doc.history["2024-05-01"].expenses[0];
        assert_eq!(expense.category.as_deref(), Some("food"));
        assert_eq!(expense.extra, json!({"shop": "corner"}).as_object().unwrap().clone());
        // Untyped transactions count as expenses
        assert_eq!(doc.history["2024-05-02"].expenses.len(), 1);
        assert_eq!(doc.debts, vec![Debt::new("张三", 500.0)]);
    }

    #[test]
    fn records_carry_date_type_and_extras() {
        let doc: LedgerDocument = serde_json::from_value(json!({
            "history": {
                "2024-05-01": {
                    "incomes": [{"id": "i1", "amount": 20, "shop": "corner"}],
                    "expenses": [{"id": "e1", "amount": 3.5, "note": "lunch"}, {"amount": 1}]
                }
            },
            "debts": [{"name": "李四", "amount": 20, "expression": "10+10"}]
        }))
        .unwrap();

        let (transactions, debts) = doc.to_records();
        assert_eq!(transactions.len(), 2, "items without an id are left out");
        assert_eq!(transactions[0]["client_id"], "i1");
        assert_eq!(transactions[0]["type"], INCOME);
        assert_eq!(transactions[0]["date"], "2024-05-01");
        assert_eq!(transactions[0]["shop"], "corner");
        assert_eq!(transactions[1]["type"], EXPENSE);
        assert_eq!(transactions[1]["note"], "lunch");
        assert_eq!(debts[0]["expression"], "10+10");
        assert_eq!(debts[0]["amount"].as_f64(), Some(20.0));

        assert!(Schema::ledger()
            .validate_record(Entity::Transaction, &transactions[1])
            .is_ok());
    }

    #[test]
    fn unknown_fields_survive() {
        let raw = json!({"name": "李四", "amount": 20.5, "phone": "123"});
        let debt: Debt = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(debt.extra.get("phone"), Some(&json!("123")));
        assert_eq!(serde_json::to_value(&debt).unwrap(), raw);
    }
}
