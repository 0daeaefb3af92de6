use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::field::FieldDescriptor;
use crate::endpoint::Row;

pub const INSERT_TEMPLATE: &str = "i1";
pub const UPDATE_TEMPLATE: &str = "u1";
pub const DELETE_TEMPLATE: &str = "d1";

const SELECTION_LIST: &str = "selection_list";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang_values_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Selection {
    pub fn from_payload(payload: Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(payload.clone())).unwrap_or_else(|e| {
            log::warn!("selection payload kept untyped: {}", e);
            Self {
                extra: payload,
                ..Default::default()
            }
        })
    }

    pub fn is_list(&self) -> bool {
        self.kod.as_deref().map(str::trim) == Some(SELECTION_LIST)
    }
}

/// Clauses of one select before synthesis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

impl SqlFragment {
    pub fn new(select: &str, from: &str) -> Self {
        Self {
            select: Some(select.to_string()),
            from: Some(from.to_string()),
            ..Default::default()
        }
    }

    pub fn with_where(mut self, where_clause: &str) -> Self {
        self.where_clause = Some(where_clause.to_string());
        self
    }

    pub fn with_order(mut self, order: &str) -> Self {
        self.order = Some(order.to_string());
        self
    }
}

/// Mutation statement templates keyed by slot (`i1`, `u1`, `d1`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Templates(pub Map<String, Value>);

impl Templates {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// Node ids of the statement nodes a descriptor was built from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

/// Fully resolved description of one screen.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormDescriptor {
    pub selection: Selection,
    pub fields: Vec<FieldDescriptor>,
    pub select: Vec<SqlFragment>,
    pub insert: Templates,
    pub update: Templates,
    #[serde(rename = "deleteQuery")]
    pub delete_query: Templates,
    #[serde(rename = "queryId")]
    pub query_id: QueryId,
    /// Key column name, empty when no field is flagged as key.
    pub keylabel: String,
}

impl FormDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The fragment screens read rows with.
    pub fn primary_select(&self) -> Option<&SqlFragment> {
        self.select.first()
    }

    pub fn key_column(&self) -> Option<&str> {
        if self.keylabel.is_empty() {
            None
        } else {
            Some(&self.keylabel)
        }
    }

    /// Identity of `row`, read from the key column.
    pub fn row_key<'a>(&self, row: &'a Row) -> Option<&'a Value> {
        row.get(self.key_column()?)
    }

    pub fn insert_template(&self) -> Option<&str> {
        self.insert.get(INSERT_TEMPLATE)
    }

    pub fn update_template(&self) -> Option<&str> {
        self.update.get(UPDATE_TEMPLATE)
    }

    pub fn delete_template(&self) -> Option<&str> {
        self.delete_query.get(DELETE_TEMPLATE)
    }
}
