use serde_json::{Map, Value};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::endpoint::{column_text, Row};

/// Kind of a metadata node, stored in the `tip` column.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    Forma,
    Selection,
    Select,
    FromSelect,
    WhereSelect,
    OrderSelect,
    FieldSelect,
    InsertSelection,
    UpdateSelection,
    DeleteSelection,
    MenuSection,
}

/// One row of a metadata table with its payload already decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaNode {
    pub id: String,
    pub id_ref: Option<String>,
    pub tip: NodeKind,
    pub pole: Map<String, Value>,
}

impl MetaNode {
    /// Rows with an unknown `tip` or without an `id` are skipped; a broken payload becomes empty.
    pub fn from_row(row: &Row) -> Option<Self> {
        let id = column_text(row, "id")?;
        let tip = column_text(row, "tip")?;
        let tip = match NodeKind::from_str(tip.trim()) {
            Ok(tip) => tip,
            Err(_) => {
                log::debug!("skip node {} with unknown tip {:?}", id, tip);
                return None;
            }
        };
        Some(Self {
            id_ref: column_text(row, "id_ref"),
            pole: row.get("pole").and_then(decode_pole).unwrap_or_default(),
            id,
            tip,
        })
    }

    pub fn pole_str(&self, key: &str) -> Option<&str> {
        self.pole.get(key).and_then(Value::as_str)
    }
}

/// Decodes a `pole` payload.
///
/// Backends hand out JSON columns either as text or already decoded. Anything that is not a JSON
/// object after decoding counts as absent.
pub fn decode_pole(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(obj) => Some(obj.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(obj)) => Some(obj),
            Ok(_) => None,
            Err(e) => {
                log::debug!("undecodable payload: {}", e);
                None
            }
        },
        _ => None,
    }
}

/// Shallow last-write-wins merge of `src` into `dst`.
pub fn merge_into(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (k, v) in src {
        dst.insert(k, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_kind_names() {
        assert_eq!(NodeKind::from_str("field_select").unwrap(), NodeKind::FieldSelect);
        assert_eq!(NodeKind::from_str("forma").unwrap(), NodeKind::Forma);
        assert_eq!(NodeKind::MenuSection.to_string(), "menu_section");
        assert!(NodeKind::from_str("nonsense").is_err());
    }

    #[test]
    fn test_decode_pole() {
        assert_eq!(
            decode_pole(&json!("{\"clause\":\"a, b\"}")),
            Some(json!({"clause": "a, b"}).as_object().unwrap().clone())
        );
        assert_eq!(
            decode_pole(&json!({"name": "Clients"})),
            Some(json!({"name": "Clients"}).as_object().unwrap().clone())
        );
        assert_eq!(decode_pole(&json!("{broken")), None);
        assert_eq!(decode_pole(&json!("[1,2]")), None);
        assert_eq!(decode_pole(&Value::Null), None);
    }

    #[test]
    fn test_node_from_row() {
        let row = json!({"id": 7, "id_ref": null, "tip": "forma", "pole": "{\"name\":\"Clients\"}"});
        let node = MetaNode::from_row(row.as_object().unwrap()).unwrap();
        assert_eq!(node.id, "7");
        assert_eq!(node.id_ref, None);
        assert_eq!(node.tip, NodeKind::Forma);
        assert_eq!(node.pole_str("name"), Some("Clients"));

        let row = json!({"id": 8, "id_ref": 7, "tip": "selection", "pole": "not json"});
        let node = MetaNode::from_row(row.as_object().unwrap()).unwrap();
        assert_eq!(node.id_ref.as_deref(), Some("7"));
        assert!(node.pole.is_empty());

        let row = json!({"id": 9, "tip": "widget", "pole": "{}"});
        assert!(MetaNode::from_row(row.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_merge_last_write_wins() {
        let mut dst = json!({"a": 1, "b": 2}).as_object().unwrap().clone();
        merge_into(&mut dst, json!({"b": 3, "c": 4}).as_object().unwrap().clone());
        assert_eq!(Value::Object(dst), json!({"a": 1, "b": 3, "c": 4}));
    }
}
