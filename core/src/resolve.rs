use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::endpoint::{column_text, QueryEndpoint, Row};
use crate::error::{EngineError, EngineResult};
use crate::meta::{decode_pole, merge_into};
use crate::model::field::FieldDescriptor;
use crate::model::form::{FormDescriptor, QueryId, Selection, SqlFragment, Templates};
use crate::sql;

type Payload = Map<String, Value>;

/// One row of the wide form join, payload columns decoded.
#[derive(Debug, Default)]
struct FormRow {
    selection: Option<Payload>,
    select: Option<Payload>,
    from: Option<Payload>,
    where_clause: Option<Payload>,
    order: Option<Payload>,
    field: Option<Payload>,
    insert: Option<Payload>,
    update: Option<Payload>,
    delete: Option<Payload>,
    query_id: QueryId,
}

impl FormRow {
    fn from_row(row: &Row) -> Self {
        let pole = |col: &str| row.get(col).and_then(decode_pole);
        Self {
            selection: pole("selection"),
            select: pole("select"),
            from: pole("from"),
            where_clause: pole("where"),
            order: pole("order"),
            field: pole("field"),
            insert: pole("insert"),
            update: pole("update"),
            delete: pole("delete"),
            query_id: QueryId {
                select: column_text(row, "id_select"),
                insert: column_text(row, "id_insert"),
                update: column_text(row, "id_update"),
                delete: column_text(row, "id_delete"),
            },
        }
    }

    fn fragment(&self) -> SqlFragment {
        let text = |p: &Option<Payload>, key: &str| {
            p.as_ref()
                .and_then(|p| p.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        SqlFragment {
            select: text(&self.select, "clause"),
            from: text(&self.from, "clause"),
            where_clause: text(&self.where_clause, "clause"),
            order: text(&self.order, "order"),
        }
    }
}

fn split_top_level(s: &str, sep: u8) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ if b == sep && depth == 0 => {
                    parts.push(&s[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
        }
        i += 1;
    }
    parts.push(&s[start..]);
    parts
}

/// Byte offset just past the last top-level ` as ` keyword.
fn alias_start(projection: &str) -> Option<usize> {
    let bytes = projection.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut found = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ if depth == 0
                    && b.is_ascii_whitespace()
                    && i + 3 < bytes.len()
                    && bytes[i + 1..i + 3].eq_ignore_ascii_case(b"as")
                    && bytes[i + 3].is_ascii_whitespace() =>
                {
                    found = Some(i + 4);
                }
                _ => {}
            },
        }
        i += 1;
    }
    found
}

fn unquote_ident(name: &str) -> &str {
    let name = name.trim();
    for q in ['`', '"'] {
        if name.len() >= 2 && name.starts_with(q) && name.ends_with(q) {
            return &name[1..name.len() - 1];
        }
    }
    name
}

/// Display names of the projections of a select clause, in order.
pub fn projection_names(select: &str) -> Vec<String> {
    split_top_level(select, b',')
        .into_iter()
        .map(|projection| {
            let projection = projection.trim();
            let name = match alias_start(projection) {
                Some(pos) => &projection[pos..],
                None => projection,
            };
            unquote_ident(name).to_string()
        })
        .collect()
}

#[derive(Default)]
struct FormFold {
    selection: Payload,
    fields: Vec<(String, Payload)>,
    orders: HashMap<String, usize>,
    select: Vec<SqlFragment>,
    insert: Payload,
    update: Payload,
    delete: Payload,
    query_id: QueryId,
}

impl FormFold {
    fn push(&mut self, row: FormRow) {
        let fragment = row.fragment();
        let names = fragment
            .select
            .as_deref()
            .map(projection_names)
            .unwrap_or_default();

        if let Some(field) = row.field {
            for (name, attrs) in field {
                let attrs = match attrs {
                    Value::Object(attrs) => attrs,
                    Value::Null => Payload::new(),
                    other => {
                        log::debug!("field {} has non-object payload {}", name, other);
                        Payload::new()
                    }
                };
                if let Some(pos) = names.iter().position(|n| *n == name) {
                    self.orders.insert(name.clone(), pos);
                }
                // a later definition replaces the whole field but keeps its first-seen slot
                match self.fields.iter_mut().find(|(n, _)| *n == name) {
                    Some((_, existing)) => *existing = attrs,
                    None => self.fields.push((name, attrs)),
                }
            }
        }

        if !self.select.contains(&fragment) {
            self.select.push(fragment);
        }

        for (dst, src) in [
            (&mut self.selection, row.selection),
            (&mut self.insert, row.insert),
            (&mut self.update, row.update),
            (&mut self.delete, row.delete),
        ] {
            if let Some(src) = src {
                merge_into(dst, src);
            }
        }

        let ids = row.query_id;
        self.query_id.select = ids.select.or(self.query_id.select.take());
        self.query_id.insert = ids.insert.or(self.query_id.insert.take());
        self.query_id.update = ids.update.or(self.query_id.update.take());
        self.query_id.delete = ids.delete.or(self.query_id.delete.take());
    }

    fn finish(self) -> FormDescriptor {
        let orders = self.orders;
        let mut keylabel = String::new();
        let mut fields: Vec<FieldDescriptor> = self
            .fields
            .into_iter()
            .map(|(name, payload)| {
                let mut field = FieldDescriptor::from_payload(&name, payload);
                field.order = orders.get(&name).copied();
                if keylabel.is_empty() && field.is_key() {
                    keylabel = name;
                }
                field
            })
            .collect();
        fields.sort_by_key(|f| f.order.unwrap_or(usize::MAX));

        FormDescriptor {
            selection: Selection::from_payload(self.selection),
            fields,
            select: self.select,
            insert: Templates(self.insert),
            update: Templates(self.update),
            delete_query: Templates(self.delete),
            query_id: self.query_id,
            keylabel,
        }
    }
}

/// Folds the rows of the wide form join into one descriptor.
pub fn fold_rows(rows: &[Row]) -> FormDescriptor {
    let mut fold = FormFold::default();
    for row in rows {
        fold.push(FormRow::from_row(row));
    }
    fold.finish()
}

/// Fetches the metadata tree of `form_id` from `table` and folds it.
///
/// Value domains and translations are not resolved here.
pub async fn fetch_form(
    endpoint: &dyn QueryEndpoint,
    table: &str,
    form_id: &str,
) -> EngineResult<FormDescriptor> {
    let sql = sql::form_tree_statement(table, form_id)?;
    let rows = endpoint.select(&sql).await?;
    if rows.is_empty() {
        return Err(EngineError::NotFound(format!("form {} in {}", form_id, table)));
    }
    log::debug!("form {}/{}: {} metadata rows", table, form_id, rows.len());
    Ok(fold_rows(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEndpoint;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    fn clients_rows() -> Vec<Row> {
        vec![
            row(json!({
                "selection": "{\"name\":\"Clients\"}",
                "select": "{\"clause\":\"id, name as client_name\"}",
                "id_select": 11,
                "from": "{\"clause\":\"clients\"}",
                "field": "{\"id\":{}}",
            })),
            row(json!({
                "selection": "{\"name\":\"Clients\"}",
                "select": "{\"clause\":\"id, name as client_name\"}",
                "id_select": 11,
                "from": "{\"clause\":\"clients\"}",
                "field": "{\"client_name\":{\"label\":\"Name\",\"keylable\":\"Y\"}}",
            })),
        ]
    }

    #[test]
    fn test_projection_names() {
        assert_eq!(projection_names("a, b as bb, c"), vec!["a", "bb", "c"]);
        assert_eq!(
            projection_names("concat(a, ', ', b) AS full, cast(x as char) as `x_txt`, t.y"),
            vec!["full", "x_txt", "t.y"]
        );
        assert_eq!(projection_names("alias_col"), vec!["alias_col"]);
    }

    #[test]
    fn test_order_from_select() {
        let rows = vec![row(json!({
            "select": "{\"clause\":\"a, b as bb, c\"}",
            "field": "{\"zz\":{},\"bb\":{},\"a\":{},\"yy\":{}}",
        }))];
        let d = fold_rows(&rows);
        let names: Vec<_> = d.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "bb", "zz", "yy"]);
        assert_eq!(d.field("a").unwrap().order, Some(0));
        assert_eq!(d.field("bb").unwrap().order, Some(1));
        assert_eq!(d.field("zz").unwrap().order, None);
    }

    #[test]
    fn test_missing_children_default_empty() {
        let rows = vec![row(json!({
            "selection": null,
            "select": null,
            "field": null,
            "insert": null,
        }))];
        let d = fold_rows(&rows);
        assert_eq!(d.selection, Selection::default());
        assert!(d.fields.is_empty());
        assert!(d.insert.0.is_empty());
        assert!(d.update.0.is_empty());
        assert!(d.delete_query.0.is_empty());
        assert_eq!(d.select, vec![SqlFragment::default()]);
        assert_eq!(d.keylabel, "");
    }

    #[test]
    fn test_malformed_payload_is_absent() {
        let rows = vec![row(json!({
            "selection": "{\"name\":",
            "select": "{\"clause\":\"id\"}",
            "from": "{\"clause\":\"t\"}",
            "field": "{\"id\":{\"type\":\"int\"}}",
            "update": "not json at all",
        }))];
        let d = fold_rows(&rows);
        assert_eq!(d.selection.name, None);
        assert!(d.update.0.is_empty());
        assert_eq!(d.fields.len(), 1);
        assert!(!d.fields[0].with_quotes());
    }

    #[test]
    fn test_select_dedup() {
        let d = fold_rows(&clients_rows());
        assert_eq!(d.select.len(), 1);
        assert_eq!(d.select[0], SqlFragment::new("id, name as client_name", "clients"));
        assert_eq!(d.query_id.select.as_deref(), Some("11"));
    }

    #[test]
    fn test_clients_scenario() {
        let d = fold_rows(&clients_rows());
        assert_eq!(d.selection.name.as_deref(), Some("Clients"));
        assert_eq!(d.fields.len(), 2);
        assert_eq!(d.fields[0].name, "id");
        assert_eq!(d.fields[0].order, Some(0));
        assert_eq!(d.fields[1].name, "client_name");
        assert_eq!(d.fields[1].order, Some(1));
        assert_eq!(d.fields[1].label.as_deref(), Some("Name"));
        assert_eq!(d.keylabel, "client_name");
    }

    #[test]
    fn test_merges_last_write_wins() {
        let rows = vec![
            row(json!({
                "insert": "{\"i1\":\"INSERT 1\"}",
                "update": "{\"u1\":\"UPDATE 1\"}",
                "field": "{\"a\":{\"label\":\"A\",\"type\":\"int\"}}",
            })),
            row(json!({
                "insert": "{\"i1\":\"INSERT 2\"}",
                "delete": "{\"d1\":\"DELETE 1\"}",
                "field": "{\"a\":{\"label\":\"A2\"}}",
            })),
        ];
        let d = fold_rows(&rows);
        assert_eq!(d.insert_template(), Some("INSERT 2"));
        assert_eq!(d.update_template(), Some("UPDATE 1"));
        assert_eq!(d.delete_template(), Some("DELETE 1"));
        let a = d.field("a").unwrap();
        assert_eq!(a.label.as_deref(), Some("A2"));
    }

    #[test]
    fn test_later_field_definition_replaces_earlier() {
        let rows = vec![
            row(json!({"field": "{\"a\":{\"label\":\"A\",\"type\":\"int\"},\"b\":{}}"})),
            row(json!({"field": "{\"a\":{\"label\":\"A2\"}}"})),
        ];
        let d = fold_rows(&rows);
        let names: Vec<_> = d.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        let a = d.field("a").unwrap();
        assert_eq!(a.label.as_deref(), Some("A2"));
        assert_eq!(a.sql_type, None);
        assert!(a.with_quotes());
    }

    #[test]
    fn test_first_key_field_wins() {
        let rows = vec![row(json!({
            "field": "{\"a\":{\"keylable\":\"Y\"},\"b\":{\"keylable\":\"Y\"},\"c\":{\"keylable\":\"N\"}}",
        }))];
        assert_eq!(fold_rows(&rows).keylabel, "a");
    }

    #[tokio::test]
    async fn test_fetch_form() {
        let endpoint = MockEndpoint::new().with_select("from metabase m", clients_rows());
        let d = fetch_form(&endpoint, "metabase", "5").await.unwrap();
        assert_eq!(d.keylabel, "client_name");
        let issued = endpoint.issued();
        assert_eq!(issued.len(), 1);
        assert!(issued[0].1.ends_with("m.id=5"));
    }

    #[tokio::test]
    async fn test_fetch_form_failure_propagates() {
        let endpoint = MockEndpoint::new().with_error("from metabase m", "table is locked");
        match fetch_form(&endpoint, "metabase", "5").await {
            Err(EngineError::Backend { message, sql }) => {
                assert_eq!(message, "table is locked");
                assert!(sql.contains("from metabase m"));
            }
            other => panic!("Expected backend error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_fetch_unknown_form() {
        let endpoint = MockEndpoint::new();
        assert!(matches!(
            fetch_form(&endpoint, "metabase", "404").await,
            Err(EngineError::NotFound(_))
        ));
    }
}
