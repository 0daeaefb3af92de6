use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::model::field::Quoting;
use crate::model::form::SqlFragment;
use crate::template::{apply_template, render_value, TemplateInput, Values};

/// Parameter that stands for the current screen's key, defaulted to the selection id.
pub const KEY_PARAM: &str = "keylabel";

/// Accepts a plain table or column name.
pub fn ident(name: &str) -> EngineResult<&str> {
    let name = name.trim();
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(EngineError::InvalidIdentifier(name.to_string()))
    }
}

/// Node ids go in bare when numeric, quoted otherwise.
pub fn id_literal(id: &str) -> String {
    let id = id.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        id.to_string()
    } else {
        render_value(Some(&Value::String(id.to_string())), Quoting::Quoted)
    }
}

fn clause(c: &Option<String>) -> Option<&str> {
    c.as_deref().map(str::trim).filter(|c| !c.is_empty())
}

/// Adds the screen key parameter unless the caller supplied one.
pub fn screen_params(selection_id: &str, mut params: Values) -> Values {
    if !params.contains_key(KEY_PARAM) {
        params.insert(KEY_PARAM.to_string(), Value::String(selection_id.to_string()));
    }
    params
}

/// Builds the literal select for `fragment`, filling `:name` tokens of `from` and `where`.
pub fn synthesize_select(fragment: &SqlFragment, params: &Values) -> EngineResult<String> {
    let input = TemplateInput::new(params);
    let select = clause(&fragment.select).unwrap_or("*");
    let from = clause(&fragment.from).ok_or(EngineError::IncompleteFragment("from"))?;

    let mut sql = format!("SELECT {} FROM {}", select, apply_template(from, &input));
    if let Some(where_clause) = clause(&fragment.where_clause) {
        sql.push_str(" WHERE ");
        sql.push_str(&apply_template(where_clause, &input));
    }
    if let Some(order) = clause(&fragment.order) {
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
    }
    Ok(sql)
}

/// One wide join of a `forma` node with every child kind of its selection.
pub fn form_tree_statement(table: &str, form_id: &str) -> EngineResult<String> {
    let t = ident(table)?;
    Ok(format!(
        "select v.pole as selection, s.pole as `select`, s.id as id_select, f.pole as `from`, \
         w.pole as `where`, o.pole as `order`, i.pole as field, t.pole as `insert`, t.id as id_insert, \
         u.pole as `update`, u.id as id_update, d.pole as `delete`, d.id as id_delete from {t} m \
         left join {t} v on v.id_ref=m.id and v.tip='selection' \
         left join {t} s on s.id_ref=v.id and s.tip='select' \
         left join {t} i on i.id_ref=v.id and i.tip='field_select' \
         left join {t} f on f.id_ref=v.id and f.tip='from_select' \
         left join {t} w on w.id_ref=v.id and w.tip='where_select' \
         left join {t} o on o.id_ref=v.id and o.tip='order_select' \
         left join {t} t on t.id_ref=v.id and t.tip='insert_selection' \
         left join {t} u on u.id_ref=v.id and u.tip='update_selection' \
         left join {t} d on d.id_ref=v.id and d.tip='delete_selection' \
         where m.tip='forma' and m.id={id}",
        t = t,
        id = id_literal(form_id),
    ))
}

/// Batched translation lookup for `names` in `lang_id`.
pub fn translation_statement<'a, I>(table: &str, names: I, lang_id: i64) -> EngineResult<Option<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    if seen.is_empty() {
        return Ok(None);
    }
    let predicates = seen
        .iter()
        .map(|n| format!("name={}", render_value(Some(&Value::String(n.to_string())), Quoting::Quoted)))
        .collect::<Vec<_>>()
        .join(" OR ");
    let fragment = SqlFragment::new("*", ident(table)?)
        .with_where(&format!("({}) AND id_lang={}", predicates, lang_id));
    synthesize_select(&fragment, &Values::new()).map(Some)
}

pub fn forms_statement(table: &str) -> EngineResult<String> {
    Ok(format!("SELECT * FROM {} WHERE tip='forma'", ident(table)?))
}

pub fn nav_nodes_statement(table: &str) -> EngineResult<String> {
    Ok(format!(
        "SELECT id, id_ref, tip, pole FROM {} WHERE tip IN ('menu_section', 'forma') ORDER BY id",
        ident(table)?
    ))
}

pub fn languages_statement(table: &str) -> EngineResult<String> {
    synthesize_select(
        &SqlFragment::new("*", ident(table)?).with_where("active=1"),
        &Values::new(),
    )
}

pub fn count_statement(table: &str, where_clause: Option<&str>) -> EngineResult<String> {
    let t = ident(table)?;
    Ok(match where_clause.map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => format!("SELECT count(*) FROM {} WHERE {}", t, w),
        None => format!("SELECT count(*) FROM {}", t),
    })
}

pub fn max_statement(table: &str, column: &str) -> EngineResult<String> {
    Ok(format!("SELECT max({}) as max FROM {}", ident(column)?, ident(table)?))
}
