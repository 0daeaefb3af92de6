use futures::future::try_join_all;
use std::collections::HashMap;

use crate::endpoint::QueryEndpoint;
use crate::error::EngineResult;
use crate::meta::{MetaNode, NodeKind};
use crate::model::nav::{FormEntry, Menu, NavForm, NavSection};
use crate::options::fetch_translations;
use crate::sql;

/// Forms of `table` as `{id, label}`, labelled by their payload name.
pub async fn list_forms(endpoint: &dyn QueryEndpoint, table: &str) -> EngineResult<Vec<FormEntry>> {
    let rows = endpoint.select(&sql::forms_statement(table)?).await?;
    Ok(rows
        .iter()
        .filter_map(MetaNode::from_row)
        .filter(|node| node.tip == NodeKind::Forma)
        .map(|node| FormEntry {
            label: node.pole_str("name").unwrap_or(node.id.as_str()).to_string(),
            id: node.id,
        })
        .collect())
}

fn label_of(node: &MetaNode, translations: &HashMap<String, String>) -> String {
    let lang_name = node.pole_str("lang_values_name");
    lang_name
        .and_then(|n| translations.get(n))
        .map(String::as_str)
        .filter(|t| !t.is_empty())
        .or(lang_name)
        .or(node.pole_str("name"))
        .unwrap_or(node.id.as_str())
        .to_string()
}

fn nav_form(table: &str, node: &MetaNode, translations: &HashMap<String, String>) -> NavForm {
    NavForm {
        id: node.id.clone(),
        table: table.to_string(),
        key: node
            .pole_str("lang_values_name")
            .unwrap_or(node.id.as_str())
            .to_string(),
        label: label_of(node, translations),
    }
}

/// Sections and uncategorized forms of one metadata table.
pub fn build_menu(
    table: &str,
    nodes: &[MetaNode],
    translations: &HashMap<String, String>,
) -> (Vec<NavSection>, Vec<NavForm>) {
    let mut sections: Vec<NavSection> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for node in nodes.iter().filter(|n| n.tip == NodeKind::MenuSection) {
        index.insert(&node.id, sections.len());
        sections.push(NavSection {
            key: node.pole_str("name").unwrap_or(node.id.as_str()).to_string(),
            table: table.to_string(),
            label: label_of(node, translations),
            forms: Vec::new(),
        });
    }

    let mut uncategorized = Vec::new();
    for node in nodes.iter().filter(|n| n.tip == NodeKind::Forma) {
        let form = nav_form(table, node, translations);
        match node.id_ref.as_deref().and_then(|r| index.get(r)) {
            Some(&i) => sections[i].forms.push(form),
            None => uncategorized.push(form),
        }
    }
    (sections, uncategorized)
}

async fn table_menu(
    endpoint: &dyn QueryEndpoint,
    table: &str,
    translation_table: &str,
    lang_id: i64,
) -> EngineResult<(Vec<NavSection>, Vec<NavForm>)> {
    let rows = endpoint.select(&sql::nav_nodes_statement(table)?).await?;
    let nodes: Vec<MetaNode> = rows.iter().filter_map(MetaNode::from_row).collect();

    let translation_sql = sql::translation_statement(
        translation_table,
        nodes.iter().filter_map(|n| n.pole_str("lang_values_name")),
        lang_id,
    )?;
    let translations = fetch_translations(endpoint, translation_sql).await?;
    Ok(build_menu(table, &nodes, &translations))
}

/// Main navigation over `tables`, in table order.
pub async fn main_nav(
    endpoint: &dyn QueryEndpoint,
    tables: &[String],
    translation_table: &str,
    lang_id: i64,
) -> EngineResult<Menu> {
    let parts = try_join_all(
        tables
            .iter()
            .map(|t| table_menu(endpoint, t, translation_table, lang_id)),
    )
    .await?;

    let mut menu = Menu::default();
    for (sections, uncategorized) in parts {
        menu.sections.extend(sections);
        menu.uncategorized.extend(uncategorized);
    }
    Ok(menu)
}
