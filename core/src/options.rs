use futures::future::try_join_all;
use serde_json::Value;
use std::collections::HashMap;

use crate::endpoint::{column_text, QueryEndpoint, Row};
use crate::error::EngineResult;
use crate::model::field::{AnswerOptions, LookupQuery, OptionItem};
use crate::model::form::FormDescriptor;
use crate::sql;

fn cell_text(row: &Row, column: &str) -> String {
    match row.get(column) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Runs a lookup query and maps its rows to options.
pub async fn fetch_options(
    endpoint: &dyn QueryEndpoint,
    lookup: &LookupQuery,
) -> EngineResult<Vec<OptionItem>> {
    let rows = endpoint.select(&lookup.sql_query).await?;
    Ok(rows
        .iter()
        .map(|row| OptionItem {
            value: cell_text(row, &lookup.write_field),
            label: cell_text(row, &lookup.view_field),
        })
        .collect())
}

/// Translation name to text for one language.
pub async fn fetch_translations(
    endpoint: &dyn QueryEndpoint,
    sql: Option<String>,
) -> EngineResult<HashMap<String, String>> {
    let Some(sql) = sql else {
        return Ok(HashMap::new());
    };
    let rows = endpoint.select(&sql).await?;
    Ok(rows
        .iter()
        .filter_map(|row| Some((column_text(row, "name")?, column_text(row, "value")?)))
        .collect())
}

/// Fills lookup options and translated labels of `descriptor`.
///
/// All lookups and the single translation query run concurrently; the first failure fails
/// the whole resolution and nothing is applied.
pub async fn resolve_options(
    endpoint: &dyn QueryEndpoint,
    descriptor: &mut FormDescriptor,
    translation_table: &str,
    lang_id: i64,
) -> EngineResult<()> {
    let lookups: Vec<(String, LookupQuery)> = descriptor
        .fields
        .iter()
        .filter_map(|f| match f.answer_options() {
            Some(AnswerOptions::SqlQuery(q)) => Some((f.name.clone(), q)),
            _ => None,
        })
        .collect();
    let translation_sql = sql::translation_statement(
        translation_table,
        descriptor
            .fields
            .iter()
            .filter_map(|f| f.lang_values_name.as_deref()),
        lang_id,
    )?;

    let lookup_futs = lookups.iter().map(|(name, lookup)| async move {
        fetch_options(endpoint, lookup)
            .await
            .map(|options| (name.as_str(), options))
            .map_err(|e| e.context(format!("options of field {}", name)))
    });
    let (options, translations) = futures::try_join!(
        try_join_all(lookup_futs),
        fetch_translations(endpoint, translation_sql),
    )?;
    log::debug!(
        "{} lookups, {} translations resolved",
        options.len(),
        translations.len()
    );

    let mut options: HashMap<&str, Vec<OptionItem>> = options.into_iter().collect();
    for field in descriptor.fields.iter_mut() {
        if let Some(items) = options.remove(field.name.as_str()) {
            field.props.kind = Some("select".to_string());
            field.props.options = Some(items);
        }
        let translated = field
            .lang_values_name
            .as_deref()
            .and_then(|name| translations.get(name))
            .filter(|text| !text.is_empty())
            .cloned();
        if let Some(label) = translated {
            field.set_label(label);
        }
    }
    Ok(())
}
