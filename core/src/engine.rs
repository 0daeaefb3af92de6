use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{DescriptorCache, DescriptorKey, DEFAULT_FRESHNESS};
use crate::endpoint::{column_text, QueryEndpoint, QueryVerb, Row};
use crate::error::{EngineError, EngineResult};
use crate::model::form::{FormDescriptor, DELETE_TEMPLATE, INSERT_TEMPLATE, UPDATE_TEMPLATE};
use crate::model::nav::{FormEntry, Menu};
use crate::template::{apply_template, TemplateInput, Values};
use crate::{nav, options, resolve, sql};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub meta_table: String,
    pub translation_table: String,
    pub language_table: String,
    /// Metadata tables the main navigation is built from.
    pub nav_tables: Vec<String>,
    pub default_lang: i64,
    #[serde(with = "secs")]
    pub freshness: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            meta_table: "metabase".to_string(),
            translation_table: "lang_values".to_string(),
            language_table: "lang".to_string(),
            nav_tables: vec!["metabase".to_string(), "metaadm".to_string()],
            default_lang: 1,
            freshness: DEFAULT_FRESHNESS,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Entry point for screens: descriptors, row reads and mutations over one endpoint.
pub struct FormEngine {
    endpoint: Arc<dyn QueryEndpoint>,
    config: EngineConfig,
    cache: DescriptorCache,
}

impl FormEngine {
    pub fn new(endpoint: Arc<dyn QueryEndpoint>, config: EngineConfig) -> Self {
        Self {
            cache: DescriptorCache::new(config.freshness),
            endpoint,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &dyn QueryEndpoint {
        self.endpoint.as_ref()
    }

    /// Resolves the descriptor of `form_id` without consulting the cache.
    pub async fn resolve_form_descriptor(
        &self,
        table: &str,
        form_id: &str,
        lang_id: i64,
    ) -> EngineResult<FormDescriptor> {
        let endpoint = self.endpoint();
        let mut form = resolve::fetch_form(endpoint, table, form_id).await?;
        options::resolve_options(endpoint, &mut form, &self.config.translation_table, lang_id)
            .await?;
        if form.keylabel.is_empty() {
            log::warn!("form {}/{} has no key field", table, form_id);
        }
        Ok(form)
    }

    /// Cached descriptor; concurrent callers for the same key share one resolution.
    pub async fn describe(
        &self,
        table: &str,
        form_id: &str,
        lang_id: i64,
    ) -> EngineResult<Arc<FormDescriptor>> {
        let key = DescriptorKey::new(table, form_id, lang_id);
        self.cache
            .get_or_resolve(&key, || self.resolve_form_descriptor(table, form_id, lang_id))
            .await
    }

    pub fn invalidate(&self, table: &str, form_id: &str, lang_id: i64) -> bool {
        self.cache
            .invalidate(&DescriptorKey::new(table, form_id, lang_id))
    }

    /// Reads the rows of a screen with its primary select.
    pub async fn fetch_rows(
        &self,
        form: &FormDescriptor,
        form_id: &str,
        params: Values,
    ) -> EngineResult<Vec<Row>> {
        let fragment = form
            .primary_select()
            .ok_or(EngineError::IncompleteFragment("select"))?;
        let params = sql::screen_params(form_id, params);
        let sql = sql::synthesize_select(fragment, &params)?;
        self.endpoint.select(&sql).await
    }

    async fn execute_template(
        &self,
        verb: QueryVerb,
        slot: &'static str,
        template: Option<&str>,
        input: TemplateInput<'_>,
    ) -> EngineResult<Vec<Row>> {
        let template = template.ok_or(EngineError::MissingTemplate(slot))?;
        let sql = apply_template(template, &input);
        log::info!("{} via {}: {}", verb, slot, sql);
        self.endpoint.query(verb, &sql).await
    }

    pub async fn insert(&self, form: &FormDescriptor, values: &Values) -> EngineResult<Vec<Row>> {
        let input = TemplateInput::new(values).fields(&form.fields);
        self.execute_template(QueryVerb::Insert, INSERT_TEMPLATE, form.insert_template(), input)
            .await
    }

    pub async fn update(
        &self,
        form: &FormDescriptor,
        values: &Values,
        old_values: &Values,
    ) -> EngineResult<Vec<Row>> {
        let input = TemplateInput::new(values)
            .old_values(old_values)
            .fields(&form.fields);
        self.execute_template(QueryVerb::Update, UPDATE_TEMPLATE, form.update_template(), input)
            .await
    }

    pub async fn delete(&self, form: &FormDescriptor, values: &Values) -> EngineResult<Vec<Row>> {
        let input = TemplateInput::new(values).fields(&form.fields);
        self.execute_template(QueryVerb::Delete, DELETE_TEMPLATE, form.delete_template(), input)
            .await
    }

    pub async fn forms(&self, table: &str) -> EngineResult<Vec<FormEntry>> {
        nav::list_forms(self.endpoint(), table).await
    }

    pub async fn main_nav(&self, lang_id: i64) -> EngineResult<Menu> {
        nav::main_nav(
            self.endpoint(),
            &self.config.nav_tables,
            &self.config.translation_table,
            lang_id,
        )
        .await
    }

    /// Active languages.
    pub async fn languages(&self) -> EngineResult<Vec<Row>> {
        let sql = sql::languages_statement(&self.config.language_table)?;
        self.endpoint.select(&sql).await
    }

    pub async fn count(&self, table: &str, where_clause: Option<&str>) -> EngineResult<u64> {
        let sql = sql::count_statement(table, where_clause)?;
        let rows = self.endpoint.select(&sql).await?;
        let count = rows
            .first()
            .and_then(|row| column_text(row, "count(*)"))
            .and_then(|c| c.parse().ok())
            .unwrap_or_default();
        Ok(count)
    }

    /// Largest value of `column`, `None` for an empty table.
    pub async fn last_id(&self, table: &str, column: &str) -> EngineResult<Option<String>> {
        let sql = sql::max_statement(table, column)?;
        let rows = self.endpoint.select(&sql).await?;
        Ok(rows.first().and_then(|row| column_text(row, "max")))
    }
}
