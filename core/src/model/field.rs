use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column type prefixes whose values are written as quoted SQL literals.
pub const TYPES_WITH_QUOTES: [&str; 10] = [
    "date",
    "time",
    "timestamp",
    "year",
    "char",
    "varchar",
    "tinytext",
    "text",
    "mediumtext",
    "longtext",
];

/// How a value is written into SQL text. Serialized as the `with_quotes` flag.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Quoting {
    #[default]
    Quoted,
    Bare,
}

impl Quoting {
    /// Untyped fields are quoted; typed ones only when the type starts with a text or temporal type.
    pub fn from_sql_type(sql_type: Option<&str>) -> Self {
        match sql_type {
            None => Quoting::Quoted,
            Some(t) => {
                let t = t.trim().to_ascii_lowercase();
                if TYPES_WITH_QUOTES.iter().any(|p| t.starts_with(p)) {
                    Quoting::Quoted
                } else {
                    Quoting::Bare
                }
            }
        }
    }

    pub fn from_flag(with_quotes: bool) -> Self {
        if with_quotes {
            Quoting::Quoted
        } else {
            Quoting::Bare
        }
    }

    pub fn is_quoted(&self) -> bool {
        matches!(self, Quoting::Quoted)
    }
}

impl Serialize for Quoting {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bool(self.is_quoted())
    }
}

impl<'de> Deserialize<'de> for Quoting {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = bool::deserialize(deserializer)?;
        Ok(Quoting::from_flag(v))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionItem {
    pub label: String,
    pub value: String,
}

/// Where a field's value domain comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum AnswerOptions {
    Enumeration(Vec<OptionItem>),
    SqlQuery(LookupQuery),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupQuery {
    pub sql_query: String,
    pub view_field: String,
    pub write_field: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Widget hint for the renderer, `select` for fields with a value domain.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<OptionItem>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keylable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang_values_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_options_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_options: Option<Value>,
    #[serde(rename = "with_quotes", default)]
    pub quoting: Quoting,
    #[serde(default)]
    pub props: FieldProps,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const DERIVED_KEYS: [&str; 4] = ["name", "order", "with_quotes", "props"];

fn take_text(payload: &mut Map<String, Value>, key: &str) -> Option<String> {
    match payload.remove(key)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => {
            log::warn!("attribute {} is not text: {}", key, other);
            None
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl FieldDescriptor {
    /// Builds a descriptor from a merged `field_select` payload.
    ///
    /// Known attributes are lifted into typed fields, everything else is kept in `extra`.
    /// `order`, `with_quotes` and `props` are derived, so payload values for them are dropped.
    pub fn from_payload(name: &str, mut payload: Map<String, Value>) -> Self {
        let label = take_text(&mut payload, "label");
        let sql_type = take_text(&mut payload, "type");
        let keylable = take_text(&mut payload, "keylable");
        let lang_values_name = take_text(&mut payload, "lang_values_name");
        let answer_options_type = take_text(&mut payload, "answer_options_type");
        let answer_options = payload.remove("answer_options");
        for key in DERIVED_KEYS {
            payload.remove(key);
        }

        let mut field = Self {
            name: name.to_string(),
            quoting: Quoting::from_sql_type(sql_type.as_deref()),
            props: FieldProps {
                label: label.clone(),
                ..Default::default()
            },
            label,
            sql_type,
            order: None,
            keylable,
            lang_values_name,
            answer_options_type,
            answer_options,
            extra: payload,
        };
        if let Some(AnswerOptions::Enumeration(options)) = field.answer_options() {
            field.props.kind = Some("select".to_string());
            field.props.options = Some(options);
        } else if field.answer_options_type.is_some() {
            field.props.kind = Some("select".to_string());
            field.props.options = Some(Vec::new());
        }
        field
    }

    pub fn with_quotes(&self) -> bool {
        self.quoting.is_quoted()
    }

    pub fn is_key(&self) -> bool {
        self.keylable.as_deref().map(str::trim) == Some("Y")
    }

    /// Parses the declared value domain, if any.
    pub fn answer_options(&self) -> Option<AnswerOptions> {
        match self.answer_options_type.as_deref()?.trim() {
            "enumeration" => {
                let items = self
                    .answer_options
                    .as_ref()
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_object)
                            .filter_map(|item| item.iter().next())
                            .map(|(label, value)| OptionItem {
                                label: label.clone(),
                                value: value_text(value),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Some(AnswerOptions::Enumeration(items))
            }
            "sql_query" => {
                let lookup = self
                    .answer_options
                    .clone()
                    .map(serde_json::from_value::<LookupQuery>);
                match lookup {
                    Some(Ok(lookup)) => Some(AnswerOptions::SqlQuery(lookup)),
                    Some(Err(e)) => {
                        log::warn!("field {}: bad sql_query options: {}", self.name, e);
                        None
                    }
                    None => {
                        log::warn!("field {}: sql_query options missing", self.name);
                        None
                    }
                }
            }
            other => {
                log::warn!("field {}: unknown answer_options_type {:?}", self.name, other);
                None
            }
        }
    }

    pub(crate) fn set_label(&mut self, label: String) {
        self.props.label = Some(label.clone());
        self.label = Some(label);
    }
}
