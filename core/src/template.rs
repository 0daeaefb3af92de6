//! Placeholder substitution for mutation templates.
//!
//! Templates carry `:name` tokens for submitted values and `:~name` tokens for the value a row had
//! before the edit. Each token is replaced by its value, quoted according to the field it names.
//!
//! Note: `:~name` is filled from the *submitted* values, not from the previous ones. Screens built
//! on `SET x=:x WHERE x=:~x` therefore compare against the new value. This mirrors what deployed
//! metadata expects and is kept until the metadata is audited; callers that need the previous value
//! have to put it into the template themselves.

use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, satisfy},
    combinator::recognize,
    sequence::{pair, preceded},
    IResult, Parser,
};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::model::field::{FieldDescriptor, Quoting};

pub type Values = Map<String, Value>;

/// Quoting of parameters that are not form fields but injected by the caller.
static INJECTED_FIELDS_QUOTES: Lazy<HashMap<&'static str, Quoting>> = Lazy::new(|| {
    HashMap::from([("parent_id", Quoting::Bare), ("keylabel", Quoting::Bare)])
});

static EMPTY_VALUES: Lazy<Values> = Lazy::new(Values::new);

#[derive(Clone, Copy, Debug)]
pub struct TemplateInput<'a> {
    pub values: &'a Values,
    pub old_values: &'a Values,
    pub fields: &'a [FieldDescriptor],
}

impl<'a> TemplateInput<'a> {
    pub fn new(values: &'a Values) -> Self {
        Self {
            values,
            old_values: &EMPTY_VALUES,
            fields: &[],
        }
    }

    pub fn old_values(mut self, old_values: &'a Values) -> Self {
        self.old_values = old_values;
        self
    }

    pub fn fields(mut self, fields: &'a [FieldDescriptor]) -> Self {
        self.fields = fields;
        self
    }

    fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    New(&'a str),
    Old(&'a str),
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))
    .parse(input)
}

fn token(input: &str) -> IResult<&str, Token<'_>> {
    preceded(
        char(':'),
        alt((
            preceded(char('~'), ident).map(Token::Old),
            ident.map(Token::New),
        )),
    )
    .parse(input)
}

/// Quoting for a parameter: the field's own flag, then the injected table, else quoted.
pub fn quoting_for(name: &str, fields: &[FieldDescriptor]) -> Quoting {
    if let Some(field) = fields.iter().find(|f| f.name == name) {
        return field.quoting;
    }
    INJECTED_FIELDS_QUOTES
        .get(name)
        .copied()
        .unwrap_or(Quoting::Quoted)
}

/// Renders one value as SQL text. Null and missing collapse to empty text.
pub fn render_value(value: Option<&Value>, quoting: Quoting) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    match quoting {
        Quoting::Bare => text,
        Quoting::Quoted => {
            let mut out = String::with_capacity(text.len() + 2);
            out.push('"');
            for c in text.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
            out
        }
    }
}

fn substitute(token: &Token<'_>, input: &TemplateInput<'_>) -> Option<String> {
    let (name, known) = match *token {
        Token::New(name) => (name, input.values.contains_key(name)),
        Token::Old(name) => (
            name,
            input.old_values.contains_key(name) || input.values.contains_key(name),
        ),
    };
    if !known && input.field(name).is_none() {
        return None;
    }
    let quoting = quoting_for(name, input.fields);
    Some(render_value(input.values.get(name), quoting))
}

/// Replaces every `:name` and `:~name` token that names a field or a supplied value.
///
/// Tokens naming neither are left as they are, so `::` casts and literal text survive.
pub fn apply_template(template: &str, input: &TemplateInput<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(':') {
        out.push_str(&rest[..pos]);
        let at = &rest[pos..];
        match token(at) {
            Ok((remaining, tok)) => {
                match substitute(&tok, input) {
                    Some(text) => out.push_str(&text),
                    None => out.push_str(&at[..at.len() - remaining.len()]),
                }
                rest = remaining;
            }
            Err(_) => {
                out.push(':');
                rest = &at[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
