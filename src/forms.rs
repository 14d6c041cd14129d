//! Model-bound forms: coerce a JSON payload into field values and save it.
//!
//! Workflow:
//! 1. `form_factory` picks the fields a form exposes for a model.
//! 2. `ModelForm::bind` attaches the request payload (and the instance being edited).
//! 3. `is_valid` cleans every field, then runs the form-level clean hooks.
//! 4. `save` inserts a new record or updates the bound instance.

use crate::error::{Error, Result};
use crate::orm::{Db, FieldDef, FieldKind, ModelMeta, Query, Record, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Key under which form-level errors are reported.
pub const NON_FIELD_ERRORS: &str = "__all__";

pub type ErrorDict = BTreeMap<String, Vec<String>>;

static DECIMAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("decimal regex")
});
static TRAILING_ZEROS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.0*$").expect("zeros regex"));

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"];

/// Error raised by a clean hook, attached to a field or to the whole form.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        ValidationError {
            field: None,
            message: message.into(),
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

/// Form-level validation over the cleaned values; may rewrite them.
pub type CleanFn = Arc<
    dyn Fn(&mut BTreeMap<String, Value>) -> std::result::Result<(), ValidationError>
        + Send
        + Sync,
>;

#[derive(Clone, Debug, Default)]
pub struct FieldOverride {
    pub required: Option<bool>,
    pub max_length: Option<usize>,
    pub choices: Option<Vec<Value>>,
}

/// A custom form for a model: which fields it exposes and extra validation.
#[derive(Clone, Default)]
pub struct FormOptions {
    fields: Option<Vec<String>>,
    exclude: Vec<String>,
    overrides: BTreeMap<String, FieldOverride>,
    clean: Vec<CleanFn>,
}

impl fmt::Debug for FormOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormOptions")
            .field("fields", &self.fields)
            .field("exclude", &self.exclude)
            .field("overrides", &self.overrides)
            .field("clean", &self.clean.len())
            .finish()
    }
}

impl FormOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn override_field(mut self, name: impl Into<String>, field: FieldOverride) -> Self {
        self.overrides.insert(name.into(), field);
        self
    }

    pub fn clean<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut BTreeMap<String, Value>) -> std::result::Result<(), ValidationError>
            + Send
            + Sync
            + 'static,
    {
        self.clean.push(Arc::new(f));
        self
    }
}

/// One form field derived from a model field.
#[derive(Clone, Debug)]
pub struct FormField {
    pub def: FieldDef,
    pub required: bool,
    pub max_length: Option<usize>,
    pub choices: Vec<Value>,
}

impl FormField {
    fn from_model_field(def: &FieldDef, overrides: Option<&FieldOverride>) -> Self {
        // An unchecked checkbox is absent from the payload, so booleans are optional.
        let required = def.kind != FieldKind::Boolean && !def.blank;
        let mut field = FormField {
            def: def.clone(),
            required,
            max_length: def.max_length,
            choices: def.choices.clone(),
        };
        if let Some(o) = overrides {
            field.required = o.required.unwrap_or(field.required);
            field.max_length = o.max_length.or(field.max_length);
            if let Some(choices) = &o.choices {
                field.choices = choices.clone();
            }
        }
        field
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Coerce and validate one raw value.
    pub fn clean(&self, raw: &Value) -> std::result::Result<Value, String> {
        let value = self.to_python(raw)?;
        let empty = match &value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Bool(b) => !b,
            _ => false,
        };
        if empty && self.required {
            return Err("This field is required.".to_string());
        }
        if empty {
            return Ok(value);
        }
        if let (Some(max), Value::String(s)) = (self.max_length, &value) {
            let len = s.chars().count();
            if self.def.kind == FieldKind::Text && len > max {
                return Err(format!(
                    "Ensure this value has at most {max} characters (it has {len})."
                ));
            }
        }
        if !self.choices.is_empty() {
            let key = choice_key(&value);
            if !self.choices.iter().any(|c| choice_key(c) == key) {
                return Err(format!(
                    "Select a valid choice. {key} is not one of the available choices."
                ));
            }
        }
        Ok(value)
    }

    fn to_python(&self, raw: &Value) -> std::result::Result<Value, String> {
        match self.def.kind {
            FieldKind::Text => Ok(match raw {
                Value::Null => self.empty_text(),
                Value::String(s) if s.trim().is_empty() => self.empty_text(),
                Value::String(s) => Value::String(s.trim().to_string()),
                other => Value::String(other.to_string()),
            }),
            FieldKind::Integer => match raw {
                Value::Null => Ok(Value::Null),
                Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => Ok(Value::from(i)),
                    (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err("Enter a whole number.".to_string()),
                },
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(s) => TRAILING_ZEROS
                    .replace(s.trim(), "")
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| "Enter a whole number.".to_string()),
                _ => Err("Enter a whole number.".to_string()),
            },
            FieldKind::Float => match raw {
                Value::Null => Ok(Value::Null),
                Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or_default())),
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Value::from)
                    .ok_or_else(|| "Enter a number.".to_string()),
                _ => Err("Enter a number.".to_string()),
            },
            FieldKind::Decimal => match raw {
                Value::Null => Ok(Value::Null),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(s) if DECIMAL.is_match(s.trim()) => {
                    Ok(Value::String(s.trim().to_string()))
                }
                _ => Err("Enter a number.".to_string()),
            },
            FieldKind::Boolean => Ok(Value::Bool(match raw {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Value::String(s) => {
                    let s = s.trim().to_lowercase();
                    !(s.is_empty() || s == "false" || s == "0")
                }
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
            })),
            FieldKind::DateTime => match raw {
                Value::Null => Ok(Value::Null),
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(s) => parse_datetime(s.trim())
                    .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                    .ok_or_else(|| "Enter a valid date/time.".to_string()),
                _ => Err("Enter a valid date/time.".to_string()),
            },
            FieldKind::Date => match raw {
                Value::Null => Ok(Value::Null),
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(s) => parse_date(s.trim())
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .ok_or_else(|| "Enter a valid date.".to_string()),
                _ => Err("Enter a valid date.".to_string()),
            },
        }
    }

    fn empty_text(&self) -> Value {
        if self.def.null {
            Value::Null
        } else {
            Value::String(String::new())
        }
    }
}

fn choice_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive input is taken to be UTC.
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
        .map(|naive| naive.and_utc())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Build a form for `model`.
///
/// `fields` (the view's field list) wins over the form's own whitelist; with
/// neither, every editable field is exposed.
pub fn form_factory(
    model: &Arc<ModelMeta>,
    form: Option<&FormOptions>,
    fields: &[String],
) -> Result<ModelForm> {
    let default_options = FormOptions::default();
    let options = form.unwrap_or(&default_options);

    let names: Vec<String> = if !fields.is_empty() {
        fields.to_vec()
    } else if let Some(form_fields) = &options.fields {
        form_fields.clone()
    } else {
        model
            .fields()
            .iter()
            .filter(|f| f.editable)
            .map(|f| f.name.clone())
            .collect()
    };

    let mut form_fields = Vec::with_capacity(names.len());
    for name in names {
        if options.exclude.contains(&name) {
            continue;
        }
        let def = model
            .get_field(&name)
            .filter(|f| f.editable)
            .ok_or_else(|| Error::InvalidField(name.clone()))?;
        form_fields.push(FormField::from_model_field(def, options.overrides.get(&name)));
    }

    Ok(ModelForm {
        model: model.clone(),
        fields: form_fields,
        clean: options.clean.clone(),
        data: None,
        instance: None,
        cleaned: BTreeMap::new(),
        omitted: BTreeSet::new(),
        errors: ErrorDict::new(),
        validated: false,
    })
}

pub struct ModelForm {
    model: Arc<ModelMeta>,
    fields: Vec<FormField>,
    clean: Vec<CleanFn>,
    data: Option<Map<String, Value>>,
    instance: Option<Record>,
    cleaned: BTreeMap<String, Value>,
    omitted: BTreeSet<String>,
    errors: ErrorDict,
    validated: bool,
}

impl ModelForm {
    /// Attach a payload; `instance` is the record being edited, if any.
    pub fn bind(mut self, data: Map<String, Value>, instance: Option<Record>) -> Self {
        self.data = Some(data);
        self.instance = instance;
        self.cleaned.clear();
        self.omitted.clear();
        self.errors.clear();
        self.validated = false;
        self
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    pub fn instance(&self) -> Option<&Record> {
        self.instance.as_ref()
    }

    pub fn is_valid(&mut self) -> bool {
        if !self.is_bound() {
            return false;
        }
        if !self.validated {
            self.full_clean();
        }
        self.errors.is_empty()
    }

    pub fn errors(&mut self) -> &ErrorDict {
        if self.is_bound() && !self.validated {
            self.full_clean();
        }
        &self.errors
    }

    pub fn cleaned_data(&self) -> &BTreeMap<String, Value> {
        &self.cleaned
    }

    fn full_clean(&mut self) {
        self.validated = true;
        let Some(data) = &self.data else {
            return;
        };

        for field in &self.fields {
            let name = field.name();
            let raw = data.get(name).cloned().unwrap_or(Value::Null);
            match field.clean(&raw) {
                Ok(Value::Null) if !field.def.null && field.def.kind != FieldKind::Text => {
                    match &field.def.default {
                        Some(default) => {
                            self.cleaned.insert(name.to_string(), default.clone());
                        }
                        None => {
                            self.errors
                                .entry(name.to_string())
                                .or_default()
                                .push("This field cannot be null.".to_string());
                            continue;
                        }
                    }
                }
                Ok(value) => {
                    self.cleaned.insert(name.to_string(), value);
                }
                Err(message) => {
                    self.errors.entry(name.to_string()).or_default().push(message);
                    continue;
                }
            }
            let omitted = !data.contains_key(name);
            if omitted && field.def.default.is_some() && field.def.kind != FieldKind::Boolean {
                self.omitted.insert(name.to_string());
            }
        }

        for hook in &self.clean {
            if let Err(err) = hook(&mut self.cleaned) {
                let key = err.field.unwrap_or_else(|| NON_FIELD_ERRORS.to_string());
                self.cleaned.remove(&key);
                self.errors.entry(key).or_default().push(err.message);
            }
        }
    }

    /// Insert or update the record. Fails unless the form is valid.
    pub async fn save(&mut self, db: &Db) -> Result<Record> {
        if !self.is_valid() {
            return Err(Error::InvalidForm(self.model.object_name().to_string()));
        }

        let mut values = BTreeMap::new();
        for field in &self.fields {
            let name = field.name();
            if self.omitted.contains(name) {
                continue;
            }
            if let Some(value) = self.cleaned.get(name) {
                values.insert(name.to_string(), SqlValue::from_json(field.def.kind, value));
            }
        }

        match &self.instance {
            None => db.insert(&self.model, &values).await,
            Some(instance) => {
                db.update(&self.model, instance.id, &values).await?;
                let record = db
                    .get(&Query::new(self.model.clone()), instance.id)
                    .await?
                    .ok_or(Error::Database(sqlx::Error::RowNotFound))?;
                self.instance = Some(record.clone());
                Ok(record)
            }
        }
    }
}
