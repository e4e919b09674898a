//! Field renderer: turns field descriptors into input widgets and coerces
//! submitted input back into typed values.

use crate::{
    error::{Result, ServiceError},
    record::{
        validate_value, Describable, Displayable, FieldDef, FieldKind, RecordType, Registry, Value,
    },
    store::{Persistable, RecordQuery},
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::Value as JsonValue;

const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "gif", "webp"];

pub const YES: &str = "Yes";
pub const NO: &str = "No";
pub const UNSET: &str = "Unset";

/// Where a widget is drawn. Filters cannot upload files; forms never edit identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderContext {
    Form,
    Filter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectOption {
    pub value: JsonValue,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub mime: &'static str,
    pub data: String,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "widget", rename_all = "snake_case")]
pub enum Input {
    Select {
        options: Vec<SelectOption>,
        selected: Option<usize>,
        placeholder: Option<&'static str>,
    },
    Number {
        step: f64,
        format: &'static str,
        value: Option<JsonValue>,
    },
    DateTime {
        date: Option<String>,
        time: Option<String>,
    },
    TextArea {
        max_chars: usize,
        value: Option<String>,
    },
    TextInput {
        max_chars: usize,
        value: Option<String>,
    },
    File {
        extensions: Vec<&'static str>,
        preview: Option<Preview>,
        notice: Option<&'static str>,
    },
}

impl Input {
    pub fn selected_label(&self) -> Option<&str> {
        match self {
            Input::Select {
                options,
                selected: Some(index),
                ..
            } => options.get(*index).map(|option| option.label.as_str()),
            _ => None,
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Widget {
    /// Key the submitted value must be posted under.
    pub name: String,
    pub field: &'static str,
    pub label: String,
    pub required: bool,
    pub help: Option<&'static str>,
    #[serde(flatten)]
    pub input: Input,
    pub error: Option<String>,
}

/// Renders and parses one field of a record type.
#[derive(Debug, Clone)]
pub struct FieldRenderer {
    ty: &'static RecordType,
    field: &'static FieldDef,
    key: String,
    label: String,
    required: bool,
    context: RenderContext,
}

impl FieldRenderer {
    pub fn new(ty: &'static RecordType, name: &str, label: Option<&str>) -> Result<Self> {
        let field = ty.field(name)?;
        Ok(Self {
            ty,
            field,
            key: field.name.to_string(),
            label: label.unwrap_or(field.label).to_string(),
            required: !field.nullable,
            context: RenderContext::Form,
        })
    }

    pub fn in_context(mut self, context: RenderContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Overrides the declared nullability, as filters do with their optional flag.
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn field(&self) -> &'static FieldDef {
        self.field
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn not_implemented(&self) -> ServiceError {
        ServiceError::NotImplemented(format!(
            "field kind {} of {}.{} cannot be rendered here",
            self.field.kind.name(),
            self.ty.table,
            self.field.name
        ))
    }

    fn check_context(&self) -> Result<()> {
        match (self.context, &self.field.kind) {
            (RenderContext::Form, FieldKind::Identity)
            | (RenderContext::Filter, FieldKind::Blob { .. }) => Err(self.not_implemented()),
            _ => Ok(()),
        }
    }

    pub async fn render(
        &self,
        registry: &Registry,
        store: &dyn Persistable,
        initial: &Value,
        show_validation: bool,
    ) -> Result<Widget> {
        self.check_context()?;

        let input = match self.field.kind {
            FieldKind::ForeignKey { table } => {
                let target = registry.get(table)?;
                let rows = store.list(target, &RecordQuery::all()).await?;
                let options: Vec<SelectOption> = rows
                    .iter()
                    .filter_map(|row| {
                        row.id().map(|id| SelectOption {
                            value: JsonValue::from(id),
                            label: target.row_label(row),
                        })
                    })
                    .collect();
                let selected = initial
                    .as_i64()
                    .and_then(|id| options.iter().position(|option| option.value == id));
                Input::Select {
                    options,
                    selected,
                    placeholder: Some("Choose an option"),
                }
            }
            FieldKind::Enum(def) => {
                let options: Vec<SelectOption> = def
                    .members
                    .iter()
                    .map(|member| SelectOption {
                        value: JsonValue::from(member.code),
                        label: member.label.to_string(),
                    })
                    .collect();
                let selected = initial
                    .as_str()
                    .and_then(|code| def.members.iter().position(|member| member.code == code));
                Input::Select {
                    options,
                    selected,
                    placeholder: Some("Choose an option"),
                }
            }
            FieldKind::Boolean => self.boolean_input(initial),
            FieldKind::Real => Input::Number {
                step: 0.01,
                format: "%.2f",
                value: (!initial.is_null()).then(|| initial.to_json()),
            },
            FieldKind::Integer | FieldKind::Identity => Input::Number {
                step: 1.0,
                format: "%d",
                value: (!initial.is_null()).then(|| initial.to_json()),
            },
            FieldKind::Timestamp => {
                let stamp = initial.as_timestamp();
                Input::DateTime {
                    date: stamp.map(|at| at.date().format("%Y-%m-%d").to_string()),
                    time: stamp.map(|at| at.time().format("%H:%M:%S").to_string()),
                }
            }
            FieldKind::LongText { max_len } => Input::TextArea {
                max_chars: max_len,
                value: initial.as_str().map(str::to_string),
            },
            FieldKind::ShortText { max_len } => Input::TextInput {
                max_chars: max_len,
                value: initial.as_str().map(str::to_string),
            },
            FieldKind::Blob { extensions } => blob_input(extensions, initial),
        };

        Ok(Widget {
            name: self.key.clone(),
            field: self.field.name,
            label: self.label.clone(),
            required: self.required,
            help: self.field.help,
            input,
            error: if show_validation {
                self.validate(initial)
            } else {
                None
            },
        })
    }

    fn boolean_input(&self, initial: &Value) -> Input {
        let mut options = vec![
            SelectOption {
                value: JsonValue::Bool(true),
                label: YES.to_string(),
            },
            SelectOption {
                value: JsonValue::Bool(false),
                label: NO.to_string(),
            },
        ];
        if !self.required {
            options.push(SelectOption {
                value: JsonValue::Null,
                label: UNSET.to_string(),
            });
        }
        let selected = match initial {
            Value::Bool(true) => Some(0),
            Value::Bool(false) => Some(1),
            _ if !self.required => Some(2),
            _ => None,
        };
        Input::Select {
            options,
            selected,
            placeholder: None,
        }
    }

    /// Coerces a submitted input. `None` means the input was not touched;
    /// blobs keep `prior` in that case and on an explicit null.
    pub fn parse(
        &self,
        submitted: Option<&JsonValue>,
        prior: &Value,
        now: NaiveDateTime,
    ) -> std::result::Result<Value, String> {
        let Some(raw) = submitted else {
            return Ok(prior.clone());
        };

        let invalid = |reason: &str| format!("invalid value for field {}: {reason}", self.label);

        match self.field.kind {
            FieldKind::Blob { extensions } => parse_upload(extensions, raw, prior).map_err(|reason| invalid(&reason)),
            FieldKind::Boolean => match raw {
                JsonValue::String(text) if text.eq_ignore_ascii_case(YES) => Ok(Value::Bool(true)),
                JsonValue::String(text) if text.eq_ignore_ascii_case(NO) => Ok(Value::Bool(false)),
                JsonValue::String(text) if text.eq_ignore_ascii_case(UNSET) || text.is_empty() => {
                    Ok(Value::Null)
                }
                _ => Value::from_json(self.field, raw).map_err(|err| invalid(&err.to_string())),
            },
            FieldKind::Timestamp => match raw {
                JsonValue::Object(parts) => {
                    let date = match parts.get("date").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
                        Some(text) => Some(
                            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                                .map_err(|_| invalid("expected a YYYY-MM-DD date"))?,
                        ),
                        None => None,
                    };
                    let time = match parts.get("time").and_then(JsonValue::as_str).filter(|s| !s.is_empty()) {
                        Some(text) => Some(parse_time(text).ok_or_else(|| invalid("expected an HH:MM[:SS] time"))?),
                        None => None,
                    };
                    Ok(combine(date, time, now).map_or(Value::Null, Value::Timestamp))
                }
                JsonValue::String(text) if text.trim().is_empty() => Ok(Value::Null),
                _ => Value::from_json(self.field, raw).map_err(|err| invalid(&err.to_string())),
            },
            FieldKind::ShortText { .. } | FieldKind::LongText { .. } => match raw {
                JsonValue::String(text) if text.is_empty() => Ok(Value::Null),
                _ => Value::from_json(self.field, raw).map_err(|err| invalid(&err.to_string())),
            },
            _ => match raw {
                JsonValue::String(text) if text.trim().is_empty() => Ok(Value::Null),
                _ => Value::from_json(self.field, raw).map_err(|err| invalid(&err.to_string())),
            },
        }
    }

    /// Validation message for `value`, or `None` when it is acceptable.
    pub fn validate(&self, value: &Value) -> Option<String> {
        if value.is_null() {
            return self
                .required
                .then(|| format!("field {} is required", self.label));
        }
        validate_value(self.field, value).err()
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validate(value).is_none()
    }
}

/// Joins independent date and time inputs. A lone date means midnight, a
/// lone time means today.
pub fn combine(
    date: Option<NaiveDate>,
    time: Option<NaiveTime>,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    match (date, time) {
        (None, None) => None,
        (date, time) => Some(NaiveDateTime::new(
            date.unwrap_or_else(|| now.date()),
            time.unwrap_or(NaiveTime::MIN),
        )),
    }
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

fn blob_input(extensions: &'static [&'static str], initial: &Value) -> Input {
    let (preview, notice) = match initial {
        Value::Blob(bytes) if !bytes.is_empty() => {
            let image = extensions
                .iter()
                .find(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            match image {
                Some(ext) => (
                    Some(Preview {
                        mime: sniff_mime(bytes).unwrap_or_else(|| mime_for(ext)),
                        data: STANDARD.encode(bytes),
                    }),
                    None,
                ),
                None => (None, Some("File uploaded, but its content cannot be displayed.")),
            }
        }
        _ => (None, None),
    };
    Input::File {
        extensions: extensions.to_vec(),
        preview,
        notice,
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF8") {
        Some("image/gif")
    } else if bytes.len() > 12 && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

fn mime_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

/// Uploads arrive as `{"filename": .., "content": <base64>}` or bare base64.
fn parse_upload(
    extensions: &[&str],
    raw: &JsonValue,
    prior: &Value,
) -> std::result::Result<Value, String> {
    let (filename, content) = match raw {
        JsonValue::Null => return Ok(prior.clone()),
        JsonValue::String(content) => (None, content.as_str()),
        JsonValue::Object(upload) => {
            let Some(content) = upload.get("content").and_then(JsonValue::as_str) else {
                return Ok(prior.clone());
            };
            (upload.get("filename").and_then(JsonValue::as_str), content)
        }
        _ => return Err("expected a file upload".to_string()),
    };

    if let Some(filename) = filename {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !extensions.is_empty() && !extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&extension)) {
            return Err(format!(
                "file type '{extension}' is not one of {}",
                extensions.join(", ")
            ));
        }
    }

    crate::record::value::decode_blob(content)
        .map(Value::Blob)
        .ok_or_else(|| "expected base64 content".to_string())
}
