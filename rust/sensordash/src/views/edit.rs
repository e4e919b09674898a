//! Create/update/delete forms and the validation gate in front of storage.

use crate::{
    error::{FieldError, Result, ServiceError},
    form::{FieldRenderer, Widget},
    record::{Describable, Displayable, Record, RecordType, Registry},
    store::Persistable,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct FormView {
    pub table: &'static str,
    pub title: &'static str,
    pub id: Option<i64>,
    pub fields: Vec<Widget>,
    pub can_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Nothing was removed; the caller must repeat the request confirmed.
    ConfirmationRequired { message: String },
    Deleted { id: i64 },
}

async fn load(store: &dyn Persistable, ty: &'static RecordType, id: i64) -> Result<Record> {
    store
        .get(ty, id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("{} {id}", ty.table)))
}

/// Form for a new record (`id` absent) or an existing one. The identity
/// field is never part of the form.
pub async fn form_view(
    registry: &Registry,
    store: &dyn Persistable,
    ty: &'static RecordType,
    id: Option<i64>,
    show_validation: bool,
) -> Result<FormView> {
    let current = match id {
        Some(id) => load(store, ty, id).await?,
        None => Record::new(ty),
    };

    let mut fields = Vec::new();
    for field in ty.editable_fields() {
        let widget = FieldRenderer::new(ty, field.name, None)?
            .render(registry, store, current.get(field.name), show_validation)
            .await?;
        fields.push(widget);
    }

    Ok(FormView {
        table: ty.table,
        title: ty.display_name(),
        id,
        fields,
        can_delete: id.is_some(),
    })
}

/// Applies submitted inputs over the stored record (or a blank one) and
/// persists the result. Inputs missing from `inputs` keep their value.
pub async fn save(
    store: &dyn Persistable,
    ty: &'static RecordType,
    id: Option<i64>,
    inputs: &Map<String, JsonValue>,
    now: NaiveDateTime,
) -> Result<Record> {
    let mut record = match id {
        Some(id) => load(store, ty, id).await?,
        None => Record::new(ty),
    };

    let mut errors = Vec::new();
    for field in ty.editable_fields() {
        let renderer = FieldRenderer::new(ty, field.name, None)?;
        match renderer.parse(inputs.get(field.name), record.get(field.name), now) {
            Ok(value) => record.set(field.name, value)?,
            Err(message) => errors.push(FieldError {
                field: field.name.to_string(),
                message,
            }),
        }
    }
    if !errors.is_empty() {
        return Err(ServiceError::Validation(errors));
    }

    if let Err(errors) = record.validate() {
        warn!(table = ty.table, failures = errors.len(), "rejected invalid record");
        return Err(ServiceError::validation(errors));
    }

    let saved = match id {
        Some(_) => store.update(&record).await?,
        None => store.insert(&record).await?,
    };
    info!(table = ty.table, id = ?saved.id(), "record saved");
    Ok(saved)
}

pub async fn delete(
    store: &dyn Persistable,
    ty: &'static RecordType,
    id: i64,
    confirmed: bool,
) -> Result<DeleteOutcome> {
    let record = load(store, ty, id).await?;
    if !confirmed {
        return Ok(DeleteOutcome::ConfirmationRequired {
            message: format!(
                "Delete {} {}? Repeat the request with confirm=true.",
                ty.display_name(),
                ty.row_label(&record)
            ),
        });
    }

    if !store.delete(ty, id).await? {
        return Err(ServiceError::NotFound(format!("{} {id}", ty.table)));
    }
    info!(table = ty.table, id, "record deleted");
    Ok(DeleteOutcome::Deleted { id })
}
