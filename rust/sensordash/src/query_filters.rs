//! Active filter set of one record type, persisted in navigation state.

use crate::{
    error::{FieldError, Result, ServiceError},
    filter::{Filter, FilterTemplate, Predicate},
    form::{FieldRenderer, RenderContext, Widget},
    nav::NavState,
    record::{RecordType, Registry, Value},
    store::Persistable,
};
use chrono::NaiveDateTime;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct QueryFilters {
    ty: &'static RecordType,
    templates: Vec<Filter>,
    /// Filters decoded from the navigation state of this render.
    parsed: Vec<Filter>,
}

impl QueryFilters {
    /// `templates` defaults to the type's declared table filters.
    pub fn new(
        ty: &'static RecordType,
        templates: Option<&[FilterTemplate]>,
        nav: &NavState,
    ) -> Result<Self> {
        let templates = templates
            .unwrap_or(ty.default_filters)
            .iter()
            .map(Filter::from)
            .collect();
        Ok(Self {
            ty,
            templates,
            parsed: nav.decode_filters()?,
        })
    }

    pub fn record_type(&self) -> &'static RecordType {
        self.ty
    }

    /// Filters exactly as decoded from navigation state.
    pub fn parsed(&self) -> &[Filter] {
        &self.parsed
    }

    /// One filter per template slot, seeded from the matching prior filter,
    /// followed by any prior filters that match no template.
    pub fn active(&self) -> Vec<Filter> {
        let mut active: Vec<Filter> = self
            .templates
            .iter()
            .map(|template| {
                self.parsed
                    .iter()
                    .find(|prior| prior.same_slot(template))
                    .cloned()
                    .unwrap_or_else(|| template.clone())
            })
            .collect();
        for prior in &self.parsed {
            if !self.templates.iter().any(|template| template.same_slot(prior)) {
                active.push(prior.clone());
            }
        }
        active
    }

    fn renderer(&self, filter: &Filter) -> Result<FieldRenderer> {
        Ok(FieldRenderer::new(self.ty, &filter.field, filter.label.as_deref())?
            .in_context(RenderContext::Filter)
            .with_key(filter.key())
            .with_required(!filter.optional))
    }

    fn templated(&self) -> Vec<Filter> {
        let active = self.active();
        active
            .into_iter()
            .filter(|filter| self.templates.iter().any(|template| template.same_slot(filter)))
            .collect()
    }

    /// Widgets for every template slot, pre-filled with the current values.
    pub async fn render(
        &self,
        registry: &Registry,
        store: &dyn Persistable,
        show_validation: bool,
    ) -> Result<Vec<Widget>> {
        let mut widgets = Vec::with_capacity(self.templates.len());
        for filter in self.templated() {
            let initial = filter.typed_value(self.ty)?;
            let widget = self
                .renderer(&filter)?
                .render(registry, store, &initial, show_validation)
                .await?;
            widgets.push(widget);
        }
        Ok(widgets)
    }

    /// New filter set from submitted inputs keyed by `Filter::key`. Slots
    /// without an input keep their current value.
    pub fn submit(&self, inputs: &Map<String, JsonValue>, now: NaiveDateTime) -> Result<Vec<Filter>> {
        let mut updated = Vec::new();
        let mut errors = Vec::new();
        for filter in self.active() {
            let renderer = self.renderer(&filter)?;
            let prior = filter.typed_value(self.ty)?;
            match renderer.parse(inputs.get(renderer.key()), &prior, now) {
                Ok(value) => updated.push(filter.with_value(&value)),
                Err(message) => errors.push(FieldError {
                    field: renderer.key().to_string(),
                    message,
                }),
            }
        }
        if errors.is_empty() {
            Ok(updated)
        } else {
            Err(ServiceError::Validation(errors))
        }
    }

    /// Navigation state carrying `filters`.
    pub fn apply(nav: &NavState, filters: &[Filter]) -> NavState {
        nav.with_filters(filters)
    }

    pub fn clear(nav: &NavState) -> NavState {
        nav.without_filters()
    }

    /// Every required filter carries a value and every value fits its field.
    pub fn is_valid(&self) -> bool {
        self.active().iter().all(|filter| {
            let Ok(renderer) = self.renderer(filter) else {
                return false;
            };
            match filter.typed_value(self.ty) {
                Ok(value) => renderer.is_valid(&value),
                Err(_) => false,
            }
        })
    }

    fn included(&self) -> impl Iterator<Item = Filter> {
        self.active()
            .into_iter()
            .filter(|filter| filter.has_value() || !filter.optional)
    }

    /// Compiled predicates: populated filters plus every required one.
    pub fn predicates(&self) -> Result<Vec<Predicate>> {
        self.included()
            .map(|filter| filter.compile(self.ty).map_err(ServiceError::from))
            .collect()
    }

    pub fn values_by_field(&self) -> HashMap<String, Value> {
        self.values(|filter| filter.field.clone())
    }

    /// Values keyed by name override, falling back to the field name.
    pub fn values_by_name(&self) -> HashMap<String, Value> {
        self.values(|filter| filter.value_name().to_string())
    }

    fn values(&self, key: impl Fn(&Filter) -> String) -> HashMap<String, Value> {
        self.included()
            .filter_map(|filter| {
                let value = filter.typed_value(self.ty).ok()?;
                Some((key(&filter), value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::FilterOp,
        record::catalog,
        store::MemoryStore,
    };
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const AT_LEAST: &[FilterTemplate] = &[FilterTemplate::new("valor", FilterOp::Ge).required()];

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn nav_with(filters: &[Filter]) -> NavState {
        NavState::default().with_filters(filters)
    }

    #[test]
    fn required_filter_without_value_is_invalid() {
        let empty = Filter::new("valor", FilterOp::Ge).required();
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, Some(AT_LEAST), &nav_with(&[empty])).unwrap();
        assert!(!filters.is_valid());

        let set = Filter::new("valor", FilterOp::Ge)
            .required()
            .with_value(&Value::Real(10.0));
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, Some(AT_LEAST), &nav_with(&[set])).unwrap();
        assert!(filters.is_valid());
        let predicates = filters.predicates().unwrap();
        assert_eq!(predicates.len(), 1);
        assert_eq!(predicates[0].to_string(), "valor >= 10.0");
    }

    #[test]
    fn untouched_required_template_is_invalid() {
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, Some(AT_LEAST), &NavState::default()).unwrap();
        assert!(!filters.is_valid());
    }

    #[test]
    fn optional_filters_compile_only_when_populated() {
        let nav = nav_with(&[
            Filter::new("sensor_id", FilterOp::Eq).with_value(&Value::Int(4)),
            Filter::new("data_leitura", FilterOp::Ge),
        ]);
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, None, &nav).unwrap();
        assert!(filters.is_valid());
        assert_eq!(
            filters.predicates().unwrap(),
            vec![Predicate::new("sensor_id", FilterOp::Eq, Value::Int(4))]
        );
    }

    #[test]
    fn prior_values_fill_matching_slots() {
        let prior = Filter {
            label: Some("stale label".into()),
            ..Filter::new("sensor_id", FilterOp::Eq).with_value(&Value::Int(7))
        };
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, None, &nav_with(&[prior])).unwrap();
        let active = filters.active();
        assert_eq!(active.len(), 3);
        assert_eq!(active[0].value, json!(7));
        assert!(!active[1].has_value());
    }

    #[test]
    fn submit_apply_and_clear_round_trip_through_nav_state() {
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, None, &NavState::default()).unwrap();
        let inputs = json!({
            "sensor_id==": 3,
            "data_leitura>=": {"date": "2025-02-01"},
        });
        let updated = filters
            .submit(inputs.as_object().unwrap(), now())
            .unwrap();
        let nav = QueryFilters::apply(&NavState::default(), &updated);

        let reloaded = QueryFilters::new(&catalog::LEITURA_SENSOR, None, &nav).unwrap();
        let by_field = reloaded.values_by_field();
        assert_eq!(by_field.get("sensor_id"), Some(&Value::Int(3)));
        assert_eq!(
            by_field.get("data_leitura"),
            Some(&Value::Timestamp(
                NaiveDate::from_ymd_opt(2025, 2, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
            ))
        );
        assert!(QueryFilters::clear(&nav).filters.is_none());
    }

    #[test]
    fn invalid_submissions_are_validation_errors() {
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, None, &NavState::default()).unwrap();
        let inputs = json!({"sensor_id==": "abc"});
        let err = filters.submit(inputs.as_object().unwrap(), now()).unwrap_err();
        match err {
            ServiceError::Validation(fields) => assert_eq!(fields[0].field, "sensor_id=="),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn values_by_name_use_overrides() {
        let spec = catalog::LEITURA_SENSOR.plot.expect("readings have a chart");
        let start = Value::Timestamp(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap());
        let nav = nav_with(&[
            Filter::from(&spec.filters[0]).with_value(&Value::Int(1)),
            Filter::from(&spec.filters[1]).with_value(&start),
        ]);
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, Some(spec.filters), &nav).unwrap();
        let by_name = filters.values_by_name();
        assert_eq!(by_name.get("data_leitura_inicial"), Some(&start));
        assert_eq!(by_name.get("sensor_id"), Some(&Value::Int(1)));
        assert!(!by_name.contains_key("data_leitura_final"));
    }

    #[tokio::test]
    async fn render_uses_filter_labels_and_keys() {
        let store = MemoryStore::new();
        let filters = QueryFilters::new(&catalog::LEITURA_SENSOR, None, &NavState::default()).unwrap();
        let widgets = filters
            .render(&catalog::registry(), &store, false)
            .await
            .unwrap();
        let keys: Vec<_> = widgets.iter().map(|widget| widget.name.as_str()).collect();
        assert_eq!(keys, vec!["sensor_id==", "data_leitura>=", "data_leitura<="]);
        assert_eq!(widgets[1].label, "Data da Leitura Inicial");
    }
}
