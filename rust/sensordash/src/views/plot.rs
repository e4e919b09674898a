use crate::{
    error::Result,
    form::Widget,
    nav::NavState,
    plot::{self, Chart},
    query_filters::QueryFilters,
    record::{registry::SimulationInput, Displayable, RecordType, Registry},
    store::{Persistable, RecordQuery},
};
use chrono::NaiveDateTime;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of synthetic records behind a simulated chart.
pub const SIMULATED_RECORDS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotMode {
    Real,
    Simulate,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct PlotView {
    pub table: &'static str,
    pub title: String,
    pub filters: Vec<Widget>,
    pub valid: bool,
    pub mode: Option<PlotMode>,
    pub chart: Option<Chart>,
    pub message: Option<String>,
}

/// Filter panel plus, when `mode` is given and the filters are valid, the
/// chart built from stored or synthetic records.
#[allow(clippy::too_many_arguments)]
pub async fn plot_view(
    registry: &Registry,
    store: &dyn Persistable,
    ty: &'static RecordType,
    nav: &NavState,
    mode: Option<PlotMode>,
    show_validation: bool,
    now: NaiveDateTime,
    rng: &mut (dyn RngCore + Send),
) -> Result<PlotView> {
    let spec = plot::spec_for(ty)?;
    let filters = QueryFilters::new(ty, Some(spec.filters), nav)?;
    let widgets = filters.render(registry, store, show_validation).await?;
    let valid = filters.is_valid();

    let mut view = PlotView {
        table: ty.table,
        title: format!("{} - Chart", ty.display_plural()),
        filters: widgets,
        valid,
        mode,
        chart: None,
        message: None,
    };

    let Some(mode) = mode else {
        return Ok(view);
    };
    if !valid {
        view.message = Some("Fill in the required filters to build the chart.".to_string());
        return Ok(view);
    }

    let records = match mode {
        PlotMode::Simulate => {
            let by_field = filters.values_by_field();
            let by_name = filters.values_by_name();
            let input = SimulationInput {
                quantity: SIMULATED_RECORDS,
                now,
                values_by_field: &by_field,
                values_by_name: &by_name,
            };
            plot::simulate(ty, &input, rng)?
        }
        PlotMode::Real => {
            let mut query = RecordQuery::filtered(filters.predicates()?);
            if !spec.order_by.is_empty() {
                query = query.order(spec.order_by);
            }
            store.list(ty, &query).await?
        }
    };
    debug!(table = ty.table, ?mode, records = records.len(), "building chart");

    if records.is_empty() {
        view.message = Some("No data found for the selected filters.".to_string());
        return Ok(view);
    }
    view.chart = Some(spec.chart(ty, &records)?);
    Ok(view)
}
