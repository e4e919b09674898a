//! Paginated, filterable listing of one record type.

use super::display_cell;
use crate::{
    error::Result,
    form::Widget,
    nav::NavState,
    plot::OrderBy,
    query_filters::QueryFilters,
    record::{Describable, Displayable, RecordType, Registry},
    store::{Persistable, RecordQuery},
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub field: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub id: Option<i64>,
    pub label: String,
    pub cells: Vec<JsonValue>,
    /// Navigation state that opens this row in the edit view.
    pub edit: NavState,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub pages: i64,
    pub label: String,
    pub per_page: i64,
    pub total: i64,
    pub previous: Option<NavState>,
    pub next: Option<NavState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableView {
    pub table: &'static str,
    pub title: &'static str,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub filters: Vec<Widget>,
    pub pagination: Option<Pagination>,
    /// Navigation state for an empty create form.
    pub create: NavState,
    pub plot_available: bool,
    /// State the page was actually rendered with.
    pub nav: NavState,
}

fn div_ceil(value: i64, divisor: i64) -> i64 {
    let value = value.max(0);
    value / divisor + i64::from(value % divisor != 0)
}

/// 1-based page holding `offset`.
pub fn page_for(offset: i64, per_page: i64) -> i64 {
    div_ceil(offset, per_page).saturating_add(1)
}

fn pagination(nav: &NavState, total: i64, per_page: i64) -> Option<Pagination> {
    // A single partial page needs no controls.
    if total < per_page {
        return None;
    }
    let pages = div_ceil(total, per_page);
    let page = page_for(nav.offset(), per_page);
    Some(Pagination {
        page,
        pages,
        label: format!("Page {page} of {pages}"),
        per_page,
        total,
        previous: (page > 1).then(|| nav.with_offset((page - 2).saturating_mul(per_page))),
        next: (page < pages).then(|| nav.with_offset(page.saturating_mul(per_page))),
    })
}

pub async fn table_view(
    registry: &Registry,
    store: &dyn Persistable,
    ty: &'static RecordType,
    nav: &NavState,
    default_per_page: usize,
) -> Result<TableView> {
    let filters = QueryFilters::new(ty, None, nav)?;
    let predicates = filters.predicates()?;
    let per_page = ty.items_per_page.unwrap_or(default_per_page).max(1) as i64;

    let total = store.count(ty, &predicates).await?;
    let pages = div_ceil(total, per_page).max(1);
    let mut nav = nav.clone();
    if nav.offset() > 0 && page_for(nav.offset(), per_page) > pages {
        debug!(table = ty.table, offset = nav.offset(), total, "offset past the last page, resetting");
        nav.offset = None;
    }

    let query = RecordQuery::filtered(predicates)
        .order(&[OrderBy::desc(ty.identity_field().name)])
        .page(per_page, nav.offset());
    let records = store.list(ty, &query).await?;

    let fields = ty.listed_fields();
    let rows = records
        .iter()
        .map(|record| Row {
            id: record.id(),
            label: ty.row_label(record),
            cells: fields
                .iter()
                .map(|field| display_cell(field, record.get(field.name)))
                .collect(),
            edit: nav.edit_record(record.id()),
        })
        .collect();

    Ok(TableView {
        table: ty.table,
        title: ty.display_plural(),
        columns: fields
            .iter()
            .map(|field| Column {
                field: field.name,
                label: field.label,
            })
            .collect(),
        rows,
        filters: filters.render(registry, store, false).await?,
        pagination: pagination(&nav, total, per_page),
        create: nav.edit_record(None),
        plot_available: ty.plot.is_some(),
        nav,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::{Filter, FilterOp},
        record::{catalog, Record, Value},
        store::MemoryStore,
    };
    use pretty_assertions::assert_eq;

    async fn gadgets(count: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for index in 0..count {
            let record = Record::new(&catalog::fixtures::GADGET)
                .with("nome", Value::Text(format!("g{index}")))
                .and_then(|r| r.with("ligado", Value::Bool(index % 2 == 0)))
                .unwrap();
            store.insert(&record).await.unwrap();
        }
        store
    }

    #[test]
    fn pages_are_one_based() {
        assert_eq!(page_for(0, 50), 1);
        assert_eq!(page_for(50, 50), 2);
        assert_eq!(page_for(51, 50), 3);
        assert_eq!(page_for(i64::MAX, 1), i64::MAX);
        assert_eq!(page_for(-7, 50), 1);
    }

    #[tokio::test]
    async fn rows_are_newest_first_and_paged() {
        let store = gadgets(5).await;
        let nav = NavState::default().with_offset(2);
        let view = table_view(&catalog::registry(), &store, &catalog::fixtures::GADGET, &nav, 50)
            .await
            .unwrap();

        let ids: Vec<_> = view.rows.iter().filter_map(|row| row.id).collect();
        assert_eq!(ids, vec![3, 2]);
        let columns: Vec<_> = view.columns.iter().map(|column| column.field).collect();
        assert_eq!(columns, vec!["id", "nome", "ativo"]);

        let pagination = view.pagination.expect("five rows over pages of two");
        assert_eq!(pagination.page, 2);
        assert_eq!(pagination.pages, 3);
        assert_eq!(pagination.label, "Page 2 of 3");
        assert_eq!(pagination.next.and_then(|next| next.offset), Some(4));
        assert_eq!(view.rows[0].edit.id, Some(3));
        assert!(view.rows[0].edit.editing());
        assert!(!view.plot_available);
    }

    #[tokio::test]
    async fn short_listings_have_no_pagination() {
        let store = gadgets(1).await;
        let view = table_view(
            &catalog::registry(),
            &store,
            &catalog::fixtures::GADGET,
            &NavState::default(),
            50,
        )
        .await
        .unwrap();
        assert!(view.pagination.is_none());
        assert_eq!(view.rows.len(), 1);
    }

    #[tokio::test]
    async fn offsets_past_the_end_reset_to_the_first_page() {
        let store = gadgets(3).await;
        let nav = NavState::default().with_offset(40);
        let view = table_view(&catalog::registry(), &store, &catalog::fixtures::GADGET, &nav, 50)
            .await
            .unwrap();
        assert_eq!(view.nav.offset(), 0);
        assert_eq!(view.rows.len(), 2);
        assert_eq!(view.pagination.map(|p| p.page), Some(1));
    }

    #[tokio::test]
    async fn maximal_offset_resets_to_the_first_page() {
        let store = gadgets(3).await;
        let nav = NavState::default().with_offset(i64::MAX);
        let view = table_view(&catalog::registry(), &store, &catalog::fixtures::GADGET, &nav, 50)
            .await
            .unwrap();
        assert_eq!(view.nav.offset(), 0);
        assert_eq!(view.rows.len(), 2);
        assert_eq!(view.pagination.map(|p| p.page), Some(1));

        let empty = table_view(
            &catalog::registry(),
            &MemoryStore::new(),
            &catalog::EMPRESA,
            &NavState::default().with_offset(i64::MAX),
            50,
        )
        .await
        .unwrap();
        assert_eq!(empty.nav.offset(), 0);
        assert!(empty.rows.is_empty());
    }

    #[tokio::test]
    async fn filters_narrow_the_listing() {
        let store = MemoryStore::new();
        for (name, code) in [("Lux", "L"), ("Temp", "T")] {
            let record = Record::new(&catalog::TIPO_SENSOR)
                .with("nome", Value::Text(name.into()))
                .and_then(|r| r.with("tipo", Value::Enum(code.into())))
                .unwrap();
            store.insert(&record).await.unwrap();
        }
        let nav = NavState::default()
            .with_filters(&[Filter::new("tipo", FilterOp::Eq).with_value(&Value::Enum("T".into()))]);

        let view = table_view(&catalog::registry(), &store, &catalog::TIPO_SENSOR, &nav, 50)
            .await
            .unwrap();

        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.rows[0].cells[2], serde_json::json!("Temperatura (°C)"));
        assert_eq!(view.filters.len(), 1);
        assert_eq!(view.filters[0].input.selected_label(), Some("Temperatura (°C)"));
    }
}
