use super::{Describable, Displayable, FieldDef, Record, RecordError, Value};
use crate::{filter::FilterTemplate, plot::PlotSpec};
use rand::RngCore;
use serde::Serialize;
use std::{collections::HashMap, fmt};

pub type RowLabel = fn(&Record) -> String;

/// Inputs handed to a type-specific simulated-data generator.
pub struct SimulationInput<'a> {
    pub quantity: usize,
    pub now: chrono::NaiveDateTime,
    pub values_by_field: &'a HashMap<String, Value>,
    pub values_by_name: &'a HashMap<String, Value>,
}

pub type Simulator = fn(&SimulationInput<'_>, &mut dyn RngCore) -> Vec<Record>;

/// Static descriptor of one record type.
pub struct RecordType {
    pub table: &'static str,
    pub display_name: &'static str,
    pub display_plural: &'static str,
    pub menu_group: Option<&'static str>,
    pub menu_order: u32,
    /// Lower values import first so referenced rows exist before their referrers.
    pub import_order: u32,
    pub items_per_page: Option<usize>,
    pub fields: &'static [FieldDef],
    pub table_columns: Option<&'static [&'static str]>,
    pub default_filters: &'static [FilterTemplate],
    pub plot: Option<&'static PlotSpec>,
    pub label: RowLabel,
    pub simulate: Option<Simulator>,
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("table", &self.table)
            .field("import_order", &self.import_order)
            .finish_non_exhaustive()
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
    }
}

impl RecordType {
    /// Columns shown by the table view, identity first.
    pub fn listed_fields(&self) -> Vec<&'static FieldDef> {
        match self.table_columns {
            Some(columns) => columns
                .iter()
                .filter_map(|name| self.fields.iter().find(|field| field.name == *name))
                .collect(),
            None => self.fields.iter().collect(),
        }
    }
}

impl Describable for RecordType {
    fn fields(&self) -> &'static [FieldDef] {
        self.fields
    }

    fn table_name(&self) -> &'static str {
        self.table
    }
}

impl Displayable for RecordType {
    fn display_name(&self) -> &'static str {
        self.display_name
    }

    fn display_plural(&self) -> &'static str {
        self.display_plural
    }

    fn row_label(&self, record: &Record) -> String {
        (self.label)(record)
    }
}

/// `"<id> - <nome>"`, or just the id when the row has no name.
pub fn id_and_name(record: &Record) -> String {
    let id = record
        .id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "None".to_string());
    match record.get("nome").as_str() {
        Some(name) => format!("{id} - {name}"),
        None => id,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuEntry {
    pub table: &'static str,
    pub title: &'static str,
    pub has_plot: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuGroup {
    pub title: String,
    pub entries: Vec<MenuEntry>,
}

/// Explicit set of record types known to the process.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: Vec<&'static RecordType>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `ty`, replacing any earlier registration of the same table.
    pub fn register(&mut self, ty: &'static RecordType) -> &mut Self {
        match self.types.iter().position(|known| known.table == ty.table) {
            Some(index) => self.types[index] = ty,
            None => self.types.push(ty),
        }
        self
    }

    pub fn types(&self) -> &[&'static RecordType] {
        &self.types
    }

    pub fn get(&self, table: &str) -> Result<&'static RecordType, RecordError> {
        self.types
            .iter()
            .copied()
            .find(|ty| ty.table.eq_ignore_ascii_case(table))
            .ok_or_else(|| RecordError::UnknownType(table.to_string()))
    }

    /// Types sorted by import order, ties broken by table name.
    pub fn import_order(&self) -> Vec<&'static RecordType> {
        let mut ordered = self.types.clone();
        ordered.sort_by(|a, b| {
            a.import_order
                .cmp(&b.import_order)
                .then_with(|| a.table.cmp(b.table))
        });
        ordered
    }

    /// Groups sorted by title with ungrouped types last; entries by menu order then name.
    pub fn menu(&self) -> Vec<MenuGroup> {
        let mut groups: Vec<Option<&'static str>> = Vec::new();
        for ty in &self.types {
            if !groups.contains(&ty.menu_group) {
                groups.push(ty.menu_group);
            }
        }
        groups.sort_by_key(|group| (group.is_none(), *group));

        groups
            .into_iter()
            .map(|group| {
                let mut members: Vec<_> = self
                    .types
                    .iter()
                    .filter(|ty| ty.menu_group == group)
                    .collect();
                members.sort_by(|a, b| {
                    a.menu_order
                        .cmp(&b.menu_order)
                        .then_with(|| a.display_name.cmp(b.display_name))
                });
                MenuGroup {
                    title: group.unwrap_or("Other records").to_string(),
                    entries: members
                        .into_iter()
                        .map(|ty| MenuEntry {
                            table: ty.table,
                            title: ty.display_plural,
                            has_plot: ty.plot.is_some(),
                        })
                        .collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::catalog;

    #[test]
    fn import_order_puts_referenced_tables_first() {
        let registry = catalog::registry();
        let order: Vec<_> = registry.import_order().iter().map(|ty| ty.table).collect();
        assert_eq!(
            order,
            vec![
                "EMPRESA",
                "EQUIPAMENTO",
                "MANUTENCAO_EQUIPAMENTO",
                "TIPO_SENSOR",
                "SENSOR",
                "LEITURA_SENSOR"
            ]
        );
    }

    #[test]
    fn lookup_ignores_case() {
        let registry = catalog::registry();
        assert_eq!(registry.get("sensor").map(|ty| ty.table), Ok("SENSOR"));
        assert!(matches!(
            registry.get("nope"),
            Err(RecordError::UnknownType(name)) if name == "nope"
        ));
    }

    #[test]
    fn menu_groups_are_sorted_and_entries_ordered() {
        let menu = catalog::registry().menu();
        let titles: Vec<_> = menu.iter().map(|group| group.title.as_str()).collect();
        assert_eq!(titles, vec!["Empresa", "Equipamento", "Sensores"]);
        let sensors: Vec<_> = menu[2].entries.iter().map(|entry| entry.table).collect();
        assert_eq!(sensors, vec!["TIPO_SENSOR", "SENSOR", "LEITURA_SENSOR"]);
        assert!(menu[2].entries[2].has_plot);
    }

    #[test]
    fn registering_twice_replaces_the_entry() {
        let mut registry = Registry::new();
        registry.register(&catalog::SENSOR).register(&catalog::SENSOR);
        assert_eq!(registry.types().len(), 1);
    }

    #[test]
    fn row_label_joins_id_and_name() {
        let record = Record::new(&catalog::EQUIPAMENTO)
            .with("id", Value::Int(4))
            .and_then(|record| record.with("nome", Value::Text("Bomba".into())))
            .expect("fields exist");
        assert_eq!(catalog::EQUIPAMENTO.row_label(&record), "4 - Bomba");
    }
}
