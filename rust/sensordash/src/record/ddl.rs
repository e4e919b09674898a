//! DDL and entity-relationship summaries generated from the descriptors.

use super::{Describable, FieldDef, FieldKind, RecordType, Registry};
use crate::store::sql::quote_ident;
use std::fmt::Write as _;

fn column_definition(field: &FieldDef) -> String {
    let name = quote_ident(field.name);
    if field.is_identity() {
        return format!("{name} BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY");
    }

    let mut definition = format!("{name} {}", field.kind.sql_type());
    if !field.nullable {
        definition.push_str(" NOT NULL");
    }
    if field.unique {
        definition.push_str(" UNIQUE");
    }
    if let FieldKind::ForeignKey { table } = field.kind {
        let _ = write!(
            definition,
            " REFERENCES {} (\"id\") ON DELETE CASCADE",
            quote_ident(table)
        );
    }
    definition
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// `CREATE TABLE IF NOT EXISTS` for one type, followed by its column comments.
pub fn create_table(ty: &RecordType) -> String {
    let table = quote_ident(ty.table);
    let columns: Vec<String> = ty
        .fields()
        .iter()
        .map(|field| format!("    {}", column_definition(field)))
        .collect();

    let mut script = format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n{}\n);\n",
        columns.join(",\n")
    );
    for field in ty.fields() {
        if let Some(help) = field.help {
            let _ = writeln!(
                script,
                "COMMENT ON COLUMN {table}.{} IS {};",
                quote_ident(field.name),
                quote_literal(help)
            );
        }
    }
    script
}

/// Whole-schema script in import order, so referenced tables come first.
pub fn schema_script(registry: &Registry) -> String {
    registry
        .import_order()
        .into_iter()
        .map(create_table)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain-text entity-relationship summary.
pub fn entity_relationship(registry: &Registry) -> String {
    let mut output = String::from("Entity-relationship model:\n\n");
    for ty in registry.import_order() {
        let _ = writeln!(output, "Table: {}", ty.table);
        for field in ty.fields() {
            let sql_type = field.kind.sql_type();
            let _ = write!(output, "  - {} ", field.name);
            if field.nullable {
                let _ = write!(output, "({sql_type})");
            } else {
                let _ = write!(output, "({sql_type} NOT NULL)");
            }
            if field.is_identity() {
                output.push_str(" [PK]");
            }
            if let Some(target) = field.references() {
                let _ = write!(output, " [FK -> {target}]");
            }
            output.push('\n');
        }
        output.push('\n');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::catalog;
    use pretty_assertions::assert_eq;

    #[test]
    fn readings_table_references_sensors() {
        assert_eq!(
            create_table(&catalog::LEITURA_SENSOR),
            "CREATE TABLE IF NOT EXISTS \"LEITURA_SENSOR\" (\n\
             \x20   \"id\" BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,\n\
             \x20   \"sensor_id\" BIGINT NOT NULL REFERENCES \"SENSOR\" (\"id\") ON DELETE CASCADE,\n\
             \x20   \"data_leitura\" TIMESTAMP NOT NULL,\n\
             \x20   \"valor\" DOUBLE PRECISION NOT NULL\n\
             );\n"
        );
    }

    #[test]
    fn help_text_becomes_column_comment() {
        let script = create_table(&catalog::EQUIPAMENTO);
        assert!(script.contains(
            "COMMENT ON COLUMN \"EQUIPAMENTO\".\"data_instalacao\" IS 'Data de instalação do equipamento';"
        ));
        assert!(script.contains("\"nome\" VARCHAR(255) NOT NULL UNIQUE"));
    }

    #[test]
    fn schema_creates_referenced_tables_first() {
        let script = schema_script(&catalog::registry());
        let equipment = script.find("\"EQUIPAMENTO\" (").expect("equipment table");
        let maintenance = script
            .find("\"MANUTENCAO_EQUIPAMENTO\" (")
            .expect("maintenance table");
        assert!(equipment < maintenance);
    }

    #[test]
    fn relationship_summary_marks_keys() {
        let summary = entity_relationship(&catalog::registry());
        assert!(summary.contains("Table: SENSOR\n  - id (BIGINT NOT NULL) [PK]\n"));
        assert!(summary.contains("  - tipo_sensor_id (BIGINT NOT NULL) [FK -> TIPO_SENSOR]\n"));
        assert!(summary.contains("  - equipamento_id (BIGINT) [FK -> EQUIPAMENTO]\n"));
    }
}
