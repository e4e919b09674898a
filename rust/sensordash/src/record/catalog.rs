//! The concrete record types of the sensor dashboard.
//!
//! Table and field names are part of the export format and of the filter
//! transport, so they keep their stored spelling.

use super::{
    field::{EnumDef, EnumMember, FieldDef, FieldKind},
    registry::{id_and_name, RecordType, Registry, SimulationInput},
    Record, Value,
};
use crate::{
    filter::{FilterOp, FilterTemplate},
    plot::{default_window_start, AxisField, ChartKind, OrderBy, PlotSpec},
};
use chrono::Duration;
use rand::{Rng, RngCore};

const NAME: FieldDef = FieldDef::new("nome", "Nome", FieldKind::ShortText { max_len: 255 });
const SHORT: FieldKind = FieldKind::ShortText { max_len: 255 };
const LONG: FieldKind = FieldKind::LongText { max_len: 2000 };

macro_rules! member {
    ($key:literal, $code:literal, $label:literal) => {
        EnumMember {
            key: $key,
            code: $code,
            label: $label,
        }
    };
}

pub static SIGLA_ESTADO: EnumDef = EnumDef {
    name: "SiglaEstado",
    members: &[
        member!("AC", "AC", "Acre"),
        member!("AL", "AL", "Alagoas"),
        member!("AP", "AP", "Amapá"),
        member!("AM", "AM", "Amazonas"),
        member!("BA", "BA", "Bahia"),
        member!("CE", "CE", "Ceará"),
        member!("DF", "DF", "Distrito Federal"),
        member!("ES", "ES", "Espírito Santo"),
        member!("GO", "GO", "Goiás"),
        member!("MA", "MA", "Maranhão"),
        member!("MT", "MT", "Mato Grosso"),
        member!("MS", "MS", "Mato Grosso do Sul"),
        member!("MG", "MG", "Minas Gerais"),
        member!("PA", "PA", "Pará"),
        member!("PB", "PB", "Paraíba"),
        member!("PR", "PR", "Paraná"),
        member!("PE", "PE", "Pernambuco"),
        member!("PI", "PI", "Piauí"),
        member!("RJ", "RJ", "Rio de Janeiro"),
        member!("RN", "RN", "Rio Grande do Norte"),
        member!("RS", "RS", "Rio Grande do Sul"),
        member!("RO", "RO", "Rondônia"),
        member!("RR", "RR", "Roraima"),
        member!("SC", "SC", "Santa Catarina"),
        member!("SP", "SP", "São Paulo"),
        member!("SE", "SE", "Sergipe"),
        member!("TO", "TO", "Tocantins"),
        member!("EX", "EX", "Exterior"),
    ],
};

pub static TIPO_SENSOR_ENUM: EnumDef = EnumDef {
    name: "TipoSensor",
    members: &[
        member!("LUX", "L", "Lux (x10³)"),
        member!("TEMPERATURA", "T", "Temperatura (°C)"),
        member!("VIBRACAO", "V", "Vibração"),
    ],
};

pub static EMPRESA: RecordType = RecordType {
    table: "EMPRESA",
    display_name: "Empresa",
    display_plural: "Empresas",
    menu_group: Some("Empresa"),
    menu_order: 1,
    import_order: 1,
    items_per_page: None,
    fields: &[
        FieldDef::identity(),
        NAME.required().unique(),
        FieldDef::new("cnpj", "CNPJ", FieldKind::ShortText { max_len: 14 }).unique(),
        FieldDef::new("logradouro", "Logradouro", SHORT),
        FieldDef::new("numero", "Número", SHORT),
        FieldDef::new("bairro", "Bairro", SHORT),
        FieldDef::new("cidade", "Cidade", SHORT),
        FieldDef::new("estado", "Estado", FieldKind::Enum(&SIGLA_ESTADO)),
        FieldDef::new("cep", "CEP", FieldKind::ShortText { max_len: 8 }),
    ],
    table_columns: None,
    default_filters: &[],
    plot: None,
    label: id_and_name,
    simulate: None,
};

pub static EQUIPAMENTO: RecordType = RecordType {
    table: "EQUIPAMENTO",
    display_name: "Equipamento",
    display_plural: "Equipamentos",
    menu_group: Some("Equipamento"),
    menu_order: 1,
    import_order: 3,
    items_per_page: None,
    fields: &[
        FieldDef::identity(),
        NAME.required().unique(),
        FieldDef::new("modelo", "Modelo", SHORT),
        FieldDef::new("localizacao", "Localização", SHORT),
        FieldDef::new("descricao", "Descrição", LONG),
        FieldDef::new("observacoes", "Observações", LONG),
        FieldDef::new("data_instalacao", "Data de Instalação", FieldKind::Timestamp)
            .help("Data de instalação do equipamento"),
    ],
    table_columns: None,
    default_filters: &[],
    plot: None,
    label: id_and_name,
    simulate: None,
};

pub static MANUTENCAO_EQUIPAMENTO: RecordType = RecordType {
    table: "MANUTENCAO_EQUIPAMENTO",
    display_name: "Manutenção de Equipamento",
    display_plural: "Manutenções de Equipamentos",
    menu_group: Some("Equipamento"),
    menu_order: 2,
    import_order: 4,
    items_per_page: None,
    fields: &[
        FieldDef::identity(),
        FieldDef::new(
            "equipamento_id",
            "Equipamento",
            FieldKind::ForeignKey {
                table: "EQUIPAMENTO",
            },
        )
        .required(),
        FieldDef::new(
            "data_previsao_manutencao",
            "Data Prevista da Manutenção",
            FieldKind::Timestamp,
        ),
        FieldDef::new("motivo", "Motivo da Manutenção", LONG),
        FieldDef::new(
            "data_inicio_manutencao",
            "Data do inicio da Manutenção",
            FieldKind::Timestamp,
        ),
        FieldDef::new(
            "data_fim_manutencao",
            "Data do fim da Manutenção",
            FieldKind::Timestamp,
        ),
        FieldDef::new("descricao", "Descrição", LONG),
        FieldDef::new("observacoes", "Observações", LONG),
        FieldDef::new("custo", "Custo", FieldKind::Real),
    ],
    table_columns: None,
    default_filters: &[FilterTemplate::new("equipamento_id", FilterOp::Eq).labelled("Equipamento")],
    plot: None,
    label: id_only,
    simulate: None,
};

pub static TIPO_SENSOR: RecordType = RecordType {
    table: "TIPO_SENSOR",
    display_name: "Tipo de Sensor",
    display_plural: "Tipos de Sensores",
    menu_group: Some("Sensores"),
    menu_order: 1,
    import_order: 10,
    items_per_page: None,
    fields: &[
        FieldDef::identity(),
        NAME.required().unique(),
        FieldDef::new("tipo", "Tipo", FieldKind::Enum(&TIPO_SENSOR_ENUM)).required(),
    ],
    table_columns: None,
    default_filters: &[FilterTemplate::new("tipo", FilterOp::Eq).labelled("Tipo")],
    plot: None,
    label: id_and_name,
    simulate: None,
};

pub static SENSOR: RecordType = RecordType {
    table: "SENSOR",
    display_name: "Sensor",
    display_plural: "Sensores",
    menu_group: Some("Sensores"),
    menu_order: 2,
    import_order: 11,
    items_per_page: None,
    fields: &[
        FieldDef::identity(),
        FieldDef::new(
            "tipo_sensor_id",
            "Tipo de Sensor",
            FieldKind::ForeignKey {
                table: "TIPO_SENSOR",
            },
        )
        .required(),
        NAME.unique(),
        FieldDef::new("cod_serial", "Código Serial", SHORT),
        FieldDef::new("descricao", "Descrição", SHORT),
        FieldDef::new("data_instalacao", "Data de Instalação", FieldKind::Timestamp),
        FieldDef::new(
            "equipamento_id",
            "Equipamento",
            FieldKind::ForeignKey {
                table: "EQUIPAMENTO",
            },
        ),
    ],
    table_columns: None,
    default_filters: &[FilterTemplate::new("tipo_sensor_id", FilterOp::Eq).labelled("Tipo de Sensor")],
    plot: None,
    label: id_and_name,
    simulate: None,
};

static LEITURA_PLOT: PlotSpec = PlotSpec {
    x: &[AxisField::new("data_leitura").display_name("Data da Leitura")],
    y: &[AxisField::new("valor").display_name("Valor")],
    kind: ChartKind::Line,
    y_labels: &[],
    title: Some("Gráfico de Leituras do Sensor"),
    filters: &[
        FilterTemplate::new("sensor_id", FilterOp::Eq)
            .labelled("Sensor")
            .required(),
        FilterTemplate::new("data_leitura", FilterOp::Ge)
            .named("data_leitura_inicial")
            .labelled("Data da Leitura Inicial"),
        FilterTemplate::new("data_leitura", FilterOp::Le)
            .named("data_leitura_final")
            .labelled("Data da Leitura Final"),
    ],
    order_by: &[OrderBy::asc("data_leitura")],
};

pub static LEITURA_SENSOR: RecordType = RecordType {
    table: "LEITURA_SENSOR",
    display_name: "Leitura de Sensor",
    display_plural: "Leituras de Sensores",
    menu_group: Some("Sensores"),
    menu_order: 3,
    import_order: 12,
    items_per_page: None,
    fields: &[
        FieldDef::identity(),
        FieldDef::new(
            "sensor_id",
            "Sensor",
            FieldKind::ForeignKey { table: "SENSOR" },
        )
        .required(),
        FieldDef::new("data_leitura", "Data da Leitura", FieldKind::Timestamp).required(),
        FieldDef::new("valor", "Valor", FieldKind::Real).required(),
    ],
    table_columns: None,
    default_filters: &[
        FilterTemplate::new("sensor_id", FilterOp::Eq).labelled("Sensor"),
        FilterTemplate::new("data_leitura", FilterOp::Ge).labelled("Data da Leitura Inicial"),
        FilterTemplate::new("data_leitura", FilterOp::Le).labelled("Data da Leitura Final"),
    ],
    plot: Some(&LEITURA_PLOT),
    label: reading_label,
    simulate: Some(simulate_readings),
};

fn id_only(record: &Record) -> String {
    record
        .id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "None".to_string())
}

/// `"Sensor_id: <sensor> - <date time> - <valor>"`.
fn reading_label(record: &Record) -> String {
    let sensor = record
        .get("sensor_id")
        .as_i64()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "None".to_string());
    let stamp = record
        .get("data_leitura")
        .as_timestamp()
        .map(|stamp| stamp.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "None".to_string());
    let valor = record
        .get("valor")
        .as_f64()
        .map(|valor| format!("{valor:?}"))
        .unwrap_or_else(|| "None".to_string());
    format!("Sensor_id: {sensor} - {stamp} - {valor}")
}

/// Readings spaced a seventh of a day apart from the requested start, values in `[0, 100)`.
fn simulate_readings(input: &SimulationInput<'_>, rng: &mut dyn RngCore) -> Vec<Record> {
    let start = input
        .values_by_name
        .get("data_leitura_inicial")
        .and_then(Value::as_timestamp)
        .unwrap_or_else(|| default_window_start(input.now));
    let sensor_id = input
        .values_by_field
        .get("sensor_id")
        .and_then(Value::as_i64)
        .unwrap_or(1);

    (0..input.quantity)
        .filter_map(|index| {
            let offset = Duration::seconds(index as i64 * 86_400 / 7);
            let valor = f64::from(rng.gen_range(0..10_000u32)) / 100.0;
            Record::new(&LEITURA_SENSOR)
                .with("sensor_id", Value::Int(sensor_id))
                .and_then(|record| record.with("data_leitura", Value::Timestamp(start + offset)))
                .and_then(|record| record.with("valor", Value::Real(valor)))
                .ok()
        })
        .collect()
}

/// Registers every record type of the dashboard.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(&EMPRESA)
        .register(&EQUIPAMENTO)
        .register(&MANUTENCAO_EQUIPAMENTO)
        .register(&TIPO_SENSOR)
        .register(&SENSOR)
        .register(&LEITURA_SENSOR);
    registry
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A record type exercising the field kinds the catalogue does not use.

    use super::*;

    pub static GADGET: RecordType = RecordType {
        table: "GADGET",
        display_name: "Gadget",
        display_plural: "Gadgets",
        menu_group: None,
        menu_order: 1,
        import_order: 1,
        items_per_page: Some(2),
        fields: &[
            FieldDef::identity(),
            FieldDef::new("nome", "Nome", FieldKind::ShortText { max_len: 20 }).required(),
            FieldDef::new("ativo", "Ativo", FieldKind::Boolean),
            FieldDef::new("ligado", "Ligado", FieldKind::Boolean).required(),
            FieldDef::new("quantidade", "Quantidade", FieldKind::Integer),
            FieldDef::new(
                "foto",
                "Foto",
                FieldKind::Blob {
                    extensions: &["jpeg", "png"],
                },
            ),
            FieldDef::new("manual", "Manual", FieldKind::Blob { extensions: &["pdf"] }),
        ],
        table_columns: Some(&["id", "nome", "ativo"]),
        default_filters: &[],
        plot: None,
        label: id_and_name,
        simulate: None,
    };
}
