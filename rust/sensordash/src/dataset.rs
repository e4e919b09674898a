//! Sensor readings pivoted into one row per timestamp and one column per
//! sensor type.

use crate::{
    error::Result,
    record::{
        catalog::{LEITURA_SENSOR, SENSOR, TIPO_SENSOR, TIPO_SENSOR_ENUM},
        value::format_timestamp,
    },
    store::{Persistable, RecordQuery},
};
use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRow {
    #[serde(serialize_with = "serialize_timestamp")]
    pub data_leitura: NaiveDateTime,
    /// One value per dataset column, in column order.
    pub values: Vec<f64>,
}

fn serialize_timestamp<S: Serializer>(value: &NaiveDateTime, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(value))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadingsDataset {
    /// Sensor-type labels, sorted.
    pub columns: Vec<String>,
    pub rows: Vec<DatasetRow>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    count: u32,
}

impl Mean {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

/// Label of every sensor, keyed by sensor identity.
async fn sensor_labels(store: &dyn Persistable) -> Result<HashMap<i64, String>> {
    let types: HashMap<i64, String> = store
        .list(&TIPO_SENSOR, &RecordQuery::all())
        .await?
        .into_iter()
        .filter_map(|row| {
            let code = row.get("tipo").as_str()?;
            let label = TIPO_SENSOR_ENUM.label_for(code).unwrap_or(code).to_string();
            Some((row.id()?, label))
        })
        .collect();

    let sensors = store.list(&SENSOR, &RecordQuery::all()).await?;
    Ok(sensors
        .into_iter()
        .filter_map(|sensor| {
            let type_id = sensor.get("tipo_sensor_id").as_i64()?;
            Some((sensor.id()?, types.get(&type_id)?.clone()))
        })
        .collect())
}

/// Fills each column's gaps from the previous row, then leading gaps from
/// the first later value.
fn fill_gaps(grid: &mut [Vec<Option<f64>>], columns: usize) {
    for column in 0..columns {
        let mut last = None;
        for row in grid.iter_mut() {
            match row[column] {
                Some(value) => last = Some(value),
                None => row[column] = last,
            }
        }
        let mut next = None;
        for row in grid.iter_mut().rev() {
            match row[column] {
                Some(value) => next = Some(value),
                None => row[column] = next,
            }
        }
    }
}

pub async fn readings_dataset(store: &dyn Persistable) -> Result<ReadingsDataset> {
    let labels = sensor_labels(store).await?;
    let readings = store.list(&LEITURA_SENSOR, &RecordQuery::all()).await?;

    let mut columns = BTreeSet::new();
    let mut by_time: BTreeMap<NaiveDateTime, HashMap<String, Mean>> = BTreeMap::new();
    let mut skipped = 0usize;
    for reading in &readings {
        let label = reading
            .get("sensor_id")
            .as_i64()
            .and_then(|id| labels.get(&id));
        let (Some(label), Some(at), Some(valor)) = (
            label,
            reading.get("data_leitura").as_timestamp(),
            reading.get("valor").as_f64(),
        ) else {
            skipped += 1;
            continue;
        };
        columns.insert(label.clone());
        by_time
            .entry(at)
            .or_default()
            .entry(label.clone())
            .or_default()
            .push(valor);
    }
    if skipped > 0 {
        debug!(skipped, "readings without a sensor type left out of the dataset");
    }

    let columns: Vec<String> = columns.into_iter().collect();
    let times: Vec<NaiveDateTime> = by_time.keys().copied().collect();
    let mut grid: Vec<Vec<Option<f64>>> = by_time
        .values()
        .map(|means| {
            columns
                .iter()
                .map(|column| means.get(column).and_then(Mean::value))
                .collect()
        })
        .collect();
    fill_gaps(&mut grid, columns.len());

    let mut rows: Vec<DatasetRow> = times
        .into_iter()
        .zip(grid)
        .map(|(data_leitura, values)| DatasetRow {
            data_leitura,
            // Every column has at least one reading, so filling leaves no gaps.
            values: values.into_iter().map(|value| value.unwrap_or(f64::NAN)).collect(),
        })
        .collect();
    rows.dedup();

    Ok(ReadingsDataset { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::{Record, Value},
        store::MemoryStore,
    };
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;

    fn at(hour: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(hour)
    }

    async fn sensor(store: &MemoryStore, nome: &str, code: &str) -> i64 {
        let tipo = Record::new(&TIPO_SENSOR)
            .with("nome", Value::Text(nome.into()))
            .and_then(|r| r.with("tipo", Value::Enum(code.into())))
            .unwrap();
        let tipo_id = store.insert(&tipo).await.unwrap().id().unwrap();
        let sensor = Record::new(&SENSOR)
            .with("tipo_sensor_id", Value::Int(tipo_id))
            .and_then(|r| r.with("nome", Value::Text(format!("sensor {nome}"))))
            .unwrap();
        store.insert(&sensor).await.unwrap().id().unwrap()
    }

    async fn read(store: &MemoryStore, sensor_id: i64, hour: i64, valor: f64) {
        let reading = Record::new(&LEITURA_SENSOR)
            .with("sensor_id", Value::Int(sensor_id))
            .and_then(|r| r.with("data_leitura", Value::Timestamp(at(hour))))
            .and_then(|r| r.with("valor", Value::Real(valor)))
            .unwrap();
        store.insert(&reading).await.unwrap();
    }

    #[tokio::test]
    async fn readings_pivot_per_sensor_type() {
        let store = MemoryStore::new();
        let lux = sensor(&store, "luz", "L").await;
        let temp = sensor(&store, "temp", "T").await;
        read(&store, lux, 1, 10.0).await;
        read(&store, lux, 1, 20.0).await;
        read(&store, temp, 2, 30.0).await;
        read(&store, lux, 3, 5.0).await;

        let dataset = readings_dataset(&store).await.unwrap();
        assert_eq!(dataset.columns, vec!["Lux (x10³)", "Temperatura (°C)"]);
        let values: Vec<_> = dataset.rows.iter().map(|row| row.values.clone()).collect();
        assert_eq!(
            values,
            vec![vec![15.0, 30.0], vec![15.0, 30.0], vec![5.0, 30.0]]
        );
        assert_eq!(dataset.rows[0].data_leitura, at(1));
    }

    #[tokio::test]
    async fn no_readings_is_an_empty_dataset() {
        let store = MemoryStore::new();
        sensor(&store, "luz", "L").await;
        let dataset = readings_dataset(&store).await.unwrap();
        assert_eq!(dataset, ReadingsDataset::default());
    }

    #[test]
    fn gaps_fill_forward_then_backward() {
        let mut grid = vec![
            vec![None, Some(1.0)],
            vec![Some(2.0), None],
            vec![None, None],
        ];
        fill_gaps(&mut grid, 2);
        assert_eq!(
            grid,
            vec![
                vec![Some(2.0), Some(1.0)],
                vec![Some(2.0), Some(1.0)],
                vec![Some(2.0), Some(1.0)],
            ]
        );
    }
}
