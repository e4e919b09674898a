//! Parameterised SQL for descriptor-driven tables.
//!
//! Statements are assembled with `?` placeholders, rewritten to `$n`, and
//! the values are bound in order through [`SqlBindValue`]. Rows come back as
//! one `row_to_json` text column so any record type shares a single loader.

use super::RecordQuery;
use crate::{
    filter::{FilterOp, Predicate},
    record::{Describable, FieldDef, FieldKind, Record, RecordType, Value},
};
use chrono::NaiveDateTime;
use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlBindValue {
    Text(Option<String>),
    BigInt(Option<i64>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Timestamp(Option<NaiveDateTime>),
    Bytes(Option<Vec<u8>>),
}

impl SqlBindValue {
    /// Binds `value` with the SQL type of `field`'s column.
    pub fn for_field(field: &FieldDef, value: &Value) -> Self {
        match field.kind {
            FieldKind::Identity | FieldKind::Integer | FieldKind::ForeignKey { .. } => {
                SqlBindValue::BigInt(value.as_i64())
            }
            FieldKind::Real => SqlBindValue::Float(value.as_f64()),
            FieldKind::Boolean => SqlBindValue::Bool(match value {
                Value::Bool(flag) => Some(*flag),
                _ => None,
            }),
            FieldKind::Timestamp => SqlBindValue::Timestamp(value.as_timestamp()),
            FieldKind::Blob { .. } => SqlBindValue::Bytes(match value {
                Value::Blob(bytes) => Some(bytes.clone()),
                _ => None,
            }),
            FieldKind::ShortText { .. } | FieldKind::LongText { .. } | FieldKind::Enum(_) => {
                SqlBindValue::Text(value.as_str().map(str::to_string))
            }
        }
    }

    pub fn apply<'a>(&self, query: BoxedSqlQuery<'a, Pg, SqlQuery>) -> BoxedSqlQuery<'a, Pg, SqlQuery> {
        use diesel::sql_types::{Binary, Bool, Float8, Int8, Nullable, Text, Timestamp};
        match self {
            SqlBindValue::Text(value) => query.bind::<Nullable<Text>, _>(value.clone()),
            SqlBindValue::BigInt(value) => query.bind::<Nullable<Int8>, _>(*value),
            SqlBindValue::Float(value) => query.bind::<Nullable<Float8>, _>(*value),
            SqlBindValue::Bool(value) => query.bind::<Nullable<Bool>, _>(*value),
            SqlBindValue::Timestamp(value) => query.bind::<Nullable<Timestamp>, _>(*value),
            SqlBindValue::Bytes(value) => query.bind::<Nullable<Binary>, _>(value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<SqlBindValue>,
}

impl Statement {
    fn new(sql: String, binds: Vec<SqlBindValue>) -> Self {
        Self {
            sql: rewrite_placeholders(&sql),
            binds,
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn projection(ty: &RecordType) -> String {
    ty.fields()
        .iter()
        .map(|field| match field.kind {
            FieldKind::Blob { .. } => {
                let column = quote_ident(field.name);
                format!("encode({column}, 'base64') AS {column}")
            }
            _ => quote_ident(field.name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_clause(ty: &RecordType, predicates: &[Predicate], binds: &mut Vec<SqlBindValue>) -> String {
    let clauses: Vec<String> = predicates
        .iter()
        .map(|predicate| {
            let column = quote_ident(predicate.column);
            match (&predicate.value, predicate.op) {
                (Value::Null, FilterOp::Eq) => format!("{column} IS NULL"),
                (Value::Null, FilterOp::Ne) => format!("{column} IS NOT NULL"),
                (Value::Null, _) => "FALSE".to_string(),
                (value, op) => {
                    let bind = match ty.field(predicate.column) {
                        Ok(field) => SqlBindValue::for_field(field, value),
                        Err(_) => SqlBindValue::Text(value.as_str().map(str::to_string)),
                    };
                    binds.push(bind);
                    format!("{column} {} ?", op.sql())
                }
            }
        })
        .collect();

    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

pub fn select(ty: &RecordType, query: &RecordQuery) -> Statement {
    let mut binds = Vec::new();
    let mut sql = format!(
        "SELECT row_to_json(r)::text AS data FROM (SELECT {} FROM {}",
        projection(ty),
        quote_ident(ty.table)
    );
    sql.push_str(&where_clause(ty, &query.predicates, &mut binds));

    let order: Vec<String> = query
        .order_by
        .iter()
        .filter(|order| ty.field(order.field).is_ok())
        .map(|order| {
            let direction = if order.ascending { "ASC" } else { "DESC" };
            format!("{} {direction}", quote_ident(order.field))
        })
        .collect();
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        binds.push(SqlBindValue::BigInt(Some(limit)));
    }
    if query.offset > 0 {
        sql.push_str(" OFFSET ?");
        binds.push(SqlBindValue::BigInt(Some(query.offset)));
    }
    sql.push_str(") r");
    Statement::new(sql, binds)
}

pub fn select_by_id(ty: &RecordType, id: i64) -> Statement {
    let identity = ty.identity_field().name;
    select(
        ty,
        &RecordQuery {
            predicates: vec![Predicate::new(identity, FilterOp::Eq, Value::Int(id))],
            ..RecordQuery::default()
        },
    )
}

pub fn count(ty: &RecordType, predicates: &[Predicate]) -> Statement {
    let mut binds = Vec::new();
    let mut sql = format!("SELECT COUNT(*) AS total FROM {}", quote_ident(ty.table));
    sql.push_str(&where_clause(ty, predicates, &mut binds));
    Statement::new(sql, binds)
}

fn written_fields(record: &Record) -> Vec<&'static FieldDef> {
    let ty = record.record_type();
    ty.fields()
        .iter()
        .filter(|field| !field.is_identity() || record.id().is_some())
        .collect()
}

fn insert_sql(record: &Record) -> (String, Vec<SqlBindValue>) {
    let ty = record.record_type();
    let fields = written_fields(record);
    let columns: Vec<String> = fields.iter().map(|field| quote_ident(field.name)).collect();
    let placeholders = vec!["?"; fields.len()].join(", ");
    let binds = fields
        .iter()
        .map(|field| SqlBindValue::for_field(field, record.get(field.name)))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_ident(ty.table),
        columns.join(", ")
    );
    (sql, binds)
}

pub fn insert(record: &Record) -> Statement {
    let identity = quote_ident(record.record_type().identity_field().name);
    let (mut sql, binds) = insert_sql(record);
    sql.push_str(&format!(" RETURNING {identity} AS id"));
    Statement::new(sql, binds)
}

/// Insert that overwrites every non-identity column when the identity exists.
pub fn merge(record: &Record) -> Statement {
    let ty = record.record_type();
    let identity = quote_ident(ty.identity_field().name);
    let (mut sql, binds) = insert_sql(record);
    let assignments: Vec<String> = ty
        .editable_fields()
        .iter()
        .map(|field| {
            let column = quote_ident(field.name);
            format!("{column} = EXCLUDED.{column}")
        })
        .collect();
    if assignments.is_empty() {
        sql.push_str(&format!(" ON CONFLICT ({identity}) DO NOTHING"));
    } else {
        sql.push_str(&format!(
            " ON CONFLICT ({identity}) DO UPDATE SET {}",
            assignments.join(", ")
        ));
    }
    sql.push_str(&format!(" RETURNING {identity} AS id"));
    Statement::new(sql, binds)
}

pub fn update(record: &Record, id: i64) -> Statement {
    let ty = record.record_type();
    let fields = ty.editable_fields();
    let mut binds: Vec<SqlBindValue> = fields
        .iter()
        .map(|field| SqlBindValue::for_field(field, record.get(field.name)))
        .collect();
    binds.push(SqlBindValue::BigInt(Some(id)));
    let assignments: Vec<String> = fields
        .iter()
        .map(|field| format!("{} = ?", quote_ident(field.name)))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(ty.table),
        assignments.join(", "),
        quote_ident(ty.identity_field().name)
    );
    Statement::new(sql, binds)
}

pub fn delete(ty: &RecordType, id: i64) -> Statement {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_ident(ty.table),
        quote_ident(ty.identity_field().name)
    );
    Statement::new(sql, vec![SqlBindValue::BigInt(Some(id))])
}

/// Points the identity sequence one past `MAX(id)`; a no-op for tables whose
/// identity is not sequence-backed.
pub fn resync_identity(ty: &RecordType) -> Statement {
    let table = quote_ident(ty.table);
    let identity = quote_ident(ty.identity_field().name);
    let sql = format!(
        "SELECT setval(s.seq, COALESCE((SELECT MAX({identity}) FROM {table}), 0) + 1, false) \
         FROM (SELECT pg_get_serial_sequence(?, ?) AS seq) s WHERE s.seq IS NOT NULL"
    );
    Statement::new(
        sql,
        vec![
            SqlBindValue::Text(Some(table)),
            SqlBindValue::Text(Some(ty.identity_field().name.to_string())),
        ],
    )
}

pub fn rewrite_placeholders(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut index = 1;
    for ch in sql.chars() {
        if ch == '?' {
            result.push('$');
            result.push_str(&index.to_string());
            index += 1;
        } else {
            result.push(ch);
        }
    }
    result
}
