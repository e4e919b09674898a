//! Static field descriptors.
//!
//! Every record type declares its columns as a `&'static [FieldDef]` built
//! with the `const` helpers below, so the whole catalogue lives in read-only
//! memory and needs no runtime reflection.

use serde::Serialize;

/// One legal value of an enumerated field. `code` is what gets stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnumMember {
    pub key: &'static str,
    pub code: &'static str,
    pub label: &'static str,
}

#[derive(Debug, PartialEq, Eq)]
pub struct EnumDef {
    pub name: &'static str,
    pub members: &'static [EnumMember],
}

impl EnumDef {
    pub fn by_code(&self, code: &str) -> Option<&'static EnumMember> {
        self.members.iter().find(|member| member.code == code)
    }

    /// Accepts either the stored code or the member key (`LUX`, `SP`, ...).
    pub fn resolve(&self, raw: &str) -> Option<&'static EnumMember> {
        let raw = raw.trim();
        self.by_code(raw).or_else(|| {
            self.members
                .iter()
                .find(|member| member.key.eq_ignore_ascii_case(raw))
        })
    }

    pub fn label_for(&self, code: &str) -> Option<&'static str> {
        self.by_code(code).map(|member| member.label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Integer primary key assigned by storage.
    Identity,
    ShortText { max_len: usize },
    LongText { max_len: usize },
    Integer,
    Real,
    Boolean,
    Timestamp,
    Enum(&'static EnumDef),
    Blob { extensions: &'static [&'static str] },
    ForeignKey { table: &'static str },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Identity => "identity",
            FieldKind::ShortText { .. } => "short_text",
            FieldKind::LongText { .. } => "long_text",
            FieldKind::Integer => "integer",
            FieldKind::Real => "real",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Enum(_) => "enum",
            FieldKind::Blob { .. } => "blob",
            FieldKind::ForeignKey { .. } => "foreign_key",
        }
    }

    pub fn max_len(&self) -> Option<usize> {
        match self {
            FieldKind::ShortText { max_len } | FieldKind::LongText { max_len } => Some(*max_len),
            _ => None,
        }
    }

    /// Postgres column type used by the generated DDL.
    pub fn sql_type(&self) -> String {
        match self {
            FieldKind::Identity => "BIGINT".to_string(),
            FieldKind::ShortText { max_len } | FieldKind::LongText { max_len } => {
                format!("VARCHAR({max_len})")
            }
            FieldKind::Integer | FieldKind::ForeignKey { .. } => "BIGINT".to_string(),
            FieldKind::Real => "DOUBLE PRECISION".to_string(),
            FieldKind::Boolean => "BOOLEAN".to_string(),
            FieldKind::Timestamp => "TIMESTAMP".to_string(),
            FieldKind::Enum(def) => {
                let widest = def
                    .members
                    .iter()
                    .map(|member| member.code.len())
                    .max()
                    .unwrap_or(1);
                format!("VARCHAR({widest})")
            }
            FieldKind::Blob { .. } => "BYTEA".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub unique: bool,
    pub help: Option<&'static str>,
}

impl FieldDef {
    pub const fn new(name: &'static str, label: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            label,
            kind,
            nullable: true,
            unique: false,
            help: None,
        }
    }

    pub const fn identity() -> Self {
        Self {
            name: "id",
            label: "ID",
            kind: FieldKind::Identity,
            nullable: false,
            unique: true,
            help: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.kind, FieldKind::Identity)
    }

    pub fn references(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::ForeignKey { table } => Some(table),
            _ => None,
        }
    }
}
