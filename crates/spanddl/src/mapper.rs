//! Logical to physical type mapping, and the equivalence rules used when
//! comparing live columns against desired ones.

use spanddl_schema::{ColumnDescriptor, LogicalType};
use spanddl_sql::normalize_sql_expr;

use crate::config::Dialect;
use crate::{Error, Result};

/// Physical type for a column in `dialect`, e.g. `STRING(MAX)` or `varchar(64)`.
pub fn physical_type(dialect: Dialect, col: &ColumnDescriptor) -> String {
    type_name(dialect, &col.data_type, col.length)
}

fn type_name(dialect: Dialect, ty: &LogicalType, length: Option<u32>) -> String {
    match dialect {
        Dialect::GoogleSql => match ty {
            LogicalType::Bool => "BOOL".to_string(),
            LogicalType::Int32 | LogicalType::Int64 => "INT64".to_string(),
            LogicalType::Float32 => "FLOAT32".to_string(),
            LogicalType::Float64 => "FLOAT64".to_string(),
            LogicalType::Numeric => "NUMERIC".to_string(),
            LogicalType::String => match length {
                Some(n) => format!("STRING({})", n),
                None => "STRING(MAX)".to_string(),
            },
            LogicalType::Bytes => match length {
                Some(n) => format!("BYTES({})", n),
                None => "BYTES(MAX)".to_string(),
            },
            LogicalType::Date => "DATE".to_string(),
            LogicalType::Timestamp => "TIMESTAMP".to_string(),
            LogicalType::Json => "JSON".to_string(),
            LogicalType::Array(inner) => format!("ARRAY<{}>", type_name(dialect, inner, length)),
            LogicalType::Custom(ty) => ty.clone(),
        },
        Dialect::PostgreSql => match ty {
            LogicalType::Bool => "boolean".to_string(),
            LogicalType::Int32 => "int".to_string(),
            LogicalType::Int64 => "bigint".to_string(),
            LogicalType::Float32 => "real".to_string(),
            LogicalType::Float64 => "double precision".to_string(),
            // Fixed precision on this database; precision and scale are not part of the type
            LogicalType::Numeric => "numeric".to_string(),
            LogicalType::String => match length {
                Some(n) => format!("varchar({})", n),
                None => "text".to_string(),
            },
            LogicalType::Bytes => "bytea".to_string(),
            LogicalType::Date => "date".to_string(),
            LogicalType::Timestamp => "timestamptz".to_string(),
            LogicalType::Json => "jsonb".to_string(),
            LogicalType::Array(inner) => format!("{}[]", type_name(dialect, inner, length)),
            LogicalType::Custom(ty) => ty.clone(),
        },
    }
}

/// Read a catalog type back into a logical type and a length.
///
/// Unknown spellings come back as [`LogicalType::Custom`], which renders
/// verbatim.
pub fn logical_type(physical: &str) -> (LogicalType, Option<u32>) {
    let parsed = ParsedType::parse(physical);
    let length = parsed.size.as_ref().and_then(|s| s.parse().ok());

    let mut ty = match parsed.family {
        Family::Bool => LogicalType::Bool,
        Family::Integer => LogicalType::Int64,
        Family::Float32 => LogicalType::Float32,
        Family::Float64 => LogicalType::Float64,
        Family::Numeric => LogicalType::Numeric,
        Family::String => LogicalType::String,
        Family::Bytes => LogicalType::Bytes,
        Family::Date => LogicalType::Date,
        Family::Timestamp => LogicalType::Timestamp,
        Family::Json => LogicalType::Json,
        Family::Other(_) => return (LogicalType::Custom(physical.trim().to_string()), None),
    };
    for _ in 0..parsed.array_depth {
        ty = LogicalType::Array(Box::new(ty));
    }
    (ty, length)
}

/// Whether a live physical type and a desired one denote the same storage.
///
/// Aliases within a family compare equal (`varchar` and `text`, `int8` and
/// `bigint`). Every integer spelling is one family because the database
/// stores 64-bit integers only. An unsized string or bytes type equals the
/// explicit `MAX` size.
pub fn types_equivalent(live: &str, desired: &str) -> bool {
    ParsedType::parse(live) == ParsedType::parse(desired)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Family {
    Bool,
    Integer,
    Float32,
    Float64,
    Numeric,
    String,
    Bytes,
    Date,
    Timestamp,
    Json,
    Other(String),
}

impl Family {
    fn of(base: &str) -> Self {
        match base {
            "bool" | "boolean" => Family::Bool,
            "smallint" | "int2" | "int" | "integer" | "int4" | "bigint" | "int8" | "serial"
            | "bigserial" | "smallserial" | "int64" => Family::Integer,
            "real" | "float4" | "float32" => Family::Float32,
            "double precision" | "float8" | "float64" | "float" => Family::Float64,
            "numeric" | "decimal" => Family::Numeric,
            "character varying" | "varchar" | "text" | "string" => Family::String,
            "bytea" | "bytes" => Family::Bytes,
            "date" => Family::Date,
            "timestamp with time zone" | "timestamptz" | "timestamp" => Family::Timestamp,
            "json" | "jsonb" => Family::Json,
            other => Family::Other(other.to_string()),
        }
    }

    /// Whether the size is part of the type's identity.
    fn sized(&self) -> bool {
        matches!(self, Family::String | Family::Bytes | Family::Other(_))
    }
}

/// A type spelling reduced to what matters for equivalence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedType {
    family: Family,
    /// Lowercased size argument; `None` for unsized and `MAX`
    size: Option<String>,
    array_depth: usize,
}

impl ParsedType {
    fn parse(spelling: &str) -> Self {
        let mut s = spelling.split_whitespace().collect::<Vec<_>>().join(" ");
        s.make_ascii_lowercase();

        let mut array_depth = 0;
        loop {
            if let Some(inner) = s.strip_prefix("array<").and_then(|r| r.strip_suffix('>')) {
                s = inner.trim().to_string();
            } else if let Some(inner) = s.strip_suffix("[]") {
                s = inner.trim_end().to_string();
            } else {
                break;
            }
            array_depth += 1;
        }

        let (base, size) = match s.find('(') {
            Some(open) if s.ends_with(')') => {
                let size = s[open + 1..s.len() - 1].replace(' ', "");
                (s[..open].trim_end().to_string(), Some(size))
            }
            _ => (s, None),
        };

        let family = Family::of(&base);
        let size = if family.sized() {
            size.filter(|s| s != "max")
        } else {
            None
        };

        Self {
            family,
            size,
            array_depth,
        }
    }
}

/// Fail on a request for a UNIQUE column constraint.
///
/// The database only has unique indexes. The error names the first such
/// column in declaration order, so the same input always fails the same way.
pub fn reject_unique_constraints<'a>(
    table: &str,
    columns: impl IntoIterator<Item = &'a ColumnDescriptor>,
) -> Result<()> {
    match columns.into_iter().find(|c| c.unique) {
        Some(col) => Err(Error::UniqueConstraintNotSupported {
            table: table.to_string(),
            column: col.name.clone(),
        }),
        None => Ok(()),
    }
}

/// Reduce a default expression to a canonical form for comparison.
///
/// Drops everything from the first `::` cast outside quotes, surrounding
/// parentheses and single quotes, then collapses whitespace.
pub fn normalize_default(expr: &str) -> String {
    let mut s = strip_cast(expr.trim()).trim();
    while let Some(inner) = strip_outer_parens(s) {
        s = inner.trim();
    }
    let s = s
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .map(|r| r.replace("''", "'"))
        .unwrap_or_else(|| s.to_string());
    let normalized = normalize_sql_expr(&s);
    match normalized.to_ascii_lowercase().as_str() {
        "true" | "false" | "null" => normalized.to_ascii_lowercase(),
        _ => normalized,
    }
}

/// Whether two optional defaults are the same after normalization.
pub fn defaults_equivalent(live: Option<&str>, desired: Option<&str>) -> bool {
    match (live, desired) {
        (None, None) => true,
        (Some(a), Some(b)) => normalize_default(a) == normalize_default(b),
        _ => false,
    }
}

pub(crate) fn strip_cast(expr: &str) -> &str {
    let mut in_quote = false;
    let bytes = expr.as_bytes();
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b':' if !in_quote && bytes.get(i + 1) == Some(&b':') => return &expr[..i],
            _ => {}
        }
    }
    expr
}

/// `(x)` -> `x`, but only when the opening parenthesis closes at the very end.
pub(crate) fn strip_outer_parens(expr: &str) -> Option<&str> {
    let inner = expr.strip_prefix('(')?.strip_suffix(')')?;
    let mut depth = 0i32;
    let mut in_quote = false;
    for c in inner.chars() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}
