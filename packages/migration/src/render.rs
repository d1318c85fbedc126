//! Render DDL migration text from a TOML schema document.
//!
//! Table layouts live in data files; this module is the generic renderer
//! that turns them into `CREATE TABLE` / `CREATE INDEX` statements.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::MigrationError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    pub title: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub name: String,
    pub comment: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    /// SQL expression, rendered verbatim.
    pub default: Option<String>,
    /// `table(column)`
    pub references: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

fn default_nullable() -> bool {
    true
}

impl SchemaDocument {
    pub fn parse(text: &str) -> Result<Self, MigrationError> {
        toml::from_str(text).map_err(|e| MigrationError::schema(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let text = fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))?;
        Self::parse(&text)
    }
}

pub fn render(doc: &SchemaDocument) -> Result<String, MigrationError> {
    if doc.tables.is_empty() {
        return Err(MigrationError::schema("document declares no tables"));
    }

    let mut seen_tables = HashSet::new();
    let mut out = String::new();

    if let Some(title) = &doc.title {
        for line in comment_lines(title) {
            let _ = writeln!(out, "-- {line}");
        }
        out.push('\n');
    }

    for (i, table) in doc.tables.iter().enumerate() {
        if !seen_tables.insert(table.name.as_str()) {
            return Err(MigrationError::schema(format!(
                "table '{}' declared twice",
                table.name
            )));
        }
        if i > 0 {
            out.push('\n');
        }
        render_table(&mut out, table)?;
    }

    Ok(out)
}

fn render_table(out: &mut String, table: &TableSpec) -> Result<(), MigrationError> {
    check_ident(&table.name, "table")?;
    if table.columns.is_empty() {
        return Err(MigrationError::schema(format!(
            "table '{}' has no columns",
            table.name
        )));
    }

    let mut names = HashSet::new();
    for col in &table.columns {
        check_ident(&col.name, "column")?;
        if !names.insert(col.name.as_str()) {
            return Err(MigrationError::schema(format!(
                "column '{}' declared twice in table '{}'",
                col.name, table.name
            )));
        }
    }

    let pk: Vec<&str> = table
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();

    let mut lines = Vec::with_capacity(table.columns.len() + 1);
    for col in &table.columns {
        lines.push(render_column(col, pk.len() == 1)?);
    }
    if pk.len() > 1 {
        lines.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }

    if let Some(comment) = &table.comment {
        for (i, line) in comment_lines(comment).enumerate() {
            if i == 0 {
                let _ = writeln!(out, "-- {}: {}", table.name, line);
            } else {
                let _ = writeln!(out, "-- {line}");
            }
        }
    }
    let _ = writeln!(out, "CREATE TABLE IF NOT EXISTS {} (", table.name);
    let _ = writeln!(out, "    {}", lines.join(",\n    "));
    out.push_str(");\n");

    for index in &table.indexes {
        if index.columns.is_empty() {
            return Err(MigrationError::schema(format!(
                "index on table '{}' lists no columns",
                table.name
            )));
        }
        for col in &index.columns {
            if !names.contains(col.as_str()) {
                return Err(MigrationError::schema(format!(
                    "index on table '{}' references unknown column '{}'",
                    table.name, col
                )));
            }
        }

        let name = match &index.name {
            Some(name) => {
                check_ident(name, "index")?;
                name.clone()
            }
            None => format!(
                "{}_{}_{}",
                table.name,
                index.columns.join("_"),
                if index.unique { "key" } else { "idx" }
            ),
        };

        let _ = writeln!(
            out,
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
            if index.unique { "UNIQUE " } else { "" },
            name,
            table.name,
            index.columns.join(", ")
        );
    }

    Ok(())
}

fn render_column(col: &ColumnSpec, inline_pk: bool) -> Result<String, MigrationError> {
    let sql_type = col.sql_type.trim();
    if sql_type.is_empty() || !is_inline_fragment(sql_type) {
        return Err(MigrationError::schema(format!(
            "column '{}' has an invalid type '{}'",
            col.name, col.sql_type
        )));
    }

    let mut def = format!("{} {}", col.name, sql_type);
    if !col.nullable || col.primary_key {
        def.push_str(" NOT NULL");
    }
    if col.primary_key && inline_pk {
        def.push_str(" PRIMARY KEY");
    }
    if col.unique {
        def.push_str(" UNIQUE");
    }
    if let Some(default) = &col.default {
        if default.trim().is_empty() || !is_inline_fragment(default) {
            return Err(MigrationError::schema(format!(
                "column '{}' default must be a single expression",
                col.name
            )));
        }
        let _ = write!(def, " DEFAULT {}", default.trim());
    }
    if let Some(target) = &col.references {
        let (table, column) = parse_reference(target)?;
        let _ = write!(def, " REFERENCES {table}({column})");
    }

    Ok(def)
}

/// Every physical line of free text, so each one can carry its own `--`.
fn comment_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// Type and default text is spliced into a single DDL line: no statement
/// separators, line breaks or comment markers.
fn is_inline_fragment(text: &str) -> bool {
    !text.contains([';', '\n', '\r']) && !text.contains("--") && !text.contains("/*")
}

fn parse_reference(target: &str) -> Result<(&str, &str), MigrationError> {
    let bad = || MigrationError::schema(format!("reference '{target}' must look like table(column)"));

    let (table, rest) = target.trim().split_once('(').ok_or_else(bad)?;
    let column = rest.strip_suffix(')').ok_or_else(bad)?;
    let (table, column) = (table.trim(), column.trim());

    check_ident(table, "referenced table")?;
    check_ident(column, "referenced column")?;
    Ok((table, column))
}

fn check_ident(ident: &str, what: &str) -> Result<(), MigrationError> {
    let mut chars = ident.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(MigrationError::schema(format!(
            "invalid {what} name '{ident}'"
        )))
    }
}
