use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Allow unused_mut because the variable is only mutated when optional
            // field assignments are passed to the macro (e.g., `non_null = true`)
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                non_null: false,
                is_unique: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Blob => "BLOB",
        }
    }

    fn parse(s: &str) -> Option<&'static SqlType> {
        match s {
            "TEXT" => Some(&SqlType::Text),
            "INTEGER" => Some(&SqlType::Integer),
            "BLOB" => Some(&SqlType::Blob),
            _ => None,
        }
    }
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static SqlType,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<&'static str>,
}

impl Column {
    fn definition(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type.as_sql());
        if self.non_null {
            sql.push_str(" NOT NULL");
        }
        if self.is_unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default_value) = self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default_value));
        }
        sql
    }

    /// `ALTER TABLE ADD COLUMN` can't add a NOT NULL column without a default,
    /// nor a UNIQUE one.
    fn is_addable(&self) -> bool {
        !self.is_unique && (!self.non_null || self.default_value.is_some())
    }
}

pub struct Index {
    pub name: &'static str,
    pub columns: &'static str,
    pub unique: bool,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [Index],
}

impl Table {
    fn exists(&self, conn: &Connection) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![self.name],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
    }

    fn existing_columns(&self, conn: &Connection) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt
            .query_map(params![self.name], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Brings the table up to this definition without touching existing data.
    ///
    /// Creates the table when absent, otherwise appends whichever columns are
    /// missing. Indices are created with `IF NOT EXISTS`. Running it any
    /// number of times against the same database is a no-op after the first.
    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        if !self.exists(conn)? {
            let columns = self
                .columns
                .iter()
                .map(Column::definition)
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute(&format!("CREATE TABLE {} ({})", self.name, columns), [])?;
        } else {
            let existing = self.existing_columns(conn)?;
            for column in self.columns {
                if existing.iter().any(|name| name == column.name) {
                    continue;
                }
                if !column.is_addable() {
                    bail!(
                        "Table {} is missing column {} which cannot be added in place",
                        self.name,
                        column.name
                    );
                }
                conn.execute(
                    &format!("ALTER TABLE {} ADD COLUMN {}", self.name, column.definition()),
                    [],
                )?;
            }
        }

        for index in self.indices {
            conn.execute(
                &format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    index.name,
                    self.name,
                    index.columns
                ),
                [],
            )?;
        }
        Ok(())
    }

    /// Checks a live table against this definition.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        struct ActualColumn {
            name: String,
            sql_type: Option<&'static SqlType>,
            non_null: bool,
        }

        let mut stmt = conn.prepare("SELECT name, type, \"notnull\" FROM pragma_table_info(?1)")?;
        let actual_columns = stmt
            .query_map(params![self.name], |row| {
                Ok(ActualColumn {
                    name: row.get(0)?,
                    sql_type: SqlType::parse(&row.get::<_, String>(1)?),
                    non_null: row.get::<_, i32>(2)? == 1,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if actual_columns.is_empty() {
            bail!("Table {} does not exist", self.name);
        }

        for expected in self.columns {
            let Some(actual) = actual_columns.iter().find(|c| c.name == expected.name) else {
                bail!("Table {} is missing column {}", self.name, expected.name);
            };
            if actual.sql_type != Some(expected.sql_type) {
                bail!(
                    "Table {} Column {} type mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} Column {} non-null mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.non_null,
                    actual.non_null
                );
            }
        }

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}",
                self.name,
                actual_columns.len(),
                self.columns.len()
            );
        }

        for index in self.indices {
            let unique: Option<i32> = conn
                .query_row(
                    "SELECT \"unique\" FROM pragma_index_list(?1) WHERE name = ?2",
                    params![self.name, index.name],
                    |row| row.get(0),
                )
                .optional()?;
            match unique {
                None => bail!("Table {} is missing index '{}'", self.name, index.name),
                Some(u) if (u == 1) != index.unique => bail!(
                    "Table {} index '{}' unique mismatch: expected {}",
                    self.name,
                    index.name,
                    index.unique
                ),
                Some(_) => {}
            }
        }

        for column in self.columns.iter().filter(|c| c.is_unique) {
            if !self.has_single_column_unique_index(conn, column.name)? {
                bail!(
                    "Table {} is missing unique constraint on column {}",
                    self.name,
                    column.name
                );
            }
        }
        Ok(())
    }

    fn has_single_column_unique_index(&self, conn: &Connection, column: &str) -> Result<bool> {
        let mut stmt = conn.prepare(
            "SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1",
        )?;
        let unique_indices = stmt
            .query_map(params![self.name], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for index_name in unique_indices {
            let mut idx_stmt = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
            let cols = idx_stmt
                .query_map(params![index_name], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            if cols == [column] {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Ensures every table of a schema, in order.
pub fn ensure_all(conn: &Connection, tables: &[Table]) -> Result<()> {
    for table in tables {
        table.ensure(conn)?;
    }
    Ok(())
}
