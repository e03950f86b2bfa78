//! SQLite table backend.
//!
//! Materializes a database as a directory tree: one directory per table,
//! one file per row. Row files are named by the first column and contain
//! the row's values joined with tabs. The result is a snapshot taken at
//! load time, like every other bulk-loaded backend.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

use crate::backends::memory::MemoryNode;
use crate::node::Node;
use crate::VfsResult;

/// Reader for SQLite databases.
pub struct SqliteProvider;

impl SqliteProvider {
    /// Load `path` into a directory node named after the database file.
    pub fn load(path: &Path) -> VfsResult<Node> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let root = MemoryNode::dir(name);

        let tables: Vec<String> = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        tracing::debug!(?tables, "loading database tables");

        for table in tables {
            root.add(load_table(&conn, &table)?);
        }
        Ok(root)
    }
}

fn load_table(conn: &Connection, table: &str) -> VfsResult<Node> {
    let dir = MemoryNode::dir(table);
    let quoted = table.replace('"', "\"\"");
    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{quoted}\""))?;
    let columns = stmt.column_count();

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for i in 0..columns {
            values.push(value_to_string(row.get_ref(i)?));
        }
        let name = values.first().cloned().unwrap_or_default();
        dir.add(MemoryNode::file(name, values.join("\t")));
    }
    Ok(dir)
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (nick TEXT, shell TEXT);
             INSERT INTO users VALUES ('amy', '/bin/sh');
             INSERT INTO users VALUES ('bob', '/bin/bash');
             CREATE TABLE empty (id INTEGER);",
        )
        .unwrap();
    }

    #[test]
    fn tables_become_directories_rows_become_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        fixture(&path);

        let root = SqliteProvider::load(&path).unwrap();
        assert_eq!(root.name(), "app.db");

        let mut tables: Vec<_> = root.list().iter().map(|n| n.name().to_owned()).collect();
        tables.sort();
        assert_eq!(tables, ["empty", "users"]);

        let amy = root.query("users/amy").unwrap();
        assert!(!amy.is_dir());
        assert_eq!(amy.len(), "amy\t/bin/sh".len() as u64);
        assert_eq!(root.query("empty").unwrap().list().len(), 0);
    }
}
