//! Table layout of the ingestion store.

/// SQL dialect of the configured database, derived from its URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?;
        match scheme {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    fn id_column(&self) -> &'static str {
        match self {
            Self::Postgres => "id SERIAL PRIMARY KEY",
            Self::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|i| match self {
                Self::Postgres => format!("${i}"),
                Self::Sqlite => "?".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Statements for one table.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: &'static str,
    pub create: String,
    pub insert: String,
}

impl Table {
    fn new(backend: Backend, name: &'static str, columns: &[&str]) -> Self {
        let definitions = columns
            .iter()
            .map(|column| format!("{column} TEXT"))
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            name,
            create: format!(
                "CREATE TABLE IF NOT EXISTS {name} ({}, {definitions})",
                backend.id_column()
            ),
            insert: format!(
                "INSERT INTO {name} ({}) VALUES ({})",
                columns.join(", "),
                backend.placeholders(columns.len())
            ),
        }
    }
}

/// Schema of the store, built once per replica and handed to the store.
#[derive(Debug, Clone)]
pub struct Schema {
    pub backend: Backend,
    pub raw_messages: Table,
    pub gps_records: Table,
}

impl Schema {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            raw_messages: Table::new(backend, "raw_messages", &["timestamp", "raw_hex"]),
            gps_records: Table::new(
                backend,
                "gps_records",
                &["client_name", "latitude", "longitude"],
            ),
        }
    }

    pub fn tables(&self) -> [&Table; 2] {
        [&self.raw_messages, &self.gps_records]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(
            Backend::from_url("postgres://user@localhost/gps"),
            Some(Backend::Postgres)
        );
        assert_eq!(
            Backend::from_url("postgresql://localhost"),
            Some(Backend::Postgres)
        );
        assert_eq!(
            Backend::from_url("sqlite://data.db?mode=rwc"),
            Some(Backend::Sqlite)
        );
        assert_eq!(Backend::from_url("sqlite::memory:"), Some(Backend::Sqlite));
        assert_eq!(Backend::from_url("mysql://localhost"), None);
    }

    #[test]
    fn test_postgres_statements() {
        let schema = Schema::new(Backend::Postgres);
        assert_eq!(
            schema.gps_records.insert,
            "INSERT INTO gps_records (client_name, latitude, longitude) VALUES ($1, $2, $3)"
        );
        assert_eq!(
            schema.raw_messages.create,
            "CREATE TABLE IF NOT EXISTS raw_messages (id SERIAL PRIMARY KEY, timestamp TEXT, raw_hex TEXT)"
        );
    }

    #[test]
    fn test_sqlite_statements() {
        let schema = Schema::new(Backend::Sqlite);
        assert_eq!(
            schema.raw_messages.insert,
            "INSERT INTO raw_messages (timestamp, raw_hex) VALUES (?, ?)"
        );
        assert!(schema.gps_records.create.contains("AUTOINCREMENT"));
    }
}
