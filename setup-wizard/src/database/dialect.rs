// Supported database dialects and their fixed properties.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbDialect {
    /// File-backed SQLite database shipped with the server.
    #[default]
    Embedded,
    Mysql,
    Postgresql,
    Db2,
    Mssql,
    Oracle,
}

impl DbDialect {
    pub const ALL: [DbDialect; 6] = [
        DbDialect::Embedded,
        DbDialect::Mysql,
        DbDialect::Postgresql,
        DbDialect::Db2,
        DbDialect::Mssql,
        DbDialect::Oracle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DbDialect::Embedded => "embedded",
            DbDialect::Mysql => "mysql",
            DbDialect::Postgresql => "postgresql",
            DbDialect::Db2 => "db2",
            DbDialect::Mssql => "mssql",
            DbDialect::Oracle => "oracle",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DbDialect::Embedded => "Embedded (SQLite)",
            DbDialect::Mysql => "MySQL / MariaDB",
            DbDialect::Postgresql => "PostgreSQL",
            DbDialect::Db2 => "IBM DB2",
            DbDialect::Mssql => "Microsoft SQL Server",
            DbDialect::Oracle => "Oracle",
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, DbDialect::Embedded)
    }

    /// `0` for the embedded dialect, which has no network endpoint.
    pub fn default_port(&self) -> u16 {
        match self {
            DbDialect::Embedded => 0,
            DbDialect::Mysql => 3306,
            DbDialect::Postgresql => 5432,
            DbDialect::Db2 => 50000,
            DbDialect::Mssql => 1433,
            DbDialect::Oracle => 1521,
        }
    }

    /// Statement that must execute for a connection to count as usable.
    pub fn liveness_query(&self) -> &'static str {
        match self {
            DbDialect::Db2 => "select count(*) from systables",
            DbDialect::Oracle => "SELECT 1 FROM DUAL",
            _ => "SELECT 1",
        }
    }

    /// Whether this build can open connections for the dialect.
    pub fn has_native_driver(&self) -> bool {
        !matches!(self, DbDialect::Db2 | DbDialect::Oracle)
    }

    /// Operator hint appended to probe failures.
    pub fn setup_hint(&self) -> &'static str {
        match self {
            DbDialect::Embedded => {
                "The embedded database needs no server. Make sure the data directory is writable."
            }
            DbDialect::Mysql => {
                "Create the database with utf8mb4 encoding and grant the user full rights on it."
            }
            DbDialect::Postgresql => {
                "Create the user and a UTF8 database owned by it, then allow the host in pg_hba.conf."
            }
            DbDialect::Db2 => {
                "DB2 requires an external driver. Install it and point the server at it before setup."
            }
            DbDialect::Mssql => {
                "Enable TCP/IP in SQL Server Configuration Manager and use SQL authentication."
            }
            DbDialect::Oracle => {
                "Oracle requires an external driver. Install it and point the server at it before setup."
            }
        }
    }
}

impl fmt::Display for DbDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" | "sqlite" | "derby" | "h2" => Ok(DbDialect::Embedded),
            "mysql" | "mariadb" => Ok(DbDialect::Mysql),
            "postgresql" | "postgres" | "pg" => Ok(DbDialect::Postgresql),
            "db2" => Ok(DbDialect::Db2),
            "mssql" | "sqlserver" | "sql_server" => Ok(DbDialect::Mssql),
            "oracle" => Ok(DbDialect::Oracle),
            other => Err(format!("Unsupported database type: '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for d in DbDialect::ALL {
            assert_eq!(d.as_str().parse::<DbDialect>().unwrap(), d);
        }
    }

    #[test]
    fn aliases_are_accepted() {
        assert_eq!("Postgres".parse::<DbDialect>().unwrap(), DbDialect::Postgresql);
        assert_eq!("sqlserver".parse::<DbDialect>().unwrap(), DbDialect::Mssql);
        assert_eq!("sqlite".parse::<DbDialect>().unwrap(), DbDialect::Embedded);
    }

    #[test]
    fn unknown_dialect_error_names_it() {
        let err = "cassandra".parse::<DbDialect>().unwrap_err();
        assert!(err.contains("cassandra"));
    }

    #[test]
    fn liveness_queries() {
        assert_eq!(DbDialect::Db2.liveness_query(), "select count(*) from systables");
        assert_eq!(DbDialect::Oracle.liveness_query(), "SELECT 1 FROM DUAL");
        assert_eq!(DbDialect::Postgresql.liveness_query(), "SELECT 1");
    }

    #[test]
    fn only_embedded_has_no_port() {
        for d in DbDialect::ALL {
            assert_eq!(d.default_port() == 0, d.is_embedded());
        }
    }
}
