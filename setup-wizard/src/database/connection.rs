// Database reachability probing.
//
// DbConnector is the seam between the wizard and real drivers so failure
// paths can be tested without a database server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::TokioAsyncWriteCompatExt;

use crate::database::descriptor::ConnectionDescriptor;
use crate::database::dialect::DbDialect;
use crate::utils::runtime::run_blocking;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Error returned by connection attempts.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone, Error)]
#[error("{user_message}")]
pub struct ConnectError {
    /// Safe to show to the operator.
    pub user_message: String,
    /// For logs only. Connection strings in here are masked.
    pub internal_details: String,
}

/// Opens a connection for a descriptor and runs the dialect's liveness query.
#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<(), ConnectError>;

    fn timeout_duration(&self) -> Duration {
        DEFAULT_PROBE_TIMEOUT
    }
}

/// Production connector backed by sqlx and tiberius.
pub struct RealDbConnector {
    timeout: Duration,
}

impl RealDbConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for RealDbConnector {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl DbConnector for RealDbConnector {
    async fn connect(&self, d: &ConnectionDescriptor) -> Result<(), ConnectError> {
        if !d.dialect.has_native_driver() {
            return Err(ConnectError {
                user_message: format!(
                    "No driver available for {}. {}",
                    d.dialect.display_name(),
                    d.dialect.setup_hint()
                ),
                internal_details: format!("dialect '{}' has no bundled driver", d.dialect),
            });
        }

        let query = d.dialect.liveness_query();
        let result = match d.dialect {
            DbDialect::Embedded => timeout(self.timeout, check_sqlite(d, query)).await,
            DbDialect::Postgresql => timeout(self.timeout, check_postgres(d, query)).await,
            DbDialect::Mysql => timeout(self.timeout, check_mysql(d, query)).await,
            DbDialect::Mssql => timeout(self.timeout, check_sql_server(d, query)).await,
            DbDialect::Db2 | DbDialect::Oracle => Ok(Err(anyhow::anyhow!(
                "no driver for {}",
                d.dialect
            ))),
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectError {
                user_message: format!(
                    "Unable to connect to {}: {}. {}",
                    d.dialect.display_name(),
                    root_cause_line(&e),
                    d.dialect.setup_hint()
                ),
                internal_details: format!("{} ({:#})", d.masked_url(), e),
            }),
            Err(_) => Err(ConnectError {
                user_message: format!(
                    "Connection to {} timed out after {}s. Check host, port and firewall.",
                    d.dialect.display_name(),
                    self.timeout.as_secs_f32()
                ),
                internal_details: format!("{} timed out", d.masked_url()),
            }),
        }
    }

    fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}

fn root_cause_line(e: &anyhow::Error) -> String {
    e.root_cause()
        .to_string()
        .replace(['\r', '\n'], " ")
        .trim()
        .to_string()
}

/// Value of `key` in a `k=v&k2=v2` option string.
fn option_value(options: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(options.as_bytes())
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.into_owned())
}

/// Closest ancestor of `path` that exists; the working directory for a bare file name.
fn existing_parent(path: &Path) -> Option<PathBuf> {
    path.ancestors().skip(1).find_map(|a| {
        if a.as_os_str().is_empty() {
            Some(PathBuf::from("."))
        } else if a.exists() {
            Some(a.to_path_buf())
        } else {
            None
        }
    })
}

/// Opens an existing file read-only. A missing file with `mode=rwc` only has
/// its future location checked, so nothing is created on disk.
async fn check_sqlite(d: &ConnectionDescriptor, query: &str) -> Result<()> {
    let path = Path::new(&d.database);
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        let create = option_value(&d.options, "mode").map_or(true, |m| m == "rwc");
        if !create {
            anyhow::bail!("Database file {} does not exist", path.display());
        }
        let parent = existing_parent(path)
            .with_context(|| format!("No existing parent directory for {}", path.display()))?;
        let meta = tokio::fs::metadata(&parent)
            .await
            .with_context(|| format!("Failed to inspect {}", parent.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("{} is not a directory", parent.display());
        }
        if meta.permissions().readonly() {
            anyhow::bail!("{} is not writable", parent.display());
        }
        info!(
            "[PHASE: wizard] [STEP: database] {} does not exist yet; it will be created during installation",
            path.display()
        );
        return Ok(());
    }

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .read_only(true);
    let mut conn = SqliteConnection::connect_with(&opts)
        .await
        .context("Failed to open embedded database")?;
    sqlx::query(query)
        .execute(&mut conn)
        .await
        .context("Liveness query failed")?;
    conn.close().await.ok();
    Ok(())
}

async fn check_postgres(d: &ConnectionDescriptor, query: &str) -> Result<()> {
    let mut opts = PgConnectOptions::new()
        .host(&d.host)
        .port(d.port)
        .database(&d.database)
        .username(&d.login)
        .password(&d.password);
    if let Some(mode) = option_value(&d.options, "sslmode") {
        let mode: PgSslMode = mode
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown sslmode '{}'", mode))?;
        opts = opts.ssl_mode(mode);
    }
    let mut conn = PgConnection::connect_with(&opts)
        .await
        .context("Failed to connect to PostgreSQL")?;
    sqlx::query(query)
        .execute(&mut conn)
        .await
        .context("Liveness query failed")?;
    conn.close().await.ok();
    Ok(())
}

async fn check_mysql(d: &ConnectionDescriptor, query: &str) -> Result<()> {
    let opts = MySqlConnectOptions::new()
        .host(&d.host)
        .port(d.port)
        .database(&d.database)
        .username(&d.login)
        .password(&d.password);
    let mut conn = MySqlConnection::connect_with(&opts)
        .await
        .context("Failed to connect to MySQL")?;
    sqlx::query(query)
        .execute(&mut conn)
        .await
        .context("Liveness query failed")?;
    conn.close().await.ok();
    Ok(())
}

async fn check_sql_server(d: &ConnectionDescriptor, query: &str) -> Result<()> {
    let mut config = Config::new();
    config.host(&d.host);
    config.port(d.port);
    config.database(&d.database);
    config.authentication(AuthMethod::sql_server(&d.login, &d.password));
    let trust = d.options.split(';').any(|kv| {
        kv.split_once('=').is_some_and(|(k, v)| {
            k.trim().eq_ignore_ascii_case("TrustServerCertificate")
                && v.trim().eq_ignore_ascii_case("true")
        })
    });
    if trust {
        config.trust_cert();
    }

    let tcp = TcpStream::connect(config.get_addr())
        .await
        .context("TCP connection to SQL Server failed")?;
    tcp.set_nodelay(true)?;

    let mut client = Client::connect(config, tcp.compat_write())
        .await
        .context("SQL Server login failed")?;
    client
        .simple_query(query)
        .await
        .context("Liveness query failed")?
        .into_results()
        .await
        .context("Liveness query failed")?;
    Ok(())
}

/// Result of one reachability check, already rendered for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub message: String,
}

impl ProbeOutcome {
    fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Tests whether a descriptor is reachable. Never fails: every fault is
/// turned into a failed outcome with a readable cause.
#[derive(Clone)]
pub struct ConnectionProbe {
    connector: Arc<dyn DbConnector>,
}

impl ConnectionProbe {
    pub fn new(connector: Arc<dyn DbConnector>) -> Self {
        Self { connector }
    }

    pub fn real(timeout: Duration) -> Self {
        Self::new(Arc::new(RealDbConnector::new(timeout)))
    }

    pub async fn probe_async(&self, descriptor: &ConnectionDescriptor) -> ProbeOutcome {
        let budget = self.connector.timeout_duration();
        info!(
            "[PHASE: wizard] [STEP: database] Probing {} ({})",
            descriptor.dialect,
            descriptor.masked_url()
        );

        match timeout(budget, self.connector.connect(descriptor)).await {
            Ok(Ok(())) => {
                info!("[PHASE: wizard] [STEP: database] Probe succeeded");
                ProbeOutcome::success(format!(
                    "Connected to {} successfully",
                    descriptor.dialect.display_name()
                ))
            }
            Ok(Err(e)) => {
                warn!(
                    "[PHASE: wizard] [STEP: database] Probe failed: {}",
                    e.internal_details
                );
                ProbeOutcome::failure(e.user_message)
            }
            Err(_) => {
                warn!(
                    "[PHASE: wizard] [STEP: database] Probe timed out after {:?}",
                    budget
                );
                ProbeOutcome::failure(format!(
                    "Connection to {} timed out. Check host, port and firewall.",
                    descriptor.dialect.display_name()
                ))
            }
        }
    }

    /// Blocking form for synchronous callers.
    pub fn probe(&self, descriptor: &ConnectionDescriptor) -> ProbeOutcome {
        match run_blocking(self.probe_async(descriptor)) {
            Ok(outcome) => outcome,
            Err(e) => ProbeOutcome::failure(format!("Connection check could not run: {}", e)),
        }
    }
}
