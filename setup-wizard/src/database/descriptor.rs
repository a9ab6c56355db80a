// Connection descriptors and the per-dialect connection string grammars.
//
// The structured fields are authoritative. The connection string is always
// re-derived from them; parsing only feeds structured fields back in.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

use crate::database::dialect::DbDialect;
use crate::utils::logging::mask_connection_string;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("'{url}' is not a {dialect} connection string (expected {expected})")]
    WrongGrammar {
        dialect: DbDialect,
        url: String,
        expected: &'static str,
    },
    #[error("{dialect} connection string has no host")]
    MissingHost { dialect: DbDialect },
    #[error("{dialect} connection string has no database name")]
    MissingDatabase { dialect: DbDialect },
    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// Address fields recovered from a connection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParts {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub options: String,
    pub login: Option<String>,
    pub password: Option<String>,
}

/// A parse/format pair for one connection string grammar.
pub trait DialectCodec: Send + Sync {
    fn format(&self, d: &ConnectionDescriptor) -> String;
    fn parse(&self, url: &str) -> Result<UrlParts, DescriptorError>;
}

pub fn codec_for(dialect: DbDialect) -> &'static dyn DialectCodec {
    static EMBEDDED: SqliteCodec = SqliteCodec;
    static MYSQL: UriCodec = UriCodec {
        dialect: DbDialect::Mysql,
        schemes: &["mysql", "mariadb"],
    };
    static POSTGRESQL: UriCodec = UriCodec {
        dialect: DbDialect::Postgresql,
        schemes: &["postgresql", "postgres"],
    };
    static DB2: UriCodec = UriCodec {
        dialect: DbDialect::Db2,
        schemes: &["db2"],
    };
    static MSSQL: AdoCodec = AdoCodec;
    static ORACLE: OracleThinCodec = OracleThinCodec;

    match dialect {
        DbDialect::Embedded => &EMBEDDED,
        DbDialect::Mysql => &MYSQL,
        DbDialect::Postgresql => &POSTGRESQL,
        DbDialect::Db2 => &DB2,
        DbDialect::Mssql => &MSSQL,
        DbDialect::Oracle => &ORACLE,
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionDescriptor {
    pub dialect: DbDialect,
    pub host: String,
    pub port: u16,
    /// Database name, service id, or the file path for the embedded dialect.
    pub database: String,
    pub login: String,
    pub password: String,
    /// Extra driver options in the dialect's own syntax, without the leading `?` or `;`.
    pub options: String,
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        Self::defaults_for(DbDialect::Embedded)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("login", &self.login)
            .field("password", &"***")
            .field("options", &self.options)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Built-in defaults used when no stored properties exist for a dialect.
    pub fn defaults_for(dialect: DbDialect) -> Self {
        let (host, database, options) = match dialect {
            DbDialect::Embedded => ("", "data/meetings.db", "mode=rwc"),
            DbDialect::Mssql => ("localhost", "meetings", "TrustServerCertificate=true"),
            DbDialect::Oracle => ("localhost", "XE", ""),
            _ => ("localhost", "meetings", ""),
        };
        Self {
            dialect,
            host: host.to_string(),
            port: dialect.default_port(),
            database: database.to_string(),
            login: String::new(),
            password: String::new(),
            options: options.to_string(),
        }
    }

    /// Derived connection string. Never contains credentials.
    pub fn connection_url(&self) -> String {
        codec_for(self.dialect).format(self)
    }

    /// Build a descriptor for `dialect` from a connection string.
    pub fn from_url(dialect: DbDialect, url: &str) -> Result<Self, DescriptorError> {
        let mut d = Self {
            dialect,
            host: String::new(),
            port: 0,
            database: String::new(),
            login: String::new(),
            password: String::new(),
            options: String::new(),
        };
        d.apply_url(url)?;
        Ok(d)
    }

    /// Replace the address fields with those parsed from `url`.
    ///
    /// Credentials are only replaced when the string carries them. On error
    /// the descriptor is left untouched.
    pub fn apply_url(&mut self, url: &str) -> Result<(), DescriptorError> {
        let parts = codec_for(self.dialect).parse(url)?;
        self.host = parts.host;
        self.port = parts.port;
        self.database = parts.database;
        self.options = parts.options;
        if let Some(login) = parts.login {
            self.login = login;
        }
        if let Some(password) = parts.password {
            self.password = password;
        }
        Ok(())
    }

    /// Connection string safe for logs.
    pub fn masked_url(&self) -> String {
        mask_connection_string(&self.connection_url())
    }
}

// -----------------------------------------------------------------------------
// URI grammar: scheme://host:port/db[?opts]
// -----------------------------------------------------------------------------

pub struct UriCodec {
    dialect: DbDialect,
    /// First entry is the canonical scheme used when formatting.
    schemes: &'static [&'static str],
}

impl DialectCodec for UriCodec {
    fn format(&self, d: &ConnectionDescriptor) -> String {
        let mut s = format!(
            "{}://{}:{}/{}",
            self.schemes[0],
            bracket_ipv6(&d.host),
            d.port,
            utf8_percent_encode(&d.database, PATH_SEGMENT)
        );
        if !d.options.is_empty() {
            s.push('?');
            s.extend(utf8_percent_encode(&d.options, QUERY));
        }
        s
    }

    fn parse(&self, raw: &str) -> Result<UrlParts, DescriptorError> {
        let wrong = || DescriptorError::WrongGrammar {
            dialect: self.dialect,
            url: mask_connection_string(raw),
            expected: "scheme://host:port/database",
        };

        let parsed = url::Url::parse(raw.trim()).map_err(|_| wrong())?;
        if !self
            .schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(parsed.scheme()))
        {
            return Err(wrong());
        }
        // A fragment can only come from an unescaped '#'.
        if parsed.fragment().is_some() {
            return Err(wrong());
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(DescriptorError::MissingHost {
                dialect: self.dialect,
            })?;
        let host = unbracket(host).to_string();
        let port = parsed.port().unwrap_or_else(|| self.dialect.default_port());
        let database = decode(parsed.path().trim_start_matches('/')).into_owned();
        if database.is_empty() {
            return Err(DescriptorError::MissingDatabase {
                dialect: self.dialect,
            });
        }

        let login = Some(parsed.username())
            .filter(|u| !u.is_empty())
            .map(|u| decode(u).into_owned());
        let password = parsed.password().map(|p| decode(p).into_owned());

        Ok(UrlParts {
            host,
            port,
            database,
            options: decode(parsed.query().unwrap_or_default()).into_owned(),
            login,
            password,
        })
    }
}

// -----------------------------------------------------------------------------
// ADO key/value grammar: Server=tcp:host,port;Database=db[;opts]
// -----------------------------------------------------------------------------

pub struct AdoCodec;

impl DialectCodec for AdoCodec {
    fn format(&self, d: &ConnectionDescriptor) -> String {
        let mut s = format!("Server=tcp:{},{};Database={}", d.host, d.port, d.database);
        if !d.options.is_empty() {
            s.push(';');
            s.push_str(&d.options);
        }
        s
    }

    fn parse(&self, raw: &str) -> Result<UrlParts, DescriptorError> {
        let dialect = DbDialect::Mssql;
        let mut parts = UrlParts::default();
        let mut server: Option<String> = None;
        let mut extra: Vec<&str> = Vec::new();

        for part in raw.split(';') {
            let p = part.trim();
            if p.is_empty() {
                continue;
            }
            let Some((k, v)) = p.split_once('=') else {
                return Err(DescriptorError::WrongGrammar {
                    dialect,
                    url: mask_connection_string(raw),
                    expected: "Key=Value pairs separated by ';'",
                });
            };
            let key = k.trim().to_ascii_lowercase().replace([' ', '_'], "");
            let val = v.trim();
            match key.as_str() {
                "server" | "datasource" | "address" | "addr" => server = Some(val.to_string()),
                "database" | "initialcatalog" => parts.database = val.to_string(),
                "userid" | "uid" | "user" => parts.login = Some(val.to_string()),
                "password" | "pwd" => parts.password = Some(val.to_string()),
                _ => extra.push(p),
            }
        }

        let server = server.ok_or(DescriptorError::MissingHost { dialect })?;
        let server = strip_prefix_ignore_case(&server, "tcp:").unwrap_or(server.as_str());
        let (host, port) = match server.split_once(',') {
            Some((h, p)) => (h.trim(), parse_port(p)?),
            None => (server.trim(), dialect.default_port()),
        };
        if host.is_empty() {
            return Err(DescriptorError::MissingHost { dialect });
        }
        if parts.database.is_empty() {
            return Err(DescriptorError::MissingDatabase { dialect });
        }

        parts.host = host.to_string();
        parts.port = port;
        parts.options = extra.join(";");
        Ok(parts)
    }
}

// -----------------------------------------------------------------------------
// Oracle thin grammar: oracle:thin:[user/pass]@host:port:sid
// -----------------------------------------------------------------------------

pub struct OracleThinCodec;

const ORACLE_PREFIX: &str = "oracle:thin:";

impl DialectCodec for OracleThinCodec {
    fn format(&self, d: &ConnectionDescriptor) -> String {
        format!(
            "{}@{}:{}:{}",
            ORACLE_PREFIX,
            bracket_ipv6(&d.host),
            d.port,
            d.database
        )
    }

    fn parse(&self, raw: &str) -> Result<UrlParts, DescriptorError> {
        let dialect = DbDialect::Oracle;
        let wrong = || DescriptorError::WrongGrammar {
            dialect,
            url: mask_connection_string(raw),
            expected: "oracle:thin:@host:port:sid",
        };

        let rest = strip_prefix_ignore_case(raw.trim(), ORACLE_PREFIX).ok_or_else(wrong)?;
        let (creds, address) = rest.split_once('@').ok_or_else(wrong)?;

        let mut parts = UrlParts::default();
        if !creds.is_empty() {
            let (user, pass) = creds.split_once('/').unwrap_or((creds, ""));
            parts.login = Some(user.to_string());
            parts.password = Some(pass.to_string());
        }

        // Service-name form: //host:port/service
        let (host, port, database) = if let Some(svc) = address.strip_prefix("//") {
            let (hp, service) = svc.split_once('/').ok_or_else(wrong)?;
            let (h, p) = split_host(hp).ok_or_else(wrong)?;
            (h, p.unwrap_or(""), service)
        } else {
            let (h, rest) = split_host(address).ok_or_else(wrong)?;
            let (p, sid) = rest.and_then(|r| r.split_once(':')).ok_or_else(wrong)?;
            (h, p, sid)
        };

        if host.trim().is_empty() {
            return Err(DescriptorError::MissingHost { dialect });
        }
        if database.trim().is_empty() {
            return Err(DescriptorError::MissingDatabase { dialect });
        }
        parts.host = host.trim().to_string();
        parts.port = if port.trim().is_empty() {
            dialect.default_port()
        } else {
            parse_port(port)?
        };
        parts.database = database.trim().to_string();
        Ok(parts)
    }
}

// -----------------------------------------------------------------------------
// Embedded grammar: sqlite:<path>[?opts]
// -----------------------------------------------------------------------------

pub struct SqliteCodec;

impl DialectCodec for SqliteCodec {
    fn format(&self, d: &ConnectionDescriptor) -> String {
        // parse() drops one leading "//", so a UNC-style path needs it doubled.
        let authority = if d.database.starts_with("//") { "//" } else { "" };
        let mut s = format!(
            "sqlite:{}{}",
            authority,
            utf8_percent_encode(&d.database, SQLITE_PATH)
        );
        if !d.options.is_empty() {
            s.push('?');
            s.extend(utf8_percent_encode(&d.options, QUERY));
        }
        s
    }

    fn parse(&self, raw: &str) -> Result<UrlParts, DescriptorError> {
        let dialect = DbDialect::Embedded;
        let rest = strip_prefix_ignore_case(raw.trim(), "sqlite:").ok_or_else(|| {
            DescriptorError::WrongGrammar {
                dialect,
                url: raw.to_string(),
                expected: "sqlite:<path>",
            }
        })?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        // A literal '?' in the path is always escaped, so the first one starts the options.
        let (path, options) = rest.split_once('?').unwrap_or((rest, ""));
        if path.is_empty() {
            return Err(DescriptorError::MissingDatabase { dialect });
        }
        Ok(UrlParts {
            host: String::new(),
            port: 0,
            database: decode(path).into_owned(),
            options: decode(options).into_owned(),
            login: None,
            password: None,
        })
    }
}

/// Escapes for a database name used as a single URI path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Escapes for option strings. '&' and '=' stay literal as separators.
const QUERY: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Escapes for an embedded database file path. Separators stay readable.
const SQLITE_PATH: &AsciiSet = &CONTROLS.add(b' ').add(b'#').add(b'%').add(b'?');

fn decode(s: &str) -> Cow<'_, str> {
    percent_decode_str(s).decode_utf8_lossy()
}

fn bracket_ipv6(host: &str) -> Cow<'_, str> {
    if host.contains(':') && !host.starts_with('[') {
        Cow::Owned(format!("[{}]", host))
    } else {
        Cow::Borrowed(host)
    }
}

fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Split `host[:rest]`, where an IPv6 host must be written `[addr]`.
fn split_host(s: &str) -> Option<(&str, Option<&str>)> {
    if let Some(inner) = s.strip_prefix('[') {
        let (host, after) = inner.split_once(']')?;
        if after.is_empty() {
            return Some((host, None));
        }
        return after.strip_prefix(':').map(|rest| (host, Some(rest)));
    }
    Some(match s.split_once(':') {
        Some((host, rest)) => (host, Some(rest)),
        None => (s, None),
    })
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn parse_port(raw: &str) -> Result<u16, DescriptorError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| DescriptorError::InvalidPort(raw.trim().to_string()))
}
