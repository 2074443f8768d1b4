//! Connection targets: everything a client needs to dial a Redis endpoint.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use redfleet_state::RedisConnection;

pub const SCHEME_PLAIN: &str = "redis";
pub const SCHEME_TLS: &str = "rediss";

const REDACTED: &str = "********";

/// Option keys that never override the connection's own columns.
const PINNED_KEYS: &[&str] = &["host", "port", "database"];

/// Option key accepted on write as an alternative to the typed password.
/// It is sealed into the connection's secret and never stored as an option.
pub const PASSWORD_OPTION: &str = "password";

/// A resolved, ready-to-dial endpoint. Holds the plaintext password, so it
/// is never persisted; `Debug` and [`ConnectionTarget::redacted`] mask it.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub database: u8,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Remaining client options, passed through untouched.
    pub params: BTreeMap<String, String>,
}

impl ConnectionTarget {
    /// Merge `conn` with its decrypted password.
    ///
    /// Options may override `scheme` and `username`, and `tls = true`
    /// selects the TLS scheme. `host`, `port`, and `database` always come
    /// from the connection itself; the password only ever comes from the
    /// vault.
    pub fn build(conn: &RedisConnection, password: Option<String>) -> Self {
        let mut target = ConnectionTarget {
            scheme: SCHEME_PLAIN.to_string(),
            host: conn.host.clone(),
            port: conn.port,
            database: conn.database,
            username: None,
            password,
            params: BTreeMap::new(),
        };

        for (key, value) in &conn.options {
            match key.as_str() {
                k if PINNED_KEYS.contains(&k) => {
                    debug!(connection_id = conn.id, option = k, "ignoring pinned option override");
                }
                "scheme" => target.scheme = value.clone(),
                "username" => target.username = Some(value.clone()),
                PASSWORD_OPTION => {
                    debug!(connection_id = conn.id, "ignoring plaintext password option");
                }
                "tls" => {
                    if is_truthy(value) {
                        target.scheme = SCHEME_TLS.to_string();
                    }
                    target.params.insert(key.clone(), value.clone());
                }
                _ => {
                    target.params.insert(key.clone(), value.clone());
                }
            }
        }
        target
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == SCHEME_TLS
    }

    /// Copy with the password masked, safe to log or print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.password.is_some() {
            copy.password = Some(REDACTED.to_string());
        }
        copy
    }

    /// `scheme://[user[:password]@]host:port/database`.
    pub fn to_url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", encode(user), encode(pass)),
            (Some(user), None) => format!("{}@", encode(user)),
            (None, Some(pass)) => format!(":{}@", encode(pass)),
            (None, None) => String::new(),
        };
        format!(
            "{}://{auth}{}:{}/{}",
            self.scheme, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("params", &self.params)
            .finish()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Percent-encode the characters that would break URL userinfo.
fn encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '.' | '_' | '~' => out.push(c),
            other => {
                let mut buf = [0u8; 4];
                for byte in other.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}
