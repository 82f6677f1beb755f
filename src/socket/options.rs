//! Option mappings for the pool and the TLS layer.
//!
//! Pool options are a closed, typed set; unrecognized keys fail with
//! [`NetError::UnknownOption`]. Crypto options are a free-form ordered map
//! passed through to the TLS layer, with a handful of keys the handshake
//! controller interprets itself:
//!
//! | key                 | effect                                            |
//! |---------------------|---------------------------------------------------|
//! | `cafile`            | PEM CA bundle path; defaulted when unset          |
//! | `ciphers`           | colon-separated cipher preference                 |
//! | `crypto_method`     | TLS version selection, see [`CryptoMethod`]       |
//! | `peer_name`         | expected peer DNS name (also used for SNI)        |
//! | `peer_fingerprint`  | hex digest(s); 40 hex selects SHA-1, else MD5     |
//! | `CN_match`          | legacy alias, normalized into `peer_name`         |
//! | `capture_peer_cert` | store the peer certificate DER in the context     |
//! | `verify_peer`       | let the transport verify the certificate chain    |
//! | `verify_peer_name`  | let the transport verify the hostname             |
//!
//! `sni_nb_hack` and `peer_certificate` are synthetic bookkeeping keys and
//! are ignored when two contexts are compared for equality.

use crate::base::neterror::NetError;
use std::collections::BTreeMap;
use std::time::Duration;

/// Context keys written by the machinery itself, excluded from comparison.
const SYNTHETIC_KEYS: &[&str] = &["sni_nb_hack", "peer_certificate"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
    Bytes(Vec<u8>),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

/// TLS version selection carried by the `crypto_method` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CryptoMethod {
    /// Let the transport negotiate any version it supports.
    #[default]
    Any,
    Tlsv1_0,
    Tlsv1_1,
    Tlsv1_2,
    Tlsv1_3,
}

impl CryptoMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CryptoMethod::Any => "any",
            CryptoMethod::Tlsv1_0 => "tlsv1.0",
            CryptoMethod::Tlsv1_1 => "tlsv1.1",
            CryptoMethod::Tlsv1_2 => "tlsv1.2",
            CryptoMethod::Tlsv1_3 => "tlsv1.3",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "any" => Some(CryptoMethod::Any),
            "tlsv1.0" | "tlsv1" => Some(CryptoMethod::Tlsv1_0),
            "tlsv1.1" => Some(CryptoMethod::Tlsv1_1),
            "tlsv1.2" => Some(CryptoMethod::Tlsv1_2),
            "tlsv1.3" => Some(CryptoMethod::Tlsv1_3),
            _ => None,
        }
    }
}

/// Free-form TLS context options attached to a socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CryptoOptions {
    entries: BTreeMap<String, OptionValue>,
}

impl CryptoOptions {
    pub fn new() -> Self {
        CryptoOptions::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: OptionValue) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Builder-style [`set`](CryptoOptions::set).
    pub fn with(mut self, key: impl Into<String>, value: OptionValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(OptionValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(OptionValue::as_bool)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
        self.entries.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Equality ignoring the synthetic bookkeeping keys.
    pub fn matches(&self, other: &CryptoOptions) -> bool {
        self.significant().eq(other.significant())
    }

    fn significant(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.entries.iter().filter(|(key, _)| !SYNTHETIC_KEYS.contains(&key.as_str()))
    }
}

/// Per-request pool options, merged over the pool's defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Max concurrent sockets per authority; zero or negative disables the
    /// limit.
    pub host_connection_limit: i64,
    /// Eviction delay after checkin; zero disables.
    pub idle_timeout: Duration,
    /// Deadline handed to the connector.
    pub connect_timeout: Duration,
    /// Local bind address; empty means any.
    pub bindto: String,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            host_connection_limit: 8,
            idle_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            bindto: String::new(),
        }
    }
}

impl PoolOptions {
    /// Stringly-typed setter for callers carrying options as key/value pairs.
    /// Durations are taken in milliseconds; non-positive values disable.
    pub fn set(&mut self, key: &str, value: OptionValue) -> Result<(), NetError> {
        match (key, value) {
            ("host_connection_limit", OptionValue::Int(limit)) => {
                self.host_connection_limit = limit;
            }
            ("idle_timeout", OptionValue::Int(ms)) => self.idle_timeout = millis(ms),
            ("connect_timeout", OptionValue::Int(ms)) => self.connect_timeout = millis(ms),
            ("bindto", OptionValue::Str(addr)) => self.bindto = addr,
            (key, _) => return Err(NetError::UnknownOption(key.to_string())),
        }
        Ok(())
    }
}

fn millis(ms: i64) -> Duration {
    if ms <= 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.host_connection_limit, 8);
        assert_eq!(options.idle_timeout, Duration::from_secs(10));
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert!(options.bindto.is_empty());
    }

    #[test]
    fn unknown_pool_option_is_rejected() {
        let mut options = PoolOptions::default();
        assert_eq!(
            options.set("keepalive", OptionValue::Bool(true)),
            Err(NetError::UnknownOption("keepalive".to_string()))
        );
        assert!(options.set("idle_timeout", OptionValue::Int(250)).is_ok());
        assert_eq!(options.idle_timeout, Duration::from_millis(250));
    }

    #[test]
    fn non_positive_durations_disable() {
        let mut options = PoolOptions::default();
        options.set("idle_timeout", OptionValue::Int(-1)).unwrap();
        assert_eq!(options.idle_timeout, Duration::ZERO);
    }

    #[test]
    fn context_comparison_ignores_synthetic_keys() {
        let base = CryptoOptions::new()
            .with("cafile", OptionValue::from("/etc/ssl/ca.pem"))
            .with("peer_name", OptionValue::from("example.com"));
        let mut installed = base.clone();
        installed.set("sni_nb_hack", OptionValue::Bool(false));
        installed.set("peer_certificate", OptionValue::Bytes(vec![0x30]));
        assert!(installed.matches(&base));
        assert!(base.matches(&installed));

        let different = base.clone().with("peer_name", OptionValue::from("other.com"));
        assert!(!installed.matches(&different));
    }

    #[test]
    fn crypto_method_round_trips() {
        for method in [
            CryptoMethod::Any,
            CryptoMethod::Tlsv1_0,
            CryptoMethod::Tlsv1_1,
            CryptoMethod::Tlsv1_2,
            CryptoMethod::Tlsv1_3,
        ] {
            assert_eq!(CryptoMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(CryptoMethod::parse("sslv3"), None);
    }
}
