//! Per-operation option structs and their wire codecs.
//!
//! Every operation that takes options accepts a struct where each field
//! is optional: absent fields stay absent across the wire so providers
//! never confuse "unset" with a default. The `options!` macro generates
//! a codec pair per struct — `decode` from request parameters and
//! `encode` back to wire pairs — with the field kinds mapped as:
//!
//! - `String` / `bool` / `i32` / `i64` — parsed from text
//! - `DateTime<Utc>` — the sortable `YYYYMMDD.HHMMSS.nnnnnnnnn` layout
//! - `Duration` — the `ns|us|ms|s|m|h` suffix grammar
//! - `HashMap<String, String>` — form-encoded pairs (`k1=v1&k2=v2`)
//! - `Vec<String>` — comma-separated
//!
//! Unknown wire fields are ignored; decode errors are input errors.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::wire;

// ── Request parameters ─────────────────────────────────────────────

/// Raw request inputs an options struct decodes from. Lookup order is
/// form, then query, then headers.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub form: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

impl Params {
    /// Build params from form pairs (used by codecs round-tripping).
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            form: pairs.iter().cloned().collect(),
            query: HashMap::new(),
            headers: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.form
            .get(name)
            .or_else(|| self.query.get(name))
            .or_else(|| self.headers.get(name))
            .map(String::as_str)
    }
}

// ── Wire values ────────────────────────────────────────────────────

/// A value that can cross the wire as text.
pub trait OptionValue: Sized {
    fn decode_wire(raw: &str) -> Result<Self, String>;
    fn encode_wire(&self) -> String;
}

impl OptionValue for String {
    fn decode_wire(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
    fn encode_wire(&self) -> String {
        self.clone()
    }
}

impl OptionValue for bool {
    fn decode_wire(raw: &str) -> Result<Self, String> {
        match raw {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(format!("invalid bool: {other}")),
        }
    }
    fn encode_wire(&self) -> String {
        self.to_string()
    }
}

impl OptionValue for i32 {
    fn decode_wire(raw: &str) -> Result<Self, String> {
        raw.parse().map_err(|e| format!("invalid int: {e}"))
    }
    fn encode_wire(&self) -> String {
        self.to_string()
    }
}

impl OptionValue for i64 {
    fn decode_wire(raw: &str) -> Result<Self, String> {
        raw.parse().map_err(|e| format!("invalid int64: {e}"))
    }
    fn encode_wire(&self) -> String {
        self.to_string()
    }
}

impl OptionValue for DateTime<Utc> {
    fn decode_wire(raw: &str) -> Result<Self, String> {
        wire::parse_time(raw).map_err(|e| e.to_string())
    }
    fn encode_wire(&self) -> String {
        wire::format_time(self)
    }
}

impl OptionValue for Duration {
    fn decode_wire(raw: &str) -> Result<Self, String> {
        wire::parse_duration(raw).map_err(|e| e.to_string())
    }
    fn encode_wire(&self) -> String {
        wire::format_duration(self)
    }
}

impl OptionValue for HashMap<String, String> {
    fn decode_wire(raw: &str) -> Result<Self, String> {
        let mut map = HashMap::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| format!("invalid pair: {pair}"))?;
            map.insert(k.to_string(), v.to_string());
        }
        Ok(map)
    }
    fn encode_wire(&self) -> String {
        // Sorted for a stable wire form.
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl OptionValue for Vec<String> {
    fn decode_wire(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        Ok(raw.split(',').map(str::to_string).collect())
    }
    fn encode_wire(&self) -> String {
        self.join(",")
    }
}

fn decode_field<T: OptionValue>(params: &Params, name: &str) -> CoreResult<Option<T>> {
    match params.get(name) {
        Some(raw) => T::decode_wire(raw)
            .map(Some)
            .map_err(|reason| CoreError::option(name, reason)),
        None => Ok(None),
    }
}

// ── Options structs ────────────────────────────────────────────────

/// Generate an options struct plus its wire codec pair.
macro_rules! options {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $field:ident : $ty:ty => $wire:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $( pub $field: Option<$ty>, )*
        }

        impl $name {
            /// Decode from request parameters. Absent fields stay absent.
            pub fn decode(params: &Params) -> CoreResult<Self> {
                Ok(Self {
                    $( $field: decode_field::<$ty>(params, $wire)?, )*
                })
            }

            /// Encode present fields as wire pairs.
            pub fn encode(&self) -> Vec<(String, String)> {
                let mut pairs: Vec<(String, String)> = Vec::new();
                $(
                    if let Some(value) = &self.$field {
                        pairs.push(($wire.to_string(), value.encode_wire()));
                    }
                )*
                pairs
            }
        }
    };
}

options! {
    pub struct ProviderOptions {
        id: String => "id",
    }
}

options! {
    pub struct AppCreateOptions {
        generation: String => "generation",
    }
}

options! {
    pub struct AppUpdateOptions {
        lock: bool => "lock",
        parameters: HashMap<String, String> => "parameters",
        sleep: bool => "sleep",
    }
}

options! {
    pub struct BuildCreateOptions {
        description: String => "description",
        development: bool => "development",
        manifest: String => "manifest",
        no_cache: bool => "no-cache",
    }
}

options! {
    pub struct BuildListOptions {
        limit: i64 => "limit",
    }
}

options! {
    pub struct BuildUpdateOptions {
        ended: DateTime<Utc> => "ended",
        entrypoint: String => "entrypoint",
        logs: String => "logs",
        manifest: String => "manifest",
        release: String => "release",
        started: DateTime<Utc> => "started",
        status: String => "status",
    }
}

options! {
    pub struct CertificateCreateOptions {
        chain: String => "chain",
    }
}

options! {
    /// Shared by app, process, and system log streams.
    pub struct LogsOptions {
        filter: String => "filter",
        follow: bool => "follow",
        prefix: bool => "prefix",
        since: Duration => "since",
    }
}

options! {
    /// Shared by app and system metrics queries.
    pub struct MetricsOptions {
        end: DateTime<Utc> => "end",
        metrics: Vec<String> => "metrics",
        period: i64 => "period",
        start: DateTime<Utc> => "start",
    }
}

options! {
    pub struct EventSendOptions {
        data: HashMap<String, String> => "data",
        error: String => "error",
        status: String => "status",
    }
}

options! {
    pub struct InstanceShellOptions {
        command: String => "command",
        height: i32 => "height",
        width: i32 => "width",
    }
}

options! {
    pub struct ObjectListOptions {
        prefix: String => "prefix",
    }
}

options! {
    pub struct ObjectStoreOptions {
        public: bool => "public",
    }
}

options! {
    pub struct ProcessExecOptions {
        entrypoint: bool => "entrypoint",
        height: i32 => "height",
        width: i32 => "width",
        tty: bool => "tty",
    }
}

options! {
    pub struct ProcessListOptions {
        release: String => "release",
        service: String => "service",
    }
}

options! {
    pub struct ProcessRunOptions {
        command: String => "command",
        environment: HashMap<String, String> => "environment",
        height: i32 => "height",
        image: String => "image",
        memory: i64 => "memory",
        release: String => "release",
        service: String => "service",
        volumes: HashMap<String, String> => "volumes",
        width: i32 => "width",
    }
}

options! {
    pub struct ReleaseCreateOptions {
        build: String => "build",
        env: String => "env",
        description: String => "description",
    }
}

options! {
    pub struct ReleaseListOptions {
        limit: i64 => "limit",
    }
}

options! {
    pub struct ReleasePromoteOptions {
        development: bool => "development",
        force: bool => "force",
        idle: bool => "idle",
        min: i32 => "min",
        max: i32 => "max",
        timeout: i32 => "timeout",
    }
}

options! {
    pub struct ResourceCreateOptions {
        name: String => "name",
        parameters: HashMap<String, String> => "parameters",
    }
}

options! {
    pub struct ResourceUpdateOptions {
        parameters: HashMap<String, String> => "parameters",
    }
}

options! {
    pub struct SystemProcessesOptions {
        all: bool => "all",
    }
}

options! {
    pub struct SystemUpdateOptions {
        count: i32 => "count",
        parameters: HashMap<String, String> => "parameters",
        version: String => "version",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn round_trip<T, D, E>(value: T, decode: D, encode: E)
    where
        T: PartialEq + std::fmt::Debug,
        D: Fn(&Params) -> CoreResult<T>,
        E: Fn(&T) -> Vec<(String, String)>,
    {
        let pairs = encode(&value);
        let decoded = decode(&Params::from_pairs(&pairs)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn build_create_round_trip() {
        round_trip(
            BuildCreateOptions {
                description: Some("a build".into()),
                development: Some(true),
                manifest: Some("convox.yml".into()),
                no_cache: None,
            },
            BuildCreateOptions::decode,
            BuildCreateOptions::encode,
        );
    }

    #[test]
    fn absent_fields_stay_absent() {
        let opts = BuildCreateOptions::decode(&Params::default()).unwrap();
        assert_eq!(opts, BuildCreateOptions::default());
        assert!(opts.encode().is_empty());
    }

    #[test]
    fn unknown_fields_ignored() {
        let params = Params::from_pairs(&[
            ("bogus".to_string(), "1".to_string()),
            ("description".to_string(), "x".to_string()),
        ]);
        let opts = BuildCreateOptions::decode(&params).unwrap();
        assert_eq!(opts.description.as_deref(), Some("x"));
        assert!(opts.development.is_none());
    }

    #[test]
    fn map_fields_form_encode() {
        let mut parameters = HashMap::new();
        parameters.insert("b".to_string(), "2".to_string());
        parameters.insert("a".to_string(), "1".to_string());
        let opts = AppUpdateOptions {
            lock: None,
            parameters: Some(parameters),
            sleep: Some(false),
        };
        let pairs = opts.encode();
        let encoded = pairs.iter().find(|(k, _)| k == "parameters").unwrap();
        assert_eq!(encoded.1, "a=1&b=2");
        round_trip(opts, AppUpdateOptions::decode, AppUpdateOptions::encode);
    }

    #[test]
    fn time_and_duration_fields() {
        let started = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        round_trip(
            BuildUpdateOptions {
                started: Some(started),
                status: Some("running".into()),
                ..Default::default()
            },
            BuildUpdateOptions::decode,
            BuildUpdateOptions::encode,
        );
        round_trip(
            LogsOptions {
                follow: Some(true),
                since: Some(Duration::from_secs(300)),
                ..Default::default()
            },
            LogsOptions::decode,
            LogsOptions::encode,
        );
    }

    #[test]
    fn list_fields_comma_separate() {
        round_trip(
            MetricsOptions {
                metrics: Some(vec!["cpu".into(), "memory".into()]),
                period: Some(60),
                ..Default::default()
            },
            MetricsOptions::decode,
            MetricsOptions::encode,
        );
    }

    #[test]
    fn bad_values_are_input_errors() {
        let params = Params::from_pairs(&[("development".to_string(), "yes".to_string())]);
        assert!(BuildCreateOptions::decode(&params).is_err());

        let params = Params::from_pairs(&[("since".to_string(), "5w".to_string())]);
        assert!(LogsOptions::decode(&params).is_err());
    }

    #[test]
    fn query_and_header_sources() {
        let mut params = Params::default();
        params.query.insert("limit".to_string(), "5".to_string());
        let opts = BuildListOptions::decode(&params).unwrap();
        assert_eq!(opts.limit, Some(5));

        let mut params = Params::default();
        params.headers.insert("height".to_string(), "40".to_string());
        let opts = ProcessExecOptions::decode(&params).unwrap();
        assert_eq!(opts.height, Some(40));
    }
}
