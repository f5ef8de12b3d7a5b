//! HTTP remote store client.
//!
//! Talks to a PostgREST-style REST table:
//!
//! - **Lookup**: `GET {base}/{table}?select=id,label_hash,created_at&user_id=eq.{owner}
//!   &label_hash=in.(...)&created_at=gte.{from}&created_at=lte.{to}`
//! - **Upsert**: `POST {base}/{table}?on_conflict=local_id` with
//!   `Prefer: resolution=merge-duplicates,return=representation`, so repeating
//!   an upload updates the same row.
//! - **Authentication**: `apikey` header plus a bearer token when a key is set.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use corkscan_core::{AppConfig, QueueRecord};
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{RemoteError, RemoteRecord, RemoteStore, TimeWindow};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default user agent.
const DEFAULT_USER_AGENT: &str = "corkscan/0.1";

/// Columns needed for duplicate detection.
const INDEX_COLUMNS: &str = "id,label_hash,created_at";

/// Remote client configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the REST endpoint.
    pub base_url: Url,
    /// Table receiving scans.
    pub table: String,
    /// API key, sent as `apikey` and bearer token.
    pub api_key: Option<String>,
    /// Request timeout (default: 15s).
    pub timeout: Duration,
    /// User-agent string (default: corkscan/0.x).
    pub user_agent: String,
}

impl RemoteConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            table: "scans".into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }

    /// Build from application configuration.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::InvalidUrl` if `remote_url` is missing or does
    /// not parse.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, RemoteError> {
        let raw = config
            .remote_url
            .as_deref()
            .ok_or_else(|| RemoteError::InvalidUrl("remote_url is not configured".into()))?;
        let base_url = Url::parse(raw).map_err(|e| RemoteError::InvalidUrl(format!("{raw}: {e}")))?;
        Ok(Self {
            base_url,
            table: config.remote_table.clone(),
            api_key: config.remote_api_key.clone(),
            timeout: config.timeout(),
            user_agent: config.user_agent.clone(),
        })
    }

    /// URL of the scans table.
    pub fn table_url(&self) -> Result<Url, RemoteError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let raw = format!("{base}/{}", self.table);
        Url::parse(&raw).map_err(|e| RemoteError::InvalidUrl(format!("{raw}: {e}")))
    }
}

/// Row shape returned by the remote table.
#[derive(Debug, Deserialize)]
struct RemoteRow {
    id: RowId,
    #[serde(default)]
    label_hash: Option<String>,
    created_at: DateTime<Utc>,
}

/// Remote ids may be text (uuid) or integer columns.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowId {
    Text(String),
    Number(i64),
}

impl RowId {
    fn into_string(self) -> String {
        match self {
            RowId::Text(s) => s,
            RowId::Number(n) => n.to_string(),
        }
    }
}

/// Body of an upsert request.
#[derive(Debug, Serialize)]
struct UpsertRow<'a> {
    local_id: &'a str,
    user_id: &'a str,
    label_hash: Option<&'a str>,
    created_at: String,
    payload: &'a serde_json::Value,
}

fn timestamp_param(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Query parameters for a duplicate lookup.
pub(crate) fn index_query(owner: &str, keys: &[String], window: TimeWindow) -> Vec<(&'static str, String)> {
    let quoted: Vec<String> = keys.iter().map(|k| format!("\"{}\"", k.replace('"', "\\\""))).collect();
    vec![
        ("select", INDEX_COLUMNS.to_string()),
        ("user_id", format!("eq.{owner}")),
        ("label_hash", format!("in.({})", quoted.join(","))),
        ("created_at", format!("gte.{}", timestamp_param(window.from))),
        ("created_at", format!("lte.{}", timestamp_param(window.to))),
    ]
}

fn check_status(status: StatusCode) -> Result<(), RemoteError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::AuthError);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RemoteError::RateLimited);
    }
    if status.is_client_error() || status.is_server_error() {
        return Err(RemoteError::HttpError { status: status.as_u16() });
    }
    Ok(())
}

/// PostgREST-backed remote store.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    http: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemoteStore {
    /// Create a new client with the given configuration.
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        config.table_url()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { http, config })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn read_rows(response: reqwest::Response) -> Result<Vec<RemoteRow>, RemoteError> {
        check_status(response.status())?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn find_matching(
        &self, owner: &str, keys: &[String], window: TimeWindow,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.config.table_url()?;
        tracing::debug!(keys = keys.len(), from = %window.from, to = %window.to, "querying remote duplicate index");

        let response = self
            .authorized(self.http.get(url))
            .header(header::ACCEPT, "application/json")
            .query(&index_query(owner, keys, window))
            .send()
            .await?;

        let rows = Self::read_rows(response).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let correlation_key = row.label_hash?;
                Some(RemoteRecord { id: row.id.into_string(), correlation_key, created_at: row.created_at })
            })
            .collect())
    }

    async fn upsert(&self, owner: &str, record: &QueueRecord) -> Result<String, RemoteError> {
        let url = self.config.table_url()?;
        let body = UpsertRow {
            local_id: &record.id,
            user_id: owner,
            label_hash: record.correlation_key.as_deref(),
            created_at: timestamp_param(record.created_at),
            payload: &record.payload,
        };

        let response = self
            .authorized(self.http.post(url))
            .query(&[("on_conflict", "local_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .header(header::ACCEPT, "application/json")
            .json(&[body])
            .send()
            .await?;

        let rows = Self::read_rows(response).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Parse("upsert returned no rows".into()))?;

        tracing::debug!(local_id = %record.id, "remote upsert accepted");
        Ok(row.id.into_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_table_url_joins_cleanly() {
        let mut config = RemoteConfig::new(Url::parse("https://db.example.com/rest/v1/").unwrap());
        assert_eq!(config.table_url().unwrap().as_str(), "https://db.example.com/rest/v1/scans");

        config.base_url = Url::parse("https://db.example.com/rest/v1").unwrap();
        config.table = "wine_scans".into();
        assert_eq!(config.table_url().unwrap().as_str(), "https://db.example.com/rest/v1/wine_scans");
    }

    #[test]
    fn test_from_app_config() {
        let app = AppConfig {
            remote_url: Some("https://db.example.com/rest/v1".into()),
            remote_api_key: Some("key".into()),
            ..Default::default()
        };
        let config = RemoteConfig::from_app_config(&app).unwrap();
        assert_eq!(config.table, "scans");
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.timeout, app.timeout());
    }

    #[test]
    fn test_from_app_config_requires_url() {
        let result = RemoteConfig::from_app_config(&AppConfig::default());
        assert!(matches!(result, Err(RemoteError::InvalidUrl(_))));

        let app = AppConfig { remote_url: Some("not a url".into()), ..Default::default() };
        assert!(matches!(RemoteConfig::from_app_config(&app), Err(RemoteError::InvalidUrl(_))));
    }

    #[test]
    fn test_index_query() {
        let window = TimeWindow { from: at(1_700_000_000), to: at(1_700_000_600) };
        let query = index_query("user-1", &["abc".to_string(), "d\"ef".to_string()], window);

        assert_eq!(query[0], ("select", "id,label_hash,created_at".to_string()));
        assert_eq!(query[1], ("user_id", "eq.user-1".to_string()));
        assert_eq!(query[2], ("label_hash", r#"in.("abc","d\"ef")"#.to_string()));
        assert_eq!(query[3], ("created_at", "gte.2023-11-14T22:13:20.000Z".to_string()));
        assert_eq!(query[4], ("created_at", "lte.2023-11-14T22:23:20.000Z".to_string()));
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(check_status(StatusCode::CREATED).is_ok());
        assert!(matches!(check_status(StatusCode::UNAUTHORIZED), Err(RemoteError::AuthError)));
        assert!(matches!(check_status(StatusCode::TOO_MANY_REQUESTS), Err(RemoteError::RateLimited)));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(RemoteError::HttpError { status: 502 })
        ));
    }

    #[test]
    fn test_row_parsing() {
        let rows: Vec<RemoteRow> = serde_json::from_str(
            r#"[{"id": "8d1c", "label_hash": "abc", "created_at": "2025-03-01T12:00:00+00:00"},
                {"id": 42, "label_hash": null, "created_at": "2025-03-01T12:00:00.123456+00:00"}]"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label_hash.as_deref(), Some("abc"));
        let ids: Vec<String> = rows.into_iter().map(|r| r.id.into_string()).collect();
        assert_eq!(ids, ["8d1c", "42"]);
    }

    #[tokio::test]
    async fn test_new_client() {
        let config = RemoteConfig::new(Url::parse("https://db.example.com/rest/v1").unwrap());
        assert!(HttpRemoteStore::new(config).is_ok());
    }
}
