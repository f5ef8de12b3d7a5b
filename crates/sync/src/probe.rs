//! Connectivity detection.
//!
//! The coordinator asks a [`ConnectivityProbe`] before every pass.
//! [`watch_connectivity`] polls a probe in the background and publishes
//! transitions on a watch channel, which doubles as the "became online"
//! trigger for the sync driver.

use std::sync::Arc;
use std::time::Duration;

use corkscan_core::AppConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::remote::RemoteError;

/// Boolean "is the device online" predicate.
#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Probe that issues a `HEAD` request.
///
/// Any HTTP response, including error statuses, counts as online; only
/// transport failures count as offline.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
    url: Url,
}

impl HttpProbe {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    /// Probe `probe_url`, falling back to `remote_url`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteError::InvalidUrl` if neither is set or the URL does
    /// not parse.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, RemoteError> {
        let raw = config
            .probe_url
            .as_deref()
            .or(config.remote_url.as_deref())
            .ok_or_else(|| RemoteError::InvalidUrl("neither probe_url nor remote_url is configured".into()))?;
        let url = Url::parse(raw).map_err(|e| RemoteError::InvalidUrl(format!("{raw}: {e}")))?;
        Self::new(url, config.timeout())
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.http.head(self.url.clone()).send().await {
            Ok(response) => {
                tracing::trace!(status = %response.status(), "connectivity probe answered");
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

/// Probe that reads the latest value published on a watch channel.
#[derive(Debug, Clone)]
pub struct WatchProbe {
    rx: watch::Receiver<bool>,
}

impl WatchProbe {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for WatchProbe {
    async fn is_online(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Poll `probe` every `interval` and publish changes.
///
/// The channel starts out offline, so the first successful probe is seen
/// as a transition to online. The task stops once every receiver is gone.
pub fn watch_connectivity(
    probe: Arc<dyn ConnectivityProbe>, interval: Duration,
) -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        loop {
            let online = probe.is_online().await;
            let changed = tx.send_if_modified(|current| {
                if *current == online {
                    return false;
                }
                *current = online;
                true
            });
            if changed {
                tracing::info!(online, "connectivity changed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => break,
            }
        }
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedProbe;

    #[tokio::test]
    async fn test_watch_probe_tracks_channel() {
        let (tx, rx) = watch::channel(false);
        let probe = WatchProbe::new(rx);
        assert!(!probe.is_online().await);

        tx.send(true).unwrap();
        assert!(probe.is_online().await);
    }

    #[tokio::test]
    async fn test_watch_connectivity_publishes_transitions() {
        let probe = Arc::new(FixedProbe::new(true));
        let (mut rx, handle) = watch_connectivity(probe.clone(), Duration::from_millis(5));

        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        probe.set(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());

        drop(rx);
        handle.await.unwrap();
    }

    #[test]
    fn test_http_probe_prefers_probe_url() {
        let config = AppConfig {
            remote_url: Some("https://db.example.com/rest/v1".into()),
            probe_url: Some("https://status.example.com/".into()),
            ..Default::default()
        };
        let probe = HttpProbe::from_app_config(&config).unwrap();
        assert_eq!(probe.url.as_str(), "https://status.example.com/");

        let fallback = HttpProbe::from_app_config(&AppConfig { probe_url: None, ..config }).unwrap();
        assert_eq!(fallback.url.host_str(), Some("db.example.com"));

        assert!(matches!(HttpProbe::from_app_config(&AppConfig::default()), Err(RemoteError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_http_probe_offline_on_unreachable_host() {
        // Port 9 on localhost is the discard port; nothing listens in CI.
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let probe = HttpProbe::new(url, Duration::from_millis(500)).unwrap();
        assert!(!probe.is_online().await);
    }
}
