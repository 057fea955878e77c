use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use tracing::{info, instrument};

use crate::config::DaemonConfig;
use crate::errors::Result;
use crate::jobs::Job;
use crate::request_cache::RequestCache;

/// Cache key of the comma separated tracker list handed to new jobs.
pub const TRACKER_CACHE_KEY: &str = "download:trackers";

pub const REFRESH_PERIOD: Duration = Duration::from_secs(12 * 60 * 60);

/// Fetches the public tracker list into the shared cache.
#[derive(Debug, Clone)]
pub struct TrackerRefresh {
    client: reqwest::Client,
    url: String,
    cache: RequestCache<String>,
}

impl TrackerRefresh {
    pub fn new(url: String, proxy: Option<&str>, cache: RequestCache<String>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            url,
            cache,
        })
    }

    pub fn from_config(config: &DaemonConfig, cache: RequestCache<String>) -> Result<Self> {
        Self::new(
            config.tracker_list_url.clone(),
            config.http_proxy.as_deref(),
            cache,
        )
    }

    /// Replaces the cached list. On failure the previous value stays.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn refresh(&self) -> Result<String> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let trackers = flatten(&body);
        self.cache.insert(TRACKER_CACHE_KEY, trackers.clone());
        info!("Aria2 trackers updated");
        Ok(trackers)
    }
}

/// Joins every whitespace separated entry with commas.
///
/// Leading and trailing whitespace produce no empty entries, unlike a plain
/// replace of each whitespace run with a comma. aria2 ignores empty tracker
/// entries either way.
pub fn flatten(list: &str) -> String {
    list.split_whitespace().join(",")
}

#[async_trait]
impl Job for TrackerRefresh {
    fn name(&self) -> &'static str {
        "Aria2 update trackers"
    }

    async fn run(&self) -> Result<()> {
        self.refresh().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn serve(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trackers_best.txt"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    fn cached(cache: &RequestCache<String>) -> Option<String> {
        cache
            .get(TRACKER_CACHE_KEY)
            .map(|trackers| trackers.as_str().to_owned())
    }

    #[test]
    fn test_flatten() {
        assert_eq!(flatten("tracker1\ntracker2"), "tracker1,tracker2");
        assert_eq!(
            flatten("udp://a:1/announce\n\nudp://b:2/announce \t\n"),
            "udp://a:1/announce,udp://b:2/announce"
        );
        assert_eq!(flatten(" \n"), "");
    }

    #[tokio::test]
    async fn test_refresh_stores_flattened_list() {
        let server = serve(200, "tracker1\ntracker2").await;
        let cache = RequestCache::new();
        let refresh = TrackerRefresh::new(
            format!("{}/trackers_best.txt", server.uri()),
            None,
            cache.clone(),
        )
        .unwrap();

        refresh.run().await.unwrap();
        assert_eq!(cached(&cache).as_deref(), Some("tracker1,tracker2"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_list() {
        let server = serve(500, "").await;
        let cache = RequestCache::new();
        cache.insert(TRACKER_CACHE_KEY, "old".to_string());
        let refresh = TrackerRefresh::new(
            format!("{}/trackers_best.txt", server.uri()),
            None,
            cache.clone(),
        )
        .unwrap();

        assert!(refresh.run().await.is_err());
        assert_eq!(cached(&cache).as_deref(), Some("old"));
    }
}
