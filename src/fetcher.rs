use crate::config::SourceConfig;
use crate::error::{AppError, Result};
use crate::model::{FeatureQueryResponse, HistoryPoint, RawFeature};
use crate::pipeline::normalize::history_points;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_HISTORY_RECORD_COUNT: u64 = 500;

/// Anything that can produce one batch of raw gauge features.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn fetch_features(&self) -> Result<Vec<RawFeature>>;
}

/// Parameters of one feature-query request beyond the fixed
/// `outFields=*&f=json&returnGeometry=true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureQuery {
    pub where_clause: String,
    pub result_record_count: Option<u64>,
    pub order_by_fields: Option<String>,
}

impl FeatureQuery {
    pub fn live(config: &SourceConfig) -> Self {
        Self {
            where_clause: config.where_clause.clone(),
            result_record_count: Some(config.result_record_count),
            order_by_fields: Some(config.order_by_fields.clone()),
        }
    }

    /// Readings for one gauge at or after `cutoff_ms`, oldest first.
    pub fn history(station_label: &str, cutoff_ms: i64) -> Self {
        Self {
            where_clause: format!(
                "gauge = '{}' AND CreationDate >= {}",
                station_label.replace('\'', "''"),
                cutoff_ms
            ),
            result_record_count: Some(DEFAULT_HISTORY_RECORD_COUNT),
            order_by_fields: Some("CreationDate ASC".to_string()),
        }
    }

    pub fn to_url(&self, endpoint: &Url) -> Url {
        let mut url = endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("where", &self.where_clause)
                .append_pair("outFields", "*")
                .append_pair("f", "json")
                .append_pair("returnGeometry", "true");
            if let Some(count) = self.result_record_count {
                pairs.append_pair("resultRecordCount", &count.to_string());
            }
            if let Some(order) = &self.order_by_fields {
                pairs.append_pair("orderByFields", order);
            }
        }
        url
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

pub struct FeatureClient {
    client: Client,
    endpoint: Url,
    live_query: FeatureQuery,
    retry: RetryPolicy,
}

impl FeatureClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::with_options(
            endpoint,
            FeatureQuery {
                where_clause: "1=1".to_string(),
                result_record_count: Some(100),
                order_by_fields: Some("CreationDate DESC".to_string()),
            },
            RetryPolicy::default(),
            Duration::from_secs(30),
        )
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Self::with_options(
            &config.base_url,
            FeatureQuery::live(config),
            RetryPolicy {
                max_retries: config.max_retries as u32,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
            },
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn with_options(
        endpoint: &str,
        live_query: FeatureQuery,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent("floodwatch/0.1.0")
            .timeout(timeout)
            .build()?;

        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AppError::InvalidData(format!(
                "Feature endpoint must be http(s), got: {}",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            client,
            endpoint,
            live_query,
            retry,
        })
    }

    /// Latest readings across all gauges.
    pub async fn fetch_live(&self) -> Result<Vec<RawFeature>> {
        self.query(&self.live_query).await
    }

    /// Level/rainfall series for one gauge over the last `hours_back` hours.
    pub async fn fetch_history(
        &self,
        station_label: &str,
        hours_back: u32,
    ) -> Result<Vec<HistoryPoint>> {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(i64::from(hours_back));
        let query = FeatureQuery::history(station_label, cutoff.timestamp_millis());
        let features = self.query(&query).await?;
        Ok(history_points(&features))
    }

    pub async fn query(&self, query: &FeatureQuery) -> Result<Vec<RawFeature>> {
        let url = query.to_url(&self.endpoint);

        retry_with_backoff(self.retry, || async { self.query_once(&url).await }).await
    }

    async fn query_once(&self, url: &Url) -> Result<Vec<RawFeature>> {
        debug!("Querying features from {}", url);

        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        let body = response.text().await?;
        let parsed: FeatureQueryResponse = serde_json::from_str(&body)?;

        if let Some(err) = parsed.error {
            return Err(AppError::Service {
                code: err.code,
                message: err.message,
            });
        }

        if parsed.exceeded_transfer_limit {
            warn!(
                "Feature service truncated the result at {} records",
                parsed.features.len()
            );
        }

        info!("Received {} features", parsed.features.len());
        Ok(parsed.features)
    }
}

#[async_trait]
impl FeatureSource for FeatureClient {
    async fn fetch_features(&self) -> Result<Vec<RawFeature>> {
        self.fetch_live().await
    }
}

/// Retry a future with exponential backoff
async fn retry_with_backoff<F, Fut, T>(policy: RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                retries += 1;

                if retries > policy.max_retries || !e.is_transient() {
                    return Err(e);
                }

                let delay = policy.base_delay * 2u32.pow(retries.saturating_sub(1));
                warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                    retries, policy.max_retries, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
