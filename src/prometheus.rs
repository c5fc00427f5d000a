use crate::*;

use std::time::Duration;

use tokio::task::JoinHandle;

pub const RESTORE_INTERVAL: Duration = Duration::from_secs(30);
pub const RESTORE_MAX_RETRIES: u32 = 20;

/// Where counter values from before a restart can be read back from.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn check_health(&self) -> Result<(), MonitoringError>;
    async fn snapshot(&self) -> Result<MetricsSnapshot, MonitoringError>;
}

#[derive(Deserialize, Debug)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Deserialize, Debug)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Deserialize, Debug)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (f64, String),
}

/// Client for the Prometheus HTTP query API.
pub struct PrometheusClient {
    client: reqwest::Client,
    base_url: url::Url,
}

impl PrometheusClient {
    pub fn new(base_url: url::Url, timeout: Duration) -> Result<Self, MonitoringError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(PrometheusClient { client, base_url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn query_by_label(&self, query: &str, label: &str) -> Result<HashMap<String, u64>, MonitoringError> {
        let response = self
            .client
            .get(self.endpoint("/api/v1/query"))
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(MonitoringError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_vector(query, &body, label)
    }
}

fn parse_vector(query: &str, body: &str, label: &str) -> Result<HashMap<String, u64>, MonitoringError> {
    let failed = |reason: String| MonitoringError::Query {
        query: query.to_string(),
        reason,
    };

    let response: QueryResponse = serde_json::from_str(body).map_err(|e| failed(e.to_string()))?;
    if response.status != "success" {
        return Err(failed(response.error.unwrap_or(response.status)));
    }
    let data = response.data.ok_or_else(|| failed("no data".to_string()))?;
    if data.result_type != "vector" {
        return Err(failed(format!("unexpected result type {}", data.result_type)));
    }

    let mut values = HashMap::new();
    for sample in data.result {
        let value: f64 = sample.value.1.parse().map_err(|_| failed(format!("bad value {}", sample.value.1)))?;
        let label_value = sample.metric.get(label).cloned().unwrap_or_default();
        *values.entry(label_value).or_default() += value.max(0.0).round() as u64;
    }
    Ok(values)
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn check_health(&self) -> Result<(), MonitoringError> {
        let response = self.client.get(self.endpoint("/api/v1/status/buildinfo")).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitoringError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<MetricsSnapshot, MonitoringError> {
        Ok(MetricsSnapshot {
            commands: self.query_by_label("telegram_commands_processed_total", "command").await?,
            messages: self.query_by_label("telegram_messages_processed_total", "type").await?,
            buttons: self.query_by_label("telegram_buttons_pressed_total", "button").await?,
            callbacks: self.query_by_label("telegram_callbacks_processed_total", "action").await?,
            errors: self.query_by_label("telegram_errors_total", "type").await?,
        })
    }
}

async fn restore_from(metrics: &Metrics, source: &dyn MetricsSource) -> Result<(), MonitoringError> {
    source.check_health().await?;
    let snapshot = source.snapshot().await?;
    metrics.apply_snapshot(&snapshot);
    Ok(())
}

/// Seeds the created-entity counters from the store, then restores the
/// labelled counters. If the first restore attempt fails, retries run in a
/// background task every `interval`, at most `max_retries` times.
pub async fn initialize_metrics(
    metrics: Arc<Metrics>,
    repository: Arc<dyn Repository>,
    source: Arc<dyn MetricsSource>,
    interval: Duration,
    max_retries: u32,
) -> Option<JoinHandle<()>> {
    match (repository.count_expenses().await, repository.count_categories().await) {
        (Ok(expenses), Ok(categories)) => metrics.seed_from_store(expenses, categories),
        (Err(e), _) | (_, Err(e)) => error!("Failed to initialize metrics from store: {}", e),
    }

    match restore_from(&metrics, source.as_ref()).await {
        Ok(()) => {
            info!("Metrics initialized from monitoring");
            return None;
        }
        Err(e) => error!("Failed to initialize metrics from monitoring, will retry periodically: {}", e),
    }

    if max_retries == 0 {
        metrics.set_init_state(MetricsInitState::GaveUp);
        return None;
    }

    Some(tokio::spawn(retry_restore(metrics, source, interval, max_retries)))
}

async fn retry_restore(metrics: Arc<Metrics>, source: Arc<dyn MetricsSource>, interval: Duration, max_retries: u32) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    for attempt in 1..=max_retries {
        metrics.set_init_state(MetricsInitState::Retrying(attempt));
        ticker.tick().await;
        info!("Retrying metric initialization, attempt {}", attempt);

        match restore_from(&metrics, source.as_ref()).await {
            Ok(()) => {
                info!("Metrics initialized from monitoring after {} attempts", attempt);
                return;
            }
            Err(e) => warn!("Metric initialization attempt {} failed: {}", attempt, e),
        }
    }

    error!("Max retries reached, giving up on metric initialization");
    metrics.set_init_state(MetricsInitState::GaveUp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakySource {
        fn failing(times: u32) -> Self {
            FlakySource {
                failures_left: AtomicU32::new(times),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MetricsSource for FlakySource {
        async fn check_health(&self) -> Result<(), MonitoringError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(MonitoringError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(())
        }

        async fn snapshot(&self) -> Result<MetricsSnapshot, MonitoringError> {
            let mut snapshot = MetricsSnapshot::default();
            snapshot.commands.insert("start".to_string(), 4);
            Ok(snapshot)
        }
    }

    #[test]
    fn parses_instant_vector() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"__name__":"telegram_errors_total","type":"database"},"value":[1700000000.1,"3"]},
            {"metric":{"__name__":"telegram_errors_total","type":"transcription"},"value":[1700000000.1,"2.0"]}
        ]}}"#;
        let values = parse_vector("telegram_errors_total", body, "type").unwrap();
        assert_eq!(values.get("database"), Some(&3));
        assert_eq!(values.get("transcription"), Some(&2));
    }

    #[test]
    fn reports_query_errors() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        assert!(matches!(
            parse_vector("x", body, "type"),
            Err(MonitoringError::Query { .. })
        ));
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_retry() {
        let metrics = Arc::new(Metrics::new());
        let repository: Arc<dyn Repository> = Arc::new(JsonRepository::in_memory());
        let source = Arc::new(FlakySource::failing(0));

        let handle = initialize_metrics(metrics.clone(), repository, source.clone(), Duration::from_millis(5), 3).await;
        assert!(handle.is_none());
        assert_eq!(metrics.init_state(), MetricsInitState::Initialized);
        assert_eq!(metrics.command_count("start"), 4);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let metrics = Arc::new(Metrics::new());
        let repository: Arc<dyn Repository> = Arc::new(JsonRepository::in_memory());
        let source = Arc::new(FlakySource::failing(2));

        let handle = initialize_metrics(metrics.clone(), repository, source.clone(), Duration::from_millis(5), 5)
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(metrics.init_state(), MetricsInitState::Initialized);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.command_count("start"), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let metrics = Arc::new(Metrics::new());
        let repository: Arc<dyn Repository> = Arc::new(JsonRepository::in_memory());
        let source = Arc::new(FlakySource::failing(100));

        let handle = initialize_metrics(metrics.clone(), repository, source.clone(), Duration::from_millis(5), 3)
            .await
            .unwrap();
        handle.await.unwrap();

        assert_eq!(metrics.init_state(), MetricsInitState::GaveUp);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(metrics.command_count("start"), 0);
    }
}
