use crate::serializer::SafeSerializer;
use crate::sink::{BulkRequest, LogSink, SinkError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for [`ElasticsearchSink`].
#[derive(Clone, Debug)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster, e.g. "http://localhost:9200".
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Encoded API key, sent as `Authorization: ApiKey <key>`.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra attempts for transport errors and retryable statuses.
    pub max_retries: u32,
}

impl ElasticsearchConfig {
    pub fn new(url: impl Into<String>) -> Self {
        ElasticsearchConfig {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            timeout: Duration::from_millis(4000),
            max_retries: 3,
        }
    }
}

/// Elasticsearch sink that sends batches through the HTTP `_bulk` API.
///
/// Every document line goes through [`SafeSerializer`], so oversized
/// strings are truncated before they hit the wire.
#[derive(Clone)]
pub struct ElasticsearchSink {
    client: Client,
    config: ElasticsearchConfig,
    serializer: SafeSerializer,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl ElasticsearchSink {
    pub fn new(config: ElasticsearchConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Request(e.to_string()))?;

        Ok(ElasticsearchSink {
            client,
            config,
            serializer: SafeSerializer::new(),
        })
    }

    fn endpoint(&self, index: &str) -> String {
        format!(
            "{}/{}/_bulk",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(index)
        )
    }

    async fn send_once(&self, url: &str, body: &str) -> Result<(), Attempt> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "application/x-ndjson")
            .body(body.to_string());

        if let Some(api_key) = &self.config.api_key {
            req = req.header("Authorization", format!("ApiKey {}", api_key));
        } else if let Some(username) = &self.config.username {
            req = req.basic_auth(username, self.config.password.as_ref());
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return Err(Attempt::Retry(SinkError::Request(e.to_string()))),
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            let err = SinkError::Status {
                status: status.as_u16(),
                body: text,
            };
            return Err(if is_retryable(status) {
                Attempt::Retry(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        // Item-level rejections do not fail the request; the store already
        // took the rest of the batch.
        match resp.json::<BulkResponse>().await {
            Ok(parsed) if parsed.errors => {
                let rejected = parsed
                    .items
                    .iter()
                    .filter(|item| item.as_object().into_iter().flat_map(|o| o.values()).any(|v| v.get("error").is_some()))
                    .count();
                warn!(rejected, total = parsed.items.len(), "bulk request had rejected documents");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "could not parse bulk response"),
        }

        Ok(())
    }
}

enum Attempt {
    Retry(SinkError),
    Fatal(SinkError),
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[async_trait]
impl LogSink for ElasticsearchSink {
    async fn bulk(&self, request: &BulkRequest) -> Result<(), SinkError> {
        let url = self.endpoint(&request.index);
        let body = request.to_ndjson(&self.serializer);

        let mut attempt = 0;
        loop {
            match self.send_once(&url, &body).await {
                Ok(()) => return Ok(()),
                Err(Attempt::Retry(e)) if attempt < self.config.max_retries => {
                    attempt += 1;
                    debug!(error = %e, attempt, "retrying bulk request");
                    sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(Attempt::Retry(e)) | Err(Attempt::Fatal(e)) => return Err(e),
            }
        }
    }
}
