//! # Broker Management API Client
//!
//! HTTP client for the RabbitMQ management plugin. Used for queue
//! statistics and for dead-letter requeue through a dynamic shovel, which
//! moves messages broker-side without consuming them into this process.

use std::time::Duration;

use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::errors::{ManagementError, RequeueError};
use super::transport::{QueueInfo, RequeueOptions, RequeueResult};
use crate::config::ManagementConfig;
use crate::constants::requeue::*;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue fields returned by `GET /api/queues/{vhost}/{name}`
#[derive(Debug, Clone, Deserialize)]
struct QueueStats {
    name: String,
    #[serde(default)]
    messages: u64,
    #[serde(default)]
    consumers: u64,
    #[serde(default)]
    state: Option<String>,
}

/// Dynamic shovel definition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShovelDefinition {
    pub src_protocol: String,
    pub src_uri: String,
    pub src_queue: String,
    pub dest_protocol: String,
    pub dest_uri: String,
    pub dest_queue: String,
    pub ack_mode: String,
    /// A message count, or `"queue-length"` to drain what is present now
    pub src_delete_after: Value,
}

impl ShovelDefinition {
    pub fn new(vhost: &str, source: &str, destination: &str, count: Option<u64>) -> Self {
        let uri = local_broker_uri(vhost);
        Self {
            src_protocol: SHOVEL_PROTOCOL.to_string(),
            src_uri: uri.clone(),
            src_queue: source.to_string(),
            dest_protocol: SHOVEL_PROTOCOL.to_string(),
            dest_uri: uri,
            dest_queue: destination.to_string(),
            ack_mode: ACK_MODE_ON_CONFIRM.to_string(),
            src_delete_after: match count {
                Some(count) => Value::from(count),
                None => Value::from(DELETE_AFTER_QUEUE_LENGTH),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ShovelParameter<'a> {
    value: &'a ShovelDefinition,
}

/// Deterministic shovel name for a source queue
pub fn shovel_name(source_queue: &str) -> String {
    format!("{SHOVEL_NAME_PREFIX}{source_queue}")
}

/// Shovel URI pointing at the broker the shovel runs on
fn local_broker_uri(vhost: &str) -> String {
    if vhost == "/" {
        "amqp://".to_string()
    } else {
        format!("amqp:///{}", encode_component(vhost))
    }
}

fn encode_component(input: &str) -> String {
    input
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            other => format!("%{other:02X}"),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ManagementClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
    vhost: String,
}

impl ManagementClient {
    pub fn new(config: &ManagementConfig) -> Result<Self, ManagementError> {
        let base_url = Url::parse(&config.url)
            .map_err(|e| ManagementError::invalid_url(&config.url, e.to_string()))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("arnavon/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ManagementError::from)?;

        Ok(Self {
            http,
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
            vhost: config.vhost.clone(),
        })
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    /// Build `{base}/api/{segments...}`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ManagementError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ManagementError::invalid_url(self.base_url.as_str(), "cannot be a base"))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&impl Serialize>,
    ) -> Result<reqwest::Response, ManagementError> {
        debug!("Management API {} {}", method, url);
        let mut request = self
            .http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ManagementError::from)?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ManagementError::authentication(format!(
                    "credentials for user '{}' were refused ({})",
                    self.username,
                    response.status()
                )))
            }
            _ => Ok(response),
        }
    }

    async fn unexpected(endpoint: &Url, response: reqwest::Response) -> ManagementError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ManagementError::UnexpectedResponse {
            endpoint: endpoint.path().to_string(),
            status,
            body,
        }
    }

    /// Queue statistics, `None` when the queue does not exist
    pub async fn queue_info(&self, queue_name: &str) -> Result<Option<QueueInfo>, ManagementError> {
        let url = self.endpoint(&["queues", &self.vhost, queue_name])?;
        let response = self.send(Method::GET, url.clone(), None::<&()>).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let stats: QueueStats = response.json().await.map_err(ManagementError::from)?;
                Ok(Some(QueueInfo {
                    name: stats.name,
                    messages: stats.messages,
                    consumers: stats.consumers,
                    state: stats.state.unwrap_or_else(|| "running".to_string()),
                }))
            }
            _ => Err(Self::unexpected(&url, response).await),
        }
    }

    pub async fn queues_info(&self, queue_names: &[String]) -> Result<Vec<QueueInfo>, ManagementError> {
        let mut infos = Vec::with_capacity(queue_names.len());
        for name in queue_names {
            let info = self
                .queue_info(name)
                .await?
                .unwrap_or_else(|| QueueInfo::not_found(name.as_str()));
            infos.push(info);
        }
        Ok(infos)
    }

    pub async fn shovel_exists(&self, name: &str) -> Result<bool, ManagementError> {
        let url = self.endpoint(&["parameters", "shovel", &self.vhost, name])?;
        let response = self.send(Method::GET, url.clone(), None::<&()>).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::unexpected(&url, response).await),
        }
    }

    pub async fn create_shovel(
        &self,
        name: &str,
        definition: &ShovelDefinition,
    ) -> Result<(), ManagementError> {
        let url = self.endpoint(&["parameters", "shovel", &self.vhost, name])?;
        let body = ShovelParameter { value: definition };
        let response = self.send(Method::PUT, url.clone(), Some(&body)).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
            let text = response.text().await.unwrap_or_default();
            let lowered = text.to_lowercase();
            if lowered.contains("shovel") || lowered.contains("component not found") {
                return Err(ManagementError::ShovelUnavailable);
            }
            return Err(ManagementError::UnexpectedResponse {
                endpoint: url.path().to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        Err(Self::unexpected(&url, response).await)
    }

    /// Start a broker-side transfer from `source_queue` to the destination
    ///
    /// Returns once the shovel is created; the transfer itself completes in
    /// the background.
    pub async fn requeue(
        &self,
        source_queue: &str,
        options: &RequeueOptions,
    ) -> Result<RequeueResult, RequeueError> {
        options.validate()?;
        let name = shovel_name(source_queue);

        if self.shovel_exists(&name).await? {
            warn!(source = source_queue, shovel = %name, "Requeue already in progress");
            return Err(RequeueError::InProgress {
                source_queue: source_queue.to_string(),
            });
        }

        if self.queue_info(&options.destination_queue).await?.is_none() {
            return Err(RequeueError::DestinationNotFound {
                queue: options.destination_queue.clone(),
            });
        }

        let source = self
            .queue_info(source_queue)
            .await?
            .ok_or_else(|| RequeueError::SourceNotFound {
                queue: source_queue.to_string(),
            })?;
        if source.messages == 0 {
            info!(source = source_queue, "Nothing to requeue");
            return Ok(RequeueResult::completed(0));
        }

        let definition = ShovelDefinition::new(
            &self.vhost,
            source_queue,
            &options.destination_queue,
            options.count,
        );
        self.create_shovel(&name, &definition).await?;

        let estimate = options
            .count
            .map_or(source.messages, |count| count.min(source.messages));
        info!(
            source = source_queue,
            destination = %options.destination_queue,
            estimate,
            "Requeue initiated"
        );
        Ok(RequeueResult::initiated(estimate))
    }
}
