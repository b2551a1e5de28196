//! HTTP client for the Notion API.
//!
//! Every call carries an explicit timeout and is retried a bounded number of
//! times on transport errors, rate limiting and server errors. Client errors
//! other than 429 fail immediately.

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::Record;

use super::{ApiError, RecordSource};

/// Pause between consecutive page requests, to stay under the rate limit.
const PAGE_PAUSE: Duration = Duration::from_millis(350);

/// One page of a paginated list response.
#[derive(Debug, Deserialize)]
struct ListPage<T> {
    results: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl<T> ListPage<T> {
    fn cursor(&self) -> Option<&str> {
        if self.has_more {
            self.next_cursor.as_deref()
        } else {
            None
        }
    }
}

/// Blocking Notion API client.
pub struct NotionClient {
    agent: ureq::Agent,
    base_url: String,
    token: String,
    version: String,
    page_size: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl NotionClient {
    /// Build a client from configuration. Fails if no token is available.
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let token = config.token().ok_or(ApiError::MissingToken)?;
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout())
            .build();

        Ok(Self {
            agent,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            version: config.api_version.clone(),
            page_size: config.page_size,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        })
    }

    /// Send one request, retrying transient failures, and return the JSON body.
    fn send(
        &self,
        method: &str,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let mut attempt = 0;
        loop {
            let mut request = self
                .agent
                .request(method, url)
                .set("Authorization", &format!("Bearer {}", self.token))
                .set("Notion-Version", &self.version);
            for (key, value) in query {
                request = request.query(key, value);
            }

            let result = match body {
                Some(body) => request.send_json(body),
                None => request.call(),
            };

            let error = match result {
                Ok(response) => {
                    return response.into_json().map_err(|e| ApiError::Decode {
                        url: url.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(ureq::Error::Status(status, response)) => ApiError::Status {
                    url: url.to_string(),
                    status,
                    body: response.into_string().unwrap_or_default(),
                },
                Err(ureq::Error::Transport(transport)) => ApiError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                },
            };

            if !is_retryable(&error) || attempt >= self.max_retries {
                return Err(error);
            }
            attempt += 1;
            warn!(%error, attempt, max = self.max_retries, "request failed, retrying");
            thread::sleep(self.retry_delay);
        }
    }

    fn send_as<T: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let value = self.send(method, url, query, body)?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn is_retryable(error: &ApiError) -> bool {
    match error {
        ApiError::Transport { .. } => true,
        ApiError::Status { status, .. } => *status == 429 || *status >= 500,
        ApiError::Decode { .. } | ApiError::MissingToken => false,
    }
}

impl RecordSource for NotionClient {
    fn query(
        &self,
        collection: &str,
        filter_properties: Option<&[String]>,
        content_filter: Option<&Value>,
    ) -> Result<Vec<Record>, ApiError> {
        let url = format!("{}/databases/{collection}/query", self.base_url);
        let params: Vec<(&str, &str)> = filter_properties
            .unwrap_or_default()
            .iter()
            .map(|id| ("filter_properties", id.as_str()))
            .collect();

        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": self.page_size });
            if let Some(filter) = content_filter {
                body["filter"] = filter.clone();
            }
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }

            let page: ListPage<Record> = self.send_as("POST", &url, &params, Some(&body))?;
            debug!(collection, count = page.results.len(), has_more = page.has_more, "query page");
            cursor = page.cursor().map(String::from);
            records.extend(page.results);

            if cursor.is_none() {
                return Ok(records);
            }
            thread::sleep(PAGE_PAUSE);
        }
    }

    fn property_items(&self, record_id: &str, property_id: &str) -> Result<Vec<Value>, ApiError> {
        let url = format!("{}/pages/{record_id}/properties/{property_id}", self.base_url);
        let page_size = self.page_size.to_string();

        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![("page_size", page_size.as_str())];
            if let Some(cursor) = &cursor {
                params.push(("start_cursor", cursor.as_str()));
            }

            let response = self.send("GET", &url, &params, None)?;

            // Non-list property types come back as a single item.
            if response.get("object").and_then(Value::as_str) != Some("list") {
                items.push(response);
                return Ok(items);
            }

            let page: ListPage<Value> =
                serde_json::from_value(response).map_err(|e| ApiError::Decode {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            let next = page.cursor().map(String::from);
            items.extend(page.results);

            match next {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
            thread::sleep(PAGE_PAUSE);
        }
    }

    fn update_record(&self, record_id: &str, properties: &Value) -> Result<(), ApiError> {
        let url = format!("{}/pages/{record_id}", self.base_url);
        let body = json!({ "properties": properties });
        self.send("PATCH", &url, &[], Some(&body))?;
        Ok(())
    }
}
