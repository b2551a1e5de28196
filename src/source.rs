//! The record store: where records are queried and updated.
//!
//! The engine only talks to the store through [`RecordSource`], so the
//! listener can be driven by the HTTP client in production and by an
//! in-memory fake in tests.

mod notion;

pub use notion::NotionClient;

use serde_json::Value;

use crate::model::Record;

/// Errors talking to the record store.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("no API token: set `api-token` in the config file or PAGEWATCH_API_TOKEN")]
    MissingToken,
}

/// Read and write access to the record store.
pub trait RecordSource {
    /// Every record in a collection matching the optional filters.
    ///
    /// `filter_properties` narrows which property ids are returned;
    /// `content_filter` narrows which records are returned.
    /// Pagination is followed to the end. Failure of any page fails the query.
    fn query(
        &self,
        collection: &str,
        filter_properties: Option<&[String]>,
        content_filter: Option<&Value>,
    ) -> Result<Vec<Record>, ApiError>;

    /// Every item of one record property, following pagination.
    ///
    /// Used to complete relation lists truncated at the store's page limit.
    fn property_items(&self, record_id: &str, property_id: &str) -> Result<Vec<Value>, ApiError>;

    /// Overwrite the given properties on a record.
    fn update_record(&self, record_id: &str, properties: &Value) -> Result<(), ApiError>;
}
