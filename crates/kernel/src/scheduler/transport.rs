//! Boundaries to the network transport and the result consumer.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::request::RequestParams;

/// A request as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedRequest {
    pub layer_id: String,
    /// Scheduler generation the request belongs to.
    pub generation: u64,
    pub params: RequestParams,
}

/// Executes requests. Retries and HTTP details live behind this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a request and return the raw response body.
    async fn fetch(&self, request: IssuedRequest) -> Result<String, TransportError>;

    /// Best-effort cancellation, called before a replacement request starts.
    /// A completion that arrives anyway is discarded by generation.
    fn abort(&self, _layer_id: &str, _generation: u64) {}
}

/// Receives what a data source should display.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, layer_id: &str, generation: u64, body: String);

    /// Drop previously delivered results.
    fn clear(&self, layer_id: &str);

    fn failed(&self, _layer_id: &str, _generation: u64, _error: &TransportError) {}
}
