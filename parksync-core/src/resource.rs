//! Remote resources
//!
//! `RemoteResource` is the only seam between the sync core and the network.
//! The HTTP implementation normalizes every response envelope before it
//! leaves this module; callers see `Page`, `MutationAck` or a `SyncError`.
//!
//! Nothing here retries.

use crate::config::{ResourceConfig, SyncConfig};
use crate::envelope::{error_from_response, parse_ack, parse_page};
use crate::error::SyncError;
use crate::models::{Fields, MutationAck, Page, Query};
use reqwest::{Client, RequestBuilder, Url};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// One collection endpoint of the remote API
pub trait RemoteResource: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn id_field(&self) -> &str;

    fn fetch_all(&self, query: &Query) -> impl Future<Output = Result<Page, SyncError>> + Send;

    fn create(&self, payload: &Fields)
        -> impl Future<Output = Result<MutationAck, SyncError>> + Send;

    /// `patch` is partial; the server merges it.
    fn update(
        &self,
        id: &str,
        patch: &Fields,
    ) -> impl Future<Output = Result<MutationAck, SyncError>> + Send;

    /// A second removal of the same id fails with `NotFound`.
    fn remove(&self, id: &str) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Shared HTTP client: base URL, timeout and the opaque bearer token
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Arc<str>,
    bearer_token: Option<Arc<str>>,
}

impl ApiClient {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("parksync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::network(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').into(),
            bearer_token: config.bearer_token.as_deref().map(Arc::from),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resource(&self, config: &ResourceConfig) -> HttpResource {
        HttpResource {
            client: self.clone(),
            name: config.name.clone(),
            endpoint: format!("{}/{}", self.base_url, config.endpoint.trim_start_matches('/')),
            id_field: config.id_field.clone(),
            collection_keys: config.collection_keys.clone(),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

pub struct HttpResource {
    client: ApiClient,
    name: String,
    endpoint: String,
    id_field: String,
    collection_keys: Vec<String>,
}

impl HttpResource {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Item URL with `id` percent-encoded as a single path segment
    fn item_url(&self, id: &str) -> Result<Url, SyncError> {
        let invalid = || SyncError::network(format!("invalid endpoint URL {}", self.endpoint));
        let mut url = Url::parse(&self.endpoint).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    /// Sends the request; a non-2xx status becomes the matching `SyncError`.
    async fn send(&self, request: RequestBuilder, target: Option<&str>) -> Result<Vec<u8>, SyncError> {
        let response = self.client.authorize(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            debug!("[{}] HTTP {} from server", self.name, status.as_u16());
            return Err(error_from_response(status.as_u16(), &body, target));
        }
        Ok(body.to_vec())
    }
}

impl RemoteResource for HttpResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn id_field(&self) -> &str {
        &self.id_field
    }

    async fn fetch_all(&self, query: &Query) -> Result<Page, SyncError> {
        let request = self.client.http.get(&self.endpoint).query(query.pairs());
        let body = self.send(request, None).await?;
        parse_page(&body, &self.id_field, &self.collection_keys)
    }

    async fn create(&self, payload: &Fields) -> Result<MutationAck, SyncError> {
        let request = self.client.http.post(&self.endpoint).json(payload);
        let body = self.send(request, None).await?;
        parse_ack(&body, &self.id_field)
    }

    async fn update(&self, id: &str, patch: &Fields) -> Result<MutationAck, SyncError> {
        let request = self.client.http.put(self.item_url(id)?).json(patch);
        let body = self.send(request, Some(id)).await?;
        parse_ack(&body, &self.id_field)
    }

    async fn remove(&self, id: &str) -> Result<(), SyncError> {
        let request = self.client.http.delete(self.item_url(id)?);
        let body = self.send(request, Some(id)).await?;
        // `{success: false}` on a 200 is still a failure
        parse_ack(&body, &self.id_field).map(|_| ())
    }
}
