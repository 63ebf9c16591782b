//! Facade wiring transport, credentials, batching and pagination from a [`Config`].

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::batch::{BatchDispatcher, KeyedValue};
use crate::command::{Command, CommandQueue};
use crate::config::{Config, StorageBackend};
use crate::error::{Error, Result};
use crate::net::{ErrorCodes, HttpClient, HttpTransport, RetryPolicy, Transport, TransportClient};
use crate::oauth::{
    AuthToken, CredentialCoordinator, FileTokenStorage, MemoryTokenStorage, OAuthRefresher,
    TokenRefresher, TokenStorage,
};
use crate::pagination::{ListItem, PaginationDriver, PaginationSettings};
use crate::sequence::ResultSequence;

/// Entry point for callers: one endpoint, one credential.
///
/// Cheap to clone; clones share the transport and the credential.
#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<Config>,
    transport: Arc<TransportClient>,
    dispatcher: BatchDispatcher,
    pagination: PaginationDriver,
}

impl Client {
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// A fresh, empty queue for [`Client::batch`].
    pub fn queue(&self) -> CommandQueue {
        CommandQueue::new()
    }

    /// One non-batched call.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.transport.call(method, params).await
    }

    /// Drain `queue` into lazily dispatched batch chunks.
    pub fn batch(&self, queue: &mut CommandQueue) -> ResultSequence<KeyedValue> {
        self.dispatcher.dispatch(queue)
    }

    pub fn paginate(&self, method: &str, params: Value) -> Result<ResultSequence<Value>> {
        self.pagination.paginate(method, params)
    }

    pub fn paginate_many(&self, lists: Vec<Command>) -> Result<ResultSequence<ListItem>> {
        self.pagination.paginate_many(lists)
    }

    pub async fn total(&self, method: &str, params: Value) -> Result<Option<u64>> {
        self.pagination.total(method, params).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<CredentialCoordinator> {
        self.transport.coordinator()
    }

    pub fn transport(&self) -> &Arc<TransportClient> {
        &self.transport
    }

    pub fn dispatcher(&self) -> &BatchDispatcher {
        &self.dispatcher
    }

    pub fn pagination(&self) -> &PaginationDriver {
        &self.pagination
    }
}

/// Builder for [`Client`].
///
/// Every collaborator defaults to what the config describes; tests and
/// embedders can swap any of them.
pub struct ClientBuilder {
    config: Config,
    token: Option<AuthToken>,
    transport: Option<Arc<dyn Transport>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    storage: Option<Arc<dyn TokenStorage>>,
}

impl ClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            token: None,
            transport: None,
            refresher: None,
            storage: None,
        }
    }

    /// Start from this token instead of loading one from storage.
    pub fn with_token(mut self, token: AuthToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn build(self) -> Result<Client> {
        let config = self.config;
        config.validate()?;

        let http = HttpClient::from_config(&config.endpoint);

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(http.inner().clone(), config.endpoint.url.clone())),
        };

        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(r) => r,
            None => {
                let token_url = config.credentials.token_url.clone().ok_or_else(|| {
                    Error::Config("credentials.token_url is required to renew credentials".into())
                })?;
                Arc::new(
                    OAuthRefresher::new(http.inner().clone(), token_url).with_client_credentials(
                        config.credentials.client_id.clone(),
                        config.credentials.client_secret.clone(),
                    ),
                )
            }
        };

        let storage: Arc<dyn TokenStorage> = match self.storage {
            Some(s) => s,
            None => match config.credentials.storage_backend {
                StorageBackend::File => {
                    Arc::new(FileTokenStorage::new(config.credentials.token_storage_dir.clone()))
                }
                StorageBackend::Memory => Arc::new(MemoryTokenStorage::new()),
            },
        };

        let profile = config.credentials.profile.clone();
        let coordinator = match self.token {
            Some(token) => CredentialCoordinator::new(token, refresher)
                .with_storage(storage)
                .with_profile(profile),
            None => CredentialCoordinator::from_storage(storage, &profile, refresher)?,
        };

        let transport = Arc::new(
            TransportClient::new(transport, Arc::new(coordinator))
                .with_retry_policy(RetryPolicy::from_config(&config.retry))
                .with_error_codes(ErrorCodes::from_config(&config.protocol)),
        );
        let dispatcher = BatchDispatcher::new(Arc::clone(&transport), config.batch.max_chunk_size)?;
        let pagination = PaginationDriver::new(
            dispatcher.clone(),
            PaginationSettings::from_config(&config.pagination),
        )?;

        info!(
            endpoint = %config.endpoint.url,
            max_chunk_size = config.batch.max_chunk_size,
            page_size = config.pagination.page_size,
            "Client ready"
        );

        Ok(Client {
            config: Arc::new(config),
            transport,
            dispatcher,
            pagination,
        })
    }
}
