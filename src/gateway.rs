//! Gateway builder and multi-backend orchestration

use crate::cache::SchemaCache;
use crate::error::{Error, Result};
use crate::link::{HybridLink, HybridLinkOptions, TransportLink};
use crate::remote::Remote;
use async_graphql::indexmap::IndexMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Main Gateway struct - one [`Remote`] per named backend
pub struct Gateway {
    remotes: IndexMap<String, Remote>,
    cache: SchemaCache,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Remote for a backend by name
    pub fn remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.get(name)
    }

    /// Backend names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.remotes.keys().map(String::as_str)
    }

    /// Cache shared by every backend of this gateway
    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("backends", &self.remotes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Serializable gateway configuration, keyed by backend name
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub backends: BTreeMap<String, HybridLinkOptions>,
}

impl GatewayConfig {
    /// Load the configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

struct Backend {
    name: String,
    link: Arc<dyn TransportLink>,
    type_defs: Option<String>,
}

struct PendingFragment {
    backend: String,
    type_name: String,
    field_name: String,
    fragment: String,
}

/// Builder for creating a Gateway
pub struct GatewayBuilder {
    backends: Vec<Backend>,
    fragments: Vec<PendingFragment>,
    cache: Option<SchemaCache>,
}

impl GatewayBuilder {
    /// Create a new gateway builder
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            fragments: Vec::new(),
            cache: None,
        }
    }

    /// Add a backend; its schema is introspected when the gateway is built
    pub fn add_backend(mut self, name: impl Into<String>, link: Arc<dyn TransportLink>) -> Self {
        self.backends.push(Backend {
            name: name.into(),
            link,
            type_defs: None,
        });
        self
    }

    /// Add a backend whose schema is given as SDL instead of introspected
    pub fn add_backend_with_type_defs(
        mut self,
        name: impl Into<String>,
        link: Arc<dyn TransportLink>,
        sdl: impl Into<String>,
    ) -> Self {
        self.backends.push(Backend {
            name: name.into(),
            link,
            type_defs: Some(sdl.into()),
        });
        self
    }

    /// Share an existing schema cache
    pub fn with_cache(mut self, cache: SchemaCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register an inline fragment on a backend once it is built
    pub fn register_fragment(
        mut self,
        backend: impl Into<String>,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        self.fragments.push(PendingFragment {
            backend: backend.into(),
            type_name: type_name.into(),
            field_name: field_name.into(),
            fragment: fragment.into(),
        });
        self
    }

    /// Add one [`HybridLink`] backend per configured entry
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let mut builder = Self::new();
        for (name, options) in &config.backends {
            let link = HybridLink::from_options(options)?;
            builder = builder.add_backend(name.clone(), Arc::new(link));
        }
        Ok(builder)
    }

    /// Build the gateway, introspecting every backend that has no SDL
    pub async fn build(self) -> Result<Gateway> {
        if self.backends.is_empty() {
            return Err(Error::InvalidRequest(
                "a gateway needs at least one backend".into(),
            ));
        }
        let cache = self.cache.unwrap_or_default();

        for backend in &self.backends {
            if let Some(sdl) = &backend.type_defs {
                cache.insert_type_defs(backend.link.endpoint().clone(), sdl)?;
            }
        }
        futures::future::try_join_all(
            self.backends
                .iter()
                .filter(|backend| backend.type_defs.is_none())
                .map(|backend| cache.introspect(backend.link.as_ref())),
        )
        .await?;

        let mut remotes = IndexMap::new();
        for backend in self.backends {
            let remote = Remote::new(&cache, backend.link)?;
            tracing::info!("Backend {} ready", backend.name);
            remotes.insert(backend.name, remote);
        }

        for pending in self.fragments {
            let remote = remotes.get(&pending.backend).ok_or_else(|| {
                Error::InvalidRequest(format!("unknown backend {}", pending.backend))
            })?;
            remote.register_fragment(&pending.type_name, &pending.field_name, &pending.fragment)?;
        }

        Ok(Gateway { remotes, cache })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
