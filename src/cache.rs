//! Process-wide caches for introspected and compiled schemas.
//!
//! Introspection runs at most once per [`EndpointId`], even when several callers ask
//! for the same backend concurrently. Compiled [`DelegatingSchema`]s are cached per key
//! and rebound to the caller's link on every hit.

use crate::error::Result;
use crate::introspection::{introspect, IntrospectedSchema};
use crate::link::{EndpointId, TransportLink};
use crate::schema::{DelegatingSchema, DelegatingSchemaFactory};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

type IntrospectionCell = Arc<OnceCell<Arc<IntrospectedSchema>>>;

/// Injected cache shared by every remote of a gateway
#[derive(Clone, Default)]
pub struct SchemaCache {
    introspections: Arc<Mutex<HashMap<EndpointId, IntrospectionCell>>>,
    schemas: Arc<Mutex<HashMap<String, DelegatingSchema>>>,
    factory: DelegatingSchemaFactory,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `factory` to compile schemas on cache misses
    pub fn with_factory(mut self, factory: DelegatingSchemaFactory) -> Self {
        self.factory = factory;
        self
    }

    fn cell(&self, id: &EndpointId) -> IntrospectionCell {
        self.introspections
            .lock()
            .entry(id.clone())
            .or_default()
            .clone()
    }

    /// Introspected schema of the link's endpoint, fetched on first use
    pub async fn introspect(&self, link: &dyn TransportLink) -> Result<Arc<IntrospectedSchema>> {
        let cell = self.cell(link.endpoint());
        if let Some(schema) = cell.get() {
            tracing::debug!("Introspection cache hit for {}", link.endpoint());
            return Ok(schema.clone());
        }

        let schema = cell
            .get_or_try_init(|| async {
                let schema = introspect(link).await?;
                tracing::info!(
                    "Introspected {} ({} types)",
                    link.endpoint(),
                    schema.types().count()
                );
                Ok::<_, crate::error::Error>(Arc::new(schema))
            })
            .await?;
        Ok(schema.clone())
    }

    /// Seed the cache for `id` from SDL instead of introspecting
    pub fn insert_type_defs(
        &self,
        id: impl Into<EndpointId>,
        sdl: &str,
    ) -> Result<Arc<IntrospectedSchema>> {
        let schema = IntrospectedSchema::from_sdl(sdl)?;
        Ok(self.insert(id, schema))
    }

    /// Seed the cache for `id` with an already built schema
    pub fn insert(
        &self,
        id: impl Into<EndpointId>,
        schema: IntrospectedSchema,
    ) -> Arc<IntrospectedSchema> {
        let schema = Arc::new(schema);
        let cell = OnceCell::new_with(Some(schema.clone()));
        self.introspections
            .lock()
            .insert(id.into(), Arc::new(cell));
        schema
    }

    /// Cached schema for `id`, without fetching
    pub fn introspected(&self, id: &EndpointId) -> Option<Arc<IntrospectedSchema>> {
        self.introspections
            .lock()
            .get(id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Compiled schema for `key`.
    ///
    /// The first call compiles `schema` bound to `link`; later calls rebind the cached
    /// schema to `link` and return it.
    pub fn executable_schema(
        &self,
        key: &str,
        schema: Arc<IntrospectedSchema>,
        link: Arc<dyn TransportLink>,
    ) -> Result<DelegatingSchema> {
        let mut schemas = self.schemas.lock();
        if let Some(existing) = schemas.get(key) {
            existing.rebind(link);
            return Ok(existing.clone());
        }

        let built = self.factory.build(schema, link)?;
        schemas.insert(key.to_string(), built.clone());
        Ok(built)
    }
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoints: Vec<String> = self
            .introspections
            .lock()
            .keys()
            .map(EndpointId::to_string)
            .collect();
        f.debug_struct("SchemaCache")
            .field("endpoints", &endpoints)
            .field("schemas", &self.schemas.lock().len())
            .finish()
    }
}
