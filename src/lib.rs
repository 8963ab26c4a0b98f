//! # graphql-remote
//!
//! Delegate fields of a local GraphQL schema to remote GraphQL backends.
//!
//! ## Features
//!
//! - **Introspection Cache**: One fetch per backend identity, shared by every caller
//! - **Delegating Schemas**: Executable `async-graphql` dynamic schemas that forward root fields
//! - **Selection Rewriting**: Caller selections become standalone backend documents
//! - **Partial Errors**: Backend errors surface at the caller path of the field they belong to
//!   and null only that field
//! - **Hybrid Transport**: Batched HTTP for queries and mutations, WebSocket for subscriptions
//!
//! ## Main Components
//!
//! - [`Remote`]: Delegation entry point for one backend.
//! - [`SchemaCache`]: Introspected and compiled schemas per backend.
//! - [`DelegatingSchemaFactory`]: Builds a [`DelegatingSchema`] from an [`IntrospectedSchema`].
//! - [`HybridLink`]: Routes operations over [`BatchedHttpLink`] or [`WebSocketLink`].
//! - [`Gateway`]: Several named backends sharing one cache.
//!
//! ## Example
//!
//! ```rust,no_run
//! use graphql_remote::{HybridLink, LinkContext, NullPlaceholders, Remote, ResolveInfo, SchemaCache};
//! use async_graphql::dynamic::{Field, FieldFuture, Object, Schema, TypeRef};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = SchemaCache::new();
//!     let link = HybridLink::new("http://localhost:4001/graphql")?;
//!     let remote = Arc::new(Remote::connect(&cache, Arc::new(link)).await?);
//!
//!     let blog = remote.clone();
//!     let posts = Field::new("posts", TypeRef::named_nn_list_nn("Post"), move |ctx| {
//!         let remote = blog.clone();
//!         FieldFuture::new(async move {
//!             let info = ResolveInfo::from_context(&ctx);
//!             let delegated = remote
//!                 .delegate_query("allPosts", Default::default(), LinkContext::new(), &info)
//!                 .await
//!                 .map_err(|e| e.to_resolver_error())?;
//!             delegated.into_field_value(&ctx)
//!         })
//!     });
//!
//!     let mut builder = Schema::build("Query", None, None)
//!         .register(Object::new("Query").field(posts))
//!         .extension(NullPlaceholders);
//!     for ty in remote.merged_types() {
//!         builder = builder.register(ty);
//!     }
//!     let schema = builder.finish()?;
//!
//!     let response = schema.execute("{ posts { id title } }").await;
//!     println!("{}", serde_json::to_string(&response)?);
//!     Ok(())
//! }
//! ```

pub mod annotation;
pub mod cache;
pub mod error;
pub mod extract;
pub mod fragments;
pub mod gateway;
pub mod http_link;
pub mod introspection;
pub mod link;
pub mod placeholders;
pub mod printer;
pub mod pubsub;
pub mod remote;
pub mod schema;
pub mod type_defs;
pub mod types;
pub mod ws_link;

pub use annotation::{
    annotate, check_and_unwrap, classify, Annotated, AnnotatedTree, FieldErrors, Unwrapped,
};
pub use cache::SchemaCache;
pub use error::{Error, Result};
pub use extract::{arguments_from, DocumentExtractor, ExtractedDocument, ResolveInfo};
pub use fragments::FragmentRegistry;
pub use gateway::{Gateway, GatewayBuilder, GatewayConfig};
pub use http_link::BatchedHttpLink;
pub use introspection::{introspect, IntrospectedSchema};
pub use link::{
    EndpointId, HybridLink, HybridLinkOptions, LinkContext, LinkResult, Operation,
    TransportLink,
};
pub use placeholders::NullPlaceholders;
pub use remote::{fetch_type_defs, Delegated, Remote};
pub use schema::{merged_types, DelegatingSchema, DelegatingSchemaFactory, TypeResolver};
pub use type_defs::collect_type_defs;
pub use types::{GraphQLRequest, OperationType, RemoteError, RemoteResponse};
pub use ws_link::{WebSocketLink, WebSocketProtocol};
