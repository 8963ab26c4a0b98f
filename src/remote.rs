//! Public entry point for delegating to one backend.
//!
//! A [`Remote`] wraps the [`DelegatingSchema`] of a backend. Hand-written resolvers call
//! [`Remote::delegate_query`] and friends with their own [`ResolveInfo`]; the caller's
//! selection is rewritten into a backend document, executed through the delegating
//! schema and handed back as a [`Delegated`] value that still carries the backend's
//! partial errors.

use crate::annotation::{check_and_unwrap, AnnotatedTree, Unwrapped};
use crate::cache::SchemaCache;
use crate::error::{Error, Result};
use crate::extract::{path_of, ExtractedDocument, ResolveInfo};
use crate::link::{LinkContext, Operation, TransportLink};
use crate::introspection::TypeKind;
use crate::schema::{fail_field, into_field_value, ContextSink, DelegatingSchema, OutputShape, Sink};
use crate::types::{OperationType, RemoteError, RemoteResponse};
use async_graphql::dynamic::{FieldValue, Type};
use async_graphql::indexmap::IndexMap;
use async_graphql::{Context, Name, Variables};
use async_graphql_value::ConstValue;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Delegation facade for one backend
#[derive(Clone)]
pub struct Remote {
    schema: DelegatingSchema,
}

impl Remote {
    /// Remote for an endpoint whose schema is already in `cache`.
    ///
    /// Fails with [`Error::MissingTypeDefs`] when the endpoint was never introspected.
    pub fn new(cache: &SchemaCache, link: Arc<dyn TransportLink>) -> Result<Self> {
        let id = link.endpoint().clone();
        let introspected = cache
            .introspected(&id)
            .ok_or_else(|| Error::MissingTypeDefs(id.to_string()))?;
        let schema = cache.executable_schema(id.as_str(), introspected, link)?;
        Ok(Self { schema })
    }

    /// Introspect the endpoint through `cache` if needed, then build the remote
    pub async fn connect(cache: &SchemaCache, link: Arc<dyn TransportLink>) -> Result<Self> {
        cache.introspect(link.as_ref()).await?;
        Self::new(cache, link)
    }

    pub fn from_schema(schema: DelegatingSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &DelegatingSchema {
        &self.schema
    }

    /// Add `fragment` to forwarded selections of `type_name` that select `field_name`
    pub fn register_fragment(&self, type_name: &str, field_name: &str, fragment: &str) -> Result<()> {
        self.schema
            .extractor()
            .fragments()
            .register(type_name, field_name, fragment)
    }

    /// Send a raw document to the backend without rewriting it.
    ///
    /// Returns the response data, or the backend errors if there are any.
    pub async fn request(
        &self,
        query: &str,
        variables: Variables,
        operation_name: Option<&str>,
    ) -> Result<ConstValue> {
        let operation = Operation::new(query)
            .with_variables(variables)
            .with_operation_name(operation_name.map(str::to_string));
        let response = self.schema.link().execute(operation).await?;
        if response.has_errors() {
            return Err(Error::Remote(response.errors));
        }
        Ok(response.data.unwrap_or(ConstValue::Null))
    }

    pub async fn delegate_query(
        &self,
        field_name: &str,
        args: IndexMap<Name, ConstValue>,
        context: LinkContext,
        info: &ResolveInfo,
    ) -> Result<Delegated> {
        self.delegate(OperationType::Query, field_name, args, context, info)
            .await
    }

    pub async fn delegate_mutation(
        &self,
        field_name: &str,
        args: IndexMap<Name, ConstValue>,
        context: LinkContext,
        info: &ResolveInfo,
    ) -> Result<Delegated> {
        self.delegate(OperationType::Mutation, field_name, args, context, info)
            .await
    }

    /// Open a delegated subscription.
    ///
    /// Each item is one backend payload. Dropping the stream closes the backend
    /// subscription.
    pub async fn delegate_subscription(
        &self,
        field_name: &str,
        args: IndexMap<Name, ConstValue>,
        context: LinkContext,
        info: &ResolveInfo,
    ) -> Result<BoxStream<'static, Result<Delegated>>> {
        let (document, target) =
            self.prepare(OperationType::Subscription, field_name, &args, info)?;
        let key = document.response_key.clone();
        let request = into_request(document, context);

        let stream = self
            .schema
            .execute_stream(request)
            .map(move |response| {
                let unwrapped = check_and_unwrap(RemoteResponse::from_response(response), &key)?;
                Ok(Delegated::new(unwrapped, target.clone()))
            })
            .boxed();
        Ok(stream)
    }

    /// Backend types wired with merged resolvers, for a hand-written schema
    pub fn merged_types(&self) -> Vec<Type> {
        crate::schema::merged_types(self.schema.introspected())
    }

    async fn delegate(
        &self,
        kind: OperationType,
        field_name: &str,
        args: IndexMap<Name, ConstValue>,
        context: LinkContext,
        info: &ResolveInfo,
    ) -> Result<Delegated> {
        let (document, target) = self.prepare(kind, field_name, &args, info)?;
        let key = document.response_key.clone();
        tracing::debug!("Delegating {} {} as {}", kind, field_name, key);

        let response = self.schema.execute(into_request(document, context)).await;
        let unwrapped = check_and_unwrap(RemoteResponse::from_response(response), &key)?;
        Ok(Delegated::new(unwrapped, target))
    }

    fn prepare(
        &self,
        kind: OperationType,
        field_name: &str,
        args: &IndexMap<Name, ConstValue>,
        info: &ResolveInfo,
    ) -> Result<(ExtractedDocument, Target)> {
        let document = self.schema.extractor().extract(kind, field_name, args, info)?;
        let root = self.schema.introspected().root_type(kind)?;
        let field = root.field(field_name).ok_or_else(|| Error::UnknownField {
            type_name: root.name.clone(),
            field_name: field_name.to_string(),
        })?;
        let target = Target {
            shape: self.schema.shapes().shape_of(&field.ty),
            nullable: field.ty.kind != TypeKind::NonNull,
        };
        Ok((document, target))
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote").field("schema", &self.schema).finish()
    }
}

fn into_request(document: ExtractedDocument, context: LinkContext) -> async_graphql::Request {
    let query = document.query();
    async_graphql::Request::new(query)
        .variables(document.variables)
        .data(context)
}

/// Output type of the backend root field a call delegates to
#[derive(Debug, Clone)]
struct Target {
    shape: OutputShape,
    nullable: bool,
}

/// Result of a delegated call, with partial errors still attached
#[derive(Debug, Clone)]
pub struct Delegated {
    tree: AnnotatedTree,
    strays: Vec<RemoteError>,
    target: Target,
}

impl Delegated {
    fn new(unwrapped: Unwrapped, target: Target) -> Self {
        Self {
            tree: unwrapped.tree,
            strays: unwrapped.strays,
            target,
        }
    }

    /// Errors that were not addressed to the delegated field
    pub fn strays(&self) -> &[RemoteError] {
        &self.strays
    }

    /// Plain value, dropping any pending errors
    pub fn into_value(self) -> ConstValue {
        self.tree.into_value()
    }

    /// Value to return from the resolver that delegated.
    ///
    /// Stray errors are reported at the resolver's path; nested errors surface when
    /// the merged resolvers of [`Remote::merged_types`] resolve the fields they belong to.
    /// The caller schema should register [`NullPlaceholders`](crate::NullPlaceholders)
    /// so failed elements of composite lists read `null`.
    pub fn into_field_value(
        self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Option<FieldValue<'static>>> {
        let path = path_of(ctx);
        let mut sink = ContextSink::new(ctx);
        for stray in self.strays {
            sink.error(stray, &path);
        }
        match into_field_value(self.tree, &self.target.shape, &path, &mut sink) {
            Ok(value) => Ok(value),
            Err(error) => fail_field(ctx, error, &path, self.target.nullable),
        }
    }
}

/// SDL of a backend, introspecting it through `cache` if needed
pub async fn fetch_type_defs(cache: &SchemaCache, link: &dyn TransportLink) -> Result<String> {
    Ok(cache.introspect(link).await?.to_sdl())
}
