//! Locally executable schemas that forward to a backend.
//!
//! [`DelegatingSchemaFactory::build`] turns an [`IntrospectedSchema`] into an
//! `async-graphql` dynamic schema. Root query and mutation fields forward their own
//! selection to the backend through a [`TransportLink`] and subscription fields open a
//! backend stream. Every other object field is a merged resolver: it reads its value
//! from the parent and raises the backend errors addressed to it.

use crate::annotation::{
    annotate, check_and_unwrap, classify, Annotated, AnnotatedTree, FieldErrors, Unwrapped,
};
use crate::error::{Error, Result};
use crate::extract::{path_of, DocumentExtractor, ResolveInfo};
use crate::fragments::FragmentRegistry;
use crate::introspection::{
    is_builtin_scalar, FieldDef, FullType, InputValueDef, IntrospectedSchema,
    IntrospectionTypeRef, TypeKind,
};
use crate::link::{LinkContext, TransportLink};
use crate::placeholders::{NullPlaceholders, Nulled, NulledPaths};
use crate::pubsub::{SubscriptionHub, SubscriptionId};
use crate::types::{OperationType, RemoteError, RemoteResponse};
use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputObject, InputValue, Interface,
    InterfaceField, Object, ResolverContext, Scalar, Schema as AsyncSchema, Subscription,
    SubscriptionField, SubscriptionFieldFuture, Type, Union,
};
use async_graphql::indexmap::IndexMap;
use async_graphql::{Context, Name, PathSegment};
use async_graphql_value::ConstValue;
use futures::stream::{BoxStream, Stream};
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub(crate) type SharedLink = Arc<RwLock<Arc<dyn TransportLink>>>;

/// Executable schema whose root fields delegate to a backend
#[derive(Clone)]
pub struct DelegatingSchema {
    inner: AsyncSchema,
    introspected: Arc<IntrospectedSchema>,
    shapes: Arc<ShapeTable>,
    forwarding: Arc<Forwarding>,
}

impl DelegatingSchema {
    /// Execute a GraphQL request.
    ///
    /// A [`LinkContext`] attached as request data is forwarded with every backend call.
    pub async fn execute(&self, request: async_graphql::Request) -> async_graphql::Response {
        self.inner.execute(request).await
    }

    /// Execute a subscription request
    pub fn execute_stream(
        &self,
        request: async_graphql::Request,
    ) -> BoxStream<'static, async_graphql::Response> {
        self.inner.execute_stream(request).boxed()
    }

    /// Swap the transport used by every forwarding resolver.
    ///
    /// Calls already in flight finish on the previous link.
    pub fn rebind(&self, link: Arc<dyn TransportLink>) {
        tracing::info!("Rebinding delegating schema to {}", link.endpoint());
        *self.forwarding.link.write() = link;
    }

    /// Link currently used for forwarding
    pub fn link(&self) -> Arc<dyn TransportLink> {
        self.forwarding.link()
    }

    /// Access the executor (used for HTTP/WS integration)
    pub fn executor(&self) -> AsyncSchema {
        self.inner.clone()
    }

    pub fn sdl(&self) -> String {
        self.inner.sdl()
    }

    pub fn introspected(&self) -> &Arc<IntrospectedSchema> {
        &self.introspected
    }

    pub fn extractor(&self) -> &DocumentExtractor {
        &self.forwarding.extractor
    }

    /// Number of backend subscriptions currently open
    pub fn active_subscriptions(&self) -> usize {
        self.forwarding.hub.len()
    }

    pub(crate) fn shapes(&self) -> &ShapeTable {
        &self.shapes
    }
}

impl std::fmt::Debug for DelegatingSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingSchema")
            .field("endpoint", &self.link().endpoint().to_string())
            .field("types", &self.introspected.types().count())
            .finish()
    }
}

/// Builds [`DelegatingSchema`]s from introspected backends
#[derive(Clone, Default)]
pub struct DelegatingSchemaFactory {
    fragments: FragmentRegistry,
}

impl DelegatingSchemaFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragments spliced into forwarded selections
    pub fn with_fragments(mut self, fragments: FragmentRegistry) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn build(
        &self,
        introspected: Arc<IntrospectedSchema>,
        link: Arc<dyn TransportLink>,
    ) -> Result<DelegatingSchema> {
        let query = introspected.root_type(OperationType::Query)?;
        let mutation = optional_root(&introspected, OperationType::Mutation)?;
        let subscription = optional_root(&introspected, OperationType::Subscription)?;

        let shapes = Arc::new(ShapeTable::new(&introspected));
        let forwarding = Arc::new(Forwarding {
            extractor: DocumentExtractor::new(introspected.clone(), self.fragments.clone()),
            link: Arc::new(RwLock::new(link)),
            hub: SubscriptionHub::new(),
        });

        let mut schema_builder = AsyncSchema::build(
            &query.name,
            mutation.map(|ty| ty.name.as_str()),
            subscription.map(|ty| ty.name.as_str()),
        )
        .extension(NullPlaceholders);

        schema_builder = schema_builder.register(forwarding_object(
            OperationType::Query,
            query,
            &shapes,
            &forwarding,
        ));
        if let Some(mutation) = mutation {
            schema_builder = schema_builder.register(forwarding_object(
                OperationType::Mutation,
                mutation,
                &shapes,
                &forwarding,
            ));
        }
        if let Some(subscription) = subscription {
            let mut root = Subscription::new(&subscription.name);
            for field in &subscription.fields {
                root = root.field(subscription_field(
                    field,
                    shapes.shape_of(&field.ty),
                    forwarding.clone(),
                ));
            }
            schema_builder = schema_builder.register(root);
        }

        for ty in merged_types_with(&introspected, &shapes) {
            schema_builder = schema_builder.register(ty);
        }

        let schema = schema_builder
            .finish()
            .map_err(|e| Error::Schema(format!("failed to build schema: {e}")))?;

        tracing::info!(
            "Built delegating schema for {} ({} types)",
            forwarding.link().endpoint(),
            introspected.types().count()
        );

        Ok(DelegatingSchema {
            inner: schema,
            introspected,
            shapes,
            forwarding,
        })
    }

    /// Swap the transport of an existing schema without rebuilding its types
    pub fn rebind(schema: &DelegatingSchema, link: Arc<dyn TransportLink>) {
        schema.rebind(link);
    }
}

impl std::fmt::Debug for DelegatingSchemaFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatingSchemaFactory")
            .field("fragments", &self.fragments)
            .finish()
    }
}

fn optional_root(schema: &IntrospectedSchema, kind: OperationType) -> Result<Option<&FullType>> {
    match schema.root_type(kind) {
        Ok(ty) => Ok(Some(ty)),
        Err(Error::MissingRootType(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Non-root types of a backend wired with merged resolvers.
///
/// Register them into a hand-written dynamic schema whose resolvers return delegated
/// values so nested fields resolve and raise backend errors. That schema should also
/// register the [`NullPlaceholders`] extension.
pub fn merged_types(schema: &IntrospectedSchema) -> Vec<Type> {
    merged_types_with(schema, &ShapeTable::new(schema))
}

fn merged_types_with(schema: &IntrospectedSchema, shapes: &ShapeTable) -> Vec<Type> {
    let mut types = Vec::new();
    for ty in schema.types() {
        if ty.is_introspection() || schema.is_root_type(&ty.name) {
            continue;
        }
        match ty.kind {
            TypeKind::Scalar if !is_builtin_scalar(&ty.name) => {
                let mut scalar = Scalar::new(&ty.name);
                if let Some(description) = &ty.description {
                    scalar = scalar.description(description);
                }
                types.push(scalar.into());
            }
            TypeKind::Object => {
                let mut object = Object::new(&ty.name);
                if let Some(description) = &ty.description {
                    object = object.description(description);
                }
                for interface in &ty.interfaces {
                    object = object.implement(interface.named_type());
                }
                for field in &ty.fields {
                    object = object.field(merged_field(field, shapes.shape_of(&field.ty)));
                }
                types.push(object.into());
            }
            TypeKind::Interface => {
                let mut interface = Interface::new(&ty.name);
                for field in &ty.fields {
                    let mut interface_field =
                        InterfaceField::new(&field.name, field.ty.to_type_ref());
                    for arg in &field.args {
                        interface_field = interface_field.argument(input_value(arg));
                    }
                    interface = interface.field(interface_field);
                }
                types.push(interface.into());
            }
            TypeKind::Union => {
                let mut union = Union::new(&ty.name);
                for member in &ty.possible_types {
                    union = union.possible_type(member.named_type());
                }
                types.push(union.into());
            }
            TypeKind::Enum => {
                let mut en = Enum::new(&ty.name);
                for value in &ty.enum_values {
                    let mut item = EnumItem::new(&value.name);
                    if let Some(description) = &value.description {
                        item = item.description(description);
                    }
                    en = en.item(item);
                }
                types.push(en.into());
            }
            TypeKind::InputObject => {
                let mut input = InputObject::new(&ty.name);
                for field in &ty.input_fields {
                    input = input.field(input_value(field));
                }
                types.push(input.into());
            }
            TypeKind::Scalar | TypeKind::List | TypeKind::NonNull => {}
        }
    }
    types
}

fn input_value(def: &InputValueDef) -> InputValue {
    let mut value = InputValue::new(&def.name, def.ty.to_type_ref());
    if let Some(description) = &def.description {
        value = value.description(description);
    }
    if let Some(default) = def.default_const() {
        value = value.default_value(default);
    }
    value
}

fn with_field_metadata(mut field: Field, def: &FieldDef) -> Field {
    if let Some(description) = &def.description {
        field = field.description(description);
    }
    if def.is_deprecated {
        field = field.deprecation(def.deprecation_reason.as_deref());
    }
    for arg in &def.args {
        field = field.argument(input_value(arg));
    }
    field
}

/// Discriminator lookup table of an interface or union
#[derive(Debug, Clone)]
pub struct TypeResolver {
    abstract_type: String,
    members: HashMap<String, String>,
}

impl TypeResolver {
    pub fn new(ty: &FullType) -> Self {
        let members = ty
            .possible_types
            .iter()
            .map(|member| {
                let name = member.named_type().to_string();
                (name.clone(), name)
            })
            .collect();
        Self {
            abstract_type: ty.name.clone(),
            members,
        }
    }

    /// Member used for the placeholder of a failed value
    pub(crate) fn placeholder(&self) -> Option<&str> {
        self.members.keys().min().map(String::as_str)
    }

    /// Concrete type of `value`, read from its `__typename`
    pub fn resolve(&self, value: &ConstValue) -> Result<&str> {
        let discriminator = match value {
            ConstValue::Object(map) => match map.get("__typename") {
                Some(ConstValue::String(name)) => Some(name.as_str()),
                _ => None,
            },
            _ => None,
        };
        discriminator
            .and_then(|name| self.members.get(name))
            .map(String::as_str)
            .ok_or_else(|| Error::AmbiguousType {
                abstract_type: self.abstract_type.clone(),
                discriminator: discriminator.map(str::to_string),
            })
    }
}

/// How a delegated value of some output type becomes a `FieldValue`
#[derive(Debug, Clone)]
pub(crate) enum OutputShape {
    Leaf,
    /// Carries the first item of the enum, used as a placeholder
    Enum(Option<Name>),
    Object,
    Abstract(Arc<TypeResolver>),
    List {
        element: Box<OutputShape>,
        nullable: bool,
    },
}

#[derive(Debug, Default)]
pub(crate) struct ShapeTable {
    kinds: HashMap<String, TypeKind>,
    resolvers: HashMap<String, Arc<TypeResolver>>,
    first_enum_values: HashMap<String, Name>,
}

impl ShapeTable {
    pub(crate) fn new(schema: &IntrospectedSchema) -> Self {
        let mut table = Self::default();
        for ty in schema.types() {
            table.kinds.insert(ty.name.clone(), ty.kind);
            if ty.is_abstract() {
                table
                    .resolvers
                    .insert(ty.name.clone(), Arc::new(TypeResolver::new(ty)));
            }
            if let Some(first) = ty.enum_values.first() {
                table
                    .first_enum_values
                    .insert(ty.name.clone(), Name::new(&first.name));
            }
        }
        table
    }

    pub(crate) fn shape_of(&self, ty: &IntrospectionTypeRef) -> OutputShape {
        match (ty.kind, &ty.of_type) {
            (TypeKind::NonNull, Some(inner)) => self.shape_of(inner),
            (TypeKind::List, Some(inner)) => OutputShape::List {
                element: Box::new(self.shape_of(inner)),
                nullable: inner.kind != TypeKind::NonNull,
            },
            _ => {
                let name = ty.named_type();
                match self.kinds.get(name) {
                    Some(TypeKind::Enum) => {
                        OutputShape::Enum(self.first_enum_values.get(name).cloned())
                    }
                    Some(TypeKind::Object) => OutputShape::Object,
                    Some(TypeKind::Interface | TypeKind::Union) => self
                        .resolvers
                        .get(name)
                        .map(|resolver| OutputShape::Abstract(resolver.clone()))
                        .unwrap_or(OutputShape::Leaf),
                    _ => OutputShape::Leaf,
                }
            }
        }
    }

    /// Stand-in value for a failed position of this shape.
    ///
    /// Returns whether the position must be recorded for nulling.
    fn placeholder(shape: &OutputShape) -> (FieldValue<'static>, bool) {
        match shape {
            OutputShape::Leaf => (FieldValue::NULL, false),
            OutputShape::Enum(Some(first)) => (
                FieldValue::value(ConstValue::Enum(first.clone())),
                true,
            ),
            OutputShape::Enum(None) => (FieldValue::NULL, false),
            OutputShape::Object => (FieldValue::owned_any(Nulled), true),
            OutputShape::Abstract(resolver) => match resolver.placeholder() {
                Some(member) => (
                    FieldValue::owned_any(Nulled).with_type(member.to_string()),
                    true,
                ),
                None => (FieldValue::NULL, false),
            },
            OutputShape::List { .. } => (FieldValue::list(Vec::<FieldValue>::new()), true),
        }
    }
}

/// Destination of errors and nulled positions met while converting a value
pub(crate) trait Sink {
    fn error(&mut self, error: RemoteError, path: &[PathSegment]);

    fn nulled(&mut self, path: &[PathSegment]);
}

/// Sink that reports into the request of a resolver context
pub(crate) struct ContextSink<'c, 'a> {
    ctx: &'c Context<'a>,
}

impl<'c, 'a> ContextSink<'c, 'a> {
    pub(crate) fn new(ctx: &'c Context<'a>) -> Self {
        Self { ctx }
    }
}

impl Sink for ContextSink<'_, '_> {
    fn error(&mut self, error: RemoteError, path: &[PathSegment]) {
        add_remote_error(self.ctx, error, path);
    }

    fn nulled(&mut self, path: &[PathSegment]) {
        match self.ctx.data_opt::<NulledPaths>() {
            Some(paths) => paths.push(path.to_vec()),
            None => tracing::warn!(
                "Placeholder at {:?} is not nulled; register the NullPlaceholders extension",
                path
            ),
        }
    }
}

/// Turn an annotated delegated value into a `FieldValue`.
///
/// Objects are passed on as [`Annotated`] so merged resolvers can raise their
/// pending errors. A value that is null or carries an error addressed to itself
/// resolves to `None` after its errors are reported at `path`. Failed elements of a
/// nullable list become null; a failed element of a non-null list fails the list.
/// A list value of a non-list shape (a list-valued custom scalar) is kept whole.
pub(crate) fn into_field_value<S: Sink>(
    tree: AnnotatedTree,
    shape: &OutputShape,
    path: &[PathSegment],
    sink: &mut S,
) -> Result<Option<FieldValue<'static>>> {
    match (tree, shape) {
        (AnnotatedTree::List(list), OutputShape::List { element, nullable }) => {
            if list.pending_errors.iter().any(|e| e.path.is_empty()) {
                return Ok(fail(AnnotatedTree::List(list).collapse(), path, sink));
            }
            for error in list.pending_errors {
                sink.error(error, path);
            }

            let mut items = Vec::with_capacity(list.value.len());
            for (index, item) in list.value.into_iter().enumerate() {
                let mut item_path = path.to_vec();
                item_path.push(PathSegment::Index(index));

                match into_field_value(item, element, &item_path, sink)? {
                    Some(value) => items.push(value),
                    None if *nullable => {
                        let (value, record) = ShapeTable::placeholder(element);
                        if record {
                            sink.nulled(&item_path);
                        }
                        items.push(value);
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some(FieldValue::list(items)))
        }
        (tree, shape) => {
            let failed = tree.is_failed();
            let node = tree.collapse();
            if failed || node.value == ConstValue::Null {
                return Ok(fail(node, path, sink));
            }
            match shape {
                OutputShape::Object => Ok(Some(FieldValue::owned_any(node))),
                OutputShape::Abstract(resolver) => {
                    let type_name = resolver.resolve(&node.value)?.to_string();
                    Ok(Some(FieldValue::owned_any(node).with_type(type_name)))
                }
                OutputShape::Enum(_) => {
                    for error in node.pending_errors {
                        sink.error(error, path);
                    }
                    Ok(Some(FieldValue::value(enum_value(node.value))))
                }
                OutputShape::Leaf | OutputShape::List { .. } => {
                    for error in node.pending_errors {
                        sink.error(error, path);
                    }
                    Ok(Some(FieldValue::value(node.value)))
                }
            }
        }
    }
}

fn fail<S: Sink>(
    node: Annotated,
    path: &[PathSegment],
    sink: &mut S,
) -> Option<FieldValue<'static>> {
    for error in node.pending_errors {
        sink.error(error, path);
    }
    None
}

fn enum_value(value: ConstValue) -> ConstValue {
    match value {
        ConstValue::String(name) => ConstValue::Enum(Name::new(name)),
        ConstValue::List(items) => ConstValue::List(items.into_iter().map(enum_value).collect()),
        other => other,
    }
}

/// Report an error at `path` of the request a context belongs to
pub(crate) fn add_remote_error(ctx: &Context<'_>, error: RemoteError, path: &[PathSegment]) {
    ctx.add_error(error.into_server_error(ctx.item.pos, path));
}

fn merged_field(def: &FieldDef, shape: OutputShape) -> Field {
    let nullable = def.ty.kind != TypeKind::NonNull;
    let field = Field::new(&def.name, def.ty.to_type_ref(), move |ctx| {
        let shape = shape.clone();
        FieldFuture::new(async move {
            if ctx.parent_value.downcast_ref::<Nulled>().is_some() {
                return Ok(None);
            }
            let key = ctx.item.node.response_key().node.to_string();
            let (value, errors) = parent_entry(&ctx, &key);
            let path = path_of(&ctx);
            let children = match errors {
                FieldErrors::Own(errors) if nullable => {
                    for error in errors {
                        add_remote_error(&ctx, error, &path);
                    }
                    return Ok(None);
                }
                FieldErrors::Own(errors) => return Err(Error::Remote(errors).to_resolver_error()),
                FieldErrors::Children(children) => children,
            };

            let mut sink = ContextSink::new(&ctx);
            match into_field_value(annotate(value, children), &shape, &path, &mut sink) {
                Ok(value) => Ok(value),
                Err(error) => fail_field(&ctx, error, &path, nullable),
            }
        })
    });
    with_field_metadata(field, def)
}

/// Fail a resolver field.
///
/// Nullable fields report one located error and resolve to `null`. Non-null fields
/// hand the error to the executor, which nulls the closest nullable parent.
pub(crate) fn fail_field(
    ctx: &Context<'_>,
    error: Error,
    path: &[PathSegment],
    nullable: bool,
) -> async_graphql::Result<Option<FieldValue<'static>>> {
    if !nullable {
        return Err(error.to_resolver_error());
    }
    add_remote_error(ctx, error.into_remote_error(), path);
    Ok(None)
}

fn parent_entry(ctx: &ResolverContext<'_>, key: &str) -> (ConstValue, FieldErrors) {
    if let Some(parent) = ctx.parent_value.downcast_ref::<Annotated>() {
        return (lookup(&parent.value, key), classify(&parent.pending_errors, key));
    }
    let value = ctx
        .parent_value
        .as_value()
        .map(|value| lookup(value, key))
        .unwrap_or(ConstValue::Null);
    (value, FieldErrors::Children(Vec::new()))
}

fn lookup(value: &ConstValue, key: &str) -> ConstValue {
    match value {
        ConstValue::Object(map) => map.get(key).cloned().unwrap_or(ConstValue::Null),
        _ => ConstValue::Null,
    }
}

fn link_context(ctx: &Context<'_>) -> LinkContext {
    ctx.data_opt::<LinkContext>().cloned().unwrap_or_default()
}

struct Forwarding {
    extractor: DocumentExtractor,
    link: SharedLink,
    hub: SubscriptionHub,
}

impl Forwarding {
    fn link(&self) -> Arc<dyn TransportLink> {
        self.link.read().clone()
    }

    async fn forward(
        &self,
        kind: OperationType,
        field_name: &str,
        info: &ResolveInfo,
        context: LinkContext,
    ) -> Result<Unwrapped> {
        let document = self
            .extractor
            .extract(kind, field_name, &IndexMap::new(), info)?;
        let key = document.response_key.clone();
        let link = self.link();
        tracing::debug!("Forwarding {} {} to {}", kind, field_name, link.endpoint());

        let response = link.execute(document.into_operation(context)).await?;
        check_and_unwrap(response, &key)
    }

    async fn open(
        &self,
        field_name: &str,
        info: &ResolveInfo,
        context: LinkContext,
    ) -> Result<(String, HubStream)> {
        let document = self.extractor.extract(
            OperationType::Subscription,
            field_name,
            &IndexMap::new(),
            info,
        )?;
        let key = document.response_key.clone();
        let link = self.link();
        let mut upstream = link.subscribe(document.into_operation(context)).await?;

        let (id, rx) = self.hub.register();
        let hub = self.hub.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(item) = upstream.next().await {
                let payload = item.unwrap_or_else(|e| RemoteResponse {
                    data: None,
                    errors: vec![RemoteError::new(e.to_string())],
                });
                if !hub.publish(&id, payload) {
                    break;
                }
            }
            hub.remove(&id);
        });

        tracing::debug!("Opened subscription {} for {} on {}", id, field_name, link.endpoint());
        Ok((
            key,
            HubStream {
                inner: UnboundedReceiverStream::new(rx),
                id,
                hub: self.hub.clone(),
                forwarder,
            },
        ))
    }
}

/// Payloads of one subscription; dropping it closes the backend stream
struct HubStream {
    inner: UnboundedReceiverStream<RemoteResponse>,
    id: SubscriptionId,
    hub: SubscriptionHub,
    forwarder: JoinHandle<()>,
}

impl Stream for HubStream {
    type Item = RemoteResponse;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for HubStream {
    fn drop(&mut self) {
        self.hub.remove(&self.id);
        self.forwarder.abort();
        tracing::debug!("Closed subscription {}", self.id);
    }
}

fn forwarding_object(
    kind: OperationType,
    ty: &FullType,
    shapes: &ShapeTable,
    forwarding: &Arc<Forwarding>,
) -> Object {
    let mut object = Object::new(&ty.name);
    for interface in &ty.interfaces {
        object = object.implement(interface.named_type());
    }
    for field in &ty.fields {
        object = object.field(forwarding_field(
            kind,
            field,
            shapes.shape_of(&field.ty),
            forwarding.clone(),
        ));
    }
    object
}

fn forwarding_field(
    kind: OperationType,
    def: &FieldDef,
    shape: OutputShape,
    forwarding: Arc<Forwarding>,
) -> Field {
    let field_name = def.name.clone();
    let nullable = def.ty.kind != TypeKind::NonNull;
    let field = Field::new(&def.name, def.ty.to_type_ref(), move |ctx| {
        let forwarding = forwarding.clone();
        let field_name = field_name.clone();
        let shape = shape.clone();
        FieldFuture::new(async move {
            let info = ResolveInfo::from_context(&ctx);
            let unwrapped = match forwarding
                .forward(kind, &field_name, &info, link_context(&ctx))
                .await
            {
                Ok(unwrapped) => unwrapped,
                Err(error) => return fail_field(&ctx, error, &info.path, nullable),
            };

            let mut sink = ContextSink::new(&ctx);
            for stray in unwrapped.strays {
                tracing::debug!("Reporting stray backend error at {}: {}", field_name, stray.message);
                sink.error(stray, &info.path);
            }
            match into_field_value(unwrapped.tree, &shape, &info.path, &mut sink) {
                Ok(value) => Ok(value),
                Err(error) => fail_field(&ctx, error, &info.path, nullable),
            }
        })
    });
    with_field_metadata(field, def)
}

/// Sink for subscription payloads; errors are logged since the event has no context
struct PayloadSink<'a> {
    field_name: &'a str,
    nulled: Option<&'a NulledPaths>,
}

impl Sink for PayloadSink<'_> {
    fn error(&mut self, error: RemoteError, path: &[PathSegment]) {
        tracing::warn!(
            "Dropping backend error at {:?} in {} payload: {}",
            path,
            self.field_name,
            error.message
        );
    }

    fn nulled(&mut self, path: &[PathSegment]) {
        match self.nulled {
            Some(paths) => paths.push(path.to_vec()),
            None => tracing::warn!(
                "Placeholder at {:?} is not nulled; register the NullPlaceholders extension",
                path
            ),
        }
    }
}

fn subscription_field(
    def: &FieldDef,
    shape: OutputShape,
    forwarding: Arc<Forwarding>,
) -> SubscriptionField {
    let field_name = def.name.clone();
    let mut field = SubscriptionField::new(&def.name, def.ty.to_type_ref(), move |ctx| {
        let forwarding = forwarding.clone();
        let field_name = field_name.clone();
        let shape = shape.clone();
        SubscriptionFieldFuture::new(async move {
            let info = ResolveInfo::from_context(&ctx);
            let (key, payloads) = forwarding
                .open(&field_name, &info, link_context(&ctx))
                .await
                .map_err(|e| e.to_resolver_error())?;

            let path = info.path;
            let nulled = ctx.data_opt::<NulledPaths>().cloned();
            let stream = payloads.map(move |payload| -> async_graphql::Result<FieldValue<'_>> {
                let unwrapped =
                    check_and_unwrap(payload, &key).map_err(|e| e.to_resolver_error())?;
                let mut sink = PayloadSink {
                    field_name: &field_name,
                    nulled: nulled.as_ref(),
                };
                for stray in unwrapped.strays {
                    sink.error(stray, &path);
                }
                let value = into_field_value(unwrapped.tree, &shape, &path, &mut sink)
                    .map_err(|e| e.to_resolver_error())?;
                Ok(value.unwrap_or_else(|| {
                    let (placeholder, record) = ShapeTable::placeholder(&shape);
                    if record {
                        sink.nulled(&path);
                    }
                    placeholder
                }))
            });

            Ok(stream)
        })
    });

    if let Some(description) = &def.description {
        field = field.description(description);
    }
    for arg in &def.args {
        field = field.argument(input_value(arg));
    }
    field
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::tests::blog_schema;
    use crate::link::mock::MockLink;
    use async_graphql::Request;
    use serde_json::json;

    fn delegating(link: &MockLink) -> DelegatingSchema {
        DelegatingSchemaFactory::new()
            .build(Arc::new(blog_schema()), Arc::new(link.clone()))
            .expect("schema builds")
    }

    fn data(response: async_graphql::Response) -> serde_json::Value {
        response.data.into_json().expect("json data")
    }

    #[tokio::test]
    async fn root_fields_forward_their_selection() {
        let link = MockLink::new("blog").respond(json!({
            "data": { "allPosts": [{ "id": "1", "title": "Hello", "createdAt": "2024-05-01" }] }
        }));
        let schema = delegating(&link);

        let response = schema
            .execute(Request::new("{ allPosts { id title createdAt } }"))
            .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            data(response),
            json!({ "allPosts": [{ "id": "1", "title": "Hello", "createdAt": "2024-05-01" }] })
        );
        assert_eq!(link.queries(), vec!["query { allPosts { id title createdAt } }"]);
    }

    #[tokio::test]
    async fn nested_errors_are_raised_at_their_field() {
        let link = MockLink::new("blog").respond(json!({
            "data": { "createUser": { "id": "7", "profile": null } },
            "errors": [{ "message": "profile unavailable", "path": ["createUser", "profile"] }]
        }));
        let schema = delegating(&link);

        let response = schema
            .execute(Request::new(
                r#"mutation { createUser(input: {name: "Ada"}) { id profile { bio } } }"#,
            ))
            .await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "profile unavailable");
        assert_eq!(
            response.errors[0].path,
            vec![
                PathSegment::Field("createUser".into()),
                PathSegment::Field("profile".into())
            ]
        );
        assert_eq!(data(response), json!({ "createUser": { "id": "7", "profile": null } }));
    }

    #[tokio::test]
    async fn root_errors_fail_the_field_with_joined_messages() {
        let link = MockLink::new("blog").respond(json!({
            "data": { "post": null },
            "errors": [
                { "message": "not found", "path": ["post"] },
                { "message": "try again" }
            ]
        }));
        let schema = delegating(&link);

        let response = schema.execute(Request::new(r#"{ post(id: "9") { id } }"#)).await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "not found\ntry again");
        assert_eq!(data(response), json!({ "post": null }));
    }

    #[tokio::test]
    async fn abstract_values_resolve_by_discriminator() {
        let link = MockLink::new("blog")
            .respond(json!({
                "data": { "animals": [
                    { "__typename": "Dog", "name": "Rex" },
                    { "__typename": "Cat", "name": "Tom" }
                ] }
            }))
            .respond(json!({
                "data": { "animals": [{ "__typename": "Fish", "name": "Nemo" }] }
            }));
        let schema = delegating(&link);

        let response = schema
            .execute(Request::new("{ animals { __typename ... on Dog { name } } }"))
            .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            data(response),
            json!({ "animals": [
                { "__typename": "Dog", "name": "Rex" },
                { "__typename": "Cat" }
            ] })
        );
        assert_eq!(
            link.queries()[0],
            "query { animals { __typename ... on Dog { name } } }"
        );

        let response = schema
            .execute(Request::new("{ animals { ... on Dog { name } } }"))
            .await;
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].message.contains("Fish"));
        assert_eq!(data(response), json!({ "animals": null }));
    }

    #[tokio::test]
    async fn failed_list_elements_become_null() {
        let link = MockLink::new("blog").respond(json!({
            "data": { "animals": [{ "__typename": "Dog", "name": "Rex" }, null] },
            "errors": [{ "message": "gone", "path": ["animals", 1] }]
        }));
        let schema = delegating(&link);

        let response = schema
            .execute(Request::new("{ animals { ... on Dog { name } } }"))
            .await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "gone");
        assert_eq!(
            response.errors[0].path,
            vec![PathSegment::Field("animals".into()), PathSegment::Index(1)]
        );
        assert_eq!(data(response), json!({ "animals": [{ "name": "Rex" }, null] }));
    }

    #[tokio::test]
    async fn failed_elements_read_null_whatever_the_selection() {
        let link = MockLink::new("blog").respond(json!({
            "data": { "animals": [null, { "__typename": "Cat", "name": "Tom" }] },
            "errors": [{ "message": "gone", "path": ["animals", 0] }]
        }));
        let schema = delegating(&link);

        let response = schema
            .execute(Request::new("{ animals { __typename ... on Cat { name } } }"))
            .await;
        assert_eq!(response.errors.len(), 1, "{:?}", response.errors);
        assert_eq!(
            response.errors[0].path,
            vec![PathSegment::Field("animals".into()), PathSegment::Index(0)]
        );
        assert_eq!(
            data(response),
            json!({ "animals": [null, { "__typename": "Cat", "name": "Tom" }] })
        );
    }

    #[tokio::test]
    async fn sibling_fields_survive_a_failed_root_field() {
        let link = MockLink::new("blog")
            .respond(json!({
                "data": { "post": null },
                "errors": [{ "message": "not found", "path": ["post"] }]
            }))
            .respond(json!({ "data": { "status": "DRAFT" } }));
        let schema = delegating(&link);

        let response = schema
            .execute(Request::new(r#"{ post(id: "9") { id } status }"#))
            .await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "not found");
        assert_eq!(response.errors[0].path, vec![PathSegment::Field("post".into())]);
        assert_eq!(data(response), json!({ "post": null, "status": "DRAFT" }));
    }

    #[tokio::test]
    async fn own_errors_on_present_values_null_the_field() {
        let link = MockLink::new("blog").respond(json!({
            "data": { "post": { "id": "9" } },
            "errors": [{ "message": "stale", "path": ["post"] }]
        }));
        let schema = delegating(&link);

        let response = schema.execute(Request::new(r#"{ post(id: "9") { id } }"#)).await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "stale");
        assert_eq!(response.errors[0].path, vec![PathSegment::Field("post".into())]);
        assert_eq!(data(response), json!({ "post": null }));
    }

    #[tokio::test]
    async fn list_valued_scalars_stay_whole() {
        let introspected = IntrospectedSchema::from_sdl("scalar Json type Query { meta: Json }")
            .expect("SDL parses");
        let link = MockLink::new("meta").respond(json!({ "data": { "meta": [1, 2, 3] } }));
        let schema = DelegatingSchemaFactory::new()
            .build(Arc::new(introspected), Arc::new(link.clone()))
            .expect("schema builds");

        let response = schema.execute(Request::new("{ meta }")).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(data(response), json!({ "meta": [1, 2, 3] }));
    }

    #[tokio::test]
    async fn enums_pass_through() {
        let link = MockLink::new("blog").respond(json!({ "data": { "status": "PUBLISHED" } }));
        let schema = delegating(&link);

        let response = schema.execute(Request::new("{ status }")).await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(data(response), json!({ "status": "PUBLISHED" }));
    }

    #[tokio::test]
    async fn rebind_swaps_the_transport() {
        let first = MockLink::new("first").respond(json!({ "data": { "status": "DRAFT" } }));
        let second = MockLink::new("second").respond(json!({ "data": { "status": "PUBLISHED" } }));
        let schema = delegating(&first);

        schema.execute(Request::new("{ status }")).await;
        DelegatingSchemaFactory::rebind(&schema, Arc::new(second.clone()));
        let response = schema.execute(Request::new("{ status }")).await;

        assert_eq!(data(response), json!({ "status": "PUBLISHED" }));
        assert_eq!(first.queries().len(), 1);
        assert_eq!(second.queries().len(), 1);
        assert_eq!(schema.link().endpoint().as_str(), "second");
    }

    #[tokio::test]
    async fn subscriptions_yield_each_payload() {
        let link = MockLink::new("blog").stream(vec![
            json!({ "data": { "postAdded": { "id": "1", "title": "A" } } }),
            json!({ "data": { "postAdded": { "id": "2", "title": "B" } } }),
        ]);
        let schema = delegating(&link);

        let responses: Vec<async_graphql::Response> = schema
            .execute_stream(Request::new(
                "subscription { postAdded(status: PUBLISHED) { id title } }",
            ))
            .collect()
            .await;

        let titles: Vec<serde_json::Value> = responses.into_iter().map(data).collect();
        assert_eq!(
            titles,
            vec![
                json!({ "postAdded": { "id": "1", "title": "A" } }),
                json!({ "postAdded": { "id": "2", "title": "B" } }),
            ]
        );
        assert_eq!(
            link.last().query,
            "subscription { postAdded(status: PUBLISHED) { id title } }"
        );
        assert_eq!(schema.active_subscriptions(), 0);
    }

    #[test]
    fn type_resolver_rejects_unknown_discriminators() {
        let schema = blog_schema();
        let resolver = TypeResolver::new(schema.type_("Animal").expect("Animal"));

        let dog = ConstValue::from_json(json!({ "__typename": "Dog" })).expect("value");
        assert_eq!(resolver.resolve(&dog).expect("resolves"), "Dog");

        let fish = ConstValue::from_json(json!({ "__typename": "Fish" })).expect("value");
        assert!(matches!(
            resolver.resolve(&fish),
            Err(Error::AmbiguousType { discriminator: Some(name), .. }) if name == "Fish"
        ));
        assert!(matches!(
            resolver.resolve(&ConstValue::Null),
            Err(Error::AmbiguousType { discriminator: None, .. })
        ));
    }

    #[test]
    fn sdl_exposes_backend_types() {
        let link = MockLink::new("blog");
        let sdl = delegating(&link).sdl();
        assert!(sdl.contains("union Animal"));
        assert!(sdl.contains("scalar DateTime"));
        assert!(sdl.contains("postAdded"));
    }
}
