//! Null placeholders for failed composite values.
//!
//! A dynamic schema cannot resolve an object, interface, union, enum or list
//! position to `null` while its type says the position is a composite. Failed list
//! elements of such types resolve to a placeholder instead and their path is
//! recorded in [`NulledPaths`]. The [`NullPlaceholders`] extension then writes `null`
//! at every recorded path and drops the errors raised below it.

use async_graphql::extensions::{
    Extension, ExtensionContext, ExtensionFactory, NextPrepareRequest, NextRequest,
    NextSubscribe,
};
use async_graphql::{PathSegment, Request, Response, ServerResult};
use async_graphql_value::ConstValue;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;

/// Marker parent value of a placeholder object; its fields resolve to `null`
pub(crate) struct Nulled;

/// Response paths to overwrite with `null` once a response is complete
#[derive(Clone, Default)]
pub(crate) struct NulledPaths(Arc<Mutex<Vec<Vec<PathSegment>>>>);

impl NulledPaths {
    pub(crate) fn push(&self, path: Vec<PathSegment>) {
        self.0.lock().push(path);
    }

    fn apply(&self, response: &mut Response) {
        let paths = std::mem::take(&mut *self.0.lock());
        for path in paths {
            set_null(&mut response.data, &path);
            response
                .errors
                .retain(|error| !(error.path.len() > path.len() && error.path.starts_with(&path)));
        }
    }
}

fn set_null(value: &mut ConstValue, path: &[PathSegment]) {
    let Some((first, rest)) = path.split_first() else {
        *value = ConstValue::Null;
        return;
    };
    let child = match (value, first) {
        (ConstValue::Object(map), PathSegment::Field(name)) => map.get_mut(name.as_str()),
        (ConstValue::List(items), PathSegment::Index(index)) => items.get_mut(*index),
        _ => None,
    };
    if let Some(child) = child {
        set_null(child, rest);
    }
}

/// Extension that turns placeholders of failed list elements into `null`.
///
/// [`DelegatingSchemaFactory`](crate::DelegatingSchemaFactory) registers it. Register
/// it on hand-written schemas that resolve fields with
/// [`Delegated::into_field_value`](crate::Delegated::into_field_value).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPlaceholders;

impl ExtensionFactory for NullPlaceholders {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(NullPlaceholdersExtension {
            paths: NulledPaths::default(),
        })
    }
}

struct NullPlaceholdersExtension {
    paths: NulledPaths,
}

#[async_trait::async_trait]
impl Extension for NullPlaceholdersExtension {
    async fn prepare_request(
        &self,
        ctx: &ExtensionContext<'_>,
        request: Request,
        next: NextPrepareRequest<'_>,
    ) -> ServerResult<Request> {
        next.run(ctx, request.data(self.paths.clone())).await
    }

    async fn request(&self, ctx: &ExtensionContext<'_>, next: NextRequest<'_>) -> Response {
        let mut response = next.run(ctx).await;
        self.paths.apply(&mut response);
        response
    }

    fn subscribe<'s>(
        &self,
        ctx: &ExtensionContext<'_>,
        stream: BoxStream<'s, Response>,
        next: NextSubscribe<'_>,
    ) -> BoxStream<'s, Response> {
        let paths = self.paths.clone();
        next.run(ctx, stream)
            .map(move |mut response| {
                paths.apply(&mut response);
                response
            })
            .boxed()
    }
}
