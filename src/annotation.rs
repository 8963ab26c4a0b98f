//! Attaching backend errors to the values they belong to.
//!
//! A delegated result and its errors come back separately. Before a value is handed to
//! the local schema, every error addressed below it is attached to the closest value
//! it can be carried on as a pending error (an [`Annotated`] value). Merged resolvers
//! then [`classify`] the pending errors of their parent: an error addressed exactly to
//! the field is raised there, everything deeper travels on with the field's value.

use crate::error::{Error, Result};
use crate::types::{RemoteError, RemoteResponse};
use async_graphql::PathSegment;
use async_graphql_value::ConstValue;

/// A value plus descendant errors that have not been raised yet.
///
/// Paths of pending errors are relative to `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotated<T = ConstValue> {
    pub value: T,
    pub pending_errors: Vec<RemoteError>,
}

impl<T> Annotated<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            pending_errors: Vec::new(),
        }
    }

    pub fn with_errors(value: T, pending_errors: Vec<RemoteError>) -> Self {
        Self {
            value,
            pending_errors,
        }
    }
}

/// Annotated value with list elements annotated individually
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotatedTree {
    Node(Annotated),
    List(Annotated<Vec<AnnotatedTree>>),
}

impl AnnotatedTree {
    /// Number of errors still pending anywhere in the tree
    pub fn pending_count(&self) -> usize {
        match self {
            AnnotatedTree::Node(node) => node.pending_errors.len(),
            AnnotatedTree::List(list) => {
                list.pending_errors.len()
                    + list.value.iter().map(AnnotatedTree::pending_count).sum::<usize>()
            }
        }
    }

    /// Merge a list back into a single annotated value.
    ///
    /// Element errors are re-rooted under their element index.
    pub fn collapse(self) -> Annotated {
        match self {
            AnnotatedTree::Node(node) => node,
            AnnotatedTree::List(list) => {
                let mut errors = list.pending_errors;
                let mut values = Vec::with_capacity(list.value.len());
                for (index, element) in list.value.into_iter().enumerate() {
                    let element = element.collapse();
                    errors.extend(element.pending_errors.into_iter().map(|error| {
                        let mut path = vec![PathSegment::Index(index)];
                        path.extend(error.path.iter().cloned());
                        error.with_path(path)
                    }));
                    values.push(element.value);
                }
                Annotated::with_errors(ConstValue::List(values), errors)
            }
        }
    }

    /// Whether an error is addressed to this value itself
    pub fn is_failed(&self) -> bool {
        let pending = match self {
            AnnotatedTree::Node(node) => &node.pending_errors,
            AnnotatedTree::List(list) => &list.pending_errors,
        };
        pending.iter().any(|error| error.path.is_empty())
    }

    /// Drop the annotations and rebuild the plain value
    pub fn into_value(self) -> ConstValue {
        match self {
            AnnotatedTree::Node(node) => node.value,
            AnnotatedTree::List(list) => {
                ConstValue::List(list.value.into_iter().map(AnnotatedTree::into_value).collect())
            }
        }
    }
}

/// Outcome of [`classify`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldErrors {
    /// The field itself failed; its value must not be used
    Own(Vec<RemoteError>),
    /// Errors below the field, with the field's key stripped from their paths
    Children(Vec<RemoteError>),
}

/// Pick the pending errors of a parent that concern the field with `response_key`.
///
/// When any error is addressed exactly to the field, every error for the field is
/// returned as `Own` so it is raised together with the field.
pub fn classify(errors: &[RemoteError], response_key: &str) -> FieldErrors {
    let mut own = Vec::new();
    let mut children = Vec::new();

    for error in errors {
        match error.path.first() {
            Some(PathSegment::Field(name)) if name == response_key => {
                if error.path.len() == 1 {
                    own.push(error.clone());
                } else {
                    children.push(error.clone().with_path(error.path[1..].to_vec()));
                }
            }
            _ => {}
        }
    }

    if own.is_empty() {
        FieldErrors::Children(children)
    } else {
        own.extend(children);
        FieldErrors::Own(own)
    }
}

/// Attach `errors` (paths relative to `value`) to `value`.
///
/// Lists hand each error to the element named by its leading index, recursively.
/// An element whose error path ends at the element keeps that error pending with an
/// empty path. Errors that do not start with a valid index stay on the list itself.
pub fn annotate(value: ConstValue, errors: Vec<RemoteError>) -> AnnotatedTree {
    match value {
        ConstValue::List(items) => {
            let mut buckets: Vec<Vec<RemoteError>> = vec![Vec::new(); items.len()];
            let mut leftover = Vec::new();

            for error in errors {
                match error.path.first() {
                    Some(PathSegment::Index(index)) if *index < buckets.len() => {
                        let index = *index;
                        let rest = error.path[1..].to_vec();
                        buckets[index].push(error.with_path(rest));
                    }
                    _ => leftover.push(error),
                }
            }

            let elements = items
                .into_iter()
                .zip(buckets)
                .map(|(item, bucket)| annotate(item, bucket))
                .collect();
            AnnotatedTree::List(Annotated::with_errors(elements, leftover))
        }
        value => AnnotatedTree::Node(Annotated::with_errors(value, errors)),
    }
}

/// Delegated value for one root field with its errors attached
#[derive(Debug, Clone, PartialEq)]
pub struct Unwrapped {
    pub tree: AnnotatedTree,
    /// Errors not addressed to the field at all; report them at the current path
    pub strays: Vec<RemoteError>,
}

/// Extract the value for `response_key` from a backend result.
///
/// Fails with the newline-joined messages when the result has errors and no value
/// for the key. Otherwise errors under the key are attached to the value and any
/// others are returned as strays. An error addressed to the key itself stays pending
/// on the value with an empty path, which fails the value when it is resolved.
pub fn check_and_unwrap(response: RemoteResponse, response_key: &str) -> Result<Unwrapped> {
    let RemoteResponse { data, errors } = response;

    let value = match data {
        Some(ConstValue::Object(mut map)) => map.shift_remove(response_key),
        _ => None,
    }
    .filter(|value| *value != ConstValue::Null);

    let Some(value) = value else {
        if errors.is_empty() {
            return Ok(Unwrapped {
                tree: AnnotatedTree::Node(Annotated::new(ConstValue::Null)),
                strays: Vec::new(),
            });
        }
        return Err(Error::Remote(errors));
    };

    let (mine, strays): (Vec<_>, Vec<_>) = errors.into_iter().partition(|error| {
        matches!(error.path.first(), Some(PathSegment::Field(name)) if name == response_key)
    });
    let children = mine
        .into_iter()
        .map(|error| {
            let rest = error.path[1..].to_vec();
            error.with_path(rest)
        })
        .collect();

    Ok(Unwrapped {
        tree: annotate(value, children),
        strays,
    })
}
