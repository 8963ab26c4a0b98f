//! Inline fragments registered per (type, field).
//!
//! When a forwarded selection set of type `T` selects field `f` and a fragment is
//! registered for `(T, f)`, the fragment is added to that selection set so the
//! backend returns whatever the field's local resolver depends on.

use crate::error::{Error, Result};
use async_graphql::parser::parse_query;
use async_graphql::parser::types::{
    DocumentOperations, InlineFragment, Selection, TypeCondition,
};
use async_graphql::parser::Positioned;
use async_graphql::Pos;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of fragments added to forwarded selections
#[derive(Clone, Default)]
pub struct FragmentRegistry {
    inner: Arc<RwLock<HashMap<(String, String), Vec<Positioned<Selection>>>>>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fragment` for `field_name` on `type_name`.
    ///
    /// Accepts an inline fragment (`... on User { id }`) or a fragment definition
    /// (`fragment UserId on User { id }`).
    pub fn register(&self, type_name: &str, field_name: &str, fragment: &str) -> Result<()> {
        let selection = parse_fragment(fragment)?;
        tracing::debug!("Registered fragment for {}.{}", type_name, field_name);
        self.inner
            .write()
            .entry((type_name.to_string(), field_name.to_string()))
            .or_default()
            .push(selection);
        Ok(())
    }

    /// Fragments registered for a field, in registration order
    pub fn get(&self, type_name: &str, field_name: &str) -> Vec<Positioned<Selection>> {
        self.inner
            .read()
            .get(&(type_name.to_string(), field_name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl std::fmt::Debug for FragmentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .inner
            .read()
            .keys()
            .map(|(ty, field)| format!("{ty}.{field}"))
            .collect();
        f.debug_struct("FragmentRegistry").field("fields", &keys).finish()
    }
}

fn parse_fragment(text: &str) -> Result<Positioned<Selection>> {
    let trimmed = text.trim();
    if trimmed.starts_with("fragment") {
        let doc = parse_query(format!("{{ __typename }} {trimmed}"))
            .map_err(|e| Error::InvalidFragment(format!("{trimmed}: {e}")))?;
        let (_, definition) = doc
            .fragments
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidFragment(trimmed.to_string()))?;
        let definition = definition.node;
        return Ok(Positioned::new(
            Selection::InlineFragment(Positioned::new(
                InlineFragment {
                    type_condition: Some(Positioned::new(
                        TypeCondition {
                            on: definition.type_condition.node.on,
                        },
                        Pos::default(),
                    )),
                    directives: definition.directives,
                    selection_set: definition.selection_set,
                },
                Pos::default(),
            )),
            Pos::default(),
        ));
    }

    let doc = parse_query(format!("{{ {trimmed} }}"))
        .map_err(|e| Error::InvalidFragment(format!("{trimmed}: {e}")))?;
    let DocumentOperations::Single(operation) = doc.operations else {
        return Err(Error::InvalidFragment(trimmed.to_string()));
    };
    let mut items = operation.node.selection_set.node.items;
    match (items.pop(), items.is_empty()) {
        (Some(selection), true) if matches!(selection.node, Selection::InlineFragment(_)) => {
            Ok(selection)
        }
        _ => Err(Error::InvalidFragment(format!(
            "expected a single inline fragment: {trimmed}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_selection;

    fn printed(selection: &Positioned<Selection>) -> String {
        let mut out = String::new();
        print_selection(&selection.node, &mut out);
        out
    }

    #[test]
    fn accepts_inline_fragments_and_definitions() {
        let registry = FragmentRegistry::new();
        registry
            .register("User", "fullName", "... on User { firstName lastName }")
            .expect("inline fragment registers");
        registry
            .register("User", "fullName", "fragment Extra on User { id }")
            .expect("definition registers");

        let fragments: Vec<String> = registry.get("User", "fullName").iter().map(printed).collect();
        assert_eq!(
            fragments,
            vec!["... on User { firstName lastName }", "... on User { id }"]
        );
        assert!(registry.get("User", "other").is_empty());
    }

    #[test]
    fn rejects_non_fragments() {
        let registry = FragmentRegistry::new();
        assert!(matches!(
            registry.register("User", "x", "id name"),
            Err(Error::InvalidFragment(_))
        ));
        assert!(matches!(
            registry.register("User", "x", "... on User {"),
            Err(Error::InvalidFragment(_))
        ));
        assert!(registry.is_empty());
    }
}
