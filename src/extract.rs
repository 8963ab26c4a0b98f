//! Building standalone backend documents from a caller's selection.
//!
//! [`DocumentExtractor::extract`] takes the field being resolved in the caller's
//! schema and produces a single-field operation against a backend root field,
//! carrying the caller's arguments, alias, directives, sub-selection and every
//! fragment that sub-selection reaches, plus the variable values it needs.

use crate::error::{Error, Result};
use crate::fragments::FragmentRegistry;
use crate::introspection::IntrospectedSchema;
use crate::link::{LinkContext, Operation};
use crate::printer::{print_document, print_selection};
use crate::types::OperationType;
use async_graphql::dynamic::ResolverContext;
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::types::{
    Directive, Field, FragmentDefinition, OperationDefinition, Selection, SelectionSet, Type,
    VariableDefinition,
};
use async_graphql::parser::Positioned;
use async_graphql::{Context, Name, PathSegment, Pos, QueryPathSegment, Variables};
use async_graphql_value::{ConstValue, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// What the extractor needs to know about the field being resolved
#[derive(Debug, Clone)]
pub struct ResolveInfo {
    /// Field nodes for the response key; their sub-selections are merged
    pub field_nodes: Vec<Positioned<Field>>,
    pub fragments: HashMap<Name, Positioned<FragmentDefinition>>,
    /// Variable definitions of the caller's operation
    pub variable_definitions: Vec<Positioned<VariableDefinition>>,
    pub variable_values: Variables,
    /// Response path of the field in the caller's result
    pub path: Vec<PathSegment>,
    pub pos: Pos,
}

impl ResolveInfo {
    pub fn new(field: Positioned<Field>) -> Self {
        let pos = field.pos;
        Self {
            field_nodes: vec![field],
            fragments: HashMap::new(),
            variable_definitions: Vec::new(),
            variable_values: Variables::default(),
            path: Vec::new(),
            pos,
        }
    }

    pub fn with_fragments(mut self, fragments: HashMap<Name, Positioned<FragmentDefinition>>) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn with_variables(
        mut self,
        definitions: Vec<Positioned<VariableDefinition>>,
        values: Variables,
    ) -> Self {
        self.variable_definitions = definitions;
        self.variable_values = values;
        self
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    /// Capture the current field of an executing async-graphql request
    pub fn from_context(ctx: &Context<'_>) -> Self {
        let env = &ctx.query_env;
        Self {
            field_nodes: vec![ctx.item.clone()],
            fragments: env.fragments.clone(),
            variable_definitions: env.operation.node.variable_definitions.clone(),
            variable_values: env.variables.clone(),
            path: path_of(ctx),
            pos: ctx.item.pos,
        }
    }

    /// Response key of the field in the caller's result
    pub fn response_key(&self) -> Option<&str> {
        self.field_nodes
            .first()
            .map(|field| field.node.response_key().node.as_str())
    }
}

/// Response path of the field a context is resolving
pub fn path_of(ctx: &Context<'_>) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut node = ctx.path_node.as_ref();
    while let Some(current) = node {
        segments.push(match current.segment {
            QueryPathSegment::Index(index) => PathSegment::Index(index),
            QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
        });
        node = current.parent;
    }
    segments.reverse();
    segments
}

/// Arguments of the field being resolved, defaults applied
pub fn arguments_from(ctx: &ResolverContext<'_>) -> IndexMap<Name, ConstValue> {
    let mut map = IndexMap::new();
    for (key, value) in ctx.args.iter() {
        map.insert(key.clone(), value.as_value().clone());
    }
    map
}

/// Value for `$name` in a forwarded document.
///
/// Delegation arguments win; `$_name` falls back to the argument `name`; otherwise
/// the caller's own variable value is used.
pub fn resolve_variable_value<'a>(
    name: &str,
    args: &'a IndexMap<Name, ConstValue>,
    outer: &'a Variables,
) -> Option<&'a ConstValue> {
    if let Some(value) = args.get(name) {
        return Some(value);
    }
    if let Some(stripped) = name.strip_prefix('_') {
        if let Some(value) = args.get(stripped) {
            return Some(value);
        }
    }
    outer.get(name)
}

/// Standalone document for one backend root field
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub kind: OperationType,
    pub operation: OperationDefinition,
    /// Reachable fragment definitions, sorted by name
    pub fragments: Vec<(Name, FragmentDefinition)>,
    pub variables: Variables,
    /// Key of the delegated field in the backend's response
    pub response_key: String,
}

impl ExtractedDocument {
    pub fn query(&self) -> String {
        print_document(&self.operation, &self.fragments)
    }

    pub fn into_operation(self, context: LinkContext) -> Operation {
        Operation::new(self.query())
            .with_variables(self.variables)
            .with_context(context)
    }
}

/// Rewrites caller selections into backend documents
#[derive(Clone)]
pub struct DocumentExtractor {
    schema: Arc<IntrospectedSchema>,
    fragments: FragmentRegistry,
}

impl DocumentExtractor {
    pub fn new(schema: Arc<IntrospectedSchema>, fragments: FragmentRegistry) -> Self {
        Self { schema, fragments }
    }

    pub fn schema(&self) -> &Arc<IntrospectedSchema> {
        &self.schema
    }

    pub fn fragments(&self) -> &FragmentRegistry {
        &self.fragments
    }

    /// Build the backend document for `field_name` on the root type of `kind`.
    ///
    /// `args` are the delegation arguments: they replace scalar and enum literals the
    /// caller wrote for the same argument, and arguments the caller did not write are
    /// added as `name: $_name`.
    pub fn extract(
        &self,
        kind: OperationType,
        field_name: &str,
        args: &IndexMap<Name, ConstValue>,
        info: &ResolveInfo,
    ) -> Result<ExtractedDocument> {
        let root = self.schema.root_type(kind)?;
        let field_def = root.field(field_name).ok_or_else(|| Error::UnknownField {
            type_name: root.name.clone(),
            field_name: field_name.to_string(),
        })?;
        let node = info
            .field_nodes
            .first()
            .ok_or_else(|| Error::InvalidRequest("no field node to delegate".into()))?;

        let mut arguments = Vec::new();
        for (name, value) in &node.node.arguments {
            if field_def.arg(&name.node).is_none() {
                tracing::debug!("Dropping argument {} unknown to {}.{}", name.node, root.name, field_name);
                continue;
            }
            let value = match args.get(&name.node) {
                Some(replacement) if is_literal_override(&value.node) => {
                    Positioned::new(replacement.clone().into_value(), value.pos)
                }
                _ => value.clone(),
            };
            arguments.push((name.clone(), value));
        }

        let mut injected = Vec::new();
        for name in args.keys() {
            if arguments.iter().any(|(existing, _)| existing.node == *name) {
                continue;
            }
            let Some(arg_def) = field_def.arg(name) else {
                continue;
            };
            let var_type = Type::new(&arg_def.ty.to_string()).ok_or_else(|| {
                Error::Schema(format!("invalid type {} for argument {}", arg_def.ty, name))
            })?;
            let variable = Name::new(format!("_{name}"));
            arguments.push((synthetic(name.clone()), synthetic(Value::Variable(variable.clone()))));
            injected.push(synthetic(VariableDefinition {
                name: synthetic(variable),
                var_type: synthetic(var_type),
                directives: Vec::new(),
                default_value: None,
            }));
        }

        let mut items = Vec::new();
        for field_node in &info.field_nodes {
            items.extend(field_node.node.selection_set.node.items.iter().cloned());
        }

        let field = Field {
            alias: node.node.alias.clone(),
            name: synthetic(Name::new(field_name)),
            arguments,
            directives: node.node.directives.clone(),
            selection_set: synthetic(SelectionSet { items }),
        };
        let response_key = field.response_key().node.to_string();

        let mut selection_set = SelectionSet {
            items: vec![synthetic(Selection::Field(synthetic(field)))],
        };
        let mut spreads = BTreeSet::new();
        self.rewrite(&mut selection_set, &root.name, &mut spreads);

        let mut fragments: BTreeMap<Name, FragmentDefinition> = BTreeMap::new();
        let mut queue: Vec<Name> = spreads.into_iter().collect();
        while let Some(name) = queue.pop() {
            if fragments.contains_key(&name) {
                continue;
            }
            let Some(definition) = info.fragments.get(&name) else {
                tracing::debug!("Fragment {} is not defined in the caller's document", name);
                continue;
            };
            let mut definition = definition.node.clone();
            let on = definition.type_condition.node.on.node.to_string();
            let mut nested = BTreeSet::new();
            self.rewrite(&mut definition.selection_set.node, &on, &mut nested);
            queue.extend(nested.into_iter().filter(|n| !fragments.contains_key(n)));
            fragments.insert(name, definition);
        }

        let mut referenced = BTreeSet::new();
        collect_set_variables(&selection_set, &mut referenced);
        for definition in fragments.values() {
            collect_directive_variables(&definition.directives, &mut referenced);
            collect_set_variables(&definition.selection_set.node, &mut referenced);
        }

        let mut variable_definitions: Vec<Positioned<VariableDefinition>> = info
            .variable_definitions
            .iter()
            .filter(|definition| referenced.contains(&definition.node.name.node))
            .cloned()
            .collect();
        for definition in injected {
            let exists = variable_definitions
                .iter()
                .any(|d| d.node.name.node == definition.node.name.node);
            if !exists {
                variable_definitions.push(definition);
            }
        }

        let mut variables = Variables::default();
        for definition in &variable_definitions {
            let name = &definition.node.name.node;
            if let Some(value) = resolve_variable_value(name, args, &info.variable_values) {
                variables.insert(name.clone(), value.clone());
            }
        }

        Ok(ExtractedDocument {
            kind,
            operation: OperationDefinition {
                ty: kind,
                variable_definitions,
                directives: Vec::new(),
                selection_set: synthetic(selection_set),
            },
            fragments: fragments.into_iter().collect(),
            variables,
            response_key,
        })
    }

    /// Add registered fragments and abstract-type discriminators to `set`, which has
    /// type `type_name`, and record the fragment spreads it contains.
    fn rewrite(&self, set: &mut SelectionSet, type_name: &str, spreads: &mut BTreeSet<Name>) {
        if !self.fragments.is_empty() {
            let mut seen: Vec<String> = set.items.iter().map(|item| printed(&item.node)).collect();
            let mut extra = Vec::new();
            for item in &set.items {
                let Selection::Field(field) = &item.node else {
                    continue;
                };
                for fragment in self.fragments.get(type_name, &field.node.name.node) {
                    let text = printed(&fragment.node);
                    if !seen.contains(&text) {
                        seen.push(text);
                        extra.push(fragment);
                    }
                }
            }
            set.items.extend(extra);
        }

        for item in &mut set.items {
            match &mut item.node {
                Selection::Field(field) => {
                    let field = &mut field.node;
                    if field.selection_set.node.items.is_empty() {
                        continue;
                    }
                    let Some(def) = self.schema.field(type_name, &field.name.node) else {
                        continue;
                    };
                    let child = def.ty.named_type().to_string();
                    self.rewrite(&mut field.selection_set.node, &child, spreads);
                }
                Selection::InlineFragment(fragment) => {
                    let fragment = &mut fragment.node;
                    let on = fragment
                        .type_condition
                        .as_ref()
                        .map(|condition| condition.node.on.node.to_string())
                        .unwrap_or_else(|| type_name.to_string());
                    self.rewrite(&mut fragment.selection_set.node, &on, spreads);
                }
                Selection::FragmentSpread(spread) => {
                    spreads.insert(spread.node.fragment_name.node.clone());
                }
            }
        }

        if self.schema.is_abstract(type_name) && !selects_typename(set) {
            set.items.push(synthetic(Selection::Field(synthetic(Field {
                alias: None,
                name: synthetic(Name::new("__typename")),
                arguments: Vec::new(),
                directives: Vec::new(),
                selection_set: synthetic(SelectionSet::default()),
            }))));
        }
    }
}

impl std::fmt::Debug for DocumentExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentExtractor")
            .field("fragments", &self.fragments)
            .finish()
    }
}

fn synthetic<T>(node: T) -> Positioned<T> {
    Positioned::new(node, Pos::default())
}

fn printed(selection: &Selection) -> String {
    let mut out = String::new();
    print_selection(selection, &mut out);
    out
}

/// Literals the delegation arguments may replace: scalars and enums
fn is_literal_override(value: &Value) -> bool {
    !matches!(
        value,
        Value::Variable(_) | Value::Object(_) | Value::Null | Value::List(_)
    )
}

fn selects_typename(set: &SelectionSet) -> bool {
    set.items.iter().any(|item| {
        matches!(&item.node, Selection::Field(field)
            if field.node.alias.is_none() && field.node.name.node.as_str() == "__typename")
    })
}

fn collect_set_variables(set: &SelectionSet, out: &mut BTreeSet<Name>) {
    for item in &set.items {
        match &item.node {
            Selection::Field(field) => {
                for (_, value) in &field.node.arguments {
                    collect_value_variables(&value.node, out);
                }
                collect_directive_variables(&field.node.directives, out);
                collect_set_variables(&field.node.selection_set.node, out);
            }
            Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.node.directives, out);
            }
            Selection::InlineFragment(fragment) => {
                collect_directive_variables(&fragment.node.directives, out);
                collect_set_variables(&fragment.node.selection_set.node, out);
            }
        }
    }
}

fn collect_directive_variables(directives: &[Positioned<Directive>], out: &mut BTreeSet<Name>) {
    for directive in directives {
        for (_, value) in &directive.node.arguments {
            collect_value_variables(&value.node, out);
        }
    }
}

fn collect_value_variables(value: &Value, out: &mut BTreeSet<Name>) {
    match value {
        Value::Variable(name) => {
            out.insert(name.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_value_variables(item, out);
            }
        }
        Value::Object(fields) => {
            for item in fields.values() {
                collect_value_variables(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::introspection::tests::blog_schema;
    use async_graphql::parser::parse_query;
    use async_graphql::parser::types::DocumentOperations;

    /// ResolveInfo for the first root field of `query`
    pub(crate) fn info_for(query: &str, variables: serde_json::Value) -> ResolveInfo {
        let doc = parse_query(query).expect("query parses");
        let DocumentOperations::Single(operation) = doc.operations else {
            panic!("single operation expected");
        };
        let operation = operation.node;
        let Some(Selection::Field(field)) =
            operation.selection_set.node.items.first().map(|item| item.node.clone())
        else {
            panic!("root field expected");
        };
        ResolveInfo::new(field)
            .with_fragments(doc.fragments)
            .with_variables(
                operation.variable_definitions,
                Variables::from_json(variables),
            )
    }

    fn extractor() -> DocumentExtractor {
        DocumentExtractor::new(Arc::new(blog_schema()), FragmentRegistry::new())
    }

    fn args(value: serde_json::Value) -> IndexMap<Name, ConstValue> {
        match ConstValue::from_json(value).expect("value") {
            ConstValue::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    #[test]
    fn forwards_the_caller_selection() {
        let info = info_for("{ posts { id title } }", serde_json::json!({}));
        let doc = extractor()
            .extract(OperationType::Query, "allPosts", &IndexMap::new(), &info)
            .expect("extracts");

        assert_eq!(doc.query(), "query { allPosts { id title } }");
        assert!(doc.variables.is_empty());
        assert_eq!(doc.response_key, "allPosts");
    }

    #[test]
    fn variable_precedence() {
        let args = args(serde_json::json!({ "x": 1 }));
        let outer = Variables::from_json(serde_json::json!({ "_x": 2, "x": 3, "y": 4 }));

        assert_eq!(resolve_variable_value("_x", &args, &outer), Some(&ConstValue::from(1)));
        assert_eq!(resolve_variable_value("x", &args, &outer), Some(&ConstValue::from(1)));
        assert_eq!(resolve_variable_value("y", &args, &outer), Some(&ConstValue::from(4)));
        assert_eq!(resolve_variable_value("z", &args, &outer), None);
    }

    #[test]
    fn overrides_only_scalar_and_enum_literals() {
        let info = info_for(
            r#"{ posts(title: "old", filter: { status: DRAFT }) { id } }"#,
            serde_json::json!({}),
        );
        let doc = extractor()
            .extract(
                OperationType::Query,
                "allPosts",
                &args(serde_json::json!({ "title": "new", "filter": { "status": "PUBLISHED" } })),
                &info,
            )
            .expect("extracts");

        assert_eq!(
            doc.query(),
            r#"query { allPosts(title: "new", filter: {status: DRAFT}) { id } }"#
        );
    }

    #[test]
    fn injects_arguments_the_caller_did_not_write() {
        let info = info_for("{ posts { id } }", serde_json::json!({}));
        let doc = extractor()
            .extract(
                OperationType::Query,
                "allPosts",
                &args(serde_json::json!({ "first": 5, "unknown": true })),
                &info,
            )
            .expect("extracts");

        assert_eq!(doc.query(), "query ($_first: Int) { allPosts(first: $_first) { id } }");
        assert_eq!(
            doc.variables.into_value().into_json().expect("json"),
            serde_json::json!({ "_first": 5 })
        );
    }

    #[test]
    fn keeps_alias_and_only_referenced_variables() {
        let info = info_for(
            "query ($id: ID!, $unused: Int, $upper: Boolean) { latest: post(id: $id) { title(upper: $upper) } }",
            serde_json::json!({ "id": "7", "unused": 1, "upper": true }),
        );
        let doc = extractor()
            .extract(OperationType::Query, "post", &IndexMap::new(), &info)
            .expect("extracts");

        assert_eq!(
            doc.query(),
            "query ($id: ID!, $upper: Boolean) { latest: post(id: $id) { title(upper: $upper) } }"
        );
        assert_eq!(doc.response_key, "latest");
        assert_eq!(
            doc.variables.into_value().into_json().expect("json"),
            serde_json::json!({ "id": "7", "upper": true })
        );
    }

    #[test]
    fn includes_reachable_fragments_sorted_by_name() {
        let info = info_for(
            "query { posts { ...PostFields } } \
             fragment Unused on Post { id } \
             fragment PostFields on Post { id author { ...Author } } \
             fragment Author on User { name }",
            serde_json::json!({}),
        );
        let doc = extractor()
            .extract(OperationType::Query, "allPosts", &IndexMap::new(), &info)
            .expect("extracts");

        assert_eq!(
            doc.query(),
            "query { allPosts { ...PostFields } }\n\
             fragment Author on User { name }\n\
             fragment PostFields on Post { id author { ...Author } }"
        );
    }

    #[test]
    fn adds_typename_to_abstract_selections() {
        let info = info_for(
            "{ pets { ... on Dog { name } } node(id: 1) { id } }",
            serde_json::json!({}),
        );
        let doc = extractor()
            .extract(OperationType::Query, "animals", &IndexMap::new(), &info)
            .expect("extracts");
        assert_eq!(
            doc.query(),
            "query { animals { ... on Dog { name } __typename } }"
        );

        let info = info_for("{ node(id: \"1\") { __typename id } }", serde_json::json!({}));
        let doc = extractor()
            .extract(OperationType::Query, "node", &IndexMap::new(), &info)
            .expect("extracts");
        assert_eq!(doc.query(), "query { node(id: \"1\") { __typename id } }");
    }

    #[test]
    fn splices_registered_fragments() {
        let registry = FragmentRegistry::new();
        registry
            .register("Post", "title", "... on Post { id }")
            .expect("registers");
        let extractor = DocumentExtractor::new(Arc::new(blog_schema()), registry);

        let info = info_for("{ posts { title } }", serde_json::json!({}));
        let doc = extractor
            .extract(OperationType::Query, "allPosts", &IndexMap::new(), &info)
            .expect("extracts");
        assert_eq!(doc.query(), "query { allPosts { title ... on Post { id } } }");
    }

    #[test]
    fn extraction_is_deterministic() {
        let info = info_for(
            "query ($s: Status) { feed: posts(filter: { status: $s }) { ...A ...B } } \
             fragment B on Post { title } fragment A on Post { id }",
            serde_json::json!({ "s": "DRAFT" }),
        );
        let args = args(serde_json::json!({ "first": 2, "title": "t" }));
        let first = extractor()
            .extract(OperationType::Query, "allPosts", &args, &info)
            .expect("extracts");
        let second = extractor()
            .extract(OperationType::Query, "allPosts", &args, &info)
            .expect("extracts");

        assert_eq!(first.query(), second.query());
        assert_eq!(first.variables, second.variables);
    }

    #[test]
    fn missing_root_and_unknown_field() {
        let schema = IntrospectedSchema::from_sdl("type Query { a: Int }").expect("parses");
        let extractor = DocumentExtractor::new(Arc::new(schema), FragmentRegistry::new());
        let info = info_for("{ a }", serde_json::json!({}));

        assert!(matches!(
            extractor.extract(OperationType::Mutation, "a", &IndexMap::new(), &info),
            Err(Error::MissingRootType(_))
        ));
        assert!(matches!(
            extractor.extract(OperationType::Query, "b", &IndexMap::new(), &info),
            Err(Error::UnknownField { .. })
        ));
    }
}
