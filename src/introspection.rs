//! Backend type system as reported by introspection.
//!
//! [`IntrospectedSchema`] is the read-only model every other component works from.
//! It is usually fetched from the backend with [`introspect`], but can also be built
//! from SDL with [`IntrospectedSchema::from_sdl`].

use crate::error::{Error, Result};
use crate::link::{Operation, TransportLink};
use crate::types::OperationType;
use async_graphql::dynamic::TypeRef;
use async_graphql::indexmap::IndexMap;
use async_graphql::parser::parse_query;
use async_graphql::parser::types::DocumentOperations;
use async_graphql_value::ConstValue;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Write;

pub const INTROSPECTION_QUERY: &str = r#"
    query IntrospectionQuery {
        __schema {
            queryType { name }
            mutationType { name }
            subscriptionType { name }
            types {
                ...FullType
            }
        }
    }

    fragment FullType on __Type {
        kind
        name
        description
        fields(includeDeprecated: true) {
            name
            description
            args {
                ...InputValue
            }
            type {
                ...TypeRef
            }
            isDeprecated
            deprecationReason
        }
        inputFields {
            ...InputValue
        }
        interfaces {
            ...TypeRef
        }
        enumValues(includeDeprecated: true) {
            name
            description
            isDeprecated
            deprecationReason
        }
        possibleTypes {
            ...TypeRef
        }
    }

    fragment InputValue on __InputValue {
        name
        description
        type {
            ...TypeRef
        }
        defaultValue
    }

    fragment TypeRef on __Type {
        kind
        name
        ofType {
            kind
            name
            ofType {
                kind
                name
                ofType {
                    kind
                    name
                    ofType {
                        kind
                        name
                        ofType {
                            kind
                            name
                            ofType {
                                kind
                                name
                                ofType {
                                    kind
                                    name
                                }
                            }
                        }
                    }
                }
            }
        }
    }
"#;

/// Scalars every GraphQL schema provides
pub const BUILTIN_SCALARS: [&str; 5] = ["ID", "String", "Int", "Float", "Boolean"];

pub fn is_builtin_scalar(name: &str) -> bool {
    BUILTIN_SCALARS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
    List,
    NonNull,
}

/// Reference to a type, possibly wrapped in lists and non-null markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectionTypeRef {
    pub kind: TypeKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub of_type: Option<Box<IntrospectionTypeRef>>,
}

impl IntrospectionTypeRef {
    pub fn named(kind: TypeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: Some(name.into()),
            of_type: None,
        }
    }

    pub fn wrap(kind: TypeKind, inner: IntrospectionTypeRef) -> Self {
        Self {
            kind,
            name: None,
            of_type: Some(Box::new(inner)),
        }
    }

    /// Innermost named type
    pub fn named_type(&self) -> &str {
        match (&self.name, &self.of_type) {
            (Some(name), _) => name,
            (None, Some(inner)) => inner.named_type(),
            (None, None) => "",
        }
    }

    pub fn to_type_ref(&self) -> TypeRef {
        match (self.kind, &self.of_type) {
            (TypeKind::NonNull, Some(inner)) => TypeRef::NonNull(Box::new(inner.to_type_ref())),
            (TypeKind::List, Some(inner)) => TypeRef::List(Box::new(inner.to_type_ref())),
            _ => TypeRef::named(self.named_type()),
        }
    }
}

impl std::fmt::Display for IntrospectionTypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.kind, &self.of_type) {
            (TypeKind::NonNull, Some(inner)) => write!(f, "{inner}!"),
            (TypeKind::List, Some(inner)) => write!(f, "[{inner}]"),
            _ => f.write_str(self.named_type()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputValueDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub ty: IntrospectionTypeRef,
    /// Default value in GraphQL syntax
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<InputValueDef>,
    #[serde(rename = "type")]
    pub ty: IntrospectionTypeRef,
    #[serde(default)]
    pub is_deprecated: bool,
    #[serde(default)]
    pub deprecation_reason: Option<String>,
}

impl InputValueDef {
    /// Parsed default value, if one is declared and well-formed
    pub fn default_const(&self) -> Option<ConstValue> {
        let text = self.default_value.as_deref()?;
        let doc = parse_query(format!("query ($v: Int = {text}) {{ __typename }}")).ok()?;
        let DocumentOperations::Single(operation) = doc.operations else {
            return None;
        };
        operation
            .node
            .variable_definitions
            .into_iter()
            .next()?
            .node
            .default_value
            .map(|value| value.node)
    }
}

impl FieldDef {
    pub fn arg(&self, name: &str) -> Option<&InputValueDef> {
        self.args.iter().find(|arg| arg.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumValueDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_deprecated: bool,
    #[serde(default)]
    pub deprecation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullType {
    pub kind: TypeKind,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: Vec<FieldDef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub input_fields: Vec<InputValueDef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub interfaces: Vec<IntrospectionTypeRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub enum_values: Vec<EnumValueDef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub possible_types: Vec<IntrospectionTypeRef>,
}

impl FullType {
    fn new(kind: TypeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: None,
            fields: Vec::new(),
            input_fields: Vec::new(),
            interfaces: Vec::new(),
            enum_values: Vec::new(),
            possible_types: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_introspection(&self) -> bool {
        self.name.starts_with("__")
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchema {
    #[serde(default)]
    query_type: Option<RootName>,
    #[serde(default)]
    mutation_type: Option<RootName>,
    #[serde(default)]
    subscription_type: Option<RootName>,
    types: Vec<FullType>,
}

#[derive(Deserialize)]
struct RootName {
    name: String,
}

#[derive(Deserialize)]
struct IntrospectionData {
    #[serde(rename = "__schema")]
    schema: RawSchema,
}

/// Immutable description of a backend's type system
#[derive(Debug, Clone)]
pub struct IntrospectedSchema {
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    types: IndexMap<String, FullType>,
}

impl IntrospectedSchema {
    /// Build from the `data` of an introspection response
    pub fn from_introspection_response(data: serde_json::Value) -> Result<Self> {
        let data: IntrospectionData = serde_json::from_value(data)
            .map_err(|e| Error::IntrospectionFailed(format!("malformed introspection result: {e}")))?;
        let raw = data.schema;

        Ok(Self {
            query_type: raw.query_type.map(|r| r.name),
            mutation_type: raw.mutation_type.map(|r| r.name),
            subscription_type: raw.subscription_type.map(|r| r.name),
            types: raw
                .types
                .into_iter()
                .map(|ty| (ty.name.clone(), ty))
                .collect(),
        })
    }

    /// Build from type definitions in SDL
    pub fn from_sdl(sdl: &str) -> Result<Self> {
        use graphql_parser::schema::{Definition, TypeDefinition};

        let document = graphql_parser::parse_schema::<String>(sdl)
            .map_err(|e| Error::Schema(format!("failed to parse type definitions: {e}")))?;

        let mut types: IndexMap<String, FullType> = BUILTIN_SCALARS
            .iter()
            .map(|name| (name.to_string(), FullType::new(TypeKind::Scalar, *name)))
            .collect();
        let mut roots: (Option<String>, Option<String>, Option<String>) = (None, None, None);
        let mut explicit_roots = false;

        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(schema) => {
                    explicit_roots = true;
                    roots = (
                        schema.query.clone(),
                        schema.mutation.clone(),
                        schema.subscription.clone(),
                    );
                }
                Definition::TypeDefinition(definition) => {
                    let ty = match definition {
                        TypeDefinition::Scalar(scalar) => {
                            let mut ty = FullType::new(TypeKind::Scalar, &scalar.name);
                            ty.description = scalar.description.clone();
                            ty
                        }
                        TypeDefinition::Object(object) => {
                            let mut ty = FullType::new(TypeKind::Object, &object.name);
                            ty.description = object.description.clone();
                            ty.fields = object.fields.iter().map(sdl_field).collect();
                            ty.interfaces = object
                                .implements_interfaces
                                .iter()
                                .map(|name| IntrospectionTypeRef::named(TypeKind::Interface, name))
                                .collect();
                            ty
                        }
                        TypeDefinition::Interface(interface) => {
                            let mut ty = FullType::new(TypeKind::Interface, &interface.name);
                            ty.description = interface.description.clone();
                            ty.fields = interface.fields.iter().map(sdl_field).collect();
                            ty
                        }
                        TypeDefinition::Union(union) => {
                            let mut ty = FullType::new(TypeKind::Union, &union.name);
                            ty.description = union.description.clone();
                            ty.possible_types = union
                                .types
                                .iter()
                                .map(|name| IntrospectionTypeRef::named(TypeKind::Object, name))
                                .collect();
                            ty
                        }
                        TypeDefinition::Enum(en) => {
                            let mut ty = FullType::new(TypeKind::Enum, &en.name);
                            ty.description = en.description.clone();
                            ty.enum_values = en
                                .values
                                .iter()
                                .map(|value| EnumValueDef {
                                    name: value.name.clone(),
                                    description: value.description.clone(),
                                    is_deprecated: false,
                                    deprecation_reason: None,
                                })
                                .collect();
                            ty
                        }
                        TypeDefinition::InputObject(input) => {
                            let mut ty = FullType::new(TypeKind::InputObject, &input.name);
                            ty.description = input.description.clone();
                            ty.input_fields = input.fields.iter().map(sdl_input_value).collect();
                            ty
                        }
                    };
                    types.insert(ty.name.clone(), ty);
                }
                _ => {}
            }
        }

        // Interfaces list their implementers as possible types.
        let implementers: Vec<(String, String)> = types
            .values()
            .filter(|ty| ty.kind == TypeKind::Object)
            .flat_map(|ty| {
                ty.interfaces
                    .iter()
                    .map(move |i| (i.named_type().to_string(), ty.name.clone()))
            })
            .collect();
        for (interface, object) in implementers {
            if let Some(ty) = types.get_mut(&interface) {
                ty.possible_types
                    .push(IntrospectionTypeRef::named(TypeKind::Object, object));
            }
        }

        if !explicit_roots {
            let default_root = |name: &str| types.contains_key(name).then(|| name.to_string());
            roots = (
                default_root("Query"),
                default_root("Mutation"),
                default_root("Subscription"),
            );
        }

        Ok(Self {
            query_type: roots.0,
            mutation_type: roots.1,
            subscription_type: roots.2,
            types,
        })
    }

    pub fn types(&self) -> impl Iterator<Item = &FullType> {
        self.types.values()
    }

    pub fn type_(&self, name: &str) -> Option<&FullType> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.type_(type_name).and_then(|ty| ty.field(field_name))
    }

    pub fn is_abstract(&self, name: &str) -> bool {
        self.type_(name).map(FullType::is_abstract).unwrap_or(false)
    }

    /// Declared root type name for an operation kind
    pub fn root_type_name(&self, kind: OperationType) -> Option<&str> {
        match kind {
            OperationType::Query => self.query_type.as_deref(),
            OperationType::Mutation => self.mutation_type.as_deref(),
            OperationType::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub fn root_type(&self, kind: OperationType) -> Result<&FullType> {
        let name = self
            .root_type_name(kind)
            .ok_or_else(|| Error::MissingRootType(kind.to_string()))?;
        self.type_(name)
            .ok_or_else(|| Error::NoSuchRootType(name.to_string()))
    }

    pub fn is_root_type(&self, name: &str) -> bool {
        [&self.query_type, &self.mutation_type, &self.subscription_type]
            .iter()
            .any(|root| root.as_deref() == Some(name))
    }

    /// Print the type system as SDL, without introspection types and built-in scalars
    pub fn to_sdl(&self) -> String {
        let mut sdl = String::new();

        let standard = self.query_type.as_deref().map_or(true, |n| n == "Query")
            && self.mutation_type.as_deref().map_or(true, |n| n == "Mutation")
            && self
                .subscription_type
                .as_deref()
                .map_or(true, |n| n == "Subscription");
        if !standard {
            sdl.push_str("schema {\n");
            for (op, root) in [
                ("query", &self.query_type),
                ("mutation", &self.mutation_type),
                ("subscription", &self.subscription_type),
            ] {
                if let Some(root) = root {
                    let _ = writeln!(sdl, "  {op}: {root}");
                }
            }
            sdl.push_str("}\n\n");
        }

        for ty in self.types.values() {
            if ty.is_introspection() || is_builtin_scalar(&ty.name) {
                continue;
            }
            if let Some(description) = &ty.description {
                let _ = writeln!(sdl, "{}", block_string(description));
            }
            match ty.kind {
                TypeKind::Scalar => {
                    let _ = writeln!(sdl, "scalar {}", ty.name);
                }
                TypeKind::Object | TypeKind::Interface => {
                    let keyword = if ty.kind == TypeKind::Object {
                        "type"
                    } else {
                        "interface"
                    };
                    let _ = write!(sdl, "{keyword} {}", ty.name);
                    if !ty.interfaces.is_empty() {
                        let names: Vec<&str> =
                            ty.interfaces.iter().map(|i| i.named_type()).collect();
                        let _ = write!(sdl, " implements {}", names.join(" & "));
                    }
                    sdl.push_str(" {\n");
                    for field in &ty.fields {
                        let _ = write!(sdl, "  {}", field.name);
                        if !field.args.is_empty() {
                            let args: Vec<String> = field.args.iter().map(print_input_value).collect();
                            let _ = write!(sdl, "({})", args.join(", "));
                        }
                        let _ = write!(sdl, ": {}", field.ty);
                        if field.is_deprecated {
                            match &field.deprecation_reason {
                                Some(reason) => {
                                    let _ = write!(sdl, " @deprecated(reason: {reason:?})");
                                }
                                None => sdl.push_str(" @deprecated"),
                            }
                        }
                        sdl.push('\n');
                    }
                    sdl.push_str("}\n");
                }
                TypeKind::Union => {
                    let members: Vec<&str> =
                        ty.possible_types.iter().map(|t| t.named_type()).collect();
                    let _ = writeln!(sdl, "union {} = {}", ty.name, members.join(" | "));
                }
                TypeKind::Enum => {
                    let _ = writeln!(sdl, "enum {} {{", ty.name);
                    for value in &ty.enum_values {
                        let _ = writeln!(sdl, "  {}", value.name);
                    }
                    sdl.push_str("}\n");
                }
                TypeKind::InputObject => {
                    let _ = writeln!(sdl, "input {} {{", ty.name);
                    for field in &ty.input_fields {
                        let _ = writeln!(sdl, "  {}", print_input_value(field));
                    }
                    sdl.push_str("}\n");
                }
                TypeKind::List | TypeKind::NonNull => {}
            }
            sdl.push('\n');
        }

        sdl.trim_end().to_string() + "\n"
    }
}

fn block_string(description: &str) -> String {
    format!("\"\"\"{}\"\"\"", description.replace("\"\"\"", "\\\"\"\""))
}

fn print_input_value(value: &InputValueDef) -> String {
    match &value.default_value {
        Some(default) => format!("{}: {} = {}", value.name, value.ty, default),
        None => format!("{}: {}", value.name, value.ty),
    }
}

fn sdl_type(ty: &graphql_parser::schema::Type<'_, String>) -> IntrospectionTypeRef {
    use graphql_parser::schema::Type;
    match ty {
        Type::NamedType(name) => IntrospectionTypeRef::named(TypeKind::Object, name),
        Type::ListType(inner) => IntrospectionTypeRef::wrap(TypeKind::List, sdl_type(inner)),
        Type::NonNullType(inner) => IntrospectionTypeRef::wrap(TypeKind::NonNull, sdl_type(inner)),
    }
}

fn sdl_input_value(value: &graphql_parser::schema::InputValue<'_, String>) -> InputValueDef {
    InputValueDef {
        name: value.name.clone(),
        description: value.description.clone(),
        ty: sdl_type(&value.value_type),
        default_value: value.default_value.as_ref().map(|v| v.to_string()),
    }
}

fn sdl_field(field: &graphql_parser::schema::Field<'_, String>) -> FieldDef {
    FieldDef {
        name: field.name.clone(),
        description: field.description.clone(),
        args: field.arguments.iter().map(sdl_input_value).collect(),
        ty: sdl_type(&field.field_type),
        is_deprecated: false,
        deprecation_reason: None,
    }
}

/// Fetch the backend type system over the given link
pub async fn introspect(link: &dyn TransportLink) -> Result<IntrospectedSchema> {
    tracing::debug!("Introspecting {}", link.endpoint());

    let response = link
        .execute(Operation::new(INTROSPECTION_QUERY))
        .await
        .map_err(|e| Error::IntrospectionFailed(e.to_string()))?;

    if response.has_errors() {
        let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(Error::IntrospectionFailed(messages.join("\n")));
    }

    let data = response
        .data
        .ok_or_else(|| Error::IntrospectionFailed("response carried no data".into()))?
        .into_json()
        .map_err(|e| Error::IntrospectionFailed(e.to_string()))?;

    IntrospectedSchema::from_introspection_response(data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::link::mock::MockLink;

    pub(crate) const BLOG_SDL: &str = r#"
        scalar DateTime

        interface Node {
            id: ID!
        }

        type Post implements Node {
            id: ID!
            title(upper: Boolean = false): String
            createdAt: DateTime
            author: User
        }

        type User implements Node {
            id: ID!
            name: String
            profile: Profile
        }

        type Profile {
            bio: String
        }

        type Dog { name: String barks: Boolean }
        type Cat { name: String meows: Boolean }
        union Animal = Dog | Cat

        enum Status { DRAFT PUBLISHED }

        input PostFilter {
            status: Status
            tag: String
        }

        input NewUser {
            name: String!
        }

        type Query {
            allPosts(first: Int, title: String, filter: PostFilter): [Post!]!
            post(id: ID!): Post
            node(id: ID!): Node
            animals: [Animal]
            status: Status
        }

        type Mutation {
            createUser(input: NewUser!): User
        }

        type Subscription {
            postAdded(status: Status): Post
        }
    "#;

    pub(crate) fn blog_schema() -> IntrospectedSchema {
        IntrospectedSchema::from_sdl(BLOG_SDL).expect("blog SDL parses")
    }

    #[test]
    fn sdl_builds_roots_and_implementers() {
        let schema = blog_schema();
        assert_eq!(schema.root_type_name(OperationType::Query), Some("Query"));
        assert_eq!(schema.root_type_name(OperationType::Subscription), Some("Subscription"));

        let node = schema.type_("Node").expect("Node exists");
        let implementers: Vec<&str> = node.possible_types.iter().map(|t| t.named_type()).collect();
        assert_eq!(implementers, vec!["Post", "User"]);
        assert!(schema.is_abstract("Animal"));
        assert!(!schema.is_abstract("Post"));

        let all_posts = schema.field("Query", "allPosts").expect("allPosts");
        assert_eq!(all_posts.ty.to_string(), "[Post!]!");
        assert_eq!(all_posts.ty.named_type(), "Post");
    }

    #[test]
    fn missing_and_undefined_root_types() {
        let schema = IntrospectedSchema::from_sdl("type Query { a: Int }").expect("parses");
        assert!(matches!(
            schema.root_type(OperationType::Mutation),
            Err(Error::MissingRootType(_))
        ));

        let schema = IntrospectedSchema::from_introspection_response(serde_json::json!({
            "__schema": {
                "queryType": { "name": "Root" },
                "mutationType": null,
                "subscriptionType": null,
                "types": []
            }
        }))
        .expect("parses");
        assert!(matches!(
            schema.root_type(OperationType::Query),
            Err(Error::NoSuchRootType(name)) if name == "Root"
        ));
    }

    #[test]
    fn introspection_payload_parses_nested_type_refs() {
        let schema = IntrospectedSchema::from_introspection_response(serde_json::json!({
            "__schema": {
                "queryType": { "name": "Query" },
                "types": [{
                    "kind": "OBJECT",
                    "name": "Query",
                    "fields": [{
                        "name": "ids",
                        "args": [],
                        "type": {
                            "kind": "NON_NULL", "name": null,
                            "ofType": { "kind": "LIST", "name": null,
                                "ofType": { "kind": "SCALAR", "name": "ID", "ofType": null } }
                        },
                        "isDeprecated": false
                    }],
                    "inputFields": null,
                    "interfaces": [],
                    "enumValues": null,
                    "possibleTypes": null
                }]
            }
        }))
        .expect("parses");

        let ids = schema.field("Query", "ids").expect("field exists");
        assert_eq!(ids.ty.to_string(), "[ID]!");
        assert_eq!(ids.ty.to_type_ref().to_string(), "[ID]!");
    }

    #[test]
    fn sdl_round_trips_through_printer() {
        let schema = blog_schema();
        let printed = schema.to_sdl();
        assert!(printed.contains("type Post implements Node {"));
        assert!(printed.contains("  title(upper: Boolean = false): String"));
        assert!(printed.contains("union Animal = Dog | Cat"));
        assert!(!printed.contains("scalar String"));

        let reparsed = IntrospectedSchema::from_sdl(&printed).expect("printed SDL parses");
        assert_eq!(reparsed.types().count(), schema.types().count());
    }

    #[test]
    fn default_values_parse_back_into_values() {
        let schema = blog_schema();
        let title = schema.field("Post", "title").expect("title");
        let upper = title.arg("upper").expect("upper");
        assert_eq!(upper.default_const(), Some(ConstValue::Boolean(false)));

        let all_posts = schema.field("Query", "allPosts").expect("allPosts");
        assert_eq!(all_posts.arg("first").and_then(InputValueDef::default_const), None);
    }

    #[tokio::test]
    async fn introspect_maps_backend_errors() {
        let link = MockLink::new("mock").respond(serde_json::json!({
            "errors": [{ "message": "introspection disabled" }]
        }));
        let err = introspect(&link).await.err().expect("fails");
        assert!(matches!(err, Error::IntrospectionFailed(msg) if msg == "introspection disabled"));

        let link = MockLink::new("mock");
        assert!(matches!(
            introspect(&link).await,
            Err(Error::IntrospectionFailed(_))
        ));
    }
}
