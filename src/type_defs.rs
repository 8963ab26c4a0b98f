//! Completing partial type definitions from a base schema.

use crate::error::{Error, Result};
use crate::introspection::is_builtin_scalar;
use graphql_parser::schema::{
    parse_schema, Definition, Field, InputValue, Type, TypeDefinition, TypeExtension,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Add to `type_defs` every type it references, transitively, taken from `base_sdl`.
///
/// References are followed through field types, arguments, input fields, union
/// members and implemented interfaces. Built-in scalars are never added. Fails with
/// [`Error::UnresolvedType`] when a referenced type is defined in neither document.
/// Running it again on its own output returns the output unchanged.
pub fn collect_type_defs(base_sdl: &str, type_defs: &str) -> Result<String> {
    let base = parse_schema::<String>(base_sdl)
        .map_err(|e| Error::Schema(format!("invalid base SDL: {e}")))?;
    let mut document = parse_schema::<String>(type_defs)
        .map_err(|e| Error::Schema(format!("invalid type definitions: {e}")))?;

    let base_types: HashMap<&str, &TypeDefinition<'_, String>> = base
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            Definition::TypeDefinition(ty) => Some((type_name(ty), ty)),
            _ => None,
        })
        .collect();

    let mut known: HashSet<String> = document
        .definitions
        .iter()
        .filter_map(definition_name)
        .map(str::to_string)
        .collect();
    let mut worklist: VecDeque<String> = document
        .definitions
        .iter()
        .flat_map(references)
        .collect();

    while let Some(name) = worklist.pop_front() {
        if is_builtin_scalar(&name) || known.contains(&name) {
            continue;
        }
        let ty = base_types
            .get(name.as_str())
            .ok_or_else(|| Error::UnresolvedType(name.clone()))?;

        tracing::debug!("Pulling type {} from the base schema", name);
        let definition = Definition::TypeDefinition((*ty).clone());
        worklist.extend(references(&definition));
        document.definitions.push(definition);
        known.insert(name);
    }

    Ok(document.to_string())
}

fn type_name<'a>(ty: &'a TypeDefinition<'_, String>) -> &'a str {
    match ty {
        TypeDefinition::Scalar(t) => &t.name,
        TypeDefinition::Object(t) => &t.name,
        TypeDefinition::Interface(t) => &t.name,
        TypeDefinition::Union(t) => &t.name,
        TypeDefinition::Enum(t) => &t.name,
        TypeDefinition::InputObject(t) => &t.name,
    }
}

fn definition_name<'a>(definition: &'a Definition<'_, String>) -> Option<&'a str> {
    match definition {
        Definition::TypeDefinition(ty) => Some(type_name(ty)),
        Definition::TypeExtension(extension) => Some(match extension {
            TypeExtension::Scalar(t) => &t.name,
            TypeExtension::Object(t) => &t.name,
            TypeExtension::Interface(t) => &t.name,
            TypeExtension::Union(t) => &t.name,
            TypeExtension::Enum(t) => &t.name,
            TypeExtension::InputObject(t) => &t.name,
        }),
        Definition::SchemaDefinition(_) | Definition::DirectiveDefinition(_) => None,
    }
}

fn references(definition: &Definition<'_, String>) -> Vec<String> {
    let mut names = Vec::new();
    match definition {
        Definition::TypeDefinition(ty) => match ty {
            TypeDefinition::Object(t) => {
                field_references(&t.fields, &mut names);
                names.extend(t.implements_interfaces.iter().cloned());
            }
            TypeDefinition::Interface(t) => {
                field_references(&t.fields, &mut names);
                names.extend(t.implements_interfaces.iter().cloned());
            }
            TypeDefinition::Union(t) => names.extend(t.types.iter().cloned()),
            TypeDefinition::InputObject(t) => input_references(&t.fields, &mut names),
            TypeDefinition::Scalar(_) | TypeDefinition::Enum(_) => {}
        },
        Definition::TypeExtension(extension) => match extension {
            TypeExtension::Object(t) => {
                field_references(&t.fields, &mut names);
                names.extend(t.implements_interfaces.iter().cloned());
            }
            TypeExtension::Interface(t) => field_references(&t.fields, &mut names),
            TypeExtension::Union(t) => names.extend(t.types.iter().cloned()),
            TypeExtension::InputObject(t) => input_references(&t.fields, &mut names),
            TypeExtension::Scalar(_) | TypeExtension::Enum(_) => {}
        },
        Definition::SchemaDefinition(schema) => {
            names.extend(schema.query.iter().cloned());
            names.extend(schema.mutation.iter().cloned());
            names.extend(schema.subscription.iter().cloned());
        }
        Definition::DirectiveDefinition(directive) => {
            input_references(&directive.arguments, &mut names)
        }
    }
    names
}

fn field_references(fields: &[Field<'_, String>], names: &mut Vec<String>) {
    for field in fields {
        names.push(named_type(&field.field_type).to_string());
        input_references(&field.arguments, names);
    }
}

fn input_references(values: &[InputValue<'_, String>], names: &mut Vec<String>) {
    names.extend(
        values
            .iter()
            .map(|value| named_type(&value.value_type).to_string()),
    );
}

fn named_type<'a>(ty: &'a Type<'_, String>) -> &'a str {
    match ty {
        Type::NamedType(name) => name,
        Type::ListType(inner) | Type::NonNullType(inner) => named_type(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
        type Query {
            posts: [Post]
        }

        interface Node {
            id: ID!
        }

        type Post implements Node {
            id: ID!
            comments(filter: CommentFilter): [Comment!]!
        }

        type Comment {
            text: String
            author: User
        }

        type User {
            name: String
        }

        input CommentFilter {
            minLength: Int
        }
    "#;

    #[test]
    fn pulls_referenced_types_transitively() {
        let collected =
            collect_type_defs(BASE, "type Query { featured: Post }").expect("types resolve");

        for expected in [
            "type Post implements Node {",
            "interface Node {",
            "type Comment {",
            "type User {",
            "input CommentFilter {",
        ] {
            assert!(collected.contains(expected), "missing {expected} in\n{collected}");
        }
        assert_eq!(collected.matches("type Query").count(), 1);
        assert!(!collected.contains("posts: [Post]"));
    }

    #[test]
    fn collecting_twice_is_a_no_op() {
        let once = collect_type_defs(BASE, "type Query { featured: Post }").expect("first pass");
        let twice = collect_type_defs(BASE, &once).expect("second pass");
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_references_fail() {
        let err = collect_type_defs(BASE, "type Query { missing: Ghost }")
            .err()
            .expect("Ghost is undefined");
        assert!(matches!(err, Error::UnresolvedType(name) if name == "Ghost"));
    }

    #[test]
    fn extensions_count_as_definitions() {
        let collected = collect_type_defs(BASE, "extend type Query { first: Comment }")
            .expect("types resolve");
        assert!(collected.contains("type Comment {"));
        assert!(!collected.contains("posts: [Post]"));
    }
}
