//! Compact GraphQL printing for forwarded documents.
//!
//! Output is canonical for a given AST: one space between tokens, selections on a
//! single line, fragment definitions on their own lines after the operation.

use async_graphql::parser::types::{
    Directive, Field, FragmentDefinition, OperationDefinition, Selection, SelectionSet,
    VariableDefinition,
};
use async_graphql::parser::Positioned;
use async_graphql::Name;
use async_graphql_value::Value;
use std::fmt::Write;

/// Print an operation followed by the given fragment definitions
pub fn print_document(
    operation: &OperationDefinition,
    fragments: &[(Name, FragmentDefinition)],
) -> String {
    let mut out = String::new();
    print_operation(operation, &mut out);
    for (name, fragment) in fragments {
        out.push('\n');
        print_fragment(name, fragment, &mut out);
    }
    out
}

fn print_operation(operation: &OperationDefinition, out: &mut String) {
    let _ = write!(out, "{}", operation.ty);
    if !operation.variable_definitions.is_empty() {
        out.push_str(" (");
        for (i, definition) in operation.variable_definitions.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            print_variable_definition(&definition.node, out);
        }
        out.push(')');
    }
    print_directives(&operation.directives, out);
    out.push(' ');
    print_selection_set(&operation.selection_set.node, out);
}

fn print_variable_definition(definition: &VariableDefinition, out: &mut String) {
    let _ = write!(out, "${}: {}", definition.name.node, definition.var_type.node);
    if let Some(default) = &definition.default_value {
        let _ = write!(out, " = {}", default.node);
    }
    print_directives(&definition.directives, out);
}

pub fn print_fragment(name: &Name, fragment: &FragmentDefinition, out: &mut String) {
    let _ = write!(out, "fragment {} on {}", name, fragment.type_condition.node.on.node);
    print_directives(&fragment.directives, out);
    out.push(' ');
    print_selection_set(&fragment.selection_set.node, out);
}

pub fn print_selection_set(set: &SelectionSet, out: &mut String) {
    out.push('{');
    for item in &set.items {
        out.push(' ');
        print_selection(&item.node, out);
    }
    out.push_str(" }");
}

/// Print one selection; used to compare selections structurally
pub fn print_selection(selection: &Selection, out: &mut String) {
    match selection {
        Selection::Field(field) => print_field(&field.node, out),
        Selection::FragmentSpread(spread) => {
            let _ = write!(out, "...{}", spread.node.fragment_name.node);
            print_directives(&spread.node.directives, out);
        }
        Selection::InlineFragment(fragment) => {
            out.push_str("...");
            if let Some(condition) = &fragment.node.type_condition {
                let _ = write!(out, " on {}", condition.node.on.node);
            }
            print_directives(&fragment.node.directives, out);
            out.push(' ');
            print_selection_set(&fragment.node.selection_set.node, out);
        }
    }
}

fn print_field(field: &Field, out: &mut String) {
    if let Some(alias) = &field.alias {
        let _ = write!(out, "{}: ", alias.node);
    }
    out.push_str(&field.name.node);
    print_arguments(&field.arguments, out);
    print_directives(&field.directives, out);
    if !field.selection_set.node.items.is_empty() {
        out.push(' ');
        print_selection_set(&field.selection_set.node, out);
    }
}

fn print_arguments(arguments: &[(Positioned<Name>, Positioned<Value>)], out: &mut String) {
    if arguments.is_empty() {
        return;
    }
    out.push('(');
    for (i, (name, value)) in arguments.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}: {}", name.node, value.node);
    }
    out.push(')');
}

fn print_directives(directives: &[Positioned<Directive>], out: &mut String) {
    for directive in directives {
        let _ = write!(out, " @{}", directive.node.name.node);
        print_arguments(&directive.node.arguments, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::parser::parse_query;
    use async_graphql::parser::types::DocumentOperations;

    fn reprint(query: &str) -> String {
        let doc = parse_query(query).expect("parses");
        let op = match &doc.operations {
            DocumentOperations::Single(op) => op,
            DocumentOperations::Multiple(ops) => ops.values().next().expect("one operation"),
        };
        let mut fragments: Vec<(Name, FragmentDefinition)> = doc
            .fragments
            .iter()
            .map(|(name, fragment)| (name.clone(), fragment.node.clone()))
            .collect();
        fragments.sort_by(|a, b| a.0.cmp(&b.0));
        print_document(&op.node, &fragments)
    }

    #[test]
    fn prints_compact_operations() {
        assert_eq!(
            reprint("{\n  allPosts {\n    id\n    title\n  }\n}"),
            "query { allPosts { id title } }"
        );
        assert_eq!(
            reprint("query Q($id: ID!, $n: Int = 3) { p: user(id: $id, n: $n) @include(if: true) { name } }"),
            "query ($id: ID!, $n: Int = 3) { p: user(id: $id, n: $n) @include(if: true) { name } }"
        );
    }

    #[test]
    fn prints_fragments_after_the_operation() {
        assert_eq!(
            reprint("query { node(id: \"1\") { ...N ... on Post { title } } } fragment N on Node { id }"),
            "query { node(id: \"1\") { ...N ... on Post { title } } }\nfragment N on Node { id }"
        );
    }

    #[test]
    fn printed_output_parses_back_to_the_same_text() {
        let printed = reprint(
            "mutation ($input: NewUser!) { createUser(input: $input, tags: [\"a\", \"b\"], meta: {x: 1}) { id } }",
        );
        assert_eq!(reprint(&printed), printed);
    }
}
