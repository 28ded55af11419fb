// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Canonical printing of documents
//!
//! The printer writes into any [`fmt::Write`], which lets the plan cache
//! stream the printed operation straight into a hasher.

use std::fmt::{self, Write};

use super::*;

/// Print every operation and fragment of `doc`
pub fn print_document<W: Write>(doc: &Document, out: &mut W) -> fmt::Result {
    let mut first = true;
    for op_ref in 0..doc.operations.len() {
        if !first {
            out.write_char(' ')?;
        }
        first = false;
        print_operation(doc, op_ref, out)?;
    }
    for fragment in &doc.fragments {
        if !first {
            out.write_char(' ')?;
        }
        first = false;
        write!(out, "fragment {} on {}", fragment.name, fragment.type_condition)?;
        print_directives(&fragment.directives, out)?;
        out.write_char(' ')?;
        print_selection_set(doc, fragment.selection_set, out)?;
    }
    Ok(())
}

/// Print a single operation definition
pub fn print_operation<W: Write>(doc: &Document, op_ref: usize, out: &mut W) -> fmt::Result {
    let op = &doc.operations[op_ref];
    out.write_str(op.operation_type.as_str())?;
    if let Some(name) = &op.name {
        write!(out, " {}", name)?;
    }
    if !op.variable_definitions.is_empty() {
        out.write_char('(')?;
        for (i, definition) in op.variable_definitions.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            write!(out, "${}: {}", definition.name, definition.type_ref)?;
            if let Some(default) = &definition.default_value {
                out.write_str(" = ")?;
                print_value(default, out)?;
            }
        }
        out.write_char(')')?;
    }
    print_directives(&op.directives, out)?;
    out.write_char(' ')?;
    print_selection_set(doc, op.selection_set, out)
}

fn print_selection_set<W: Write>(doc: &Document, set: usize, out: &mut W) -> fmt::Result {
    out.write_char('{')?;
    for selection in &doc.selection_sets[set].selections {
        out.write_char(' ')?;
        match *selection {
            Selection::Field(field_ref) => {
                let field = &doc.fields[field_ref];
                if let Some(alias) = &field.alias {
                    write!(out, "{}: ", alias)?;
                }
                out.write_str(&field.name)?;
                print_arguments(&field.arguments, out)?;
                print_directives(&field.directives, out)?;
                if let Some(child) = field.selection_set {
                    out.write_char(' ')?;
                    print_selection_set(doc, child, out)?;
                }
            }
            Selection::InlineFragment(fragment_ref) => {
                let fragment = &doc.inline_fragments[fragment_ref];
                out.write_str("...")?;
                if let Some(type_condition) = &fragment.type_condition {
                    write!(out, " on {}", type_condition)?;
                }
                print_directives(&fragment.directives, out)?;
                out.write_char(' ')?;
                print_selection_set(doc, fragment.selection_set, out)?;
            }
            Selection::FragmentSpread(spread_ref) => {
                let spread = &doc.fragment_spreads[spread_ref];
                write!(out, "...{}", spread.name)?;
                print_directives(&spread.directives, out)?;
            }
        }
    }
    out.write_str(" }")
}

fn print_arguments<W: Write>(arguments: &[Argument], out: &mut W) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    out.write_char('(')?;
    for (i, argument) in arguments.iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write!(out, "{}: ", argument.name)?;
        print_value(&argument.value, out)?;
    }
    out.write_char(')')
}

fn print_directives<W: Write>(directives: &[Directive], out: &mut W) -> fmt::Result {
    for directive in directives {
        write!(out, " @{}", directive.name)?;
        print_arguments(&directive.arguments, out)?;
    }
    Ok(())
}

pub fn print_value<W: Write>(value: &Value, out: &mut W) -> fmt::Result {
    match value {
        Value::Variable(name) => write!(out, "${}", name),
        Value::Int(i) => write!(out, "{}", i),
        Value::Float(f) => write!(out, "{:?}", f),
        Value::String(s) => write!(out, "{}", serde_json::Value::String(s.clone())),
        Value::Boolean(b) => write!(out, "{}", b),
        Value::Null => out.write_str("null"),
        Value::Enum(name) => out.write_str(name),
        Value::List(items) => {
            out.write_char('[')?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                print_value(item, out)?;
            }
            out.write_char(']')
        }
        Value::Object(fields) => {
            out.write_char('{')?;
            for (i, (name, item)) in fields.iter().enumerate() {
                if i > 0 {
                    out.write_str(", ")?;
                }
                write!(out, "{}: ", name)?;
                print_value(item, out)?;
            }
            out.write_char('}')
        }
    }
}
