//! Canonical document printing.
//!
//! The output follows the layout of graphql-js `print`: two-space
//! indentation, one selection per line, and an anonymous query without
//! variables or directives printed as a bare selection set. The printed form
//! is what goes on the wire and what operation keys are derived from.

use crate::ast::*;

/// Prints a document.
pub fn print(document: &OperationDocument) -> String {
    Printer::new().print(document)
}

/// Prints a single value.
pub fn print_value(value: &Value) -> String {
    let mut printer = Printer::new();
    printer.write_value(value);
    printer.output
}

/// A document printer.
#[derive(Debug, Default)]
pub struct Printer {
    output: String,
    indent: usize,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prints a document, consuming the printer.
    pub fn print(mut self, document: &OperationDocument) -> String {
        for (i, definition) in document.definitions.iter().enumerate() {
            if i > 0 {
                self.output.push_str("\n\n");
            }
            match definition {
                Definition::Operation(operation) => self.write_operation(operation),
                Definition::Fragment(fragment) => self.write_fragment(fragment),
            }
        }
        self.output
    }

    fn write_operation(&mut self, operation: &OperationDefinition) {
        let shorthand = operation.operation == OperationType::Query
            && operation.name.is_none()
            && operation.variable_definitions.is_empty()
            && operation.directives.is_empty();

        if !shorthand {
            self.output.push_str(operation.operation.as_str());
            if operation.name.is_some() || !operation.variable_definitions.is_empty() {
                self.output.push(' ');
            }
            if let Some(name) = &operation.name {
                self.output.push_str(name);
            }
            if !operation.variable_definitions.is_empty() {
                self.output.push('(');
                for (i, variable) in operation.variable_definitions.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    self.write_variable_definition(variable);
                }
                self.output.push(')');
            }
            self.write_directives(&operation.directives);
            self.output.push(' ');
        }

        self.write_selection_set(&operation.selection_set);
    }

    fn write_variable_definition(&mut self, variable: &VariableDefinition) {
        self.output.push('$');
        self.output.push_str(&variable.name);
        self.output.push_str(": ");
        self.write_type(&variable.ty);
        if let Some(default) = &variable.default_value {
            self.output.push_str(" = ");
            self.write_value(default);
        }
        self.write_directives(&variable.directives);
    }

    fn write_fragment(&mut self, fragment: &FragmentDefinition) {
        self.output.push_str("fragment ");
        self.output.push_str(&fragment.name);
        self.output.push_str(" on ");
        self.output.push_str(&fragment.type_condition);
        self.write_directives(&fragment.directives);
        self.output.push(' ');
        self.write_selection_set(&fragment.selection_set);
    }

    fn write_type(&mut self, ty: &Type) {
        match ty {
            Type::Named(name) => self.output.push_str(name),
            Type::List(inner) => {
                self.output.push('[');
                self.write_type(inner);
                self.output.push(']');
            }
            Type::NonNull(inner) => {
                self.write_type(inner);
                self.output.push('!');
            }
        }
    }

    fn write_selection_set(&mut self, selection_set: &SelectionSet) {
        if selection_set.is_empty() {
            self.output.push_str("{}");
            return;
        }
        self.output.push_str("{\n");
        self.indent += 1;
        for selection in &selection_set.selections {
            self.write_indent();
            self.write_selection(selection);
            self.output.push('\n');
        }
        self.indent -= 1;
        self.write_indent();
        self.output.push('}');
    }

    fn write_selection(&mut self, selection: &Selection) {
        match selection {
            Selection::Field(field) => {
                if let Some(alias) = &field.alias {
                    self.output.push_str(alias);
                    self.output.push_str(": ");
                }
                self.output.push_str(&field.name);
                self.write_arguments(&field.arguments);
                self.write_directives(&field.directives);
                if !field.selection_set.is_empty() {
                    self.output.push(' ');
                    self.write_selection_set(&field.selection_set);
                }
            }
            Selection::FragmentSpread(spread) => {
                self.output.push_str("...");
                self.output.push_str(&spread.name);
                self.write_directives(&spread.directives);
            }
            Selection::InlineFragment(inline) => {
                self.output.push_str("...");
                if let Some(type_condition) = &inline.type_condition {
                    self.output.push_str(" on ");
                    self.output.push_str(type_condition);
                }
                self.write_directives(&inline.directives);
                self.output.push(' ');
                self.write_selection_set(&inline.selection_set);
            }
        }
    }

    fn write_arguments(&mut self, arguments: &[Argument]) {
        if arguments.is_empty() {
            return;
        }
        self.output.push('(');
        for (i, argument) in arguments.iter().enumerate() {
            if i > 0 {
                self.output.push_str(", ");
            }
            self.output.push_str(&argument.name);
            self.output.push_str(": ");
            self.write_value(&argument.value);
        }
        self.output.push(')');
    }

    fn write_directives(&mut self, directives: &[Directive]) {
        for directive in directives {
            self.output.push_str(" @");
            self.output.push_str(&directive.name);
            self.write_arguments(&directive.arguments);
        }
    }

    fn write_value(&mut self, value: &Value) {
        match value {
            Value::Variable(name) => {
                self.output.push('$');
                self.output.push_str(name);
            }
            Value::Int(text) | Value::Float(text) | Value::Enum(text) => {
                self.output.push_str(text);
            }
            Value::String(text) => self.write_string(text),
            Value::Boolean(true) => self.output.push_str("true"),
            Value::Boolean(false) => self.output.push_str("false"),
            Value::Null => self.output.push_str("null"),
            Value::List(items) => {
                self.output.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    self.write_value(item);
                }
                self.output.push(']');
            }
            Value::Object(fields) => {
                self.output.push('{');
                for (i, (name, item)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    self.output.push_str(name);
                    self.output.push_str(": ");
                    self.write_value(item);
                }
                self.output.push('}');
            }
        }
    }

    fn write_string(&mut self, text: &str) {
        self.output.push('"');
        for c in text.chars() {
            match c {
                '"' => self.output.push_str("\\\""),
                '\\' => self.output.push_str("\\\\"),
                '\u{8}' => self.output.push_str("\\b"),
                '\u{c}' => self.output.push_str("\\f"),
                '\n' => self.output.push_str("\\n"),
                '\r' => self.output.push_str("\\r"),
                '\t' => self.output.push_str("\\t"),
                c if c < '\u{20}' || ('\u{7f}'..='\u{9f}').contains(&c) => {
                    self.output.push_str(&format!("\\u{:04X}", c as u32));
                }
                c => self.output.push(c),
            }
        }
        self.output.push('"');
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.output.push_str("  ");
        }
    }
}
