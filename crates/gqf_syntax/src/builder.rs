//! Programmatic document construction.
//!
//! [`Gqf`] is the handle a document builder closure receives. It can parse
//! GraphQL text or assemble an operation field by field:
//!
//! ```
//! use gqf_syntax::{Field, Gqf, Type, Value};
//!
//! let gqf = Gqf::new();
//! let doc = gqf
//!     .subscription()
//!     .name("OnMessage")
//!     .variable("room", Type::named("ID").non_null())
//!     .select(
//!         Field::new("messageAdded")
//!             .argument("room", Value::variable("room"))
//!             .select(Field::new("id"))
//!             .select(Field::new("text")),
//!     )
//!     .build::<(), ()>();
//! assert_eq!(doc.document().operation_name(), Some("OnMessage"));
//! ```

use crate::ast::*;
use crate::error::SyntaxError;
use crate::typed::TypedDocument;

/// The document builder handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gqf;

impl Gqf {
    pub fn new() -> Self {
        Self
    }

    /// Parses GraphQL text into a typed document.
    pub fn parse<D, V>(&self, source: &str) -> Result<TypedDocument<D, V>, SyntaxError> {
        TypedDocument::parse(source)
    }

    pub fn query(&self) -> OperationBuilder {
        OperationBuilder::new(OperationType::Query)
    }

    pub fn mutation(&self) -> OperationBuilder {
        OperationBuilder::new(OperationType::Mutation)
    }

    pub fn subscription(&self) -> OperationBuilder {
        OperationBuilder::new(OperationType::Subscription)
    }
}

/// Produces enum literals, which print without quotes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumHelper;

impl EnumHelper {
    pub fn new() -> Self {
        Self
    }

    pub fn value(&self, name: impl Into<String>) -> Value {
        Value::Enum(name.into())
    }
}

/// Builds one operation plus any fragments it spreads.
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    definition: OperationDefinition,
    fragments: Vec<FragmentDefinition>,
}

impl OperationBuilder {
    pub fn new(operation: OperationType) -> Self {
        Self {
            definition: OperationDefinition {
                operation,
                name: None,
                variable_definitions: Vec::new(),
                directives: Vec::new(),
                selection_set: SelectionSet::default(),
            },
            fragments: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.definition.name = Some(name.into());
        self
    }

    /// Declares `$name: ty`.
    pub fn variable(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.definition.variable_definitions.push(VariableDefinition {
            name: name.into(),
            ty,
            default_value: None,
            directives: Vec::new(),
        });
        self
    }

    /// Declares `$name: ty = default`.
    pub fn variable_with_default(
        mut self,
        name: impl Into<String>,
        ty: Type,
        default: impl Into<Value>,
    ) -> Self {
        self.definition.variable_definitions.push(VariableDefinition {
            name: name.into(),
            ty,
            default_value: Some(default.into()),
            directives: Vec::new(),
        });
        self
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.definition.directives.push(directive);
        self
    }

    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.definition
            .selection_set
            .selections
            .push(selection.into());
        self
    }

    pub fn fragment(mut self, fragment: FragmentDefinition) -> Self {
        self.fragments.push(fragment);
        self
    }

    /// Finishes the untyped document. The operation comes first.
    pub fn build_document(self) -> OperationDocument {
        let mut definitions = Vec::with_capacity(1 + self.fragments.len());
        definitions.push(Definition::Operation(self.definition));
        definitions.extend(self.fragments.into_iter().map(Definition::Fragment));
        OperationDocument::new(definitions)
    }

    pub fn build<D, V>(self) -> TypedDocument<D, V> {
        TypedDocument::new(self.build_document())
    }
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            directives: Vec::new(),
            selection_set: SelectionSet::default(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.push(Argument {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.selections.push(selection.into());
        self
    }
}

impl Directive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.push(Argument {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

impl FragmentSpread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directives: Vec::new(),
        }
    }
}

impl InlineFragment {
    /// An inline fragment with a type condition.
    pub fn on(type_condition: impl Into<String>) -> Self {
        Self {
            type_condition: Some(type_condition.into()),
            directives: Vec::new(),
            selection_set: SelectionSet::default(),
        }
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.selections.push(selection.into());
        self
    }
}

impl FragmentDefinition {
    pub fn new(name: impl Into<String>, type_condition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_condition: type_condition.into(),
            directives: Vec::new(),
            selection_set: SelectionSet::default(),
        }
    }

    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.selections.push(selection.into());
        self
    }
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Self::Field(field)
    }
}

impl From<FragmentSpread> for Selection {
    fn from(spread: FragmentSpread) -> Self {
        Self::FragmentSpread(spread)
    }
}

impl From<InlineFragment> for Selection {
    fn from(inline: InlineFragment) -> Self {
        Self::InlineFragment(inline)
    }
}

/// A bare field name selects a leaf field.
impl From<&str> for Selection {
    fn from(name: &str) -> Self {
        Self::Field(Field::new(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::printer::print;

    #[test]
    fn test_built_document_matches_parsed() {
        let gqf = Gqf::new();
        let enums = EnumHelper::new();
        let built = gqf
            .query()
            .name("Users")
            .variable_with_default("first", Type::named("Int"), 10)
            .select(
                Field::new("users")
                    .argument("first", Value::variable("first"))
                    .argument("order", enums.value("ASC"))
                    .select("id")
                    .select(FragmentSpread::new("UserFields")),
            )
            .fragment(FragmentDefinition::new("UserFields", "User").select("name"))
            .build_document();

        let parsed = parse(
            "query Users($first: Int = 10) {
               users(first: $first, order: ASC) { id ...UserFields }
             }
             fragment UserFields on User { name }",
        )
        .unwrap();

        assert_eq!(built, parsed);
        assert_eq!(print(&built), print(&parsed));
    }

    #[test]
    fn test_inline_fragment_and_directives() {
        let doc = Gqf::new()
            .subscription()
            .directive(Directive::new("live"))
            .select(
                Field::new("event")
                    .alias("e")
                    .select(InlineFragment::on("Tick").select("at"))
                    .directive(Directive::new("include").argument("if", true)),
            )
            .build_document();
        assert_eq!(
            print(&doc),
            "subscription @live {\n  e: event @include(if: true) {\n    ... on Tick {\n      at\n    }\n  }\n}"
        );
    }

    #[test]
    fn test_parse_through_handle() {
        let typed = Gqf::new().parse::<(), ()>("mutation { ping }").unwrap();
        assert_eq!(typed.operation_types(), vec![OperationType::Mutation]);
        assert!(Gqf::new().parse::<(), ()>("mutation {").is_err());
    }
}
