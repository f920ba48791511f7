//! Recursive descent parser for executable GraphQL documents.
//!
//! The parser stops at the first error. Type system definitions are
//! rejected: gqf only sends operations and fragments to a server.

use crate::ast::*;
use crate::error::SyntaxError;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

type PResult<T> = Result<T, SyntaxError>;

const TYPE_SYSTEM_KEYWORDS: &[&str] = &[
    "schema",
    "scalar",
    "type",
    "interface",
    "union",
    "enum",
    "input",
    "directive",
    "extend",
];

/// Parses an executable document.
pub fn parse(source: &str) -> Result<OperationDocument, SyntaxError> {
    Parser::new(source).parse_document()
}

/// The GraphQL parser.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    source: &'a str,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Creates a parser positioned at the first token.
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            source,
            current,
        }
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    #[inline]
    fn at(&self) -> TokenKind {
        self.current.kind
    }

    #[inline]
    fn at_kind(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.at_kind(TokenKind::Name) && self.current_text() == keyword
    }

    fn current_text(&self) -> &'a str {
        self.lexer.span_text(self.current.span)
    }

    fn advance(&mut self) -> Token {
        let token = self.current;
        self.current = self.lexer.next_token();
        token
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.at_kind(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_expected(kind.describe()))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        let token = self.expect(TokenKind::Name)?;
        Ok(self.lexer.span_text(token.span).to_string())
    }

    fn expect_keyword(&mut self, keyword: &str) -> PResult<()> {
        if self.at_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_expected(&format!("`{keyword}`")))
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.current.span, self.source)
    }

    fn error_expected(&self, expected: &str) -> SyntaxError {
        let found = match self.at() {
            TokenKind::Name => format!("name `{}`", self.current_text()),
            TokenKind::Error => format!("invalid token `{}`", self.current_text()),
            kind => kind.describe().to_string(),
        };
        self.error(format!("expected {expected}, found {found}"))
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    /// Parses a whole document.
    pub fn parse_document(&mut self) -> PResult<OperationDocument> {
        let mut definitions = Vec::new();
        while !self.at_kind(TokenKind::Eof) {
            definitions.push(self.parse_definition()?);
        }
        if definitions.is_empty() {
            return Err(self.error("document contains no definitions"));
        }
        Ok(OperationDocument { definitions })
    }

    fn parse_definition(&mut self) -> PResult<Definition> {
        match self.at() {
            TokenKind::LBrace => {
                let selection_set = self.parse_selection_set()?;
                Ok(Definition::Operation(OperationDefinition {
                    operation: OperationType::Query,
                    name: None,
                    variable_definitions: Vec::new(),
                    directives: Vec::new(),
                    selection_set,
                }))
            }
            TokenKind::Name => {
                let text = self.current_text();
                if let Some(operation) = OperationType::from_keyword(text) {
                    return self.parse_operation(operation).map(Definition::Operation);
                }
                if text == "fragment" {
                    return self.parse_fragment().map(Definition::Fragment);
                }
                if TYPE_SYSTEM_KEYWORDS.contains(&text) {
                    return Err(self.error(format!(
                        "type system definition `{text}` is not allowed in an executable document"
                    )));
                }
                Err(self.error_expected("an operation or fragment definition"))
            }
            TokenKind::StringLiteral | TokenKind::BlockStringLiteral => Err(
                self.error("descriptions are only allowed on type system definitions"),
            ),
            _ => Err(self.error_expected("an operation or fragment definition")),
        }
    }

    fn parse_operation(&mut self, operation: OperationType) -> PResult<OperationDefinition> {
        self.advance();

        let name = if self.at_kind(TokenKind::Name) {
            Some(self.expect_name()?)
        } else {
            None
        };
        let variable_definitions = if self.at_kind(TokenKind::LParen) {
            self.parse_variable_definitions()?
        } else {
            Vec::new()
        };
        let directives = self.parse_directives(false)?;
        let selection_set = self.parse_selection_set()?;

        Ok(OperationDefinition {
            operation,
            name,
            variable_definitions,
            directives,
            selection_set,
        })
    }

    fn parse_variable_definitions(&mut self) -> PResult<Vec<VariableDefinition>> {
        self.expect(TokenKind::LParen)?;
        let mut definitions = Vec::new();
        loop {
            self.expect(TokenKind::Dollar)?;
            let name = self.expect_name()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            let default_value = if self.at_kind(TokenKind::Eq) {
                self.advance();
                Some(self.parse_value(true)?)
            } else {
                None
            };
            let directives = self.parse_directives(true)?;
            definitions.push(VariableDefinition {
                name,
                ty,
                default_value,
                directives,
            });
            if self.at_kind(TokenKind::RParen) {
                self.advance();
                return Ok(definitions);
            }
        }
    }

    fn parse_fragment(&mut self) -> PResult<FragmentDefinition> {
        self.advance();
        if self.at_keyword("on") {
            return Err(self.error("a fragment cannot be named `on`"));
        }
        let name = self.expect_name()?;
        self.expect_keyword("on")?;
        let type_condition = self.expect_name()?;
        let directives = self.parse_directives(false)?;
        let selection_set = self.parse_selection_set()?;

        Ok(FragmentDefinition {
            name,
            type_condition,
            directives,
            selection_set,
        })
    }

    // =========================================================================
    // Selections
    // =========================================================================

    fn parse_selection_set(&mut self) -> PResult<SelectionSet> {
        self.expect(TokenKind::LBrace)?;
        let mut selections = Vec::new();
        loop {
            selections.push(self.parse_selection()?);
            if self.at_kind(TokenKind::RBrace) {
                self.advance();
                return Ok(SelectionSet { selections });
            }
        }
    }

    fn parse_selection(&mut self) -> PResult<Selection> {
        if !self.at_kind(TokenKind::Spread) {
            return self.parse_field().map(Selection::Field);
        }
        self.advance();

        if self.at_kind(TokenKind::Name) && !self.at_keyword("on") {
            let name = self.expect_name()?;
            let directives = self.parse_directives(false)?;
            return Ok(Selection::FragmentSpread(FragmentSpread { name, directives }));
        }

        let type_condition = if self.at_keyword("on") {
            self.advance();
            Some(self.expect_name()?)
        } else {
            None
        };
        let directives = self.parse_directives(false)?;
        let selection_set = self.parse_selection_set()?;

        Ok(Selection::InlineFragment(InlineFragment {
            type_condition,
            directives,
            selection_set,
        }))
    }

    fn parse_field(&mut self) -> PResult<Field> {
        let first = self.expect_name()?;
        let (alias, name) = if self.at_kind(TokenKind::Colon) {
            self.advance();
            (Some(first), self.expect_name()?)
        } else {
            (None, first)
        };
        let arguments = self.parse_arguments(false)?;
        let directives = self.parse_directives(false)?;
        let selection_set = if self.at_kind(TokenKind::LBrace) {
            self.parse_selection_set()?
        } else {
            SelectionSet::default()
        };

        Ok(Field {
            alias,
            name,
            arguments,
            directives,
            selection_set,
        })
    }

    fn parse_arguments(&mut self, constant: bool) -> PResult<Vec<Argument>> {
        if !self.at_kind(TokenKind::LParen) {
            return Ok(Vec::new());
        }
        self.advance();
        let mut arguments = Vec::new();
        loop {
            let name = self.expect_name()?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_value(constant)?;
            arguments.push(Argument { name, value });
            if self.at_kind(TokenKind::RParen) {
                self.advance();
                return Ok(arguments);
            }
        }
    }

    fn parse_directives(&mut self, constant: bool) -> PResult<Vec<Directive>> {
        let mut directives = Vec::new();
        while self.at_kind(TokenKind::At) {
            self.advance();
            let name = self.expect_name()?;
            let arguments = self.parse_arguments(constant)?;
            directives.push(Directive { name, arguments });
        }
        Ok(directives)
    }

    // =========================================================================
    // Types and values
    // =========================================================================

    fn parse_type(&mut self) -> PResult<Type> {
        let base = if self.at_kind(TokenKind::LBracket) {
            self.advance();
            let inner = self.parse_type()?;
            self.expect(TokenKind::RBracket)?;
            Type::List(Box::new(inner))
        } else {
            Type::Named(self.expect_name()?)
        };

        if self.at_kind(TokenKind::Bang) {
            self.advance();
            Ok(Type::NonNull(Box::new(base)))
        } else {
            Ok(base)
        }
    }

    fn parse_value(&mut self, constant: bool) -> PResult<Value> {
        match self.at() {
            TokenKind::Dollar => {
                if constant {
                    return Err(self.error("variables are not allowed in constant values"));
                }
                self.advance();
                Ok(Value::Variable(self.expect_name()?))
            }
            TokenKind::IntLiteral => {
                let text = self.current_text().to_string();
                self.advance();
                Ok(Value::Int(text))
            }
            TokenKind::FloatLiteral => {
                let text = self.current_text().to_string();
                self.advance();
                Ok(Value::Float(text))
            }
            TokenKind::StringLiteral => {
                let value = unescape_string(self.current_text()).map_err(|msg| self.error(msg))?;
                self.advance();
                Ok(Value::String(value))
            }
            TokenKind::BlockStringLiteral => {
                let value = block_string_value(self.current_text());
                self.advance();
                Ok(Value::String(value))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at_kind(TokenKind::RBracket) {
                    if self.at_kind(TokenKind::Eof) {
                        return Err(self.error_expected("']'"));
                    }
                    items.push(self.parse_value(constant)?);
                }
                self.advance();
                Ok(Value::List(items))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                while !self.at_kind(TokenKind::RBrace) {
                    let name = self.expect_name()?;
                    self.expect(TokenKind::Colon)?;
                    fields.push((name, self.parse_value(constant)?));
                }
                self.advance();
                Ok(Value::Object(fields))
            }
            TokenKind::Name => {
                let value = match self.current_text() {
                    "true" => Value::Boolean(true),
                    "false" => Value::Boolean(false),
                    "null" => Value::Null,
                    other => Value::Enum(other.to_string()),
                };
                self.advance();
                Ok(value)
            }
            _ => Err(self.error_expected("a value")),
        }
    }
}

/// Decodes a quoted string literal, including its surrounding quotes.
fn unescape_string(raw: &str) -> Result<String, &'static str> {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return Err("invalid unicode escape sequence");
                }
                let code =
                    u32::from_str_radix(&hex, 16).map_err(|_| "invalid unicode escape sequence")?;
                out.push(char::from_u32(code).ok_or("invalid unicode escape sequence")?);
            }
            _ => return Err("invalid escape sequence"),
        }
    }

    Ok(out)
}

/// Computes the value of a block string, including its triple quotes.
///
/// Common indentation is removed and leading and trailing blank lines are
/// dropped.
fn block_string_value(raw: &str) -> String {
    let inner = raw[3..raw.len() - 3].replace("\\\"\"\"", "\"\"\"");
    let normalized = inner.replace("\r\n", "\n").replace('\r', "\n");
    let is_indent = |c: char| c == ' ' || c == '\t';

    let lines: Vec<&str> = normalized.split('\n').collect();
    let common_indent = lines
        .iter()
        .skip(1)
        .filter_map(|line| {
            let indent = line.len() - line.trim_start_matches(is_indent).len();
            (indent < line.len()).then_some(indent)
        })
        .min()
        .unwrap_or(0);

    let lines: Vec<&str> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                line
            } else {
                line.get(common_indent..).unwrap_or("")
            }
        })
        .collect();

    let is_blank = |line: &&str| line.trim_matches(is_indent).is_empty();
    let start = lines.iter().position(|line| !is_blank(line));
    let end = lines.iter().rposition(|line| !is_blank(line));

    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].join("\n"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> OperationDocument {
        match parse(source) {
            Ok(document) => document,
            Err(err) => panic!("failed to parse {source:?}: {}", err.message),
        }
    }

    fn parse_err(source: &str) -> SyntaxError {
        match parse(source) {
            Ok(document) => panic!("expected an error, got {document:?}"),
            Err(err) => err,
        }
    }

    #[test]
    fn test_shorthand_query() {
        let document = parse_ok("{ hello }");
        let operation = document.operations().next().unwrap();
        assert_eq!(operation.operation, OperationType::Query);
        assert!(operation.name.is_none());
        assert_eq!(operation.selection_set.selections.len(), 1);
    }

    #[test]
    fn test_subscription_with_variables() {
        let document = parse_ok(
            "subscription OnMessage($room: ID!, $limit: Int = 10) @live {
                messageAdded(room: $room, limit: $limit) { id text }
            }",
        );
        let operation = document.operations().next().unwrap();
        assert_eq!(operation.operation, OperationType::Subscription);
        assert_eq!(operation.name.as_deref(), Some("OnMessage"));
        assert_eq!(operation.variable_definitions.len(), 2);
        assert_eq!(
            operation.variable_definitions[0].ty,
            Type::NonNull(Box::new(Type::Named("ID".into())))
        );
        assert_eq!(
            operation.variable_definitions[1].default_value,
            Some(Value::Int("10".into()))
        );
        assert_eq!(operation.directives[0].name, "live");

        let Selection::Field(field) = &operation.selection_set.selections[0] else {
            panic!("expected a field");
        };
        assert_eq!(field.name, "messageAdded");
        assert_eq!(field.arguments[0].value, Value::Variable("room".into()));
        assert_eq!(field.selection_set.selections.len(), 2);
    }

    #[test]
    fn test_fragments_and_inline_fragments() {
        let document = parse_ok(
            "query { node(id: 1) { ...NodeFields ... on User { name } ... @include(if: true) { id } } }
             fragment NodeFields on Node { id }",
        );
        assert_eq!(document.fragments().count(), 1);
        let operation = document.operations().next().unwrap();
        let Selection::Field(node) = &operation.selection_set.selections[0] else {
            panic!("expected a field");
        };
        assert!(matches!(
            &node.selection_set.selections[0],
            Selection::FragmentSpread(spread) if spread.name == "NodeFields"
        ));
        assert!(matches!(
            &node.selection_set.selections[1],
            Selection::InlineFragment(inline) if inline.type_condition.as_deref() == Some("User")
        ));
        assert!(matches!(
            &node.selection_set.selections[2],
            Selection::InlineFragment(inline) if inline.type_condition.is_none()
        ));
    }

    #[test]
    fn test_values() {
        let document = parse_ok(
            r#"{ f(a: [1, 2.5, "x\nA"], b: {c: null, d: RED, e: false}) }"#,
        );
        let operation = document.operations().next().unwrap();
        let Selection::Field(field) = &operation.selection_set.selections[0] else {
            panic!("expected a field");
        };
        assert_eq!(
            field.arguments[0].value,
            Value::List(vec![
                Value::Int("1".into()),
                Value::Float("2.5".into()),
                Value::String("x\nA".into()),
            ])
        );
        assert_eq!(
            field.arguments[1].value,
            Value::Object(vec![
                ("c".into(), Value::Null),
                ("d".into(), Value::Enum("RED".into())),
                ("e".into(), Value::Boolean(false)),
            ])
        );
    }

    #[test]
    fn test_block_string_dedent() {
        assert_eq!(
            block_string_value("\"\"\"\n    Hello,\n      World!\n\n    Yours\n  \"\"\""),
            "Hello,\n  World!\n\nYours"
        );
        assert_eq!(block_string_value("\"\"\"say \\\"\"\" ok\"\"\""), "say \"\"\" ok");
    }

    #[test]
    fn test_empty_document_is_rejected() {
        let err = parse_err("  # nothing here\n");
        assert_eq!(err.message, "document contains no definitions");
    }

    #[test]
    fn test_type_system_definitions_are_rejected() {
        let err = parse_err("type Query { hello: String }");
        assert!(err.message.contains("type system definition `type`"));
        assert_eq!(err.offset(), 0);
    }

    #[test]
    fn test_error_location() {
        let err = parse_err("query Q { a(x: ) }");
        assert_eq!(err.message, "expected a value, found ')'");
        assert_eq!(err.offset(), 15);
    }

    #[test]
    fn test_variables_not_allowed_in_defaults() {
        let err = parse_err("query Q($a: Int = $b) { a }");
        assert_eq!(err.message, "variables are not allowed in constant values");
    }

    #[test]
    fn test_empty_selection_set_is_rejected() {
        let err = parse_err("{ }");
        assert_eq!(err.message, "expected name, found '}'");
    }
}
