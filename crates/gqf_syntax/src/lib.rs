//! Executable GraphQL documents for gqf.
//!
//! This crate provides:
//! - `span`: Byte-offset source spans
//! - `token`: Token kinds and token structures
//! - `lexer`: Tokenization
//! - `ast`: Operation documents (queries, mutations, subscriptions, fragments)
//! - `parser`: Recursive descent parser with miette diagnostics
//! - `printer`: Canonical printing used on the wire and for cache keys
//! - `builder`: The `Gqf` document builder handle and `EnumHelper`
//! - `typed`: Documents tagged with their result and variable types

pub mod ast;
pub mod builder;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod span;
pub mod token;
pub mod typed;

pub use ast::*;
pub use builder::{EnumHelper, Gqf, OperationBuilder};
pub use error::SyntaxError;
pub use lexer::Lexer;
pub use parser::parse;
pub use printer::{print, print_value, Printer};
pub use span::Span;
pub use token::{Token, TokenKind};
pub use typed::TypedDocument;
