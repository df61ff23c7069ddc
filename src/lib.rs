//! Expression parsers from runtime tables.
//!
//! A [`LexerFactory`] compiles an ordered list of `(token, pattern)` rules
//! into one matcher and hands out [`Lexer`]s with one token of lookahead.
//! A [`Parser`] runs Pratt's algorithm over such a lexer, driven by a
//! [`Grammar`] of precedences and prefix/suffix parselets.

pub mod lex;
pub mod parse;

pub use lex::{ConfigurationError, Lexer, LexerFactory, Token};
pub use parse::{Grammar, GrammarBuilder, Parser, PrefixParselet, SuffixParselet};
