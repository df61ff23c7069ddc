use std::{cmp::Ordering, collections::HashMap, fmt::Debug, hash::Hash};

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use thiserror::Error;
use tracing::trace;

use crate::lex::{ConfigurationError, Lexer, line_of};

#[derive(Error, Debug, Diagnostic)]
#[error("could not parse token {token} of value {literal:?}")]
#[diagnostic(help("no prefix parselet is registered for {token}"))]
pub struct NoPrefixError {
    #[source_code]
    src: NamedSource<String>,

    #[label("cannot start an expression")]
    bad_bit: SourceSpan,

    pub token: String,
    pub literal: Option<String>,
}

impl NoPrefixError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_bit.offset())
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("token {token} of value {literal:?} has a precedence but no suffix parselet")]
#[diagnostic(help("register a suffix parselet for {token} or drop its precedence"))]
pub struct NoSuffixError {
    #[source_code]
    src: NamedSource<String>,

    #[label("cannot continue an expression")]
    bad_bit: SourceSpan,

    pub token: String,
    pub literal: Option<String>,
}

impl NoSuffixError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_bit.offset())
    }
}

/// Parses an expression that starts with the token just consumed.
pub trait PrefixParselet<T, P, E> {
    fn parse(&self, parser: &mut Parser<'_, '_, T, P, E>) -> Result<E, Error>;
}

/// Extends `left` with the infix or postfix token just consumed.
pub trait SuffixParselet<T, P, E> {
    fn parse(&self, parser: &mut Parser<'_, '_, T, P, E>, left: E) -> Result<E, Error>;
}

impl<T, P, E, F> PrefixParselet<T, P, E> for F
where
    F: Fn(&mut Parser<'_, '_, T, P, E>) -> Result<E, Error>,
{
    fn parse(&self, parser: &mut Parser<'_, '_, T, P, E>) -> Result<E, Error> {
        self(parser)
    }
}

impl<T, P, E, F> SuffixParselet<T, P, E> for F
where
    F: Fn(&mut Parser<'_, '_, T, P, E>, E) -> Result<E, Error>,
{
    fn parse(&self, parser: &mut Parser<'_, '_, T, P, E>, left: E) -> Result<E, Error> {
        self(parser, left)
    }
}

type PrecedenceFn<T, P> = Box<dyn Fn(&T) -> Option<P>>;
type CompareFn<P> = Box<dyn Fn(&P, &P) -> Ordering>;

/// Everything a [`Parser`] needs to know about a language besides its tokens:
/// the binding precedence of tokens in suffix position, how precedences
/// compare, and the parselets for each token.
///
/// A token for which the precedence function returns `None` never binds, so
/// the end-of-input token and closing delimiters usually need no entry.
pub struct Grammar<T, P, E> {
    precedence: PrecedenceFn<T, P>,
    compare: CompareFn<P>,
    prefix: HashMap<T, Box<dyn PrefixParselet<T, P, E>>>,
    suffix: HashMap<T, Box<dyn SuffixParselet<T, P, E>>>,
}

impl<T, P, E> Grammar<T, P, E>
where
    T: Clone + Eq + Hash + Debug,
{
    pub fn new(
        precedence: impl Fn(&T) -> Option<P> + 'static,
        compare: impl Fn(&P, &P) -> Ordering + 'static,
        prefix: HashMap<T, Box<dyn PrefixParselet<T, P, E>>>,
        suffix: HashMap<T, Box<dyn SuffixParselet<T, P, E>>>,
    ) -> Self {
        Grammar {
            precedence: Box::new(precedence),
            compare: Box::new(compare),
            prefix,
            suffix,
        }
    }

    pub fn builder() -> GrammarBuilder<T, P, E> {
        GrammarBuilder::default()
    }

    /// Whether `next`, in suffix position, binds tighter than `min`.
    fn binds(&self, min: &P, next: &T) -> bool {
        (self.precedence)(next).is_some_and(|p| (self.compare)(min, &p) == Ordering::Less)
    }
}

pub struct GrammarBuilder<T, P, E> {
    precedence_fn: Option<PrecedenceFn<T, P>>,
    precedences: HashMap<T, P>,
    compare: Option<CompareFn<P>>,
    prefix: HashMap<T, Box<dyn PrefixParselet<T, P, E>>>,
    suffix: HashMap<T, Box<dyn SuffixParselet<T, P, E>>>,
}

impl<T, P, E> Default for GrammarBuilder<T, P, E> {
    fn default() -> Self {
        GrammarBuilder {
            precedence_fn: None,
            precedences: HashMap::new(),
            compare: None,
            prefix: HashMap::new(),
            suffix: HashMap::new(),
        }
    }
}

impl<T, P, E> GrammarBuilder<T, P, E>
where
    T: Clone + Eq + Hash + Debug + 'static,
    P: Clone + 'static,
    E: 'static,
{
    /// Uses `precedence` for every token that has no entry set with
    /// [`GrammarBuilder::precedence`].
    pub fn precedence_fn(mut self, precedence: impl Fn(&T) -> Option<P> + 'static) -> Self {
        self.precedence_fn = Some(Box::new(precedence));
        self
    }

    pub fn precedence(mut self, token: T, precedence: P) -> Self {
        self.precedences.insert(token, precedence);
        self
    }

    pub fn compare(mut self, compare: impl Fn(&P, &P) -> Ordering + 'static) -> Self {
        self.compare = Some(Box::new(compare));
        self
    }

    pub fn natural_order(self) -> Self
    where
        P: Ord,
    {
        self.compare(P::cmp)
    }

    pub fn prefix<F>(self, token: T, parselet: F) -> Self
    where
        F: Fn(&mut Parser<'_, '_, T, P, E>) -> Result<E, Error> + 'static,
    {
        self.prefix_with(token, parselet)
    }

    pub fn suffix<F>(self, token: T, parselet: F) -> Self
    where
        F: Fn(&mut Parser<'_, '_, T, P, E>, E) -> Result<E, Error> + 'static,
    {
        self.suffix_with(token, parselet)
    }

    pub fn prefix_with(
        mut self,
        token: T,
        parselet: impl PrefixParselet<T, P, E> + 'static,
    ) -> Self {
        self.prefix.insert(token, Box::new(parselet));
        self
    }

    pub fn suffix_with(
        mut self,
        token: T,
        parselet: impl SuffixParselet<T, P, E> + 'static,
    ) -> Self {
        self.suffix.insert(token, Box::new(parselet));
        self
    }

    pub fn build(self) -> Result<Grammar<T, P, E>, Error> {
        let GrammarBuilder {
            precedence_fn,
            precedences,
            compare,
            prefix,
            suffix,
        } = self;

        let compare = compare.ok_or(ConfigurationError::Missing("precedence comparator"))?;
        let precedence: PrecedenceFn<T, P> = match precedence_fn {
            Some(fallback) if precedences.is_empty() => fallback,
            Some(fallback) => Box::new(move |token| {
                precedences
                    .get(token)
                    .cloned()
                    .or_else(|| fallback(token))
            }),
            None if precedences.is_empty() => {
                return Err(ConfigurationError::Missing("token precedence").into());
            }
            None => Box::new(move |token| precedences.get(token).cloned()),
        };

        Ok(Grammar {
            precedence,
            compare,
            prefix,
            suffix,
        })
    }
}

/// A Pratt parser: one lexer driven by one grammar.
///
/// Parselets get the parser back as an argument, so they can recurse with
/// [`Parser::parse_expression`] and reach the lexer through
/// [`Parser::lexer`] and [`Parser::lexer_mut`].
pub struct Parser<'g, 'de, T, P, E> {
    lexer: Lexer<'de, T>,
    grammar: &'g Grammar<T, P, E>,
}

impl<'g, 'de, T, P, E> Parser<'g, 'de, T, P, E>
where
    T: Clone + Eq + Hash + Debug,
{
    pub fn new(lexer: Lexer<'de, T>, grammar: &'g Grammar<T, P, E>) -> Self {
        Parser { lexer, grammar }
    }

    pub fn lexer(&self) -> &Lexer<'de, T> {
        &self.lexer
    }

    pub fn lexer_mut(&mut self) -> &mut Lexer<'de, T> {
        &mut self.lexer
    }

    pub fn into_lexer(self) -> Lexer<'de, T> {
        self.lexer
    }

    /// Parses one expression, consuming suffix tokens for as long as they
    /// bind tighter than `min`.
    ///
    /// Parselets pick associativity through the precedence they recurse
    /// with: the level of their own token makes it left-associative, a
    /// lower one lets the right operand extend further.
    pub fn parse_expression(&mut self, min: P) -> Result<E, Error> {
        let grammar = self.grammar;

        let token = self.lexer.advance()?;
        let Some(prefix) = grammar.prefix.get(&token) else {
            let found = self.lexer.current_or_eof();
            return Err(NoPrefixError {
                src: self.lexer.source_code(),
                bad_bit: found.span().into(),
                token: format!("{token:?}"),
                literal: found.literal.map(str::to_string),
            }
            .into());
        };
        trace!(?token, value = ?self.lexer.current_value(), "prefix");
        let mut left = prefix.parse(self)?;

        loop {
            let next = self.lexer.peek()?;
            if !grammar.binds(&min, &next) {
                break;
            }
            let token = self.lexer.advance()?;
            let Some(suffix) = grammar.suffix.get(&token) else {
                let found = self.lexer.current_or_eof();
                return Err(NoSuffixError {
                    src: self.lexer.source_code(),
                    bad_bit: found.span().into(),
                    token: format!("{token:?}"),
                    literal: found.literal.map(str::to_string),
                }
                .into());
            };
            trace!(?token, value = ?self.lexer.current_value(), "suffix");
            left = suffix.parse(self, left)?;
        }
        Ok(left)
    }
}
