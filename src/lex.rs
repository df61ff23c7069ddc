use std::{
    fmt::{Debug, Display},
    ops::Range,
    sync::Arc,
};

use miette::{Diagnostic, Error, NamedSource, SourceSpan};
use regex::{CaptureLocations, Regex};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, Diagnostic)]
pub enum ConfigurationError {
    #[error("no token/pattern rule specified")]
    #[diagnostic(help("declare at least one (token, pattern) rule"))]
    NoRules,

    #[error("invalid pattern `{pattern}` for token {token}")]
    InvalidPattern {
        token: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule patterns cannot be combined into a single alternation")]
    #[diagnostic(help("capture group names must be unique across all rules"))]
    InvalidAlternation(#[source] regex::Error),

    #[error("no {0} supplied to the grammar")]
    Missing(&'static str),
}

/// The combined alternation matched text that none of the rule groups captured.
///
/// This can only happen if the compiled pattern and the rule table disagree,
/// so it points at a bug in the lexer rather than in the input.
#[derive(Error, Debug, Diagnostic)]
#[error("pattern matched but no rule captured the text")]
#[diagnostic(help("the compiled alternation is out of sync with the declared rules"))]
pub struct ScanInvariantError {
    #[source_code]
    src: NamedSource<String>,

    #[label("matched here")]
    bad_bit: SourceSpan,
}

#[derive(Error, Debug, Diagnostic)]
#[error("expected token {expected} but found {found}")]
#[diagnostic(help("use `{expected}` here instead"))]
pub struct TokenMismatchError {
    #[source_code]
    src: NamedSource<String>,

    #[label("this token")]
    bad_bit: SourceSpan,

    pub expected: String,
    pub found: String,
    pub literal: Option<String>,
}

impl TokenMismatchError {
    pub fn line(&self) -> usize {
        line_of(self.src.inner(), self.bad_bit.offset())
    }
}

pub(crate) fn line_of(src: &str, offset: usize) -> usize {
    src[..offset.min(src.len())].matches('\n').count() + 1
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'de, T> {
    pub kind: T,
    pub literal: Option<&'de str>,
    pub offset: usize,
}

impl<T> Token<'_, T> {
    pub fn span(&self) -> Range<usize> {
        self.offset..self.offset + self.literal.map_or(0, str::len)
    }
}

impl<T: Debug> Display for Token<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = &self.kind;
        match self.literal {
            Some(lit) => write!(f, "{kind:?} {lit}"),
            None => write!(f, "{kind:?} null"),
        }
    }
}

#[derive(Debug)]
struct Rules<T> {
    regex: Regex,
    // index of the group wrapping each rule, in declaration order
    groups: Vec<(usize, T)>,
    eof: T,
}

/// Compiled token rules, ready to be bound to any number of inputs.
///
/// Every rule becomes one branch of a single alternation, in declaration
/// order. The regex engine resolves alternations leftmost-first, so when two
/// rules match at the same position the one declared first wins, whatever
/// the length of the other match.
#[derive(Debug, Clone)]
pub struct LexerFactory<T> {
    rules: Arc<Rules<T>>,
}

impl<T> LexerFactory<T>
where
    T: Clone + PartialEq + Debug,
{
    pub fn compile<I, S>(eof: T, rules: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (T, S)>,
        S: AsRef<str>,
    {
        let mut branches = Vec::new();
        let mut groups = Vec::new();
        let mut group = 1;
        for (token, pattern) in rules {
            let pattern = pattern.as_ref();
            // compiled on its own to validate it and to count its inner groups
            let single =
                Regex::new(pattern).map_err(|source| ConfigurationError::InvalidPattern {
                    token: format!("{token:?}"),
                    pattern: pattern.to_string(),
                    source,
                })?;
            branches.push(format!("({pattern})"));
            groups.push((group, token));
            group += single.captures_len();
        }
        if groups.is_empty() {
            return Err(ConfigurationError::NoRules.into());
        }

        let regex =
            Regex::new(&branches.join("|")).map_err(ConfigurationError::InvalidAlternation)?;
        debug!(rules = groups.len(), eof = ?eof, "compiled lexer rules");

        Ok(LexerFactory {
            rules: Arc::new(Rules { regex, groups, eof }),
        })
    }

    pub fn lexer<'de>(&self, input: &'de str) -> Lexer<'de, T> {
        Lexer::new(Arc::clone(&self.rules), None, input)
    }

    /// Like [`LexerFactory::lexer`], with `filename` shown in diagnostics.
    pub fn named<'de>(&self, filename: &'de str, input: &'de str) -> Lexer<'de, T> {
        Lexer::new(Arc::clone(&self.rules), Some(filename), input)
    }

    pub fn eof(&self) -> &T {
        &self.rules.eof
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookahead {
    Empty,
    Pending,
}

/// A lexer over one input with exactly one token of lookahead.
///
/// Text between two matches that no rule accepts (usually whitespace) is
/// skipped silently. Once the input is exhausted every call yields the
/// end-of-input token again.
///
/// A rule that matches the empty string yields a token whose value is `None`,
/// and an empty match right where the previous match ended is skipped, so
/// `a*` over `"baa"` yields `a` (empty), `a` (`"aa"`), then end of input.
#[derive(Debug)]
pub struct Lexer<'de, T> {
    rules: Arc<Rules<T>>,
    locations: CaptureLocations,
    filename: Option<&'de str>,
    whole: &'de str,
    byte: usize,
    last_match: Option<usize>,
    exhausted: bool,
    current: Option<Token<'de, T>>,
    lookahead: Lookahead,
}

impl<'de, T> Lexer<'de, T>
where
    T: Clone + PartialEq + Debug,
{
    fn new(rules: Arc<Rules<T>>, filename: Option<&'de str>, input: &'de str) -> Self {
        Lexer {
            locations: rules.regex.capture_locations(),
            rules,
            filename,
            whole: input,
            byte: 0,
            last_match: None,
            exhausted: false,
            current: None,
            lookahead: Lookahead::Empty,
        }
    }

    /// The token last returned by [`Lexer::advance`] or [`Lexer::peek`].
    pub fn current(&self) -> Option<&Token<'de, T>> {
        self.current.as_ref()
    }

    pub fn current_token(&self) -> Option<&T> {
        self.current.as_ref().map(|token| &token.kind)
    }

    pub fn current_value(&self) -> Option<&'de str> {
        self.current.as_ref().and_then(|token| token.literal)
    }

    pub fn eof(&self) -> &T {
        &self.rules.eof
    }

    pub fn offset(&self) -> usize {
        self.byte
    }

    pub fn advance(&mut self) -> Result<T, Error> {
        match std::mem::replace(&mut self.lookahead, Lookahead::Empty) {
            Lookahead::Pending => Ok(self.current_kind()),
            Lookahead::Empty => self.scan(),
        }
    }

    pub fn peek(&mut self) -> Result<T, Error> {
        if self.lookahead == Lookahead::Pending {
            return Ok(self.current_kind());
        }
        let kind = self.scan()?;
        self.lookahead = Lookahead::Pending;
        Ok(kind)
    }

    /// Advances and fails unless the token read is `expected`.
    ///
    /// Only that one token is consumed, whether it matches or not.
    pub fn expect(&mut self, expected: T) -> Result<Token<'de, T>, Error> {
        let found = self.advance()?;
        let token = self.current_or_eof();
        if found == expected {
            return Ok(token);
        }
        Err(TokenMismatchError {
            src: self.source_code(),
            bad_bit: token.span().into(),
            expected: format!("{expected:?}"),
            found: format!("{found:?}"),
            literal: token.literal.map(str::to_string),
        }
        .into())
    }

    pub(crate) fn source_code(&self) -> NamedSource<String> {
        NamedSource::new(self.filename.unwrap_or("<input>"), self.whole.to_string())
    }

    pub(crate) fn current_or_eof(&self) -> Token<'de, T> {
        self.current.clone().unwrap_or_else(|| Token {
            kind: self.rules.eof.clone(),
            literal: None,
            offset: self.whole.len(),
        })
    }

    fn current_kind(&self) -> T {
        match &self.current {
            Some(token) => token.kind.clone(),
            None => self.rules.eof.clone(),
        }
    }

    fn scan(&mut self) -> Result<T, Error> {
        let whole = self.whole;
        loop {
            if self.exhausted {
                return Ok(self.finish());
            }
            let Some(found) =
                self.rules
                    .regex
                    .captures_read_at(&mut self.locations, whole, self.byte)
            else {
                return Ok(self.finish());
            };

            let (start, end) = (found.start(), found.end());
            if start == end && self.last_match == Some(end) {
                // an empty match right where the last one ended makes no progress
                match whole[self.byte..].chars().next() {
                    Some(c) => {
                        self.byte += c.len_utf8();
                        continue;
                    }
                    None => return Ok(self.finish()),
                }
            }
            self.byte = end;
            self.last_match = Some(end);

            let locations = &self.locations;
            let Some((kind, (from, to))) = self
                .rules
                .groups
                .iter()
                .find_map(|(group, kind)| locations.get(*group).map(|span| (kind.clone(), span)))
            else {
                return Err(ScanInvariantError {
                    src: self.source_code(),
                    bad_bit: (start..end).into(),
                }
                .into());
            };

            let literal = (from < to).then(|| &whole[from..to]);
            trace!(token = ?kind, ?literal, offset = from, "scanned token");
            self.current = Some(Token {
                kind: kind.clone(),
                literal,
                offset: from,
            });
            return Ok(kind);
        }
    }

    fn finish(&mut self) -> T {
        self.exhausted = true;
        self.byte = self.whole.len();
        let eof = self.rules.eof.clone();
        self.current = Some(Token {
            kind: eof.clone(),
            literal: None,
            offset: self.whole.len(),
        });
        eof
    }
}

/// Yields every token up to, but not including, the end-of-input token.
impl<'de, T> Iterator for Lexer<'de, T>
where
    T: Clone + PartialEq + Debug,
{
    type Item = Result<Token<'de, T>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(kind) if kind == self.rules.eof => None,
            Ok(_) => Some(Ok(self.current_or_eof())),
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Word {
        Id,
        Comma,
        Eof,
    }

    fn drain<'de>(
        lexer: &mut Lexer<'de, &'static str>,
    ) -> Vec<(&'static str, Option<&'de str>)> {
        let mut seen = Vec::new();
        loop {
            let token = lexer.advance().expect("scan");
            seen.push((token, lexer.current_value()));
            if token == *lexer.eof() {
                return seen;
            }
        }
    }

    #[test]
    fn splits_words_and_commas() {
        let factory =
            LexerFactory::compile(Word::Eof, [(Word::Id, "[a-z]+"), (Word::Comma, ",")]).unwrap();
        let mut lexer = factory.lexer("hello, boy");

        assert_eq!(lexer.expect(Word::Id).unwrap().literal, Some("hello"));
        assert_eq!(lexer.expect(Word::Comma).unwrap().literal, Some(","));
        assert_eq!(lexer.expect(Word::Id).unwrap().literal, Some("boy"));
        let eof = lexer.expect(Word::Eof).unwrap();
        assert_eq!(eof.literal, None);
        assert_eq!(eof.offset, "hello, boy".len());
    }

    #[rstest]
    #[case(&[("goto", "goto"), ("token", "[a-z]+")], "goto")]
    #[case(&[("token", "[a-z]+"), ("goto", "goto")], "token")]
    fn first_declared_rule_wins(
        #[case] rules: &[(&'static str, &'static str)],
        #[case] kind: &str,
    ) {
        let factory = LexerFactory::compile("$", rules.iter().copied()).unwrap();
        let mut lexer = factory.lexer("goto");

        assert_eq!(lexer.advance().unwrap(), kind);
        assert_eq!(lexer.current_value(), Some("goto"));
        assert_eq!(lexer.advance().unwrap(), "$");
    }

    #[test]
    fn keyword_prefix_of_identifier_is_still_first() {
        let factory =
            LexerFactory::compile("$", [("goto", "goto"), ("token", "[a-z]+")]).unwrap();
        let mut lexer = factory.lexer("gotox");

        assert_eq!(
            drain(&mut lexer),
            vec![
                ("goto", Some("goto")),
                ("token", Some("x")),
                ("$", None),
            ]
        );
    }

    #[test]
    fn skips_unmatched_separators() {
        let factory = LexerFactory::compile("eof", [("token", "[a-z]+")]).unwrap();
        let mut lexer = factory.lexer("hello  bob;\n");

        assert_eq!(
            drain(&mut lexer),
            vec![
                ("token", Some("hello")),
                ("token", Some("bob")),
                ("eof", None),
            ]
        );
    }

    #[test]
    fn adjacent_tokens_need_no_separator() {
        let factory = LexerFactory::compile("$", [("a", "a"), ("b", "b")]).unwrap();
        let mut lexer = factory.lexer("abaab");

        for kind in ["a", "b", "a", "a", "b", "$"] {
            lexer.expect(kind).unwrap();
        }
    }

    #[test]
    fn skips_multibyte_characters() {
        let factory = LexerFactory::compile("eof", [("word", "[a-z]+")]).unwrap();
        let mut lexer = factory.lexer("héllo wörld");

        let values: Vec<_> = drain(&mut lexer)
            .into_iter()
            .filter_map(|(_, value)| value)
            .collect();
        assert_eq!(values, ["h", "llo", "w", "rld"]);
    }

    #[test]
    fn empty_text_is_end_of_input() {
        let factory = LexerFactory::compile("eof", [("token", "[a-z]+")]).unwrap();
        let mut lexer = factory.lexer("");

        assert_eq!(lexer.current_token(), None);
        assert_eq!(lexer.advance().unwrap(), "eof");
        assert_eq!(lexer.current_value(), None);
    }

    #[test]
    fn end_of_input_repeats() {
        let factory = LexerFactory::compile("eof", [("token", "[a-z]+")]).unwrap();
        let mut lexer = factory.lexer("one");

        assert_eq!(lexer.advance().unwrap(), "token");
        for _ in 0..3 {
            assert_eq!(lexer.advance().unwrap(), "eof");
            assert_eq!(lexer.current_value(), None);
            assert_eq!(lexer.peek().unwrap(), "eof");
        }
    }

    #[test]
    fn peek_is_idempotent_and_consumed_once() {
        let factory = LexerFactory::compile("$", [("num", "[0-9]+"), ("id", "[a-z]+")]).unwrap();
        let mut lexer = factory.lexer("12 ab");

        for _ in 0..4 {
            assert_eq!(lexer.peek().unwrap(), "num");
            assert_eq!(lexer.current_value(), Some("12"));
        }
        assert_eq!(lexer.advance().unwrap(), "num");
        assert_eq!(lexer.current_value(), Some("12"));
        assert_eq!(lexer.advance().unwrap(), "id");
        assert_eq!(lexer.current_value(), Some("ab"));
    }

    #[test]
    fn mismatch_consumes_a_single_token() {
        let factory = LexerFactory::compile("$", [("a", "a"), ("b", "b")]).unwrap();
        let mut lexer = factory.named("input.txt", "bab");

        let err = lexer.expect("a").unwrap_err();
        let mismatch = err
            .downcast_ref::<TokenMismatchError>()
            .expect("token mismatch error");
        assert_eq!(mismatch.expected, "\"a\"");
        assert_eq!(mismatch.found, "\"b\"");
        assert_eq!(mismatch.literal.as_deref(), Some("b"));
        assert_eq!(mismatch.line(), 1);

        assert_eq!(lexer.advance().unwrap(), "a");
        assert_eq!(lexer.offset(), 2);
    }

    #[test]
    fn mismatch_reports_line() {
        let factory = LexerFactory::compile("$", [("id", "[a-z]+")]).unwrap();
        let mut lexer = factory.lexer("\n\nabc");

        let err = lexer.expect("$").unwrap_err();
        assert_eq!(err.downcast_ref::<TokenMismatchError>().unwrap().line(), 3);
    }

    #[test]
    fn inner_groups_do_not_shift_rules() {
        let factory =
            LexerFactory::compile("$", [("pair", r"(\w)=(\w)"), ("word", r"\w+")]).unwrap();
        let mut lexer = factory.lexer("x=y abc");

        assert_eq!(
            drain(&mut lexer),
            vec![
                ("pair", Some("x=y")),
                ("word", Some("abc")),
                ("$", None),
            ]
        );
    }

    #[test]
    fn empty_matches_make_progress() {
        let factory = LexerFactory::compile("$", [("a", "a*")]).unwrap();
        let mut lexer = factory.lexer("baa");

        assert_eq!(
            drain(&mut lexer),
            vec![("a", None), ("a", Some("aa")), ("$", None)]
        );
    }

    #[test]
    fn iterates_until_end_of_input() {
        let factory =
            LexerFactory::compile(Word::Eof, [(Word::Id, "[a-z]+"), (Word::Comma, ",")]).unwrap();
        let tokens: Vec<_> = factory
            .lexer("a, b")
            .map(|token| token.unwrap().to_string())
            .collect();

        assert_eq!(tokens, ["Id a", "Comma ,", "Id b"]);
    }

    #[test]
    fn factory_lexers_are_independent() {
        let factory = LexerFactory::compile("$", [("id", "[a-z]+")]).unwrap();
        let mut first = factory.lexer("one two");
        let mut second = factory.lexer("three");

        first.advance().unwrap();
        assert_eq!(second.advance().unwrap(), "id");
        assert_eq!(second.current_value(), Some("three"));
        assert_eq!(first.advance().unwrap(), "id");
        assert_eq!(first.current_value(), Some("two"));
    }

    #[test]
    fn rejects_empty_rules() {
        let rules: [(&str, &str); 0] = [];
        let err = LexerFactory::compile("eof", rules).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::NoRules)
        ));
    }

    #[test]
    fn rejects_invalid_pattern() {
        let err = LexerFactory::compile("eof", [("ok", "[a-z]+"), ("open", "(")]).unwrap_err();

        match err.downcast_ref::<ConfigurationError>() {
            Some(ConfigurationError::InvalidPattern { token, pattern, .. }) => {
                assert_eq!(token, "\"open\"");
                assert_eq!(pattern, "(");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_group_names() {
        let err =
            LexerFactory::compile("eof", [("a", "(?P<n>a)"), ("b", "(?P<n>b)")]).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::InvalidAlternation(_))
        ));
    }
}
