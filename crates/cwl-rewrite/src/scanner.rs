use crate::error::RewriteError;
use fancy_regex::Regex;
use std::sync::LazyLock;

/// Span found by [`scan_expression`], in byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// A balanced `$(...)` or `${...}` block, including the delimiters.
    Expression { start: usize, end: usize },
    /// A backslash escape outside any expression. The caller must copy the
    /// two characters verbatim and continue scanning after them.
    Escape { start: usize, end: usize },
}

impl Span {
    pub fn end(&self) -> usize {
        match self {
            Span::Expression { end, .. } | Span::Escape { end, .. } => *end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    Dollar,
    Paren,
    Brace,
    SingleQuote,
    DoubleQuote,
    Backslash,
}

/// Locates the first balanced expression in `text`.
///
/// An expression starts with `$` immediately followed by `(` or `{` and ends
/// at the matching closer on the same nesting level. Nested brackets of the
/// same kind increase depth, the other bracket kind is opaque, and single- or
/// double-quoted substrings consume their content with `\` escaping exactly
/// the next character. A `\` outside an expression consumes the following
/// character and is reported as [`Span::Escape`].
///
/// Open brackets or quotes at end of input fail with
/// [`RewriteError::UnterminatedExpression`]; a trailing lone `$` is not an
/// expression.
pub fn scan_expression(text: &str) -> Result<Option<Span>, RewriteError> {
    let mut stack = vec![State::Default];
    let mut start = 0;
    let mut escape_start = 0;
    let mut dollar = 0;

    for (i, c) in text.char_indices() {
        match *stack.last().unwrap_or(&State::Default) {
            State::Default => match c {
                '$' => {
                    dollar = i;
                    stack.push(State::Dollar);
                }
                '\\' => {
                    escape_start = i;
                    stack.push(State::Backslash);
                }
                _ => {}
            },
            State::Backslash => {
                stack.pop();
                if stack.last() == Some(&State::Default) {
                    return Ok(Some(Span::Escape {
                        start: escape_start,
                        end: i + c.len_utf8(),
                    }));
                }
            }
            State::Dollar => match c {
                '(' => {
                    start = dollar;
                    stack.push(State::Paren);
                }
                '{' => {
                    start = dollar;
                    stack.push(State::Brace);
                }
                _ => {
                    stack.pop();
                }
            },
            State::Paren => match c {
                '(' => stack.push(State::Paren),
                ')' => {
                    stack.pop();
                    if stack.last() == Some(&State::Dollar) {
                        return Ok(Some(Span::Expression { start, end: i + 1 }));
                    }
                }
                '\'' => stack.push(State::SingleQuote),
                '"' => stack.push(State::DoubleQuote),
                _ => {}
            },
            State::Brace => match c {
                '{' => stack.push(State::Brace),
                '}' => {
                    stack.pop();
                    if stack.last() == Some(&State::Dollar) {
                        return Ok(Some(Span::Expression { start, end: i + 1 }));
                    }
                }
                '\'' => stack.push(State::SingleQuote),
                '"' => stack.push(State::DoubleQuote),
                _ => {}
            },
            State::SingleQuote => match c {
                '\'' => {
                    stack.pop();
                }
                '\\' => stack.push(State::Backslash),
                _ => {}
            },
            State::DoubleQuote => match c {
                '"' => {
                    stack.pop();
                }
                '\\' => stack.push(State::Backslash),
                _ => {}
            },
        }
    }

    match stack.as_slice() {
        [State::Default] => Ok(None),
        // a trailing `$` never opened a bracket, nothing is unterminated
        [State::Default, State::Dollar] => Ok(None),
        _ => Err(RewriteError::UnterminatedExpression {
            offset: start,
            tail: text[start..].to_string(),
        }),
    }
}

static PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    let seg_single = r"\['([^']|\\')+'\]";
    let seg_double = r#"\["([^"]|\\")+"\]"#;
    let seg_index = r"\[[0-9]+\]";
    let segments = format!(r"(\.\w+|{seg_single}|{seg_double}|{seg_index})");
    Regex::new(&format!(r"^(\w+){segments}*$")).unwrap()
});

/// Decides whether an expression body (the text between the outer `$(` and
/// `)`) is a plain attribute path that conformant executors evaluate without
/// a script engine: an identifier followed by `.ident`, `['...']`, `["..."]`
/// or `[0]` segments. The literals `true` and `false` and paths ending in
/// `.length` need the engine and do not qualify.
pub fn is_parameter_reference(body: &str) -> bool {
    PARAM_RE.is_match(body).unwrap_or(false) && body != "true" && body != "false" && !body.ends_with(".length")
}
