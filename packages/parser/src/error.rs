use thiserror::Error;

pub type ParseResult<T> = Result<T, ParseError>;

/// Failure to transform markup into an expression tree.
///
/// Every variant belongs to the recoverable `SyntaxError` kind: the caller
/// keeps accumulating and retries on a longer input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Unexpected token at {pos}: expected {expected}, found {found}")]
    UnexpectedToken {
        pos: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of input at {pos}: expected {expected}")]
    UnexpectedEof { pos: usize, expected: String },

    #[error("Mismatched closing tag at {pos}: expected </{expected}>, found </{found}>")]
    MismatchedClosingTag {
        pos: usize,
        expected: String,
        found: String,
    },

    #[error("Invalid syntax at {pos}: {message}")]
    InvalidSyntax { pos: usize, message: String },

    #[error("Lexer error at {pos}")]
    LexerError { pos: usize },
}

impl ParseError {
    pub fn unexpected_token(pos: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::UnexpectedToken {
            pos,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn unexpected_eof(pos: usize, expected: impl Into<String>) -> Self {
        Self::UnexpectedEof {
            pos,
            expected: expected.into(),
        }
    }

    pub fn mismatched_closing_tag(pos: usize, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::MismatchedClosingTag {
            pos,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn invalid_syntax(pos: usize, message: impl Into<String>) -> Self {
        Self::InvalidSyntax {
            pos,
            message: message.into(),
        }
    }

    pub fn lexer_error(pos: usize) -> Self {
        Self::LexerError { pos }
    }

    /// Byte offset the error points at
    pub fn pos(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { pos, .. }
            | ParseError::UnexpectedEof { pos, .. }
            | ParseError::MismatchedClosingTag { pos, .. }
            | ParseError::InvalidSyntax { pos, .. }
            | ParseError::LexerError { pos } => *pos,
        }
    }

    /// True when more input could still make the markup valid.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::UnexpectedEof { .. })
    }
}

/// Pretty-print an error with source context using ariadne
#[cfg(feature = "pretty-errors")]
pub fn format_error(source: &str, filename: &str, error: &ParseError) -> String {
    use ariadne::{Color, Config, Label, Report, ReportKind, Source};

    let start = error.pos().min(source.len());
    let end = source[start..]
        .chars()
        .next()
        .map(|c| start + c.len_utf8())
        .unwrap_or(start);

    let label = match error {
        ParseError::UnexpectedToken { expected, .. } | ParseError::UnexpectedEof { expected, .. } => {
            format!("expected {}", expected)
        }
        ParseError::MismatchedClosingTag { expected, .. } => format!("expected </{}>", expected),
        ParseError::InvalidSyntax { message, .. } => message.clone(),
        ParseError::LexerError { .. } => "unrecognized character".to_string(),
    };

    let mut output = Vec::new();
    let report = Report::build(ReportKind::Error, filename, start)
        .with_config(Config::default().with_color(false))
        .with_message(error.to_string())
        .with_label(
            Label::new((filename, start..end))
                .with_color(Color::Red)
                .with_message(label),
        )
        .finish();

    if report
        .write((filename, Source::from(source)), &mut output)
        .is_err()
    {
        return error.to_string();
    }

    String::from_utf8(output).unwrap_or_else(|_| error.to_string())
}
