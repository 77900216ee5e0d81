use logos::Logos;
use std::fmt;

/// Tokens of the expression sub-language embedded in generated markup.
///
/// Only expression and tag positions are lexed with this enum. JSX text
/// children are context-sensitive and are scanned by the parser directly.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token<'src> {
    // Keywords
    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token("null")]
    Null,

    #[token("undefined")]
    Undefined,

    #[token("return")]
    Return,

    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice())]
    Ident(&'src str),

    // String literals keep their quotes; the parser unescapes them
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| lex.slice())]
    #[regex(r"'([^'\\\n]|\\.)*'", |lex| lex.slice())]
    String(&'src str),

    #[regex(r"`([^`\\]|\\.)*`", |lex| lex.slice())]
    Template(&'src str),

    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice())]
    Number(&'src str),

    // Symbols
    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("<")]
    LAngle,

    #[token(">")]
    RAngle,

    #[token("<=")]
    LessThanEquals,

    #[token(">=")]
    GreaterThanEquals,

    #[token(":")]
    Colon,

    #[token(";")]
    Semicolon,

    #[token(",")]
    Comma,

    #[token(".")]
    Dot,

    #[token("...")]
    Ellipsis,

    #[token("?")]
    Question,

    #[token("?.")]
    QuestionDot,

    #[token("??")]
    Nullish,

    #[token("=")]
    Equals,

    #[token("=>")]
    Arrow,

    #[token("==")]
    EqualsEquals,

    #[token("===")]
    StrictEquals,

    #[token("!=")]
    NotEquals,

    #[token("!==")]
    StrictNotEquals,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("!")]
    Bang,

    #[token("&&")]
    And,

    #[token("||")]
    Or,
}

impl<'src> fmt::Display for Token<'src> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::Undefined => write!(f, "undefined"),
            Token::Return => write!(f, "return"),
            Token::Ident(s) => write!(f, "identifier '{}'", s),
            Token::String(s) => write!(f, "string {}", s),
            Token::Template(s) => write!(f, "template {}", s),
            Token::Number(n) => write!(f, "number {}", n),
            Token::LBrace => write!(f, "'{{'"),
            Token::RBrace => write!(f, "'}}'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::LAngle => write!(f, "'<'"),
            Token::RAngle => write!(f, "'>'"),
            Token::LessThanEquals => write!(f, "'<='"),
            Token::GreaterThanEquals => write!(f, "'>='"),
            Token::Colon => write!(f, "':'"),
            Token::Semicolon => write!(f, "';'"),
            Token::Comma => write!(f, "','"),
            Token::Dot => write!(f, "'.'"),
            Token::Ellipsis => write!(f, "'...'"),
            Token::Question => write!(f, "'?'"),
            Token::QuestionDot => write!(f, "'?.'"),
            Token::Nullish => write!(f, "'??'"),
            Token::Equals => write!(f, "'='"),
            Token::Arrow => write!(f, "'=>'"),
            Token::EqualsEquals => write!(f, "'=='"),
            Token::StrictEquals => write!(f, "'==='"),
            Token::NotEquals => write!(f, "'!='"),
            Token::StrictNotEquals => write!(f, "'!=='"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::Percent => write!(f, "'%'"),
            Token::Bang => write!(f, "'!'"),
            Token::And => write!(f, "'&&'"),
            Token::Or => write!(f, "'||'"),
        }
    }
}

/// Tokenize a source string, dropping anything the lexer rejects
pub fn tokenize(source: &str) -> Vec<(Token, std::ops::Range<usize>)> {
    let lexer = Token::lexer(source);
    lexer
        .spanned()
        .filter_map(|(result, span)| result.ok().map(|token| (token, span)))
        .collect()
}

/// Lex the first token of `source`, skipping leading whitespace and comments.
///
/// Returns `None` at end of input and `Some(Err(span))` when the lexer
/// cannot match anything at the current position.
pub fn lex_one(source: &str) -> Option<Result<(Token<'_>, std::ops::Range<usize>), std::ops::Range<usize>>> {
    let mut lexer = Token::lexer(source).spanned();
    lexer.next().map(|(result, span)| match result {
        Ok(token) => Ok((token, span)),
        Err(()) => Err(span),
    })
}
