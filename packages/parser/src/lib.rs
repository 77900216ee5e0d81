pub mod ast;
pub mod error;
pub mod parser;
pub mod tokenizer;

pub use ast::{Expression, Program, Span, JSX_FACTORY_NAME, JSX_FRAGMENT_NAME};
pub use error::{ParseError, ParseResult};
pub use parser::{transform, Parser};
pub use tokenizer::{tokenize, Token};

#[cfg(feature = "pretty-errors")]
pub use error::format_error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_basic() {
        let program = transform("<b>hi</b>").unwrap();
        assert!(program.body.is_element());
    }
}
