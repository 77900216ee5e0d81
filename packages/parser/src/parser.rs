use crate::ast::*;
use crate::error::{ParseError, ParseResult};
use crate::tokenizer::{lex_one, Token};
use std::ops::Range;

/// Nesting limit for elements and expressions; generated input is untrusted.
/// Operators and postfix links folded into a chain count against it too,
/// since every link adds a level to the tree.
const MAX_DEPTH: usize = 256;

/// Number of binary precedence levels handled by `parse_binary`
const BINARY_LEVELS: usize = 6;

type Spanned<'src> = (Token<'src>, Range<usize>);

/// Recursive-descent transformer from markup to factory-call expressions.
///
/// The parser walks the source by byte position. Expression positions are
/// lexed one token at a time with the logos tokenizer; tag and text
/// positions are scanned directly because JSX text is context-sensitive.
pub struct Parser<'src> {
    source: &'src str,
    pos: usize,
    depth: usize,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse the whole source as a single expression, optionally terminated by `;`
    pub fn parse_program(&mut self) -> ParseResult<Program> {
        if self.peek()?.is_none() {
            return Err(ParseError::unexpected_eof(self.source.len(), "markup"));
        }

        let body = self.parse_expression()?;
        self.eat(Token::Semicolon)?;

        if let Some((token, span)) = self.peek()? {
            return Err(ParseError::unexpected_token(
                span.start,
                "end of input",
                token.to_string(),
            ));
        }

        let span = Span::new(body.span().start, self.pos);
        Ok(Program { body, span })
    }

    /// Parse an expression, including arrow functions and conditionals
    pub fn parse_expression(&mut self) -> ParseResult<Expression> {
        let entry = self.depth;
        self.enter()?;
        let result = match self.try_parse_arrow()? {
            Some(arrow) => Ok(arrow),
            None => self.parse_conditional(),
        };
        // Chain links charged while parsing this expression are held until here
        self.depth = entry;
        result
    }

    /// Arrow functions are detected by backtracking: `x =>` or `(a, b) =>`
    fn try_parse_arrow(&mut self) -> ParseResult<Option<Expression>> {
        let checkpoint = self.pos;

        let (start, params) = match self.peek()? {
            Some((Token::Ident(name), span)) => {
                self.pos = span.end;
                (span.start, vec![name.to_string()])
            }
            Some((Token::LParen, span)) => {
                self.pos = span.end;
                match self.parse_arrow_params() {
                    Ok(Some(params)) => (span.start, params),
                    _ => {
                        self.pos = checkpoint;
                        return Ok(None);
                    }
                }
            }
            _ => return Ok(None),
        };

        match self.peek() {
            Ok(Some((Token::Arrow, span))) => self.pos = span.end,
            _ => {
                self.pos = checkpoint;
                return Ok(None);
            }
        }

        let body = self.parse_arrow_body()?;
        Ok(Some(Expression::Arrow {
            params,
            body: Box::new(body),
            span: Span::new(start, self.pos),
        }))
    }

    fn parse_arrow_params(&mut self) -> ParseResult<Option<Vec<String>>> {
        let mut params = Vec::new();
        loop {
            match self.advance()? {
                Some((Token::RParen, _)) => return Ok(Some(params)),
                Some((Token::Ident(name), _)) => {
                    params.push(name.to_string());
                    match self.advance()? {
                        Some((Token::Comma, _)) => continue,
                        Some((Token::RParen, _)) => return Ok(Some(params)),
                        _ => return Ok(None),
                    }
                }
                _ => return Ok(None),
            }
        }
    }

    /// Expression body, or a block holding a single `return` statement
    fn parse_arrow_body(&mut self) -> ParseResult<Expression> {
        if self.eat(Token::LBrace)?.is_none() {
            return self.parse_expression();
        }

        self.expect(Token::Return)?;
        let value = self.parse_expression()?;
        self.eat(Token::Semicolon)?;
        self.expect(Token::RBrace)?;
        Ok(value)
    }

    fn parse_conditional(&mut self) -> ParseResult<Expression> {
        let test = self.parse_binary(0)?;

        if self.eat(Token::Question)?.is_none() {
            return Ok(test);
        }

        let consequent = self.parse_expression()?;
        self.expect(Token::Colon)?;
        let alternate = self.parse_expression()?;
        let span = Span::new(test.span().start, alternate.span().end);

        Ok(Expression::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
            span,
        })
    }

    /// Left-associative binary operators, lowest precedence at level 0
    fn parse_binary(&mut self, level: usize) -> ParseResult<Expression> {
        if level == BINARY_LEVELS {
            return self.parse_unary();
        }

        let mut left = self.parse_binary(level + 1)?;

        loop {
            let operator = match self.peek()? {
                Some((token, span)) => match binary_operator(&token, level) {
                    Some(op) => {
                        self.pos = span.end;
                        op
                    }
                    None => break,
                },
                None => break,
            };
            self.enter()?;

            let right = self.parse_binary(level + 1)?;
            let span = Span::new(left.span().start, right.span().end);
            left = Expression::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let operator = match self.peek()? {
            Some((Token::Bang, span)) => Some((UnaryOp::Not, span)),
            Some((Token::Minus, span)) => Some((UnaryOp::Negate, span)),
            Some((Token::Plus, span)) => Some((UnaryOp::Plus, span)),
            _ => None,
        };

        match operator {
            Some((operator, span)) => {
                self.pos = span.end;
                self.enter()?;
                let argument = self.parse_unary()?;
                let span = Span::new(span.start, argument.span().end);
                Ok(Expression::Unary {
                    operator,
                    argument: Box::new(argument),
                    span,
                })
            }
            None => self.parse_postfix(),
        }
    }

    /// Member access, computed access, optional chaining and calls
    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_primary()?;
        let start = expr.span().start;

        loop {
            let link = self.peek()?;
            if matches!(
                link,
                Some((Token::Dot | Token::QuestionDot | Token::LBracket | Token::LParen, _))
            ) {
                self.enter()?;
            }

            match link {
                Some((Token::Dot, span)) => {
                    self.pos = span.end;
                    let name = self.expect_property_name()?;
                    expr = Expression::Member {
                        object: Box::new(expr),
                        property: MemberProperty::Named(name),
                        optional: false,
                        span: Span::new(start, self.pos),
                    };
                }
                Some((Token::QuestionDot, span)) => {
                    self.pos = span.end;
                    expr = match self.peek()? {
                        Some((Token::LParen, _)) => {
                            let arguments = self.parse_arguments()?;
                            Expression::Call {
                                callee: Box::new(expr),
                                arguments,
                                optional: true,
                                span: Span::new(start, self.pos),
                            }
                        }
                        Some((Token::LBracket, bracket)) => {
                            self.pos = bracket.end;
                            let property = self.parse_expression()?;
                            self.expect(Token::RBracket)?;
                            Expression::Member {
                                object: Box::new(expr),
                                property: MemberProperty::Computed(Box::new(property)),
                                optional: true,
                                span: Span::new(start, self.pos),
                            }
                        }
                        _ => {
                            let name = self.expect_property_name()?;
                            Expression::Member {
                                object: Box::new(expr),
                                property: MemberProperty::Named(name),
                                optional: true,
                                span: Span::new(start, self.pos),
                            }
                        }
                    };
                }
                Some((Token::LBracket, span)) => {
                    self.pos = span.end;
                    let property = self.parse_expression()?;
                    self.expect(Token::RBracket)?;
                    expr = Expression::Member {
                        object: Box::new(expr),
                        property: MemberProperty::Computed(Box::new(property)),
                        optional: false,
                        span: Span::new(start, self.pos),
                    };
                }
                Some((Token::LParen, _)) => {
                    let arguments = self.parse_arguments()?;
                    expr = Expression::Call {
                        callee: Box::new(expr),
                        arguments,
                        optional: false,
                        span: Span::new(start, self.pos),
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Expression>> {
        self.expect(Token::LParen)?;

        let mut arguments = Vec::new();
        loop {
            if self.eat(Token::RParen)?.is_some() {
                break;
            }
            arguments.push(self.parse_expression()?);
            if self.eat(Token::Comma)?.is_none() {
                self.expect(Token::RParen)?;
                break;
            }
        }

        Ok(arguments)
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let (token, span) = match self.peek()? {
            Some(next) => next,
            None => return Err(ParseError::unexpected_eof(self.source.len(), "expression")),
        };
        let at = Span::new(span.start, span.end);

        match token {
            Token::LAngle => {
                self.pos = span.end;
                self.parse_element(span.start)
            }
            Token::String(raw) => {
                self.pos = span.end;
                let value = unescape(&raw[1..raw.len() - 1], span.start)?;
                Ok(Expression::String { value, span: at })
            }
            Token::Template(_) => {
                self.pos = span.end;
                self.parse_template(span)
            }
            Token::Number(raw) => {
                self.pos = span.end;
                let value = raw.parse::<f64>().map_err(|_| {
                    ParseError::invalid_syntax(span.start, format!("invalid number literal {}", raw))
                })?;
                Ok(Expression::Number { value, span: at })
            }
            Token::True | Token::False => {
                self.pos = span.end;
                Ok(Expression::Boolean {
                    value: token == Token::True,
                    span: at,
                })
            }
            Token::Null => {
                self.pos = span.end;
                Ok(Expression::Null { span: at })
            }
            Token::Undefined => {
                self.pos = span.end;
                Ok(Expression::Undefined { span: at })
            }
            Token::Ident(name) => {
                self.pos = span.end;
                Ok(Expression::Identifier {
                    name: name.to_string(),
                    span: at,
                })
            }
            Token::LParen => {
                self.pos = span.end;
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                self.pos = span.end;
                self.parse_array(span.start)
            }
            Token::LBrace => {
                self.pos = span.end;
                self.parse_object(span.start)
            }
            other => Err(ParseError::unexpected_token(
                span.start,
                "expression",
                other.to_string(),
            )),
        }
    }

    fn parse_array(&mut self, start: usize) -> ParseResult<Expression> {
        let mut elements = Vec::new();

        loop {
            if self.eat(Token::RBracket)?.is_some() {
                break;
            }
            if self.eat(Token::Ellipsis)?.is_some() {
                elements.push(ArrayElement::Spread(self.parse_expression()?));
            } else {
                elements.push(ArrayElement::Item(self.parse_expression()?));
            }
            if self.eat(Token::Comma)?.is_none() {
                self.expect(Token::RBracket)?;
                break;
            }
        }

        Ok(Expression::Array {
            elements,
            span: Span::new(start, self.pos),
        })
    }

    fn parse_object(&mut self, start: usize) -> ParseResult<Expression> {
        let mut properties = Vec::new();

        loop {
            if self.eat(Token::RBrace)?.is_some() {
                break;
            }

            if self.eat(Token::Ellipsis)?.is_some() {
                properties.push(ObjectProperty::Spread(self.parse_expression()?));
            } else {
                let (key, key_span, shorthand) = match self.advance()? {
                    Some((Token::Ident(name), span)) => (name.to_string(), span, true),
                    Some((Token::String(raw), span)) => {
                        (unescape(&raw[1..raw.len() - 1], span.start)?, span, false)
                    }
                    Some((Token::Number(raw), span)) => (raw.to_string(), span, false),
                    Some((token @ (Token::True | Token::False | Token::Null | Token::Undefined | Token::Return), span)) => {
                        (token.to_string(), span, false)
                    }
                    Some((token, span)) => {
                        return Err(ParseError::unexpected_token(
                            span.start,
                            "property name",
                            token.to_string(),
                        ))
                    }
                    None => {
                        return Err(ParseError::unexpected_eof(self.source.len(), "property name"))
                    }
                };

                let value = if shorthand && !self.check_colon()? {
                    Expression::Identifier {
                        name: key.clone(),
                        span: Span::new(key_span.start, key_span.end),
                    }
                } else {
                    self.expect(Token::Colon)?;
                    self.parse_expression()?
                };

                properties.push(ObjectProperty::KeyValue { key, value });
            }

            if self.eat(Token::Comma)?.is_none() {
                self.expect(Token::RBrace)?;
                break;
            }
        }

        Ok(Expression::Object {
            properties,
            span: Span::new(start, self.pos),
        })
    }

    /// Template literal with `${...}` interpolation. Interpolated expressions
    /// are parsed in place so error positions refer to the full source.
    fn parse_template(&mut self, span: Range<usize>) -> ParseResult<Expression> {
        let end = self.pos;
        let content_start = span.start + 1;
        let content_end = span.end - 1;

        let mut parts = Vec::new();
        let mut current = String::new();
        let mut cursor = content_start;

        while cursor < content_end {
            let rest = &self.source[cursor..content_end];
            if rest.starts_with("${") {
                if !current.is_empty() {
                    parts.push(TemplatePart::Literal(unescape(&current, cursor)?));
                    current.clear();
                }

                self.pos = cursor + 2;
                let expr = self.parse_expression()?;
                self.expect(Token::RBrace)?;
                if self.pos > content_end {
                    return Err(ParseError::invalid_syntax(
                        cursor,
                        "unterminated template interpolation",
                    ));
                }
                parts.push(TemplatePart::Expression(expr));
                cursor = self.pos;
                continue;
            }

            let mut chars = rest.chars();
            if let Some(ch) = chars.next() {
                current.push(ch);
                cursor += ch.len_utf8();
                // Keep escapes together so `\${` is not read as interpolation
                if ch == '\\' {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        cursor += next.len_utf8();
                    }
                }
            }
        }

        if !current.is_empty() {
            parts.push(TemplatePart::Literal(unescape(&current, cursor)?));
        }

        self.pos = end;
        Ok(Expression::Template {
            parts,
            span: Span::new(span.start, span.end),
        })
    }

    // Markup

    /// Parse an element whose `<` has already been consumed
    fn parse_element(&mut self, start: usize) -> ParseResult<Expression> {
        self.enter()?;
        let result = self.parse_element_inner(start);
        self.depth -= 1;
        result
    }

    fn parse_element_inner(&mut self, start: usize) -> ParseResult<Expression> {
        self.skip_trivia()?;

        if self.rest().is_empty() {
            return Err(self.eof("tag name"));
        }

        if self.rest().starts_with('>') {
            self.pos += 1;
            let children = self.parse_children("")?;
            let span = Span::new(start, self.pos);
            let fragment = Expression::Identifier {
                name: JSX_FRAGMENT_NAME.to_string(),
                span,
            };
            return Ok(Expression::element(fragment, Expression::Null { span }, children, span));
        }

        let (name, element_type) = self.parse_tag_name()?;
        let props_start = self.pos;
        let (properties, self_closing) = self.parse_attributes()?;
        let props_end = self.pos;

        let children = if self_closing {
            Vec::new()
        } else {
            self.parse_children(&name)?
        };

        let span = Span::new(start, self.pos);
        let props = if properties.is_empty() {
            Expression::Null { span }
        } else {
            Expression::Object {
                properties,
                span: Span::new(props_start, props_end),
            }
        };

        Ok(Expression::element(element_type, props, children, span))
    }

    /// Tag names: intrinsic (`div`, `my-element`, `svg:rect`) compile to
    /// strings, capitalized or dotted names compile to identifier references.
    fn parse_tag_name(&mut self) -> ParseResult<(String, Expression)> {
        let start = self.pos;
        let first = self.scan_jsx_identifier("tag name")?;

        let mut segments = vec![first];
        let mut namespace = None;

        if self.rest().starts_with(':') {
            self.pos += 1;
            namespace = Some(self.scan_jsx_identifier("tag name")?);
        } else {
            while self.rest().starts_with('.') {
                self.pos += 1;
                segments.push(self.scan_jsx_identifier("tag name")?);
            }
        }

        let span = Span::new(start, self.pos);

        if let Some(local) = namespace {
            let name = format!("{}:{}", first, local);
            return Ok((name.clone(), Expression::String { value: name, span }));
        }

        let name = segments.join(".");

        if segments.len() > 1 {
            let mut expr = Expression::Identifier {
                name: segments[0].to_string(),
                span,
            };
            for segment in &segments[1..] {
                expr = Expression::Member {
                    object: Box::new(expr),
                    property: MemberProperty::Named(segment.to_string()),
                    optional: false,
                    span,
                };
            }
            return Ok((name, expr));
        }

        let is_intrinsic = first.starts_with(|c: char| c.is_ascii_lowercase()) || first.contains('-');
        let element_type = if is_intrinsic {
            Expression::String {
                value: name.clone(),
                span,
            }
        } else {
            Expression::Identifier {
                name: name.clone(),
                span,
            }
        };

        Ok((name, element_type))
    }

    /// Attributes up to `>` or `/>`; returns whether the tag self-closed
    fn parse_attributes(&mut self) -> ParseResult<(Vec<ObjectProperty>, bool)> {
        let mut properties = Vec::new();

        loop {
            self.skip_trivia()?;
            let rest = self.rest();

            if rest.is_empty() || rest == "/" {
                return Err(self.eof("'>'"));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok((properties, true));
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok((properties, false));
            }
            if rest.starts_with('{') {
                self.pos += 1;
                self.expect(Token::Ellipsis)?;
                let value = self.parse_expression()?;
                self.expect(Token::RBrace)?;
                properties.push(ObjectProperty::Spread(value));
                continue;
            }

            let name_start = self.pos;
            let mut key = self.scan_jsx_identifier("attribute name")?.to_string();
            if self.rest().starts_with(':') {
                self.pos += 1;
                let local = self.scan_jsx_identifier("attribute name")?;
                key = format!("{}:{}", key, local);
            }
            let name_end = self.pos;

            self.skip_trivia()?;
            let value = if self.rest().starts_with('=') {
                self.pos += 1;
                self.skip_trivia()?;
                self.parse_attribute_value()?
            } else {
                Expression::Boolean {
                    value: true,
                    span: Span::new(name_start, name_end),
                }
            };

            properties.push(ObjectProperty::KeyValue { key, value });
        }
    }

    fn parse_attribute_value(&mut self) -> ParseResult<Expression> {
        let start = self.pos;
        let rest = self.rest();

        match rest.chars().next() {
            None => Err(self.eof("attribute value")),
            Some(quote @ ('"' | '\'')) => {
                let body = &rest[1..];
                let close = body.find(quote).ok_or_else(|| self.eof("closing quote"))?;
                let value = decode_entities(&body[..close]);
                self.pos += close + 2;
                Ok(Expression::String {
                    value,
                    span: Span::new(start, self.pos),
                })
            }
            Some('{') => {
                self.pos += 1;
                if let Some(span) = self.eat(Token::RBrace)? {
                    return Err(ParseError::invalid_syntax(
                        span.start,
                        "attributes must be assigned a non-empty expression",
                    ));
                }
                let value = self.parse_expression()?;
                self.expect(Token::RBrace)?;
                Ok(value)
            }
            Some('<') => {
                self.pos += 1;
                self.parse_element(start)
            }
            Some(other) => Err(ParseError::unexpected_token(
                start,
                "attribute value",
                format!("'{}'", other),
            )),
        }
    }

    /// Children up to the closing tag matching `parent` ("" for fragments)
    fn parse_children(&mut self, parent: &str) -> ParseResult<Vec<Expression>> {
        let mut children = Vec::new();

        loop {
            let rest = self.rest();

            if rest.is_empty() {
                return Err(self.eof(format!("</{}>", parent)));
            }

            if rest.starts_with('<') {
                let tag_start = self.pos;
                self.pos += 1;
                self.skip_trivia()?;
                if self.rest().starts_with('/') {
                    self.pos += 1;
                    self.parse_closing_tag(parent, tag_start)?;
                    return Ok(children);
                }
                children.push(self.parse_element(tag_start)?);
            } else if rest.starts_with('{') {
                self.pos += 1;
                if let Some(child) = self.parse_expression_container()? {
                    children.push(child);
                }
            } else {
                let len = rest.find(['<', '{']).unwrap_or(rest.len());
                let raw = &rest[..len];
                if let Some(offset) = raw.find('}') {
                    return Err(ParseError::unexpected_token(
                        self.pos + offset,
                        "text or element",
                        "'}'",
                    ));
                }
                let span = Span::new(self.pos, self.pos + len);
                self.pos += len;
                if let Some(value) = clean_jsx_text(raw) {
                    children.push(Expression::String { value, span });
                }
            }
        }
    }

    /// `{expr}` child; empty and comment-only containers yield nothing
    fn parse_expression_container(&mut self) -> ParseResult<Option<Expression>> {
        if self.eat(Token::RBrace)?.is_some() {
            return Ok(None);
        }

        self.eat(Token::Ellipsis)?;
        let expr = self.parse_expression()?;
        self.expect(Token::RBrace)?;
        Ok(Some(expr))
    }

    fn parse_closing_tag(&mut self, parent: &str, start: usize) -> ParseResult<()> {
        self.skip_trivia()?;

        let found = if self.rest().starts_with('>') {
            String::new()
        } else {
            self.parse_tag_name()?.0
        };

        self.skip_trivia()?;
        // The name may still be growing
        if self.rest().is_empty() {
            return Err(self.eof("'>'"));
        }

        if found != parent {
            return Err(ParseError::mismatched_closing_tag(start, parent, found));
        }

        if !self.rest().starts_with('>') {
            return Err(ParseError::unexpected_token(
                self.pos,
                "'>'",
                self.describe_next_char(),
            ));
        }

        self.pos += 1;
        Ok(())
    }

    fn scan_jsx_identifier(&mut self, what: &str) -> ParseResult<&'src str> {
        let source = self.source;
        let rest = &source[self.pos..];

        match rest.chars().next() {
            None => return Err(self.eof(what)),
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
            Some(c) => {
                return Err(ParseError::unexpected_token(self.pos, what, format!("'{}'", c)))
            }
        }

        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-')))
            .unwrap_or(rest.len());
        self.pos += len;
        Ok(&rest[..len])
    }

    // Helper methods

    fn rest(&self) -> &'src str {
        &self.source[self.pos..]
    }

    fn eof(&self, expected: impl Into<String>) -> ParseError {
        ParseError::unexpected_eof(self.source.len(), expected)
    }

    fn describe_next_char(&self) -> String {
        self.rest()
            .chars()
            .next()
            .map(|c| format!("'{}'", c))
            .unwrap_or_else(|| "end of input".to_string())
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::invalid_syntax(self.pos, "nesting too deep"));
        }
        Ok(())
    }

    /// Skip whitespace and comments in tag positions
    fn skip_trivia(&mut self) -> ParseResult<()> {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();

            if trimmed.starts_with("//") {
                self.pos += trimmed.find('\n').unwrap_or(trimmed.len());
            } else if trimmed.starts_with("/*") {
                match trimmed[2..].find("*/") {
                    Some(end) => self.pos += end + 4,
                    None => return Err(self.eof("end of comment")),
                }
            } else {
                return Ok(());
            }
        }
    }

    fn peek(&self) -> ParseResult<Option<Spanned<'src>>> {
        let rest = self.rest();

        let trimmed = rest.trim_start();
        if trimmed.starts_with("/*") && !trimmed[2..].contains("*/") {
            return Err(self.eof("end of comment"));
        }

        match lex_one(rest) {
            None => Ok(None),
            Some(Ok((token, span))) => Ok(Some((token, self.pos + span.start..self.pos + span.end))),
            Some(Err(span)) => {
                let at = self.pos + span.start;
                match self.source[at..].chars().next() {
                    Some('"' | '\'' | '`') => Err(self.eof("closing quote")),
                    _ => Err(ParseError::lexer_error(at)),
                }
            }
        }
    }

    fn advance(&mut self) -> ParseResult<Option<Spanned<'src>>> {
        let next = self.peek()?;
        if let Some((_, span)) = &next {
            self.pos = span.end;
        }
        Ok(next)
    }

    /// Consume `token` if it is next, returning its span
    fn eat(&mut self, token: Token) -> ParseResult<Option<Range<usize>>> {
        match self.peek()? {
            Some((next, span)) if std::mem::discriminant(&next) == std::mem::discriminant(&token) => {
                self.pos = span.end;
                Ok(Some(span))
            }
            _ => Ok(None),
        }
    }

    fn expect(&mut self, token: Token) -> ParseResult<Range<usize>> {
        match self.peek()? {
            Some((next, span)) if std::mem::discriminant(&next) == std::mem::discriminant(&token) => {
                self.pos = span.end;
                Ok(span)
            }
            Some((next, span)) => Err(ParseError::unexpected_token(
                span.start,
                token.to_string(),
                next.to_string(),
            )),
            None => Err(self.eof(token.to_string())),
        }
    }

    fn check_colon(&self) -> ParseResult<bool> {
        Ok(matches!(self.peek()?, Some((Token::Colon, _))))
    }

    fn expect_property_name(&mut self) -> ParseResult<String> {
        match self.advance()? {
            Some((Token::Ident(name), _)) => Ok(name.to_string()),
            Some((token @ (Token::True | Token::False | Token::Null | Token::Undefined | Token::Return), _)) => {
                Ok(token.to_string())
            }
            Some((token, span)) => Err(ParseError::unexpected_token(
                span.start,
                "property name",
                token.to_string(),
            )),
            None => Err(self.eof("property name")),
        }
    }
}

fn binary_operator(token: &Token, level: usize) -> Option<BinaryOp> {
    let op = match (level, token) {
        (0, Token::Or) => BinaryOp::Or,
        (0, Token::Nullish) => BinaryOp::Nullish,
        (1, Token::And) => BinaryOp::And,
        (2, Token::EqualsEquals) => BinaryOp::Equals,
        (2, Token::NotEquals) => BinaryOp::NotEquals,
        (2, Token::StrictEquals) => BinaryOp::StrictEquals,
        (2, Token::StrictNotEquals) => BinaryOp::StrictNotEquals,
        (3, Token::LAngle) => BinaryOp::LessThan,
        (3, Token::LessThanEquals) => BinaryOp::LessThanOrEqual,
        (3, Token::RAngle) => BinaryOp::GreaterThan,
        (3, Token::GreaterThanEquals) => BinaryOp::GreaterThanOrEqual,
        (4, Token::Plus) => BinaryOp::Add,
        (4, Token::Minus) => BinaryOp::Subtract,
        (5, Token::Star) => BinaryOp::Multiply,
        (5, Token::Slash) => BinaryOp::Divide,
        (5, Token::Percent) => BinaryOp::Modulo,
        _ => return None,
    };
    Some(op)
}

/// Resolve backslash escapes in a string or template literal body
fn unescape(raw: &str, pos: usize) -> ParseResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('0') => out.push('\0'),
            Some('\n') => {}
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(code_point(&hex, pos)?);
            }
            Some('u') => {
                let hex: String = if chars.peek() == Some(&'{') {
                    chars.next();
                    chars.by_ref().take_while(|c| *c != '}').collect()
                } else {
                    chars.by_ref().take(4).collect()
                };
                out.push(code_point(&hex, pos)?);
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    Ok(out)
}

fn code_point(hex: &str, pos: usize) -> ParseResult<char> {
    u32::from_str_radix(hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| ParseError::invalid_syntax(pos, format!("invalid escape sequence '{}'", hex)))
}

/// Collapse JSX text the way JSX compilers do: lines are trimmed at their
/// inner edges, whitespace-only lines vanish, and the rest join with a space.
fn clean_jsx_text(raw: &str) -> Option<String> {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = normalized.split('\n').map(|line| line.replace('\t', " ")).collect();

    let last_non_empty = lines.iter().rposition(|line| !line.trim().is_empty())?;
    let last = lines.len() - 1;

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let mut trimmed = line.as_str();
        if i != 0 {
            trimmed = trimmed.trim_start_matches(' ');
        }
        if i != last {
            trimmed = trimmed.trim_end_matches(' ');
        }
        if trimmed.is_empty() {
            continue;
        }
        out.push_str(trimmed);
        if i != last_non_empty {
            out.push(' ');
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(decode_entities(&out))
    }
}

/// Decode the HTML character references that show up in generated markup
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => num.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Transform accumulated markup into an expression tree.
///
/// Pure and deterministic: the same input always yields the same tree, so
/// it is safe to call on every growing prefix of a generation.
pub fn transform(markup: &str) -> ParseResult<Program> {
    Parser::new(markup).parse_program()
}
