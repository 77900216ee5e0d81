use serde::{Deserialize, Serialize};

/// Every element compiles to a call against this binding: `tag(props, ...children)`.
pub const JSX_FACTORY_NAME: &str = "___$rs$jsx";

/// Binding used as the element type of `<>...</>` fragments.
pub const JSX_FRAGMENT_NAME: &str = "___$rs$fragment";

/// Byte range in the transformed markup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A transformed generation: a single expression, usually one root element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub body: Expression,
    pub span: Span,
}

/// Expression tree produced by the transformer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expression {
    String {
        value: String,
        span: Span,
    },
    Number {
        value: f64,
        span: Span,
    },
    Boolean {
        value: bool,
        span: Span,
    },
    Null {
        span: Span,
    },
    Undefined {
        span: Span,
    },
    Template {
        parts: Vec<TemplatePart>,
        span: Span,
    },
    Identifier {
        name: String,
        span: Span,
    },
    Array {
        elements: Vec<ArrayElement>,
        span: Span,
    },
    Object {
        properties: Vec<ObjectProperty>,
        span: Span,
    },
    Member {
        object: Box<Expression>,
        property: MemberProperty,
        optional: bool,
        span: Span,
    },
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
        optional: bool,
        span: Span,
    },
    Arrow {
        params: Vec<String>,
        body: Box<Expression>,
        span: Span,
    },
    Unary {
        operator: UnaryOp,
        argument: Box<Expression>,
        span: Span,
    },
    Binary {
        left: Box<Expression>,
        operator: BinaryOp,
        right: Box<Expression>,
        span: Span,
    },
    Conditional {
        test: Box<Expression>,
        consequent: Box<Expression>,
        alternate: Box<Expression>,
        span: Span,
    },
}

/// Part of a template string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    Literal(String),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayElement {
    Item(Expression),
    Spread(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectProperty {
    KeyValue { key: String, value: Expression },
    Spread(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberProperty {
    Named(String),
    Computed(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    StrictEquals,
    StrictNotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Nullish,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equals => "==",
            BinaryOp::NotEquals => "!=",
            BinaryOp::StrictEquals => "===",
            BinaryOp::StrictNotEquals => "!==",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Nullish => "??",
        }
    }
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::String { span, .. }
            | Expression::Number { span, .. }
            | Expression::Boolean { span, .. }
            | Expression::Null { span }
            | Expression::Undefined { span }
            | Expression::Template { span, .. }
            | Expression::Identifier { span, .. }
            | Expression::Array { span, .. }
            | Expression::Object { span, .. }
            | Expression::Member { span, .. }
            | Expression::Call { span, .. }
            | Expression::Arrow { span, .. }
            | Expression::Unary { span, .. }
            | Expression::Binary { span, .. }
            | Expression::Conditional { span, .. } => *span,
        }
    }

    /// Build `___$rs$jsx(element_type, props, ...children)`
    pub fn element(element_type: Expression, props: Expression, children: Vec<Expression>, span: Span) -> Self {
        let mut arguments = Vec::with_capacity(children.len() + 2);
        arguments.push(element_type);
        arguments.push(props);
        arguments.extend(children);

        Expression::Call {
            callee: Box::new(Expression::Identifier {
                name: JSX_FACTORY_NAME.to_string(),
                span,
            }),
            arguments,
            optional: false,
            span,
        }
    }

    /// True for calls produced from markup elements
    pub fn is_element(&self) -> bool {
        matches!(
            self,
            Expression::Call { callee, .. }
                if matches!(callee.as_ref(), Expression::Identifier { name, .. } if name == JSX_FACTORY_NAME)
        )
    }
}
