//! # Evaluation sandbox
//!
//! A total tree-walking interpreter over the transformer's expression tree.
//! Generated code is untrusted, so nothing here reaches the host: the only
//! bindings are the markup factory, the fragment marker, the catalog's
//! component references and arrow-function parameters. Any other identifier
//! fails with [`EvalError::UndefinedIdentifier`].
//!
//! Built-in methods are limited to what generated UI code reaches for:
//! arrays (`map`, `filter`, `join`, `includes`, `slice`, `length`) and
//! strings (`toUpperCase`, `toLowerCase`, `trim`, `includes`, `length`).
//!
//! Evaluation is deterministic: objects and props are `BTreeMap`s and no
//! builtin observes time, randomness or the environment.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use genui_evaluator::{evaluate, ReferenceCatalog, ReferenceRegistry};
//! use genui_parser::transform;
//!
//! let catalog = ReferenceCatalog::with_defaults();
//! let mut registry = ReferenceRegistry::new();
//! let program = transform("<div><Counter /></div>")?;
//! let tree = evaluate(&program, &catalog, &mut registry)?;
//! ```

use crate::catalog::ReferenceCatalog;
use crate::registry::ReferenceRegistry;
use crate::resolver::resolve_references;
use crate::vdom::{Element, ElementType};
use genui_parser::ast::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

pub type EvalResult<T> = Result<T, EvalError>;

/// Nested arrow invocations allowed before evaluation fails
pub const MAX_CALL_DEPTH: usize = 64;

/// Total arrow invocations allowed in one evaluation
pub const MAX_CALLS: usize = 100_000;

/// Expression nesting allowed across all active calls; keeps the walk off the
/// end of the thread stack for trees built without the parser's limit
pub const MAX_NESTING: usize = 300;

/// Weight of all values one evaluation may build: string bytes plus one per
/// array item, object entry, element and captured binding
pub const MAX_ALLOCATION: usize = 1 << 24;

/// Runtime failure of generated code; the `EvaluationError` kind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("'{name}' is not defined at {span:?}")]
    UndefinedIdentifier { name: String, span: Span },

    #[error("{callee} is not a function at {span:?}")]
    NotCallable { callee: String, span: Span },

    #[error("Type error at {span:?}: {message}")]
    TypeError { message: String, span: Span },

    #[error("Invalid operands for operator {operator} at {span:?}: {details}")]
    InvalidOperands {
        operator: String,
        details: String,
        span: Span,
    },

    #[error("Maximum call depth of {limit} exceeded at {span:?}")]
    RecursionLimit { limit: usize, span: Span },

    #[error("Call budget of {limit} exhausted at {span:?}")]
    CallLimit { limit: usize, span: Span },

    #[error("Expression nesting deeper than {limit} at {span:?}")]
    NestingLimit { limit: usize, span: Span },

    #[error("Allocation budget of {limit} exhausted at {span:?}")]
    AllocationLimit { limit: usize, span: Span },
}

/// Runtime value of the sandbox
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Element(Box<Element>),
    /// Client component reference, by registry id
    Reference(String),
    Fragment,
    Function(Function),
}

#[derive(Debug, Clone)]
pub enum Function {
    /// The markup factory binding
    Factory,
    Closure(Arc<Closure>),
    /// Builtin method bound to its receiver
    Method { receiver: Box<Value>, name: String },
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Function::Factory, Function::Factory) => true,
            (Function::Closure(a), Function::Closure(b)) => Arc::ptr_eq(a, b),
            (
                Function::Method { receiver, name },
                Function::Method {
                    receiver: other_receiver,
                    name: other_name,
                },
            ) => name == other_name && receiver == other_receiver,
            _ => false,
        }
    }
}

/// Arrow function with the bindings visible where it was created
#[derive(Debug)]
pub struct Closure {
    params: Vec<String>,
    body: Expression,
    captured: Vec<(String, Value)>,
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Whether the value should replace the live tree
    pub fn is_renderable(&self) -> bool {
        self.is_truthy()
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Element(_) => "element",
            Value::Reference(_) => "reference",
            Value::Fragment => "fragment",
            Value::Function(_) => "function",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => single.to_number(),
                _ => f64::NAN,
            },
            _ => f64::NAN,
        }
    }

    /// `===`: composite values compare by identity, which clones never share
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a == b,
            (Value::Fragment, Value::Fragment) => true,
            (Value::Function(a), Value::Function(b)) => a == b,
            _ => false,
        }
    }

    /// `==` with the primitive coercions generated code relies on
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Number(_), Value::String(_))
            | (Value::String(_), Value::Number(_))
            | (Value::Boolean(_), _)
            | (_, Value::Boolean(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{}", item)?;
                    }
                }
                Ok(())
            }
            Value::Object(_) | Value::Element(_) => write!(f, "[object Object]"),
            Value::Reference(_) | Value::Function(_) => write!(f, "function"),
            Value::Fragment => write!(f, "Symbol(react.fragment)"),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Tree-walking interpreter bound to one reference catalog
pub struct Evaluator<'a> {
    catalog: &'a ReferenceCatalog,
    scope: Vec<(String, Value)>,
    depth: usize,
    nesting: usize,
    calls: usize,
    allocated: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(catalog: &'a ReferenceCatalog) -> Self {
        Self {
            catalog,
            scope: Vec::new(),
            depth: 0,
            nesting: 0,
            calls: 0,
            allocated: 0,
        }
    }

    /// Evaluate a transformed program to a tree value
    #[instrument(skip_all, fields(len = program.span.end))]
    pub fn evaluate(&mut self, program: &Program) -> EvalResult<Value> {
        self.scope.clear();
        self.depth = 0;
        self.nesting = 0;
        self.calls = 0;
        self.allocated = 0;

        let value = self.eval(&program.body)?;
        debug!(kind = value.type_name(), calls = self.calls, "Evaluated program");
        Ok(value)
    }

    fn eval(&mut self, expr: &Expression) -> EvalResult<Value> {
        if self.nesting >= MAX_NESTING {
            return Err(EvalError::NestingLimit {
                limit: MAX_NESTING,
                span: expr.span(),
            });
        }
        self.nesting += 1;
        let result = self.eval_node(expr);
        self.nesting -= 1;

        let value = result?;
        if builds_value(expr) {
            self.charge(&value, expr.span())?;
        }
        Ok(value)
    }

    /// Count a freshly built value against the allocation budget. Values are
    /// deep copies, so nested structure is weighed in full.
    fn charge(&mut self, value: &Value, span: Span) -> EvalResult<()> {
        let mut pending = vec![(value, 1)];
        while let Some((value, depth)) = pending.pop() {
            if depth > MAX_NESTING {
                return Err(EvalError::NestingLimit {
                    limit: MAX_NESTING,
                    span,
                });
            }

            self.allocated += match value {
                Value::String(s) => s.len().max(1),
                Value::Array(items) => {
                    pending.extend(items.iter().map(|item| (item, depth + 1)));
                    1
                }
                Value::Object(map) => {
                    pending.extend(map.values().map(|item| (item, depth + 1)));
                    1 + map.keys().map(String::len).sum::<usize>()
                }
                Value::Element(element) => {
                    pending.extend(element.props.values().map(|item| (item, depth + 1)));
                    pending.extend(element.children.iter().map(|item| (item, depth + 1)));
                    1 + element.props.len()
                }
                Value::Function(Function::Closure(closure)) => {
                    pending.extend(closure.captured.iter().map(|(_, item)| (item, depth + 1)));
                    1 + closure.captured.len()
                }
                Value::Function(Function::Method { receiver, .. }) => {
                    pending.push((receiver, depth + 1));
                    1
                }
                _ => 1,
            };

            if self.allocated > MAX_ALLOCATION {
                return Err(EvalError::AllocationLimit {
                    limit: MAX_ALLOCATION,
                    span,
                });
            }
        }
        Ok(())
    }

    fn eval_node(&mut self, expr: &Expression) -> EvalResult<Value> {
        match expr {
            Expression::String { value, .. } => Ok(Value::String(value.clone())),
            Expression::Number { value, .. } => Ok(Value::Number(*value)),
            Expression::Boolean { value, .. } => Ok(Value::Boolean(*value)),
            Expression::Null { .. } => Ok(Value::Null),
            Expression::Undefined { .. } => Ok(Value::Undefined),
            Expression::Template { parts, .. } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Literal(text) => out.push_str(text),
                        TemplatePart::Expression(expr) => out.push_str(&self.eval(expr)?.to_string()),
                    }
                }
                Ok(Value::String(out))
            }
            Expression::Identifier { name, span } => self.lookup(name, *span),
            Expression::Array { elements, span } => self.eval_array(elements, *span),
            Expression::Object { properties, .. } => self.eval_object(properties),
            Expression::Member {
                object,
                property,
                optional,
                span,
            } => {
                let target = self.eval(object)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = match property {
                    MemberProperty::Named(name) => Value::String(name.clone()),
                    MemberProperty::Computed(expr) => self.eval(expr)?,
                };
                get_property(target, &key, *span)
            }
            Expression::Call {
                callee,
                arguments,
                optional,
                span,
            } => {
                let function = self.eval(callee)?;
                if *optional && function.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let function = match function {
                    Value::Function(function) => function,
                    _ => {
                        return Err(EvalError::NotCallable {
                            callee: describe(callee),
                            span: *span,
                        })
                    }
                };
                let args = arguments
                    .iter()
                    .map(|argument| self.eval(argument))
                    .collect::<EvalResult<Vec<_>>>()?;
                self.call(function, args, *span)
            }
            Expression::Arrow { params, body, .. } => {
                Ok(Value::Function(Function::Closure(Arc::new(Closure {
                    params: params.clone(),
                    body: body.as_ref().clone(),
                    captured: self.scope.clone(),
                }))))
            }
            Expression::Unary {
                operator, argument, ..
            } => {
                let value = self.eval(argument)?;
                Ok(match operator {
                    UnaryOp::Not => Value::Boolean(!value.is_truthy()),
                    UnaryOp::Negate => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                })
            }
            Expression::Binary {
                left,
                operator,
                right,
                span,
            } => self.eval_binary(left, *operator, right, *span),
            Expression::Conditional {
                test,
                consequent,
                alternate,
                ..
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
        }
    }

    fn lookup(&self, name: &str, span: Span) -> EvalResult<Value> {
        if let Some((_, value)) = self.scope.iter().rev().find(|(local, _)| local == name) {
            return Ok(value.clone());
        }

        match name {
            JSX_FACTORY_NAME => Ok(Value::Function(Function::Factory)),
            JSX_FRAGMENT_NAME => Ok(Value::Fragment),
            _ => match self.catalog.get(name) {
                Some(reference) => Ok(Value::Reference(reference.id.clone())),
                None => Err(EvalError::UndefinedIdentifier {
                    name: name.to_string(),
                    span,
                }),
            },
        }
    }

    fn eval_array(&mut self, elements: &[ArrayElement], span: Span) -> EvalResult<Value> {
        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                ArrayElement::Item(expr) => items.push(self.eval(expr)?),
                ArrayElement::Spread(expr) => match self.eval(expr)? {
                    Value::Array(spread) => items.extend(spread),
                    Value::String(s) => items.extend(s.chars().map(|c| Value::String(c.to_string()))),
                    other => {
                        return Err(EvalError::TypeError {
                            message: format!("{} is not iterable", other.type_name()),
                            span,
                        })
                    }
                },
            }
        }
        Ok(Value::Array(items))
    }

    fn eval_object(&mut self, properties: &[ObjectProperty]) -> EvalResult<Value> {
        let mut map = BTreeMap::new();
        for property in properties {
            match property {
                ObjectProperty::KeyValue { key, value } => {
                    map.insert(key.clone(), self.eval(value)?);
                }
                ObjectProperty::Spread(expr) => match self.eval(expr)? {
                    Value::Object(spread) => map.extend(spread),
                    Value::Array(items) => {
                        map.extend(items.into_iter().enumerate().map(|(i, item)| (i.to_string(), item)))
                    }
                    // Spreading other primitives adds nothing
                    _ => {}
                },
            }
        }
        Ok(Value::Object(map))
    }

    fn eval_binary(
        &mut self,
        left: &Expression,
        operator: BinaryOp,
        right: &Expression,
        span: Span,
    ) -> EvalResult<Value> {
        if matches!(operator, BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish) {
            let lhs = self.eval(left)?;
            let take_right = match operator {
                BinaryOp::And => lhs.is_truthy(),
                BinaryOp::Or => !lhs.is_truthy(),
                _ => lhs.is_nullish(),
            };
            return if take_right { self.eval(right) } else { Ok(lhs) };
        }

        let lhs = self.eval(left)?;
        let rhs = self.eval(right)?;

        match operator {
            BinaryOp::Add => add(lhs, rhs, span),
            BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
                let a = numeric_operand(&lhs, operator, span)?;
                let b = numeric_operand(&rhs, operator, span)?;
                Ok(Value::Number(match operator {
                    BinaryOp::Subtract => a - b,
                    BinaryOp::Multiply => a * b,
                    BinaryOp::Divide => a / b,
                    _ => a % b,
                }))
            }
            BinaryOp::StrictEquals => Ok(Value::Boolean(lhs.strict_equals(&rhs))),
            BinaryOp::StrictNotEquals => Ok(Value::Boolean(!lhs.strict_equals(&rhs))),
            BinaryOp::Equals => Ok(Value::Boolean(lhs.loose_equals(&rhs))),
            BinaryOp::NotEquals => Ok(Value::Boolean(!lhs.loose_equals(&rhs))),
            _ => Ok(Value::Boolean(compare(&lhs, operator, &rhs))),
        }
    }

    fn call(&mut self, function: Function, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        match function {
            Function::Factory => create_element(args, span),
            Function::Closure(closure) => self.invoke(&closure, args, span),
            Function::Method { receiver, name } => self.call_method(*receiver, &name, args, span),
        }
    }

    fn invoke(&mut self, closure: &Closure, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::RecursionLimit {
                limit: MAX_CALL_DEPTH,
                span,
            });
        }
        self.calls += 1;
        if self.calls > MAX_CALLS {
            return Err(EvalError::CallLimit {
                limit: MAX_CALLS,
                span,
            });
        }

        let mut scope = closure.captured.clone();
        let mut args = args.into_iter();
        for param in &closure.params {
            scope.push((param.clone(), args.next().unwrap_or(Value::Undefined)));
        }

        let saved = std::mem::replace(&mut self.scope, scope);
        self.depth += 1;
        let result = self.eval(&closure.body);
        self.depth -= 1;
        self.scope = saved;
        result
    }

    fn call_method(&mut self, receiver: Value, name: &str, args: Vec<Value>, span: Span) -> EvalResult<Value> {
        let mut args = args.into_iter();
        let first = args.next().unwrap_or(Value::Undefined);

        match (receiver, name) {
            (Value::Array(items), "map") => {
                let callback = callback(first, name, span)?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    out.push(self.call(callback.clone(), vec![item, Value::Number(i as f64)], span)?);
                }
                Ok(Value::Array(out))
            }
            (Value::Array(items), "filter") => {
                let callback = callback(first, name, span)?;
                let mut out = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    let keep = self.call(callback.clone(), vec![item.clone(), Value::Number(i as f64)], span)?;
                    if keep.is_truthy() {
                        out.push(item);
                    }
                }
                Ok(Value::Array(out))
            }
            (Value::Array(items), "join") => {
                let separator = match first {
                    Value::Undefined => ",".to_string(),
                    other => other.to_string(),
                };
                let mut joined = String::new();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        joined.push_str(&separator);
                    }
                    if !item.is_nullish() {
                        joined.push_str(&item.to_string());
                    }
                    if joined.len() > MAX_ALLOCATION {
                        return Err(EvalError::AllocationLimit {
                            limit: MAX_ALLOCATION,
                            span,
                        });
                    }
                }
                Ok(Value::String(joined))
            }
            (Value::Array(items), "includes") => {
                Ok(Value::Boolean(items.iter().any(|item| item.same_value_zero(&first))))
            }
            (Value::Array(items), "slice") => {
                let len = items.len();
                let start = relative_index(&first, len, 0);
                let end = relative_index(&args.next().unwrap_or(Value::Undefined), len, len);
                Ok(Value::Array(if start < end {
                    items[start..end].to_vec()
                } else {
                    Vec::new()
                }))
            }
            (Value::String(s), "toUpperCase") => Ok(Value::String(s.to_uppercase())),
            (Value::String(s), "toLowerCase") => Ok(Value::String(s.to_lowercase())),
            (Value::String(s), "trim") => Ok(Value::String(s.trim().to_string())),
            (Value::String(s), "includes") => Ok(Value::Boolean(s.contains(first.to_string().as_str()))),
            (receiver, name) => Err(EvalError::NotCallable {
                callee: format!("{}.{}", receiver.type_name(), name),
                span,
            }),
        }
    }
}

/// Resolve the program's catalog references into `registry`, then evaluate it.
pub fn evaluate(program: &Program, catalog: &ReferenceCatalog, registry: &mut ReferenceRegistry) -> EvalResult<Value> {
    resolve_references(program, catalog, registry);
    Evaluator::new(catalog).evaluate(program)
}

/// Expressions whose result is a new, possibly large value
fn builds_value(expr: &Expression) -> bool {
    matches!(
        expr,
        Expression::Template { .. }
            | Expression::Array { .. }
            | Expression::Object { .. }
            | Expression::Call { .. }
            | Expression::Arrow { .. }
            | Expression::Binary {
                operator: BinaryOp::Add,
                ..
            }
    )
}

/// `factory(type, props, ...children)`
fn create_element(args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let mut args = args.into_iter();

    let element_type = match args.next().unwrap_or(Value::Undefined) {
        Value::String(tag) => ElementType::Intrinsic(tag),
        Value::Reference(id) => ElementType::Reference(id),
        Value::Fragment => ElementType::Fragment,
        other => {
            return Err(EvalError::TypeError {
                message: format!("element type must be a tag, component or fragment, got {}", other.type_name()),
                span,
            })
        }
    };

    let mut props = match args.next().unwrap_or(Value::Null) {
        Value::Null | Value::Undefined => BTreeMap::new(),
        Value::Object(map) => map,
        other => {
            return Err(EvalError::TypeError {
                message: format!("element props must be an object, got {}", other.type_name()),
                span,
            })
        }
    };

    let key = props
        .remove("key")
        .filter(|key| !key.is_nullish())
        .map(|key| key.to_string());

    Ok(Value::Element(Box::new(Element {
        element_type,
        key,
        props,
        children: args.collect(),
    })))
}

fn get_property(target: Value, key: &Value, span: Span) -> EvalResult<Value> {
    match target {
        Value::Undefined | Value::Null => Err(EvalError::TypeError {
            message: format!("Cannot read properties of {} (reading '{}')", target, key),
            span,
        }),
        Value::Object(mut map) => Ok(map.remove(&key.to_string()).unwrap_or(Value::Undefined)),
        Value::Array(items) => {
            if let Some(index) = array_index(key) {
                return Ok(items.into_iter().nth(index).unwrap_or(Value::Undefined));
            }
            let name = key.to_string();
            Ok(match name.as_str() {
                "length" => Value::Number(items.len() as f64),
                "map" | "filter" | "join" | "includes" | "slice" => Value::Function(Function::Method {
                    receiver: Box::new(Value::Array(items)),
                    name,
                }),
                _ => Value::Undefined,
            })
        }
        Value::String(s) => {
            if let Some(index) = array_index(key) {
                return Ok(s
                    .chars()
                    .nth(index)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Undefined));
            }
            let name = key.to_string();
            Ok(match name.as_str() {
                "length" => Value::Number(s.encode_utf16().count() as f64),
                "toUpperCase" | "toLowerCase" | "trim" | "includes" => Value::Function(Function::Method {
                    receiver: Box::new(Value::String(s)),
                    name,
                }),
                _ => Value::Undefined,
            })
        }
        _ => Ok(Value::Undefined),
    }
}

fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Clamp a possibly negative `slice` bound into `0..=len`
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn callback(value: Value, method: &str, span: Span) -> EvalResult<Function> {
    match value {
        Value::Function(function) => Ok(function),
        other => Err(EvalError::TypeError {
            message: format!("{} passed to {} is not a function", other.type_name(), method),
            span,
        }),
    }
}

fn is_opaque(value: &Value) -> bool {
    matches!(
        value,
        Value::Element(_) | Value::Function(_) | Value::Reference(_) | Value::Fragment
    )
}

fn numeric_operand(value: &Value, operator: BinaryOp, span: Span) -> EvalResult<f64> {
    if is_opaque(value) {
        return Err(EvalError::InvalidOperands {
            operator: operator.as_str().to_string(),
            details: format!("cannot use {} in arithmetic", value.type_name()),
            span,
        });
    }
    Ok(value.to_number())
}

fn add(lhs: Value, rhs: Value, span: Span) -> EvalResult<Value> {
    if is_opaque(&lhs) || is_opaque(&rhs) {
        return Err(EvalError::InvalidOperands {
            operator: "+".to_string(),
            details: format!("cannot add {} and {}", lhs.type_name(), rhs.type_name()),
            span,
        });
    }

    let stringy = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
    if stringy(&lhs) || stringy(&rhs) {
        return Ok(Value::String(format!("{}{}", lhs, rhs)));
    }
    Ok(Value::Number(lhs.to_number() + rhs.to_number()))
}

fn compare(lhs: &Value, operator: BinaryOp, rhs: &Value) -> bool {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => lhs.to_number().partial_cmp(&rhs.to_number()),
    };

    match (operator, ordering) {
        (_, None) => false,
        (BinaryOp::LessThan, Some(o)) => o == Ordering::Less,
        (BinaryOp::LessThanOrEqual, Some(o)) => o != Ordering::Greater,
        (BinaryOp::GreaterThan, Some(o)) => o == Ordering::Greater,
        (BinaryOp::GreaterThanOrEqual, Some(o)) => o != Ordering::Less,
        _ => false,
    }
}

/// Human-readable callee for error messages
fn describe(callee: &Expression) -> String {
    match callee {
        Expression::Identifier { name, .. } => name.clone(),
        Expression::Member {
            object,
            property: MemberProperty::Named(name),
            ..
        } => format!("{}.{}", describe(object), name),
        Expression::Member { object, .. } => format!("{}[...]", describe(object)),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genui_parser::transform;

    fn run(source: &str) -> EvalResult<Value> {
        let catalog = ReferenceCatalog::with_defaults();
        let mut registry = ReferenceRegistry::new();
        let program = transform(source).expect("Failed to parse");
        evaluate(&program, &catalog, &mut registry)
    }

    fn element(value: Value) -> Element {
        match value {
            Value::Element(element) => *element,
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_intrinsic_element_with_text() {
        let div = element(run("<div>hello</div>").unwrap());

        assert_eq!(div.element_type, ElementType::Intrinsic("div".into()));
        assert_eq!(div.children, vec![Value::String("hello".into())]);
        assert!(div.props.is_empty());
    }

    #[test]
    fn test_reference_element() {
        let counter = element(run("<Counter initial={2} />").unwrap());

        assert_eq!(counter.element_type, ElementType::Reference("__client.Counter".into()));
        assert_eq!(counter.props.get("initial"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_key_is_lifted_out_of_props() {
        let li = element(run(r#"<li key="a" id="x">a</li>"#).unwrap());

        assert_eq!(li.key.as_deref(), Some("a"));
        assert!(!li.props.contains_key("key"));
        assert_eq!(li.props.get("id"), Some(&Value::String("x".into())));
    }

    #[test]
    fn test_fragment() {
        let fragment = element(run("<><b>1</b><i>2</i></>").unwrap());

        assert_eq!(fragment.element_type, ElementType::Fragment);
        assert_eq!(fragment.children.len(), 2);
    }

    #[test]
    fn test_unknown_identifier_hard_fails() {
        let err = run("<div>{window.location}</div>").unwrap_err();
        assert!(matches!(err, EvalError::UndefinedIdentifier { name, .. } if name == "window"));

        let err = run("<div>{alert(1)}</div>").unwrap_err();
        assert!(matches!(err, EvalError::UndefinedIdentifier { .. }));
    }

    #[test]
    fn test_map_filter_join() {
        let ul = element(
            run(r#"<ul>{[1, 2, 3, 4].filter(n => n % 2 === 0).map((n, i) => <li key={i}>{n * 10}</li>)}</ul>"#)
                .unwrap(),
        );

        match &ul.children[0] {
            Value::Array(items) => {
                assert_eq!(items.len(), 2);
                let first = element(items[0].clone());
                assert_eq!(first.key.as_deref(), Some("0"));
                assert_eq!(first.children, vec![Value::Number(20.0)]);
            }
            other => panic!("expected array child, got {:?}", other),
        }

        assert_eq!(run(r#"["a", null, "b"].join("-")"#).unwrap(), Value::String("a--b".into()));
    }

    #[test]
    fn test_string_methods_and_template() {
        assert_eq!(
            run(r#"`${"  Hi ".trim().toUpperCase()}:${"abc".length}`"#).unwrap(),
            Value::String("HI:3".into())
        );
        assert_eq!(run(r#""hello".includes("ell")"#).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_slice_and_includes() {
        assert_eq!(
            run("[1, 2, 3, 4].slice(1, -1)").unwrap(),
            Value::Array(vec![Value::Number(2.0), Value::Number(3.0)])
        );
        assert_eq!(run("[1, 2].includes(2)").unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_operators() {
        assert_eq!(run("1 + 2 * 3").unwrap(), Value::Number(7.0));
        assert_eq!(run(r#""n=" + 1"#).unwrap(), Value::String("n=1".into()));
        assert_eq!(run("null ?? 'x'").unwrap(), Value::String("x".into()));
        assert_eq!(run("0 || 'y'").unwrap(), Value::String("y".into()));
        assert_eq!(run("1 == '1'").unwrap(), Value::Boolean(true));
        assert_eq!(run("1 === '1'").unwrap(), Value::Boolean(false));
        assert_eq!(run("null == undefined").unwrap(), Value::Boolean(true));
        assert_eq!(run("'b' > 'a'").unwrap(), Value::Boolean(true));
        assert_eq!(run("!0").unwrap(), Value::Boolean(true));
        assert_eq!(run("1 / 0").unwrap(), Value::Number(f64::INFINITY));
    }

    #[test]
    fn test_short_circuit_skips_failing_branch() {
        assert_eq!(run("false && missing").unwrap(), Value::Boolean(false));
        assert_eq!(run("true ? 1 : missing").unwrap(), Value::Number(1.0));
    }

    #[test]
    fn test_object_spread_and_member_access() {
        assert_eq!(
            run("({ ...{ a: 1, b: 2 }, b: 3 }).b").unwrap(),
            Value::Number(3.0)
        );
        assert_eq!(run("({ a: 1 })?.missing?.deeper").unwrap(), Value::Undefined);
    }

    #[test]
    fn test_reading_property_of_null_fails() {
        let err = run("null.x").unwrap_err();
        assert!(matches!(err, EvalError::TypeError { .. }));
    }

    #[test]
    fn test_calling_non_function_fails() {
        let err = run("(1)(2)").unwrap_err();
        assert!(matches!(err, EvalError::NotCallable { .. }));

        let err = run("[1].push(2)").unwrap_err();
        assert!(matches!(err, EvalError::NotCallable { callee, .. } if callee.contains("push")));
    }

    #[test]
    fn test_self_application_hits_recursion_limit() {
        let err = run("(f => f(f))(f => f(f))").unwrap_err();
        assert!(matches!(err, EvalError::RecursionLimit { limit: MAX_CALL_DEPTH, .. }));
    }

    #[test]
    fn test_nesting_limit_on_hand_built_tree() {
        let one = |at: usize| Expression::Number {
            value: 1.0,
            span: Span::new(at, at + 1),
        };
        let mut body = one(0);
        for i in 0..2 * MAX_NESTING {
            body = Expression::Binary {
                left: Box::new(body),
                operator: BinaryOp::Add,
                right: Box::new(one(i)),
                span: Span::new(0, i + 1),
            };
        }
        let program = Program {
            span: body.span(),
            body,
        };

        let catalog = ReferenceCatalog::new();
        let err = Evaluator::new(&catalog).evaluate(&program).unwrap_err();
        assert!(matches!(err, EvalError::NestingLimit { limit: MAX_NESTING, .. }));
    }

    #[test]
    fn test_allocation_budget_is_per_evaluation() {
        let catalog = ReferenceCatalog::new();
        let program = transform(r#"[..."abc"].join("-")"#).unwrap();
        let mut evaluator = Evaluator::new(&catalog);

        for _ in 0..3 {
            assert_eq!(evaluator.evaluate(&program).unwrap(), Value::String("a-b-c".into()));
        }
    }

    #[test]
    fn test_arithmetic_on_elements_is_rejected() {
        let err = run("<b /> * 2").unwrap_err();
        assert!(matches!(err, EvalError::InvalidOperands { .. }));
    }

    #[test]
    fn test_closures_capture_scope() {
        assert_eq!(
            run("[1, 2].map(x => [10].map(y => x + y)).join(';')").unwrap(),
            Value::String("11;12".into())
        );
    }

    #[test]
    fn test_renderable_follows_truthiness() {
        assert!(run("<div />").unwrap().is_renderable());
        assert!(!run("null").unwrap().is_renderable());
        assert!(!run("''").unwrap().is_renderable());
        assert!(run("'text'").unwrap().is_renderable());
    }

    #[test]
    fn test_number_display() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
    }
}
