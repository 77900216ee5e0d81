use crate::evaluator::Value;
use std::collections::BTreeMap;

/// What an element renders as
#[derive(Debug, Clone, PartialEq)]
pub enum ElementType {
    /// Host tag such as `div`
    Intrinsic(String),
    /// Client component, by registry id
    Reference(String),
    Fragment,
}

/// Element produced by the markup factory
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub element_type: ElementType,
    pub key: Option<String>,
    /// Props with `key` removed; children are kept separately
    pub props: BTreeMap<String, Value>,
    pub children: Vec<Value>,
}

impl Element {
    pub fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            key: None,
            props: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn intrinsic(tag: impl Into<String>) -> Self {
        Self::new(ElementType::Intrinsic(tag.into()))
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: Value) -> Self {
        self.props.insert(name.into(), value);
        self
    }

    pub fn with_child(mut self, child: Value) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.element_type {
            ElementType::Intrinsic(tag) => Some(tag),
            _ => None,
        }
    }

    /// Concatenated text of all string and number descendants
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            collect_text(child, &mut out);
        }
        out
    }
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Number(_) => out.push_str(&value.to_string()),
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, out)),
        Value::Element(element) => {
            for child in &element.children {
                collect_text(child, out);
            }
        }
        _ => {}
    }
}
