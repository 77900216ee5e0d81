//! Flight-style row encoding of tree updates.
//!
//! Each update becomes one chunk of newline-terminated rows:
//!
//! ```text
//! 1:I{"id":"/g/test.js","chunks":[],"name":"Counter","async":true}
//! 0:["$","$Sreact.suspense",null,{"children":"$L2","fallback":["$","$L1",null,{}]}]
//! ```
//!
//! Row 0 is the root. Every update fills the row the previous update left
//! open: a suspense boundary showing the tree as its fallback, with the next
//! row as its lazy child. The final update fills the open row with the bare
//! tree, closing the chain. Import rows (`I`) are written the first time a
//! reference id is seen and their row ids are reused by later updates.

use crate::accumulator::clean;
use genui_evaluator::{evaluate, Element, ElementType, EvalError, ReferenceCatalog, ReferenceRegistry, Value};
use genui_parser::{transform, ParseError};
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

const FRAGMENT_SYMBOL: &str = "$Sreact.fragment";
const SUSPENSE_SYMBOL: &str = "$Sreact.suspense";
const ROOT_ROW: usize = 0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ParseError),

    #[error("evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    #[error("markup evaluated to {0}, which renders nothing")]
    NotRenderable(&'static str),
}

/// Serializes successive trees of one session
#[derive(Debug)]
pub struct FlightEncoder {
    next_row: usize,
    /// Row the next model is written to; `None` once the chain is closed
    open_row: Option<usize>,
    reference_rows: HashMap<String, usize>,
}

impl Default for FlightEncoder {
    fn default() -> Self {
        Self {
            next_row: ROOT_ROW + 1,
            open_row: Some(ROOT_ROW),
            reference_rows: HashMap::new(),
        }
    }
}

impl FlightEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a tree that a later update will replace
    pub fn render(&mut self, tree: &Value, registry: &ReferenceRegistry) -> String {
        let mut chunk = self.import_rows(registry);
        let row = self.take_open_row();
        let next = self.allocate_row();
        self.open_row = Some(next);

        let model = json!([
            "$",
            SUSPENSE_SYMBOL,
            null,
            { "fallback": self.encode_value(tree), "children": format!("$L{:x}", next) }
        ]);
        chunk.push_str(&format!("{:x}:{}\n", row, model));
        chunk
    }

    /// Encode the last tree of the session, closing the chain
    pub fn finish(&mut self, tree: &Value, registry: &ReferenceRegistry) -> String {
        let mut chunk = self.import_rows(registry);
        let row = self.take_open_row();
        self.open_row = None;

        chunk.push_str(&format!("{:x}:{}\n", row, self.encode_value(tree)));
        chunk
    }

    pub fn is_finished(&self) -> bool {
        self.open_row.is_none()
    }

    fn take_open_row(&mut self) -> usize {
        match self.open_row {
            Some(row) => row,
            None => {
                warn!("Rendering after the chain was closed; the row is unreachable");
                self.allocate_row()
            }
        }
    }

    /// Import rows for references not seen before
    fn import_rows(&mut self, registry: &ReferenceRegistry) -> String {
        let mut chunk = String::new();

        for (id, descriptor) in registry.iter() {
            if self.reference_rows.contains_key(id) {
                continue;
            }
            match serde_json::to_string(descriptor) {
                Ok(metadata) => {
                    let row = self.allocate_row();
                    chunk.push_str(&format!("{:x}:I{}\n", row, metadata));
                    self.reference_rows.insert(id.to_string(), row);
                }
                Err(error) => warn!(%id, %error, "Failed to serialize reference descriptor"),
            }
        }
        chunk
    }

    fn allocate_row(&mut self) -> usize {
        let row = self.next_row;
        self.next_row += 1;
        row
    }

    fn encode_value(&self, value: &Value) -> Json {
        match value {
            Value::Undefined => json!("$undefined"),
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Number(n) => encode_number(*n),
            Value::String(s) if s.starts_with('$') => Json::String(format!("${}", s)),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(|item| self.encode_value(item)).collect()),
            Value::Object(map) => Json::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), self.encode_value(value)))
                    .collect(),
            ),
            Value::Element(element) => self.encode_element(element),
            Value::Reference(id) => self.encode_reference(id),
            Value::Fragment => json!(FRAGMENT_SYMBOL),
            Value::Function(_) => {
                warn!("Functions cannot be passed to the client; encoding null");
                Json::Null
            }
        }
    }

    fn encode_element(&self, element: &Element) -> Json {
        let element_type = match &element.element_type {
            ElementType::Intrinsic(tag) => Json::String(tag.clone()),
            ElementType::Reference(id) => self.encode_reference(id),
            ElementType::Fragment => json!(FRAGMENT_SYMBOL),
        };

        let mut props: serde_json::Map<String, Json> = element
            .props
            .iter()
            .map(|(name, value)| (name.clone(), self.encode_value(value)))
            .collect();

        match element.children.as_slice() {
            [] => {}
            [only] => {
                props.insert("children".to_string(), self.encode_value(only));
            }
            children => {
                let encoded = children.iter().map(|child| self.encode_value(child)).collect();
                props.insert("children".to_string(), Json::Array(encoded));
            }
        }

        json!(["$", element_type, element.key, props])
    }

    fn encode_reference(&self, id: &str) -> Json {
        match self.reference_rows.get(id) {
            Some(row) => Json::String(format!("$L{:x}", row)),
            None => {
                warn!(%id, "Reference used without a registry entry; encoding null");
                Json::Null
            }
        }
    }
}

fn encode_number(n: f64) -> Json {
    if n.is_nan() {
        json!("$NaN")
    } else if n == f64::INFINITY {
        json!("$Infinity")
    } else if n == f64::NEG_INFINITY {
        json!("$-Infinity")
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        json!(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}

/// Render complete markup in one pass
pub fn render_once(source: &str, catalog: &ReferenceCatalog) -> Result<String, RenderError> {
    let cleaned = clean(source);
    let program = transform(&cleaned)?;

    let mut registry = ReferenceRegistry::new();
    let tree = evaluate(&program, catalog, &mut registry)?;
    if !tree.is_renderable() {
        return Err(RenderError::NotRenderable(tree.type_name()));
    }

    Ok(FlightEncoder::new().finish(&tree, &registry))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ReferenceCatalog {
        ReferenceCatalog::with_defaults()
    }

    #[test]
    fn test_render_intrinsic_element() {
        let payload = render_once("<div>hello</div>", &catalog()).unwrap();
        assert_eq!(payload, "0:[\"$\",\"div\",null,{\"children\":\"hello\"}]\n");
    }

    #[test]
    fn test_render_client_reference() {
        let payload = render_once("<Counter />", &catalog()).unwrap();
        let rows: Vec<&str> = payload.lines().collect();

        assert_eq!(rows[0], r#"1:I{"id":"/g/test.js","chunks":[],"name":"Counter","async":true}"#);
        assert_eq!(rows[1], r#"0:["$","$L1",null,{}]"#);
    }

    #[test]
    fn test_updates_chain_from_root() {
        let program = transform("<Counter />").unwrap();
        let catalog = catalog();
        let mut registry = ReferenceRegistry::new();
        let tree = evaluate(&program, &catalog, &mut registry).unwrap();

        let mut encoder = FlightEncoder::new();
        let first = encoder.render(&tree, &registry);
        let second = encoder.render(&tree, &registry);
        let last = encoder.finish(&tree, &registry);

        assert_eq!(
            first,
            "1:I{\"id\":\"/g/test.js\",\"chunks\":[],\"name\":\"Counter\",\"async\":true}\n\
             0:[\"$\",\"$Sreact.suspense\",null,{\"children\":\"$L2\",\"fallback\":[\"$\",\"$L1\",null,{}]}]\n"
        );
        assert_eq!(
            second,
            "2:[\"$\",\"$Sreact.suspense\",null,{\"children\":\"$L3\",\"fallback\":[\"$\",\"$L1\",null,{}]}]\n"
        );
        assert_eq!(last, "3:[\"$\",\"$L1\",null,{}]\n");
        assert!(encoder.is_finished());
    }

    #[test]
    fn test_special_values_are_escaped() {
        let tree = Value::Array(vec![
            Value::String("$5".into()),
            Value::Undefined,
            Value::Number(f64::NAN),
            Value::Number(f64::NEG_INFINITY),
            Value::Number(1.5),
            Value::Fragment,
        ]);
        let payload = FlightEncoder::new().finish(&tree, &ReferenceRegistry::new());

        assert_eq!(
            payload,
            "0:[\"$$5\",\"$undefined\",\"$NaN\",\"$-Infinity\",1.5,\"$Sreact.fragment\"]\n"
        );
    }

    #[test]
    fn test_keyed_children_and_fragments() {
        let payload = render_once(r#"<><b key="k">x</b>{1}</>"#, &catalog()).unwrap();
        assert_eq!(
            payload,
            "0:[\"$\",\"$Sreact.fragment\",null,{\"children\":[[\"$\",\"b\",\"k\",{\"children\":\"x\"}],1]}]\n"
        );
    }

    #[test]
    fn test_render_once_errors() {
        assert!(matches!(render_once("<div>", &catalog()), Err(RenderError::Syntax(_))));
        assert!(matches!(render_once("<div>{nope}</div>", &catalog()), Err(RenderError::Evaluation(_))));
        assert!(matches!(render_once("null", &catalog()), Err(RenderError::NotRenderable("null"))));
    }

    #[test]
    fn test_render_once_strips_fences() {
        let payload = render_once("```jsx\n<br />\n```", &catalog()).unwrap();
        assert_eq!(payload, "0:[\"$\",\"br\",null,{}]\n");
    }
}
