pub mod catalog;
pub mod evaluator;
pub mod registry;
pub mod resolver;
pub mod vdom;

pub use catalog::{ComponentReference, ReferenceCatalog, ReferenceDescriptor};
pub use evaluator::{evaluate, EvalError, EvalResult, Evaluator, Function, Value};
pub use registry::ReferenceRegistry;
pub use resolver::resolve_references;
pub use vdom::{Element, ElementType};
