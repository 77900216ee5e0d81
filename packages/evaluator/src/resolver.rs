use crate::catalog::ReferenceCatalog;
use crate::registry::ReferenceRegistry;
use genui_parser::ast::*;
use tracing::debug;

/// Register every catalog reference the program mentions before it runs.
///
/// Walks the free identifiers of `program` (arrow parameters shadow catalog
/// names inside their bodies) and ensures a registry entry for each catalog
/// hit. Returns the number of entries added.
pub fn resolve_references(
    program: &Program,
    catalog: &ReferenceCatalog,
    registry: &mut ReferenceRegistry,
) -> usize {
    let mut resolver = Resolver {
        catalog,
        registry,
        shadowed: Vec::new(),
        added: 0,
    };
    resolver.visit(&program.body);
    resolver.added
}

struct Resolver<'a> {
    catalog: &'a ReferenceCatalog,
    registry: &'a mut ReferenceRegistry,
    shadowed: Vec<String>,
    added: usize,
}

impl<'a> Resolver<'a> {
    fn visit(&mut self, expr: &Expression) {
        match expr {
            Expression::Identifier { name, .. } => self.identifier(name),
            Expression::String { .. }
            | Expression::Number { .. }
            | Expression::Boolean { .. }
            | Expression::Null { .. }
            | Expression::Undefined { .. } => {}
            Expression::Template { parts, .. } => {
                for part in parts {
                    if let TemplatePart::Expression(expr) = part {
                        self.visit(expr);
                    }
                }
            }
            Expression::Array { elements, .. } => {
                for element in elements {
                    match element {
                        ArrayElement::Item(expr) | ArrayElement::Spread(expr) => self.visit(expr),
                    }
                }
            }
            Expression::Object { properties, .. } => {
                for property in properties {
                    match property {
                        ObjectProperty::KeyValue { value, .. } => self.visit(value),
                        ObjectProperty::Spread(expr) => self.visit(expr),
                    }
                }
            }
            Expression::Member { object, property, .. } => {
                self.visit(object);
                if let MemberProperty::Computed(property) = property {
                    self.visit(property);
                }
            }
            Expression::Call { callee, arguments, .. } => {
                self.visit(callee);
                for argument in arguments {
                    self.visit(argument);
                }
            }
            Expression::Arrow { params, body, .. } => {
                let depth = self.shadowed.len();
                self.shadowed.extend(params.iter().cloned());
                self.visit(body);
                self.shadowed.truncate(depth);
            }
            Expression::Unary { argument, .. } => self.visit(argument),
            Expression::Binary { left, right, .. } => {
                self.visit(left);
                self.visit(right);
            }
            Expression::Conditional {
                test,
                consequent,
                alternate,
                ..
            } => {
                self.visit(test);
                self.visit(consequent);
                self.visit(alternate);
            }
        }
    }

    fn identifier(&mut self, name: &str) {
        if self.shadowed.iter().any(|local| local == name) {
            return;
        }
        if let Some(reference) = self.catalog.get(name) {
            if self.registry.ensure(reference.id.clone(), reference.descriptor()) {
                debug!(export_name = %name, id = %reference.id, "Registered component reference");
                self.added += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ComponentReference;
    use genui_parser::transform;

    fn catalog() -> ReferenceCatalog {
        ReferenceCatalog::with_defaults()
            .with_reference(ComponentReference::new("__client.Chart", "Chart", "/g/chart.js"))
    }

    #[test]
    fn test_registers_used_references_once() {
        let program = transform("<div><Counter /><Counter /></div>").unwrap();
        let mut registry = ReferenceRegistry::new();

        assert_eq!(resolve_references(&program, &catalog(), &mut registry), 1);
        assert_eq!(registry.len(), 1);

        let descriptor = registry.resolve("__client.Counter").unwrap();
        assert!(descriptor.is_async);
        assert!(descriptor.chunks.is_empty());
    }

    #[test]
    fn test_unused_references_stay_out() {
        let program = transform("<p>plain</p>").unwrap();
        let mut registry = ReferenceRegistry::new();

        resolve_references(&program, &catalog(), &mut registry);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_arrow_parameters_shadow_catalog_names() {
        let program = transform("<ul>{items.map(Chart => <li>{Chart}</li>)}<Counter /></ul>").unwrap();
        let mut registry = ReferenceRegistry::new();

        resolve_references(&program, &catalog(), &mut registry);
        assert!(registry.contains("__client.Counter"));
        assert!(!registry.contains("__client.Chart"));
    }

    #[test]
    fn test_repeated_resolution_is_idempotent() {
        let program = transform("<Chart />").unwrap();
        let mut registry = ReferenceRegistry::new();

        resolve_references(&program, &catalog(), &mut registry);
        let added = resolve_references(&program, &catalog(), &mut registry);

        assert_eq!(added, 0);
        assert_eq!(registry.len(), 1);
    }
}
