// scope.rs — Lexical scope stack and declaration resolution
//
// Each module/reaction/loop body pushes a private scope holding its internal
// blocks, paired with a parent frame describing the call site's port
// bindings. Names resolve innermost scope first, then against the program
// root; the scope depth where the name was found becomes its stack index.
//
// Preconditions: the root node list is the complete program tree.
// Postconditions: push/pop are strictly paired by the generator.
// Failure modes: unknown names → `E0100`; pop on an empty stack → `E0201`.
// Side effects: none.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ast::{Block, BlockKind, Node};
use crate::diag::{codes, Diagnostic, Location};

// ── Entries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub block: Rc<Block>,
    /// Declared as a `blockbundle` node.
    pub bundle: bool,
}

/// A resolved name: the declaring block and the depth it was found at.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub block: Rc<Block>,
    pub bundle: bool,
    pub stack_index: usize,
}

impl Resolved {
    pub fn bundle_size(&self) -> Option<usize> {
        if self.bundle {
            Some(self.block.size.unwrap_or(1))
        } else {
            self.block.size
        }
    }
}

pub fn entries_of(nodes: &[Node]) -> Vec<ScopeEntry> {
    nodes
        .iter()
        .filter_map(|n| match n {
            Node::Block(b) => Some(ScopeEntry {
                block: Rc::clone(b),
                bundle: false,
            }),
            Node::BlockBundle(b) => Some(ScopeEntry {
                block: Rc::clone(b),
                bundle: true,
            }),
            Node::Stream(_) | Node::System(_) => None,
        })
        .collect()
}

// ── Parent frames ───────────────────────────────────────────────────────────

/// A resolved port property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

/// What a call site binds to one port of the callee.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortBinding {
    pub rate: Option<f64>,
    pub size: Option<usize>,
    pub domain: Option<String>,
}

impl PortBinding {
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "rate" => self.rate.filter(|r| *r > 0.0).map(PropertyValue::Number),
            "size" => self.size.map(|s| PropertyValue::Number(s as f64)),
            "domain" => self.domain.clone().map(PropertyValue::Text),
            _ => None,
        }
    }
}

/// The call site a private scope was opened for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParentFrame {
    pub callee: String,
    pub ports: BTreeMap<String, PortBinding>,
}

#[derive(Debug, Clone)]
struct Scope {
    entries: Vec<ScopeEntry>,
    parent: Option<ParentFrame>,
}

// ── Scope stack ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ScopeStack {
    root: Vec<ScopeEntry>,
    scopes: Vec<Scope>,
    /// Accepted non-empty namespaces (active platform and framework).
    namespaces: Vec<String>,
}

impl ScopeStack {
    pub fn new(root: &[Node], namespaces: Vec<String>) -> Self {
        ScopeStack {
            root: entries_of(root),
            scopes: Vec::new(),
            namespaces,
        }
    }

    pub fn push_scope(&mut self, nodes: &[Node], parent: Option<ParentFrame>) {
        self.scopes.push(Scope {
            entries: entries_of(nodes),
            parent,
        });
        log::debug!("push scope (depth {})", self.depth());
    }

    pub fn pop_scope(&mut self) -> Result<(), Diagnostic> {
        match self.scopes.pop() {
            Some(_) => Ok(()),
            None => Err(Diagnostic::error(
                codes::E0201,
                Location::default(),
                "scope stack underflow: pop without matching push",
            )),
        }
    }

    /// Number of open scopes.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Stack index of the innermost open scope.
    pub fn depth(&self) -> usize {
        self.scopes.len().saturating_sub(1)
    }

    fn namespace_matches(&self, block: &Block) -> bool {
        block.namespace.is_empty() || self.namespaces.iter().any(|n| *n == block.namespace)
    }

    /// Innermost visible declaration of `name`.
    pub fn find_declaration(&self, name: &str) -> Option<Resolved> {
        for (index, scope) in self.scopes.iter().enumerate().rev() {
            if let Some(entry) = scope
                .entries
                .iter()
                .find(|e| e.block.name == name && self.namespace_matches(&e.block))
            {
                return Some(Resolved {
                    block: Rc::clone(&entry.block),
                    bundle: entry.bundle,
                    stack_index: index,
                });
            }
        }
        self.root
            .iter()
            .find(|e| e.block.name == name && self.namespace_matches(&e.block))
            .map(|entry| Resolved {
                block: Rc::clone(&entry.block),
                bundle: entry.bundle,
                stack_index: 0,
            })
    }

    pub fn resolve(&self, name: &str, location: &Location) -> Result<Resolved, Diagnostic> {
        self.find_declaration(name).ok_or_else(|| {
            Diagnostic::error(
                codes::E0100,
                location.clone(),
                format!("no declaration found for '{}'", name),
            )
            .with_hint("the front-end validator should have rejected this reference")
        })
    }

    /// Default rate of a domain, from its `domain` block.
    pub fn domain_rate(&self, domain: &str) -> Option<f64> {
        self.find_declaration(domain)
            .filter(|r| r.block.kind == BlockKind::Domain)
            .and_then(|r| r.block.rate)
            .filter(|r| *r > 0.0)
    }

    /// Resolve `port.property` by walking call-site frames outward. The
    /// first frame binding that port with a known value wins.
    pub fn find_port_property(&self, port: &str, property: &str) -> Option<PropertyValue> {
        self.scopes
            .iter()
            .rev()
            .filter_map(|s| s.parent.as_ref())
            .find_map(|frame| frame.ports.get(port).and_then(|b| b.property(property)))
    }

    /// Name of the innermost callee, if generating inside a body.
    pub fn current_callee(&self) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.parent.as_ref())
            .map(|f| f.callee.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(name: &str, kind: BlockKind) -> Node {
        Node::Block(Rc::new(Block::new(name, kind)))
    }

    fn namespaced(name: &str, ns: &str) -> Node {
        let mut b = Block::new(name, BlockKind::Signal);
        b.namespace = ns.into();
        Node::Block(Rc::new(b))
    }

    #[test]
    fn root_fallback_has_index_zero() {
        let root = vec![block("gain", BlockKind::Signal)];
        let mut stack = ScopeStack::new(&root, vec![]);
        stack.push_scope(&[], None);
        stack.push_scope(&[block("Input", BlockKind::Signal)], None);
        let r = stack.find_declaration("gain").unwrap();
        assert_eq!(r.stack_index, 0);
        let r = stack.find_declaration("Input").unwrap();
        assert_eq!(r.stack_index, 1);
    }

    #[test]
    fn nearest_scope_shadows() {
        let root = vec![block("x", BlockKind::Signal)];
        let mut stack = ScopeStack::new(&root, vec![]);
        stack.push_scope(&root, None);
        stack.push_scope(&[block("x", BlockKind::Constant)], None);
        let r = stack.find_declaration("x").unwrap();
        assert_eq!(r.stack_index, 1);
        assert_eq!(r.block.kind, BlockKind::Constant);
        stack.pop_scope().unwrap();
        let r = stack.find_declaration("x").unwrap();
        assert_eq!(r.block.kind, BlockKind::Signal);
    }

    #[test]
    fn namespace_filter() {
        let root = vec![namespaced("Out", "Arduino"), namespaced("Out", "Gamma")];
        let stack = ScopeStack::new(&root, vec!["Gamma".into()]);
        let r = stack.find_declaration("Out").unwrap();
        assert_eq!(r.block.namespace, "Gamma");

        let none = ScopeStack::new(&root, vec!["Daisy".into()]);
        assert!(none.find_declaration("Out").is_none());
    }

    #[test]
    fn unresolved_name_is_fatal() {
        let stack = ScopeStack::new(&[], vec![]);
        let err = stack.resolve("nope", &Location::default()).unwrap_err();
        assert_eq!(err.code, Some(codes::E0100));
    }

    #[test]
    fn pop_without_push_fails() {
        let mut stack = ScopeStack::new(&[], vec![]);
        assert!(stack.pop_scope().is_err());
        stack.push_scope(&[], None);
        assert!(stack.pop_scope().is_ok());
        assert!(stack.is_empty());
    }

    #[test]
    fn bundles_report_size() {
        let mut b = Block::new("buf", BlockKind::Signal);
        b.size = Some(8);
        let root = vec![Node::BlockBundle(Rc::new(b))];
        let stack = ScopeStack::new(&root, vec![]);
        let r = stack.find_declaration("buf").unwrap();
        assert!(r.bundle);
        assert_eq!(r.bundle_size(), Some(8));
    }

    #[test]
    fn domain_rate_lookup() {
        let mut d = Block::new("AudioDomain", BlockKind::Domain);
        d.rate = Some(48000.0);
        let root = vec![Node::Block(Rc::new(d)), block("Other", BlockKind::Signal)];
        let stack = ScopeStack::new(&root, vec![]);
        assert_eq!(stack.domain_rate("AudioDomain"), Some(48000.0));
        assert_eq!(stack.domain_rate("Other"), None);
        assert_eq!(stack.domain_rate("Missing"), None);
    }

    #[test]
    fn port_property_walks_outward() {
        let mut stack = ScopeStack::new(&[], vec![]);
        let mut outer = ParentFrame {
            callee: "Outer".into(),
            ..Default::default()
        };
        outer.ports.insert(
            "input".into(),
            PortBinding {
                rate: Some(22050.0),
                size: Some(2),
                domain: None,
            },
        );
        let mut inner = ParentFrame {
            callee: "Inner".into(),
            ..Default::default()
        };
        inner.ports.insert(
            "input".into(),
            PortBinding {
                rate: None,
                size: Some(4),
                domain: Some("Audio".into()),
            },
        );
        stack.push_scope(&[], Some(outer));
        stack.push_scope(&[], Some(inner));

        assert_eq!(
            stack.find_port_property("input", "size"),
            Some(PropertyValue::Number(4.0))
        );
        // Inner binding has no rate: the outer frame answers.
        assert_eq!(
            stack.find_port_property("input", "rate"),
            Some(PropertyValue::Number(22050.0))
        );
        assert_eq!(
            stack.find_port_property("input", "domain"),
            Some(PropertyValue::Text("Audio".into()))
        );
        assert_eq!(stack.find_port_property("output", "rate"), None);
        assert_eq!(stack.current_callee(), Some("Inner"));
    }
}
