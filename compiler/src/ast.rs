// AST node types for stream program trees.
//
// The parser front-end serializes the checked program as a JSON array of
// externally tagged nodes (`{"block": {...}}`, `{"stream": {...}}`). These
// types mirror that layout one-to-one and are loaded with serde.
//
// Preconditions: the tree was produced by the front-end validator, so
//                defaults and types are already resolved.
// Postconditions: each node keeps its optional line/filename for diagnostics.
// Failure modes: malformed JSON or unknown member tags → `E0500` diagnostic.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::diag::{codes, Diagnostic, Location};

// ── Root ──

/// A complete program tree: an ordered sequence of top-level nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    pub nodes: Vec<Node>,
}

impl Program {
    /// The `system` node, if the program declares one.
    pub fn system(&self) -> Option<&SystemNode> {
        self.nodes.iter().find_map(|n| match n {
            Node::System(s) => Some(s),
            _ => None,
        })
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamNode> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Stream(s) => Some(s),
            _ => None,
        })
    }
}

/// Parse a program tree from its JSON text.
pub fn load_program(json: &str) -> Result<Program, Diagnostic> {
    serde_json::from_str(json).map_err(|e| {
        Diagnostic::error(
            codes::E0500,
            Location::new(None, Some(e.line() as u32)),
            format!("cannot load program tree: {}", e),
        )
    })
}

// ── Top-level nodes ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Stream(StreamNode),
    Block(Rc<Block>),
    BlockBundle(Rc<Block>),
    System(SystemNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamNode {
    pub members: Vec<Member>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl StreamNode {
    pub fn location(&self) -> Location {
        Location::new(self.filename.as_deref(), self.line)
    }
}

/// `use <platform> version x on <framework>` as recorded by the front-end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemNode {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub default_domain: Option<String>,
}

// ── Blocks ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockKind {
    Signal,
    Constant,
    Switch,
    Trigger,
    #[serde(rename = "signalbridge")]
    SignalBridge,
    Module,
    Reaction,
    Loop,
    PlatformType,
    Domain,
    #[serde(other)]
    Other,
}

impl BlockKind {
    /// Kinds that own runtime storage when referenced by name.
    pub fn is_storage(self) -> bool {
        matches!(
            self,
            BlockKind::Signal
                | BlockKind::Constant
                | BlockKind::Switch
                | BlockKind::Trigger
                | BlockKind::SignalBridge
        )
    }

    /// Kinds with an internal body generated through a nested scope.
    pub fn is_callable(self) -> bool {
        matches!(self, BlockKind::Module | BlockKind::Reaction | BlockKind::Loop)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockKind::Signal => "signal",
            BlockKind::Constant => "constant",
            BlockKind::Switch => "switch",
            BlockKind::Trigger => "trigger",
            BlockKind::SignalBridge => "signalbridge",
            BlockKind::Module => "module",
            BlockKind::Reaction => "reaction",
            BlockKind::Loop => "loop",
            BlockKind::PlatformType => "platformType",
            BlockKind::Domain => "domain",
            BlockKind::Other => "unknown",
        };
        f.write_str(s)
    }
}

/// Scalar storage class of a signal-like block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    Real,
    Bool,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
    Property,
}

/// A port of a module, reaction or loop, bound to one of its internal blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDecl {
    pub name: String,
    pub direction: PortDirection,
    /// Internal block the port is bound to; defaults to the port name.
    #[serde(default)]
    pub block: Option<String>,
    #[serde(default)]
    pub default: Option<Literal>,
}

impl PortDecl {
    pub fn block_name(&self) -> &str {
        self.block.as_deref().unwrap_or(&self.name)
    }
}

/// A declaration node: signals, constants, bundles, modules, reactions,
/// loops, platform types and domain definitions all share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub default: Option<Literal>,
    #[serde(default)]
    pub value: Option<Literal>,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub platform_type: Option<String>,

    // Signal bridges
    #[serde(default)]
    pub input_domain: Option<String>,
    #[serde(default)]
    pub output_domain: Option<String>,

    // Modules, reactions and loops
    #[serde(default)]
    pub ports: Vec<PortDecl>,
    #[serde(default)]
    pub blocks: Vec<Node>,
    #[serde(default)]
    pub streams: Vec<Node>,
    #[serde(default)]
    pub terminate_when: Option<String>,

    // Platform types
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub declarations: Vec<String>,
    #[serde(default)]
    pub initializations: Vec<String>,
    #[serde(default)]
    pub preprocessing: Vec<String>,
    #[serde(default)]
    pub postprocessing: Vec<String>,
    #[serde(default)]
    pub write: Option<String>,
    #[serde(default)]
    pub read: Option<String>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub include_dirs: Vec<String>,
    #[serde(default)]
    pub link_to: Vec<String>,
    #[serde(default)]
    pub link_dirs: Vec<String>,

    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl Block {
    /// A minimal block of the given kind; the remaining fields take their
    /// serde defaults. Used by tests and by synthesized declarations.
    pub fn new(name: impl Into<String>, kind: BlockKind) -> Self {
        Block {
            name: name.into(),
            kind,
            namespace: String::new(),
            domain: None,
            rate: None,
            default: None,
            value: None,
            size: None,
            value_type: None,
            platform_type: None,
            input_domain: None,
            output_domain: None,
            ports: Vec::new(),
            blocks: Vec::new(),
            streams: Vec::new(),
            terminate_when: None,
            type_name: None,
            declarations: Vec::new(),
            initializations: Vec::new(),
            preprocessing: Vec::new(),
            postprocessing: Vec::new(),
            write: None,
            read: None,
            includes: Vec::new(),
            include_dirs: Vec::new(),
            link_to: Vec::new(),
            link_dirs: Vec::new(),
            line: None,
            filename: None,
        }
    }

    pub fn location(&self) -> Location {
        Location::new(self.filename.as_deref(), self.line)
    }

    /// Explicit initial value: `default` wins over `value`.
    pub fn initial_value(&self) -> Option<&Literal> {
        self.default.as_ref().or(self.value.as_ref())
    }

    pub fn value_type(&self) -> ValueType {
        if let Some(t) = self.value_type {
            return t;
        }
        match self.kind {
            BlockKind::Switch | BlockKind::Trigger => ValueType::Bool,
            _ => match self.initial_value() {
                Some(Literal::Bool(_)) => ValueType::Bool,
                Some(Literal::Text(_)) => ValueType::String,
                _ => ValueType::Real,
            },
        }
    }

    pub fn main_input(&self) -> Option<&PortDecl> {
        self.ports
            .iter()
            .find(|p| p.direction == PortDirection::Input)
    }

    pub fn main_output(&self) -> Option<&PortDecl> {
        self.ports
            .iter()
            .find(|p| p.direction == PortDirection::Output)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PortDecl> {
        self.ports
            .iter()
            .filter(|p| p.direction == PortDirection::Property)
    }

    pub fn port(&self, name: &str) -> Option<&PortDecl> {
        self.ports.iter().find(|p| p.name == name)
    }
}

// ── Literals ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Literal {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            Literal::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Literal::Text(_) => None,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Literal::Bool(_) => ValueType::Bool,
            Literal::Number(_) => ValueType::Real,
            Literal::Text(_) => ValueType::String,
        }
    }
}

// ── Stream members ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Member {
    Name(NameRef),
    Bundle(BundleRef),
    Function(FunctionCall),
    Expression(Box<Expression>),
    Value(Literal),
    List(Vec<Member>),
    PortProperty(PortPropertyRef),
}

impl Member {
    pub fn location(&self) -> Location {
        match self {
            Member::Name(n) => Location::new(n.filename.as_deref(), n.line),
            Member::Bundle(b) => Location::new(b.filename.as_deref(), b.line),
            Member::Function(f) => Location::new(f.filename.as_deref(), f.line),
            Member::Expression(e) => Location::new(e.filename.as_deref(), e.line),
            Member::PortProperty(p) => Location::new(p.filename.as_deref(), p.line),
            Member::Value(_) | Member::List(_) => Location::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl NameRef {
    pub fn new(name: impl Into<String>) -> Self {
        NameRef {
            name: name.into(),
            line: None,
            filename: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRef {
    pub name: String,
    /// 1-based literal index, or any member evaluated at run time.
    pub index: Box<Member>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub ports: BTreeMap<String, Member>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Greater,
    Lesser,
    Equal,
    NotEqual,
    GreaterEqual,
    LesserEqual,
    UnaryMinus,
    LogicalNot,
}

impl Operator {
    pub fn is_unary(self) -> bool {
        matches!(self, Operator::UnaryMinus | Operator::LogicalNot)
    }

    pub fn is_boolean(self) -> bool {
        !matches!(
            self,
            Operator::Add
                | Operator::Subtract
                | Operator::Multiply
                | Operator::Divide
                | Operator::UnaryMinus
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    #[serde(rename = "type")]
    pub op: Operator,
    #[serde(default)]
    pub left: Option<Member>,
    #[serde(default)]
    pub right: Option<Member>,
    /// Operand of a unary operator.
    #[serde(default)]
    pub value: Option<Member>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortPropertyRef {
    pub portname: String,
    pub name: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_blocks_and_streams() {
        let program = load_program(
            r#"[
                {"system": {"platform": "Gamma", "defaultDomain": "AudioDomain"}},
                {"block": {"name": "gain", "type": "signal", "domain": "AudioDomain", "rate": 44100, "default": 0.5}},
                {"blockbundle": {"name": "buf", "type": "signal", "size": 4}},
                {"stream": {"members": [{"value": 1.0}, {"name": {"name": "gain", "line": 3}}], "line": 3}}
            ]"#,
        )
        .unwrap();

        assert_eq!(program.nodes.len(), 4);
        assert_eq!(
            program.system().unwrap().default_domain.as_deref(),
            Some("AudioDomain")
        );
        match &program.nodes[1] {
            Node::Block(b) => {
                assert_eq!(b.kind, BlockKind::Signal);
                assert_eq!(b.rate, Some(44100.0));
                assert_eq!(b.initial_value(), Some(&Literal::Number(0.5)));
            }
            other => panic!("expected block, got {:?}", other),
        }
        match &program.nodes[2] {
            Node::BlockBundle(b) => assert_eq!(b.size, Some(4)),
            other => panic!("expected bundle, got {:?}", other),
        }
        let stream = program.streams().next().unwrap();
        assert_eq!(stream.members[0], Member::Value(Literal::Number(1.0)));
        assert_eq!(stream.members[1].location().line, Some(3));
    }

    #[test]
    fn unknown_block_kind_maps_to_other() {
        let program =
            load_program(r#"[{"block": {"name": "x", "type": "_frameworkDescription"}}]"#).unwrap();
        match &program.nodes[0] {
            Node::Block(b) => assert_eq!(b.kind, BlockKind::Other),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn unknown_member_tag_is_load_error() {
        let err = load_program(r#"[{"stream": {"members": [{"lambda": {}}]}}]"#).unwrap_err();
        assert_eq!(err.code, Some(codes::E0500));
    }

    #[test]
    fn expression_and_function_members() {
        let program = load_program(
            r#"[{"stream": {"members": [
                {"expression": {"type": "Multiply", "left": {"name": {"name": "a"}}, "right": {"value": 2}}},
                {"function": {"name": "Gain", "ports": {"gain": {"value": 0.5}}}},
                {"bundle": {"name": "buf", "index": {"value": 2}}},
                {"portproperty": {"portname": "input", "name": "rate"}},
                {"list": [{"value": true}, {"value": "label"}]}
            ]}}]"#,
        )
        .unwrap();
        let stream = program.streams().next().unwrap();
        match &stream.members[0] {
            Member::Expression(e) => {
                assert_eq!(e.op, Operator::Multiply);
                assert!(!e.op.is_unary());
            }
            other => panic!("expected expression, got {:?}", other),
        }
        match &stream.members[1] {
            Member::Function(f) => assert!(f.ports.contains_key("gain")),
            other => panic!("expected function, got {:?}", other),
        }
        match &stream.members[4] {
            Member::List(items) => {
                assert_eq!(items[0], Member::Value(Literal::Bool(true)));
                assert_eq!(items[1], Member::Value(Literal::Text("label".into())));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn value_type_inference() {
        let mut b = Block::new("t", BlockKind::Trigger);
        assert_eq!(b.value_type(), ValueType::Bool);
        b.kind = BlockKind::Signal;
        b.default = Some(Literal::Text("hi".into()));
        assert_eq!(b.value_type(), ValueType::String);
        b.value_type = Some(ValueType::Real);
        assert_eq!(b.value_type(), ValueType::Real);
    }

    #[test]
    fn port_block_name_defaults_to_port_name() {
        let p = PortDecl {
            name: "input".into(),
            direction: PortDirection::Input,
            block: None,
            default: None,
        };
        assert_eq!(p.block_name(), "input");
    }
}
