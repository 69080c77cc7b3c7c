// templates.rs — Target syntax for abstract code fragments
//
// The generator never spells target-language syntax itself: every literal,
// statement, declaration and wrapper goes through the `Templates` trait.
// `CppTemplates` is the reference C++ rendering used by the CLI and tests;
// platform-specific template sets implement the same trait.
//
// Preconditions: names passed in are already valid target identifiers.
// Postconditions: every statement-producing method returns text ending in '\n'.
// Failure modes: none.
// Side effects: none.

use std::fmt::Write as _;

use crate::ast::{Literal, Operator, ValueType};

// ── Fragment descriptions ───────────────────────────────────────────────────

/// A function or constructor parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub ctype: String,
    pub name: String,
    pub by_ref: bool,
    /// Element count when the parameter is a fixed-size array.
    pub array_size: Option<usize>,
}

impl Param {
    pub fn value(ctype: impl Into<String>, name: impl Into<String>) -> Self {
        Param {
            ctype: ctype.into(),
            name: name.into(),
            by_ref: false,
            array_size: None,
        }
    }

    pub fn reference(ctype: impl Into<String>, name: impl Into<String>) -> Self {
        Param {
            ctype: ctype.into(),
            name: name.into(),
            by_ref: true,
            array_size: None,
        }
    }

    pub fn with_array_size(mut self, size: Option<usize>) -> Self {
        self.array_size = size;
        self
    }
}

/// A member or free function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub return_type: Option<String>,
    pub params: Vec<Param>,
    pub body: String,
}

/// A settable property member of a module struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMember {
    pub ctype: String,
    pub name: String,
    pub initial: String,
}

/// Everything needed to render one module struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStruct {
    pub type_name: String,
    /// Instance constants: outer-scope storage captured by reference.
    pub references: Vec<Param>,
    pub properties: Vec<PropertyMember>,
    /// Internal declarations and instances, already rendered.
    pub members: String,
    pub constructor_body: String,
    pub methods: Vec<FunctionDef>,
}

// ── Template trait ──────────────────────────────────────────────────────────

pub trait Templates {
    fn real_type(&self) -> &str;
    fn bool_type(&self) -> &str;
    fn string_type(&self) -> &str;
    fn counter_type(&self) -> &str;

    fn scalar_type(&self, t: ValueType) -> &str {
        match t {
            ValueType::Real => self.real_type(),
            ValueType::Bool => self.bool_type(),
            ValueType::String => self.string_type(),
        }
    }

    fn number(&self, n: f64) -> String;
    fn boolean(&self, b: bool) -> String;
    fn string(&self, s: &str) -> String;

    fn literal(&self, lit: &Literal) -> String {
        match lit {
            Literal::Number(n) => self.number(*n),
            Literal::Bool(b) => self.boolean(*b),
            Literal::Text(s) => self.string(s),
        }
    }

    /// Zero value of a scalar type, used when nothing supplies a default.
    fn zero(&self, t: ValueType) -> String {
        match t {
            ValueType::Real => self.number(0.0),
            ValueType::Bool => self.boolean(false),
            ValueType::String => self.string(""),
        }
    }

    fn assignment(&self, target: &str, value: &str) -> String;
    fn statement(&self, expr: &str) -> String;
    fn return_statement(&self, value: &str) -> String;

    fn variable_declaration(&self, ctype: &str, name: &str, initial: Option<&str>) -> String;
    fn bundle_declaration(&self, ctype: &str, name: &str, initial: &[String]) -> String;
    fn instance_declaration(&self, type_name: &str, name: &str, args: &[String]) -> String;

    fn binary_expression(&self, op: Operator, left: &str, right: &str) -> String;
    fn unary_expression(&self, op: Operator, operand: &str) -> String;
    fn bundle_index(&self, name: &str, index: usize) -> String;
    fn dynamic_bundle_index(&self, name: &str, index_expr: &str) -> String;

    fn call(&self, callee: &str, args: &[String]) -> String;
    fn member_call(&self, instance: &str, method: &str, args: &[String]) -> String;

    fn module_declaration(&self, decl: &ModuleStruct) -> String;
    fn function_definition(&self, def: &FunctionDef) -> String;
    /// Name of the setter generated for a module property.
    fn setter_name(&self, property: &str) -> String;

    fn conditional(&self, condition: &str, body: &str) -> String;
    fn while_not(&self, flag: &str, body: &str) -> String;

    /// `if (counter >= 1.0) { counter -= 1.0; body } counter += increment;`
    fn decimation_guard(&self, counter: &str, body: &str, increment: f64) -> String;
    /// `while (counter < 1.0) { body counter += increment; } counter -= 1.0;`
    fn interpolation_guard(&self, counter: &str, body: &str, increment: f64) -> String;

    /// Replace `%%name%%` placeholders in a platform snippet.
    fn substitute(&self, snippet: &str, bindings: &[(&str, &str)]) -> String {
        let mut out = snippet.to_string();
        for (key, value) in bindings {
            out = out.replace(&format!("%%{}%%", key), value);
        }
        out
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Indent every non-empty line of `code` by one level.
pub fn indent(code: &str) -> String {
    let mut out = String::with_capacity(code.len() + 16);
    for line in code.lines() {
        if line.is_empty() {
            out.push('\n');
        } else {
            out.push_str("    ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

// ── C++ reference rendering ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CppTemplates;

impl CppTemplates {
    pub fn new() -> Self {
        CppTemplates
    }

    fn params(&self, params: &[Param]) -> String {
        params
            .iter()
            .map(|p| self.param(p))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn param(&self, p: &Param) -> String {
        match (p.by_ref, p.array_size) {
            (true, Some(n)) => format!("{} (&{})[{}]", p.ctype, p.name, n),
            (false, Some(n)) => format!("{} {}[{}]", p.ctype, p.name, n),
            (true, None) => format!("{} &{}", p.ctype, p.name),
            (false, None) => format!("{} {}", p.ctype, p.name),
        }
    }

    fn operator_symbol(op: Operator) -> &'static str {
        match op {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Greater => ">",
            Operator::Lesser => "<",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::GreaterEqual => ">=",
            Operator::LesserEqual => "<=",
            Operator::UnaryMinus => "-",
            Operator::LogicalNot => "!",
        }
    }
}

impl Templates for CppTemplates {
    fn real_type(&self) -> &str {
        "float"
    }

    fn bool_type(&self) -> &str {
        "bool"
    }

    fn string_type(&self) -> &str {
        "std::string"
    }

    fn counter_type(&self) -> &str {
        "double"
    }

    fn number(&self, n: f64) -> String {
        format!("{:.8}", n)
    }

    fn boolean(&self, b: bool) -> String {
        if b { "true" } else { "false" }.to_string()
    }

    fn string(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('"');
        for c in s.chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                // Octal escapes stop after three digits, unlike `\x`.
                c if c.is_ascii_control() => {
                    let _ = write!(out, "\\{:03o}", c as u32);
                }
                c => out.push(c),
            }
        }
        out.push('"');
        out
    }

    fn assignment(&self, target: &str, value: &str) -> String {
        format!("{} = {};\n", target, value)
    }

    fn statement(&self, expr: &str) -> String {
        format!("{};\n", expr)
    }

    fn return_statement(&self, value: &str) -> String {
        format!("return {};\n", value)
    }

    fn variable_declaration(&self, ctype: &str, name: &str, initial: Option<&str>) -> String {
        match initial {
            Some(v) => format!("{} {} = {};\n", ctype, name, v),
            None => format!("{} {};\n", ctype, name),
        }
    }

    fn bundle_declaration(&self, ctype: &str, name: &str, initial: &[String]) -> String {
        format!(
            "{} {}[{}] = {{{}}};\n",
            ctype,
            name,
            initial.len(),
            initial.join(", ")
        )
    }

    fn instance_declaration(&self, type_name: &str, name: &str, args: &[String]) -> String {
        format!("{} {}{{{}}};\n", type_name, name, args.join(", "))
    }

    fn binary_expression(&self, op: Operator, left: &str, right: &str) -> String {
        format!("({} {} {})", left, Self::operator_symbol(op), right)
    }

    fn unary_expression(&self, op: Operator, operand: &str) -> String {
        format!("({}{})", Self::operator_symbol(op), operand)
    }

    fn bundle_index(&self, name: &str, index: usize) -> String {
        format!("{}[{}]", name, index)
    }

    fn dynamic_bundle_index(&self, name: &str, index_expr: &str) -> String {
        format!("{}[(int)({}) - 1]", name, index_expr)
    }

    fn call(&self, callee: &str, args: &[String]) -> String {
        format!("{}({})", callee, args.join(", "))
    }

    fn member_call(&self, instance: &str, method: &str, args: &[String]) -> String {
        format!("{}.{}({})", instance, method, args.join(", "))
    }

    fn module_declaration(&self, decl: &ModuleStruct) -> String {
        let mut body = String::new();
        for r in &decl.references {
            let _ = writeln!(body, "{};", self.param(r));
        }
        for p in &decl.properties {
            body.push_str(&self.variable_declaration(&p.ctype, &p.name, Some(&p.initial)));
        }
        body.push_str(&decl.members);

        let ctor_params: Vec<Param> = decl
            .references
            .iter()
            .map(|r| Param {
                name: format!("{}_", r.name),
                ..r.clone()
            })
            .collect();
        let _ = write!(body, "{}({})", decl.type_name, self.params(&ctor_params));
        if !decl.references.is_empty() {
            let inits: Vec<String> = decl
                .references
                .iter()
                .map(|r| format!("{}({}_)", r.name, r.name))
                .collect();
            let _ = write!(body, " : {}", inits.join(", "));
        }
        body.push_str(" {\n");
        body.push_str(&indent(&decl.constructor_body));
        body.push_str("}\n");

        for p in &decl.properties {
            let setter = FunctionDef {
                name: self.setter_name(&p.name),
                return_type: None,
                params: vec![Param::value(p.ctype.clone(), "value")],
                body: self.assignment(&p.name, "value"),
            };
            body.push_str(&self.function_definition(&setter));
        }
        for m in &decl.methods {
            body.push_str(&self.function_definition(m));
        }

        format!("struct {} {{\n{}}};\n", decl.type_name, indent(&body))
    }

    fn function_definition(&self, def: &FunctionDef) -> String {
        format!(
            "{} {}({}) {{\n{}}}\n",
            def.return_type.as_deref().unwrap_or("void"),
            def.name,
            self.params(&def.params),
            indent(&def.body)
        )
    }

    fn setter_name(&self, property: &str) -> String {
        format!("set_{}", property)
    }

    fn conditional(&self, condition: &str, body: &str) -> String {
        format!("if ({}) {{\n{}}}\n", condition, indent(body))
    }

    fn while_not(&self, flag: &str, body: &str) -> String {
        format!("while (!{}) {{\n{}}}\n", flag, indent(body))
    }

    fn decimation_guard(&self, counter: &str, body: &str, increment: f64) -> String {
        let mut inner = format!("{} -= 1.0;\n", counter);
        inner.push_str(body);
        format!(
            "if ({} >= 1.0) {{\n{}}}\n{} += {};\n",
            counter,
            indent(&inner),
            counter,
            self.number(increment)
        )
    }

    fn interpolation_guard(&self, counter: &str, body: &str, increment: f64) -> String {
        let mut inner = body.to_string();
        let _ = writeln!(inner, "{} += {};", counter, self.number(increment));
        format!(
            "while ({} < 1.0) {{\n{}}}\n{} -= 1.0;\n",
            counter,
            indent(&inner),
            counter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        let t = CppTemplates::new();
        assert_eq!(t.number(1.0), "1.00000000");
        assert_eq!(t.literal(&Literal::Bool(true)), "true");
        assert_eq!(t.literal(&Literal::Text("a\"b".into())), "\"a\\\"b\"");
        assert_eq!(t.zero(ValueType::Real), "0.00000000");
    }

    #[test]
    fn string_literals_use_cpp_escapes() {
        let t = CppTemplates::new();
        assert_eq!(t.string("a\\b"), "\"a\\\\b\"");
        assert_eq!(t.string("line\nnext\ttab"), "\"line\\nnext\\ttab\"");
        assert_eq!(t.string("bell\u{7}\u{1b}[0m"), "\"bell\\007\\033[0m\"");
        assert_eq!(t.string("caf\u{e9}"), "\"caf\u{e9}\"");
        assert!(!t.string("\u{1}").contains("\\u{"));
    }

    #[test]
    fn declarations() {
        let t = CppTemplates::new();
        assert_eq!(
            t.variable_declaration("float", "gain", Some("0.50000000")),
            "float gain = 0.50000000;\n"
        );
        assert_eq!(
            t.bundle_declaration("float", "buf", &["0".to_string(), "1".to_string()]),
            "float buf[2] = {0, 1};\n"
        );
        assert_eq!(
            t.instance_declaration("Gain_Module", "Gain_0", &["scale".to_string()]),
            "Gain_Module Gain_0{scale};\n"
        );
    }

    #[test]
    fn decimation_guard_shape() {
        let t = CppTemplates::new();
        let code = t.decimation_guard("rc", "out = x;\n", 0.5);
        assert_eq!(
            code,
            "if (rc >= 1.0) {\n    rc -= 1.0;\n    out = x;\n}\nrc += 0.50000000;\n"
        );
    }

    #[test]
    fn interpolation_guard_shape() {
        let t = CppTemplates::new();
        let code = t.interpolation_guard("rc", "out = x;\n", 0.5);
        assert_eq!(
            code,
            "while (rc < 1.0) {\n    out = x;\n    rc += 0.50000000;\n}\nrc -= 1.0;\n"
        );
    }

    #[test]
    fn module_struct_rendering() {
        let t = CppTemplates::new();
        let decl = ModuleStruct {
            type_name: "Gain_Module".into(),
            references: vec![Param::reference("float", "scale")],
            properties: vec![PropertyMember {
                ctype: "float".into(),
                name: "gain".into(),
                initial: "1.00000000".into(),
            }],
            members: "float Output = 0.00000000;\n".into(),
            constructor_body: String::new(),
            methods: vec![FunctionDef {
                name: "process".into(),
                return_type: Some("float".into()),
                params: vec![Param::value("float", "Input")],
                body: "Output = (Input * gain);\nreturn Output;\n".into(),
            }],
        };
        let code = t.module_declaration(&decl);
        assert!(code.starts_with("struct Gain_Module {\n    float &scale;\n"));
        assert!(code.contains("Gain_Module(float &scale_) : scale(scale_) {\n"));
        assert!(code.contains("void set_gain(float value) {\n        gain = value;\n    }\n"));
        assert!(code.contains("float process(float Input) {\n"));
        assert!(code.ends_with("};\n"));
    }

    #[test]
    fn substitute_placeholders() {
        let t = CppTemplates::new();
        assert_eq!(
            t.substitute("out(%%input%%, %%input%%);", &[("input", "x")]),
            "out(x, x);"
        );
    }

    #[test]
    fn indent_keeps_blank_lines() {
        assert_eq!(indent("a;\n\nb;\n"), "    a;\n\n    b;\n");
    }
}
