// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by every generation phase.
// Fatal conditions travel as `Err(Diagnostic)` through `?`; recoverable ones
// (domain mismatches) are collected on the generator and reported at the end.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0300`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // Resolution (E01xx)
    /// Referenced name has no visible declaration.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// A port property could not be resolved through any enclosing call site.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// A block references a platform type that does not exist.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// A module/reaction/loop names a port block that is not declared inside it.
    pub const E0103: DiagCode = DiagCode("E0103");

    // Structural (E02xx)
    /// Declaration dependencies form a cycle.
    pub const E0200: DiagCode = DiagCode("E0200");
    /// Scope push/pop imbalance.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// Bundle index out of range.
    pub const E0202: DiagCode = DiagCode("E0202");

    // Domain consistency (W03xx)
    /// Expression operands live in different domains.
    pub const W0300: DiagCode = DiagCode("W0300");
    /// Module/reaction body spans more domains than its call can reach.
    pub const W0301: DiagCode = DiagCode("W0301");
    /// Template token left unsubstituted.
    pub const W0302: DiagCode = DiagCode("W0302");
    /// Stream tokens cross a domain boundary without a signal bridge.
    pub const W0303: DiagCode = DiagCode("W0303");

    // Unsupported constructs (E04xx)
    /// Block kind cannot appear at this stream position.
    pub const E0400: DiagCode = DiagCode("E0400");
    /// Operator used with the wrong arity.
    pub const E0401: DiagCode = DiagCode("E0401");

    // Input (E05xx)
    /// The program tree could not be loaded.
    pub const E0500: DiagCode = DiagCode("E0500");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Source location ──────────────────────────────────────────────────────

/// Where in the original source a construct came from. The parser records
/// line numbers and file names on tree nodes; either may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub filename: Option<String>,
    pub line: Option<u32>,
}

impl Location {
    pub fn new(filename: Option<&str>, line: Option<u32>) -> Self {
        Location {
            filename: filename.map(str::to_string),
            line,
        }
    }

    pub fn is_known(&self) -> bool {
        self.filename.is_some() || self.line.is_some()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.filename, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}", file, line),
            (Some(file), None) => write!(f, "{}", file),
            (None, Some(line)) => write!(f, "line {}", line),
            (None, None) => write!(f, "<unknown>"),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any generation phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related names.
    pub fn new(level: DiagLevel, location: Location, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn error(code: DiagCode, location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, location, message).with_code(code)
    }

    pub fn warning(code: DiagCode, location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, location, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach the name of a related node (e.g. members of a cycle).
    pub fn with_related(mut self, name: impl Into<String>) -> Self {
        self.related.push(name.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if self.location.is_known() {
            write!(f, "\n  at {}", self.location)?;
        }
        if !self.related.is_empty() {
            write!(f, "\n  involving: {}", self.related.join(", "))?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, Location::default(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_location() {
        let d = Diagnostic::warning(
            codes::W0300,
            Location::new(Some("synth.stride"), Some(12)),
            "domain mismatch",
        );
        assert_eq!(
            format!("{d}"),
            "warning[W0300]: domain mismatch\n  at synth.stride:12"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(codes::E0200, Location::default(), "not a DAG")
            .with_hint("break the dependency between the two declarations")
            .with_related("A")
            .with_related("B");

        assert_eq!(d.code, Some(codes::E0200));
        assert!(d.is_error());
        assert_eq!(d.related, vec!["A".to_string(), "B".to_string()]);
        assert!(format!("{d}").contains("involving: A, B"));
    }

    #[test]
    fn location_display_variants() {
        assert_eq!(Location::new(None, Some(4)).to_string(), "line 4");
        assert_eq!(Location::new(Some("a.stride"), None).to_string(), "a.stride");
        assert_eq!(Location::default().to_string(), "<unknown>");
    }
}
