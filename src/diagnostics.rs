use std::fmt;

/// Whether parsing carried on after the problem was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A safe default was substituted and parsing continued.
    Warning,
    /// Parsing stopped at this line.
    Fatal,
}

/// A problem found in BVH input, tied to the line it was found on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-based line number in the source text
    pub line_number: usize,
    /// the trimmed source line
    pub line: String,
    pub message: String,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn warning(line_number: usize, line: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            line_number,
            line: line.to_string(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn fatal(line_number: usize, line: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            line_number,
            line: line.to_string(),
            message: message.into(),
            severity: Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.severity {
            Severity::Warning => "BVH parse problem",
            Severity::Fatal => "BVH parse failure",
        };
        write!(f, "{}: {} [line {}] {}", kind, self.message, self.line_number, self.line)
    }
}

/// True if any diagnostic halted parsing.
pub fn is_fatal(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_fatal)
}
