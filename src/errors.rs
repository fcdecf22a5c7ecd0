// Structured error types for the front end, compiler, and VM. Rendered with
// `colored` in the style of this repo's own error reporting: a bold kind
// header, a location arrow, and a source-line caret when source text is
// available. The core compiler/VM only produce these structured values;
// pretty-printing lives here at the boundary, never inside the dispatch loop.

use colored::Colorize;
use std::fmt;

use crate::lexer::Token;

fn location_of(token: &Option<Token>) -> String {
    match token {
        Some(t) => format!("{}:{}", t.line, t.column),
        None => "?:?".to_string(),
    }
}

fn render(kind: &str, message: &str, token: &Option<Token>, source: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}: {}\n", kind.red().bold(), message.bold()));
    out.push_str(&format!("{}\n", format!("  --> {}", location_of(token)).bright_blue()));
    if let (Some(src), Some(tok)) = (source, token) {
        if let Some(line) = src.lines().nth(tok.line.saturating_sub(1)) {
            out.push_str(&format!("   {}\n", "|".bright_blue()));
            out.push_str(&format!("{} {} {}\n", format!("{:3}", tok.line).bright_blue(), "|".bright_blue(), line));
            out.push_str(&format!(
                "   {} {}{}\n",
                "|".bright_blue(),
                " ".repeat(tok.column.saturating_sub(1)),
                "^".red().bold()
            ));
        }
    }
    out
}

/// Errors raised while parsing source text into an AST. Outside the core
/// compiler/VM ABI; exists only at the front-end boundary.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub token: Option<Token>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", render("Parse Error", &self.message, &self.token, None))
    }
}

impl std::error::Error for ParseError {}

/// Compile-time errors: raised synchronously, abort compilation. See spec §7.
#[derive(Debug, Clone)]
pub enum CompileError {
    UnsupportedOperator { op: String, token: Option<Token> },
    BreakOutsideLoop { token: Option<Token> },
    ContinueOutsideLoop { token: Option<Token> },
    UnpatchedJump { index: usize },
    UnsupportedNode { description: String, token: Option<Token> },
}

impl CompileError {
    fn kind_str(&self) -> &'static str {
        match self {
            CompileError::UnsupportedOperator { .. } => "unsupported operator",
            CompileError::BreakOutsideLoop { .. } => "'break' outside loop",
            CompileError::ContinueOutsideLoop { .. } => "'continue' outside loop",
            CompileError::UnpatchedJump { .. } => "internal: unpatched jump",
            CompileError::UnsupportedNode { .. } => "unsupported syntax",
        }
    }

    fn token(&self) -> Option<Token> {
        match self {
            CompileError::UnsupportedOperator { token, .. } => token.clone(),
            CompileError::BreakOutsideLoop { token } => token.clone(),
            CompileError::ContinueOutsideLoop { token } => token.clone(),
            CompileError::UnpatchedJump { .. } => None,
            CompileError::UnsupportedNode { token, .. } => token.clone(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let message = match self {
            CompileError::UnsupportedOperator { op, .. } => format!("operator '{}' is not supported here", op),
            CompileError::BreakOutsideLoop { .. } => "'break' used outside of a loop".to_string(),
            CompileError::ContinueOutsideLoop { .. } => "'continue' used outside of a loop".to_string(),
            CompileError::UnpatchedJump { index } => format!("jump at instruction {} was never patched", index),
            CompileError::UnsupportedNode { description, .. } => format!("compiler cannot lower: {}", description),
        };
        write!(f, "{}", render(&format!("Compile Error ({})", self.kind_str()), &message, &self.token(), None))
    }
}

impl std::error::Error for CompileError {}

/// Runtime errors, returned as a structured `Err`, never thrown through host
/// unwinding (except that host-native calls are caught and wrapped). See
/// spec §7 for the kind catalogue.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    StackUnderflow,
    UndefinedVariable { name: String, token: Option<Token>, candidates: Vec<String> },
    AssignToConst { name: String, token: Option<Token> },
    AssignToUndefined { name: String, token: Option<Token> },
    TypeError { message: String, token: Option<Token> },
    DivisionByZero { token: Option<Token> },
    ModuloByZero { token: Option<Token> },
    NotIterable { token: Option<Token> },
    NotAnIterator { token: Option<Token> },
    BadIndex { message: String, token: Option<Token> },
    AttributeLookupFailure { attr: String, token: Option<Token> },
    WrongArity { expected: i64, got: usize, token: Option<Token> },
    NotCallable { token: Option<Token> },
    UnknownOpcode,
    Io(String),
}

impl RuntimeError {
    fn token(&self) -> Option<Token> {
        match self {
            RuntimeError::StackUnderflow | RuntimeError::UnknownOpcode | RuntimeError::Io(_) => None,
            RuntimeError::UndefinedVariable { token, .. }
            | RuntimeError::AssignToConst { token, .. }
            | RuntimeError::AssignToUndefined { token, .. }
            | RuntimeError::TypeError { token, .. }
            | RuntimeError::DivisionByZero { token }
            | RuntimeError::ModuloByZero { token }
            | RuntimeError::NotIterable { token }
            | RuntimeError::NotAnIterator { token }
            | RuntimeError::BadIndex { token, .. }
            | RuntimeError::AttributeLookupFailure { token, .. }
            | RuntimeError::WrongArity { token, .. }
            | RuntimeError::NotCallable { token } => token.clone(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let message = match self {
            RuntimeError::StackUnderflow => "operand stack underflow (internal)".to_string(),
            RuntimeError::UndefinedVariable { name, candidates, .. } => {
                match crate::errors::find_closest_match(name, candidates) {
                    Some(close) => format!("undefined variable '{}' (did you mean '{}'?)", name, close),
                    None => format!("undefined variable '{}'", name),
                }
            }
            RuntimeError::AssignToConst { name, .. } => format!("cannot assign to const '{}'", name),
            RuntimeError::AssignToUndefined { name, .. } => format!("cannot assign to undefined variable '{}'", name),
            RuntimeError::TypeError { message, .. } => message.clone(),
            RuntimeError::DivisionByZero { .. } => "division by zero".to_string(),
            RuntimeError::ModuloByZero { .. } => "modulo by zero".to_string(),
            RuntimeError::NotIterable { .. } => "value is not iterable".to_string(),
            RuntimeError::NotAnIterator { .. } => "value is not an iterator".to_string(),
            RuntimeError::BadIndex { message, .. } => message.clone(),
            RuntimeError::AttributeLookupFailure { attr, .. } => format!("no attribute '{}'", attr),
            RuntimeError::WrongArity { expected, got, .. } => format!("expected {} argument(s), got {}", expected, got),
            RuntimeError::NotCallable { .. } => "value is not callable".to_string(),
            RuntimeError::UnknownOpcode => "unknown opcode (internal)".to_string(),
            RuntimeError::Io(e) => format!("I/O error: {}", e),
        };
        write!(f, "{}", render("Runtime Error", &message, &self.token(), None))
    }
}

impl std::error::Error for RuntimeError {}

/// Computes the Levenshtein distance between two strings, used for
/// "did you mean?" suggestions on undefined-name errors.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();
    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }
    let mut matrix = vec![vec![0usize; len2 + 1]; len1 + 1];
    for (i, row) in matrix.iter_mut().enumerate().take(len1 + 1) {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            matrix[i][j] = std::cmp::min(
                std::cmp::min(matrix[i - 1][j] + 1, matrix[i][j - 1] + 1),
                matrix[i - 1][j - 1] + cost,
            );
        }
    }
    matrix[len1][len2]
}

pub fn find_closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best_match = None;
    let mut best_distance = usize::MAX;
    for candidate in candidates {
        let distance = levenshtein_distance(target, candidate);
        if distance <= 3 && distance < best_distance {
            best_distance = distance;
            best_match = Some(candidate.as_str());
        }
    }
    best_match
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_basic() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn closest_match_within_threshold() {
        let candidates = vec!["length".to_string(), "height".to_string()];
        assert_eq!(find_closest_match("lenght", &candidates), Some("length"));
    }
}
