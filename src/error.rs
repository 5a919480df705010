use crate::lexer::{Token, TokenKind};
use crate::span::Span;
use thiserror::Error;

/// A grammar violation detected by one parse rule.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {}] Error at {}: {message}", .span.line, location(.lexeme))]
pub struct SyntaxError {
    pub span: Span,
    /// Offending token text, `None` when the parser ran into end of input.
    pub lexeme: Option<String>,
    pub message: String,
}

impl SyntaxError {
    pub fn at(token: &Token, message: impl Into<String>) -> Self {
        let lexeme = match token.kind {
            TokenKind::Eof => None,
            _ => Some(token.text().to_string()),
        };
        SyntaxError {
            span: token.span,
            lexeme,
            message: message.into(),
        }
    }
}

fn location(lexeme: &Option<String>) -> String {
    match lexeme {
        Some(lexeme) => format!("'{lexeme}'"),
        None => "end".to_string(),
    }
}

/// A scoping rule violation found by the semantic analyzer.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {}:{}] Semantic Error: {message}", .span.line, .span.column)]
pub struct SemanticError {
    pub span: Span,
    pub message: String,
}

/// Error sink threaded through semantic analysis. Nothing is raised; the
/// caller inspects the sink once the walk is done.
#[derive(Debug, Default)]
pub struct ErrorHandler {
    errors: Vec<SemanticError>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, span: Span, message: impl Into<String>) {
        let error = SemanticError {
            span,
            message: message.into(),
        };
        tracing::warn!(line = span.line, column = span.column, message = %error.message, "semantic error");
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[SemanticError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<SemanticError> {
        self.errors
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("parsing failed with {} error(s)", .0.len())]
    Syntax(Vec<SyntaxError>),
    #[error("semantic analysis failed with {} error(s)", .0.len())]
    Semantic(Vec<SemanticError>),
}

impl CompileError {
    /// Render every diagnostic with the offending source line and a caret.
    pub fn display(&self, src: &str) -> String {
        let mut result = format!("Error: {self}");
        match self {
            CompileError::Syntax(errors) => {
                for err in errors {
                    result.push('\n');
                    result.push_str(&snippet(src, &err.to_string(), err.span));
                }
            }
            CompileError::Semantic(errors) => {
                for err in errors {
                    result.push('\n');
                    result.push_str(&snippet(src, &err.to_string(), err.span));
                }
            }
        }
        result
    }
}

fn snippet(src: &str, message: &str, span: Span) -> String {
    let mut result = message.to_string();
    let Some(line) = src.lines().nth(span.line.saturating_sub(1)) else {
        return result;
    };
    result.push_str(&format!("\n --> line {}, col {}", span.line, span.column));
    result.push_str("\n   |\n");
    result.push_str(&format!("{:>2} | {}\n", span.line, line));
    result.push_str(&format!("   | {}^", " ".repeat(span.column.saturating_sub(1))));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_names_the_lexeme() {
        let token = Token::new(TokenKind::Assign, None, Span::new(3, 7));
        let err = SyntaxError::at(&token, "Invalid assignment target.");
        assert_eq!(
            err.to_string(),
            "[line 3] Error at '=': Invalid assignment target."
        );
    }

    #[test]
    fn syntax_error_at_end_of_input() {
        let token = Token::new(TokenKind::Eof, None, Span::new(1, 9));
        let err = SyntaxError::at(&token, "Expect ';' after value.");
        assert_eq!(err.to_string(), "[line 1] Error at end: Expect ';' after value.");
    }

    #[test]
    fn handler_accumulates() {
        let mut handler = ErrorHandler::new();
        assert!(!handler.has_errors());
        handler.report(Span::new(1, 1), "first");
        handler.report(Span::new(2, 4), "second");
        assert!(handler.has_errors());
        assert_eq!(handler.errors().len(), 2);
        assert_eq!(
            handler.errors()[1].to_string(),
            "[line 2:4] Semantic Error: second"
        );
    }

    #[test]
    fn display_points_at_column() {
        let src = "var a = 1;\nprint b;";
        let err = CompileError::Semantic(vec![SemanticError {
            span: Span::new(2, 7),
            message: "Undefined variable 'b'.".to_string(),
        }]);
        let text = err.display(src);
        assert!(text.starts_with("Error: semantic analysis failed with 1 error(s)"));
        assert!(text.contains(" 2 | print b;"));
        assert!(text.ends_with("   |       ^"));
    }
}
