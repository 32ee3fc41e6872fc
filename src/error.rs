use crate::lexer::lex::Span;
use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

/// Every way a compilation can fail. Any of them aborts the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("{span}: lexical error: {message}")]
    Lexical { span: Span, message: String },

    #[error("{span}: syntax error: {message}")]
    Syntax { span: Span, message: String },

    #[error("{}semantic error: {message}", located(.span))]
    Semantic { span: Option<Span>, message: String },

    #[error("codegen error: {message}")]
    CodegenResource { message: String },

    #[error("compilation cancelled")]
    Cancelled,
}

fn located(span: &Option<Span>) -> String {
    match span {
        Some(span) => format!("{}: ", span),
        None => String::new(),
    }
}

impl CompileError {
    pub fn lexical(span: &Span, message: impl Into<String>) -> Self {
        CompileError::Lexical {
            span: span.clone(),
            message: message.into(),
        }
    }

    pub fn syntax(span: &Span, message: impl Into<String>) -> Self {
        CompileError::Syntax {
            span: span.clone(),
            message: message.into(),
        }
    }

    pub fn semantic(span: Option<&Span>, message: impl Into<String>) -> Self {
        CompileError::Semantic {
            span: span.cloned(),
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        CompileError::CodegenResource {
            message: message.into(),
        }
    }

    pub fn span(&self) -> Option<&Span> {
        match self {
            CompileError::Lexical { span, .. } | CompileError::Syntax { span, .. } => Some(span),
            CompileError::Semantic { span, .. } => span.as_ref(),
            CompileError::CodegenResource { .. } | CompileError::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_one_based_position() {
        let span = Span::new("prog.mc", 3, 7);
        let err = CompileError::syntax(&span, "expected ';'");
        assert_eq!(err.to_string(), "prog.mc:3:7: syntax error: expected ';'");
    }

    #[test]
    fn semantic_errors_may_lack_a_position() {
        let err = CompileError::semantic(None, "undefined procedure 'foo'");
        assert_eq!(err.to_string(), "semantic error: undefined procedure 'foo'");
        assert!(err.span().is_none());
    }
}
