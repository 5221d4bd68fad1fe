use std::time::Duration;

/// A script that failed to lex or parse, or lacks an entry point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        CompileError {
            line,
            message: message.into(),
        }
    }
}

/// A failure while executing a compiled script against one input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("script runtime error: {message}")]
    Runtime { message: String },

    #[error("script exceeded its {budget} budget")]
    Timeout { budget: TimeoutBudget },

    #[error("script attempted to use host capability '{capability}'")]
    SecurityViolation { capability: String },
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime {
            message: message.into(),
        }
    }
}

/// Which execution budget a timed-out script exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutBudget {
    WallClock(Duration),
    Fuel(u64),
}

impl std::fmt::Display for TimeoutBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutBudget::WallClock(d) => write!(f, "{}ms wall-clock", d.as_millis()),
            TimeoutBudget::Fuel(n) => write!(f, "{} step", n),
        }
    }
}
