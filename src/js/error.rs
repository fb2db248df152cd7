use thiserror::Error;

/// Script exception details captured from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub name: String,
    pub message: String,
    pub source_id: String,
    pub line: u32,
}

impl ScriptError {
    /// Console text for an uncaught exception.
    pub fn console_text(&self) -> String {
        if self.name.is_empty() {
            format!("Uncaught {}", self.message)
        } else {
            format!("Uncaught {}: {}", self.name, self.message)
        }
    }

    pub fn is_syntax_error(&self) -> bool {
        self.name == "SyntaxError"
    }
}

/// Every way an evaluation can end without a value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Fault {
    #[error("compile error: {}", .0.console_text())]
    Compile(ScriptError),
    #[error("script exception: {}", .0.console_text())]
    Runtime(ScriptError),
    #[error("recursion limit of {depth} reached")]
    RecursionLimit { depth: usize },
    #[error("script engine out of memory")]
    OutOfMemory,
    #[error("no script context available")]
    ContextUnavailable,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create QuickJS runtime: {0}")]
    Runtime(#[source] rquickjs::Error),
    #[error("failed to create script realm: {0}")]
    Realm(#[source] rquickjs::Error),
    #[error("failed to bootstrap script realm: {0}")]
    Bootstrap(#[source] rquickjs::Error),
}

/// Unrecoverable engine-internal corruption. Logs and aborts the process.
pub fn fatal_engine_error(location: &str, message: &str) -> ! {
    tracing::error!(location, "fatal script engine error: {message}");
    std::process::abort()
}
