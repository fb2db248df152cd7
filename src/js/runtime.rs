use std::fmt;

use rquickjs::function::{Constructor, Rest};
use rquickjs::{Context, Ctx, Error as JsError, Function, IntoJs, Object, Runtime, Value};

use crate::config::ProxyConfig;
use crate::js::error::{EngineError, ScriptError};

/// QuickJS runtime shared by every realm of one proxy.
///
/// Each execution context gets its own realm from [`QuickJsEngine::new_realm`],
/// with a `console` that forwards to `tracing`.
pub struct QuickJsEngine {
    runtime: Runtime,
    max_pending_jobs: usize,
}

impl QuickJsEngine {
    pub fn new(config: &ProxyConfig) -> Result<Self, EngineError> {
        let runtime = Runtime::new().map_err(EngineError::Runtime)?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        Ok(Self {
            runtime,
            max_pending_jobs: config.max_pending_jobs,
        })
    }

    /// A fresh realm with the console bootstrap installed.
    pub fn new_realm(&self) -> Result<Context, EngineError> {
        let context = Context::full(&self.runtime).map_err(EngineError::Realm)?;
        context
            .with(|ctx| {
                let global = ctx.globals();
                let log_fn = Function::new(ctx.clone(), log_from_js)?.with_name("__proxy_log")?;
                global.set("__proxy_log", log_fn)?;
                ctx.eval::<(), _>(CONSOLE_BOOTSTRAP.as_bytes())
            })
            .map_err(EngineError::Bootstrap)?;
        Ok(context)
    }

    /// Runs queued promise jobs. Must not be called while a realm is entered.
    pub fn execute_pending_jobs(&self) {
        let mut job_count = 0;

        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    job_count += 1;
                    if job_count >= self.max_pending_jobs {
                        tracing::warn!(
                            target: "quickjs",
                            "Stopped processing jobs after {} iterations (possible infinite loop)",
                            self.max_pending_jobs
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(
                        target: "quickjs",
                        "Job execution error: {:?}",
                        job_exception
                    );
                    break;
                }
            }
        }

        if job_count > 0 {
            tracing::debug!(target: "quickjs", "Executed {} pending jobs", job_count);
        }
    }

    /// Must not be called while a realm is entered.
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }
}

/// Evaluates `source` as-is. Line offsets are applied when an exception is
/// captured, see [`capture_script_error`].
pub fn eval_in<'js>(ctx: &Ctx<'js>, source: &str, filename: &str) -> rquickjs::Result<Value<'js>> {
    ctx.eval::<Value, _>(with_source_url(source, filename))
}

fn with_source_url(source: &str, filename: &str) -> Vec<u8> {
    let mut script = String::with_capacity(source.len() + filename.len() + 18);
    script.push_str(source);
    if !filename.is_empty() {
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
    }
    script.into_bytes()
}

/// Document line for a 1-based engine line of a script starting at `start_line`.
pub fn document_line(start_line: u32, engine_line: u32) -> u32 {
    start_line
        .saturating_sub(1)
        .saturating_add(engine_line.max(1))
}

/// Takes the pending exception off `ctx` and describes it. Engine lines are
/// shifted so the script's first line is `start_line`.
pub fn capture_script_error(ctx: &Ctx<'_>, source_id: &str, start_line: u32) -> ScriptError {
    let exception: Value = ctx.catch();

    if let Some(obj) = exception.as_object() {
        let name = obj
            .get::<_, Option<String>>("name")
            .ok()
            .flatten()
            .unwrap_or_default();
        let message = obj
            .get::<_, Option<String>>("message")
            .ok()
            .flatten()
            .unwrap_or_default();
        let line = obj
            .get::<_, Option<f64>>("lineNumber")
            .ok()
            .flatten()
            .filter(|line| *line >= 1.0)
            .map(|line| line as u32)
            .or_else(|| {
                obj.get::<_, Option<String>>("stack")
                    .ok()
                    .flatten()
                    .and_then(|stack| line_from_stack(&stack))
            })
            .map(|line| document_line(start_line, line))
            .unwrap_or(start_line);
        return ScriptError {
            name,
            message,
            source_id: source_id.to_string(),
            line,
        };
    }

    let message = match exception.as_string() {
        Some(text) => text.to_string().unwrap_or_default(),
        None => format!("{:?}", exception),
    };
    ScriptError {
        name: String::new(),
        message,
        source_id: source_id.to_string(),
        line: start_line,
    }
}

/// Line of the first frame in a QuickJS stack trace (`at f (file:line[:col])`).
/// Line of the innermost stack frame that has one. Native frames are skipped.
pub fn line_from_stack(stack: &str) -> Option<u32> {
    stack
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("at "))
        .find_map(frame_line)
}

fn frame_line(frame: &str) -> Option<u32> {
    let location = match (frame.rfind('('), frame.rfind(')')) {
        (Some(open), Some(close)) if open < close => &frame[open + 1..close],
        _ => frame.trim_start_matches("at ").trim(),
    };
    let numbers: Vec<u32> = location
        .rsplit(':')
        .map_while(|part| part.parse::<u32>().ok())
        .collect();
    match numbers.as_slice() {
        [_column, line, ..] => Some(*line),
        [line] => Some(*line),
        [] => None,
    }
}

/// Engine line of the script currently calling into native code.
pub fn current_script_line(ctx: &Ctx<'_>) -> Option<u32> {
    let constructor: Constructor = ctx.globals().get("Error").ok()?;
    let marker: Object = constructor.construct(("",)).ok()?;
    let stack: String = marker.get("stack").ok()?;
    line_from_stack(&stack)
}

pub fn is_out_of_memory(error: &JsError) -> bool {
    matches!(error, JsError::Allocation)
}

pub fn is_out_of_memory_exception(error: &ScriptError) -> bool {
    error.message.contains("out of memory")
}

/// A script value that can cross realms.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Objects and arrays, as their JSON form.
    Json(serde_json::Value),
    Function,
}

impl ScriptValue {
    pub fn from_js<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<Self> {
        if value.is_undefined() {
            return Ok(ScriptValue::Undefined);
        }
        if value.is_null() {
            return Ok(ScriptValue::Null);
        }
        if let Some(flag) = value.as_bool() {
            return Ok(ScriptValue::Bool(flag));
        }
        if let Some(number) = value.as_number() {
            return Ok(ScriptValue::Number(number));
        }
        if let Some(text) = value.as_string() {
            return Ok(ScriptValue::String(text.to_string()?));
        }
        if value.is_function() {
            return Ok(ScriptValue::Function);
        }
        let json = match ctx.json_stringify(value)? {
            Some(text) => text.to_string()?,
            None => return Ok(ScriptValue::Undefined),
        };
        Ok(serde_json::from_str(&json)
            .map(ScriptValue::Json)
            .unwrap_or(ScriptValue::Undefined))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(text) => Some(text),
            _ => None,
        }
    }
}

impl<'js> IntoJs<'js> for ScriptValue {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        match self {
            ScriptValue::Undefined | ScriptValue::Function => Ok(Value::new_undefined(ctx.clone())),
            ScriptValue::Null => Ok(Value::new_null(ctx.clone())),
            ScriptValue::Bool(flag) => flag.into_js(ctx),
            ScriptValue::Number(number) => number.into_js(ctx),
            ScriptValue::String(text) => text.into_js(ctx),
            ScriptValue::Json(json) => ctx.json_parse(json.to_string()),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Undefined => f.write_str("undefined"),
            ScriptValue::Null => f.write_str("null"),
            ScriptValue::Bool(flag) => write!(f, "{flag}"),
            ScriptValue::Number(number) => write!(f, "{number}"),
            ScriptValue::String(text) => f.write_str(text),
            ScriptValue::Json(json) => write!(f, "{json}"),
            ScriptValue::Function => f.write_str("function"),
        }
    }
}

pub fn to_js_args<'js>(ctx: &Ctx<'js>, args: &[ScriptValue]) -> rquickjs::Result<Rest<Value<'js>>> {
    args.iter()
        .cloned()
        .map(|arg| arg.into_js(ctx))
        .collect::<rquickjs::Result<Vec<_>>>()
        .map(Rest)
}

fn log_from_js(level: String, message: String) -> rquickjs::Result<()> {
    match level.as_str() {
        "error" => tracing::error!(target: "quickjs", "{message}"),
        "warn" => tracing::warn!(target: "quickjs", "{message}"),
        "debug" => tracing::debug!(target: "quickjs", "{message}"),
        _ => tracing::info!(target: "quickjs", "{message}"),
    }
    Ok(())
}

const CONSOLE_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const logAt = (level) => (...args) => {
        try {
            global.__proxy_log(level, args.map(stringify).join(' '));
        } catch (err) {
            // console must never throw
        }
    };

    if (typeof global.console !== 'object' || global.console === null) {
        global.console = {};
    }

    global.console.log = logAt('info');
    global.console.info = logAt('info');
    global.console.warn = logAt('warn');
    global.console.error = logAt('error');
    global.console.debug = logAt('debug');
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_lines_with_and_without_columns() {
        assert_eq!(line_from_stack("    at <eval> (eval_script:12)\n"), Some(12));
        assert_eq!(line_from_stack("    at dive (eval_script:7:15)\n    at <eval> (eval_script:9)"), Some(7));
        assert_eq!(line_from_stack("    at eval_script:3\n"), Some(3));
        assert_eq!(line_from_stack("no frames here"), None);
        assert_eq!(
            line_from_stack("    at __where (native)\n    at <eval> (eval_script:4)\n"),
            Some(4)
        );
    }

    #[test]
    fn source_is_compiled_without_padding() {
        let script = String::from_utf8(with_source_url("x()", "a.js")).unwrap();
        assert_eq!(script, "x()\n//# sourceURL=a.js");
        let bare = String::from_utf8(with_source_url("x()", "")).unwrap();
        assert_eq!(bare, "x()");
    }

    #[test]
    fn document_lines_saturate() {
        assert_eq!(document_line(1, 1), 1);
        assert_eq!(document_line(10, 2), 11);
        assert_eq!(document_line(u32::MAX, 5), u32::MAX);
        assert_eq!(document_line(0, 3), 3);
    }

    #[test]
    fn realms_evaluate_and_convert_values() {
        let engine = QuickJsEngine::new(&ProxyConfig::default()).expect("engine");
        let realm = engine.new_realm().expect("realm");
        let value = realm
            .with(|ctx| {
                let value = eval_in(&ctx, "console.log('hi'); ({a: [1, 2]})", "t.js")?;
                ScriptValue::from_js(&ctx, value)
            })
            .expect("value");
        assert_eq!(value, ScriptValue::Json(serde_json::json!({"a": [1, 2]})));

        let sum = realm
            .with(|ctx| {
                let value = eval_in(&ctx, "40 + 2", "t.js")?;
                ScriptValue::from_js(&ctx, value)
            })
            .expect("sum");
        assert_eq!(sum.as_number(), Some(42.0));
    }

    #[test]
    fn exceptions_are_captured_with_names() {
        let engine = QuickJsEngine::new(&ProxyConfig::default()).expect("engine");
        let realm = engine.new_realm().expect("realm");
        let error = realm.with(|ctx| match eval_in(&ctx, "throw new TypeError('boom')", "t.js") {
            Err(JsError::Exception) => Some(capture_script_error(&ctx, "t.js", 1)),
            _ => None,
        });
        let error = error.expect("exception");
        assert_eq!(error.name, "TypeError");
        assert_eq!(error.message, "boom");
        assert_eq!(error.console_text(), "Uncaught TypeError: boom");
    }
}
