//! The binding façade: evaluation, wrapper creation, security checks and
//! collection for every frame of one page tree.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::{Rc, Weak};

use rquickjs::function::{Constructor, Rest};
use rquickjs::{Ctx, Error as JsError, Function, IntoJs, Value};
use url::Url;

use crate::config::ProxyConfig;
use crate::dom::{downcast, DomWindow, NativeId, NativeObject, NativeRef, Node, StyleSheet, WindowPart};
use crate::embedder::Embedder;
use crate::frame::{Frame, FrameId};
use crate::js::console::{ConsoleMessage, ConsoleMessageManager, ConsoleMessageScope};
use crate::js::context::{
    ContextId, ContextKind, ContextLifecycle, ContextState, ExecutionContext, ScriptExtension,
};
use crate::js::directory::{EventListener, EventListenerList, WrapperDirectory, WrapperEntry, WrapperMap};
use crate::js::error::{EngineError, Fault, ScriptError};
use crate::js::exception::{throw_native, NativeException};
use crate::js::gc::{GcCoordinator, GcPass, GcReport};
use crate::js::heap::{Handle, HandleOwner, HeapObject, HeapValue, WrapperHeap};
use crate::js::runtime::{
    capture_script_error, current_script_line, document_line, eval_in, is_out_of_memory,
    is_out_of_memory_exception, to_js_args, QuickJsEngine, ScriptValue,
};
use crate::js::security::{unsafe_access_message, Report, SecurityGate};
use crate::js::shapes::SpecialSetup;
use crate::js::templates::{slots, WrapperTypeRegistry};
use crate::js::wrapper_type::{Family, WrapperType};

const RECURSION_SCRIPT: &str = "throw RangeError('Recursion too deep')";

/// Script text with the location it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    pub code: String,
    pub url: Option<String>,
    pub start_line: u32,
}

impl ScriptSource {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            url: None,
            start_line: 1,
        }
    }

    pub fn with_url(code: impl Into<String>, url: impl Into<String>, start_line: u32) -> Self {
        Self {
            code: code.into(),
            url: Some(url.into()),
            start_line: start_line.max(1),
        }
    }
}

/// Where the script calling into native code currently is. Empty when no
/// script is running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub source_id: String,
    pub line: u32,
}

/// One call of a registered host function.
pub struct HostCall<'a> {
    pub frame: FrameId,
    pub args: &'a [ScriptValue],
    pub location: SourceLocation,
}

type HostFunction = Rc<dyn Fn(&HostCall<'_>) -> Result<ScriptValue, NativeException>>;

struct SvgContext {
    object: Weak<dyn NativeObject>,
    element: Rc<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyAccess {
    Granted(HeapValue),
    Denied,
}

impl PropertyAccess {
    pub fn is_denied(&self) -> bool {
        matches!(self, PropertyAccess::Denied)
    }
}

/// Keeps a context on the entered stack until dropped.
pub struct EnteredScope<'a> {
    proxy: &'a ExecutionProxy,
    context: ContextId,
}

impl EnteredScope<'_> {
    pub fn context(&self) -> ContextId {
        self.context
    }
}

impl Drop for EnteredScope<'_> {
    fn drop(&mut self) {
        let mut entered = self.proxy.entered.borrow_mut();
        if let Some(position) = entered.iter().rposition(|id| *id == self.context) {
            entered.remove(position);
        }
    }
}

enum EvalFailure {
    Exception(ScriptError),
    OutOfMemory,
    Engine(String),
}

pub struct ExecutionProxy {
    pub(super) this: Weak<ExecutionProxy>,
    pub(super) config: ProxyConfig,
    pub(super) engine: QuickJsEngine,
    pub(super) embedder: Rc<dyn Embedder>,
    pub(super) heap: RefCell<WrapperHeap>,
    pub(super) directory: RefCell<WrapperDirectory>,
    pub(super) registry: RefCell<WrapperTypeRegistry>,
    pub(super) listeners: RefCell<EventListenerList>,
    pub(super) gate: SecurityGate,
    pub(super) console: ConsoleMessageManager,
    pub(super) gc: RefCell<GcCoordinator>,
    pub(super) frames: RefCell<BTreeMap<FrameId, Rc<Frame>>>,
    pub(super) next_frame_id: Cell<u32>,
    pub(super) lifecycles: RefCell<HashMap<FrameId, ContextLifecycle>>,
    pub(super) contexts: RefCell<BTreeMap<ContextId, ExecutionContext>>,
    pub(super) next_context_id: Cell<u32>,
    pub(super) entered: RefCell<Vec<ContextId>>,
    pub(super) depth: Cell<usize>,
    pub(super) oom_context: Cell<Option<ContextId>>,
    pub(super) extensions: RefCell<Vec<ScriptExtension>>,
    pub(super) retired_realms: RefCell<Vec<rquickjs::Context>>,
    pub(super) disconnected: RefCell<HashSet<FrameId>>,
    host_functions: RefCell<Vec<(String, HostFunction)>>,
    /// Source id and start line of every script on the stack, innermost last.
    running: RefCell<Vec<(String, u32)>>,
    svg_contexts: RefCell<HashMap<NativeId, SvgContext>>,
}

impl ExecutionProxy {
    pub fn new(config: ProxyConfig, embedder: Rc<dyn Embedder>) -> Result<Rc<Self>, EngineError> {
        let engine = QuickJsEngine::new(&config)?;
        Ok(Rc::new_cyclic(|this| ExecutionProxy {
            this: this.clone(),
            heap: RefCell::new(WrapperHeap::new(config.heap_object_limit)),
            gc: RefCell::new(GcCoordinator::new(config.verify_heap)),
            console: ConsoleMessageManager::new(Rc::clone(&embedder)),
            config,
            engine,
            embedder,
            directory: RefCell::new(WrapperDirectory::new()),
            registry: RefCell::new(WrapperTypeRegistry::new()),
            listeners: RefCell::new(EventListenerList::new()),
            gate: SecurityGate::new(),
            frames: RefCell::new(BTreeMap::new()),
            next_frame_id: Cell::new(1),
            lifecycles: RefCell::new(HashMap::new()),
            contexts: RefCell::new(BTreeMap::new()),
            next_context_id: Cell::new(1),
            entered: RefCell::new(Vec::new()),
            depth: Cell::new(0),
            oom_context: Cell::new(None),
            extensions: RefCell::new(Vec::new()),
            retired_realms: RefCell::new(Vec::new()),
            disconnected: RefCell::new(HashSet::new()),
            host_functions: RefCell::new(Vec::new()),
            running: RefCell::new(Vec::new()),
            svg_contexts: RefCell::new(HashMap::new()),
        }))
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn create_frame(&self, url: Url, parent: Option<&Rc<Frame>>) -> Rc<Frame> {
        let id = FrameId(self.next_frame_id.get());
        self.next_frame_id.set(id.0 + 1);
        let frame = Frame::new(id, url, parent);
        self.frames.borrow_mut().insert(id, Rc::clone(&frame));
        frame
    }

    pub fn frame(&self, id: FrameId) -> Option<Rc<Frame>> {
        self.frames.borrow().get(&id).cloned()
    }

    /// Tears the frame down and forgets it.
    pub fn remove_frame(&self, id: FrameId) {
        let Some(frame) = self.frame(id) else {
            return;
        };
        self.disconnect_frame(&frame);
        let removed = self.frames.borrow_mut().remove(&id);
        self.forget_frame(id);
        drop(removed);
    }

    pub(super) fn next_context(&self) -> ContextId {
        let id = ContextId(self.next_context_id.get());
        self.next_context_id.set(id.0 + 1);
        id
    }

    pub fn heap(&self) -> Ref<'_, WrapperHeap> {
        self.heap.borrow()
    }

    pub fn heap_mut(&self) -> RefMut<'_, WrapperHeap> {
        self.heap.borrow_mut()
    }

    pub fn directory(&self) -> Ref<'_, WrapperDirectory> {
        self.directory.borrow()
    }

    pub fn recursion_depth(&self) -> usize {
        self.depth.get()
    }

    pub fn pending_console_messages(&self) -> Vec<ConsoleMessage> {
        self.console.pending_messages()
    }

    pub fn explicit_security_checks(&self) -> u64 {
        self.gate.explicit_checks()
    }

    pub fn context_state(&self, id: ContextId) -> Option<ContextState> {
        self.contexts.borrow().get(&id).map(ExecutionContext::state)
    }

    pub fn context_kind(&self, id: ContextId) -> Option<ContextKind> {
        self.contexts.borrow().get(&id).map(ExecutionContext::kind)
    }

    pub fn current_context(&self, frame: FrameId) -> Option<ContextId> {
        self.lifecycles.borrow().get(&frame)?.current
    }

    /// Lifecycle state of the frame's primary context.
    pub fn frame_state(&self, frame: FrameId) -> ContextState {
        self.current_context(frame)
            .and_then(|id| self.context_state(id))
            .unwrap_or(ContextState::Uninitialized)
    }

    pub fn detached_contexts(&self, frame: FrameId) -> Vec<ContextId> {
        self.lifecycles
            .borrow()
            .get(&frame)
            .map(|lifecycle| lifecycle.detached().to_vec())
            .unwrap_or_default()
    }

    pub fn window_wrapper(&self, frame: FrameId) -> Option<Handle> {
        let current = self.current_context(frame)?;
        self.contexts.borrow().get(&current)?.window_wrapper()
    }

    pub fn context_window_wrapper(&self, id: ContextId) -> Option<Handle> {
        self.contexts.borrow().get(&id)?.window_wrapper()
    }

    pub fn context_global(&self, id: ContextId) -> Option<Handle> {
        self.inner_global(id)
    }

    pub fn installed_extensions(&self, id: ContextId) -> Vec<String> {
        self.contexts
            .borrow()
            .get(&id)
            .map(|context| context.installed_extensions().to_vec())
            .unwrap_or_default()
    }

    pub(super) fn entered_context(&self) -> Option<ContextId> {
        self.entered.borrow().last().copied()
    }

    /// Main frame of the entered context's frame.
    fn entered_page(&self) -> Option<FrameId> {
        let context = self.entered_context()?;
        let frame = self.contexts.borrow().get(&context)?.frame();
        self.page_of(frame)
    }

    fn page_of(&self, frame: FrameId) -> Option<FrameId> {
        Some(self.frame(frame)?.main_frame().id())
    }

    fn enter_context(&self, context: ContextId) -> EnteredScope<'_> {
        self.entered.borrow_mut().push(context);
        EnteredScope {
            proxy: self,
            context,
        }
    }

    /// Enters the frame's primary context, creating it if needed.
    pub fn enter(&self, frame: &Rc<Frame>) -> Result<EnteredScope<'_>, Fault> {
        let context = self
            .init_context_if_needed(frame)
            .ok_or(Fault::ContextUnavailable)?;
        Ok(self.enter_context(context))
    }

    /// Delivers queued console messages to the entered page.
    pub fn flush_console_messages(&self) {
        self.console.process_delayed(self.entered_page());
    }

    pub fn evaluate(
        &self,
        frame: &Rc<Frame>,
        source: &ScriptSource,
        node: Option<&Rc<Node>>,
    ) -> Result<ScriptValue, Fault> {
        if !self.is_enabled(frame) || self.disconnected.borrow().contains(&frame.id()) {
            return Err(Fault::ContextUnavailable);
        }
        if self.depth.get() > 0 {
            tracing::warn!(
                target: "script_proxy::context",
                frame = %frame.id(),
                "top-level evaluation requested while script is running"
            );
            return Err(Fault::ContextUnavailable);
        }
        let _console = ConsoleMessageScope::new(&self.console, Some(frame.main_frame().id()));
        if self.handle_out_of_memory() {
            return Err(Fault::OutOfMemory);
        }
        let context = self
            .init_context_if_needed(frame)
            .ok_or(Fault::ContextUnavailable)?;
        let source_id = match (&source.url, node) {
            (Some(url), _) => url.clone(),
            (None, Some(node)) => node
                .owner_document()
                .and_then(|document| document.document_data().map(|data| data.url().to_string()))
                .unwrap_or_else(|| frame.url().to_string()),
            (None, None) => frame.url().to_string(),
        };
        self.run_top_level(context, &source.code, &source_id, source.start_line)
    }

    /// Runs `source` in an isolated context.
    pub fn evaluate_in_context(
        &self,
        context: ContextId,
        source: &ScriptSource,
    ) -> Result<ScriptValue, Fault> {
        let frame = self
            .contexts
            .borrow()
            .get(&context)
            .filter(|candidate| candidate.state() == ContextState::Active)
            .map(ExecutionContext::frame)
            .ok_or(Fault::ContextUnavailable)?;
        let page = self.page_of(frame);
        let _console = ConsoleMessageScope::new(&self.console, page);
        let source_id = source.url.clone().unwrap_or_default();
        self.run_top_level(context, &source.code, &source_id, source.start_line)
    }

    /// Runs `sources` in a throwaway isolated context and returns the last value.
    pub fn evaluate_in_new_context(
        &self,
        frame: &Rc<Frame>,
        sources: &[ScriptSource],
    ) -> Result<ScriptValue, Fault> {
        if !self.is_enabled(frame) {
            return Err(Fault::ContextUnavailable);
        }
        let context = self
            .create_isolated_context(frame)
            .ok_or(Fault::ContextUnavailable)?;
        let mut result = Ok(ScriptValue::Undefined);
        for source in sources {
            result = self.evaluate_in_context(context, source);
            if result.is_err() {
                break;
            }
        }
        self.dispose_isolated_context(context);
        // Nothing outside this call knows the id.
        self.contexts.borrow_mut().remove(&context);
        result
    }

    fn realm_of(&self, context: ContextId) -> Option<rquickjs::Context> {
        self.contexts.borrow().get(&context)?.realm.clone()
    }

    fn run_top_level(
        &self,
        context: ContextId,
        code: &str,
        source_id: &str,
        start_line: u32,
    ) -> Result<ScriptValue, Fault> {
        let realm = self.realm_of(context).ok_or(Fault::ContextUnavailable)?;
        let entered = self.enter_context(context);

        let depth = self.depth.get();
        let limited = depth >= self.config.max_recursion_depth;
        let (code, source_id) = if limited {
            (RECURSION_SCRIPT, "")
        } else {
            (code, source_id)
        };

        self.depth.set(depth + 1);
        self.running.borrow_mut().push((source_id.to_string(), start_line));
        let outcome = realm.with(|ctx| {
            let result =
                eval_in(&ctx, code, source_id).and_then(|value| ScriptValue::from_js(&ctx, value));
            match result {
                Ok(value) => Ok(value),
                Err(JsError::Exception) => Err(EvalFailure::Exception(capture_script_error(
                    &ctx, source_id, start_line,
                ))),
                Err(error) if is_out_of_memory(&error) => Err(EvalFailure::OutOfMemory),
                Err(error) => Err(EvalFailure::Engine(error.to_string())),
            }
        });
        self.running.borrow_mut().pop();
        self.depth.set(depth);
        if depth == 0 {
            self.engine.execute_pending_jobs();
        }
        let result = self.settle(outcome, source_id, start_line, limited.then_some(depth));
        drop(entered);
        drop(realm);
        if depth == 0 {
            self.retired_realms.borrow_mut().clear();
        }

        if self.handle_out_of_memory() {
            return Err(Fault::OutOfMemory);
        }
        result
    }

    /// Reports a failed evaluation and classifies it.
    fn settle(
        &self,
        outcome: Result<ScriptValue, EvalFailure>,
        source_id: &str,
        start_line: u32,
        limited_at: Option<usize>,
    ) -> Result<ScriptValue, Fault> {
        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(EvalFailure::OutOfMemory) => {
                self.oom_context.set(self.entered_context());
                return Err(Fault::OutOfMemory);
            }
            Err(EvalFailure::Exception(error)) => error,
            Err(EvalFailure::Engine(message)) => ScriptError {
                name: String::new(),
                message,
                source_id: source_id.to_string(),
                line: start_line,
            },
        };
        if is_out_of_memory_exception(&error) {
            self.oom_context.set(self.entered_context());
        }
        self.report_exception(&error);
        Err(match limited_at {
            Some(depth) => Fault::RecursionLimit { depth },
            None if error.is_syntax_error() => Fault::Compile(error),
            None => Fault::Runtime(error),
        })
    }

    fn report_exception(&self, error: &ScriptError) {
        tracing::debug!(
            target: "quickjs",
            source = %error.source_id,
            line = error.line,
            "{}",
            error.console_text()
        );
        self.console.add_message(
            self.entered_page(),
            ConsoleMessage::new(error.console_text(), error.source_id.clone(), error.line),
        );
    }

    /// Evaluation requested by running script through `__evaluate`.
    pub(super) fn evaluate_nested<'js>(
        &self,
        ctx: &Ctx<'js>,
        frame: FrameId,
        source: &str,
    ) -> rquickjs::Result<Value<'js>> {
        let depth = self.depth.get();
        let limited = depth >= self.config.max_recursion_depth;
        let source_id = if limited {
            String::new()
        } else {
            self.frame(frame)
                .map(|frame| frame.url().to_string())
                .unwrap_or_default()
        };
        let code = if limited { RECURSION_SCRIPT } else { source };

        self.depth.set(depth + 1);
        self.running.borrow_mut().push((source_id.clone(), 1));
        let result = eval_in(ctx, code, &source_id);
        self.running.borrow_mut().pop();
        self.depth.set(depth);

        match result {
            Ok(value) => Ok(value),
            Err(JsError::Exception) => {
                let error = capture_script_error(ctx, &source_id, 1);
                if is_out_of_memory_exception(&error) {
                    self.oom_context.set(self.entered_context());
                }
                self.report_exception(&error);
                Ok(Value::new_undefined(ctx.clone()))
            }
            Err(error) if is_out_of_memory(&error) => {
                self.oom_context.set(self.entered_context());
                Ok(Value::new_undefined(ctx.clone()))
            }
            Err(error) => Err(error),
        }
    }

    /// Reads a property of another frame's window on behalf of running script.
    pub(super) fn cross_frame_get<'js>(
        &self,
        ctx: &Ctx<'js>,
        frame: FrameId,
        name: &str,
    ) -> rquickjs::Result<Value<'js>> {
        let Some(frame) = self.frame(frame) else {
            return Ok(Value::new_undefined(ctx.clone()));
        };
        // Contexts cannot be created while script runs. A frame without one
        // has nothing to read, but a denial is still reported.
        let Some(target) = self.outer_global(frame.id()) else {
            self.check_frame_access(&frame, Report::Later);
            return Ok(Value::new_undefined(ctx.clone()));
        };
        match self.get_property(target, name) {
            PropertyAccess::Granted(HeapValue::Bool(flag)) => flag.into_js(ctx),
            PropertyAccess::Granted(HeapValue::Number(number)) => number.into_js(ctx),
            PropertyAccess::Granted(HeapValue::String(text)) => text.to_string().into_js(ctx),
            PropertyAccess::Granted(HeapValue::Null) => Ok(Value::new_null(ctx.clone())),
            PropertyAccess::Granted(HeapValue::Object(handle)) => {
                let interface = self
                    .heap
                    .borrow()
                    .get(handle)
                    .and_then(HeapObject::shape)
                    .map(WrapperType::interface_name)
                    .unwrap_or("Object");
                let object = rquickjs::Object::new(ctx.clone())?;
                object.set("interfaceName", interface)?;
                object.into_js(ctx)
            }
            PropertyAccess::Granted(HeapValue::Undefined) | PropertyAccess::Denied => {
                Ok(Value::new_undefined(ctx.clone()))
            }
        }
    }

    pub(super) fn install_host_functions<'js>(
        &self,
        ctx: &Ctx<'js>,
        frame: FrameId,
    ) -> rquickjs::Result<()> {
        let globals = ctx.globals();

        let proxy = self.this.clone();
        let evaluate = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, source: String| -> rquickjs::Result<Value<'js>> {
                match proxy.upgrade() {
                    Some(proxy) => proxy.evaluate_nested(&ctx, frame, &source),
                    None => Ok(Value::new_undefined(ctx)),
                }
            },
        )?
        .with_name("__evaluate")?;
        globals.set("__evaluate", evaluate)?;

        let proxy = self.this.clone();
        let cross_frame_get = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, target: i32, name: String| -> rquickjs::Result<Value<'js>> {
                match proxy.upgrade() {
                    Some(proxy) if target >= 0 => {
                        proxy.cross_frame_get(&ctx, FrameId(target as u32), &name)
                    }
                    _ => Ok(Value::new_undefined(ctx)),
                }
            },
        )?
        .with_name("__crossFrameGet")?;
        globals.set("__crossFrameGet", cross_frame_get)?;

        let proxy = self.this.clone();
        let depth = Function::new(ctx.clone(), move || -> f64 {
            proxy
                .upgrade()
                .map(|proxy| proxy.recursion_depth() as f64)
                .unwrap_or(0.0)
        })?
        .with_name("__depth")?;
        globals.set("__depth", depth)?;

        globals.set("__frameId", frame.0 as f64)?;

        let registered = self.host_functions.borrow().clone();
        for (name, function) in registered {
            let proxy = self.this.clone();
            let native = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                    match proxy.upgrade() {
                        Some(proxy) => proxy.call_host_function(&ctx, frame, &function, args.0),
                        None => Ok(Value::new_undefined(ctx)),
                    }
                },
            )?
            .with_name(name.as_str())?;
            globals.set(name.as_str(), native)?;
        }
        Ok(())
    }

    /// Exposes a native function as a global of every context created from
    /// now on. A name already taken is ignored.
    pub fn register_host_function<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&HostCall<'_>) -> Result<ScriptValue, NativeException> + 'static,
    {
        let name = name.into();
        let mut functions = self.host_functions.borrow_mut();
        if functions.iter().any(|(existing, _)| *existing == name) {
            return;
        }
        functions.push((name, Rc::new(function)));
    }

    fn call_host_function<'js>(
        &self,
        ctx: &Ctx<'js>,
        frame: FrameId,
        function: &HostFunction,
        args: Vec<Value<'js>>,
    ) -> rquickjs::Result<Value<'js>> {
        let args = args
            .into_iter()
            .map(|arg| ScriptValue::from_js(ctx, arg))
            .collect::<rquickjs::Result<Vec<_>>>()?;
        let call = HostCall {
            frame,
            args: &args,
            location: self.current_source_location(ctx).unwrap_or_default(),
        };
        match function(&call) {
            Ok(value) => value.into_js(ctx),
            Err(exception) => {
                tracing::debug!(target: "quickjs", frame = %frame, "host function threw {exception:?}");
                match throw_native(ctx, &exception) {
                    Some(error) => Err(error),
                    None => Ok(Value::new_undefined(ctx.clone())),
                }
            }
        }
    }

    /// Source id and document line of the innermost running script.
    pub fn current_source_location(&self, ctx: &Ctx<'_>) -> Option<SourceLocation> {
        let (source_id, start_line) = self.running.borrow().last().cloned()?;
        let line = current_script_line(ctx)
            .map(|line| document_line(start_line, line))
            .unwrap_or(start_line);
        Some(SourceLocation { source_id, line })
    }

    /// Calls a global function of the frame's context.
    pub fn call_function(
        &self,
        frame: &Rc<Frame>,
        name: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, Fault> {
        self.invoke(frame, name, args, false)
    }

    /// Constructs an instance of a global constructor of the frame's context.
    pub fn new_instance(
        &self,
        frame: &Rc<Frame>,
        constructor: &str,
        args: &[ScriptValue],
    ) -> Result<ScriptValue, Fault> {
        self.invoke(frame, constructor, args, true)
    }

    fn invoke(
        &self,
        frame: &Rc<Frame>,
        name: &str,
        args: &[ScriptValue],
        construct: bool,
    ) -> Result<ScriptValue, Fault> {
        if !self.is_enabled(frame) || self.depth.get() > 0 {
            return Err(Fault::ContextUnavailable);
        }
        let _console = ConsoleMessageScope::new(&self.console, Some(frame.main_frame().id()));
        let context = self
            .init_context_if_needed(frame)
            .ok_or(Fault::ContextUnavailable)?;
        let realm = self.realm_of(context).ok_or(Fault::ContextUnavailable)?;
        let entered = self.enter_context(context);
        let source_id = frame.url().to_string();

        self.depth.set(1);
        self.running.borrow_mut().push((source_id.clone(), 1));
        let outcome = realm.with(|ctx| {
            let result = to_js_args(&ctx, args).and_then(|args| {
                let value: Value = if construct {
                    ctx.globals()
                        .get::<_, Constructor>(name)?
                        .construct((args,))?
                } else {
                    ctx.globals().get::<_, Function>(name)?.call((args,))?
                };
                ScriptValue::from_js(&ctx, value)
            });
            match result {
                Ok(value) => Ok(value),
                Err(JsError::Exception) => {
                    Err(EvalFailure::Exception(capture_script_error(&ctx, &source_id, 1)))
                }
                Err(error) if is_out_of_memory(&error) => Err(EvalFailure::OutOfMemory),
                Err(error) => Err(EvalFailure::Engine(error.to_string())),
            }
        });
        self.running.borrow_mut().pop();
        self.depth.set(0);
        self.engine.execute_pending_jobs();
        let result = self.settle(outcome, &source_id, 1, None);
        drop(entered);
        drop(realm);
        self.retired_realms.borrow_mut().clear();

        if self.handle_out_of_memory() {
            return Err(Fault::OutOfMemory);
        }
        result
    }

    /// Marks the entered context as having exhausted engine memory.
    pub fn signal_out_of_memory(&self) {
        if let Some(context) = self.entered_context() {
            self.oom_context.set(Some(context));
        }
    }

    /// Tears down the context that ran out of memory, disables scripting in
    /// its frame and tells the embedder. Returns whether anything was done.
    pub fn handle_out_of_memory(&self) -> bool {
        let Some(context) = self.oom_context.take() else {
            return false;
        };
        let frame = self
            .contexts
            .borrow()
            .get(&context)
            .map(ExecutionContext::frame)
            .and_then(|frame| self.frame(frame));
        tracing::error!(target: "script_proxy::context", context = %context, "script engine out of memory");
        let Some(frame) = frame else {
            self.dispose_context(context);
            return true;
        };
        self.clear_for_close(&frame);
        self.destroy_global(&frame);
        frame.set_script_enabled(false);
        self.embedder.notify_out_of_memory(frame.id());
        true
    }

    /// Frame whose context a wrapper for `native` belongs to, when there is one.
    fn owning_frame(&self, native: &dyn NativeObject, family: Family) -> Option<Rc<Frame>> {
        match family {
            Family::Node => downcast::<Node>(native)?.document_frame(),
            Family::WindowPart => downcast::<WindowPart>(native)?.frame(),
            Family::StyleSheet => downcast::<StyleSheet>(native)?
                .owner_node()?
                .document_frame(),
            _ => None,
        }
    }

    fn context_for(&self, native: &dyn NativeObject, family: Family) -> Option<ContextId> {
        match self.owning_frame(native, family) {
            Some(frame) => self.init_context_if_needed(&frame),
            None => self.entered_context(),
        }
    }

    /// The wrapper for `native`, created on first request.
    pub fn wrapper_for(&self, native: &NativeRef, declared: WrapperType) -> Option<Handle> {
        let family = declared.family();
        if family == Family::Window {
            let window = downcast::<DomWindow>(&**native)?;
            let frame = window.frame()?;
            return self.window_object(&frame);
        }

        // Node wrappers live in their document's context, which must exist
        // before the lookup.
        let context = self.context_for(&**native, family);
        let id = NativeId::of(native);
        let map = WrapperMap::for_type(declared);
        if let Some(existing) = self.directory.borrow().find(map, id) {
            return Some(existing);
        }
        let context = context?;

        let (shape, setup) = {
            let registry = self.registry.borrow();
            let shape = registry.shape_for(&**native, declared);
            (shape, registry.special_setup(&**native, shape))
        };

        let (wrapper, persistent) = {
            let mut heap = self.heap.borrow_mut();
            let wrapper = self
                .registry
                .borrow_mut()
                .instantiate(&mut heap, context, shape)?;
            heap.set_wrapper_info(wrapper, declared, id);
            if setup == SpecialSetup::Document && shape == WrapperType::HtmlDocument {
                let marker = heap.allocate(HeapObject::plain(Some(context)))?;
                heap.set_internal_field(wrapper, slots::HTML_DOCUMENT_MARKER, marker.into());
                heap.set_internal_field(wrapper, slots::HTML_DOCUMENT_SHADOW, marker.into());
            }
            let persistent = heap.weak_persistent(wrapper, Some(id), HandleOwner::Directory)?;
            (wrapper, persistent)
        };
        self.directory.borrow_mut().install(
            map,
            WrapperEntry {
                native: Rc::clone(native),
                wrapper,
                persistent,
            },
        );
        tracing::trace!(
            target: "script_proxy::context",
            context = %context,
            interface = shape.interface_name(),
            native = native.type_label(),
            "wrapper created"
        );

        match setup {
            SpecialSetup::None => {}
            SpecialSetup::Document => {
                if let Some(frame) = self.owning_frame(&**native, family) {
                    if NativeId::of(&frame.document()) == id {
                        self.set_document_wrapper(frame.id(), wrapper);
                    }
                }
            }
            SpecialSetup::StyleSheetOwner => {
                let owner = downcast::<StyleSheet>(&**native).and_then(StyleSheet::owner_node);
                if let Some(owner) = owner {
                    let owner: NativeRef = owner;
                    if let Some(owner_wrapper) = self.wrapper_for(&owner, WrapperType::Node) {
                        self.heap.borrow_mut().set_internal_field(
                            wrapper,
                            slots::STYLE_SHEET_OWNER_NODE,
                            owner_wrapper.into(),
                        );
                    }
                }
            }
            SpecialSetup::WindowReference(slot) => {
                let window_wrapper = self
                    .owning_frame(&**native, family)
                    .and_then(|frame| self.window_wrapper(frame.id()));
                if let Some(window_wrapper) = window_wrapper {
                    self.heap
                        .borrow_mut()
                        .set_internal_field(window_wrapper, slot, wrapper.into());
                }
            }
        }
        Some(wrapper)
    }

    /// The script-visible window object for `frame`.
    pub fn window_object(&self, frame: &Rc<Frame>) -> Option<Handle> {
        if let Some(entered) = self.entered_context() {
            let isolated_global = {
                let contexts = self.contexts.borrow();
                contexts
                    .get(&entered)
                    .filter(|context| {
                        context.kind() == ContextKind::Isolated
                            && context.state() == ContextState::Active
                            && context.window().is_some_and(|window| Rc::ptr_eq(&window, &frame.window()))
                    })
                    .and_then(|context| context.global)
            };
            if let Some(global) = isolated_global {
                return self.heap.borrow().persistent_target(global);
            }
        }
        self.init_context_if_needed(frame)?;
        self.outer_global(frame.id())
    }

    /// The document's DOMImplementation wrapper, cached on the document wrapper.
    pub fn dom_implementation_wrapper(&self, document: &Rc<Node>) -> Option<Handle> {
        let native: NativeRef = Rc::clone(document) as NativeRef;
        let document_wrapper = self.wrapper_for(&native, WrapperType::Document)?;
        let mut heap = self.heap.borrow_mut();
        if let Some(existing) = heap
            .internal_field(document_wrapper, slots::DOCUMENT_IMPLEMENTATION)
            .and_then(HeapValue::as_object)
            .filter(|handle| heap.contains(*handle))
        {
            return Some(existing);
        }
        let context = heap.get(document_wrapper)?.context()?;
        let implementation = self.registry.borrow_mut().instantiate(
            &mut heap,
            context,
            WrapperType::DomImplementation,
        )?;
        heap.set_internal_field(
            document_wrapper,
            slots::DOCUMENT_IMPLEMENTATION,
            implementation.into(),
        );
        Some(implementation)
    }

    /// Exposes `native` as a global property of the frame's context. The
    /// native stays referenced until the context is disposed.
    pub fn bind_to_window(
        &self,
        frame: &Rc<Frame>,
        name: &str,
        native: NativeRef,
        declared: WrapperType,
    ) -> Option<Handle> {
        let context = self.init_context_if_needed(frame)?;
        let inner = self.inner_global(context)?;
        let shape = self.registry.borrow().shape_for(&*native, declared);
        let wrapper = {
            let mut heap = self.heap.borrow_mut();
            let wrapper = self
                .registry
                .borrow_mut()
                .instantiate(&mut heap, context, shape)?;
            heap.set_wrapper_info(wrapper, declared, NativeId::of(&native));
            heap.force_set(inner, name, wrapper.into(), false);
            wrapper
        };
        if let Some(context) = self.contexts.borrow_mut().get_mut(&context) {
            context.bound.push(native);
        }
        Some(wrapper)
    }

    /// A plain script object in the frame's context, unreferenced.
    pub fn new_script_object(&self, frame: &Rc<Frame>) -> Option<Handle> {
        let context = self.init_context_if_needed(frame)?;
        self.heap
            .borrow_mut()
            .allocate(HeapObject::plain(Some(context)))
    }

    /// Property read on behalf of the entered context.
    pub fn get_property(&self, target: Handle, name: &str) -> PropertyAccess {
        if !self.check_access(target, Report::Later) {
            return PropertyAccess::Denied;
        }
        PropertyAccess::Granted(self.heap.borrow().get_property(target, name))
    }

    /// Property write on behalf of the entered context.
    pub fn set_property(&self, target: Handle, name: &str, value: HeapValue) -> PropertyAccess {
        if !self.check_access(target, Report::Later) {
            return PropertyAccess::Denied;
        }
        let stored = self.heap.borrow_mut().set_property(target, name, value.clone());
        PropertyAccess::Granted(if stored { value } else { HeapValue::Undefined })
    }

    /// Gate for access-checked objects. Native access with nothing entered
    /// is not checked.
    fn check_access(&self, target: Handle, report: Report) -> bool {
        let target_context = {
            let heap = self.heap.borrow();
            let Some(object) = heap.get(target) else {
                return false;
            };
            if !object.is_access_checked() {
                return true;
            }
            object.context()
        };
        let (Some(accessor), Some(target_context)) = (self.entered_context(), target_context) else {
            return true;
        };
        let denial = {
            let contexts = self.contexts.borrow();
            match (contexts.get(&accessor), contexts.get(&target_context)) {
                (Some(active), Some(owner)) => {
                    if self.gate.check(active, owner) {
                        None
                    } else {
                        match (owner.window(), active.window()) {
                            (Some(target), Some(source)) => {
                                Some((target.url().clone(), source.url().clone()))
                            }
                            _ => return false,
                        }
                    }
                }
                _ => return false,
            }
        };
        match denial {
            None => true,
            Some((target_url, source_url)) => {
                self.report_unsafe_access(&target_url, &source_url, report);
                false
            }
        }
    }

    fn report_unsafe_access(&self, target: &Url, source: &Url, report: Report) {
        tracing::warn!(
            target: "script_proxy::security",
            target_url = %target,
            source_url = %source,
            "cross-origin access denied"
        );
        let message = unsafe_access_message(target, source);
        match report {
            Report::Now => self.console.add_message(self.entered_page(), message),
            Report::Later => self.console.add_delayed_message(message),
            Report::Suppressed => {}
        }
    }

    /// Whether the entered context may access `target`'s window.
    pub fn can_access_frame(&self, target: &Rc<Frame>, report: bool) -> bool {
        let mode = if report { Report::Now } else { Report::Suppressed };
        self.check_frame_access(target, mode)
    }

    fn check_frame_access(&self, target: &Rc<Frame>, report: Report) -> bool {
        let Some(accessor) = self.entered_context() else {
            return true;
        };
        let Some(active_window) = self
            .contexts
            .borrow()
            .get(&accessor)
            .and_then(ExecutionContext::window)
        else {
            return false;
        };
        let target_window = target.window();
        if self.gate.can_access_private(&active_window, &target_window) {
            return true;
        }
        self.report_unsafe_access(target_window.url(), active_window.url(), report);
        false
    }

    pub fn check_node_security(&self, node: &Node) -> bool {
        match node.document_frame() {
            Some(frame) => self.can_access_frame(&frame, true),
            None => false,
        }
    }

    /// The native object behind `wrapper`, provided its frame is still alive.
    pub fn native_for(&self, wrapper: Handle) -> Option<NativeRef> {
        let (declared, id, context) = {
            let heap = self.heap.borrow();
            let (declared, id) = heap.wrapper_info(wrapper)?;
            (declared, id, heap.get(wrapper)?.context()?)
        };
        let map = WrapperMap::for_type(declared);
        let frame = self.contexts.borrow().get(&context)?.frame();
        if self.frame(frame).is_none() || self.disconnected.borrow().contains(&frame) {
            return None;
        }
        let directory = self.directory.borrow();
        let entry = directory.entry(id)?;
        if directory.find(map, id) != Some(wrapper) {
            return None;
        }
        Some(Rc::clone(&entry.native))
    }

    /// Records the SVG element a value object such as a length or transform
    /// belongs to. The element stays alive while the record exists. `None`
    /// clears it.
    pub fn set_svg_context(&self, object: &NativeRef, element: Option<&Rc<Node>>) {
        let id = NativeId::of(object);
        let previous = match element {
            Some(element) => self.svg_contexts.borrow_mut().insert(
                id,
                SvgContext {
                    object: Rc::downgrade(object),
                    element: Rc::clone(element),
                },
            ),
            None => self.svg_contexts.borrow_mut().remove(&id),
        };
        drop(previous);
    }

    pub fn svg_context(&self, object: &NativeRef) -> Option<Rc<Node>> {
        let id = NativeId::of(object);
        let contexts = self.svg_contexts.borrow();
        let entry = contexts.get(&id)?;
        let owner = entry.object.upgrade()?;
        (NativeId::of(&owner) == id).then(|| Rc::clone(&entry.element))
    }

    /// Runs a wrapper-heap collection and finalizes dead wrappers.
    pub fn collect_garbage(&self) -> GcReport {
        let outcome = {
            let directory = self.directory.borrow();
            let mut coordinator = self.gc.borrow_mut();
            let mut heap = self.heap.borrow_mut();
            let mut pass = GcPass {
                coordinator: &mut coordinator,
                directory: &directory,
            };
            heap.collect(&mut pass)
        };

        let released: Vec<NativeRef> = {
            let mut directory = self.directory.borrow_mut();
            outcome
                .finalized
                .iter()
                .filter_map(|id| directory.remove(*id))
                .collect()
        };
        let finalized = released.len();
        drop(released);

        let listeners_swept = self.listeners.borrow_mut().sweep(&self.heap.borrow());
        self.svg_contexts
            .borrow_mut()
            .retain(|_, entry| entry.object.strong_count() > 0);
        if self.depth.get() == 0 {
            self.engine.run_gc();
        }
        GcReport {
            swept: outcome.swept,
            finalized,
            groups: outcome.groups,
            listeners_swept,
        }
    }

    /// Keeps the wrapper of an already wrapped object alive regardless of reachability.
    pub fn gc_protect(&self, native: &NativeRef) -> bool {
        let id = NativeId::of(native);
        let Some(wrapper) = self.directory.borrow().find_any(id) else {
            return false;
        };
        if self.directory.borrow().is_protected(id) {
            return true;
        }
        let Some(persistent) = self.heap.borrow_mut().persistent(wrapper, HandleOwner::Protected) else {
            return false;
        };
        self.directory.borrow_mut().protect(id, persistent)
    }

    pub fn gc_unprotect(&self, native: &NativeRef) -> bool {
        let persistent = self.directory.borrow_mut().unprotect(NativeId::of(native));
        match persistent {
            Some(persistent) => self.heap.borrow_mut().dispose(persistent),
            None => false,
        }
    }

    /// Listener for a script function, holding the function strongly.
    pub fn find_or_create_listener(
        &self,
        frame: &Rc<Frame>,
        function: Handle,
        is_inline: bool,
    ) -> Option<Rc<EventListener>> {
        self.listener(frame, function, is_inline, false)
    }

    /// Listener that lets its function be collected.
    pub fn find_or_create_object_listener(
        &self,
        frame: &Rc<Frame>,
        function: Handle,
        is_inline: bool,
    ) -> Option<Rc<EventListener>> {
        self.listener(frame, function, is_inline, true)
    }

    fn listener(
        &self,
        frame: &Rc<Frame>,
        function: Handle,
        is_inline: bool,
        weak: bool,
    ) -> Option<Rc<EventListener>> {
        if let Some(existing) = self.listeners.borrow().find(function, is_inline) {
            return Some(existing);
        }
        let owner = HandleOwner::Listener(frame.id());
        let persistent = {
            let mut heap = self.heap.borrow_mut();
            if weak {
                heap.weak_persistent(function, None, owner)?
            } else {
                heap.persistent(function, owner)?
            }
        };
        Some(
            self.listeners
                .borrow_mut()
                .insert(frame.id(), function, is_inline, weak, persistent),
        )
    }

    pub fn remove_listener(&self, listener: &Rc<EventListener>) -> bool {
        let mut heap = self.heap.borrow_mut();
        self.listeners.borrow_mut().remove(&mut heap, listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn disconnect_event_listeners(&self, frame: FrameId) -> usize {
        let mut heap = self.heap.borrow_mut();
        self.listeners.borrow_mut().take_frame(&mut heap, frame)
    }
}
