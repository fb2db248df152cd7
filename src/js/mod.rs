mod console;
mod context;
mod directory;
mod error;
mod exception;
mod gc;
pub mod heap;
mod proxy;
mod runtime;
mod security;
mod shapes;
pub mod templates;
mod wrapper_type;

pub use console::{ConsoleMessage, ConsoleMessageManager, ConsoleMessageScope};
pub use context::{
    ContextDebugData, ContextId, ContextKind, ContextLifecycle, ContextState, ExecutionContext,
    ScriptExtension,
};
pub use directory::{EventListener, EventListenerList, WrapperDirectory, WrapperEntry, WrapperMap};
pub use error::{fatal_engine_error, EngineError, Fault, ScriptError};
pub use exception::{
    set_dom_exception, throw_error, throw_native, DomExceptionDescription, DomExceptionType,
    NativeException, ScriptErrorKind,
};
pub use gc::{compute_node_groups, GcReport};
pub use heap::{Handle, HandleOwner, HeapObject, HeapValue, Persistent, WrapperHeap};
pub use proxy::{
    EnteredScope, ExecutionProxy, HostCall, PropertyAccess, ScriptSource, SourceLocation,
};
pub use runtime::{QuickJsEngine, ScriptValue};
pub use security::{Report, SecurityGate, SecurityToken};
pub use shapes::{ShapeResolver, SpecialSetup};
pub use templates::{WrapperTemplate, WrapperTypeRegistry};
pub use wrapper_type::{html_element_type, svg_element_type, Family, WrapperType};
