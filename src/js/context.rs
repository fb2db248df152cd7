//! Execution contexts and the per-frame lifecycle that creates, detaches and
//! disposes them.
//!
//! A frame exposes one stable outer global across navigations. Each context
//! owns an inner global whose prototype is the window wrapper; the outer
//! global's prototype is swapped to the inner global of the current context.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::dom::{DomWindow, NativeId, NativeRef, WindowPartKind};
use crate::frame::{Frame, FrameId};
use crate::js::directory::{WrapperEntry, WrapperMap};
use crate::js::heap::{Handle, HandleOwner, HeapObject, HeapValue, Persistent};
use crate::js::proxy::ExecutionProxy;
use crate::js::security::SecurityToken;
use crate::js::wrapper_type::WrapperType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Active,
    /// Separated from the frame's outer global after navigation. Kept for
    /// closures that still reference it.
    Detached,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Main,
    Isolated,
}

/// Tag reported to debugging tools: `page` contexts carry their own id,
/// `injected` ones the id of the page they were injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextDebugData {
    pub kind: &'static str,
    pub id: i32,
}

/// Script run in every new context, optionally only for one URL scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptExtension {
    pub name: String,
    pub source: String,
    pub scheme_restriction: Option<String>,
}

impl ScriptExtension {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            scheme_restriction: None,
        }
    }

    pub fn restricted_to(mut self, scheme: impl Into<String>) -> Self {
        self.scheme_restriction = Some(scheme.into());
        self
    }

    fn applies_to(&self, frame: &Rc<Frame>) -> bool {
        match &self.scheme_restriction {
            None => true,
            Some(scheme) => {
                frame.url().scheme() == scheme && frame.main_frame().url().scheme() == scheme
            }
        }
    }
}

pub struct ExecutionContext {
    pub(super) id: ContextId,
    pub(super) frame: FrameId,
    pub(super) kind: ContextKind,
    pub(super) state: ContextState,
    pub(super) realm: Option<rquickjs::Context>,
    pub(super) global: Option<Persistent>,
    pub(super) window_wrapper: Option<Handle>,
    /// The window is owned by its frame, or by the window wrapper once the
    /// frame has moved on.
    pub(super) window: Weak<DomWindow>,
    pub(super) token: SecurityToken,
    pub(super) debug: Option<ContextDebugData>,
    pub(super) extensions: Vec<String>,
    pub(super) bound: Vec<NativeRef>,
}

impl ExecutionContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn window(&self) -> Option<Rc<DomWindow>> {
        self.window.upgrade()
    }

    pub fn token(&self) -> &SecurityToken {
        &self.token
    }

    pub fn window_wrapper(&self) -> Option<Handle> {
        self.window_wrapper
    }

    pub fn debug_data(&self) -> Option<ContextDebugData> {
        self.debug
    }

    pub fn installed_extensions(&self) -> &[String] {
        &self.extensions
    }
}

/// Context bookkeeping for one frame.
#[derive(Debug)]
pub struct ContextLifecycle {
    pub(super) frame: FrameId,
    pub(super) outer_global: Option<Persistent>,
    pub(super) current: Option<ContextId>,
    pub(super) document_wrapper: Option<Persistent>,
    pub(super) detached: Vec<ContextId>,
    pub(super) isolated: Vec<ContextId>,
}

impl ContextLifecycle {
    fn new(frame: FrameId) -> Self {
        Self {
            frame,
            outer_global: None,
            current: None,
            document_wrapper: None,
            detached: Vec::new(),
            isolated: Vec::new(),
        }
    }

    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn current(&self) -> Option<ContextId> {
        self.current
    }

    pub fn detached(&self) -> &[ContextId] {
        &self.detached
    }

    pub fn isolated(&self) -> &[ContextId] {
        &self.isolated
    }
}

/// Partially built context state, released if creation fails.
struct PendingContext {
    inner: Option<Persistent>,
    outer: Option<Persistent>,
    outer_is_new: bool,
}

impl ExecutionProxy {
    /// The frame's Active context, created on first use.
    ///
    /// Creation needs the engine idle, so it fails while script is on the stack.
    pub fn init_context_if_needed(&self, frame: &Rc<Frame>) -> Option<ContextId> {
        let frame_id = frame.id();
        if self.disconnected.borrow().contains(&frame_id) || self.frame(frame_id).is_none() {
            return None;
        }
        if let Some(current) = self.lifecycle_current(frame_id) {
            return Some(current);
        }
        if self.depth.get() > 0 {
            tracing::warn!(
                target: "script_proxy::context",
                frame = %frame_id,
                "cannot create a context while script is running"
            );
            return None;
        }

        let realm = match self.engine.new_realm() {
            Ok(realm) => realm,
            Err(err) => {
                tracing::warn!(target: "script_proxy::context", frame = %frame_id, "{err}");
                return None;
            }
        };
        let id = self.next_context();
        if let Err(err) = realm.with(|ctx| self.install_host_functions(&ctx, frame_id)) {
            tracing::warn!(target: "script_proxy::context", context = %id, "host functions: {err}");
            return None;
        }
        let extensions = self.install_extensions(&realm, frame);

        let mut pending = PendingContext {
            inner: None,
            outer: None,
            outer_is_new: false,
        };
        if !self.build_globals(frame_id, id, &mut pending) {
            self.abandon_context(frame_id, id, pending);
            return None;
        }

        self.contexts.borrow_mut().insert(
            id,
            ExecutionContext {
                id,
                frame: frame_id,
                kind: ContextKind::Main,
                state: ContextState::Active,
                realm: Some(realm),
                global: pending.inner,
                window_wrapper: None,
                window: Rc::downgrade(&frame.window()),
                token: SecurityToken::Default,
                debug: None,
                extensions,
                bound: Vec::new(),
            },
        );
        {
            let mut lifecycles = self.lifecycles.borrow_mut();
            let lifecycle = lifecycles
                .entry(frame_id)
                .or_insert_with(|| ContextLifecycle::new(frame_id));
            lifecycle.current = Some(id);
            if pending.outer_is_new {
                lifecycle.outer_global = pending.outer;
            }
        }

        if !self.install_dom_window(frame, id) {
            if let Some(lifecycle) = self.lifecycles.borrow_mut().get_mut(&frame_id) {
                lifecycle.current = None;
            }
            let context = self.contexts.borrow_mut().remove(&id);
            if let Some(context) = context {
                if let Some(realm) = context.realm {
                    self.retire_realm(realm);
                }
            }
            self.abandon_context(frame_id, id, pending);
            return None;
        }
        self.update_document(frame);
        self.set_security_token(frame);

        tracing::debug!(
            target: "script_proxy::context",
            frame = %frame_id,
            context = %id,
            url = %frame.url(),
            "context created"
        );
        self.embedder.did_create_script_context(frame_id);
        self.embedder.window_object_available(frame_id);
        Some(id)
    }

    fn lifecycle_current(&self, frame: FrameId) -> Option<ContextId> {
        let current = self.lifecycles.borrow().get(&frame)?.current?;
        match self.context_state(current) {
            Some(ContextState::Active) => Some(current),
            _ => None,
        }
    }

    fn install_extensions(&self, realm: &rquickjs::Context, frame: &Rc<Frame>) -> Vec<String> {
        let extensions: Vec<ScriptExtension> = self
            .extensions
            .borrow()
            .iter()
            .filter(|extension| extension.applies_to(frame))
            .cloned()
            .collect();
        let mut installed = Vec::new();
        for extension in extensions {
            match realm.with(|ctx| ctx.eval::<(), _>(extension.source.as_bytes())) {
                Ok(()) => installed.push(extension.name),
                Err(err) => tracing::warn!(
                    target: "script_proxy::context",
                    extension = %extension.name,
                    "extension failed to install: {err}"
                ),
            }
        }
        installed
    }

    /// Allocates the inner global, the outer global on first use, and the
    /// context's prototypes.
    fn build_globals(&self, frame: FrameId, id: ContextId, pending: &mut PendingContext) -> bool {
        let existing_outer = self
            .lifecycles
            .borrow()
            .get(&frame)
            .and_then(|lifecycle| lifecycle.outer_global);
        let mut heap = self.heap.borrow_mut();

        let Some(inner) = heap.allocate(HeapObject::plain(Some(id))) else {
            return false;
        };
        pending.inner = heap.persistent(inner, HandleOwner::Context(id));
        if pending.inner.is_none() {
            return false;
        }
        if !self.registry.borrow_mut().install_context(&mut heap, id) {
            return false;
        }

        let outer = match existing_outer.and_then(|outer| heap.persistent_target(outer)) {
            Some(outer) => outer,
            None => {
                let Some(outer) = heap.allocate(HeapObject::shaped(
                    WrapperType::DomWindow,
                    Some(id),
                    0,
                    true,
                    false,
                )) else {
                    return false;
                };
                pending.outer = heap.persistent(outer, HandleOwner::Frame(frame));
                pending.outer_is_new = true;
                if pending.outer.is_none() {
                    return false;
                }
                outer
            }
        };
        heap.set_context(outer, Some(id));
        heap.set_prototype(outer, Some(inner));
        true
    }

    fn abandon_context(&self, frame: FrameId, id: ContextId, pending: PendingContext) {
        let mut heap = self.heap.borrow_mut();
        self.registry.borrow_mut().dispose_context(&mut heap, id);
        if let Some(inner) = pending.inner {
            heap.dispose(inner);
        }
        if pending.outer_is_new {
            if let Some(outer) = pending.outer {
                heap.dispose(outer);
            }
            if let Some(lifecycle) = self.lifecycles.borrow_mut().get_mut(&frame) {
                lifecycle.outer_global = None;
            }
        }
        tracing::warn!(
            target: "script_proxy::context",
            frame = %frame,
            context = %id,
            "context creation failed, frame stays uninitialized"
        );
    }

    /// Wraps the frame's window and makes it the prototype of the inner global.
    fn install_dom_window(&self, frame: &Rc<Frame>, id: ContextId) -> bool {
        let window = frame.window();
        let native_id = NativeId::of(&window);

        let stale = self.directory.borrow_mut().take(native_id);
        let mut heap = self.heap.borrow_mut();
        if let Some(stale) = stale {
            heap.dispose(stale.persistent);
            drop(stale);
        }
        let Some(wrapper) =
            self.registry
                .borrow_mut()
                .instantiate(&mut heap, id, WrapperType::DomWindow)
        else {
            return false;
        };
        heap.set_wrapper_info(wrapper, WrapperType::DomWindow, native_id);
        let Some(persistent) =
            heap.weak_persistent(wrapper, Some(native_id), HandleOwner::Directory)
        else {
            return false;
        };
        let inner = self
            .contexts
            .borrow()
            .get(&id)
            .and_then(|context| context.global)
            .and_then(|global| heap.persistent_target(global));
        let Some(inner) = inner else {
            heap.dispose(persistent);
            return false;
        };
        heap.set_access_check(wrapper, false);
        heap.set_prototype(inner, Some(wrapper));
        drop(heap);

        let native: NativeRef = window;
        self.directory.borrow_mut().install(
            WrapperMap::Object,
            WrapperEntry {
                native,
                wrapper,
                persistent,
            },
        );
        if let Some(context) = self.contexts.borrow_mut().get_mut(&id) {
            context.window_wrapper = Some(wrapper);
        }
        true
    }

    /// Points the global `document` property at the frame's current document.
    pub fn update_document(&self, frame: &Rc<Frame>) {
        let Some(id) = self.lifecycle_current(frame.id()) else {
            return;
        };
        let document: NativeRef = frame.document();
        let wrapper = self.wrapper_for(&document, WrapperType::Document);
        if let Some(wrapper) = wrapper {
            self.set_document_wrapper(frame.id(), wrapper);
        }

        let Some(inner) = self.inner_global(id) else {
            return;
        };
        let mut heap = self.heap.borrow_mut();
        heap.force_delete(inner, "document");
        if let Some(wrapper) = wrapper {
            heap.force_set(inner, "document", HeapValue::Object(wrapper), true);
        }
    }

    pub(super) fn set_document_wrapper(&self, frame: FrameId, wrapper: Handle) {
        let mut heap = self.heap.borrow_mut();
        let mut lifecycles = self.lifecycles.borrow_mut();
        let Some(lifecycle) = lifecycles.get_mut(&frame) else {
            return;
        };
        if let Some(existing) = lifecycle.document_wrapper {
            if heap.persistent_target(existing) == Some(wrapper) {
                return;
            }
        }
        if let Some(previous) = lifecycle.document_wrapper.take() {
            heap.dispose(previous);
        }
        lifecycle.document_wrapper = heap.persistent(wrapper, HandleOwner::Frame(frame));
    }

    fn clear_document_wrapper(&self, frame: FrameId) {
        let previous = self
            .lifecycles
            .borrow_mut()
            .get_mut(&frame)
            .and_then(|lifecycle| lifecycle.document_wrapper.take());
        if let Some(previous) = previous {
            self.heap.borrow_mut().dispose(previous);
        }
    }

    pub fn document_wrapper(&self, frame: FrameId) -> Option<Handle> {
        let persistent = self.lifecycles.borrow().get(&frame)?.document_wrapper?;
        self.heap.borrow().persistent_target(persistent)
    }

    /// Re-derives the token of the frame's current context from its document.
    pub fn set_security_token(&self, frame: &Rc<Frame>) {
        let Some(id) = self.lifecycle_current(frame.id()) else {
            return;
        };
        let token = SecurityToken::for_document(Some(&frame.document()));
        if let Some(context) = self.contexts.borrow_mut().get_mut(&id) {
            context.token = token;
        }
    }

    /// Call after the document's origin changed, e.g. through `document.domain`.
    pub fn update_security_origin(&self, frame: &Rc<Frame>) {
        self.set_security_token(frame);
    }

    /// Detaches the current context ahead of navigation. The outer global
    /// survives and is re-pointed at the next context.
    pub fn clear_for_navigation(&self, frame: &Rc<Frame>) {
        let frame_id = frame.id();
        let Some(id) = self.lifecycle_current(frame_id) else {
            return;
        };
        self.disconnect_event_listeners(frame_id);
        self.clear_document_wrapper(frame_id);

        let inner = self.inner_global(id);
        let window_wrapper = self.contexts.borrow().get(&id).and_then(|c| c.window_wrapper);
        let outer = self.outer_global(frame_id);
        {
            let mut heap = self.heap.borrow_mut();
            if let Some(inner) = inner {
                heap.force_delete(inner, "document");
            }
            if let Some(wrapper) = window_wrapper {
                heap.set_access_check(wrapper, true);
            }
            if let Some(outer) = outer {
                heap.set_prototype(outer, None);
            }
            self.registry.borrow_mut().dispose_context(&mut heap, id);
        }
        if let Some(context) = self.contexts.borrow_mut().get_mut(&id) {
            context.state = ContextState::Detached;
        }
        if let Some(lifecycle) = self.lifecycles.borrow_mut().get_mut(&frame_id) {
            lifecycle.current = None;
            lifecycle.detached.push(id);
        }
        tracing::debug!(
            target: "script_proxy::context",
            frame = %frame_id,
            context = %id,
            "context detached for navigation"
        );
    }

    /// Disposes every context of the frame. Calling it again does nothing.
    pub fn clear_for_close(&self, frame: &Rc<Frame>) {
        let frame_id = frame.id();
        self.clear_document_wrapper(frame_id);
        let doomed: Vec<ContextId> = match self.lifecycles.borrow_mut().get_mut(&frame_id) {
            Some(lifecycle) => lifecycle
                .current
                .take()
                .into_iter()
                .chain(lifecycle.detached.drain(..))
                .chain(lifecycle.isolated.drain(..))
                .collect(),
            None => Vec::new(),
        };
        for id in doomed {
            self.dispose_context(id);
        }
    }

    /// Releases the frame's outer global.
    pub fn destroy_global(&self, frame: &Rc<Frame>) {
        let outer = self
            .lifecycles
            .borrow_mut()
            .get_mut(&frame.id())
            .and_then(|lifecycle| lifecycle.outer_global.take());
        if let Some(outer) = outer {
            self.heap.borrow_mut().dispose(outer);
        }
    }

    /// Drops every record kept for a frame that no longer exists.
    pub(super) fn forget_frame(&self, frame: FrameId) {
        self.lifecycles.borrow_mut().remove(&frame);
        self.disconnected.borrow_mut().remove(&frame);
        self.contexts
            .borrow_mut()
            .retain(|_, context| context.frame != frame);
    }

    /// Final teardown. No wrappers are created for the frame afterwards.
    pub fn disconnect_frame(&self, frame: &Rc<Frame>) {
        self.disconnect_event_listeners(frame.id());
        self.clear_for_close(frame);
        self.destroy_global(frame);
        self.disconnected.borrow_mut().insert(frame.id());
        tracing::debug!(target: "script_proxy::context", frame = %frame.id(), "frame disconnected");
    }

    pub(super) fn dispose_context(&self, id: ContextId) {
        let (frame, kind, global, window_wrapper, realm, bound) = {
            let mut contexts = self.contexts.borrow_mut();
            let Some(context) = contexts.get_mut(&id) else {
                return;
            };
            if context.state == ContextState::Disposed {
                return;
            }
            context.state = ContextState::Disposed;
            (
                context.frame,
                context.kind,
                context.global.take(),
                context.window_wrapper,
                context.realm.take(),
                std::mem::take(&mut context.bound),
            )
        };
        {
            let mut heap = self.heap.borrow_mut();
            if kind == ContextKind::Main {
                if let Some(wrapper) = window_wrapper {
                    heap.set_access_check(wrapper, true);
                }
            }
            if let Some(global) = global {
                heap.dispose(global);
            }
            self.registry.borrow_mut().dispose_context(&mut heap, id);
        }
        drop(bound);
        if let Some(realm) = realm {
            self.retire_realm(realm);
        }
        if self.oom_context.get() == Some(id) {
            self.oom_context.set(None);
        }
        tracing::debug!(target: "script_proxy::context", frame = %frame, context = %id, "context disposed");
        if kind == ContextKind::Main {
            self.embedder.did_destroy_script_context(frame);
        }
    }

    /// Dropping a realm needs the engine idle.
    pub(super) fn retire_realm(&self, realm: rquickjs::Context) {
        if self.depth.get() == 0 {
            drop(realm);
        } else {
            self.retired_realms.borrow_mut().push(realm);
        }
    }

    pub(super) fn inner_global(&self, id: ContextId) -> Option<Handle> {
        let global = self.contexts.borrow().get(&id)?.global?;
        self.heap.borrow().persistent_target(global)
    }

    pub(super) fn outer_global(&self, frame: FrameId) -> Option<Handle> {
        let outer = self.lifecycles.borrow().get(&frame)?.outer_global?;
        self.heap.borrow().persistent_target(outer)
    }

    /// An isolated context sharing the frame's window identity.
    pub fn create_isolated_context(&self, frame: &Rc<Frame>) -> Option<ContextId> {
        let main = self.init_context_if_needed(frame)?;
        let window_wrapper = self.contexts.borrow().get(&main)?.window_wrapper?;
        let outer = self.outer_global(frame.id());
        let page_debug_id = self.context_debug_id(main);

        let realm = match self.engine.new_realm() {
            Ok(realm) => realm,
            Err(err) => {
                tracing::warn!(target: "script_proxy::context", frame = %frame.id(), "{err}");
                return None;
            }
        };
        let id = self.next_context();
        if let Err(err) = realm.with(|ctx| self.install_host_functions(&ctx, frame.id())) {
            tracing::warn!(target: "script_proxy::context", context = %id, "host functions: {err}");
            return None;
        }
        let extensions = self.install_extensions(&realm, frame);

        let global = {
            let mut heap = self.heap.borrow_mut();
            let Some(global) = heap
                .allocate(HeapObject::plain(Some(id)).with_prototype(Some(window_wrapper)))
            else {
                return None;
            };
            if let Some(outer) = outer {
                heap.force_set(global, "contentWindow", HeapValue::Object(outer), false);
            }
            let persistent = heap.persistent(global, HandleOwner::Context(id))?;
            if !self.registry.borrow_mut().install_context(&mut heap, id) {
                heap.dispose(persistent);
                return None;
            }
            persistent
        };

        self.contexts.borrow_mut().insert(
            id,
            ExecutionContext {
                id,
                frame: frame.id(),
                kind: ContextKind::Isolated,
                state: ContextState::Active,
                realm: Some(realm),
                global: Some(global),
                window_wrapper: Some(window_wrapper),
                window: Rc::downgrade(&frame.window()),
                token: SecurityToken::Default,
                debug: Some(ContextDebugData {
                    kind: "injected",
                    id: page_debug_id,
                }),
                extensions,
                bound: Vec::new(),
            },
        );
        if let Some(lifecycle) = self.lifecycles.borrow_mut().get_mut(&frame.id()) {
            lifecycle.isolated.push(id);
        }
        tracing::debug!(target: "script_proxy::context", frame = %frame.id(), context = %id, "isolated context created");
        Some(id)
    }

    pub fn dispose_isolated_context(&self, id: ContextId) {
        let frame = match self.contexts.borrow().get(&id) {
            Some(context) if context.kind == ContextKind::Isolated => context.frame,
            _ => return,
        };
        if let Some(lifecycle) = self.lifecycles.borrow_mut().get_mut(&frame) {
            lifecycle.isolated.retain(|candidate| *candidate != id);
        }
        self.dispose_context(id);
    }

    /// Tags the frame's Active context for debugging tools. Fails if the
    /// context is missing or already tagged.
    pub fn set_context_debug_id(&self, frame: &Rc<Frame>, debug_id: i32) -> bool {
        let Some(id) = self.init_context_if_needed(frame) else {
            return false;
        };
        let mut contexts = self.contexts.borrow_mut();
        match contexts.get_mut(&id) {
            Some(context) if context.debug.is_none() => {
                context.debug = Some(ContextDebugData {
                    kind: "page",
                    id: debug_id,
                });
                true
            }
            _ => false,
        }
    }

    /// `-1` when the context carries no debug data.
    pub fn context_debug_id(&self, id: ContextId) -> i32 {
        self.contexts
            .borrow()
            .get(&id)
            .and_then(|context| context.debug)
            .map(|debug| debug.id)
            .unwrap_or(-1)
    }

    pub fn register_extension(&self, extension: ScriptExtension) {
        let mut extensions = self.extensions.borrow_mut();
        if extensions.iter().any(|existing| existing.name == extension.name) {
            return;
        }
        extensions.push(extension);
    }

    /// Whether script may run in the frame.
    pub fn is_enabled(&self, frame: &Rc<Frame>) -> bool {
        if frame.is_script_enabled() {
            return true;
        }
        let document = frame.document();
        let Some(data) = document.document_data() else {
            return false;
        };
        let origin = data.origin();
        let protocol = origin.protocol();
        if protocol.is_empty() || protocol == "http" || protocol == "https" {
            return false;
        }
        if protocol == self.config.ui_resource_scheme {
            return true;
        }
        if protocol == "ftp" || protocol == "file" {
            // Directory listings only.
            return data.url().path().ends_with('/');
        }
        false
    }

    /// The wrapper slot on a window wrapper reserved for `kind`.
    pub fn window_part_wrapper(&self, frame: FrameId, kind: WindowPartKind) -> Option<Handle> {
        let current = self.lifecycle_current(frame)?;
        let window_wrapper = self.contexts.borrow().get(&current)?.window_wrapper?;
        let slot = crate::js::templates::slots::window_part(kind);
        self.heap
            .borrow()
            .internal_field(window_wrapper, slot)
            .and_then(HeapValue::as_object)
    }
}
