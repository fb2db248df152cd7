//! Identity map from native objects to their wrappers, plus event listeners.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::dom::{NativeId, NativeRef};
use crate::frame::FrameId;
use crate::js::heap::{Handle, Persistent, WrapperHeap};
use crate::js::wrapper_type::{Family, WrapperType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapperMap {
    Node,
    /// Objects that may report pending asynchronous activity.
    Active,
    Object,
}

impl WrapperMap {
    pub const ALL: [WrapperMap; 3] = [WrapperMap::Node, WrapperMap::Active, WrapperMap::Object];

    pub fn for_type(ty: WrapperType) -> Self {
        match ty.family() {
            Family::Node => WrapperMap::Node,
            Family::Active => WrapperMap::Active,
            _ => WrapperMap::Object,
        }
    }
}

/// One installed wrapper. Holding `native` is the reference taken at wrap time.
pub struct WrapperEntry {
    pub native: NativeRef,
    pub wrapper: Handle,
    pub persistent: Persistent,
}

#[derive(Default)]
pub struct WrapperDirectory {
    nodes: HashMap<NativeId, WrapperEntry>,
    active: HashMap<NativeId, WrapperEntry>,
    objects: HashMap<NativeId, WrapperEntry>,
    protected: HashMap<NativeId, Persistent>,
}

impl WrapperDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, map: WrapperMap) -> &HashMap<NativeId, WrapperEntry> {
        match map {
            WrapperMap::Node => &self.nodes,
            WrapperMap::Active => &self.active,
            WrapperMap::Object => &self.objects,
        }
    }

    fn map_mut(&mut self, map: WrapperMap) -> &mut HashMap<NativeId, WrapperEntry> {
        match map {
            WrapperMap::Node => &mut self.nodes,
            WrapperMap::Active => &mut self.active,
            WrapperMap::Object => &mut self.objects,
        }
    }

    pub fn find(&self, map: WrapperMap, id: NativeId) -> Option<Handle> {
        self.map(map).get(&id).map(|entry| entry.wrapper)
    }

    pub fn find_any(&self, id: NativeId) -> Option<Handle> {
        WrapperMap::ALL.iter().find_map(|map| self.find(*map, id))
    }

    pub fn entry(&self, id: NativeId) -> Option<&WrapperEntry> {
        WrapperMap::ALL.iter().find_map(|map| self.map(*map).get(&id))
    }

    pub fn install(&mut self, map: WrapperMap, entry: WrapperEntry) {
        let id = NativeId::of(&entry.native);
        debug_assert!(
            self.find_any(id).is_none(),
            "native object {id:?} is already wrapped"
        );
        self.map_mut(map).insert(id, entry);
    }

    /// Drops the entry for `id`, handing back the native reference it held.
    /// The caller releases it once no borrows are outstanding.
    pub fn remove(&mut self, id: NativeId) -> Option<NativeRef> {
        self.take(id).map(|entry| entry.native)
    }

    pub fn take(&mut self, id: NativeId) -> Option<WrapperEntry> {
        WrapperMap::ALL
            .iter()
            .find_map(|map| self.map_mut(*map).remove(&id))
    }

    pub fn entries(&self, map: WrapperMap) -> impl Iterator<Item = &WrapperEntry> {
        self.map(map).values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len() + self.active.len() + self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn protect(&mut self, id: NativeId, persistent: Persistent) -> bool {
        if self.protected.contains_key(&id) {
            return false;
        }
        self.protected.insert(id, persistent);
        true
    }

    pub fn unprotect(&mut self, id: NativeId) -> Option<Persistent> {
        self.protected.remove(&id)
    }

    pub fn is_protected(&self, id: NativeId) -> bool {
        self.protected.contains_key(&id)
    }
}

/// A script function registered as an event listener.
pub struct EventListener {
    frame: FrameId,
    function: Handle,
    is_inline: bool,
    weak: bool,
    persistent: Cell<Option<Persistent>>,
    disconnected: Cell<bool>,
}

impl EventListener {
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn function(&self) -> Handle {
        self.function
    }

    pub fn is_inline(&self) -> bool {
        self.is_inline
    }

    /// Object listeners do not keep their function alive.
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.get()
    }

    fn disconnect(&self, heap: &mut WrapperHeap) {
        if let Some(persistent) = self.persistent.take() {
            heap.dispose(persistent);
        }
        self.disconnected.set(true);
    }
}

#[derive(Default)]
pub struct EventListenerList {
    listeners: Vec<Rc<EventListener>>,
}

impl EventListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn find(&self, function: Handle, is_inline: bool) -> Option<Rc<EventListener>> {
        self.listeners
            .iter()
            .find(|listener| listener.function == function && listener.is_inline == is_inline)
            .cloned()
    }

    pub fn insert(
        &mut self,
        frame: FrameId,
        function: Handle,
        is_inline: bool,
        weak: bool,
        persistent: Persistent,
    ) -> Rc<EventListener> {
        let listener = Rc::new(EventListener {
            frame,
            function,
            is_inline,
            weak,
            persistent: Cell::new(Some(persistent)),
            disconnected: Cell::new(false),
        });
        self.listeners.push(Rc::clone(&listener));
        listener
    }

    pub fn remove(&mut self, heap: &mut WrapperHeap, listener: &Rc<EventListener>) -> bool {
        let Some(position) = self
            .listeners
            .iter()
            .position(|candidate| Rc::ptr_eq(candidate, listener))
        else {
            return false;
        };
        self.listeners.swap_remove(position).disconnect(heap);
        true
    }

    /// Disconnects and drops every listener registered for `frame`.
    pub fn take_frame(&mut self, heap: &mut WrapperHeap, frame: FrameId) -> usize {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.listeners)
            .into_iter()
            .partition(|listener| listener.frame == frame);
        self.listeners = kept;
        for listener in &taken {
            listener.disconnect(heap);
        }
        taken.len()
    }

    /// Drops weak listeners whose function has been collected.
    pub fn sweep(&mut self, heap: &WrapperHeap) -> usize {
        let before = self.listeners.len();
        self.listeners.retain(|listener| {
            let alive = listener
                .persistent
                .get()
                .is_some_and(|persistent| heap.persistent_target(persistent).is_some());
            if !alive {
                listener.disconnected.set(true);
            }
            alive
        });
        before - self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{CssRule, CssRuleKind, NativeObject};
    use crate::js::heap::{HandleOwner, HeapObject};

    fn entry(heap: &mut WrapperHeap, native: NativeRef) -> WrapperEntry {
        let wrapper = heap.allocate(HeapObject::plain(None)).unwrap();
        let persistent = heap
            .weak_persistent(wrapper, Some(NativeId::of(&native)), HandleOwner::Directory)
            .unwrap();
        WrapperEntry {
            native,
            wrapper,
            persistent,
        }
    }

    #[test]
    fn install_find_remove_balances_reference_counts() {
        let mut heap = WrapperHeap::new(None);
        let mut directory = WrapperDirectory::new();
        let rule = CssRule::new(CssRuleKind::Style);
        let id = NativeId::of(&rule);
        let before = Rc::strong_count(&rule);

        for _ in 0..3 {
            assert!(directory.find(WrapperMap::Object, id).is_none());
            let native: Rc<dyn NativeObject> = rule.clone();
            let installed = entry(&mut heap, native);
            let wrapper = installed.wrapper;
            directory.install(WrapperMap::Object, installed);
            assert_eq!(directory.find(WrapperMap::Object, id), Some(wrapper));
            assert!(directory.find(WrapperMap::Node, id).is_none());
            assert_eq!(Rc::strong_count(&rule), before + 1);
            drop(directory.remove(id));
        }
        assert_eq!(Rc::strong_count(&rule), before);
        assert!(directory.is_empty());
    }

    #[test]
    fn weak_listeners_are_swept_with_their_function() {
        let mut heap = WrapperHeap::new(None);
        let mut list = EventListenerList::new();
        let strong_fn = heap.allocate(HeapObject::plain(None)).unwrap();
        let weak_fn = heap.allocate(HeapObject::plain(None)).unwrap();
        let strong = heap.persistent(strong_fn, HandleOwner::Listener(FrameId(1))).unwrap();
        let weak = heap
            .weak_persistent(weak_fn, None, HandleOwner::Listener(FrameId(1)))
            .unwrap();
        list.insert(FrameId(1), strong_fn, false, false, strong);
        let object_listener = list.insert(FrameId(1), weak_fn, false, true, weak);

        struct NoHooks;
        impl crate::js::heap::GcCallbacks for NoHooks {
            fn prologue(&mut self, _heap: &mut WrapperHeap) {}
            fn epilogue(&mut self, _heap: &mut WrapperHeap) {}
        }
        heap.collect(&mut NoHooks);

        assert_eq!(list.sweep(&heap), 1);
        assert!(object_listener.is_disconnected());
        assert!(list.find(strong_fn, false).is_some());
        assert!(list.find(strong_fn, true).is_none());

        assert_eq!(list.take_frame(&mut heap, FrameId(1)), 1);
        assert_eq!(heap.handles_owned_by(HandleOwner::Listener(FrameId(1))), 0);
    }
}
