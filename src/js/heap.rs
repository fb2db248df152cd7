//! Tracing heap that owns wrapper objects.
//!
//! Objects are addressed through generational [`Handle`]s. Roots are strong
//! [`Persistent`]s; weak persistents are cleared (and their finalizer token
//! reported) when their target is not reachable at the end of a collection.
//! Object groups registered during the prologue are retained or collected as
//! a unit.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::dom::NativeId;
use crate::frame::FrameId;
use crate::js::context::ContextId;
use crate::js::wrapper_type::WrapperType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Persistent {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeapValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Handle),
}

impl HeapValue {
    pub fn as_object(&self) -> Option<Handle> {
        match self {
            HeapValue::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HeapValue::Undefined)
    }
}

impl From<&str> for HeapValue {
    fn from(value: &str) -> Self {
        HeapValue::String(Rc::from(value))
    }
}

impl From<f64> for HeapValue {
    fn from(value: f64) -> Self {
        HeapValue::Number(value)
    }
}

impl From<bool> for HeapValue {
    fn from(value: bool) -> Self {
        HeapValue::Bool(value)
    }
}

impl From<Handle> for HeapValue {
    fn from(value: Handle) -> Self {
        HeapValue::Object(value)
    }
}

/// Who registered a persistent handle. Used by the global-handle census.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleOwner {
    Context(ContextId),
    Frame(FrameId),
    Directory,
    Protected,
    Listener(FrameId),
}

#[derive(Debug, Clone, Copy)]
struct WrapperTag {
    declared: WrapperType,
    native: NativeId,
}

#[derive(Debug, Clone)]
struct Property {
    value: HeapValue,
    read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HeapObject {
    shape: Option<WrapperType>,
    tag: Option<WrapperTag>,
    context: Option<ContextId>,
    prototype: Option<Handle>,
    internal_fields: Vec<HeapValue>,
    properties: BTreeMap<String, Property>,
    needs_access_check: bool,
    access_check_enabled: bool,
    undetectable: bool,
}

impl HeapObject {
    pub fn plain(context: Option<ContextId>) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    pub fn shaped(
        shape: WrapperType,
        context: Option<ContextId>,
        internal_field_count: usize,
        access_checked: bool,
        undetectable: bool,
    ) -> Self {
        Self {
            shape: Some(shape),
            context,
            internal_fields: vec![HeapValue::Undefined; internal_field_count],
            needs_access_check: access_checked,
            access_check_enabled: access_checked,
            undetectable,
            ..Self::default()
        }
    }

    pub fn with_prototype(mut self, prototype: Option<Handle>) -> Self {
        self.prototype = prototype;
        self
    }

    pub fn shape(&self) -> Option<WrapperType> {
        self.shape
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub fn prototype(&self) -> Option<Handle> {
        self.prototype
    }

    pub fn internal_field_count(&self) -> usize {
        self.internal_fields.len()
    }

    /// Type tag of the wrapped native object. The native pointer half of the
    /// tag is only reachable through [`WrapperHeap::wrapper_info`].
    pub fn wrapper_type(&self) -> Option<WrapperType> {
        self.tag.map(|tag| tag.declared)
    }

    pub fn needs_access_check(&self) -> bool {
        self.needs_access_check
    }

    pub fn access_check_enabled(&self) -> bool {
        self.access_check_enabled
    }

    /// True when property access on this object must consult the security gate.
    pub fn is_access_checked(&self) -> bool {
        self.needs_access_check && self.access_check_enabled
    }

    pub fn is_undetectable(&self) -> bool {
        self.undetectable
    }

    fn references(&self) -> impl Iterator<Item = Handle> + '_ {
        self.prototype
            .into_iter()
            .chain(self.internal_fields.iter().filter_map(HeapValue::as_object))
            .chain(
                self.properties
                    .values()
                    .filter_map(|property| property.value.as_object()),
            )
    }
}

struct ObjectSlot {
    generation: u32,
    object: Option<HeapObject>,
    marked: bool,
}

#[derive(Debug, Clone, Copy)]
struct PersistentEntry {
    target: Handle,
    weak: bool,
    finalizer: Option<NativeId>,
    owner: HandleOwner,
}

struct PersistentSlot {
    generation: u32,
    entry: Option<PersistentEntry>,
}

/// Hooks run at the start and end of every collection.
pub trait GcCallbacks {
    fn prologue(&mut self, heap: &mut WrapperHeap);
    fn epilogue(&mut self, heap: &mut WrapperHeap);
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectionOutcome {
    /// Finalizer tokens of weak persistents whose targets died.
    pub finalized: Vec<NativeId>,
    pub swept: usize,
    pub groups: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHandle {
    pub persistent: Persistent,
    pub target: Handle,
    pub owner: HandleOwner,
    pub weak: bool,
}

pub struct WrapperHeap {
    objects: Vec<ObjectSlot>,
    free_objects: Vec<u32>,
    live: usize,
    persistents: Vec<PersistentSlot>,
    free_persistents: Vec<u32>,
    groups: Vec<Vec<Handle>>,
    object_limit: Option<usize>,
    collecting: bool,
}

impl WrapperHeap {
    pub fn new(object_limit: Option<usize>) -> Self {
        Self {
            objects: Vec::new(),
            free_objects: Vec::new(),
            live: 0,
            persistents: Vec::new(),
            free_persistents: Vec::new(),
            groups: Vec::new(),
            object_limit,
            collecting: false,
        }
    }

    pub fn live_objects(&self) -> usize {
        self.live
    }

    pub fn set_object_limit(&mut self, limit: Option<usize>) {
        self.object_limit = limit;
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting
    }

    /// Returns `None` when the heap is full or a collection is running.
    pub fn allocate(&mut self, object: HeapObject) -> Option<Handle> {
        if self.collecting {
            tracing::error!(target: "script_proxy::gc", "allocation attempted during collection");
            return None;
        }
        if let Some(limit) = self.object_limit {
            if self.live >= limit {
                tracing::debug!(target: "script_proxy::gc", limit, "wrapper heap allocation failed");
                return None;
            }
        }
        self.live += 1;
        if let Some(index) = self.free_objects.pop() {
            let slot = &mut self.objects[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            return Some(Handle {
                index,
                generation: slot.generation,
            });
        }
        let index = self.objects.len() as u32;
        self.objects.push(ObjectSlot {
            generation: 0,
            object: Some(object),
            marked: false,
        });
        Some(Handle {
            index,
            generation: 0,
        })
    }

    /// Shallow copy of `source`. The copy carries no wrapper tag.
    pub fn clone_object(&mut self, source: Handle) -> Option<Handle> {
        let mut copy = self.get(source)?.clone();
        copy.tag = None;
        self.allocate(copy)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: Handle) -> Option<&HeapObject> {
        let slot = self.objects.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.object.as_ref()
    }

    fn get_mut(&mut self, handle: Handle) -> Option<&mut HeapObject> {
        let slot = self.objects.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.object.as_mut()
    }

    pub(crate) fn set_wrapper_info(
        &mut self,
        handle: Handle,
        declared: WrapperType,
        native: NativeId,
    ) -> bool {
        match self.get_mut(handle) {
            Some(object) => {
                object.tag = Some(WrapperTag { declared, native });
                true
            }
            None => false,
        }
    }

    pub(crate) fn wrapper_info(&self, handle: Handle) -> Option<(WrapperType, NativeId)> {
        self.get(handle)?
            .tag
            .map(|tag| (tag.declared, tag.native))
    }

    pub fn set_prototype(&mut self, handle: Handle, prototype: Option<Handle>) -> bool {
        match self.get_mut(handle) {
            Some(object) => {
                object.prototype = prototype;
                true
            }
            None => false,
        }
    }

    pub fn set_context(&mut self, handle: Handle, context: Option<ContextId>) {
        if let Some(object) = self.get_mut(handle) {
            object.context = context;
        }
    }

    pub fn set_access_check(&mut self, handle: Handle, enabled: bool) {
        if let Some(object) = self.get_mut(handle) {
            object.access_check_enabled = enabled;
        }
    }

    pub fn internal_field(&self, handle: Handle, index: usize) -> Option<&HeapValue> {
        self.get(handle)?.internal_fields.get(index)
    }

    pub fn set_internal_field(&mut self, handle: Handle, index: usize, value: HeapValue) -> bool {
        match self
            .get_mut(handle)
            .and_then(|object| object.internal_fields.get_mut(index))
        {
            Some(field) => {
                *field = value;
                true
            }
            None => false,
        }
    }

    /// Looks `name` up on the object and then along its prototype chain.
    pub fn get_property(&self, handle: Handle, name: &str) -> HeapValue {
        let mut current = Some(handle);
        let mut hops = 0usize;
        while let Some(handle) = current {
            let Some(object) = self.get(handle) else {
                break;
            };
            if let Some(property) = object.properties.get(name) {
                return property.value.clone();
            }
            current = object.prototype;
            hops += 1;
            if hops > self.objects.len() {
                break;
            }
        }
        HeapValue::Undefined
    }

    /// Ordinary assignment. Fails on read-only properties.
    pub fn set_property(&mut self, handle: Handle, name: &str, value: HeapValue) -> bool {
        let Some(object) = self.get_mut(handle) else {
            return false;
        };
        match object.properties.get_mut(name) {
            Some(property) if property.read_only => false,
            Some(property) => {
                property.value = value;
                true
            }
            None => {
                object.properties.insert(
                    name.to_string(),
                    Property {
                        value,
                        read_only: false,
                    },
                );
                true
            }
        }
    }

    /// Defines or overwrites a property regardless of its attributes.
    pub fn force_set(&mut self, handle: Handle, name: &str, value: HeapValue, read_only: bool) {
        if let Some(object) = self.get_mut(handle) {
            object
                .properties
                .insert(name.to_string(), Property { value, read_only });
        }
    }

    pub fn force_delete(&mut self, handle: Handle, name: &str) -> bool {
        self.get_mut(handle)
            .map(|object| object.properties.remove(name).is_some())
            .unwrap_or(false)
    }

    pub fn persistent(&mut self, target: Handle, owner: HandleOwner) -> Option<Persistent> {
        self.new_persistent(PersistentEntry {
            target,
            weak: false,
            finalizer: None,
            owner,
        })
    }

    /// A weak handle. When the target dies its `finalizer` token is reported
    /// by [`WrapperHeap::collect`].
    pub fn weak_persistent(
        &mut self,
        target: Handle,
        finalizer: Option<NativeId>,
        owner: HandleOwner,
    ) -> Option<Persistent> {
        self.new_persistent(PersistentEntry {
            target,
            weak: true,
            finalizer,
            owner,
        })
    }

    fn new_persistent(&mut self, entry: PersistentEntry) -> Option<Persistent> {
        if !self.contains(entry.target) {
            return None;
        }
        if let Some(index) = self.free_persistents.pop() {
            let slot = &mut self.persistents[index as usize];
            slot.entry = Some(entry);
            return Some(Persistent {
                index,
                generation: slot.generation,
            });
        }
        let index = self.persistents.len() as u32;
        self.persistents.push(PersistentSlot {
            generation: 0,
            entry: Some(entry),
        });
        Some(Persistent {
            index,
            generation: 0,
        })
    }

    fn entry(&self, persistent: Persistent) -> Option<&PersistentEntry> {
        let slot = self.persistents.get(persistent.index as usize)?;
        if slot.generation != persistent.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, persistent: Persistent) -> Option<&mut PersistentEntry> {
        let slot = self.persistents.get_mut(persistent.index as usize)?;
        if slot.generation != persistent.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Releases the handle. Returns false if it was already released.
    pub fn dispose(&mut self, persistent: Persistent) -> bool {
        let Some(slot) = self.persistents.get_mut(persistent.index as usize) else {
            return false;
        };
        if slot.generation != persistent.generation || slot.entry.is_none() {
            return false;
        }
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_persistents.push(persistent.index);
        true
    }

    pub fn persistent_target(&self, persistent: Persistent) -> Option<Handle> {
        self.entry(persistent).map(|entry| entry.target)
    }

    pub fn is_weak(&self, persistent: Persistent) -> Option<bool> {
        self.entry(persistent).map(|entry| entry.weak)
    }

    pub fn clear_weak(&mut self, persistent: Persistent) -> bool {
        match self.entry_mut(persistent) {
            Some(entry) => {
                entry.weak = false;
                true
            }
            None => false,
        }
    }

    pub fn make_weak(&mut self, persistent: Persistent) -> bool {
        match self.entry_mut(persistent) {
            Some(entry) => {
                entry.weak = true;
                true
            }
            None => false,
        }
    }

    /// Registers a set of objects that live or die together during the
    /// current collection. Groups are discarded when the collection ends.
    pub fn add_object_group(&mut self, group: Vec<Handle>) {
        if group.len() > 1 {
            self.groups.push(group);
        }
    }

    pub fn global_handles(&self) -> Vec<GlobalHandle> {
        self.persistents
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry.map(|entry| GlobalHandle {
                    persistent: Persistent {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    target: entry.target,
                    owner: entry.owner,
                    weak: entry.weak,
                })
            })
            .collect()
    }

    pub fn handles_owned_by(&self, owner: HandleOwner) -> usize {
        self.persistents
            .iter()
            .filter(|slot| matches!(slot.entry, Some(entry) if entry.owner == owner))
            .count()
    }

    pub fn collect(&mut self, callbacks: &mut dyn GcCallbacks) -> CollectionOutcome {
        if self.collecting {
            tracing::warn!(target: "script_proxy::gc", "nested collection request ignored");
            return CollectionOutcome::default();
        }
        self.collecting = true;
        callbacks.prologue(self);

        for slot in &mut self.objects {
            slot.marked = false;
        }
        let mut worklist: Vec<Handle> = self
            .persistents
            .iter()
            .filter_map(|slot| slot.entry)
            .filter(|entry| !entry.weak)
            .map(|entry| entry.target)
            .collect();
        self.mark(&mut worklist);

        let groups = std::mem::take(&mut self.groups);
        loop {
            for group in &groups {
                let any_marked = group.iter().any(|handle| self.is_marked(*handle));
                if any_marked {
                    worklist.extend(
                        group
                            .iter()
                            .copied()
                            .filter(|handle| self.contains(*handle) && !self.is_marked(*handle)),
                    );
                }
            }
            if worklist.is_empty() {
                break;
            }
            self.mark(&mut worklist);
        }

        let mut outcome = CollectionOutcome {
            groups: groups.len(),
            ..CollectionOutcome::default()
        };
        for index in 0..self.persistents.len() {
            let Some(entry) = self.persistents[index].entry else {
                continue;
            };
            if entry.weak && !self.is_marked(entry.target) {
                if let Some(token) = entry.finalizer {
                    outcome.finalized.push(token);
                }
                let slot = &mut self.persistents[index];
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free_persistents.push(index as u32);
            }
        }

        for (index, slot) in self.objects.iter_mut().enumerate() {
            if slot.object.is_some() && !slot.marked {
                slot.object = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free_objects.push(index as u32);
                self.live -= 1;
                outcome.swept += 1;
            }
        }

        callbacks.epilogue(self);
        self.collecting = false;
        tracing::debug!(
            target: "script_proxy::gc",
            swept = outcome.swept,
            finalized = outcome.finalized.len(),
            groups = outcome.groups,
            live = self.live,
            "collection finished"
        );
        outcome
    }

    fn is_marked(&self, handle: Handle) -> bool {
        self.objects
            .get(handle.index as usize)
            .map(|slot| slot.generation == handle.generation && slot.marked)
            .unwrap_or(false)
    }

    fn mark(&mut self, worklist: &mut Vec<Handle>) {
        while let Some(handle) = worklist.pop() {
            let Some(slot) = self.objects.get_mut(handle.index as usize) else {
                continue;
            };
            if slot.generation != handle.generation || slot.marked {
                continue;
            }
            let Some(object) = slot.object.as_ref() else {
                continue;
            };
            slot.marked = true;
            worklist.extend(object.references());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHooks;

    impl GcCallbacks for NoHooks {
        fn prologue(&mut self, _heap: &mut WrapperHeap) {}
        fn epilogue(&mut self, _heap: &mut WrapperHeap) {}
    }

    fn token(value: &u8) -> NativeId {
        NativeId::of_ref(value)
    }

    #[test]
    fn strong_roots_keep_reachable_objects() {
        let mut heap = WrapperHeap::new(None);
        let root = heap.allocate(HeapObject::plain(None)).unwrap();
        let child = heap.allocate(HeapObject::plain(None)).unwrap();
        let orphan = heap.allocate(HeapObject::plain(None)).unwrap();
        heap.force_set(root, "child", child.into(), false);
        heap.persistent(root, HandleOwner::Directory).unwrap();

        let outcome = heap.collect(&mut NoHooks);
        assert_eq!(outcome.swept, 1);
        assert!(heap.contains(root));
        assert!(heap.contains(child));
        assert!(!heap.contains(orphan));
    }

    #[test]
    fn weak_handles_report_finalizers() {
        let native = 7u8;
        let mut heap = WrapperHeap::new(None);
        let object = heap.allocate(HeapObject::plain(None)).unwrap();
        let weak = heap
            .weak_persistent(object, Some(token(&native)), HandleOwner::Directory)
            .unwrap();

        let outcome = heap.collect(&mut NoHooks);
        assert_eq!(outcome.finalized, vec![token(&native)]);
        assert!(heap.persistent_target(weak).is_none());
        assert!(!heap.dispose(weak));
    }

    #[test]
    fn groups_live_and_die_together() {
        let mut heap = WrapperHeap::new(None);
        let a = heap.allocate(HeapObject::plain(None)).unwrap();
        let b = heap.allocate(HeapObject::plain(None)).unwrap();
        heap.persistent(a, HandleOwner::Directory).unwrap();

        struct Group(Vec<Handle>);
        impl GcCallbacks for Group {
            fn prologue(&mut self, heap: &mut WrapperHeap) {
                heap.add_object_group(self.0.clone());
            }
            fn epilogue(&mut self, _heap: &mut WrapperHeap) {}
        }

        heap.collect(&mut Group(vec![a, b]));
        assert!(heap.contains(b));
        heap.collect(&mut NoHooks);
        assert!(!heap.contains(b));
    }

    #[test]
    fn limit_and_collection_block_allocation() {
        let mut heap = WrapperHeap::new(Some(1));
        assert!(heap.allocate(HeapObject::plain(None)).is_some());
        assert!(heap.allocate(HeapObject::plain(None)).is_none());

        struct Allocating(Option<Handle>);
        impl GcCallbacks for Allocating {
            fn prologue(&mut self, heap: &mut WrapperHeap) {
                self.0 = heap.allocate(HeapObject::plain(None));
            }
            fn epilogue(&mut self, _heap: &mut WrapperHeap) {}
        }
        heap.set_object_limit(None);
        let mut hooks = Allocating(None);
        heap.collect(&mut hooks);
        assert!(hooks.0.is_none());
    }

    #[test]
    fn stale_handles_do_not_alias_reused_slots() {
        let mut heap = WrapperHeap::new(None);
        let first = heap.allocate(HeapObject::plain(None)).unwrap();
        heap.collect(&mut NoHooks);
        let second = heap.allocate(HeapObject::plain(None)).unwrap();
        assert!(!heap.contains(first));
        assert!(heap.contains(second));
        assert_ne!(first, second);
    }

    #[test]
    fn read_only_properties_resist_assignment() {
        let mut heap = WrapperHeap::new(None);
        let object = heap.allocate(HeapObject::plain(None)).unwrap();
        heap.force_set(object, "document", HeapValue::Null, true);
        assert!(!heap.set_property(object, "document", HeapValue::Bool(true)));
        assert!(heap.force_delete(object, "document"));
        assert!(heap.set_property(object, "document", HeapValue::Bool(true)));
        assert_eq!(heap.get_property(object, "document"), HeapValue::Bool(true));
    }
}
