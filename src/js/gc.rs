//! Collection hooks: pending activity, message port pairing and node groups.

use std::collections::{BTreeMap, HashMap};

use crate::dom::{downcast, MessagePort, NativeId, Node};
use crate::js::directory::{WrapperDirectory, WrapperMap};
use crate::js::error::fatal_engine_error;
use crate::js::heap::{GcCallbacks, Handle, HandleOwner, HeapValue, Persistent, WrapperHeap};
use crate::js::templates::slots;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcReport {
    pub swept: usize,
    pub finalized: usize,
    pub groups: usize,
    pub listeners_swept: usize,
}

/// State carried from a prologue to its epilogue.
#[derive(Debug, Default)]
pub struct GcCoordinator {
    pending: Vec<Persistent>,
    verify: bool,
}

impl GcCoordinator {
    pub fn new(verify: bool) -> Self {
        Self {
            pending: Vec::new(),
            verify,
        }
    }
}

/// Borrowed view used for one collection.
pub struct GcPass<'a> {
    pub coordinator: &'a mut GcCoordinator,
    pub directory: &'a WrapperDirectory,
}

impl GcPass<'_> {
    fn retain_for_this_pass(&mut self, heap: &mut WrapperHeap, persistent: Persistent) {
        if heap.is_weak(persistent) == Some(true) && heap.clear_weak(persistent) {
            self.coordinator.pending.push(persistent);
        }
    }

    fn prepare_active_objects(&mut self, heap: &mut WrapperHeap) {
        let directory = self.directory;
        for entry in directory.entries(WrapperMap::Active) {
            if entry.native.has_pending_activity() {
                self.retain_for_this_pass(heap, entry.persistent);
            }

            let Some(port) = downcast::<MessagePort>(&*entry.native) else {
                continue;
            };
            let own_id = NativeId::of(&entry.native);
            match port.locally_entangled_port() {
                Some(peer) => {
                    let peer_id = NativeId::of(&peer);
                    // Each pair is linked once, from its lower address.
                    if own_id >= peer_id {
                        continue;
                    }
                    let Some(peer_wrapper) = directory.find(WrapperMap::Active, peer_id) else {
                        continue;
                    };
                    heap.set_internal_field(
                        entry.wrapper,
                        slots::MESSAGE_PORT_PEER,
                        HeapValue::Object(peer_wrapper),
                    );
                    heap.set_internal_field(
                        peer_wrapper,
                        slots::MESSAGE_PORT_PEER,
                        HeapValue::Object(entry.wrapper),
                    );
                }
                None if port.is_entangled() => {
                    self.retain_for_this_pass(heap, entry.persistent);
                }
                None => {
                    heap.set_internal_field(
                        entry.wrapper,
                        slots::MESSAGE_PORT_PEER,
                        HeapValue::Undefined,
                    );
                }
            }
        }
    }

    fn group_nodes(&self, heap: &mut WrapperHeap) -> usize {
        let nodes = self
            .directory
            .entries(WrapperMap::Node)
            .filter_map(|entry| downcast::<Node>(&*entry.native).map(|node| (node, entry.wrapper)));
        let groups = compute_node_groups(nodes);
        let count = groups.len();
        for group in groups {
            heap.add_object_group(group);
        }
        count
    }
}

impl GcCallbacks for GcPass<'_> {
    fn prologue(&mut self, heap: &mut WrapperHeap) {
        self.prepare_active_objects(heap);
        let groups = self.group_nodes(heap);
        tracing::trace!(
            target: "script_proxy::gc",
            retained = self.coordinator.pending.len(),
            groups,
            "gc prologue"
        );
    }

    fn epilogue(&mut self, heap: &mut WrapperHeap) {
        for persistent in self.coordinator.pending.drain(..) {
            heap.make_weak(persistent);
        }
        if !self.coordinator.verify {
            return;
        }
        for map in WrapperMap::ALL {
            for entry in self.directory.entries(map) {
                if heap.is_weak(entry.persistent) == Some(false) {
                    fatal_engine_error("gc epilogue", "directory wrapper left strong after collection");
                }
            }
        }
        let mut census: HashMap<HandleOwner, usize> = HashMap::new();
        for handle in heap.global_handles() {
            *census.entry(handle.owner).or_default() += 1;
        }
        for (owner, count) in census {
            tracing::trace!(target: "script_proxy::gc", ?owner, count, "global handles");
        }
    }
}

/// Groups node wrappers that must live or die together.
///
/// Nodes in a document, and images still loading, group under their owner
/// document. Everything else groups under the root of its tree. A root with
/// no children on its own is not grouped, and single-member groups are
/// dropped.
pub fn compute_node_groups<'a>(
    nodes: impl IntoIterator<Item = (&'a Node, Handle)>,
) -> Vec<Vec<Handle>> {
    let mut groups: BTreeMap<NativeId, Vec<Handle>> = BTreeMap::new();
    for (node, wrapper) in nodes {
        let key = if node.in_document() || node.is_loading_image() {
            match node.owner_document() {
                Some(document) => NativeId::of(&document),
                None => continue,
            }
        } else {
            match node.parent() {
                None if !node.has_child_nodes() => continue,
                None => NativeId::of_ref(node),
                Some(mut root) => {
                    while let Some(parent) = root.parent() {
                        root = parent;
                    }
                    NativeId::of(&root)
                }
            }
        };
        groups.entry(key).or_default().push(wrapper);
    }
    groups.into_values().filter(|group| group.len() > 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DocumentFlavor;
    use crate::js::heap::HeapObject;
    use url::Url;

    #[test]
    fn in_document_nodes_group_and_lone_nodes_do_not() {
        let mut heap = WrapperHeap::new(None);
        let doc = Node::new_document(Url::parse("https://a.example/").unwrap(), DocumentFlavor::Html);
        let html = Node::create_element(&doc, "html");
        let body = Node::create_element(&doc, "body");
        let p = Node::create_element(&doc, "p");
        Node::append_child(&doc, &html);
        Node::append_child(&html, &body);
        Node::append_child(&body, &p);
        let lone = Node::create_element(&doc, "span");

        let mut handle = || heap.allocate(HeapObject::plain(None)).unwrap();
        let entries = vec![
            (&*html, handle()),
            (&*body, handle()),
            (&*p, handle()),
            (&*lone, handle()),
        ];
        let in_document: Vec<Handle> = entries[..3].iter().map(|(_, h)| *h).collect();

        let groups = compute_node_groups(entries);
        assert_eq!(groups, vec![in_document]);
    }

    #[test]
    fn detached_subtrees_group_under_their_root() {
        let mut heap = WrapperHeap::new(None);
        let doc = Node::new_document(Url::parse("https://a.example/").unwrap(), DocumentFlavor::Html);
        let root = Node::create_element(&doc, "div");
        let child = Node::create_element(&doc, "span");
        let grandchild = Node::create_element(&doc, "b");
        Node::append_child(&root, &child);
        Node::append_child(&child, &grandchild);

        let mut handle = || heap.allocate(HeapObject::plain(None)).unwrap();
        let root_wrapper = handle();
        let leaf_wrapper = handle();
        let groups = compute_node_groups(vec![(&*root, root_wrapper), (&*grandchild, leaf_wrapper)]);
        assert_eq!(groups, vec![vec![root_wrapper, leaf_wrapper]]);
    }
}
