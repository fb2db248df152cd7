use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use url::Url;

use super::NativeObject;
use crate::frame::Frame;
use crate::origin::SecurityOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Attribute,
    Text,
    CDataSection,
    EntityReference,
    Entity,
    ProcessingInstruction,
    Comment,
    Document,
    DocumentType,
    DocumentFragment,
    Notation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Html,
    Svg,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFlavor {
    Html,
    Svg,
    Xml,
}

pub struct DocumentData {
    url: Url,
    origin: RefCell<SecurityOrigin>,
    frame: RefCell<Weak<Frame>>,
    flavor: DocumentFlavor,
}

impl DocumentData {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn origin(&self) -> Ref<'_, SecurityOrigin> {
        self.origin.borrow()
    }

    pub fn origin_mut(&self) -> RefMut<'_, SecurityOrigin> {
        self.origin.borrow_mut()
    }

    pub fn frame(&self) -> Option<Rc<Frame>> {
        self.frame.borrow().upgrade()
    }

    pub(crate) fn set_frame(&self, frame: Weak<Frame>) {
        *self.frame.borrow_mut() = frame;
    }

    pub fn flavor(&self) -> DocumentFlavor {
        self.flavor
    }
}

/// A DOM node. Documents are nodes carrying [`DocumentData`].
pub struct Node {
    kind: NodeKind,
    local_name: Option<String>,
    namespace: Namespace,
    parent: RefCell<Weak<Node>>,
    children: RefCell<Vec<Rc<Node>>>,
    owner_document: Weak<Node>,
    document: Option<DocumentData>,
    load_event_fired: Cell<bool>,
}

impl Node {
    pub fn new_document(url: Url, flavor: DocumentFlavor) -> Rc<Node> {
        let origin = SecurityOrigin::from_url(&url);
        Rc::new_cyclic(|weak| Node {
            kind: NodeKind::Document,
            local_name: None,
            namespace: Namespace::Other,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            owner_document: weak.clone(),
            document: Some(DocumentData {
                url,
                origin: RefCell::new(origin),
                frame: RefCell::new(Weak::new()),
                flavor,
            }),
            load_event_fired: Cell::new(false),
        })
    }

    /// Creates an element in the document's default namespace.
    pub fn create_element(document: &Rc<Node>, tag: &str) -> Rc<Node> {
        let namespace = match document.document_data().map(DocumentData::flavor) {
            Some(DocumentFlavor::Html) => Namespace::Html,
            Some(DocumentFlavor::Svg) => Namespace::Svg,
            _ => Namespace::Other,
        };
        Self::create_element_ns(document, namespace, tag)
    }

    pub fn create_element_ns(document: &Rc<Node>, namespace: Namespace, tag: &str) -> Rc<Node> {
        let local_name = match namespace {
            Namespace::Html => tag.to_ascii_lowercase(),
            _ => tag.to_string(),
        };
        Self::create(document, NodeKind::Element, namespace, Some(local_name))
    }

    pub fn create_node(document: &Rc<Node>, kind: NodeKind) -> Rc<Node> {
        debug_assert!(kind != NodeKind::Document && kind != NodeKind::Element);
        Self::create(document, kind, Namespace::Other, None)
    }

    fn create(
        document: &Rc<Node>,
        kind: NodeKind,
        namespace: Namespace,
        local_name: Option<String>,
    ) -> Rc<Node> {
        Rc::new(Node {
            kind,
            local_name,
            namespace,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            owner_document: Rc::downgrade(document),
            document: None,
            load_event_fired: Cell::new(false),
        })
    }

    pub fn append_child(parent: &Rc<Node>, child: &Rc<Node>) {
        if let Some(old_parent) = child.parent() {
            old_parent.remove_child(child);
        }
        *child.parent.borrow_mut() = Rc::downgrade(parent);
        parent.children.borrow_mut().push(Rc::clone(child));
    }

    pub fn remove_child(&self, child: &Rc<Node>) {
        self.children
            .borrow_mut()
            .retain(|candidate| !Rc::ptr_eq(candidate, child));
        *child.parent.borrow_mut() = Weak::new();
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn is_html_element(&self) -> bool {
        self.kind == NodeKind::Element && self.namespace == Namespace::Html
    }

    pub fn is_svg_element(&self) -> bool {
        self.kind == NodeKind::Element && self.namespace == Namespace::Svg
    }

    pub fn parent(&self) -> Option<Rc<Node>> {
        self.parent.borrow().upgrade()
    }

    pub fn has_child_nodes(&self) -> bool {
        !self.children.borrow().is_empty()
    }

    pub fn children(&self) -> Vec<Rc<Node>> {
        self.children.borrow().clone()
    }

    pub fn owner_document(&self) -> Option<Rc<Node>> {
        self.owner_document.upgrade()
    }

    pub fn document_data(&self) -> Option<&DocumentData> {
        self.document.as_ref()
    }

    /// The frame that currently displays this node's document.
    pub fn document_frame(&self) -> Option<Rc<Frame>> {
        self.owner_document()?.document_data()?.frame()
    }

    /// True when the tree containing this node is rooted at a document.
    pub fn in_document(&self) -> bool {
        if self.kind == NodeKind::Document {
            return true;
        }
        let mut current = match self.parent() {
            Some(parent) => parent,
            None => return false,
        };
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.kind == NodeKind::Document
    }

    /// An `<img>` whose load event has not fired yet is kept with its document.
    pub fn is_loading_image(&self) -> bool {
        self.is_html_element() && self.local_name() == Some("img") && !self.load_event_fired.get()
    }

    pub fn mark_load_event_fired(&self) {
        self.load_event_fired.set(true);
    }
}

impl NativeObject for Node {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        match self.kind {
            NodeKind::Document => "Document",
            NodeKind::Element => "Element",
            _ => "Node",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> Rc<Node> {
        Node::new_document(Url::parse("https://a.example/").unwrap(), DocumentFlavor::Html)
    }

    #[test]
    fn tracks_document_membership() {
        let doc = document();
        let body = Node::create_element(&doc, "BODY");
        let div = Node::create_element(&doc, "div");
        assert_eq!(body.local_name(), Some("body"));
        assert!(!div.in_document());

        Node::append_child(&body, &div);
        assert!(!div.in_document());
        Node::append_child(&doc, &body);
        assert!(div.in_document());
        assert!(doc.in_document());

        body.remove_child(&div);
        assert!(div.parent().is_none());
        assert!(!div.in_document());
    }

    #[test]
    fn reparenting_moves_the_child() {
        let doc = document();
        let a = Node::create_element(&doc, "div");
        let b = Node::create_element(&doc, "div");
        let child = Node::create_element(&doc, "span");
        Node::append_child(&a, &child);
        Node::append_child(&b, &child);
        assert!(!a.has_child_nodes());
        assert!(b.has_child_nodes());
        assert!(Rc::ptr_eq(&child.parent().unwrap(), &b));
    }

    #[test]
    fn image_counts_as_loading_until_load_fires() {
        let doc = document();
        let img = Node::create_element(&doc, "img");
        assert!(img.is_loading_image());
        img.mark_load_event_fired();
        assert!(!img.is_loading_image());
    }
}
