use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use url::Url;

use crate::dom::{DomWindow, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// A browsing frame: one window at a time, replaced on navigation.
pub struct Frame {
    id: FrameId,
    parent: Option<Weak<Frame>>,
    window: RefCell<Rc<DomWindow>>,
    script_enabled: Cell<bool>,
}

impl Frame {
    pub fn new(id: FrameId, url: Url, parent: Option<&Rc<Frame>>) -> Rc<Frame> {
        Rc::new_cyclic(|weak| Frame {
            id,
            parent: parent.map(Rc::downgrade),
            window: RefCell::new(DomWindow::new(weak.clone(), url)),
            script_enabled: Cell::new(true),
        })
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn parent(&self) -> Option<Rc<Frame>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The top-level frame of this frame's page.
    pub fn main_frame(self: &Rc<Self>) -> Rc<Frame> {
        let mut current = Rc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn window(&self) -> Rc<DomWindow> {
        Rc::clone(&self.window.borrow())
    }

    pub fn document(&self) -> Rc<Node> {
        self.window.borrow().document()
    }

    pub fn url(&self) -> Url {
        self.window.borrow().url().clone()
    }

    /// Replaces the window and document. The previous document no longer
    /// reports this frame as its owner.
    pub fn navigate(self: &Rc<Self>, url: Url) -> Rc<DomWindow> {
        let window = DomWindow::new(Rc::downgrade(self), url);
        let previous = self.window.replace(Rc::clone(&window));
        previous.detach_document();
        tracing::debug!(frame = %self.id, url = %window.url(), "frame navigated");
        window
    }

    pub fn is_script_enabled(&self) -> bool {
        self.script_enabled.get()
    }

    pub fn set_script_enabled(&self, enabled: bool) {
        self.script_enabled.set(enabled);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("url", &self.url().as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_swaps_window_and_detaches_old_document() {
        let frame = Frame::new(FrameId(1), Url::parse("https://a.example/").unwrap(), None);
        let first = frame.window();
        let first_doc = first.document();
        assert!(first_doc.document_frame().is_some());

        let second = frame.navigate(Url::parse("https://a.example/next").unwrap());
        assert!(!Rc::ptr_eq(&first, &second));
        assert!(first_doc.document_frame().is_none());
        assert_eq!(frame.url().path(), "/next");
    }

    #[test]
    fn main_frame_walks_to_the_top() {
        let top = Frame::new(FrameId(1), Url::parse("https://a.example/").unwrap(), None);
        let child = Frame::new(FrameId(2), Url::parse("https://b.example/").unwrap(), Some(&top));
        assert_eq!(child.main_frame().id(), FrameId(1));
        assert_eq!(top.main_frame().id(), FrameId(1));
    }
}
