use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use url::Url;

use super::{DocumentFlavor, NativeObject, Node};
use crate::frame::Frame;
use crate::origin::SecurityOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarKind {
    Locationbar,
    Menubar,
    Personalbar,
    Scrollbars,
    Statusbar,
    Toolbar,
}

/// Objects reachable from a window whose wrappers live as long as the window's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowPartKind {
    Console,
    History,
    Navigator,
    Screen,
    Location,
    Selection,
    Bar(BarKind),
}

pub struct WindowPart {
    kind: WindowPartKind,
    frame: Weak<Frame>,
}

impl WindowPart {
    pub fn kind(&self) -> WindowPartKind {
        self.kind
    }

    pub fn frame(&self) -> Option<Rc<Frame>> {
        self.frame.upgrade()
    }
}

impl NativeObject for WindowPart {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        match self.kind {
            WindowPartKind::Console => "Console",
            WindowPartKind::History => "History",
            WindowPartKind::Navigator => "Navigator",
            WindowPartKind::Screen => "Screen",
            WindowPartKind::Location => "Location",
            WindowPartKind::Selection => "DOMSelection",
            WindowPartKind::Bar(_) => "BarInfo",
        }
    }
}

/// The native window of one page load. Navigation replaces it.
pub struct DomWindow {
    frame: Weak<Frame>,
    url: Url,
    document: Rc<Node>,
    parts: RefCell<Vec<Rc<WindowPart>>>,
}

impl DomWindow {
    pub(crate) fn new(frame: Weak<Frame>, url: Url) -> Rc<DomWindow> {
        let document = Node::new_document(url.clone(), DocumentFlavor::Html);
        if let Some(data) = document.document_data() {
            data.set_frame(frame.clone());
        }
        Rc::new(DomWindow {
            frame,
            url,
            document,
            parts: RefCell::new(Vec::new()),
        })
    }

    pub fn frame(&self) -> Option<Rc<Frame>> {
        self.frame.upgrade()
    }

    pub fn document(&self) -> Rc<Node> {
        Rc::clone(&self.document)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn security_origin(&self) -> SecurityOrigin {
        self.document
            .document_data()
            .map(|data| data.origin().clone())
            .unwrap_or_else(SecurityOrigin::empty)
    }

    /// Returns the window part of the given kind, creating it on first use.
    pub fn part(&self, kind: WindowPartKind) -> Rc<WindowPart> {
        let mut parts = self.parts.borrow_mut();
        if let Some(existing) = parts.iter().find(|part| part.kind == kind) {
            return Rc::clone(existing);
        }
        let part = Rc::new(WindowPart {
            kind,
            frame: self.frame.clone(),
        });
        parts.push(Rc::clone(&part));
        part
    }

    pub(crate) fn detach_document(&self) {
        if let Some(data) = self.document.document_data() {
            data.set_frame(Weak::new());
        }
    }
}

impl NativeObject for DomWindow {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "DOMWindow"
    }
}
