//! Native object graph the proxy wraps.
//!
//! These types stand in for the document layer: reference-counted objects with
//! stable addresses, parent/child traversal, and the handful of queries the
//! binding layer needs (pending activity, owning frame, kind tags).

mod node;
mod objects;
mod window;

use std::any::Any;
use std::fmt;
use std::rc::Rc;

pub use node::{DocumentData, DocumentFlavor, Namespace, Node, NodeKind};
pub use objects::{
    CollectionKind, CssRule, CssRuleKind, CssValue, CssValueKind, DomImplementation, Event,
    EventKind, HtmlCollection, MessagePort, StyleSheet, XmlHttpRequest,
};
pub use window::{BarKind, DomWindow, WindowPart, WindowPartKind};

/// Any externally owned object that can be exposed to script.
pub trait NativeObject: Any {
    fn as_any(&self) -> &dyn Any;

    /// Short name used in logs.
    fn type_label(&self) -> &'static str;

    /// Objects that may fire callbacks later (network requests, ports).
    fn is_active(&self) -> bool {
        false
    }

    fn has_pending_activity(&self) -> bool {
        false
    }
}

pub type NativeRef = Rc<dyn NativeObject>;

/// Address-based identity of a native object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(usize);

impl NativeId {
    pub fn of<T: ?Sized>(object: &Rc<T>) -> Self {
        NativeId(Rc::as_ptr(object) as *const () as usize)
    }

    pub(crate) fn of_ref<T: ?Sized>(object: &T) -> Self {
        NativeId(object as *const T as *const () as usize)
    }

    pub fn address(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeId({:#x})", self.0)
    }
}

pub fn downcast<T: NativeObject>(native: &dyn NativeObject) -> Option<&T> {
    native.as_any().downcast_ref::<T>()
}
