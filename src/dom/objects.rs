use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::{NativeObject, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Plain,
    Ui,
    Keyboard,
    Text,
    Mouse,
    Wheel,
    SvgZoom,
    Mutation,
    Overflow,
    Message,
    Progress,
    XmlHttpRequestProgress,
    Animation,
    Transition,
}

pub struct Event {
    kind: EventKind,
    event_type: String,
}

impl Event {
    pub fn new(kind: EventKind, event_type: &str) -> Rc<Event> {
        Rc::new(Event {
            kind,
            event_type: event_type.to_string(),
        })
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn is_ui_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Ui
                | EventKind::Keyboard
                | EventKind::Text
                | EventKind::Mouse
                | EventKind::Wheel
                | EventKind::SvgZoom
        )
    }

    pub fn is_keyboard_event(&self) -> bool {
        self.kind == EventKind::Keyboard
    }

    pub fn is_text_event(&self) -> bool {
        self.kind == EventKind::Text
    }

    pub fn is_mouse_event(&self) -> bool {
        self.kind == EventKind::Mouse
    }

    pub fn is_wheel_event(&self) -> bool {
        self.kind == EventKind::Wheel
    }

    pub fn is_svg_zoom_event(&self) -> bool {
        self.kind == EventKind::SvgZoom
    }

    pub fn is_mutation_event(&self) -> bool {
        self.kind == EventKind::Mutation
    }

    pub fn is_overflow_event(&self) -> bool {
        self.kind == EventKind::Overflow
    }

    pub fn is_message_event(&self) -> bool {
        self.kind == EventKind::Message
    }

    pub fn is_progress_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Progress | EventKind::XmlHttpRequestProgress
        )
    }

    pub fn is_xml_http_request_progress_event(&self) -> bool {
        self.kind == EventKind::XmlHttpRequestProgress
    }

    pub fn is_animation_event(&self) -> bool {
        self.kind == EventKind::Animation
    }

    pub fn is_transition_event(&self) -> bool {
        self.kind == EventKind::Transition
    }
}

impl NativeObject for Event {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "Event"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssRuleKind {
    Unknown,
    Style,
    Charset,
    Import,
    Media,
    FontFace,
    Page,
    Variables,
    Keyframes,
    Keyframe,
}

pub struct CssRule {
    kind: CssRuleKind,
}

impl CssRule {
    pub fn new(kind: CssRuleKind) -> Rc<CssRule> {
        Rc::new(CssRule { kind })
    }

    pub fn kind(&self) -> CssRuleKind {
        self.kind
    }
}

impl NativeObject for CssRule {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "CSSRule"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssValueKind {
    Inherit,
    Primitive,
    List,
    Transform,
    SvgColor,
    SvgPaint,
    Custom,
}

pub struct CssValue {
    kind: CssValueKind,
}

impl CssValue {
    pub fn new(kind: CssValueKind) -> Rc<CssValue> {
        Rc::new(CssValue { kind })
    }

    pub fn is_transform_value(&self) -> bool {
        self.kind == CssValueKind::Transform
    }

    /// Transform values are lists too.
    pub fn is_value_list(&self) -> bool {
        matches!(self.kind, CssValueKind::List | CssValueKind::Transform)
    }

    pub fn is_primitive_value(&self) -> bool {
        self.kind == CssValueKind::Primitive
    }

    pub fn is_svg_paint(&self) -> bool {
        self.kind == CssValueKind::SvgPaint
    }

    /// Paint values are colors too.
    pub fn is_svg_color(&self) -> bool {
        matches!(self.kind, CssValueKind::SvgColor | CssValueKind::SvgPaint)
    }
}

impl NativeObject for CssValue {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "CSSValue"
    }
}

pub struct StyleSheet {
    css: bool,
    owner: RefCell<Weak<Node>>,
}

impl StyleSheet {
    pub fn new(css: bool, owner: Option<&Rc<Node>>) -> Rc<StyleSheet> {
        Rc::new(StyleSheet {
            css,
            owner: RefCell::new(owner.map(Rc::downgrade).unwrap_or_default()),
        })
    }

    pub fn is_css_style_sheet(&self) -> bool {
        self.css
    }

    pub fn owner_node(&self) -> Option<Rc<Node>> {
        self.owner.borrow().upgrade()
    }

    pub fn clear_owner_node(&self) {
        *self.owner.borrow_mut() = Weak::new();
    }
}

impl NativeObject for StyleSheet {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "StyleSheet"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Generic,
    Options,
    /// The legacy `document.all` collection.
    DocumentAll,
}

pub struct HtmlCollection {
    kind: CollectionKind,
}

impl HtmlCollection {
    pub fn new(kind: CollectionKind) -> Rc<HtmlCollection> {
        Rc::new(HtmlCollection { kind })
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }
}

impl NativeObject for HtmlCollection {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "HTMLCollection"
    }
}

#[derive(Default)]
pub struct DomImplementation;

impl DomImplementation {
    pub fn new() -> Rc<DomImplementation> {
        Rc::new(DomImplementation)
    }
}

impl NativeObject for DomImplementation {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "DOMImplementation"
    }
}

#[derive(Default)]
pub struct XmlHttpRequest {
    in_flight: Cell<bool>,
}

impl XmlHttpRequest {
    pub fn new() -> Rc<XmlHttpRequest> {
        Rc::new(XmlHttpRequest::default())
    }

    pub fn send(&self) {
        self.in_flight.set(true);
    }

    pub fn finish(&self) {
        self.in_flight.set(false);
    }
}

impl NativeObject for XmlHttpRequest {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "XMLHttpRequest"
    }

    fn is_active(&self) -> bool {
        true
    }

    fn has_pending_activity(&self) -> bool {
        self.in_flight.get()
    }
}

/// One end of a message channel.
#[derive(Default)]
pub struct MessagePort {
    peer: RefCell<Weak<MessagePort>>,
    remote: Cell<bool>,
    queued: Cell<usize>,
}

impl MessagePort {
    pub fn new() -> Rc<MessagePort> {
        Rc::new(MessagePort::default())
    }

    pub fn entangle(left: &Rc<MessagePort>, right: &Rc<MessagePort>) {
        *left.peer.borrow_mut() = Rc::downgrade(right);
        *right.peer.borrow_mut() = Rc::downgrade(left);
    }

    /// Entangles with a port living in another process.
    pub fn entangle_remotely(&self) {
        *self.peer.borrow_mut() = Weak::new();
        self.remote.set(true);
    }

    pub fn close(&self) {
        if let Some(peer) = self.locally_entangled_port() {
            *peer.peer.borrow_mut() = Weak::new();
        }
        *self.peer.borrow_mut() = Weak::new();
        self.remote.set(false);
    }

    pub fn locally_entangled_port(&self) -> Option<Rc<MessagePort>> {
        self.peer.borrow().upgrade()
    }

    pub fn is_entangled(&self) -> bool {
        self.remote.get() || self.locally_entangled_port().is_some()
    }

    pub fn enqueue_message(&self) {
        self.queued.set(self.queued.get() + 1);
    }

    pub fn dispatch_messages(&self) {
        self.queued.set(0);
    }
}

impl NativeObject for MessagePort {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_label(&self) -> &'static str {
        "MessagePort"
    }

    fn is_active(&self) -> bool {
        true
    }

    fn has_pending_activity(&self) -> bool {
        self.queued.get() > 0
    }
}
