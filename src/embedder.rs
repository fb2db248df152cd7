use std::cell::RefCell;

use crate::frame::FrameId;
use crate::js::ConsoleMessage;

/// Host-side sinks the proxy reports into.
pub trait Embedder {
    /// Delivers a console message to the page whose main frame is `page`.
    fn add_console_message(&self, page: FrameId, message: &ConsoleMessage);

    fn notify_out_of_memory(&self, frame: FrameId);

    fn did_create_script_context(&self, _frame: FrameId) {}

    fn did_destroy_script_context(&self, _frame: FrameId) {}

    fn window_object_available(&self, _frame: FrameId) {}
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default)]
pub struct TracingEmbedder;

impl Embedder for TracingEmbedder {
    fn add_console_message(&self, page: FrameId, message: &ConsoleMessage) {
        tracing::warn!(
            target: "quickjs",
            page = %page,
            source = %message.source_id,
            line = message.line,
            "{}",
            message.text.trim_end()
        );
    }

    fn notify_out_of_memory(&self, frame: FrameId) {
        tracing::error!(frame = %frame, "script engine ran out of memory");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextNotification {
    Created(FrameId),
    Destroyed(FrameId),
    WindowObjectAvailable(FrameId),
}

/// Keeps every report for later inspection.
#[derive(Debug, Default)]
pub struct RecordingEmbedder {
    messages: RefCell<Vec<(FrameId, ConsoleMessage)>>,
    out_of_memory: RefCell<Vec<FrameId>>,
    notifications: RefCell<Vec<ContextNotification>>,
}

impl RecordingEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(FrameId, ConsoleMessage)> {
        self.messages.borrow().clone()
    }

    pub fn out_of_memory_reports(&self) -> Vec<FrameId> {
        self.out_of_memory.borrow().clone()
    }

    pub fn notifications(&self) -> Vec<ContextNotification> {
        self.notifications.borrow().clone()
    }

    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
        self.out_of_memory.borrow_mut().clear();
        self.notifications.borrow_mut().clear();
    }
}

impl Embedder for RecordingEmbedder {
    fn add_console_message(&self, page: FrameId, message: &ConsoleMessage) {
        self.messages.borrow_mut().push((page, message.clone()));
    }

    fn notify_out_of_memory(&self, frame: FrameId) {
        self.out_of_memory.borrow_mut().push(frame);
    }

    fn did_create_script_context(&self, frame: FrameId) {
        self.notifications
            .borrow_mut()
            .push(ContextNotification::Created(frame));
    }

    fn did_destroy_script_context(&self, frame: FrameId) {
        self.notifications
            .borrow_mut()
            .push(ContextNotification::Destroyed(frame));
    }

    fn window_object_available(&self, frame: FrameId) {
        self.notifications
            .borrow_mut()
            .push(ContextNotification::WindowObjectAvailable(frame));
    }
}
