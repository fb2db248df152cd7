//! Console diagnostics raised by the binding layer.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::embedder::Embedder;
use crate::frame::FrameId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub text: String,
    pub source_id: String,
    pub line: u32,
}

impl ConsoleMessage {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, line: u32) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            line,
        }
    }
}

/// Routes messages to the embedder. Messages raised where delivery is unsafe
/// are queued and drained, in order, ahead of the next delivery.
pub struct ConsoleMessageManager {
    delayed: RefCell<VecDeque<ConsoleMessage>>,
    embedder: Rc<dyn Embedder>,
}

impl ConsoleMessageManager {
    pub fn new(embedder: Rc<dyn Embedder>) -> Self {
        Self {
            delayed: RefCell::new(VecDeque::new()),
            embedder,
        }
    }

    pub fn add_message(&self, page: Option<FrameId>, message: ConsoleMessage) {
        self.process_delayed(page);
        match page {
            Some(page) => self.embedder.add_console_message(page, &message),
            None => tracing::debug!(text = %message.text, "console message dropped, no page"),
        }
    }

    pub fn add_delayed_message(&self, message: ConsoleMessage) {
        self.delayed.borrow_mut().push_back(message);
    }

    /// Delivers queued messages to `page`, or discards them when there is no page.
    pub fn process_delayed(&self, page: Option<FrameId>) {
        let queued = std::mem::take(&mut *self.delayed.borrow_mut());
        if queued.is_empty() {
            return;
        }
        let Some(page) = page else {
            tracing::debug!(count = queued.len(), "dropping delayed console messages");
            return;
        };
        for message in &queued {
            self.embedder.add_console_message(page, message);
        }
    }

    pub fn pending(&self) -> usize {
        self.delayed.borrow().len()
    }

    pub fn pending_messages(&self) -> Vec<ConsoleMessage> {
        self.delayed.borrow().iter().cloned().collect()
    }
}

/// Flushes delayed messages when created and again when dropped.
pub struct ConsoleMessageScope<'a> {
    manager: &'a ConsoleMessageManager,
    page: Option<FrameId>,
}

impl<'a> ConsoleMessageScope<'a> {
    pub fn new(manager: &'a ConsoleMessageManager, page: Option<FrameId>) -> Self {
        manager.process_delayed(page);
        Self { manager, page }
    }
}

impl Drop for ConsoleMessageScope<'_> {
    fn drop(&mut self) {
        self.manager.process_delayed(self.page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::RecordingEmbedder;

    #[test]
    fn delayed_messages_precede_new_ones() {
        let embedder = Rc::new(RecordingEmbedder::new());
        let manager = ConsoleMessageManager::new(embedder.clone());
        manager.add_delayed_message(ConsoleMessage::new("first", "", 1));
        manager.add_delayed_message(ConsoleMessage::new("second", "", 1));
        assert_eq!(manager.pending(), 2);

        manager.add_message(Some(FrameId(1)), ConsoleMessage::new("third", "a.js", 4));
        let texts: Vec<_> = embedder
            .messages()
            .into_iter()
            .map(|(_, message)| message.text)
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(manager.pending(), 0);
    }

    #[test]
    fn scope_without_page_discards_queue() {
        let embedder = Rc::new(RecordingEmbedder::new());
        let manager = ConsoleMessageManager::new(embedder.clone());
        manager.add_delayed_message(ConsoleMessage::new("lost", "", 1));
        {
            let _scope = ConsoleMessageScope::new(&manager, None);
            manager.add_delayed_message(ConsoleMessage::new("kept", "", 1));
        }
        assert!(embedder.messages().is_empty());
        assert_eq!(manager.pending(), 0);

        manager.add_delayed_message(ConsoleMessage::new("kept", "", 1));
        drop(ConsoleMessageScope::new(&manager, Some(FrameId(2))));
        assert_eq!(embedder.messages().len(), 1);
    }
}
