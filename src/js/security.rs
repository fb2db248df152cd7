//! Same-origin gate for cross-context access.

use std::cell::Cell;
use std::rc::Rc;

use url::Url;

use crate::dom::{DomWindow, Node};
use crate::js::console::ConsoleMessage;
use crate::js::context::ExecutionContext;

/// Cheap stand-in for origin equality. `Default` always falls through to the
/// explicit comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityToken {
    Default,
    Origin(Rc<str>),
}

impl SecurityToken {
    pub fn for_document(document: Option<&Node>) -> Self {
        let Some(data) = document.and_then(Node::document_data) else {
            return SecurityToken::Default;
        };
        let origin = data.origin();
        if origin.domain_was_set_in_dom() {
            return SecurityToken::Default;
        }
        let token = origin.to_token_string();
        if token.is_empty() || token == "null" {
            return SecurityToken::Default;
        }
        SecurityToken::Origin(Rc::from(token))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, SecurityToken::Default)
    }
}

/// When a denial is reported to the page console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Now,
    /// Queued until the next safe delivery point.
    Later,
    Suppressed,
}

#[derive(Debug, Default)]
pub struct SecurityGate {
    explicit_checks: Cell<u64>,
}

impl SecurityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of explicit origin comparisons performed so far.
    pub fn explicit_checks(&self) -> u64 {
        self.explicit_checks.get()
    }

    pub fn check(&self, accessor: &ExecutionContext, target: &ExecutionContext) -> bool {
        if accessor.id() == target.id() {
            return true;
        }
        if let (SecurityToken::Origin(mine), SecurityToken::Origin(theirs)) =
            (accessor.token(), target.token())
        {
            if mine == theirs {
                return true;
            }
        }
        match (accessor.window(), target.window()) {
            (Some(mine), Some(theirs)) => self.can_access_private(&mine, &theirs),
            _ => false,
        }
    }

    /// Explicit origin comparison between the active window and a target window.
    pub fn can_access_private(&self, active: &DomWindow, target: &DomWindow) -> bool {
        self.explicit_checks.set(self.explicit_checks.get() + 1);
        if std::ptr::eq(active, target) {
            return true;
        }
        let target_origin = target.security_origin();
        if active.security_origin().can_access(&target_origin) {
            return true;
        }
        // A transiently blank document in the same frame.
        if target_origin.is_empty() {
            if let (Some(mine), Some(theirs)) = (active.frame(), target.frame()) {
                if Rc::ptr_eq(&mine, &theirs) {
                    return true;
                }
            }
        }
        false
    }
}

pub fn unsafe_access_message(target: &Url, source: &Url) -> ConsoleMessage {
    ConsoleMessage::new(
        format!(
            "Unsafe JavaScript attempt to access frame with URL {target} from frame with URL {source}. Domains, protocols and ports must match.\n"
        ),
        "",
        1,
    )
}
