//! Wrapper templates, per-context boilerplates and the shape dispatch table.

use std::collections::HashMap;

use crate::dom::{BarKind, NativeObject, WindowPartKind};
use crate::js::context::ContextId;
use crate::js::heap::{Handle, HandleOwner, HeapObject, HeapValue, Persistent, WrapperHeap};
use crate::js::shapes::{default_resolvers, ShapeResolver, SpecialSetup};
use crate::js::wrapper_type::{Family, WrapperType};

/// Reserved internal slots.
pub mod slots {
    use super::{BarKind, WindowPartKind};

    pub const WINDOW_CONSOLE: usize = 0;
    pub const WINDOW_HISTORY: usize = 1;
    pub const WINDOW_NAVIGATOR: usize = 2;
    pub const WINDOW_SCREEN: usize = 3;
    pub const WINDOW_LOCATION: usize = 4;
    pub const WINDOW_SELECTION: usize = 5;
    pub const WINDOW_LOCATIONBAR: usize = 6;
    pub const WINDOW_MENUBAR: usize = 7;
    pub const WINDOW_PERSONALBAR: usize = 8;
    pub const WINDOW_SCROLLBARS: usize = 9;
    pub const WINDOW_STATUSBAR: usize = 10;
    pub const WINDOW_TOOLBAR: usize = 11;
    pub const WINDOW_SLOT_COUNT: usize = 12;

    pub const DOCUMENT_IMPLEMENTATION: usize = 0;
    pub const HTML_DOCUMENT_MARKER: usize = 1;
    pub const HTML_DOCUMENT_SHADOW: usize = 2;

    pub const STYLE_SHEET_OWNER_NODE: usize = 0;

    pub const MESSAGE_PORT_PEER: usize = 0;

    pub fn window_part(kind: WindowPartKind) -> usize {
        match kind {
            WindowPartKind::Console => WINDOW_CONSOLE,
            WindowPartKind::History => WINDOW_HISTORY,
            WindowPartKind::Navigator => WINDOW_NAVIGATOR,
            WindowPartKind::Screen => WINDOW_SCREEN,
            WindowPartKind::Location => WINDOW_LOCATION,
            WindowPartKind::Selection => WINDOW_SELECTION,
            WindowPartKind::Bar(BarKind::Locationbar) => WINDOW_LOCATIONBAR,
            WindowPartKind::Bar(BarKind::Menubar) => WINDOW_MENUBAR,
            WindowPartKind::Bar(BarKind::Personalbar) => WINDOW_PERSONALBAR,
            WindowPartKind::Bar(BarKind::Scrollbars) => WINDOW_SCROLLBARS,
            WindowPartKind::Bar(BarKind::Statusbar) => WINDOW_STATUSBAR,
            WindowPartKind::Bar(BarKind::Toolbar) => WINDOW_TOOLBAR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperTemplate {
    pub shape: WrapperType,
    pub interface: &'static str,
    pub parent: Option<WrapperType>,
    pub internal_field_count: usize,
    pub access_checked: bool,
    pub undetectable: bool,
}

impl WrapperTemplate {
    fn build(shape: WrapperType) -> Self {
        let internal_field_count = match shape {
            WrapperType::DomWindow => slots::WINDOW_SLOT_COUNT,
            WrapperType::HtmlDocument => slots::HTML_DOCUMENT_SHADOW + 1,
            WrapperType::Document | WrapperType::SvgDocument => slots::DOCUMENT_IMPLEMENTATION + 1,
            WrapperType::StyleSheet | WrapperType::CssStyleSheet => {
                slots::STYLE_SHEET_OWNER_NODE + 1
            }
            WrapperType::MessagePort => slots::MESSAGE_PORT_PEER + 1,
            _ => 0,
        };
        Self {
            shape,
            interface: shape.interface_name(),
            parent: shape.parent(),
            internal_field_count,
            access_checked: matches!(
                shape,
                WrapperType::DomWindow | WrapperType::Location | WrapperType::History
            ),
            undetectable: shape == WrapperType::UndetectableHtmlCollection,
        }
    }
}

/// Strong handles a context holds on its prototypes and boilerplates.
struct ContextTemplates {
    object_prototype: Persistent,
    prototypes: HashMap<WrapperType, Persistent>,
    boilerplates: HashMap<WrapperType, Persistent>,
}

pub struct WrapperTypeRegistry {
    resolvers: HashMap<Family, Box<dyn ShapeResolver>>,
    templates: HashMap<WrapperType, WrapperTemplate>,
    contexts: HashMap<ContextId, ContextTemplates>,
}

impl Default for WrapperTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WrapperTypeRegistry {
    pub fn new() -> Self {
        let resolvers = default_resolvers()
            .into_iter()
            .map(|resolver| (resolver.family(), resolver))
            .collect();
        Self {
            resolvers,
            templates: HashMap::new(),
            contexts: HashMap::new(),
        }
    }

    pub fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        match self.resolvers.get(&declared.family()) {
            Some(resolver) => resolver.shape_for(native, declared),
            None => declared,
        }
    }

    pub fn special_setup(&self, native: &dyn NativeObject, shape: WrapperType) -> SpecialSetup {
        match self.resolvers.get(&shape.family()) {
            Some(resolver) => resolver.special_setup(native, shape),
            None => SpecialSetup::None,
        }
    }

    pub fn template(&mut self, shape: WrapperType) -> WrapperTemplate {
        *self
            .templates
            .entry(shape)
            .or_insert_with(|| WrapperTemplate::build(shape))
    }

    /// Allocates the root prototype of a new context. Returns false when the
    /// heap refuses the allocation.
    pub fn install_context(&mut self, heap: &mut WrapperHeap, context: ContextId) -> bool {
        if self.contexts.contains_key(&context) {
            return true;
        }
        let Some(root) = heap.allocate(HeapObject::plain(Some(context))) else {
            return false;
        };
        let Some(object_prototype) = heap.persistent(root, HandleOwner::Context(context)) else {
            return false;
        };
        self.contexts.insert(
            context,
            ContextTemplates {
                object_prototype,
                prototypes: HashMap::new(),
                boilerplates: HashMap::new(),
            },
        );
        true
    }

    pub fn dispose_context(&mut self, heap: &mut WrapperHeap, context: ContextId) {
        let Some(templates) = self.contexts.remove(&context) else {
            return;
        };
        heap.dispose(templates.object_prototype);
        for persistent in templates
            .prototypes
            .into_values()
            .chain(templates.boilerplates.into_values())
        {
            heap.dispose(persistent);
        }
    }

    /// A new, untagged wrapper object of `shape` in `context`.
    pub fn instantiate(
        &mut self,
        heap: &mut WrapperHeap,
        context: ContextId,
        shape: WrapperType,
    ) -> Option<Handle> {
        let cached = self
            .contexts
            .get(&context)?
            .boilerplates
            .get(&shape)
            .and_then(|persistent| heap.persistent_target(*persistent));
        if let Some(boilerplate) = cached {
            return heap.clone_object(boilerplate);
        }

        let template = self.template(shape);
        let prototype = self.prototype_for(heap, context, shape)?;
        let boilerplate = heap.allocate(
            HeapObject::shaped(
                shape,
                Some(context),
                template.internal_field_count,
                template.access_checked,
                template.undetectable,
            )
            .with_prototype(Some(prototype)),
        )?;
        let persistent = heap.persistent(boilerplate, HandleOwner::Context(context))?;
        if let Some(templates) = self.contexts.get_mut(&context) {
            templates.boilerplates.insert(shape, persistent);
        }
        tracing::trace!(
            target: "script_proxy::context",
            context = %context,
            interface = template.interface,
            "built wrapper boilerplate"
        );
        heap.clone_object(boilerplate)
    }

    fn prototype_for(
        &mut self,
        heap: &mut WrapperHeap,
        context: ContextId,
        shape: WrapperType,
    ) -> Option<Handle> {
        let templates = self.contexts.get(&context)?;
        if let Some(existing) = templates
            .prototypes
            .get(&shape)
            .and_then(|persistent| heap.persistent_target(*persistent))
        {
            return Some(existing);
        }
        let object_prototype = heap.persistent_target(templates.object_prototype)?;
        let parent = match shape.parent() {
            Some(parent) => self.prototype_for(heap, context, parent)?,
            None => object_prototype,
        };
        let prototype = heap.allocate(HeapObject::plain(Some(context)).with_prototype(Some(parent)))?;
        heap.force_set(
            prototype,
            "constructorName",
            HeapValue::from(shape.interface_name()),
            true,
        );
        let persistent = heap.persistent(prototype, HandleOwner::Context(context))?;
        if let Some(templates) = self.contexts.get_mut(&context) {
            templates.prototypes.insert(shape, persistent);
        }
        Some(prototype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_carry_slots_and_flags() {
        let mut registry = WrapperTypeRegistry::new();
        let window = registry.template(WrapperType::DomWindow);
        assert_eq!(window.internal_field_count, slots::WINDOW_SLOT_COUNT);
        assert!(window.access_checked);
        assert_eq!(registry.template(WrapperType::HtmlDocument).internal_field_count, 3);
        assert_eq!(registry.template(WrapperType::SvgDocument).internal_field_count, 1);
        assert!(registry.template(WrapperType::Location).access_checked);
        assert!(!registry.template(WrapperType::Navigator).access_checked);

        let undetectable: Vec<_> = WrapperType::ALL
            .iter()
            .filter(|shape| registry.template(**shape).undetectable)
            .collect();
        assert_eq!(undetectable, vec![&WrapperType::UndetectableHtmlCollection]);
    }

    #[test]
    fn instances_clone_the_cached_boilerplate() {
        let mut heap = WrapperHeap::new(None);
        let mut registry = WrapperTypeRegistry::new();
        let context = ContextId(1);
        assert!(registry.install_context(&mut heap, context));

        let first = registry
            .instantiate(&mut heap, context, WrapperType::HtmlVideoElement)
            .unwrap();
        let after_first = heap.live_objects();
        let second = registry
            .instantiate(&mut heap, context, WrapperType::HtmlVideoElement)
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(heap.live_objects(), after_first + 1);

        let object = heap.get(second).unwrap();
        assert_eq!(object.shape(), Some(WrapperType::HtmlVideoElement));
        assert_eq!(
            heap.get_property(second, "constructorName"),
            HeapValue::from("HTMLVideoElement")
        );
    }

    #[test]
    fn disposing_a_context_releases_its_handles() {
        let mut heap = WrapperHeap::new(None);
        let mut registry = WrapperTypeRegistry::new();
        let context = ContextId(3);
        registry.install_context(&mut heap, context);
        registry.instantiate(&mut heap, context, WrapperType::MouseEvent);
        assert!(heap.handles_owned_by(HandleOwner::Context(context)) > 0);

        registry.dispose_context(&mut heap, context);
        assert_eq!(heap.handles_owned_by(HandleOwner::Context(context)), 0);
        assert!(registry.instantiate(&mut heap, context, WrapperType::MouseEvent).is_none());
    }
}
