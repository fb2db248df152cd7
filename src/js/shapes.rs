//! Per-family resolution of a native object to its wrapper shape.

use crate::dom::{
    downcast, CollectionKind, CssRule, CssRuleKind, CssValue, DocumentFlavor, Event,
    HtmlCollection, NativeObject, Node, NodeKind, StyleSheet, WindowPart, WindowPartKind,
};
use crate::js::templates::slots;
use crate::js::wrapper_type::{html_element_type, svg_element_type, Family, WrapperType};

/// Extra wiring performed after a wrapper of a given shape is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialSetup {
    None,
    /// Documents refresh the frame's document wrapper. HTML documents also
    /// get the `document.all` marker.
    Document,
    /// The owner node wrapper is kept in a hidden slot.
    StyleSheetOwner,
    /// The wrapper is stored in the given slot of its window's wrapper.
    WindowReference(usize),
}

pub trait ShapeResolver {
    fn family(&self) -> Family;

    /// Most specific shape for `native`. Falls back to `declared` when the
    /// object is not of the family's concrete type.
    fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType;

    fn special_setup(&self, _native: &dyn NativeObject, _shape: WrapperType) -> SpecialSetup {
        SpecialSetup::None
    }
}

pub struct NodeShapes;

impl ShapeResolver for NodeShapes {
    fn family(&self) -> Family {
        Family::Node
    }

    fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        let Some(node) = downcast::<Node>(native) else {
            return declared;
        };
        match node.kind() {
            NodeKind::Element => {
                let name = node.local_name().unwrap_or_default();
                if node.is_html_element() {
                    html_element_type(name)
                } else if node.is_svg_element() {
                    svg_element_type(name)
                } else {
                    WrapperType::Element
                }
            }
            NodeKind::Document => match node.document_data().map(|data| data.flavor()) {
                Some(DocumentFlavor::Html) => WrapperType::HtmlDocument,
                Some(DocumentFlavor::Svg) => WrapperType::SvgDocument,
                _ => WrapperType::Document,
            },
            NodeKind::Attribute => WrapperType::Attr,
            NodeKind::Text => WrapperType::Text,
            NodeKind::CDataSection => WrapperType::CDataSection,
            NodeKind::EntityReference => WrapperType::EntityReference,
            NodeKind::Entity => WrapperType::Entity,
            NodeKind::ProcessingInstruction => WrapperType::ProcessingInstruction,
            NodeKind::Comment => WrapperType::Comment,
            NodeKind::DocumentType => WrapperType::DocumentType,
            NodeKind::DocumentFragment => WrapperType::DocumentFragment,
            NodeKind::Notation => WrapperType::Notation,
        }
    }

    fn special_setup(&self, _native: &dyn NativeObject, shape: WrapperType) -> SpecialSetup {
        match shape {
            WrapperType::Document | WrapperType::HtmlDocument | WrapperType::SvgDocument => {
                SpecialSetup::Document
            }
            _ => SpecialSetup::None,
        }
    }
}

pub struct EventShapes;

impl ShapeResolver for EventShapes {
    fn family(&self) -> Family {
        Family::Event
    }

    fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        let Some(event) = downcast::<Event>(native) else {
            return declared;
        };
        if event.is_ui_event() {
            if event.is_keyboard_event() {
                WrapperType::KeyboardEvent
            } else if event.is_text_event() {
                WrapperType::TextEvent
            } else if event.is_mouse_event() {
                WrapperType::MouseEvent
            } else if event.is_wheel_event() {
                WrapperType::WheelEvent
            } else if event.is_svg_zoom_event() {
                WrapperType::SvgZoomEvent
            } else {
                WrapperType::UiEvent
            }
        } else if event.is_mutation_event() {
            WrapperType::MutationEvent
        } else if event.is_overflow_event() {
            WrapperType::OverflowEvent
        } else if event.is_message_event() {
            WrapperType::MessageEvent
        } else if event.is_progress_event() {
            if event.is_xml_http_request_progress_event() {
                WrapperType::XmlHttpRequestProgressEvent
            } else {
                WrapperType::ProgressEvent
            }
        } else if event.is_animation_event() {
            WrapperType::WebKitAnimationEvent
        } else if event.is_transition_event() {
            WrapperType::WebKitTransitionEvent
        } else {
            WrapperType::Event
        }
    }
}

pub struct CssRuleShapes;

impl ShapeResolver for CssRuleShapes {
    fn family(&self) -> Family {
        Family::CssRule
    }

    fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        let Some(rule) = downcast::<CssRule>(native) else {
            return declared;
        };
        match rule.kind() {
            CssRuleKind::Style => WrapperType::CssStyleRule,
            CssRuleKind::Charset => WrapperType::CssCharsetRule,
            CssRuleKind::Import => WrapperType::CssImportRule,
            CssRuleKind::Media => WrapperType::CssMediaRule,
            CssRuleKind::FontFace => WrapperType::CssFontFaceRule,
            CssRuleKind::Page => WrapperType::CssPageRule,
            CssRuleKind::Variables => WrapperType::CssVariablesRule,
            CssRuleKind::Keyframes => WrapperType::WebKitCssKeyframesRule,
            CssRuleKind::Keyframe => WrapperType::WebKitCssKeyframeRule,
            CssRuleKind::Unknown => WrapperType::CssRule,
        }
    }
}

pub struct CssValueShapes;

impl ShapeResolver for CssValueShapes {
    fn family(&self) -> Family {
        Family::CssValue
    }

    fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        let Some(value) = downcast::<CssValue>(native) else {
            return declared;
        };
        // Transform before list, paint before color: both are subtypes.
        if value.is_transform_value() {
            WrapperType::WebKitCssTransformValue
        } else if value.is_value_list() {
            WrapperType::CssValueList
        } else if value.is_primitive_value() {
            WrapperType::CssPrimitiveValue
        } else if value.is_svg_paint() {
            WrapperType::SvgPaint
        } else if value.is_svg_color() {
            WrapperType::SvgColor
        } else {
            WrapperType::CssValue
        }
    }
}

pub struct StyleSheetShapes;

impl ShapeResolver for StyleSheetShapes {
    fn family(&self) -> Family {
        Family::StyleSheet
    }

    fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        match downcast::<StyleSheet>(native) {
            Some(sheet) if sheet.is_css_style_sheet() => WrapperType::CssStyleSheet,
            Some(_) => WrapperType::StyleSheet,
            None => declared,
        }
    }

    fn special_setup(&self, _native: &dyn NativeObject, _shape: WrapperType) -> SpecialSetup {
        SpecialSetup::StyleSheetOwner
    }
}

pub struct CollectionShapes;

impl ShapeResolver for CollectionShapes {
    fn family(&self) -> Family {
        Family::Collection
    }

    fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        match downcast::<HtmlCollection>(native).map(HtmlCollection::kind) {
            Some(CollectionKind::DocumentAll) => WrapperType::UndetectableHtmlCollection,
            Some(CollectionKind::Options) => WrapperType::HtmlOptionsCollection,
            Some(CollectionKind::Generic) => WrapperType::HtmlCollection,
            None => declared,
        }
    }
}

pub struct WindowPartShapes;

impl ShapeResolver for WindowPartShapes {
    fn family(&self) -> Family {
        Family::WindowPart
    }

    fn shape_for(&self, native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        let Some(part) = downcast::<WindowPart>(native) else {
            return declared;
        };
        match part.kind() {
            WindowPartKind::Console => WrapperType::Console,
            WindowPartKind::History => WrapperType::History,
            WindowPartKind::Navigator => WrapperType::Navigator,
            WindowPartKind::Screen => WrapperType::Screen,
            WindowPartKind::Location => WrapperType::Location,
            WindowPartKind::Selection => WrapperType::DomSelection,
            WindowPartKind::Bar(_) => WrapperType::BarInfo,
        }
    }

    fn special_setup(&self, native: &dyn NativeObject, _shape: WrapperType) -> SpecialSetup {
        match downcast::<WindowPart>(native) {
            Some(part) => SpecialSetup::WindowReference(slots::window_part(part.kind())),
            None => SpecialSetup::None,
        }
    }
}

/// Families whose declared type is already the concrete shape.
pub struct DeclaredShapes(pub Family);

impl ShapeResolver for DeclaredShapes {
    fn family(&self) -> Family {
        self.0
    }

    fn shape_for(&self, _native: &dyn NativeObject, declared: WrapperType) -> WrapperType {
        declared
    }
}

pub fn default_resolvers() -> Vec<Box<dyn ShapeResolver>> {
    vec![
        Box::new(NodeShapes),
        Box::new(EventShapes),
        Box::new(CssRuleShapes),
        Box::new(CssValueShapes),
        Box::new(StyleSheetShapes),
        Box::new(CollectionShapes),
        Box::new(WindowPartShapes),
        Box::new(DeclaredShapes(Family::Window)),
        Box::new(DeclaredShapes(Family::Active)),
        Box::new(DeclaredShapes(Family::Plain)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{CssValueKind, EventKind, Namespace};
    use url::Url;

    #[test]
    fn elements_resolve_by_namespace_and_tag() {
        let doc = Node::new_document(Url::parse("https://a.example/").unwrap(), DocumentFlavor::Html);
        let video = Node::create_element(&doc, "VIDEO");
        let circle = Node::create_element_ns(&doc, Namespace::Svg, "circle");
        let other = Node::create_element_ns(&doc, Namespace::Other, "thing");

        let shapes = NodeShapes;
        assert_eq!(
            shapes.shape_for(&*video, WrapperType::Element),
            WrapperType::HtmlVideoElement
        );
        assert_eq!(
            shapes.shape_for(&*circle, WrapperType::Element),
            WrapperType::SvgCircleElement
        );
        assert_eq!(shapes.shape_for(&*other, WrapperType::Element), WrapperType::Element);
        assert_eq!(shapes.shape_for(&*doc, WrapperType::Node), WrapperType::HtmlDocument);
        assert_eq!(
            shapes.special_setup(&*doc, WrapperType::HtmlDocument),
            SpecialSetup::Document
        );
    }

    #[test]
    fn event_chain_prefers_most_specific() {
        let shapes = EventShapes;
        let check = |kind, expected| {
            let event = Event::new(kind, "x");
            assert_eq!(shapes.shape_for(&*event, WrapperType::Event), expected);
        };
        check(EventKind::Keyboard, WrapperType::KeyboardEvent);
        check(EventKind::Wheel, WrapperType::WheelEvent);
        check(EventKind::Ui, WrapperType::UiEvent);
        check(
            EventKind::XmlHttpRequestProgress,
            WrapperType::XmlHttpRequestProgressEvent,
        );
        check(EventKind::Progress, WrapperType::ProgressEvent);
        check(EventKind::Plain, WrapperType::Event);
    }

    #[test]
    fn css_values_check_subtypes_first() {
        let shapes = CssValueShapes;
        let transform = CssValue::new(CssValueKind::Transform);
        let paint = CssValue::new(CssValueKind::SvgPaint);
        let inherit = CssValue::new(CssValueKind::Inherit);
        assert_eq!(
            shapes.shape_for(&*transform, WrapperType::CssValue),
            WrapperType::WebKitCssTransformValue
        );
        assert_eq!(shapes.shape_for(&*paint, WrapperType::CssValue), WrapperType::SvgPaint);
        assert_eq!(shapes.shape_for(&*inherit, WrapperType::CssValue), WrapperType::CssValue);
    }

    #[test]
    fn document_all_is_the_only_undetectable_collection() {
        let shapes = CollectionShapes;
        let all = HtmlCollection::new(CollectionKind::DocumentAll);
        let options = HtmlCollection::new(CollectionKind::Options);
        assert_eq!(
            shapes.shape_for(&*all, WrapperType::HtmlCollection),
            WrapperType::UndetectableHtmlCollection
        );
        assert_eq!(
            shapes.shape_for(&*options, WrapperType::HtmlCollection),
            WrapperType::HtmlOptionsCollection
        );
    }
}
