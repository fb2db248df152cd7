//! Closed set of wrapper shapes and the static tag tables used to resolve them.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Dispatch family. Every family has one shape resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Node,
    Event,
    CssRule,
    CssValue,
    StyleSheet,
    Collection,
    Window,
    WindowPart,
    Active,
    Plain,
}

macro_rules! wrapper_types {
    ($($variant:ident $(: $parent:ident)? => $name:literal in $family:ident),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum WrapperType {
            $($variant),*
        }

        impl WrapperType {
            pub const ALL: &'static [WrapperType] = &[$(WrapperType::$variant),*];

            /// Script-visible interface name.
            pub fn interface_name(self) -> &'static str {
                match self {
                    $(WrapperType::$variant => $name),*
                }
            }

            pub fn family(self) -> Family {
                match self {
                    $(WrapperType::$variant => Family::$family),*
                }
            }

            /// Interface this one inherits from.
            pub fn parent(self) -> Option<WrapperType> {
                match self {
                    $(WrapperType::$variant => wrapper_types!(@parent $($parent)?)),*
                }
            }
        }
    };
    (@parent) => { None };
    (@parent $parent:ident) => { Some(WrapperType::$parent) };
}

wrapper_types! {
    Node => "Node" in Node,
    Element: Node => "Element" in Node,
    Attr: Node => "Attr" in Node,
    Text: Node => "Text" in Node,
    CDataSection: Text => "CDATASection" in Node,
    Comment: Node => "Comment" in Node,
    EntityReference: Node => "EntityReference" in Node,
    Entity: Node => "Entity" in Node,
    ProcessingInstruction: Node => "ProcessingInstruction" in Node,
    Document: Node => "Document" in Node,
    HtmlDocument: Document => "HTMLDocument" in Node,
    SvgDocument: Document => "SVGDocument" in Node,
    DocumentType: Node => "DocumentType" in Node,
    DocumentFragment: Node => "DocumentFragment" in Node,
    Notation: Node => "Notation" in Node,

    HtmlElement: Element => "HTMLElement" in Node,
    HtmlAnchorElement: HtmlElement => "HTMLAnchorElement" in Node,
    HtmlAppletElement: HtmlElement => "HTMLAppletElement" in Node,
    HtmlAreaElement: HtmlElement => "HTMLAreaElement" in Node,
    HtmlBaseElement: HtmlElement => "HTMLBaseElement" in Node,
    HtmlBaseFontElement: HtmlElement => "HTMLBaseFontElement" in Node,
    HtmlBlockquoteElement: HtmlElement => "HTMLBlockquoteElement" in Node,
    HtmlBodyElement: HtmlElement => "HTMLBodyElement" in Node,
    HtmlBrElement: HtmlElement => "HTMLBRElement" in Node,
    HtmlButtonElement: HtmlElement => "HTMLButtonElement" in Node,
    HtmlCanvasElement: HtmlElement => "HTMLCanvasElement" in Node,
    HtmlDirectoryElement: HtmlElement => "HTMLDirectoryElement" in Node,
    HtmlDivElement: HtmlElement => "HTMLDivElement" in Node,
    HtmlDListElement: HtmlElement => "HTMLDListElement" in Node,
    HtmlEmbedElement: HtmlElement => "HTMLEmbedElement" in Node,
    HtmlFieldSetElement: HtmlElement => "HTMLFieldSetElement" in Node,
    HtmlFontElement: HtmlElement => "HTMLFontElement" in Node,
    HtmlFormElement: HtmlElement => "HTMLFormElement" in Node,
    HtmlFrameElement: HtmlElement => "HTMLFrameElement" in Node,
    HtmlFrameSetElement: HtmlElement => "HTMLFrameSetElement" in Node,
    HtmlHeadingElement: HtmlElement => "HTMLHeadingElement" in Node,
    HtmlHeadElement: HtmlElement => "HTMLHeadElement" in Node,
    HtmlHrElement: HtmlElement => "HTMLHRElement" in Node,
    HtmlHtmlElement: HtmlElement => "HTMLHtmlElement" in Node,
    HtmlIFrameElement: HtmlElement => "HTMLIFrameElement" in Node,
    HtmlImageElement: HtmlElement => "HTMLImageElement" in Node,
    HtmlInputElement: HtmlElement => "HTMLInputElement" in Node,
    HtmlIsIndexElement: HtmlElement => "HTMLIsIndexElement" in Node,
    HtmlLabelElement: HtmlElement => "HTMLLabelElement" in Node,
    HtmlLegendElement: HtmlElement => "HTMLLegendElement" in Node,
    HtmlLiElement: HtmlElement => "HTMLLIElement" in Node,
    HtmlLinkElement: HtmlElement => "HTMLLinkElement" in Node,
    HtmlMapElement: HtmlElement => "HTMLMapElement" in Node,
    HtmlMarqueeElement: HtmlElement => "HTMLMarqueeElement" in Node,
    HtmlMediaElement: HtmlElement => "HTMLMediaElement" in Node,
    HtmlAudioElement: HtmlMediaElement => "HTMLAudioElement" in Node,
    HtmlVideoElement: HtmlMediaElement => "HTMLVideoElement" in Node,
    HtmlMenuElement: HtmlElement => "HTMLMenuElement" in Node,
    HtmlMetaElement: HtmlElement => "HTMLMetaElement" in Node,
    HtmlModElement: HtmlElement => "HTMLModElement" in Node,
    HtmlObjectElement: HtmlElement => "HTMLObjectElement" in Node,
    HtmlOListElement: HtmlElement => "HTMLOListElement" in Node,
    HtmlOptGroupElement: HtmlElement => "HTMLOptGroupElement" in Node,
    HtmlOptionElement: HtmlElement => "HTMLOptionElement" in Node,
    HtmlParagraphElement: HtmlElement => "HTMLParagraphElement" in Node,
    HtmlParamElement: HtmlElement => "HTMLParamElement" in Node,
    HtmlPreElement: HtmlElement => "HTMLPreElement" in Node,
    HtmlQuoteElement: HtmlElement => "HTMLQuoteElement" in Node,
    HtmlScriptElement: HtmlElement => "HTMLScriptElement" in Node,
    HtmlSelectElement: HtmlElement => "HTMLSelectElement" in Node,
    HtmlSourceElement: HtmlElement => "HTMLSourceElement" in Node,
    HtmlStyleElement: HtmlElement => "HTMLStyleElement" in Node,
    HtmlTableCaptionElement: HtmlElement => "HTMLTableCaptionElement" in Node,
    HtmlTableCellElement: HtmlElement => "HTMLTableCellElement" in Node,
    HtmlTableColElement: HtmlElement => "HTMLTableColElement" in Node,
    HtmlTableElement: HtmlElement => "HTMLTableElement" in Node,
    HtmlTableRowElement: HtmlElement => "HTMLTableRowElement" in Node,
    HtmlTableSectionElement: HtmlElement => "HTMLTableSectionElement" in Node,
    HtmlTextAreaElement: HtmlElement => "HTMLTextAreaElement" in Node,
    HtmlTitleElement: HtmlElement => "HTMLTitleElement" in Node,
    HtmlUListElement: HtmlElement => "HTMLUListElement" in Node,

    SvgElement: Element => "SVGElement" in Node,
    SvgSvgElement: SvgElement => "SVGSVGElement" in Node,
    SvgGElement: SvgElement => "SVGGElement" in Node,
    SvgDefsElement: SvgElement => "SVGDefsElement" in Node,
    SvgPathElement: SvgElement => "SVGPathElement" in Node,
    SvgRectElement: SvgElement => "SVGRectElement" in Node,
    SvgCircleElement: SvgElement => "SVGCircleElement" in Node,
    SvgEllipseElement: SvgElement => "SVGEllipseElement" in Node,
    SvgLineElement: SvgElement => "SVGLineElement" in Node,
    SvgPolylineElement: SvgElement => "SVGPolylineElement" in Node,
    SvgPolygonElement: SvgElement => "SVGPolygonElement" in Node,
    SvgTextElement: SvgElement => "SVGTextElement" in Node,
    SvgUseElement: SvgElement => "SVGUseElement" in Node,
    SvgImageElement: SvgElement => "SVGImageElement" in Node,
    SvgLinearGradientElement: SvgElement => "SVGLinearGradientElement" in Node,
    SvgStopElement: SvgElement => "SVGStopElement" in Node,

    Event => "Event" in Event,
    UiEvent: Event => "UIEvent" in Event,
    KeyboardEvent: UiEvent => "KeyboardEvent" in Event,
    TextEvent: UiEvent => "TextEvent" in Event,
    MouseEvent: UiEvent => "MouseEvent" in Event,
    WheelEvent: UiEvent => "WheelEvent" in Event,
    SvgZoomEvent: UiEvent => "SVGZoomEvent" in Event,
    MutationEvent: Event => "MutationEvent" in Event,
    OverflowEvent: Event => "OverflowEvent" in Event,
    MessageEvent: Event => "MessageEvent" in Event,
    ProgressEvent: Event => "ProgressEvent" in Event,
    XmlHttpRequestProgressEvent: ProgressEvent => "XMLHttpRequestProgressEvent" in Event,
    WebKitAnimationEvent: Event => "WebKitAnimationEvent" in Event,
    WebKitTransitionEvent: Event => "WebKitTransitionEvent" in Event,

    CssRule => "CSSRule" in CssRule,
    CssStyleRule: CssRule => "CSSStyleRule" in CssRule,
    CssCharsetRule: CssRule => "CSSCharsetRule" in CssRule,
    CssImportRule: CssRule => "CSSImportRule" in CssRule,
    CssMediaRule: CssRule => "CSSMediaRule" in CssRule,
    CssFontFaceRule: CssRule => "CSSFontFaceRule" in CssRule,
    CssPageRule: CssRule => "CSSPageRule" in CssRule,
    CssVariablesRule: CssRule => "CSSVariablesRule" in CssRule,
    WebKitCssKeyframesRule: CssRule => "WebKitCSSKeyframesRule" in CssRule,
    WebKitCssKeyframeRule: CssRule => "WebKitCSSKeyframeRule" in CssRule,

    CssValue => "CSSValue" in CssValue,
    CssPrimitiveValue: CssValue => "CSSPrimitiveValue" in CssValue,
    CssValueList: CssValue => "CSSValueList" in CssValue,
    WebKitCssTransformValue: CssValueList => "WebKitCSSTransformValue" in CssValue,
    SvgColor: CssValue => "SVGColor" in CssValue,
    SvgPaint: SvgColor => "SVGPaint" in CssValue,

    StyleSheet => "StyleSheet" in StyleSheet,
    CssStyleSheet: StyleSheet => "CSSStyleSheet" in StyleSheet,

    HtmlCollection => "HTMLCollection" in Collection,
    HtmlOptionsCollection: HtmlCollection => "HTMLOptionsCollection" in Collection,
    UndetectableHtmlCollection: HtmlCollection => "HTMLCollection" in Collection,

    DomWindow => "DOMWindow" in Window,

    Console => "Console" in WindowPart,
    History => "History" in WindowPart,
    Navigator => "Navigator" in WindowPart,
    Screen => "Screen" in WindowPart,
    Location => "Location" in WindowPart,
    DomSelection => "DOMSelection" in WindowPart,
    BarInfo => "BarInfo" in WindowPart,

    XmlHttpRequest => "XMLHttpRequest" in Active,
    MessagePort => "MessagePort" in Active,

    DomImplementation => "DOMImplementation" in Plain,
}

impl WrapperType {
    pub fn is_node(self) -> bool {
        self.family() == Family::Node
    }

    pub fn is_active(self) -> bool {
        self.family() == Family::Active
    }
}

static HTML_TAGS: OnceLock<HashMap<&'static str, WrapperType>> = OnceLock::new();
static SVG_TAGS: OnceLock<HashMap<&'static str, WrapperType>> = OnceLock::new();

/// Wrapper shape for an HTML element's local name. Unknown tags map to
/// [`WrapperType::HtmlElement`].
pub fn html_element_type(local_name: &str) -> WrapperType {
    html_tags()
        .get(local_name)
        .copied()
        .unwrap_or(WrapperType::HtmlElement)
}

/// Wrapper shape for an SVG element's local name. Unknown tags map to
/// [`WrapperType::SvgElement`].
pub fn svg_element_type(local_name: &str) -> WrapperType {
    svg_tags()
        .get(local_name)
        .copied()
        .unwrap_or(WrapperType::SvgElement)
}

fn html_tags() -> &'static HashMap<&'static str, WrapperType> {
    HTML_TAGS.get_or_init(|| {
        use WrapperType::*;
        let entries: &[(&str, WrapperType)] = &[
            ("a", HtmlAnchorElement),
            ("applet", HtmlAppletElement),
            ("area", HtmlAreaElement),
            ("audio", HtmlAudioElement),
            ("base", HtmlBaseElement),
            ("basefont", HtmlBaseFontElement),
            ("blockquote", HtmlBlockquoteElement),
            ("body", HtmlBodyElement),
            ("br", HtmlBrElement),
            ("button", HtmlButtonElement),
            ("canvas", HtmlCanvasElement),
            ("caption", HtmlTableCaptionElement),
            ("col", HtmlTableColElement),
            ("colgroup", HtmlTableColElement),
            ("del", HtmlModElement),
            ("dir", HtmlDirectoryElement),
            ("div", HtmlDivElement),
            ("dl", HtmlDListElement),
            ("embed", HtmlEmbedElement),
            ("fieldset", HtmlFieldSetElement),
            ("font", HtmlFontElement),
            ("form", HtmlFormElement),
            ("frame", HtmlFrameElement),
            ("frameset", HtmlFrameSetElement),
            ("h1", HtmlHeadingElement),
            ("h2", HtmlHeadingElement),
            ("h3", HtmlHeadingElement),
            ("h4", HtmlHeadingElement),
            ("h5", HtmlHeadingElement),
            ("h6", HtmlHeadingElement),
            ("head", HtmlHeadElement),
            ("hr", HtmlHrElement),
            ("html", HtmlHtmlElement),
            ("iframe", HtmlIFrameElement),
            ("image", HtmlImageElement),
            ("img", HtmlImageElement),
            ("input", HtmlInputElement),
            ("ins", HtmlModElement),
            ("isindex", HtmlIsIndexElement),
            ("label", HtmlLabelElement),
            ("legend", HtmlLegendElement),
            ("li", HtmlLiElement),
            ("link", HtmlLinkElement),
            ("listing", HtmlPreElement),
            ("map", HtmlMapElement),
            ("marquee", HtmlMarqueeElement),
            ("menu", HtmlMenuElement),
            ("meta", HtmlMetaElement),
            ("object", HtmlObjectElement),
            ("ol", HtmlOListElement),
            ("optgroup", HtmlOptGroupElement),
            ("option", HtmlOptionElement),
            ("p", HtmlParagraphElement),
            ("param", HtmlParamElement),
            ("pre", HtmlPreElement),
            ("q", HtmlQuoteElement),
            ("script", HtmlScriptElement),
            ("select", HtmlSelectElement),
            ("source", HtmlSourceElement),
            ("style", HtmlStyleElement),
            ("table", HtmlTableElement),
            ("tbody", HtmlTableSectionElement),
            ("td", HtmlTableCellElement),
            ("textarea", HtmlTextAreaElement),
            ("tfoot", HtmlTableSectionElement),
            ("th", HtmlTableCellElement),
            ("thead", HtmlTableSectionElement),
            ("title", HtmlTitleElement),
            ("tr", HtmlTableRowElement),
            ("ul", HtmlUListElement),
            ("video", HtmlVideoElement),
            ("xmp", HtmlPreElement),
        ];
        entries.iter().copied().collect()
    })
}

fn svg_tags() -> &'static HashMap<&'static str, WrapperType> {
    SVG_TAGS.get_or_init(|| {
        use WrapperType::*;
        let entries: &[(&str, WrapperType)] = &[
            ("circle", SvgCircleElement),
            ("defs", SvgDefsElement),
            ("ellipse", SvgEllipseElement),
            ("g", SvgGElement),
            ("image", SvgImageElement),
            ("line", SvgLineElement),
            ("linearGradient", SvgLinearGradientElement),
            ("path", SvgPathElement),
            ("polygon", SvgPolygonElement),
            ("polyline", SvgPolylineElement),
            ("rect", SvgRectElement),
            ("stop", SvgStopElement),
            ("svg", SvgSvgElement),
            ("text", SvgTextElement),
            ("use", SvgUseElement),
        ];
        entries.iter().copied().collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_tags_resolve_with_generic_fallback() {
        assert_eq!(html_element_type("video"), WrapperType::HtmlVideoElement);
        assert_eq!(html_element_type("h4"), WrapperType::HtmlHeadingElement);
        assert_eq!(html_element_type("blink"), WrapperType::HtmlElement);
        assert_eq!(svg_element_type("rect"), WrapperType::SvgRectElement);
        assert_eq!(svg_element_type("feBlend"), WrapperType::SvgElement);
    }

    #[test]
    fn parent_chains_terminate_within_their_family() {
        for ty in WrapperType::ALL {
            let mut current = *ty;
            let mut steps = 0;
            while let Some(parent) = current.parent() {
                assert_eq!(parent.family(), ty.family(), "{ty:?}");
                current = parent;
                steps += 1;
                assert!(steps < 8);
            }
        }
        assert_eq!(
            WrapperType::HtmlVideoElement.parent(),
            Some(WrapperType::HtmlMediaElement)
        );
    }
}
