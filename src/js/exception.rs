//! Native failures raised into script.
//!
//! Host functions report failures either as one of the standard error
//! constructors or as a numeric DOM exception code. Codes are partitioned
//! into ranges, one per exception interface.

use rquickjs::function::Constructor;
use rquickjs::{Ctx, Error as JsError, Object, Value};

const EVENT_EXCEPTION_OFFSET: i32 = 100;
const RANGE_EXCEPTION_OFFSET: i32 = 200;
const SVG_EXCEPTION_OFFSET: i32 = 300;
const XPATH_EXCEPTION_OFFSET: i32 = 400;
const XML_HTTP_REQUEST_EXCEPTION_OFFSET: i32 = 500;
const XML_HTTP_REQUEST_EXCEPTION_MAX: i32 = 699;

/// Standard error constructors a host function can throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    Range,
    Reference,
    Syntax,
    Type,
    General,
}

impl ScriptErrorKind {
    pub fn constructor_name(self) -> &'static str {
        match self {
            ScriptErrorKind::Range => "RangeError",
            ScriptErrorKind::Reference => "ReferenceError",
            ScriptErrorKind::Syntax => "SyntaxError",
            ScriptErrorKind::Type => "TypeError",
            ScriptErrorKind::General => "Error",
        }
    }
}

/// The interface a DOM exception code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomExceptionType {
    Dom,
    Range,
    Event,
    XmlHttpRequest,
    Svg,
    XPath,
}

impl DomExceptionType {
    pub fn interface_name(self) -> &'static str {
        match self {
            DomExceptionType::Dom => "DOMException",
            DomExceptionType::Range => "RangeException",
            DomExceptionType::Event => "EventException",
            DomExceptionType::XmlHttpRequest => "XMLHttpRequestException",
            DomExceptionType::Svg => "SVGException",
            DomExceptionType::XPath => "XPathException",
        }
    }

    fn message_prefix(self) -> &'static str {
        match self {
            DomExceptionType::Dom => "DOM",
            DomExceptionType::Range => "DOM Range",
            DomExceptionType::Event => "DOM Events",
            DomExceptionType::XmlHttpRequest => "XMLHttpRequest",
            DomExceptionType::Svg => "DOM SVG",
            DomExceptionType::XPath => "DOM XPath",
        }
    }

    fn offset(self) -> i32 {
        match self {
            DomExceptionType::Dom => 0,
            DomExceptionType::Range => RANGE_EXCEPTION_OFFSET,
            DomExceptionType::Event => EVENT_EXCEPTION_OFFSET,
            DomExceptionType::XmlHttpRequest => XML_HTTP_REQUEST_EXCEPTION_OFFSET,
            DomExceptionType::Svg => SVG_EXCEPTION_OFFSET,
            DomExceptionType::XPath => XPATH_EXCEPTION_OFFSET,
        }
    }

    fn max(self) -> i32 {
        match self {
            DomExceptionType::Dom => i32::MAX,
            DomExceptionType::XmlHttpRequest => XML_HTTP_REQUEST_EXCEPTION_MAX,
            other => other.offset() + 99,
        }
    }

    fn constant_name(self, code: i32) -> Option<&'static str> {
        let name = match (self, code) {
            (DomExceptionType::Dom, 1) => "INDEX_SIZE_ERR",
            (DomExceptionType::Dom, 2) => "DOMSTRING_SIZE_ERR",
            (DomExceptionType::Dom, 3) => "HIERARCHY_REQUEST_ERR",
            (DomExceptionType::Dom, 4) => "WRONG_DOCUMENT_ERR",
            (DomExceptionType::Dom, 5) => "INVALID_CHARACTER_ERR",
            (DomExceptionType::Dom, 6) => "NO_DATA_ALLOWED_ERR",
            (DomExceptionType::Dom, 7) => "NO_MODIFICATION_ALLOWED_ERR",
            (DomExceptionType::Dom, 8) => "NOT_FOUND_ERR",
            (DomExceptionType::Dom, 9) => "NOT_SUPPORTED_ERR",
            (DomExceptionType::Dom, 10) => "INUSE_ATTRIBUTE_ERR",
            (DomExceptionType::Dom, 11) => "INVALID_STATE_ERR",
            (DomExceptionType::Dom, 12) => "SYNTAX_ERR",
            (DomExceptionType::Dom, 13) => "INVALID_MODIFICATION_ERR",
            (DomExceptionType::Dom, 14) => "NAMESPACE_ERR",
            (DomExceptionType::Dom, 15) => "INVALID_ACCESS_ERR",
            (DomExceptionType::Dom, 16) => "VALIDATION_ERR",
            (DomExceptionType::Dom, 17) => "TYPE_MISMATCH_ERR",
            (DomExceptionType::Dom, 18) => "SECURITY_ERR",
            (DomExceptionType::Dom, 19) => "NETWORK_ERR",
            (DomExceptionType::Dom, 20) => "ABORT_ERR",
            (DomExceptionType::Dom, 21) => "URL_MISMATCH_ERR",
            (DomExceptionType::Dom, 22) => "QUOTA_EXCEEDED_ERR",
            (DomExceptionType::Range, 1) => "BAD_BOUNDARYPOINTS_ERR",
            (DomExceptionType::Range, 2) => "INVALID_NODE_TYPE_ERR",
            (DomExceptionType::Event, 0) => "UNSPECIFIED_EVENT_TYPE_ERR",
            (DomExceptionType::XmlHttpRequest, 101) => "NETWORK_ERR",
            (DomExceptionType::XmlHttpRequest, 102) => "ABORT_ERR",
            (DomExceptionType::Svg, 0) => "SVG_WRONG_TYPE_ERR",
            (DomExceptionType::Svg, 1) => "SVG_INVALID_VALUE_ERR",
            (DomExceptionType::Svg, 2) => "SVG_MATRIX_NOT_INVERTABLE",
            (DomExceptionType::XPath, 51) => "INVALID_EXPRESSION_ERR",
            (DomExceptionType::XPath, 52) => "TYPE_ERR",
            _ => return None,
        };
        Some(name)
    }
}

/// What a DOM exception code means to script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomExceptionDescription {
    pub kind: DomExceptionType,
    /// Code relative to the interface's range.
    pub code: i32,
    pub name: Option<&'static str>,
}

impl DomExceptionDescription {
    /// Maps a raw code. Codes of zero or below are not exceptions.
    pub fn from_code(code: i32) -> Option<Self> {
        if code <= 0 {
            return None;
        }
        let kind = [
            DomExceptionType::Event,
            DomExceptionType::Range,
            DomExceptionType::Svg,
            DomExceptionType::XPath,
            DomExceptionType::XmlHttpRequest,
        ]
        .into_iter()
        .find(|kind| (kind.offset()..=kind.max()).contains(&code))
        .unwrap_or(DomExceptionType::Dom);
        let code = code - kind.offset();
        Some(DomExceptionDescription {
            kind,
            code,
            name: kind.constant_name(code),
        })
    }

    pub fn message(&self) -> String {
        match self.name {
            Some(name) => format!("{name}: {} Exception {}", self.kind.message_prefix(), self.code),
            None => format!("{} Exception {}", self.kind.message_prefix(), self.code),
        }
    }
}

/// A failure a host function hands back to the script that called it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeException {
    Error(ScriptErrorKind, String),
    Dom(i32),
}

impl NativeException {
    pub fn error(kind: ScriptErrorKind, message: impl Into<String>) -> Self {
        NativeException::Error(kind, message.into())
    }
}

/// Throws a standard error into the realm of `ctx`.
pub fn throw_error(ctx: &Ctx<'_>, kind: ScriptErrorKind, message: &str) -> JsError {
    let constructor: Constructor = match ctx.globals().get(kind.constructor_name()) {
        Ok(constructor) => constructor,
        Err(error) => return error,
    };
    match constructor.construct::<_, Value>((message,)) {
        Ok(error) => ctx.throw(error),
        Err(error) => error,
    }
}

/// Throws the exception object for a DOM exception code into the realm of
/// `ctx`. Returns `None` when the code is not an exception.
pub fn set_dom_exception(ctx: &Ctx<'_>, code: i32) -> Option<JsError> {
    let description = DomExceptionDescription::from_code(code)?;
    Some(throw_dom_exception(ctx, &description).unwrap_or_else(|error| error))
}

fn throw_dom_exception(ctx: &Ctx<'_>, description: &DomExceptionDescription) -> rquickjs::Result<JsError> {
    let constructor: Constructor = ctx.globals().get("Error")?;
    let exception: Object = constructor.construct((description.message(),))?;
    exception.set("name", description.kind.interface_name())?;
    exception.set("code", description.code)?;
    if let Some(name) = description.name {
        exception.set(name, description.code)?;
    }
    Ok(ctx.throw(exception.into_value()))
}

/// Raises a native failure into the realm of `ctx`. A DOM code of zero or
/// below raises nothing.
pub fn throw_native(ctx: &Ctx<'_>, exception: &NativeException) -> Option<JsError> {
    match exception {
        NativeException::Error(kind, message) => Some(throw_error(ctx, *kind, message)),
        NativeException::Dom(code) => set_dom_exception(ctx, *code),
    }
}
