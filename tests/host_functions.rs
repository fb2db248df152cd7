use std::rc::Rc;

use script_proxy::dom::{CssValue, CssValueKind, Namespace, NativeRef, Node};
use script_proxy::js::{NativeException, ScriptErrorKind};
use script_proxy::{ExecutionProxy, Fault, ProxyConfig, RecordingEmbedder, ScriptSource, ScriptValue};
use serde_json::json;
use url::Url;

fn setup() -> (Rc<ExecutionProxy>, Rc<RecordingEmbedder>) {
    let embedder = Rc::new(RecordingEmbedder::new());
    let proxy = ExecutionProxy::new(ProxyConfig::default(), embedder.clone()).expect("proxy");

    proxy.register_host_function("fail", |call| {
        let kind = match call.args.first().and_then(ScriptValue::as_str) {
            Some("range") => ScriptErrorKind::Range,
            Some("reference") => ScriptErrorKind::Reference,
            Some("syntax") => ScriptErrorKind::Syntax,
            Some("type") => ScriptErrorKind::Type,
            _ => ScriptErrorKind::General,
        };
        Err(NativeException::error(kind, "from native"))
    });
    proxy.register_host_function("domFail", |call| {
        let code = call.args.first().and_then(ScriptValue::as_number).unwrap_or(0.0);
        Err(NativeException::Dom(code as i32))
    });
    proxy.register_host_function("where", |call| {
        Ok(ScriptValue::Json(json!({
            "source": call.location.source_id,
            "line": call.location.line,
        })))
    });

    (proxy, embedder)
}

fn url(raw: &str) -> Url {
    Url::parse(raw).expect("url")
}

#[test]
fn native_errors_surface_as_standard_errors() {
    let (proxy, embedder) = setup();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let value = proxy
        .evaluate(
            &frame,
            &ScriptSource::new(
                "['range', 'reference', 'syntax', 'type', 'other'].map(kind => {\n\
                     try { fail(kind); return 'no throw'; }\n\
                     catch (e) { return e instanceof Error && e.name + ': ' + e.message; }\n\
                 })",
            ),
            None,
        )
        .expect("value");
    assert_eq!(
        value,
        ScriptValue::Json(json!([
            "RangeError: from native",
            "ReferenceError: from native",
            "SyntaxError: from native",
            "TypeError: from native",
            "Error: from native",
        ]))
    );
    assert!(embedder.messages().is_empty());
}

#[test]
fn dom_exception_codes_pick_their_interface() {
    let (proxy, _embedder) = setup();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let value = proxy
        .evaluate(
            &frame,
            &ScriptSource::new(
                "[8, 201, 601, 0].map(code => {\n\
                     try { return domFail(code); }\n\
                     catch (e) { return [e.name, e.code, e.message]; }\n\
                 })",
            ),
            None,
        )
        .expect("value");
    assert_eq!(
        value,
        ScriptValue::Json(json!([
            ["DOMException", 8, "NOT_FOUND_ERR: DOM Exception 8"],
            ["RangeException", 1, "BAD_BOUNDARYPOINTS_ERR: DOM Range Exception 1"],
            ["XMLHttpRequestException", 101, "NETWORK_ERR: XMLHttpRequest Exception 101"],
            null,
        ]))
    );

    let constant = proxy
        .evaluate(
            &frame,
            &ScriptSource::new("try { domFail(12); false } catch (e) { e.SYNTAX_ERR === e.code && e instanceof Error }"),
            None,
        )
        .expect("constant");
    assert_eq!(constant, ScriptValue::Bool(true));
}

#[test]
fn uncaught_dom_exceptions_are_reported_where_they_were_raised() {
    let (proxy, embedder) = setup();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let source = ScriptSource::with_url("var a = 1;\ndomFail(8);", "https://a.example/app.js", 20);

    let fault = proxy.evaluate(&frame, &source, None).expect_err("exception");
    let Fault::Runtime(error) = fault else {
        panic!("expected a runtime fault, got {fault:?}");
    };
    assert_eq!(error.name, "DOMException");
    assert_eq!(error.source_id, "https://a.example/app.js");
    assert_eq!(error.line, 21);

    let messages = embedder.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].1.text,
        "Uncaught DOMException: NOT_FOUND_ERR: DOM Exception 8"
    );
}

#[test]
fn host_functions_see_the_calling_script_location() {
    let (proxy, _embedder) = setup();
    let frame = proxy.create_frame(url("https://a.example/"), None);

    let top = proxy
        .evaluate(
            &frame,
            &ScriptSource::with_url("var a = 1;\n\nwhere()", "https://a.example/app.js", 10),
            None,
        )
        .expect("location");
    assert_eq!(
        top,
        ScriptValue::Json(json!({"source": "https://a.example/app.js", "line": 12}))
    );

    let nested = proxy
        .evaluate(
            &frame,
            &ScriptSource::with_url("__evaluate('\\nwhere()')", "https://a.example/outer.js", 5),
            None,
        )
        .expect("nested location");
    assert_eq!(
        nested,
        ScriptValue::Json(json!({"source": "https://a.example/", "line": 2}))
    );
}

#[test]
fn host_functions_only_reach_contexts_created_after_registration() {
    let embedder = Rc::new(RecordingEmbedder::new());
    let proxy = ExecutionProxy::new(ProxyConfig::default(), embedder).expect("proxy");
    let early = proxy.create_frame(url("https://a.example/"), None);
    proxy.init_context_if_needed(&early).expect("context");

    proxy.register_host_function("answer", |_| Ok(ScriptValue::Number(42.0)));
    proxy.register_host_function("answer", |_| Ok(ScriptValue::Null));

    let late = proxy.create_frame(url("https://a.example/late"), None);
    let early_sees = proxy
        .evaluate(&early, &ScriptSource::new("typeof answer"), None)
        .expect("typeof");
    assert_eq!(early_sees.as_str(), Some("undefined"));
    let late_sees = proxy
        .evaluate(&late, &ScriptSource::new("answer()"), None)
        .expect("call");
    assert_eq!(late_sees.as_number(), Some(42.0));
}

#[test]
fn svg_contexts_hold_their_element_until_replaced() {
    let (proxy, _embedder) = setup();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let doc = frame.document();
    let circle = Node::create_element_ns(&doc, Namespace::Svg, "circle");
    let rect = Node::create_element_ns(&doc, Namespace::Svg, "rect");
    let color: NativeRef = CssValue::new(CssValueKind::SvgColor);
    let plain: NativeRef = CssValue::new(CssValueKind::Primitive);

    proxy.set_svg_context(&color, Some(&circle));
    assert!(proxy.svg_context(&plain).is_none());
    let found = proxy.svg_context(&color).expect("context");
    assert!(Rc::ptr_eq(&found, &circle));
    drop(found);
    assert_eq!(Rc::strong_count(&circle), 2);

    proxy.set_svg_context(&color, Some(&rect));
    assert_eq!(Rc::strong_count(&circle), 1);
    assert!(Rc::ptr_eq(&proxy.svg_context(&color).expect("context"), &rect));

    proxy.set_svg_context(&color, None);
    assert!(proxy.svg_context(&color).is_none());
    assert_eq!(Rc::strong_count(&rect), 1);
}

#[test]
fn svg_contexts_are_released_with_their_object() {
    let (proxy, _embedder) = setup();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let doc = frame.document();
    let path = Node::create_element_ns(&doc, Namespace::Svg, "path");
    let paint: NativeRef = CssValue::new(CssValueKind::SvgPaint);

    proxy.set_svg_context(&paint, Some(&path));
    assert_eq!(Rc::strong_count(&path), 2);
    drop(paint);
    proxy.collect_garbage();
    assert_eq!(Rc::strong_count(&path), 1);
}
