use std::rc::Rc;

use script_proxy::dom::Node;
use script_proxy::{
    ExecutionProxy, Fault, ProxyConfig, RecordingEmbedder, ScriptSource, ScriptValue,
};
use url::Url;

fn setup(config: ProxyConfig) -> (Rc<ExecutionProxy>, Rc<RecordingEmbedder>) {
    let embedder = Rc::new(RecordingEmbedder::new());
    let proxy = ExecutionProxy::new(config, embedder.clone()).expect("proxy");
    (proxy, embedder)
}

fn url(raw: &str) -> Url {
    Url::parse(raw).expect("url")
}

fn console_texts(embedder: &RecordingEmbedder) -> Vec<String> {
    embedder
        .messages()
        .into_iter()
        .map(|(_, message)| message.text)
        .collect()
}

const DIVE: &str = r#"
var deepest = 0;
function dive() {
    deepest = Math.max(deepest, __depth());
    __evaluate("dive()");
}
dive();
deepest
"#;

#[test]
fn runaway_recursion_stops_at_the_configured_depth() {
    let config = ProxyConfig {
        max_recursion_depth: 5,
        ..ProxyConfig::default()
    };
    let (proxy, embedder) = setup(config);
    let frame = proxy.create_frame(url("https://a.example/"), None);

    let value = proxy
        .evaluate(&frame, &ScriptSource::new(DIVE), None)
        .expect("script completes");
    assert_eq!(value.as_number(), Some(5.0));
    assert_eq!(proxy.recursion_depth(), 0);

    let messages = embedder.messages();
    assert_eq!(messages.len(), 1);
    let (page, message) = &messages[0];
    assert_eq!(*page, frame.id());
    assert_eq!(message.text, "Uncaught RangeError: Recursion too deep");
    assert_eq!(message.source_id, "");

    let again = proxy
        .evaluate(&frame, &ScriptSource::new("__depth()"), None)
        .expect("depth");
    assert_eq!(again.as_number(), Some(1.0));
}

#[test]
fn nested_faults_are_reported_and_yield_undefined() {
    let (proxy, embedder) = setup(ProxyConfig::default());
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let value = proxy
        .evaluate(
            &frame,
            &ScriptSource::new("[__evaluate('6 * 7'), __evaluate('undefined_name') === undefined]"),
            None,
        )
        .expect("value");
    assert_eq!(value, ScriptValue::Json(serde_json::json!([42, true])));

    let texts = console_texts(&embedder);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Uncaught ReferenceError"));
}

#[test]
fn syntax_errors_are_compile_faults() {
    let (proxy, embedder) = setup(ProxyConfig::default());
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let source = ScriptSource::with_url("var = ;", "https://a.example/broken.js", 3);

    let fault = proxy
        .evaluate(&frame, &source, None)
        .expect_err("compile error");
    let Fault::Compile(error) = fault else {
        panic!("expected a compile fault, got {fault:?}");
    };
    assert_eq!(error.name, "SyntaxError");
    assert_eq!(error.source_id, "https://a.example/broken.js");
    assert!(error.line >= 3);

    let texts = console_texts(&embedder);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Uncaught SyntaxError"));
}

#[test]
fn uncaught_exceptions_are_runtime_faults() {
    let (proxy, embedder) = setup(ProxyConfig::default());
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let source = ScriptSource::with_url(
        "var ok = 1;\nthrow new TypeError('boom');",
        "https://a.example/app.js",
        10,
    );

    let fault = proxy.evaluate(&frame, &source, None).expect_err("exception");
    let Fault::Runtime(error) = fault else {
        panic!("expected a runtime fault, got {fault:?}");
    };
    assert_eq!(error.message, "boom");
    assert!(error.line >= 10);
    assert_eq!(console_texts(&embedder), vec!["Uncaught TypeError: boom".to_string()]);

    let survived = proxy
        .evaluate(&frame, &ScriptSource::new("ok"), None)
        .expect("state survives");
    assert_eq!(survived.as_number(), Some(1.0));
}

#[test]
fn scripts_without_a_url_report_the_document_url() {
    let (proxy, _embedder) = setup(ProxyConfig::default());
    let frame = proxy.create_frame(url("https://a.example/page"), None);
    let doc = frame.document();
    let script = Node::create_element(&doc, "script");
    Node::append_child(&doc, &script);

    let fault = proxy
        .evaluate(&frame, &ScriptSource::new("throw new Error('inline')"), Some(&script))
        .expect_err("exception");
    match fault {
        Fault::Runtime(error) => assert_eq!(error.source_id, "https://a.example/page"),
        other => panic!("unexpected fault {other:?}"),
    }
}

#[test]
fn functions_and_constructors_can_be_invoked() {
    let (proxy, _embedder) = setup(ProxyConfig::default());
    let frame = proxy.create_frame(url("https://a.example/"), None);
    proxy
        .evaluate(
            &frame,
            &ScriptSource::new(
                "function add(a, b) { return a + b; }\n\
                 function Point(x, y) { this.x = x; this.y = y; }",
            ),
            None,
        )
        .expect("definitions");

    let sum = proxy
        .call_function(&frame, "add", &[ScriptValue::Number(40.0), ScriptValue::Number(2.0)])
        .expect("sum");
    assert_eq!(sum.as_number(), Some(42.0));

    let greeting = proxy
        .call_function(
            &frame,
            "add",
            &[ScriptValue::String("a".into()), ScriptValue::String("b".into())],
        )
        .expect("concatenation");
    assert_eq!(greeting.as_str(), Some("ab"));

    let point = proxy
        .new_instance(&frame, "Point", &[ScriptValue::Number(1.0), ScriptValue::Number(2.0)])
        .expect("instance");
    assert_eq!(point, ScriptValue::Json(serde_json::json!({"x": 1, "y": 2})));

    assert!(proxy.call_function(&frame, "missing", &[]).is_err());
}

#[test]
fn promise_jobs_run_after_top_level_evaluation() {
    let (proxy, _embedder) = setup(ProxyConfig::default());
    let frame = proxy.create_frame(url("https://a.example/"), None);
    proxy
        .evaluate(
            &frame,
            &ScriptSource::new("var settled = false; Promise.resolve().then(() => { settled = true; });"),
            None,
        )
        .expect("schedule");
    let settled = proxy
        .evaluate(&frame, &ScriptSource::new("settled"), None)
        .expect("read");
    assert_eq!(settled, ScriptValue::Bool(true));
}

#[test]
fn huge_start_lines_are_offsets_not_padding() {
    let (proxy, _embedder) = setup(ProxyConfig::default());
    let frame = proxy.create_frame(url("https://a.example/"), None);

    let fine = ScriptSource::with_url("6 * 7", "https://a.example/far.js", u32::MAX);
    let value = proxy.evaluate(&frame, &fine, None).expect("value");
    assert_eq!(value.as_number(), Some(42.0));

    let failing = ScriptSource::with_url(
        "var a = 1;\nthrow new Error('far');",
        "https://a.example/far.js",
        u32::MAX,
    );
    match proxy.evaluate(&frame, &failing, None) {
        Err(Fault::Runtime(error)) => assert_eq!(error.line, u32::MAX),
        other => panic!("unexpected outcome {other:?}"),
    }

    let near = ScriptSource::with_url("\n\nnull.x", "https://a.example/near.js", 100);
    match proxy.evaluate(&frame, &near, None) {
        Err(Fault::Runtime(error)) => assert_eq!(error.line, 102),
        other => panic!("unexpected outcome {other:?}"),
    }
}
