use std::rc::Rc;

use script_proxy::dom::{MessagePort, NativeId, NativeRef, Node, XmlHttpRequest};
use script_proxy::js::templates::slots;
use script_proxy::js::{HeapValue, WrapperType};
use script_proxy::{ExecutionProxy, ProxyConfig, RecordingEmbedder};
use url::Url;

fn proxy() -> Rc<ExecutionProxy> {
    let embedder = Rc::new(RecordingEmbedder::new());
    ExecutionProxy::new(ProxyConfig::default(), embedder).expect("proxy")
}

fn url(raw: &str) -> Url {
    Url::parse(raw).expect("url")
}

#[test]
fn attached_nodes_survive_through_their_document_group() {
    let proxy = proxy();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    proxy.init_context_if_needed(&frame).expect("context");
    let doc = frame.document();
    let body = Node::create_element(&doc, "body");
    let paragraph = Node::create_element(&doc, "p");
    Node::append_child(&doc, &body);
    Node::append_child(&body, &paragraph);

    let native: NativeRef = paragraph.clone();
    let wrapper = proxy.wrapper_for(&native, WrapperType::Node).expect("paragraph");

    let report = proxy.collect_garbage();
    assert!(report.groups >= 1);
    assert!(proxy.heap().contains(wrapper));
    assert_eq!(
        proxy.directory().find_any(NativeId::of(&paragraph)),
        Some(wrapper)
    );
}

#[test]
fn detached_subtrees_follow_their_protected_root() {
    let proxy = proxy();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    proxy.init_context_if_needed(&frame).expect("context");
    let doc = frame.document();
    let root = Node::create_element(&doc, "div");
    let leaf = Node::create_element(&doc, "em");
    Node::append_child(&root, &leaf);

    let root_native: NativeRef = root.clone();
    let leaf_native: NativeRef = leaf.clone();
    let root_wrapper = proxy.wrapper_for(&root_native, WrapperType::Node).expect("root");
    let leaf_wrapper = proxy.wrapper_for(&leaf_native, WrapperType::Node).expect("leaf");
    assert!(proxy.gc_protect(&root_native));
    assert!(proxy.gc_protect(&root_native));

    proxy.collect_garbage();
    assert!(proxy.heap().contains(root_wrapper));
    assert!(proxy.heap().contains(leaf_wrapper));

    assert!(proxy.gc_unprotect(&root_native));
    assert!(!proxy.gc_unprotect(&root_native));
    proxy.collect_garbage();
    assert!(!proxy.heap().contains(root_wrapper));
    assert!(!proxy.heap().contains(leaf_wrapper));
    assert!(proxy.directory().find_any(NativeId::of(&leaf)).is_none());
}

#[test]
fn requests_in_flight_keep_their_wrapper() {
    let proxy = proxy();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let _scope = proxy.enter(&frame).expect("enter");

    let request = XmlHttpRequest::new();
    let native: NativeRef = request.clone();
    let wrapper = proxy
        .wrapper_for(&native, WrapperType::XmlHttpRequest)
        .expect("wrapper");
    request.send();

    proxy.collect_garbage();
    proxy.collect_garbage();
    assert!(proxy.heap().contains(wrapper));
    assert_eq!(
        proxy.directory().find_any(NativeId::of(&request)),
        Some(wrapper)
    );

    request.finish();
    proxy.collect_garbage();
    assert!(!proxy.heap().contains(wrapper));
    assert!(proxy.directory().find_any(NativeId::of(&request)).is_none());
}

#[test]
fn entangled_ports_live_and_die_together() {
    let proxy = proxy();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let _scope = proxy.enter(&frame).expect("enter");

    let left = MessagePort::new();
    let right = MessagePort::new();
    MessagePort::entangle(&left, &right);
    let left_native: NativeRef = left.clone();
    let right_native: NativeRef = right.clone();
    let left_wrapper = proxy
        .wrapper_for(&left_native, WrapperType::MessagePort)
        .expect("left");
    let right_wrapper = proxy
        .wrapper_for(&right_native, WrapperType::MessagePort)
        .expect("right");

    assert!(proxy.gc_protect(&left_native));
    proxy.collect_garbage();
    assert!(proxy.heap().contains(right_wrapper));
    assert_eq!(
        proxy.heap().internal_field(right_wrapper, slots::MESSAGE_PORT_PEER),
        Some(&HeapValue::Object(left_wrapper))
    );
    assert_eq!(
        proxy.heap().internal_field(left_wrapper, slots::MESSAGE_PORT_PEER),
        Some(&HeapValue::Object(right_wrapper))
    );

    assert!(proxy.gc_unprotect(&left_native));
    proxy.collect_garbage();
    assert!(!proxy.heap().contains(left_wrapper));
    assert!(!proxy.heap().contains(right_wrapper));
}

#[test]
fn remotely_entangled_ports_are_retained_until_closed() {
    let proxy = proxy();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let _scope = proxy.enter(&frame).expect("enter");

    let remote = MessagePort::new();
    remote.entangle_remotely();
    let lonely = MessagePort::new();
    let remote_native: NativeRef = remote.clone();
    let lonely_native: NativeRef = lonely.clone();
    let remote_wrapper = proxy
        .wrapper_for(&remote_native, WrapperType::MessagePort)
        .expect("remote");
    let lonely_wrapper = proxy
        .wrapper_for(&lonely_native, WrapperType::MessagePort)
        .expect("lonely");

    proxy.collect_garbage();
    assert!(proxy.heap().contains(remote_wrapper));
    assert!(!proxy.heap().contains(lonely_wrapper));

    remote.close();
    proxy.collect_garbage();
    assert!(!proxy.heap().contains(remote_wrapper));
}

#[test]
fn object_listeners_are_swept_with_their_function() {
    let proxy = proxy();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let held = proxy.new_script_object(&frame).expect("function");
    let loose = proxy.new_script_object(&frame).expect("function");

    let strong = proxy
        .find_or_create_listener(&frame, held, false)
        .expect("listener");
    let again = proxy
        .find_or_create_listener(&frame, held, false)
        .expect("listener");
    assert!(Rc::ptr_eq(&strong, &again));
    let weak = proxy
        .find_or_create_object_listener(&frame, loose, false)
        .expect("listener");
    assert!(weak.is_weak());
    assert_eq!(proxy.listener_count(), 2);

    let report = proxy.collect_garbage();
    assert_eq!(report.listeners_swept, 1);
    assert!(weak.is_disconnected());
    assert!(!strong.is_disconnected());
    assert!(proxy.heap().contains(held));
    assert_eq!(proxy.listener_count(), 1);

    assert!(proxy.remove_listener(&strong));
    assert!(!proxy.remove_listener(&strong));
    assert!(strong.is_disconnected());
    proxy.collect_garbage();
    assert!(!proxy.heap().contains(held));
}

#[test]
fn navigation_disconnects_a_frames_listeners() {
    let proxy = proxy();
    let main = proxy.create_frame(url("https://a.example/"), None);
    let child = proxy.create_frame(url("https://a.example/child"), Some(&main));
    let main_function = proxy.new_script_object(&main).expect("function");
    let child_function = proxy.new_script_object(&child).expect("function");

    let main_listener = proxy
        .find_or_create_listener(&main, main_function, true)
        .expect("listener");
    let child_listener = proxy
        .find_or_create_listener(&child, child_function, true)
        .expect("listener");

    assert_eq!(proxy.disconnect_event_listeners(child.id()), 1);
    assert!(child_listener.is_disconnected());
    assert!(!main_listener.is_disconnected());
    assert_eq!(proxy.listener_count(), 1);
    assert_eq!(proxy.disconnect_event_listeners(child.id()), 0);
}

#[test]
fn protecting_an_unwrapped_object_does_nothing() {
    let proxy = proxy();
    let frame = proxy.create_frame(url("https://a.example/"), None);
    let doc = frame.document();
    let orphan: NativeRef = Node::create_element(&doc, "i");
    assert!(!proxy.gc_protect(&orphan));
    assert!(!proxy.gc_unprotect(&orphan));
}
