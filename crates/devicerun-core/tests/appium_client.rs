//! `AppiumClient` against a local HTTP server that answers with canned W3C
//! responses and records every request it sees.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use devicerun_core::appium::AppiumClient;
use devicerun_core::driver::{AndroidKey, DeviceClient, DriverError, Selector};

const SESSION: &str = "sess-1";
const ELEMENT: &str = "el-1";
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    body: Value,
}

type Routes = fn(&str, &str, &Value) -> (u16, Value);

// ---------------------------------------------------------------------------
// Mock server
// ---------------------------------------------------------------------------

/// Start a mock Appium server. Every request is recorded, then answered with
/// whatever `routes` returns for it.
async fn mock_appium(routes: Routes) -> (SocketAddr, Arc<Mutex<Vec<Request>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let recorded = Arc::clone(&log);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let recorded = Arc::clone(&recorded);
            tokio::spawn(serve_connection(stream, routes, recorded));
        }
    });

    (addr, log)
}

/// Answer requests on one keep-alive connection until the client hangs up.
async fn serve_connection(mut stream: TcpStream, routes: Routes, log: Arc<Mutex<Vec<Request>>>) {
    let mut buf = Vec::new();
    loop {
        // Read until the end of the headers.
        let header_end = loop {
            if let Some(i) = find(&buf, b"\r\n\r\n") {
                break i + 4;
            }
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap_or_default().split_whitespace();
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line.next().unwrap_or_default().to_string();
        let content_length = lines
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
        let body_bytes: Vec<u8> = buf.drain(..header_end + content_length).skip(header_end).collect();
        let body = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        let (status, reply) = routes(&method, &path, &body);
        log.lock().unwrap().push(Request { method, path, body });

        let reply = reply.to_string();
        let response = format!(
            "HTTP/1.1 {} Canned\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
            status,
            reply.len(),
            reply
        );
        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A well-behaved server with one app: `missing` never matches, and
/// `metrics.json` is absent from the device.
fn appium_routes(method: &str, path: &str, body: &Value) -> (u16, Value) {
    let session = format!("/session/{}", SESSION);
    let Some(rest) = path.strip_prefix(&session) else {
        return match (method, path) {
            ("POST", "/session") => (
                200,
                json!({"value": {"sessionId": SESSION, "capabilities": {"platformName": "iOS"}}}),
            ),
            _ => (404, json!({"value": {"error": "unknown command", "message": path}})),
        };
    };

    match (method, rest) {
        ("DELETE", "") => (200, json!({"value": null})),
        ("POST", "/element") if body["value"] == "missing" => (
            404,
            json!({"value": {"error": "no such element", "message": "An element could not be located on the page using the given search parameters.", "stacktrace": ""}}),
        ),
        ("POST", "/element") => (200, json!({"value": {W3C_ELEMENT_KEY: ELEMENT}})),
        ("POST", r) if r == format!("/element/{}/click", ELEMENT) => (200, json!({"value": null})),
        ("GET", r) if r == format!("/element/{}/text", ELEMENT) => (200, json!({"value": "Done"})),
        ("POST", "/appium/device/push_file") => (200, json!({"value": null})),
        ("POST", "/appium/device/pull_file") => {
            let remote = body["path"].as_str().unwrap_or_default();
            if remote.ends_with("metrics.json") {
                (
                    500,
                    json!({"value": {"error": "unknown error", "message": format!("Remote path '{}' does not exist on the device", remote)}}),
                )
            } else {
                (200, json!({"value": BASE64.encode(b"\x92\x01\x02")}))
            }
        }
        ("POST", "/appium/device/press_keycode") => (200, json!({"value": null})),
        _ => (404, json!({"value": {"error": "unknown command", "message": path}})),
    }
}

fn rejecting_routes(_method: &str, _path: &str, _body: &Value) -> (u16, Value) {
    (
        500,
        json!({"value": {"error": "session not created", "message": "Could not find a connected Android device"}}),
    )
}

async fn connected(routes: Routes) -> (AppiumClient, Arc<Mutex<Vec<Request>>>) {
    let (addr, log) = mock_appium(routes).await;
    let mut caps = Map::new();
    caps.insert("platformName".into(), json!("iOS"));
    let client = AppiumClient::connect(&format!("http://{}/", addr), caps)
        .await
        .unwrap();
    (client, log)
}

fn requests(log: &Arc<Mutex<Vec<Request>>>) -> Vec<Request> {
    log.lock().unwrap().clone()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_sends_w3c_capabilities() {
    let (client, log) = connected(appium_routes).await;
    assert_eq!(client.session_id(), SESSION);

    let reqs = requests(&log);
    assert_eq!(reqs.len(), 1);
    assert_eq!(reqs[0].method, "POST");
    assert_eq!(reqs[0].path, "/session");
    assert_eq!(reqs[0].body["capabilities"]["alwaysMatch"]["platformName"], "iOS");
    assert_eq!(reqs[0].body["capabilities"]["firstMatch"], json!([{}]));
}

#[tokio::test]
async fn test_connect_rejected_is_session_not_created() {
    let (addr, _log) = mock_appium(rejecting_routes).await;
    let err = AppiumClient::connect(&format!("http://{}", addr), Map::new())
        .await
        .err()
        .unwrap();
    match err {
        DriverError::SessionNotCreated(msg) => assert!(msg.contains("connected Android device")),
        other => panic!("expected SessionNotCreated, got {:?}", other),
    }
}

#[tokio::test]
async fn test_find_click_and_read_text() {
    let (client, log) = connected(appium_routes).await;

    let selector = Selector::accessibility_id("statusField");
    let element = client.find_element(&selector).await.unwrap();
    assert_eq!(element.id, ELEMENT);
    assert_eq!(element.selector, selector);

    client.click(&element).await.unwrap();
    assert_eq!(client.element_text(&element).await.unwrap(), "Done");

    let reqs = requests(&log);
    assert_eq!(reqs[1].path, format!("/session/{}/element", SESSION));
    assert_eq!(reqs[1].body, json!({"using": "accessibility id", "value": "statusField"}));
    assert_eq!(reqs[2].method, "POST");
    assert_eq!(reqs[2].path, format!("/session/{}/element/{}/click", SESSION, ELEMENT));
    assert_eq!(reqs[3].method, "GET");
    assert_eq!(reqs[3].path, format!("/session/{}/element/{}/text", SESSION, ELEMENT));
}

#[tokio::test]
async fn test_class_name_selector_strategy() {
    let (client, log) = connected(appium_routes).await;
    client
        .find_element(&Selector::class_name("android.widget.Switch"))
        .await
        .unwrap();
    assert_eq!(
        requests(&log)[1].body,
        json!({"using": "class name", "value": "android.widget.Switch"})
    );
}

#[tokio::test]
async fn test_missing_element_names_the_selector() {
    let (client, _log) = connected(appium_routes).await;
    let err = client
        .find_element(&Selector::accessibility_id("missing"))
        .await
        .unwrap_err();
    match err {
        DriverError::NoSuchElement(what) => assert_eq!(what, "accessibility id=missing"),
        other => panic!("expected NoSuchElement, got {:?}", other),
    }
}

#[tokio::test]
async fn test_push_file_sends_base64_body() {
    let (client, log) = connected(appium_routes).await;
    let remote = "@com.company.test_app:data/Documents/data/model.bin";
    client.push_file(remote, b"weights\x00\xff").await.unwrap();

    let reqs = requests(&log);
    let push = reqs.last().unwrap();
    assert_eq!(push.path, format!("/session/{}/appium/device/push_file", SESSION));
    assert_eq!(push.body["path"], remote);
    assert_eq!(
        BASE64.decode(push.body["data"].as_str().unwrap()).unwrap(),
        b"weights\x00\xff"
    );
}

#[tokio::test]
async fn test_pull_file_decodes_contents() {
    let (client, log) = connected(appium_routes).await;
    let bytes = client
        .pull_file("/sdcard/data/model_outputs.msgpack")
        .await
        .unwrap();
    assert_eq!(bytes, vec![0x92, 0x01, 0x02]);
    assert_eq!(
        requests(&log).last().unwrap().body,
        json!({"path": "/sdcard/data/model_outputs.msgpack"})
    );
}

#[tokio::test]
async fn test_pull_missing_file_is_file_not_found() {
    let (client, _log) = connected(appium_routes).await;
    let err = client.pull_file("/sdcard/data/metrics.json").await.unwrap_err();
    match err {
        DriverError::FileNotFound(path) => assert_eq!(path, "/sdcard/data/metrics.json"),
        other => panic!("expected FileNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_press_back_sends_keycode() {
    let (client, log) = connected(appium_routes).await;
    client.press_key(AndroidKey::Back).await.unwrap();
    let reqs = requests(&log);
    let press = reqs.last().unwrap();
    assert_eq!(press.path, format!("/session/{}/appium/device/press_keycode", SESSION));
    assert_eq!(press.body, json!({"keycode": 4}));
}

#[tokio::test]
async fn test_quit_deletes_session() {
    let (client, log) = connected(appium_routes).await;
    client.quit().await.unwrap();
    let reqs = requests(&log);
    let quit = reqs.last().unwrap();
    assert_eq!(quit.method, "DELETE");
    assert_eq!(quit.path, format!("/session/{}", SESSION));
}
