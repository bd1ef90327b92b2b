use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tabrunner::{
    AbortSignal, AutomationError, BridgeTarget, Command, ElementHandle, Executor, Locator, Target,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Answers bridge requests the way the browser-side script would, for a page
/// with a single button at handle 3. `snapshot` is never answered.
fn reply_for(request: &Value) -> Option<Value> {
    let id = request["id"].clone();
    let ok = |result: Value| Some(json!({ "id": id, "ok": true, "result": result }));
    match request["op"].as_str()? {
        "currentUrl" => ok(json!("https://fake.test/")),
        "query" => match request["args"]["locator"]["value"].as_str() {
            Some("#go") => ok(json!(3)),
            _ => ok(Value::Null),
        },
        "click" => ok(Value::Null),
        "scrollPosition" => ok(json!({ "x": 0.0, "y": 42.0 })),
        "capture" => ok(json!("data:image/png;base64,AAEC")),
        "text" => Some(json!({
            "id": id,
            "ok": false,
            "error": "node detached",
            "code": "ELEMENT_NOT_FOUND"
        })),
        _ => None,
    }
}

async fn connect_fake_browser(bridge: &BridgeTarget) -> tokio::task::JoinHandle<Vec<String>> {
    let url = format!("ws://{}", bridge.local_addr());
    let (ws, _) = connect_async(url).await.expect("ws connect");
    let (mut writer, mut reader) = ws.split();
    writer
        .send(Message::Text(r#"{"type":"hello","from":"test"}"#.into()))
        .await
        .expect("send hello");

    for _ in 0..50 {
        if bridge.is_client_connected().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(bridge.is_client_connected().await);

    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(Ok(msg)) = reader.next().await {
            let txt = msg.into_text().unwrap_or_default();
            let Ok(request) = serde_json::from_str::<Value>(&txt) else {
                continue;
            };
            seen.push(request["op"].as_str().unwrap_or_default().to_string());
            if let Some(reply) = reply_for(&request) {
                if writer.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
            }
        }
        seen
    })
}

#[tokio::test]
async fn bridge_forwards_target_calls() {
    init_tracing();
    let bridge = BridgeTarget::bind("127.0.0.1:0").await.expect("bind");
    let _browser = connect_fake_browser(&bridge).await;

    assert_eq!(bridge.current_url().await.unwrap(), "https://fake.test/");
    assert_eq!(
        bridge.query(&Locator::css("#go")).await.unwrap(),
        Some(ElementHandle(3))
    );
    assert_eq!(bridge.query(&Locator::css("#nope")).await.unwrap(), None);
    assert_eq!(bridge.scroll_position().await.unwrap(), (0.0, 42.0));
    assert_eq!(bridge.capture_visible_region().await.unwrap(), vec![0, 1, 2]);

    let err = bridge.text(ElementHandle(3)).await.unwrap_err();
    assert_eq!(err, AutomationError::ElementNotFound("node detached".into()));
}

#[tokio::test]
async fn executor_runs_over_the_bridge() {
    init_tracing();
    let bridge = Arc::new(BridgeTarget::bind("127.0.0.1:0").await.expect("bind"));
    let _browser = connect_fake_browser(&bridge).await;

    let executor = Executor::new(bridge.clone() as Arc<dyn Target>, AbortSignal::new());
    let outcome = executor
        .execute(&Command::new("click").with_locator(Locator::css("#go")))
        .await;
    assert!(outcome.success, "{outcome:?}");

    let missing = executor
        .execute(&Command::new("click").with_locator(Locator::css("#nope")))
        .await;
    assert_eq!(missing.code.as_deref(), Some("ELEMENT_NOT_FOUND"));
}

#[tokio::test]
async fn unanswered_calls_time_out() {
    init_tracing();
    let bridge = BridgeTarget::bind("127.0.0.1:0")
        .await
        .expect("bind")
        .with_call_timeout(Duration::from_millis(200));
    let _browser = connect_fake_browser(&bridge).await;

    let err = bridge.snapshot().await.unwrap_err();
    assert!(matches!(err, AutomationError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn calls_without_a_browser_fail_fast() {
    init_tracing();
    let bridge = BridgeTarget::bind("127.0.0.1:0").await.expect("bind");
    assert!(!bridge.is_client_connected().await);

    let err = bridge.current_url().await.unwrap_err();
    assert!(matches!(err, AutomationError::PlatformError(_)), "{err:?}");
}
