//! End-to-end tests of `Container` over real HTTP.
//!
//! A minimal service is served from a local `TcpListener`. It answers
//! `POST /api/v1/upload` by accepting every record of the manifest, except
//! records whose title starts with `reject`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hippod_client::transport::TransportError;
use hippod_client::{AchievementResult, Container, Error, RecordState, TestRecord};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

struct FakeService {
    url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone, Copy)]
enum Behavior {
    Answer,
    Delay(Duration),
    Unavailable,
}

impl FakeService {
    async fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                tokio::spawn(async move {
                    let _ = serve(stream, behavior, seen).await;
                });
            }
        });

        Self { url, requests }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    mut stream: TcpStream,
    behavior: Behavior,
    seen: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let (head, body) = read_request(&mut stream).await?;
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let body = String::from_utf8_lossy(&body).into_owned();
    seen.lock().unwrap().push(body.clone());

    let (status, payload) = if !request_line.starts_with("POST /api/v1/upload ") {
        ("404 Not Found", String::new())
    } else {
        match behavior {
            Behavior::Answer => ("200 OK", answer(&body)),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                ("200 OK", answer(&body))
            }
            Behavior::Unavailable => ("503 Service Unavailable", "busy".to_string()),
        }
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<(String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok((String::new(), Vec::new()));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok((head, buf[header_end..].to_vec()))
}

/// Builds the service's verdict for every record of the manifest.
fn answer(body: &str) -> String {
    let record = Regex::new(r#""id":"([0-9a-f-]{36})","submitter":"[^"]*","title":"([^"]*)""#).unwrap();
    let entries: Vec<serde_json::Value> = record
        .captures_iter(body)
        .map(|c| {
            if c[2].starts_with("reject") {
                serde_json::json!({ "id": &c[1], "status": "rejected", "reason": "duplicate title" })
            } else {
                serde_json::json!({ "id": &c[1], "status": "accepted" })
            }
        })
        .collect();
    serde_json::json!({ "records": entries }).to_string()
}

fn record(title: &str) -> TestRecord {
    let mut t = TestRecord::new();
    t.submitter_set("anonymous");
    t.title_set(title);
    t.categories_set(["team:foo"]).unwrap();
    t.achievement.result = Some(AchievementResult::Passed);
    t
}

#[tokio::test]
async fn test_upload_sends_full_record_once() {
    let service = FakeService::spawn(Behavior::Answer).await;
    let container = Container::with_url(&service.url).unwrap();

    let mut t = record("Snippet Test Item");
    t.description_plain_set("Simple Description");
    t.attachment.tags_add(["foo", "bar"]);
    t.attachment
        .data_add("snippet.py", b"print(1)\n".to_vec(), "x-snippet-python3-matplot-png");
    t.achievement.result = Some(AchievementResult::Nonapplicable);
    t.achievement
        .attachment
        .data_add("output.log", b"ok\n".to_vec(), "text/plain");
    let id = container.add(t).unwrap();

    let report = container.upload().await.unwrap();
    assert_eq!(report.acknowledged, vec![id]);
    assert_eq!(report.exchanges, 1);
    assert_eq!(container.state(&id), Some(RecordState::Acknowledged));

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    let body = &requests[0];
    assert!(body.contains(r#"name="manifest""#));
    assert!(body.contains(r#"name="record.0.attachment.0""#));
    assert!(body.contains(r#"name="record.0.achievement.attachment.0""#));
    assert!(body.contains(r#""submitter":"anonymous""#));
    assert!(body.contains(r#""title":"Snippet Test Item""#));
    assert!(body.contains(r#""categories":["team:foo"]"#));
    assert!(body.contains(r#""description":{"format":"plain","text":"Simple Description"}"#));
    assert!(body.contains(r#""tags":["foo","bar"]"#));
    assert!(body.contains(r#""name":"snippet.py""#));
    assert!(body.contains(r#""name":"output.log""#));
    assert!(body.contains(r#""kind":"text/plain""#));
    assert!(body.contains(r#""test-date":""#));
    assert!(body.contains(r#""kind":"x-snippet-python3-matplot-png""#));
    assert!(body.contains(r#""result":"nonapplicable""#));
    assert!(body.contains("print(1)"));

    // Nothing left to send
    let again = container.upload().await.unwrap();
    assert!(again.is_noop());
    assert_eq!(service.requests().len(), 1);
}

#[tokio::test]
async fn test_rejected_record_stays_pending() {
    let service = FakeService::spawn(Behavior::Answer).await;
    let container = Container::with_url(&service.url).unwrap();

    let good = container.add(record("t1")).unwrap();
    let bad = container.add(record("reject me")).unwrap();

    let err = container.upload().await.unwrap_err();
    let rejections = err.rejections();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].id, bad);
    assert_eq!(rejections[0].reason, "duplicate title");

    assert_eq!(container.state(&good), Some(RecordState::Acknowledged));
    assert_eq!(
        container.state(&bad),
        Some(RecordState::Pending("duplicate title".to_string()))
    );

    // Fix and resend: only the rejected record goes out
    container.update(&bad, |t| t.title_set("t2")).unwrap();
    let report = container.upload().await.unwrap();
    assert_eq!(report.attempted, vec![bad]);
    assert!(container.pending_ids().is_empty());
}

#[tokio::test]
async fn test_timeout_is_retryable_and_keeps_record_pending() {
    let service = FakeService::spawn(Behavior::Delay(Duration::from_secs(3))).await;
    let container = Container::with_url(&service.url).unwrap();
    container.set_timeout(Duration::from_millis(200));

    let id = container.add(record("slow")).unwrap();
    let err = container.upload().await.unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(
        err,
        Error::Transport {
            source: TransportError::Timeout(_),
            pending: 1,
            ..
        }
    ));
    assert!(matches!(container.state(&id), Some(RecordState::Pending(_))));
}

#[tokio::test]
async fn test_unavailable_service_is_retryable() {
    let service = FakeService::spawn(Behavior::Unavailable).await;
    let container = Container::with_url(&service.url).unwrap();

    let id = container.add(record("t1")).unwrap();
    let err = container.upload().await.unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(
        err,
        Error::Transport {
            source: TransportError::Status { status: 503, .. },
            ..
        }
    ));
    assert_eq!(container.pending_ids(), vec![id]);
}
