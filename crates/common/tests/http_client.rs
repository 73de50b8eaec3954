use common::http::{CallError, CallOutcome, HttpSettings, ResilientHttpClient, RetryPolicy};
use common::proxy_pool::ProxyPool;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct Canned {
    status: u16,
    content_type: &'static str,
    content_encoding: Option<&'static str>,
    body: Vec<u8>,
}

/// Serve one canned response per connection, in order. Returns the base URL
/// and a log of request heads seen.
async fn serve(responses: Vec<Canned>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let mut queue: VecDeque<Canned> = responses.into();

    tokio::spawn(async move {
        while let Some(canned) = queue.pop_front() {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let request = read_request(&mut sock).await;
            log.lock().unwrap().push(request);

            let encoding = canned
                .content_encoding
                .map(|e| format!("content-encoding: {e}\r\n"))
                .unwrap_or_default();
            let head = format!(
                "HTTP/1.1 {} X\r\ncontent-type: {}\r\n{encoding}content-length: {}\r\nconnection: close\r\n\r\n",
                canned.status,
                canned.content_type,
                canned.body.len()
            );
            let _ = sock.write_all(head.as_bytes()).await;
            let _ = sock.write_all(&canned.body).await;
            let _ = sock.shutdown().await;
        }
    });

    (format!("http://{addr}"), seen)
}

/// Read the request head plus `content-length` bytes of body so the socket
/// is drained before we reply and close.
async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let Ok(n) = sock.read(&mut chunk).await else {
            break;
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn client(max_retries: u32, dump: Option<std::path::PathBuf>) -> ResilientHttpClient {
    let mut headers = BTreeMap::new();
    headers.insert("x-api-key".to_string(), "test-key".to_string());
    ResilientHttpClient::new(
        Arc::new(ProxyPool::direct()),
        RetryPolicy {
            max_retries,
            backoff: Duration::ZERO,
            retry_statuses: vec![403, 500, 502, 503],
            retry_decode_errors: false,
        },
        &HttpSettings {
            timeout: Duration::from_secs(5),
            headers,
            raw_dump_dir: dump,
        },
    )
    .unwrap()
}

#[tokio::test]
async fn retries_transient_status_then_succeeds() {
    let (base, seen) = serve(vec![
        Canned {
            status: 503,
            content_type: "text/plain",
            content_encoding: None,
            body: b"busy".to_vec(),
        },
        Canned {
            status: 200,
            content_type: "application/json",
            content_encoding: None,
            body: br#"{"status":true,"data":{"id":"42"}}"#.to_vec(),
        },
    ])
    .await;

    let outcome = client(3, None)
        .post_json(
            "connect",
            &format!("{base}/users/connect"),
            &serde_json::json!({"allora_address": null, "evm_address": "0xABC"}),
        )
        .await;

    assert_eq!(
        outcome,
        CallOutcome::Success(serde_json::json!({"status": true, "data": {"id": "42"}}))
    );
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].starts_with("POST /users/connect"));
    assert!(seen[0].to_ascii_lowercase().contains("x-api-key: test-key"));
}

#[tokio::test]
async fn permanent_status_is_not_retried() {
    let (base, seen) = serve(vec![
        Canned {
            status: 404,
            content_type: "application/json",
            content_encoding: None,
            body: b"{}".to_vec(),
        },
        Canned {
            status: 200,
            content_type: "application/json",
            content_encoding: None,
            body: b"{}".to_vec(),
        },
    ])
    .await;

    let outcome = client(5, None).get_json("points", &format!("{base}/points/1")).await;
    assert_eq!(outcome, CallOutcome::PermanentFailure(CallError::Status(404)));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn undecodable_body_is_dumped() {
    let dir = tempfile::tempdir().unwrap();
    let (base, _seen) = serve(vec![Canned {
        status: 200,
        content_type: "text/html",
        content_encoding: None,
        body: b"<html>blocked</html>".to_vec(),
    }])
    .await;

    let outcome = client(3, Some(dir.path().to_path_buf()))
        .get_json("points", &format!("{base}/points/1"))
        .await;
    assert!(matches!(
        outcome,
        CallOutcome::PermanentFailure(CallError::Decode(_))
    ));

    let dumped: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(dumped.len(), 1);
    let path = dumped[0].as_ref().unwrap().path();
    assert_eq!(std::fs::read(path).unwrap(), b"<html>blocked</html>");
}

#[tokio::test]
async fn connection_refused_exhausts_budget() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let outcome = client(2, None)
        .get_json("points", &format!("http://127.0.0.1:{port}/points/1"))
        .await;
    assert!(matches!(
        outcome,
        CallOutcome::RetryableFailure {
            attempts: 2,
            last_error: Some(CallError::Transport(_)),
        }
    ));
}

#[tokio::test]
async fn compressed_json_body_is_decoded() {
    use std::io::Write;

    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(br#"{"status":true,"data":{"id":"42"}}"#).unwrap();
    let (base, seen) = serve(vec![Canned {
        status: 200,
        content_type: "application/json; charset=utf-8",
        content_encoding: Some("gzip"),
        body: enc.finish().unwrap(),
    }])
    .await;

    let mut headers = BTreeMap::new();
    headers.insert("accept-encoding".to_string(), "gzip, deflate, br".to_string());
    let client = ResilientHttpClient::new(
        Arc::new(ProxyPool::direct()),
        RetryPolicy {
            max_retries: 1,
            backoff: Duration::ZERO,
            retry_statuses: vec![],
            retry_decode_errors: false,
        },
        &HttpSettings {
            timeout: Duration::from_secs(5),
            headers,
            raw_dump_dir: None,
        },
    )
    .unwrap();

    let outcome = client
        .post_json(
            "connect",
            &format!("{base}/users/connect"),
            &serde_json::json!({"allora_address": null, "evm_address": "0xABC"}),
        )
        .await;
    assert_eq!(
        outcome,
        CallOutcome::Success(serde_json::json!({"status": true, "data": {"id": "42"}}))
    );
    assert!(seen.lock().unwrap()[0]
        .to_ascii_lowercase()
        .contains("accept-encoding: gzip, deflate, br"));
}
