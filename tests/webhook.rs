use chrono::{TimeZone, Utc};
use serde_json::Value;
use signal_engine::config::{MonitorConfig, RiskConfig};
use signal_engine::error::CollaboratorError;
use signal_engine::models::{Direction, ExitReason, LifecycleEvent, Position};
use signal_engine::notify::{NotificationSink, WebhookNotifier};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Minimal HTTP endpoint that records request bodies and answers from a script.
struct WebhookStub {
    url: String,
    bodies: Arc<Mutex<Vec<String>>>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WebhookStub {
    fn start(statuses: Vec<&'static str>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let url = format!("http://{}/webhook", listener.local_addr()?);
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&bodies);
        let (shutdown, shutdown_rx) = mpsc::channel();
        let mut statuses: VecDeque<&'static str> = statuses.into();

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let status = statuses.pop_front().unwrap_or("204 No Content");
                    let _ = handle_request(stream, status, &recorded);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        });

        Ok(Self {
            url,
            bodies,
            shutdown,
            handle: Some(handle),
        })
    }

    fn bodies(&self) -> Vec<Value> {
        self.bodies
            .lock()
            .unwrap()
            .iter()
            .map(|body| serde_json::from_str(body).unwrap())
            .collect()
    }
}

impl Drop for WebhookStub {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_request(
    stream: TcpStream,
    status: &str,
    recorded: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line == "\r\n" {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;
    // Recorded before answering so the caller sees it once its request returns.
    recorded
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&body).into_owned());

    let mut stream = stream;
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status
    );
    stream.write_all(response.as_bytes())
}

fn config() -> MonitorConfig {
    MonitorConfig {
        symbol: "AUDUSD=X".to_string(),
        timeframe: "4h".to_string(),
        strategy: "mean_reversion".to_string(),
        risk: RiskConfig::default(),
    }
}

fn position() -> Position {
    let ts = Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap();
    Position::open(Direction::Long, ts, 0.66, 0.658, 0.663, 5_000.0).unwrap()
}

#[tokio::test]
async fn posts_embed_for_each_event() {
    let stub = WebhookStub::start(vec![]).unwrap();
    let notifier = WebhookNotifier::new(stub.url.clone()).unwrap();

    notifier
        .notify(&config(), &LifecycleEvent::Opened(position()))
        .await
        .unwrap();
    let exit_timestamp = position().entry_timestamp + chrono::Duration::hours(4);
    let trade = position().close(exit_timestamp, 0.663, ExitReason::TakeProfit, 0.0);
    notifier
        .notify(&config(), &LifecycleEvent::Closed(trade))
        .await
        .unwrap();

    let bodies = stub.bodies();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["embeds"][0]["title"], "LONG Entry");
    assert_eq!(bodies[1]["embeds"][0]["title"], "LONG Take Profit");
    assert_eq!(bodies[1]["embeds"][0]["color"], 3_066_993);
    let fields = bodies[1]["embeds"][0]["fields"].as_array().unwrap();
    assert!(fields
        .iter()
        .any(|field| field["name"] == "Result" && field["value"] == "+0.45%"));
}

#[tokio::test]
async fn retries_until_the_endpoint_recovers() {
    let stub = WebhookStub::start(vec!["500 Internal Server Error"]).unwrap();
    let notifier = WebhookNotifier::new(stub.url.clone()).unwrap();

    notifier
        .notify(&config(), &LifecycleEvent::Opened(position()))
        .await
        .unwrap();
    assert_eq!(stub.bodies().len(), 2);
}

#[tokio::test]
async fn gives_up_after_repeated_failures() {
    let stub = WebhookStub::start(vec!["503 Service Unavailable"; 5]).unwrap();
    let notifier = WebhookNotifier::new(stub.url.clone()).unwrap();

    let result = notifier
        .notify(&config(), &LifecycleEvent::Opened(position()))
        .await;
    assert!(result.is_err());
    assert_eq!(stub.bodies().len(), 3);
}

#[tokio::test]
async fn rejected_payload_is_not_retried() {
    let stub = WebhookStub::start(vec!["400 Bad Request", "204 No Content"]).unwrap();
    let notifier = WebhookNotifier::new(stub.url.clone()).unwrap();

    let result = notifier
        .notify(&config(), &LifecycleEvent::Opened(position()))
        .await;
    assert!(matches!(
        result,
        Err(CollaboratorError::NotificationRejected { status: 400, .. })
    ));
    assert_eq!(stub.bodies().len(), 1);
}
