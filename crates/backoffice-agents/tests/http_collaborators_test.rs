//! HTTP collaborator tests against an in-process stub server.
//!
//! The stub answers each connection with the next canned response and
//! records the raw requests it received, so tests can assert on headers
//! and bodies without a live LLM or ledger.

use std::sync::Arc;
use std::time::Duration;

use backoffice_agents::{
    idempotency_key, AgentsConfig, HttpLedgerCommitter, LedgerEndpoint, LlmBookingAgent,
    LlmEndpoint,
};
use orchestration::{
    AgentKind, AutomationService, BookingLine, CommitError, DecisionKind, EventLog, EventType,
    LedgerCommitter, NewTask, OrchestrationConfig, Orchestrator, ProposedDecision,
    ReviewEscalator, RouteRecord, SharedLedger, StateStore, TaskKind, TaskQueue, WorkOutcome,
    Worker, WorkerConfig,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Serve `responses` in order, one per connection; yields the raw requests
async fn stub_server(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut stream).await);
            let response = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
        requests
    });
    (url, handle)
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&data).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|l| {
                    let lower = l.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

fn ledger_at(url: &str) -> HttpLedgerCommitter {
    HttpLedgerCommitter::new(LedgerEndpoint {
        url: url.to_string(),
        api_key: Some("ledger-token".to_string()),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn llm_at(url: &str) -> LlmBookingAgent {
    let defaults = AgentsConfig::from_lookup(|_| None).llm;
    LlmBookingAgent::new(LlmEndpoint {
        url: format!("{}/v1", url),
        timeout: Duration::from_secs(5),
        ..defaults
    })
    .unwrap()
}

fn decision() -> ProposedDecision {
    ProposedDecision::new("acme", "inv-1", DecisionKind::VendorInvoice, 119.0)
        .with_breakdown(100.0, 19.0)
        .with_entry(BookingLine::debit("4400", 119.0))
        .with_entry(BookingLine::credit("1600", 119.0))
        .with_field("vendor_name", "Acme Supplies")
        .with_field("invoice_number", "R-1")
        .with_field("invoice_date", "2026-03-02")
        .with_field("due_date", "2026-04-01")
}

fn chat_reply(content: &str) -> String {
    json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] }).to_string()
}

fn invoice_task() -> orchestration::Task {
    let store = StateStore::in_memory().shared();
    TaskQueue::new(store)
        .enqueue(NewTask::new(
            "acme",
            AgentKind::InvoiceBooking,
            TaskKind::AnalyzeInvoice,
            json!({ "source_ref": "inv-1", "text": "Rechnung R-1 ..." }),
        ))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Test: a posted entry returns the ledger reference and sends the key
#[tokio::test]
async fn test_ledger_posts_with_idempotency_key() {
    let (url, server) = stub_server(vec![(201, r#"{"posted_reference":"JE-100"}"#.into())]).await;
    let receipt = ledger_at(&url).commit(&decision()).await.unwrap();
    assert_eq!(receipt.posted_reference, "JE-100");

    let requests = server.await.unwrap();
    let request = requests[0].to_ascii_lowercase();
    assert!(request.starts_with("post /entries"));
    assert!(request.contains(&format!("idempotency-key: {}", idempotency_key(&decision()))));
    assert!(request.contains("authorization: bearer ledger-token"));
    assert!(request.contains("\"source_ref\":\"inv-1\""));
}

/// Test: 409 Conflict means the entry already exists
#[tokio::test]
async fn test_ledger_conflict_is_success() {
    let (url, server) = stub_server(vec![
        (409, r#"{"posted_reference":"JE-100"}"#.into()),
        (409, String::new()),
    ])
    .await;
    let ledger = ledger_at(&url);
    assert_eq!(
        ledger.commit(&decision()).await.unwrap().posted_reference,
        "JE-100"
    );
    assert!(ledger.commit(&decision()).await.is_ok());
    server.await.unwrap();
}

/// Test: client errors reject, server errors report unavailability
#[tokio::test]
async fn test_ledger_error_statuses() {
    let (url, server) = stub_server(vec![
        (422, r#"{"error":"posting period closed"}"#.into()),
        (503, String::new()),
    ])
    .await;
    let ledger = ledger_at(&url);
    match ledger.commit(&decision()).await {
        Err(CommitError::Rejected(m)) => assert!(m.contains("posting period closed")),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(matches!(
        ledger.commit(&decision()).await,
        Err(CommitError::Unavailable(_))
    ));
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// LLM agent
// ---------------------------------------------------------------------------

/// Test: a fenced JSON reply becomes an automation output
#[tokio::test]
async fn test_llm_agent_parses_fenced_reply() {
    let output = json!({ "decision": decision(), "signals": { "self_reported": 0.9 } });
    let content = format!("```json\n{}\n```", output);
    let (url, server) = stub_server(vec![(200, chat_reply(&content))]).await;

    let result = llm_at(&url).run(&invoice_task()).await.unwrap();
    assert_eq!(result.decision.source_ref, "inv-1");
    assert_eq!(result.signals.self_reported, Some(0.9));

    let request = &server.await.unwrap()[0];
    assert!(request.to_ascii_lowercase().starts_with("post /v1/chat/completions"));
    assert!(request.contains("source_ref: inv-1"));
}

/// Test: throttling is transient, bad requests and prose are permanent
#[tokio::test]
async fn test_llm_agent_error_classification() {
    let (url, server) = stub_server(vec![
        (429, r#"{"error":"rate limited"}"#.into()),
        (400, r#"{"error":"bad model"}"#.into()),
        (200, chat_reply("Sorry, I cannot read this document.")),
    ])
    .await;
    let agent = llm_at(&url);
    let task = invoice_task();

    assert!(agent.run(&task).await.unwrap_err().is_retryable());
    assert!(!agent.run(&task).await.unwrap_err().is_retryable());
    assert!(!agent.run(&task).await.unwrap_err().is_retryable());
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// Full runtime slice
// ---------------------------------------------------------------------------

/// Test: received invoice → LLM proposal → ledger posting over HTTP
#[tokio::test]
async fn test_invoice_books_through_http_collaborators() {
    let reply = json!({
        "decision": decision(),
        "signals": { "text_quality": 0.97, "self_reported": 0.93 }
    });
    let (llm_url, llm_server) = stub_server(vec![(200, chat_reply(&reply.to_string()))]).await;
    let (ledger_url, ledger_server) =
        stub_server(vec![(201, r#"{"posted_reference":"JE-7"}"#.into())]).await;

    let store = StateStore::in_memory().shared();
    let events = EventLog::new(Arc::clone(&store)).shared();
    let queue = TaskQueue::new(Arc::clone(&store)).shared();
    let ledger: SharedLedger = Arc::new(ledger_at(&ledger_url));
    let escalator =
        ReviewEscalator::new(Arc::clone(&store), Arc::clone(&events), Arc::clone(&ledger)).shared();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&events),
        escalator,
        ledger,
        &OrchestrationConfig::default(),
    )
    .unwrap();
    let worker = Worker::new(
        "invoice-0",
        Arc::clone(&queue),
        Arc::clone(&events),
        Arc::new(llm_at(&llm_url)),
        WorkerConfig::new(AgentKind::InvoiceBooking),
    );

    events
        .publish("acme", EventType::InvoiceReceived, json!({ "source_ref": "inv-1" }))
        .unwrap();
    orchestrator.process_pending(10).await.unwrap();
    assert!(matches!(worker.run_once().await.unwrap(), WorkOutcome::Completed(_)));
    orchestrator.process_pending(10).await.unwrap();

    let route = store.get_route("acme", "inv-1").unwrap().unwrap();
    assert!(matches!(
        route,
        RouteRecord::Committed { ref posted_reference, .. } if posted_reference == "JE-7"
    ));
    llm_server.await.unwrap();
    ledger_server.await.unwrap();
}
