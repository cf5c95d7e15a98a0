//! In-process mock of the analytics/chat API for tests.

use crate::protocol::{
    ChatMessage, DashboardStats, MetricCard, Metrics, Period, Role, SendMessageRequest,
    TimeSeriesPoint, Trend,
};
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_REPLY: &str = "data: {\"type\":\"token\",\"content\":\"A\"}\n\n\
data: {\"type\":\"token\",\"content\":\"B\"}\n\n\
data: {\"type\":\"done\",\"content\":\"\"}\n\n";

#[derive(Debug, Clone)]
pub struct Scenario {
    pub stats_status: u16,
    pub history_status: u16,
    pub chat_status: u16,
    pub chat_body: Option<String>,
    /// Keep the reply body open after writing it.
    pub chat_hold_open: bool,
    /// Send the reply one event at a time, sleeping this long before each.
    pub chat_drip: Option<std::time::Duration>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            stats_status: 200,
            history_status: 200,
            chat_status: 200,
            chat_body: None,
            chat_hold_open: false,
            chat_drip: None,
        }
    }
}

#[derive(Default)]
struct Seen {
    period: Option<String>,
    session_id: Option<String>,
    message: Option<(String, String)>,
}

struct MockState {
    scenario: Scenario,
    seen: Mutex<Seen>,
    held: Mutex<Vec<mpsc::Sender<Result<String, Infallible>>>>,
}

pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(scenario: Scenario) -> Self {
        let state = Arc::new(MockState {
            scenario,
            seen: Mutex::new(Seen::default()),
            held: Mutex::new(Vec::new()),
        });

        let app = axum::Router::new()
            .route("/api/stats", get(stats))
            .route("/api/chat/history", get(history))
            .route("/api/chat/message", post(chat_message))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn last_period(&self) -> Option<String> {
        self.state.seen.lock().unwrap().period.clone()
    }

    pub fn last_session_id(&self) -> Option<String> {
        self.state.seen.lock().unwrap().session_id.clone()
    }

    pub fn last_message(&self) -> Option<(String, String)> {
        self.state.seen.lock().unwrap().message.clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Deterministic stats: one point per day ending on 2024-06-30, ascending.
pub fn fixture_stats(period: Period) -> DashboardStats {
    let days: i64 = match period {
        Period::Week => 7,
        Period::Month => 30,
        Period::Quarter => 90,
    };
    let last = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
    let time_series = (0..days)
        .map(|i| TimeSeriesPoint {
            date: last - Duration::days(days - 1 - i),
            value: 400 + (i as u64) * 2,
        })
        .collect();

    DashboardStats {
        metrics: Metrics {
            total_messages: MetricCard {
                value: 3120.0,
                change_percent: 12.5,
                trend: Trend::Up,
                description: "Trending up this month".to_string(),
            },
            active_conversations: MetricCard {
                value: 248.0,
                change_percent: -4.2,
                trend: Trend::Down,
                description: "Down this period".to_string(),
            },
            avg_conversation_length: MetricCard {
                value: 12.6,
                change_percent: 1.0,
                trend: Trend::Stable,
                description: "Meets growth projections".to_string(),
            },
        },
        time_series,
    }
}

pub fn fixture_history() -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: Role::User,
            content: "Hello".to_string(),
            created_at: "2024-06-30T09:00:00".to_string(),
        },
        ChatMessage {
            role: Role::Assistant,
            content: "Hi! How can I help?".to_string(),
            created_at: "2024-06-30T09:00:02".to_string(),
        },
    ]
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn stats(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let period = query.get("period").cloned().unwrap_or_else(|| "7d".to_string());
    state.seen.lock().unwrap().period = Some(period.clone());

    if state.scenario.stats_status != 200 {
        return status(state.scenario.stats_status).into_response();
    }
    match period.parse::<Period>() {
        Ok(period) => Json(fixture_stats(period)).into_response(),
        Err(detail) => (StatusCode::BAD_REQUEST, detail).into_response(),
    }
}

async fn history(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.seen.lock().unwrap().session_id = query.get("session_id").cloned();

    if state.scenario.history_status != 200 {
        return status(state.scenario.history_status).into_response();
    }
    Json(fixture_history()).into_response()
}

async fn chat_message(
    State(state): State<Arc<MockState>>,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    state.seen.lock().unwrap().message = Some((request.session_id, request.message));

    if state.scenario.chat_status != 200 {
        return status(state.scenario.chat_status).into_response();
    }

    let body = state
        .scenario
        .chat_body
        .clone()
        .unwrap_or_else(|| DEFAULT_REPLY.to_string());

    if let Some(interval) = state.scenario.chat_drip {
        let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(4);
        tokio::spawn(async move {
            for event in body.split_inclusive("\n\n") {
                tokio::time::sleep(interval).await;
                if tx.send(Ok(event.to_string())).await.is_err() {
                    break;
                }
            }
        });
        return (
            [(CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(ReceiverStream::new(rx)),
        )
            .into_response();
    }

    if state.scenario.chat_hold_open {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(body)).await.unwrap();
        state.held.lock().unwrap().push(tx);
        return (
            [(CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(ReceiverStream::new(rx)),
        )
            .into_response();
    }

    ([(CONTENT_TYPE, "text/event-stream")], body).into_response()
}
