//! Chat, tool and event endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{info, warn};

use duckling_core::event::DomainEvent;
use duckling_core::frame::{FinishReason, Frame};
use duckling_core::message::Message;

use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// `POST /api/chat`: run one turn over the posted history.
///
/// The first frame is awaited before the response starts, so a provider
/// failure that happens before anything was produced becomes a `502`
/// instead of a stream holding a single error frame.
pub async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<
    Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>,
    (StatusCode, Json<ErrorResponse>),
> {
    if payload.messages.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "messages must not be empty"));
    }
    info!(messages = payload.messages.len(), "Chat request");

    let orchestrator = state.orchestrator();
    let mut frames = duckling_agent::stream_turn(&orchestrator, payload.messages);

    let first = match frames.recv().await {
        Some(frame) => frame,
        None => {
            return Err(error_response(
                StatusCode::BAD_GATEWAY,
                "stream ended before the first frame",
            ));
        }
    };
    if let Some(FinishReason::Error { message }) = first.finish_reason() {
        warn!(error = %message, "Turn failed before streaming");
        return Err(error_response(StatusCode::BAD_GATEWAY, message.clone()));
    }

    let stream = tokio_stream::iter([first])
        .chain(ReceiverStream::new(frames))
        .map(|frame| Ok(frame_event(&frame)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// One SSE event per frame: the event name is the frame kind.
pub fn frame_event(frame: &Frame) -> SseEvent {
    let data = serde_json::to_string(frame).unwrap_or_default();
    SseEvent::default().event(frame.event.kind()).data(data)
}

#[derive(Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<duckling_core::provider::ToolDefinition>,
    pub count: usize,
}

/// `GET /api/tools`
pub async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools = state.tools.definitions();
    let count = tools.len();
    Json(ToolListResponse { tools, count })
}

/// `GET /api/events`: SSE stream of domain events.
pub async fn event_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            let event_name = match event.as_ref() {
                DomainEvent::ResponseGenerated { .. } => "response_generated",
                DomainEvent::ToolExecuted { .. } => "tool_executed",
                DomainEvent::StepCompleted { .. } => "step_completed",
                DomainEvent::ErrorOccurred { .. } => "error_occurred",
            };
            Ok(SseEvent::default().event(event_name).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use crate::build_router;
    use crate::tests::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use duckling_transcript::{Transcript, TurnStatus, decode_frames};
    use futures::StreamExt;
    use std::convert::Infallible;
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn history() -> serde_json::Value {
        json!({
            "messages": [
                {"role": "user", "parts": [{"type": "text", "text": "My loop never ends"}]}
            ]
        })
    }

    #[tokio::test]
    async fn chat_streams_frames() {
        let app = build_router(test_state(Ok("What does the loop condition check?")));
        let response = app.oneshot(chat_request(history())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("event: message-start"));
        assert!(text.contains("event: finish"));

        let frames: Vec<_> = decode_frames(futures::stream::iter([Ok::<_, Infallible>(body)]))
            .collect()
            .await;

        let mut transcript = Transcript::new();
        for frame in frames {
            transcript.apply(&frame.unwrap()).unwrap();
        }
        assert_eq!(transcript.status(), &TurnStatus::Completed);
        assert_eq!(
            transcript.view()[0].text(),
            "What does the loop condition check?"
        );
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let app = build_router(test_state(Ok("unused")));
        let response = app
            .oneshot(chat_request(json!({"messages": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let app = build_router(test_state(Ok("unused")));
        let response = app
            .oneshot(chat_request(json!({"history": "nope"})))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn provider_failure_before_first_frame_is_bad_gateway() {
        let app = build_router(test_state(Err("model overloaded")));
        let response = app.oneshot(chat_request(history())).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("model overloaded"));
    }

    #[tokio::test]
    async fn lists_enabled_tools() {
        let app = build_router(test_state(Ok("unused")));
        let req = Request::builder()
            .uri("/api/tools")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["count"], 3);
        let names: Vec<&str> = json["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["github_issue", "log_debug_step", "weather_lookup"]);
    }
}
