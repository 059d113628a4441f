use actix_web::{post, web, Error, HttpResponse};
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::RequestUser;
use crate::cache::query_hash;
use crate::models::{Conversation, Document, Message, Role};
use crate::prompts::{build_prompt, truncate_chars, MAX_CONTEXT_SNIPPETS};
use crate::ranking::rank_documents;
use crate::sse::{done_line, encode_data_line, parse_frame, SseEvent, SseParser, StreamFrame};
use crate::types::{ChatTurnMessage, RagQueryRequest, Snippet, Source};
use crate::upstream::{self, RelayError};
use crate::AppState;

/// Characters of document text carried in a source record.
const SOURCE_SNIPPET_LEN: usize = 300;

/// How many documents to pull from storage as ranking candidates.
const CANDIDATE_LIMIT: i64 = 200;

/// Frame sent in place of the `[DONE]` terminator when the upstream dies
/// mid-answer.
const STREAM_FAILURE_MESSAGE: &str =
    "The advisor connection dropped before the answer finished. Please try again.";

/// Retrieval-augmented relay. Answers from the query cache when it can,
/// otherwise ranks the advising corpus, builds a bounded prompt, and re-emits
/// the upstream stream as typed frames: one `sources` frame, then `content`
/// deltas, then the `[DONE]` terminator.
#[post("/rag-query")]
pub async fn rag_query(
    app_state: web::Data<Arc<AppState>>,
    user: RequestUser,
    web::Json(request): web::Json<RagQueryRequest>,
) -> Result<HttpResponse, Error> {
    let state = app_state.get_ref().clone();
    let config = &state.config;

    let question = request
        .messages
        .iter()
        .rev()
        .find(|message| message.role == "user")
        .map(|message| message.content.clone())
        .ok_or_else(|| actix_web::error::ErrorBadRequest("At least one user message is required"))?;

    let rate = state
        .cache
        .check_rate_limit(
            &user.user_id,
            config.rate_limit,
            config.rate_limit_window_seconds,
        )
        .await;
    if !rate.allowed {
        return Err(RelayError::RateLimited.into());
    }

    // "chat" mode goes straight upstream; the default "rag" mode retrieves
    // and caches.
    let rag_mode = request.mode.as_deref().unwrap_or("rag") != "chat";

    let cache_key = query_hash(&question);
    if rag_mode {
        let cached = state.cache.get(&cache_key).await;
        if cached.hit {
            info!("Cache hit for query hash {}", cache_key);
            if let Some(value) = cached.value {
                return Ok(replay_cached(&value));
            }
        }
    }

    let sources = if rag_mode {
        retrieve_sources(&state, &question, &request).await
    } else {
        Vec::new()
    };

    let snippets: Vec<Snippet> = sources
        .iter()
        .map(|source| Snippet {
            title: source.title.clone(),
            content: source.content.clone(),
        })
        .collect();
    let system_prompt = build_prompt(&snippets, request.student_context.as_ref());

    let upstream_request = CreateChatCompletionRequest {
        messages: to_upstream_messages(&system_prompt, &request.messages),
        model: config.chat_model.clone(),
        max_tokens: Some(2048),
        stream: Some(true),
        user: Some(user.user_id.clone()),
        ..Default::default()
    };

    let response = upstream::open_stream(&state.http_client, config, &upstream_request).await?;

    let (tx, rx) = mpsc::unbounded::<Bytes>();
    let conversation_id = request.conversation_id;
    let user_id = user.user_id;

    tokio::spawn(async move {
        if !sources.is_empty() {
            let _ = tx.unbounded_send(encode_data_line(
                &json!({"type": "sources", "sources": &sources}),
            ));
        }

        let upstream_stream = Box::pin(response.bytes_stream());
        let answer = match relay_frames(upstream_stream, &tx).await {
            Some(answer) => answer,
            // Failed or abandoned turns never reach the cache or the database.
            None => return,
        };

        if rag_mode && !answer.is_empty() {
            state
                .cache
                .set(
                    &cache_key,
                    json!({"answer": &answer, "sources": &sources}),
                    state.config.cache_ttl_seconds,
                )
                .await;
        }

        if let Some(conversation_id) = conversation_id {
            if let Err(e) =
                persist_turn(&state, conversation_id, &user_id, &question, &answer, &sources).await
            {
                warn!("Failed to persist turn: {:?}", e);
            }
        }

        let _ = tx.unbounded_send(done_line());
    });

    let body = rx.map(Ok::<_, Error>);
    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .streaming(body))
}

/// Drains the upstream byte stream, re-emitting typed frames to the client
/// channel and accumulating the answer text. Returns `None` when the turn did
/// not finish: a mid-stream upstream failure (an `error` frame is sent and no
/// `[DONE]` follows) or a client that went away. Callers must only cache and
/// persist on `Some`.
async fn relay_frames<S, E>(
    mut upstream_stream: S,
    tx: &mpsc::UnboundedSender<Bytes>,
) -> Option<String>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut parser = SseParser::new();
    let mut answer = String::new();

    'consume: while let Some(chunk) = upstream_stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Upstream stream failed mid-turn: {}", e);
                let _ = tx
                    .unbounded_send(encode_data_line(&json!({"error": STREAM_FAILURE_MESSAGE})));
                return None;
            }
        };

        for event in parser.push(&bytes) {
            match event {
                SseEvent::Done => break 'consume,
                SseEvent::Data(payload) => match parse_frame(&payload) {
                    Some(StreamFrame::Delta(delta)) => {
                        answer.push_str(&delta);
                        if tx
                            .unbounded_send(encode_data_line(&json!({"content": delta})))
                            .is_err()
                        {
                            // Client cancelled; stop consuming, not an error.
                            info!("Client dropped the stream, stopping consumption");
                            return None;
                        }
                    }
                    Some(StreamFrame::ToolResult(record)) => {
                        let _ = tx.unbounded_send(encode_data_line(&json!({
                            "type": "tool_result",
                            "tool": record.tool,
                            "result": record.result,
                        })));
                    }
                    Some(StreamFrame::Sources(upstream_sources)) => {
                        let _ = tx.unbounded_send(encode_data_line(
                            &json!({"type": "sources", "sources": upstream_sources}),
                        ));
                    }
                    None => {}
                },
            }
        }
    }

    Some(answer)
}

/// Replays a cached answer as the same frame sequence a live turn produces.
fn replay_cached(value: &serde_json::Value) -> HttpResponse {
    let mut frames: Vec<Result<Bytes, Error>> = Vec::new();

    if let Some(sources) = value
        .get("sources")
        .filter(|s| s.as_array().map_or(false, |a| !a.is_empty()))
    {
        frames.push(Ok(encode_data_line(
            &json!({"type": "sources", "sources": sources}),
        )));
    }
    if let Some(answer) = value.get("answer").and_then(serde_json::Value::as_str) {
        frames.push(Ok(encode_data_line(&json!({"content": answer}))));
    }
    frames.push(Ok(done_line()));

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .streaming(futures::stream::iter(frames))
}

/// Fetches ranking candidates and scores them with the keyword fallback.
/// Retrieval failure degrades to an unsourced answer rather than killing the
/// turn.
async fn retrieve_sources(state: &AppState, question: &str, request: &RagQueryRequest) -> Vec<Source> {
    let department = request
        .student_context
        .as_ref()
        .and_then(|student| student.department.as_deref());

    let documents = match Document::list_candidates(&state.pool, department, CANDIDATE_LIMIT).await
    {
        Ok(documents) => documents,
        Err(e) => {
            warn!("Document retrieval failed, answering without sources: {:?}", e);
            return Vec::new();
        }
    };

    rank_documents(question, &documents, MAX_CONTEXT_SNIPPETS)
        .into_iter()
        .map(|(document, relevance)| Source {
            title: format!("{} {}", document.code, document.title),
            content: truncate_chars(&document.content, SOURCE_SNIPPET_LEN),
            relevance,
        })
        .collect()
}

fn to_upstream_messages(
    system_prompt: &str,
    history: &[ChatTurnMessage],
) -> Vec<ChatCompletionRequestMessage> {
    let mut messages = vec![ChatCompletionRequestMessage::System(
        ChatCompletionRequestSystemMessage {
            content: system_prompt.to_string(),
            ..Default::default()
        },
    )];

    for turn in history {
        match turn.role.as_str() {
            "assistant" => {
                messages.push(ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessage {
                        content: Some(turn.content.clone()),
                        ..Default::default()
                    },
                ));
            }
            // Client-supplied system text is folded in as user context; the
            // relay owns the real system instruction.
            _ => {
                messages.push(ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage {
                        content: ChatCompletionRequestUserMessageContent::Text(
                            turn.content.clone(),
                        ),
                        ..Default::default()
                    },
                ));
            }
        }
    }

    messages
}

async fn persist_turn(
    state: &AppState,
    conversation_id: Uuid,
    user_id: &str,
    question: &str,
    answer: &str,
    sources: &[Source],
) -> anyhow::Result<()> {
    let conversation =
        Conversation::get_or_create(&state.pool, user_id, Some(conversation_id)).await?;

    Message::new(&state.pool, conversation.id, user_id, question, Role::User, None).await?;

    if !answer.is_empty() {
        let sources_json = if sources.is_empty() {
            None
        } else {
            Some(serde_json::to_value(sources)?)
        };
        Message::new(
            &state.pool,
            conversation.id,
            user_id,
            answer,
            Role::Assistant,
            sources_json,
        )
        .await?;
    }

    Conversation::touch(&state.pool, conversation.id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn delta_line(content: &str) -> Result<Bytes, RelayError> {
        Ok(Bytes::from(format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": content}}]})
        )))
    }

    async fn drain(rx: mpsc::UnboundedReceiver<Bytes>) -> String {
        rx.collect::<Vec<Bytes>>()
            .await
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn mid_stream_failure_emits_error_frame_instead_of_done() {
        let (tx, rx) = mpsc::unbounded::<Bytes>();
        let chunks = vec![
            delta_line("partial"),
            Err(RelayError::UpstreamStatus(500)),
        ];

        let answer = relay_frames(stream::iter(chunks), &tx).await;
        drop(tx);
        let wire = drain(rx).await;

        // A failed turn is never reported as a completed one: the partial
        // delta reaches the client, then an error frame and no terminator.
        assert!(answer.is_none());
        assert!(wire.contains("data: {\"content\":\"partial\"}"));
        assert!(wire.contains(STREAM_FAILURE_MESSAGE));
        assert!(!wire.contains("[DONE]"));
    }

    #[tokio::test]
    async fn complete_stream_returns_accumulated_answer() {
        let (tx, rx) = mpsc::unbounded::<Bytes>();
        let chunks = vec![
            delta_line("CS101 is"),
            delta_line(" an intro course."),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];

        let answer = relay_frames(stream::iter(chunks), &tx).await;
        drop(tx);
        let wire = drain(rx).await;

        assert_eq!(answer.as_deref(), Some("CS101 is an intro course."));
        // The terminator belongs to the caller, after caching and persistence.
        assert!(!wire.contains("[DONE]"));
        assert!(!wire.contains("error"));
    }

    #[test]
    fn upstream_messages_start_with_system_prompt() {
        let history = vec![
            ChatTurnMessage {
                role: "user".to_string(),
                content: "what is CS101?".to_string(),
            },
            ChatTurnMessage {
                role: "assistant".to_string(),
                content: "An intro course.".to_string(),
            },
        ];
        let messages = to_upstream_messages("system text", &history);

        assert_eq!(messages.len(), 3);
        assert!(matches!(
            messages[0],
            ChatCompletionRequestMessage::System(_)
        ));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(
            messages[2],
            ChatCompletionRequestMessage::Assistant(_)
        ));
    }
}
