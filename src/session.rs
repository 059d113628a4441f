use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::Role;
use crate::sse::{parse_frame, SseEvent, SseParser, StreamFrame};
use crate::types::{Source, ToolResultRecord};
use crate::upstream::RelayError;

/// Turn lifecycle: `Idle → Sending → Streaming → Idle` on success, back to
/// `Idle` on failure or cancellation. Cancellation is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SessionMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub sources: Vec<Source>,
    pub tool_results: Vec<ToolResultRecord>,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    fn new(role: Role, content: &str) -> Self {
        SessionMessage {
            id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            sources: Vec::new(),
            tool_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Owned per-conversation chat state. Mutated only by [`run_turn`]; the caller
/// holds it and enforces single-writer discipline. Holding the cancellation
/// token outside the running turn is what makes `stop_generation` possible
/// while the turn borrows the session.
#[derive(Debug, Default)]
pub struct ChatSession {
    pub conversation_id: Option<Uuid>,
    pub messages: Vec<SessionMessage>,
    state: TurnState,
}

impl Default for TurnState {
    fn default() -> Self {
        TurnState::Idle
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn assistant_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m.role, Role::Assistant))
            .count()
    }

    fn begin_turn(&mut self, user_text: &str) -> Result<(), RelayError> {
        if self.state != TurnState::Idle {
            return Err(RelayError::TurnInProgress);
        }
        self.state = TurnState::Sending;
        self.messages.push(SessionMessage::new(Role::User, user_text));
        Ok(())
    }
}

/// Scratch state for the in-flight turn. The assistant message is only
/// materialized on the first content delta, so an error before any output
/// leaves no assistant message behind.
#[derive(Default)]
struct TurnDraft {
    assistant_index: Option<usize>,
    accumulated: String,
    pending_sources: Vec<Source>,
    pending_tool_results: Vec<ToolResultRecord>,
}

impl TurnDraft {
    fn apply(&mut self, session: &mut ChatSession, frame: StreamFrame) {
        match frame {
            StreamFrame::Delta(delta) => {
                self.accumulated.push_str(&delta);
                let index = match self.assistant_index {
                    Some(index) => index,
                    None => {
                        let mut message = SessionMessage::new(Role::Assistant, "");
                        message.sources = std::mem::take(&mut self.pending_sources);
                        message.tool_results = std::mem::take(&mut self.pending_tool_results);
                        session.messages.push(message);
                        let index = session.messages.len() - 1;
                        self.assistant_index = Some(index);
                        index
                    }
                };
                // Replace wholesale with the accumulated total; applying the
                // same accumulation twice yields the same message.
                session.messages[index].content = self.accumulated.clone();
            }
            StreamFrame::Sources(sources) => match self.assistant_index {
                Some(index) => session.messages[index].sources = sources,
                None => self.pending_sources = sources,
            },
            StreamFrame::ToolResult(record) => match self.assistant_index {
                Some(index) => session.messages[index].tool_results.push(record),
                None => self.pending_tool_results.push(record),
            },
        }
    }
}

/// Drives one conversation turn: appends the user message, consumes the
/// response byte stream in arrival order, and builds at most one assistant
/// message incrementally. Cancelling the token stops consumption, keeps the
/// partial content as the final message, and reports `Cancelled` rather than
/// an error. Transport failures abort the turn but never discard partial
/// output that was already applied.
pub async fn run_turn<S, E>(
    session: &mut ChatSession,
    user_text: &str,
    byte_stream: S,
    cancel: CancellationToken,
) -> Result<TurnOutcome, RelayError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    RelayError: From<E>,
{
    session.begin_turn(user_text)?;

    let mut stream = byte_stream;
    let mut parser = SseParser::new();
    let mut draft = TurnDraft::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                session.state = TurnState::Idle;
                return Ok(TurnOutcome::Cancelled);
            }
            next = stream.next() => match next {
                Some(Ok(bytes)) => {
                    if session.state == TurnState::Sending {
                        session.state = TurnState::Streaming;
                    }
                    for event in parser.push(&bytes) {
                        match event {
                            SseEvent::Done => {
                                session.state = TurnState::Idle;
                                return Ok(TurnOutcome::Completed);
                            }
                            SseEvent::Data(payload) => {
                                if let Some(frame) = parse_frame(&payload) {
                                    draft.apply(session, frame);
                                }
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    session.state = TurnState::Idle;
                    return Err(RelayError::from(e));
                }
                // Upstream closed without a terminator; treat as complete.
                None => {
                    session.state = TurnState::Idle;
                    return Ok(TurnOutcome::Completed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use std::time::Duration;

    fn ok_chunk(text: &str) -> Result<Bytes, RelayError> {
        Ok(Bytes::from(text.to_string()))
    }

    fn delta_line(content: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[tokio::test]
    async fn two_delta_scenario_builds_one_assistant_message() {
        let mut session = ChatSession::new();
        let frames = vec![
            ok_chunk(&delta_line("CS101 is")),
            ok_chunk(&delta_line(" an intro course.")),
            ok_chunk("data: [DONE]\n\n"),
        ];
        let byte_stream = stream::iter(frames);

        let outcome = run_turn(
            &mut session,
            "what is CS101?",
            byte_stream,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.assistant_message_count(), 1);

        let assistant = session.messages.last().unwrap();
        assert!(matches!(assistant.role, Role::Assistant));
        assert_eq!(assistant.content, "CS101 is an intro course.");
    }

    #[tokio::test]
    async fn one_byte_chunking_yields_same_final_message() {
        let wire = format!(
            "{}{}data: [DONE]\n\n",
            delta_line("CS101 is"),
            delta_line(" an intro course.")
        );
        let chunks: Vec<Result<Bytes, RelayError>> = wire
            .as_bytes()
            .iter()
            .map(|b| Ok(Bytes::copy_from_slice(std::slice::from_ref(b))))
            .collect();

        let mut session = ChatSession::new();
        run_turn(
            &mut session,
            "what is CS101?",
            stream::iter(chunks),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(session.assistant_message_count(), 1);
        assert_eq!(
            session.messages.last().unwrap().content,
            "CS101 is an intro course."
        );
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_content_without_error() {
        let mut session = ChatSession::new();
        let cancel = CancellationToken::new();

        // One delta arrives, then the stream hangs until cancelled.
        let byte_stream = stream::iter(vec![ok_chunk(&delta_line("partial answer"))])
            .chain(stream::pending());
        let mut byte_stream = Box::pin(byte_stream);

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            }
        };

        let (outcome, _) = tokio::join!(
            run_turn(&mut session, "tell me everything", &mut byte_stream, cancel),
            canceller
        );

        assert_eq!(outcome.unwrap(), TurnOutcome::Cancelled);
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.assistant_message_count(), 1);
        assert_eq!(session.messages.last().unwrap().content, "partial answer");
    }

    #[tokio::test]
    async fn transport_error_before_output_creates_no_assistant_message() {
        let mut session = ChatSession::new();
        let byte_stream =
            stream::iter(vec![Err::<Bytes, RelayError>(RelayError::RateLimited)]);

        let err = run_turn(
            &mut session,
            "what is CS101?",
            byte_stream,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::RateLimited));
        assert!(!err.user_message().is_empty());
        assert_eq!(session.state(), TurnState::Idle);
        assert_eq!(session.assistant_message_count(), 0);
        // The user message itself is kept.
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn transport_error_mid_stream_keeps_partial_content() {
        let mut session = ChatSession::new();
        let byte_stream = stream::iter(vec![
            ok_chunk(&delta_line("partial")),
            Err(RelayError::UpstreamStatus(500)),
        ]);

        let err = run_turn(
            &mut session,
            "question",
            byte_stream,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RelayError::UpstreamStatus(500)));
        assert_eq!(session.messages.last().unwrap().content, "partial");
    }

    #[tokio::test]
    async fn sources_and_tool_results_attach_to_assistant_message() {
        let mut session = ChatSession::new();
        let sources_line = "data: {\"type\":\"sources\",\"sources\":[{\"title\":\"CS101\",\"content\":\"intro programming\",\"relevance\":0.9}]}\n\n";
        let tool_line = "data: {\"type\":\"tool_result\",\"tool\":\"course_lookup\",\"result\":{\"code\":\"CS101\"}}\n\n";
        let frames = vec![
            ok_chunk(sources_line),
            ok_chunk(tool_line),
            ok_chunk(&delta_line("CS101 is an intro course.")),
            ok_chunk("data: [DONE]\n\n"),
        ];

        run_turn(
            &mut session,
            "what is CS101?",
            stream::iter(frames),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let assistant = session.messages.last().unwrap();
        assert_eq!(assistant.sources.len(), 1);
        assert_eq!(assistant.sources[0].title, "CS101");
        assert_eq!(assistant.tool_results.len(), 1);
        assert_eq!(assistant.tool_results[0].tool, "course_lookup");
        // Side channels never leak into the message text.
        assert_eq!(assistant.content, "CS101 is an intro course.");
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped_without_aborting() {
        let mut session = ChatSession::new();
        let frames = vec![
            ok_chunk("data: {broken json\n\n"),
            ok_chunk(&delta_line("still fine")),
            ok_chunk("data: [DONE]\n\n"),
        ];

        let outcome = run_turn(
            &mut session,
            "question",
            stream::iter(frames),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(session.messages.last().unwrap().content, "still fine");
    }

    #[tokio::test]
    async fn second_send_while_busy_is_rejected() {
        let mut session = ChatSession::new();
        session.begin_turn("first").unwrap();

        let err = session.begin_turn("second").unwrap_err();
        assert!(matches!(err, RelayError::TurnInProgress));
    }
}
