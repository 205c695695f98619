//! Bridges a pull-based [`EventSource`] to a push-based SSE emitter.
//!
//! One producer task per stream pulls events, serialises them and pushes them
//! onto a bounded channel. The consumer turns channel messages into
//! downstream SSE frames:
//!
//! ```text
//! event:message
//! data:{"id":"1",...}
//!
//! event:stop
//! data:[DONE]
//! ```

use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::client::{ClientError, EventSource};
use crate::model::Streamable;
use crate::options::RelayOptions;
use crate::sse::is_done_marker;

pub const MESSAGE_EVENT: &str = "message";
pub const STOP_EVENT: &str = "stop";
pub const ERROR_EVENT: &str = "error";

/// Item carried by the relay channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// One serialised event.
    Event(String),
    /// The source ended cleanly.
    Finished,
    /// The source failed; carries the error message.
    Error(String),
}

/// One downstream SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: String,
}

impl SseFrame {
    pub fn message(data: String) -> Self {
        Self {
            event: MESSAGE_EVENT,
            data,
        }
    }

    /// The terminal frame sent on both clean completion and failure.
    pub fn stop() -> Self {
        Self {
            event: STOP_EVENT,
            data: "[DONE]".to_string(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            event: ERROR_EVENT,
            data: message,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.event == STOP_EVENT && is_done_marker(&self.data)
    }

    /// Render the frame in SSE wire format. Multi-line data is split over
    /// several `data:` fields.
    pub fn encode(&self) -> String {
        let mut out = format!("event:{}\n", self.event);
        for line in self.data.split('\n') {
            out.push_str("data:");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

impl From<SseFrame> for Event {
    fn from(frame: SseFrame) -> Self {
        Event::default().event(frame.event).data(frame.data)
    }
}

/// Result of a relay that ran to a clean end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    /// Number of events forwarded downstream.
    pub events: usize,
}

/// Spawns relay producer tasks.
pub struct Relay;

impl Relay {
    /// Start relaying `source` on a new task.
    pub fn spawn<S>(source: S, options: RelayOptions) -> RelayHandle
    where
        S: EventSource + 'static,
        S::Event: Streamable,
    {
        Self::spawn_with_token(source, options, CancellationToken::new())
    }

    /// Start relaying `source`, cancelled when `parent` is cancelled.
    ///
    /// Tie `parent` to the lifetime of the downstream connection so a client
    /// disconnect tears down the upstream read.
    pub fn spawn_with_token<S>(
        source: S,
        options: RelayOptions,
        parent: CancellationToken,
    ) -> RelayHandle
    where
        S: EventSource + 'static,
        S::Event: Streamable,
    {
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let cancel = parent.child_token();
        let report_errors = options.report_errors;
        let task = tokio::spawn(
            pump(source, tx, cancel.clone(), options).instrument(info_span!("relay")),
        );

        RelayHandle {
            rx,
            task,
            cancel,
            report_errors,
        }
    }
}

/// Consumer side of a running relay.
pub struct RelayHandle {
    rx: mpsc::Receiver<RelayMessage>,
    task: JoinHandle<Result<RelaySummary, ClientError>>,
    cancel: CancellationToken,
    report_errors: bool,
}

impl RelayHandle {
    /// Token that stops the producer when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the producer and release the upstream.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Receive the next raw channel message.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        self.rx.recv().await
    }

    /// Split into the downstream frame stream and the producer task.
    ///
    /// Awaiting the task yields the error that ended the stream, if any.
    /// Dropping the frame stream cancels the producer.
    pub fn split(
        self,
    ) -> (
        impl Stream<Item = SseFrame> + Send + 'static,
        JoinHandle<Result<RelaySummary, ClientError>>,
    ) {
        let frames = frames(self.rx, self.cancel.drop_guard(), self.report_errors);
        (frames, self.task)
    }

    /// Downstream frame stream; the producer task is detached.
    pub fn into_frames(self) -> impl Stream<Item = SseFrame> + Send + 'static {
        self.split().0
    }

    /// Downstream frames as an axum SSE response.
    pub fn into_sse(self) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
        Sse::new(
            self.into_frames()
                .map(|frame| Ok::<_, Infallible>(Event::from(frame))),
        )
    }
}

struct FrameState {
    rx: mpsc::Receiver<RelayMessage>,
    _guard: DropGuard,
    pending: Option<SseFrame>,
    done: bool,
}

// Ends right after the first terminal marker without waiting for the channel
// to close. A channel closed without a marker still yields one stop frame.
fn frames(
    rx: mpsc::Receiver<RelayMessage>,
    guard: DropGuard,
    report_errors: bool,
) -> impl Stream<Item = SseFrame> + Send + 'static {
    let state = FrameState {
        rx,
        _guard: guard,
        pending: None,
        done: false,
    };

    stream::unfold(state, move |mut state| async move {
        if let Some(frame) = state.pending.take() {
            return Some((frame, state));
        }
        if state.done {
            return None;
        }

        let frame = match state.rx.recv().await {
            Some(RelayMessage::Event(data)) => SseFrame::message(data),
            Some(RelayMessage::Finished) | None => {
                state.done = true;
                SseFrame::stop()
            }
            Some(RelayMessage::Error(message)) => {
                state.done = true;
                if report_errors {
                    state.pending = Some(SseFrame::stop());
                    SseFrame::error(message)
                } else {
                    SseFrame::stop()
                }
            }
        };
        Some((frame, state))
    })
}

async fn pump<S>(
    mut source: S,
    tx: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
    options: RelayOptions,
) -> Result<RelaySummary, ClientError>
where
    S: EventSource,
    S::Event: Streamable,
{
    let result = forward(&mut source, &tx, &cancel, &options).await;
    source.close();

    let marker = match &result {
        Ok(summary) => {
            info!(events = summary.events, "stream finished");
            Some(RelayMessage::Finished)
        }
        Err(ClientError::StreamCancelled) => {
            warn!("stream cancelled by downstream");
            None
        }
        Err(e) => {
            warn!(error = %e, "stream ended with error");
            Some(RelayMessage::Error(e.to_string()))
        }
    };

    if let Some(marker) = marker {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tx.send(marker) => {}
        }
    }
    drop(tx);

    result
}

async fn forward<S>(
    source: &mut S,
    tx: &mpsc::Sender<RelayMessage>,
    cancel: &CancellationToken,
    options: &RelayOptions,
) -> Result<RelaySummary, ClientError>
where
    S: EventSource,
    S::Event: Streamable,
{
    let mut summary = RelaySummary::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::StreamCancelled),
            _ = until(options.deadline) => return Err(ClientError::DeadlineExceeded),
            next = source.recv() => next?,
        };

        let Some(event) = next else {
            return Ok(summary);
        };
        if options.finish_on_empty_choices && !event.has_choices() {
            debug!("event without choices, finishing");
            return Ok(summary);
        }

        let data = serde_json::to_string(&event)?;
        debug!(bytes = data.len(), "forwarding event");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::StreamCancelled),
            _ = until(options.deadline) => return Err(ClientError::DeadlineExceeded),
            sent = tx.send(RelayMessage::Event(data)) => {
                if sent.is_err() {
                    return Err(ClientError::StreamCancelled);
                }
            }
        }
        summary.events += 1;
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatCompletionStreamResponse;
    use crate::options::StreamOptions;
    use crate::stream::tests::{chat_event, chat_reader, frame};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Counts `close` calls on the wrapped source.
    struct Counted<S> {
        inner: S,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl<S: EventSource> EventSource for Counted<S> {
        type Event = S::Event;

        async fn recv(&mut self) -> Result<Option<S::Event>, ClientError> {
            self.inner.recv().await
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close();
        }
    }

    /// Produces events forever.
    struct Endless {
        next: usize,
    }

    #[async_trait]
    impl EventSource for Endless {
        type Event = ChatCompletionStreamResponse;

        async fn recv(&mut self) -> Result<Option<Self::Event>, ClientError> {
            self.next += 1;
            Ok(Some(chat_event(&self.next.to_string(), "x")))
        }

        fn close(&mut self) {}
    }

    /// Never produces anything.
    struct Stalled;

    #[async_trait]
    impl EventSource for Stalled {
        type Event = ChatCompletionStreamResponse;

        async fn recv(&mut self) -> Result<Option<Self::Event>, ClientError> {
            std::future::pending().await
        }

        fn close(&mut self) {}
    }

    fn counted<S: EventSource>(inner: S) -> (Counted<S>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        (
            Counted {
                inner,
                closes: closes.clone(),
            },
            closes,
        )
    }

    #[test]
    fn test_frame_encode() {
        assert_eq!(SseFrame::stop().encode(), "event:stop\ndata:[DONE]\n\n");
        assert_eq!(
            SseFrame::message("{\"id\":\"1\"}".into()).encode(),
            "event:message\ndata:{\"id\":\"1\"}\n\n"
        );
        assert_eq!(
            SseFrame::error("a\nb".into()).encode(),
            "event:error\ndata:a\ndata:b\n\n"
        );
        assert!(SseFrame::stop().is_stop());
        assert!(!SseFrame::message("[DONE]".into()).is_stop());
    }

    #[tokio::test]
    async fn test_single_event_then_stop() {
        let event = chat_event("1", "hello");
        let input = format!("{}data: [DONE]\n", frame(&event));
        let (source, closes) = counted(chat_reader(&input, StreamOptions::default()));

        let (frames, task) = Relay::spawn(source, RelayOptions::default()).split();
        let frames: Vec<SseFrame> = frames.collect().await;

        assert_eq!(
            frames,
            vec![
                SseFrame::message(serde_json::to_string(&event).unwrap()),
                SseFrame::stop(),
            ]
        );
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.events, 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_too_many_empty_messages_stops() {
        let (source, closes) = counted(chat_reader(&"\n".repeat(11), StreamOptions::default()));

        let (frames, task) = Relay::spawn(source, RelayOptions::default()).split();
        let frames: Vec<SseFrame> = frames.collect().await;

        assert_eq!(frames, vec![SseFrame::stop()]);
        assert!(matches!(
            task.await.unwrap(),
            Err(ClientError::TooManyEmptyMessages)
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_structured_error_stops() {
        let input = r#"{"error":{"message":"boom","type":"server_error"}}"#;
        let reader = chat_reader(input, StreamOptions::default());
        let (frames, task) = Relay::spawn(reader, RelayOptions::default()).split();
        let frames: Vec<SseFrame> = frames.collect().await;

        assert_eq!(frames, vec![SseFrame::stop()]);
        match task.await.unwrap() {
            Err(ClientError::Api(err)) => {
                assert_eq!(err.message, "boom");
                assert_eq!(err.error_type, "server_error");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_report_errors() {
        let input = "data: {oops\n";
        let options = RelayOptions::default().with_report_errors(true);
        let reader = chat_reader(input, StreamOptions::default());
        let frames: Vec<SseFrame> = Relay::spawn(reader, options)
            .into_frames()
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, ERROR_EVENT);
        assert!(frames[0].data.starts_with("JSON parse error"));
        assert!(frames[1].is_stop());
    }

    #[tokio::test]
    async fn test_order_preserved_beyond_capacity() {
        let events: Vec<_> = (0..250).map(|i| chat_event(&i.to_string(), "t")).collect();
        let mut input: String = events.iter().map(frame).collect();
        input.push_str("data: [DONE]\n");

        let options = RelayOptions::default().with_channel_capacity(4);
        let reader = chat_reader(&input, StreamOptions::default());
        let (frames, task) = Relay::spawn(reader, options).split();
        let frames: Vec<SseFrame> = frames.collect().await;

        assert_eq!(frames.len(), 251);
        for (frame, event) in frames.iter().zip(&events) {
            assert_eq!(frame.data, serde_json::to_string(event).unwrap());
        }
        assert!(frames[250].is_stop());
        assert_eq!(task.await.unwrap().unwrap().events, 250);
    }

    #[tokio::test]
    async fn test_finish_on_empty_choices() {
        let input = format!(
            "{}data: {{\"id\":\"2\",\"choices\":[]}}\n{}",
            frame(&chat_event("1", "a")),
            frame(&chat_event("3", "c"))
        );
        let options = RelayOptions::default().with_finish_on_empty_choices(true);
        let reader = chat_reader(&input, StreamOptions::default());
        let (frames, task) = Relay::spawn(reader, options).split();
        let frames: Vec<SseFrame> = frames.collect().await;

        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_stop());
        assert_eq!(task.await.unwrap().unwrap().events, 1);
    }

    #[tokio::test]
    async fn test_dropped_consumer_cancels_producer() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Counted {
            inner: Endless { next: 0 },
            closes: closes.clone(),
        };
        let options = RelayOptions::default().with_channel_capacity(1);
        let (frames, task) = Relay::spawn(source, options).split();

        let first: Vec<SseFrame> = frames.take(1).collect().await;
        assert_eq!(first.len(), 1);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("producer leaked")
            .unwrap();
        assert!(matches!(result, Err(ClientError::StreamCancelled)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parent_token_cancels() {
        let parent = CancellationToken::new();
        let handle = Relay::spawn_with_token(Stalled, RelayOptions::default(), parent.clone());
        let (frames, task) = handle.split();

        parent.cancel();
        let frames: Vec<SseFrame> = frames.collect().await;
        assert_eq!(frames, vec![SseFrame::stop()]);
        assert!(matches!(
            task.await.unwrap(),
            Err(ClientError::StreamCancelled)
        ));
    }

    #[tokio::test]
    async fn test_handle_cancel() {
        let (source, closes) = counted(Stalled);
        let handle = Relay::spawn(source, RelayOptions::default());
        let token = handle.cancel_token();
        assert!(!token.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());

        let (frames, task) = handle.split();
        let frames: Vec<SseFrame> = tokio::time::timeout(Duration::from_secs(5), frames.collect())
            .await
            .unwrap();
        assert_eq!(frames, vec![SseFrame::stop()]);
        assert!(matches!(
            task.await.unwrap(),
            Err(ClientError::StreamCancelled)
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline() {
        let options = RelayOptions::default().with_timeout(Duration::from_millis(50));
        let (frames, task) = Relay::spawn(Stalled, options).split();

        let frames: Vec<SseFrame> = tokio::time::timeout(Duration::from_secs(5), frames.collect())
            .await
            .unwrap();
        assert_eq!(frames, vec![SseFrame::stop()]);
        assert!(matches!(
            task.await.unwrap(),
            Err(ClientError::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn test_raw_messages() {
        let input = format!("{}data: [DONE]\n", frame(&chat_event("1", "a")));
        let reader = chat_reader(&input, StreamOptions::default());
        let mut handle = Relay::spawn(reader, RelayOptions::default());

        assert!(matches!(handle.recv().await, Some(RelayMessage::Event(_))));
        assert_eq!(handle.recv().await, Some(RelayMessage::Finished));
        assert_eq!(handle.recv().await, None);
    }
}
