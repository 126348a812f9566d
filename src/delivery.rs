//! Per-subscription delivery loop
//!
//! Each subscription owns one loop task consuming its message stream. The
//! loop is generic over [`AckableMessage`] so ack/nak behavior is testable
//! without a broker; the real implementation wraps `jetstream::Message`.
//!
//! Messages on one subscription are processed strictly sequentially — the
//! handler is awaited inline before the next message is taken. Ack and nak
//! transmission failures are logged and never retried or surfaced: they
//! happen inside a background task with no synchronous caller, and the
//! broker redelivers unacknowledged messages on its own schedule.

use crate::types::{InboundMessage, MessageHandler};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A broker message that can be acknowledged or negatively acknowledged
///
/// Mirrors the slice of the JetStream message surface the delivery loop
/// needs: subject, payload, sequence metadata, ack, nak.
#[async_trait]
pub trait AckableMessage: Send + Sync {
    /// Subject the message was published on
    fn subject(&self) -> &str;

    /// Payload bytes
    fn payload(&self) -> Bytes;

    /// Broker stream sequence; fails when the message carries no valid
    /// JetStream metadata
    fn sequence(&self) -> Result<u64, async_nats::Error>;

    /// Confirm processing
    async fn ack(&self) -> Result<(), async_nats::Error>;

    /// Request redelivery per the configured redelivery policy
    async fn nak(&self) -> Result<(), async_nats::Error>;
}

/// JetStream-backed message
pub(crate) struct JsMessage(pub(crate) jetstream::Message);

#[async_trait]
impl AckableMessage for JsMessage {
    fn subject(&self) -> &str {
        self.0.subject.as_str()
    }

    fn payload(&self) -> Bytes {
        self.0.payload.clone()
    }

    fn sequence(&self) -> Result<u64, async_nats::Error> {
        self.0.info().map(|info| info.stream_sequence)
    }

    async fn ack(&self) -> Result<(), async_nats::Error> {
        self.0.ack().await
    }

    async fn nak(&self) -> Result<(), async_nats::Error> {
        self.0.ack_with(AckKind::Nak(None)).await
    }
}

/// Run one subscription's delivery loop until cancellation or stream end
///
/// Cancellation is only observed between messages — an in-flight handler
/// call always finishes naturally.
pub(crate) async fn deliver_loop<S, M, E>(
    topic: String,
    mut messages: S,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<M, E>> + Unpin,
    M: AckableMessage,
    E: std::fmt::Display,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = messages.next() => next,
        };

        match next {
            Some(Ok(message)) => process(&topic, &message, handler.as_ref()).await,
            Some(Err(e)) => {
                tracing::warn!(topic = %topic, error = %e, "subscription transport error");
            }
            None => {
                tracing::debug!(topic = %topic, "message stream closed");
                break;
            }
        }
    }
}

/// Wait for cancellation, then issue exactly one unsubscribe attempt
///
/// The unsubscribe action is injected so lifecycle behavior is testable
/// without a broker. A failed unsubscribe is logged as a warning and never
/// propagated — cancellation always completes from the caller's
/// perspective.
pub(crate) async fn watch_unsubscribe<F, Fut>(
    topic: String,
    consumer: String,
    cancel: CancellationToken,
    unsubscribe: F,
) where
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = Result<(), async_nats::Error>> + Send,
{
    cancel.cancelled().await;
    match unsubscribe().await {
        Ok(()) => {
            tracing::debug!(topic = %topic, consumer = %consumer, "unsubscribed")
        }
        Err(e) => tracing::warn!(
            topic = %topic,
            consumer = %consumer,
            error = %e,
            "error while unsubscribing"
        ),
    }
}

/// Resolve one message to an ack, a nak, or a silent drop
async fn process<M>(topic: &str, message: &M, handler: &dyn MessageHandler)
where
    M: AckableMessage + ?Sized,
{
    let subject = message.subject().to_string();

    // No valid sequence metadata means this is not a JetStream message we
    // can account for; drop it without ack, nak, or handler invocation and
    // let the broker redeliver.
    let sequence = match message.sequence() {
        Ok(sequence) => sequence,
        Err(e) => {
            tracing::error!(subject = %subject, error = %e, "invalid message metadata, dropping");
            return;
        }
    };

    tracing::debug!(subject = %subject, sequence, "processing message");

    let inbound = InboundMessage::new(topic, &subject, message.payload());
    match handler.handle(inbound).await {
        Ok(()) => {
            if let Err(e) = message.ack().await {
                tracing::error!(subject = %subject, sequence, error = %e, "failed to send ack");
            }
        }
        Err(e) => {
            tracing::error!(subject = %subject, sequence, error = %e, "handler failed, requesting redelivery");
            if let Err(nak_err) = message.nak().await {
                tracing::error!(subject = %subject, sequence, error = %nak_err, "failed to send nak");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HandlerFn, METADATA_KEY_TOPIC};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockMessage {
        subject: String,
        payload: Bytes,
        sequence: Option<u64>,
        fail_ack: bool,
        fail_nak: bool,
        actions: Arc<Mutex<Vec<String>>>,
    }

    impl MockMessage {
        fn new(subject: &str, sequence: u64, actions: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                subject: subject.to_string(),
                payload: Bytes::from_static(b"payload"),
                sequence: Some(sequence),
                fail_ack: false,
                fail_nak: false,
                actions,
            }
        }

        fn record(&self, action: &str) {
            self.actions
                .lock()
                .unwrap()
                .push(format!("{}:{}", action, self.subject));
        }
    }

    #[async_trait]
    impl AckableMessage for MockMessage {
        fn subject(&self) -> &str {
            &self.subject
        }

        fn payload(&self) -> Bytes {
            self.payload.clone()
        }

        fn sequence(&self) -> Result<u64, async_nats::Error> {
            self.sequence.ok_or_else(|| "no metadata".into())
        }

        async fn ack(&self) -> Result<(), async_nats::Error> {
            self.record("ack");
            if self.fail_ack {
                return Err("ack send failed".into());
            }
            Ok(())
        }

        async fn nak(&self) -> Result<(), async_nats::Error> {
            self.record("nak");
            if self.fail_nak {
                return Err("nak send failed".into());
            }
            Ok(())
        }
    }

    fn ok_stream(
        messages: Vec<MockMessage>,
    ) -> impl Stream<Item = Result<MockMessage, Infallible>> + Unpin {
        futures::stream::iter(messages.into_iter().map(Ok))
    }

    fn ok_handler() -> Arc<dyn MessageHandler> {
        Arc::new(HandlerFn(|_m: InboundMessage| async move { Ok(()) }))
    }

    fn failing_handler() -> Arc<dyn MessageHandler> {
        Arc::new(HandlerFn(|_m: InboundMessage| async move {
            Err("handler rejected message".into())
        }))
    }

    #[tokio::test]
    async fn test_success_acks() {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let messages = vec![MockMessage::new("orders.created", 1, actions.clone())];

        deliver_loop(
            "orders.created".to_string(),
            ok_stream(messages),
            ok_handler(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*actions.lock().unwrap(), vec!["ack:orders.created"]);
    }

    #[tokio::test]
    async fn test_handler_failure_naks_without_ack() {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let messages = vec![MockMessage::new("orders.created", 1, actions.clone())];

        deliver_loop(
            "orders.created".to_string(),
            ok_stream(messages),
            failing_handler(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*actions.lock().unwrap(), vec!["nak:orders.created"]);
    }

    #[tokio::test]
    async fn test_nak_failure_does_not_stall_loop() {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let mut first = MockMessage::new("t.a", 1, actions.clone());
        first.fail_nak = true;
        let second = MockMessage::new("t.b", 2, actions.clone());

        deliver_loop(
            "t".to_string(),
            ok_stream(vec![first, second]),
            failing_handler(),
            CancellationToken::new(),
        )
        .await;

        // one nak attempt each, no retries of the failed nak
        assert_eq!(*actions.lock().unwrap(), vec!["nak:t.a", "nak:t.b"]);
    }

    #[tokio::test]
    async fn test_ack_failure_is_swallowed() {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let mut first = MockMessage::new("t.a", 1, actions.clone());
        first.fail_ack = true;
        let second = MockMessage::new("t.b", 2, actions.clone());

        deliver_loop(
            "t".to_string(),
            ok_stream(vec![first, second]),
            ok_handler(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*actions.lock().unwrap(), vec!["ack:t.a", "ack:t.b"]);
    }

    #[tokio::test]
    async fn test_invalid_metadata_drops_without_ack_or_nak() {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let mut poisoned = MockMessage::new("t.a", 0, actions.clone());
        poisoned.sequence = None;

        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let handler = Arc::new(HandlerFn(move |_m: InboundMessage| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        deliver_loop(
            "t".to_string(),
            ok_stream(vec![poisoned]),
            handler,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert!(actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handler_sees_subject_metadata() {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let messages = vec![MockMessage::new("orders.created.eu", 7, actions.clone())];

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = Arc::new(HandlerFn(move |m: InboundMessage| {
            let sink = sink.clone();
            async move {
                sink.lock()
                    .unwrap()
                    .push((m.topic, m.metadata[METADATA_KEY_TOPIC].clone()));
                Ok(())
            }
        }));

        deliver_loop(
            "orders.created".to_string(),
            ok_stream(messages),
            handler,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(
                "orders.created".to_string(),
                "orders.created.eu".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_redeliveries_judged_independently() {
        // the same logical message delivered twice: first attempt fails and
        // naks, second attempt succeeds and acks
        let actions = Arc::new(Mutex::new(Vec::new()));
        let first = MockMessage::new("t.a", 5, actions.clone());
        let redelivery = MockMessage::new("t.a", 5, actions.clone());

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let handler = Arc::new(HandlerFn(move |_m: InboundMessage| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("transient".into())
                } else {
                    Ok(())
                }
            }
        }));

        deliver_loop(
            "t".to_string(),
            ok_stream(vec![first, redelivery]),
            handler,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*actions.lock().unwrap(), vec!["nak:t.a", "ack:t.a"]);
    }

    #[tokio::test]
    async fn test_sequential_processing_never_overlaps() {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let messages: Vec<_> = (1..=5)
            .map(|i| MockMessage::new("t.a", i, actions.clone()))
            .collect();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let (in_flight_h, overlap_h) = (in_flight.clone(), overlap.clone());
        let handler = Arc::new(HandlerFn(move |_m: InboundMessage| {
            let in_flight = in_flight_h.clone();
            let overlap = overlap_h.clone();
            async move {
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        deliver_loop(
            "t".to_string(),
            ok_stream(messages),
            handler,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert_eq!(actions.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_transport_errors_are_skipped() {
        let actions = Arc::new(Mutex::new(Vec::new()));
        let items: Vec<Result<MockMessage, String>> = vec![
            Err("slow consumer".to_string()),
            Ok(MockMessage::new("t.a", 1, actions.clone())),
        ];

        deliver_loop(
            "t".to_string(),
            futures::stream::iter(items),
            ok_handler(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*actions.lock().unwrap(), vec!["ack:t.a"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_loop_between_messages() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<MockMessage, Infallible>>(8);
        let actions = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let loop_task = tokio::spawn(deliver_loop(
            "t".to_string(),
            tokio_stream::wrappers::ReceiverStream::new(rx),
            ok_handler(),
            cancel.clone(),
        ));

        tx.send(Ok(MockMessage::new("t.a", 1, actions.clone())))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), loop_task)
            .await
            .expect("loop did not stop after cancellation")
            .unwrap();
        assert_eq!(*actions.lock().unwrap(), vec!["ack:t.a"]);
    }

    #[tokio::test]
    async fn test_watcher_unsubscribes_exactly_once_on_cancel() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = attempts.clone();
        let watcher = tokio::spawn(watch_unsubscribe(
            "t".to_string(),
            "c1".to_string(),
            cancel.clone(),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        ));

        // no unsubscribe before cancellation
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watcher did not stop after cancellation")
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watcher_swallows_unsubscribe_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = attempts.clone();
        let watcher = tokio::spawn(watch_unsubscribe(
            "t".to_string(),
            "c1".to_string(),
            cancel.clone(),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("consumer delete failed".into())
            },
        ));

        cancel.cancel();
        // completes despite the failure, with a single attempt
        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watcher did not stop after failed unsubscribe")
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
