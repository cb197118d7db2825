//! Topic router: topic-filter → decoder → handler bindings with fan-out dispatch
//!
//! Every registered route whose filter matches an incoming topic receives the
//! message; there is no precedence between overlapping filters. Each route
//! decodes the payload on its own, so a payload that one route cannot decode
//! still reaches the others. Handler errors and panics are caught and logged
//! per route and never reach the caller of [`TopicRouter::dispatch`].

pub mod decoder;
pub mod handler;
pub mod pattern;

pub use decoder::{JsonDecoder, PayloadDecoder, RawDecoder, TextDecoder};
pub use handler::{handler_fn, FnHandler, MessageHandler};
pub use pattern::TopicPattern;

use crate::error::{DecodeError, HandlerError, RouterError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use rumqttc::v5::mqttbytes::QoS;
use serde::de::DeserializeOwned;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, Instrument, Span};

/// Outcome of running one route against one message
enum RouteOutcome {
    Delivered,
    DecodeFailed(DecodeError),
    HandlerFailed(HandlerError),
}

/// Type-erased decode-then-handle closure of a route
type ErasedRoute = Box<dyn Fn(String, Bytes) -> BoxFuture<'static, RouteOutcome> + Send + Sync>;

/// One registered binding, immutable after registration
pub struct RouteEntry {
    pattern: TopicPattern,
    qos: QoS,
    payload_kind: &'static str,
    invoke: ErasedRoute,
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry")
            .field("pattern", &self.pattern.as_str())
            .field("qos", &self.qos)
            .field("payload_kind", &self.payload_kind)
            .field("invoke", &"<function>")
            .finish()
    }
}

impl RouteEntry {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn payload_kind(&self) -> &'static str {
        self.payload_kind
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.pattern.matches(topic)
    }
}

/// What happened to one dispatched message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Routes whose filter matched the topic
    pub matched: usize,
    /// Routes whose handler completed successfully
    pub delivered: usize,
    /// Routes that could not decode the payload
    pub decode_failures: usize,
    /// Routes whose handler returned an error or panicked
    pub handler_failures: usize,
}

/// Registry of topic routes
pub struct TopicRouter {
    entries: RwLock<Vec<Arc<RouteEntry>>>,
    span: Span,
}

impl std::fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRouter")
            .field("patterns", &self.list_registered_patterns())
            .finish()
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            span: crate::router_span!(),
        }
    }

    /// Log everything this router emits inside `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Bind a topic filter to a decoder and a handler
    pub fn register<D, H>(
        &self,
        pattern: &str,
        decoder: D,
        handler: H,
        qos: QoS,
    ) -> Result<(), RouterError>
    where
        D: PayloadDecoder,
        H: MessageHandler<D::Output>,
    {
        let matcher = TopicPattern::compile(pattern)?;
        let payload_kind = decoder.kind();
        let decoder = Arc::new(decoder);
        let handler = Arc::new(handler);

        let invoke: ErasedRoute = Box::new(move |topic: String, payload: Bytes| {
            let decoder = decoder.clone();
            let handler = handler.clone();
            async move {
                let message = match decoder.decode(&payload) {
                    Ok(message) => message,
                    Err(e) => return RouteOutcome::DecodeFailed(e),
                };
                match AssertUnwindSafe(handler.handle(&topic, message))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => RouteOutcome::Delivered,
                    Ok(Err(e)) => RouteOutcome::HandlerFailed(e),
                    Err(panic) => RouteOutcome::HandlerFailed(HandlerError::from_panic(panic)),
                }
            }
            .boxed()
        });

        let entry = Arc::new(RouteEntry {
            pattern: matcher,
            qos,
            payload_kind,
            invoke,
        });

        self.span.in_scope(|| {
            debug!(pattern = %pattern, payload_kind = payload_kind, qos = ?qos, "Registered route");
        });

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }

    /// Bind a topic filter to a handler of JSON payloads
    pub fn register_json<T, H>(&self, pattern: &str, handler: H, qos: QoS) -> Result<(), RouterError>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T>,
    {
        self.register(pattern, JsonDecoder::<T>::new(), handler, qos)
    }

    /// Deliver a message to every route whose filter matches `topic`
    pub async fn dispatch(&self, topic: &str, payload: Bytes) -> DispatchReport {
        let matching: Vec<Arc<RouteEntry>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.matches(topic))
            .cloned()
            .collect();

        let mut report = DispatchReport {
            matched: matching.len(),
            ..Default::default()
        };

        async {
            if matching.is_empty() {
                debug!(topic = %topic, "No route matches topic");
                return;
            }

            for entry in matching {
                match (entry.invoke)(topic.to_string(), payload.clone()).await {
                    RouteOutcome::Delivered => report.delivered += 1,
                    RouteOutcome::DecodeFailed(e) => {
                        report.decode_failures += 1;
                        debug!(
                            topic = %topic,
                            pattern = %entry.pattern(),
                            payload_kind = entry.payload_kind(),
                            error = %e,
                            "Payload could not be decoded for route"
                        );
                    }
                    RouteOutcome::HandlerFailed(e) => {
                        report.handler_failures += 1;
                        error!(
                            topic = %topic,
                            pattern = %entry.pattern(),
                            error = %e,
                            "Message handler failed"
                        );
                    }
                }
            }
        }
        .instrument(self.span.clone())
        .await;

        report
    }

    /// Registered filters, deduplicated, in first-registration order
    pub fn list_registered_patterns(&self) -> Vec<String> {
        self.subscriptions()
            .into_iter()
            .map(|(pattern, _)| pattern)
            .collect()
    }

    /// Registered filters with the highest QoS requested for each
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut subscriptions: Vec<(String, QoS)> = Vec::new();

        for entry in entries.iter() {
            match subscriptions
                .iter_mut()
                .find(|(pattern, _)| pattern == entry.pattern())
            {
                Some((_, qos)) => {
                    if (entry.qos() as u8) > (*qos as u8) {
                        *qos = entry.qos();
                    }
                }
                None => subscriptions.push((entry.pattern().to_string(), entry.qos())),
            }
        }

        subscriptions
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reading {
        celsius: f64,
    }

    /// Records every (topic, message) it sees
    struct Recorder<T> {
        seen: Arc<Mutex<Vec<(String, T)>>>,
    }

    impl<T> Recorder<T> {
        fn new() -> (Self, Arc<Mutex<Vec<(String, T)>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (Self { seen: seen.clone() }, seen)
        }
    }

    #[async_trait::async_trait]
    impl<T: Send + 'static> MessageHandler<T> for Recorder<T> {
        async fn handle(&self, topic: &str, message: T) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push((topic.to_string(), message));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_matching_route() {
        // Arrange
        let router = TopicRouter::new();
        let (recorder, seen) = Recorder::<Reading>::new();
        router
            .register_json("sensors/+/temp", recorder, QoS::AtLeastOnce)
            .unwrap();

        // Act
        let report = router
            .dispatch("sensors/room1/temp", Bytes::from_static(br#"{"celsius":21.5}"#))
            .await;
        let miss = router
            .dispatch("sensors/room1/hall/temp", Bytes::from_static(br#"{"celsius":1.0}"#))
            .await;

        // Assert
        assert_eq!(report.matched, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(miss, DispatchReport::default());
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![("sensors/room1/temp".to_string(), Reading { celsius: 21.5 })]
        );
    }

    #[tokio::test]
    async fn test_overlapping_patterns_all_fire() {
        let router = TopicRouter::new();
        let (specific, specific_seen) = Recorder::<String>::new();
        let (broad, broad_seen) = Recorder::<String>::new();
        router
            .register("sensors/+/temp", TextDecoder, specific, QoS::AtMostOnce)
            .unwrap();
        router
            .register("sensors/#", TextDecoder, broad, QoS::AtMostOnce)
            .unwrap();

        let report = router
            .dispatch("sensors/room1/temp", Bytes::from_static(b"21"))
            .await;

        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(specific_seen.lock().unwrap().len(), 1);
        assert_eq!(broad_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_is_isolated_per_route() {
        let router = TopicRouter::new();
        let (json, json_seen) = Recorder::<Reading>::new();
        let (raw, raw_seen) = Recorder::<Bytes>::new();
        router
            .register_json("devices/#", json, QoS::AtLeastOnce)
            .unwrap();
        router
            .register("devices/#", RawDecoder, raw, QoS::AtLeastOnce)
            .unwrap();

        let report = router
            .dispatch("devices/d1", Bytes::from_static(b"not json"))
            .await;

        assert_eq!(report.matched, 2);
        assert_eq!(report.decode_failures, 1);
        assert_eq!(report.delivered, 1);
        assert!(json_seen.lock().unwrap().is_empty());
        assert_eq!(raw_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_do_not_propagate() {
        let router = TopicRouter::new();
        router
            .register(
                "jobs/#",
                TextDecoder,
                handler_fn(|_topic: String, _message: String| async move {
                    Err::<(), HandlerError>(HandlerError::failed("database unavailable"))
                }),
                QoS::AtLeastOnce,
            )
            .unwrap();
        router
            .register(
                "jobs/#",
                TextDecoder,
                handler_fn(|_topic: String, message: String| async move {
                    if message == "explode" {
                        panic!("handler exploded");
                    }
                    Ok::<(), HandlerError>(())
                }),
                QoS::AtLeastOnce,
            )
            .unwrap();
        let (recorder, seen) = Recorder::<String>::new();
        router
            .register("jobs/#", TextDecoder, recorder, QoS::AtLeastOnce)
            .unwrap();

        let first = router
            .dispatch("jobs/1", Bytes::from_static(b"explode"))
            .await;
        let second = router.dispatch("jobs/2", Bytes::from_static(b"ok")).await;

        assert_eq!(first.matched, 3);
        assert_eq!(first.handler_failures, 2);
        assert_eq!(first.delivered, 1);
        assert_eq!(second.handler_failures, 1);
        assert_eq!(second.delivered, 2);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_patterns_deduplicated_in_registration_order() {
        let router = TopicRouter::new();
        let noop = || handler_fn(|_t: String, _m: Bytes| async move { Ok::<(), HandlerError>(()) });

        router
            .register("b/+", RawDecoder, noop(), QoS::AtMostOnce)
            .unwrap();
        router
            .register("a/#", RawDecoder, noop(), QoS::AtMostOnce)
            .unwrap();
        router
            .register("b/+", RawDecoder, noop(), QoS::ExactlyOnce)
            .unwrap();

        assert_eq!(router.len(), 3);
        assert_eq!(
            router.list_registered_patterns(),
            vec!["b/+".to_string(), "a/#".to_string()]
        );
        assert_eq!(
            router.subscriptions(),
            vec![
                ("b/+".to_string(), QoS::ExactlyOnce),
                ("a/#".to_string(), QoS::AtMostOnce)
            ]
        );
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let router = TopicRouter::new();
        let (recorder, _) = Recorder::<Bytes>::new();
        let result = router.register("a/#/b", RawDecoder, recorder, QoS::AtMostOnce);

        assert!(matches!(result, Err(RouterError::InvalidPattern { .. })));
        assert!(router.is_empty());
    }
}
