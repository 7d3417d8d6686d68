//! End-to-end router scenarios that don't need a real transport: pending
//! destinations draining once a route appears, in-process delivery, and a
//! request/reply round trip correlated through the reply-caller directory.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clusterbus::domain_types::RequestReplyId;
use clusterbus::message::{Address, Message, MessageType, HEADER_REQUEST_REPLY_ID};
use clusterbus::router::{LocalHandler, MessageRouter, ReplyOutcome, RoutingEntry, UnknownDestinationPolicy};
use clusterbus::scheduler::SingleThreadedDelayedScheduler;

struct CountingHandler {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl LocalHandler for CountingHandler {
    async fn handle(&self, _message: Message) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn new_router() -> Arc<MessageRouter> {
    Arc::new(MessageRouter::new(
        None,
        None,
        Arc::new(SingleThreadedDelayedScheduler::new()),
        UnknownDestinationPolicy::Enqueue,
    ))
}

#[tokio::test]
async fn message_parked_for_unknown_destination_is_delivered_once_route_appears() {
    let router = new_router();
    let count = Arc::new(AtomicUsize::new(0));
    router.register_local_handler(
        "handlerA",
        Arc::new(CountingHandler {
            count: Arc::clone(&count),
        }),
    );

    let message = Message::new(
        MessageType::OneWay,
        "P1",
        "P0",
        clusterbus::message::now_ms() + 10_000,
        None,
        b"hello".to_vec(),
    )
    .unwrap();
    router.route(message).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0, "no route yet, should be parked");

    router
        .register_route(
            "P1",
            RoutingEntry {
                address: Address::InProcess {
                    handler_id: "handlerA".to_string(),
                },
                is_globally_visible: false,
                expiry: Instant::now() + Duration::from_secs(60),
                sticky: true,
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1, "parked message should have drained and delivered");
}

#[tokio::test]
async fn reply_completes_registered_caller_before_ttl() {
    let router = new_router();
    let correlation_id = RequestReplyId::generate();

    let receiver = router
        .register_reply_caller(correlation_id, Duration::from_millis(500))
        .await;

    let mut reply = Message::new(
        MessageType::Reply,
        "caller",
        "callee",
        clusterbus::message::now_ms() + 10_000,
        None,
        b"the-answer".to_vec(),
    )
    .unwrap();
    reply.set_header(HEADER_REQUEST_REPLY_ID, correlation_id.to_string());

    router.on_message("calleeChannel", reply).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(100), receiver)
        .await
        .expect("reply should arrive well before the ttl")
        .expect("sender not dropped");
    assert!(matches!(outcome, ReplyOutcome::Success(bytes) if bytes == b"the-answer".to_vec()));
}

#[tokio::test]
async fn reply_without_registered_caller_is_dropped_silently() {
    let router = new_router();
    let mut reply = Message::new(
        MessageType::Reply,
        "caller",
        "callee",
        clusterbus::message::now_ms() + 10_000,
        None,
        b"orphan".to_vec(),
    )
    .unwrap();
    reply.set_header(HEADER_REQUEST_REPLY_ID, RequestReplyId::generate().to_string());

    let result = router.on_message("calleeChannel", reply).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn multicast_publish_reaches_every_subscriber() {
    let router = new_router();
    let count = Arc::new(AtomicUsize::new(0));
    for handler_id in ["subA", "subB"] {
        router.register_local_handler(
            handler_id,
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        );
        router
            .register_route(
                handler_id,
                RoutingEntry {
                    address: Address::InProcess {
                        handler_id: handler_id.to_string(),
                    },
                    is_globally_visible: false,
                    expiry: Instant::now() + Duration::from_secs(60),
                    sticky: true,
                },
            )
            .await
            .unwrap();
        router.subscribe_multicast("topicA", handler_id);
    }

    let message = Message::new(
        MessageType::Publication,
        "ignored",
        "publisher",
        clusterbus::message::now_ms() + 10_000,
        None,
        b"event".to_vec(),
    )
    .unwrap();
    router.publish_multicast("topicA", message).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn selective_unsubscribe_delivers_subscription_stop_via_route() {
    let router = new_router();
    let count = Arc::new(AtomicUsize::new(0));
    router.register_local_handler(
        "subscriberP1",
        Arc::new(CountingHandler {
            count: Arc::clone(&count),
        }),
    );
    router
        .register_route(
            "subscriberP1",
            RoutingEntry {
                address: Address::InProcess {
                    handler_id: "subscriberP1".to_string(),
                },
                is_globally_visible: false,
                expiry: Instant::now() + Duration::from_secs(60),
                sticky: true,
            },
        )
        .await
        .unwrap();

    let stop = Message::new(
        MessageType::SubscriptionStop,
        "subscriberP1",
        "publisher",
        clusterbus::message::now_ms() + 10_000,
        None,
        b"subscriptionId".to_vec(),
    )
    .unwrap();

    // Unlike multicast unsubscribe (purely local bookkeeping, no message
    // sent), a selective subscription's stop is an explicit message routed
    // like any other: it must reach the subscriber's handler.
    router.route(stop).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
