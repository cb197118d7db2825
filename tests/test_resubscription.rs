//! Subscription bookkeeping and replay after reconnects

use resilient_mqtt::supervisor::{ConnectionSupervisor, ReconnectPolicy, SupervisorState};
use resilient_mqtt::testing::MockTransport;
use resilient_mqtt::SubscribeError;
use rumqttc::v5::mqttbytes::QoS;
use std::time::Duration;
use tokio::time::sleep;

fn supervisor_for(transport: &MockTransport) -> ConnectionSupervisor<MockTransport> {
    ConnectionSupervisor::builder(transport.clone())
        .policy(ReconnectPolicy {
            max_attempts: Some(5),
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            auto_retry_initial_connect: true,
        })
        .build()
}

fn topics_after(transport: &MockTransport, skip: usize) -> Vec<String> {
    transport
        .subscribe_calls()
        .into_iter()
        .skip(skip)
        .map(|(topic, _)| topic)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_topic_does_not_block_the_others() {
    // Arrange
    let transport = MockTransport::new();
    let supervisor = supervisor_for(&transport);
    supervisor.connect().await.unwrap();
    supervisor.subscribe("a/1").await.unwrap();
    transport.fail_subscribe("b/2");
    assert!(supervisor.subscribe("b/2").await.is_err());
    supervisor.subscribe("c/3").await.unwrap();

    // Act
    transport.simulate_connection_lost("outage").await;
    sleep(Duration::from_millis(150)).await;

    // Assert
    assert_eq!(supervisor.state(), SupervisorState::Connected);
    assert_eq!(topics_after(&transport, 3), vec!["a/1", "b/2", "c/3"]);
    assert_eq!(supervisor.stats().resubscribe_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_topic_recorded_while_disconnected_is_replayed() {
    let transport = MockTransport::new();
    let supervisor = supervisor_for(&transport);
    supervisor.connect().await.unwrap();

    transport.fail_next_connects(1);
    transport.simulate_connection_lost("outage").await;

    let err = supervisor.subscribe("late/topic").await.unwrap_err();
    assert!(matches!(err, SubscribeError::NotConnected { .. }));
    assert!(transport.subscribe_calls().is_empty());

    // First attempt at 100ms fails, second at 300ms succeeds
    sleep(Duration::from_millis(350)).await;

    assert_eq!(supervisor.state(), SupervisorState::Connected);
    assert_eq!(transport.subscribed_topics(), vec!["late/topic".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_subscriptions_collapse() {
    let transport = MockTransport::new();
    let supervisor = supervisor_for(&transport);
    supervisor.connect().await.unwrap();

    supervisor
        .subscribe_with_qos("sensors/#", QoS::AtMostOnce)
        .await
        .unwrap();
    supervisor
        .subscribe_with_qos("sensors/#", QoS::ExactlyOnce)
        .await
        .unwrap();
    assert_eq!(supervisor.subscriptions(), vec!["sensors/#".to_string()]);

    transport.simulate_connection_lost("outage").await;
    sleep(Duration::from_millis(150)).await;

    let replayed: Vec<_> = transport.subscribe_calls().into_iter().skip(2).collect();
    assert_eq!(replayed, vec![("sensors/#".to_string(), QoS::ExactlyOnce)]);
}

#[tokio::test(start_paused = true)]
async fn test_replay_preserves_subscription_order() {
    let transport = MockTransport::new();
    let supervisor = supervisor_for(&transport);

    // Recorded before the first connection
    for topic in ["z", "y", "x"] {
        let _ = supervisor.subscribe(topic).await;
    }
    supervisor.connect().await.unwrap();

    assert_eq!(topics_after(&transport, 0), vec!["z", "y", "x"]);
}
