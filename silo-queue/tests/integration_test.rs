//! Integration tests for silo-queue

use silo_queue::*;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_malformed_payload_is_delivered_raw() {
    let queue = MemoryQueue::new();
    queue.push_raw("{\"tenant_id\":");

    let delivery = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
    let err = delivery.decode().unwrap_err();
    assert!(!err.is_transient());
    assert!(matches!(err, QueueError::Malformed { .. }));
}

#[tokio::test]
async fn test_trait_object_usage() {
    let queue: Arc<dyn ProvisioningQueue> = Arc::new(MemoryQueue::new());
    let tenant_id = Uuid::new_v4();
    queue
        .enqueue(&ProvisioningMessage::new(tenant_id, "3f2a9c", "FR34JJO390G"))
        .await
        .unwrap();

    let message = queue
        .dequeue(Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(message.tenant_id, tenant_id);
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a running Redis on localhost:6379"]
async fn test_redis_queue_roundtrip() {
    use silo_redis::{RedisConfig, RedisService};

    let redis = Arc::new(
        RedisService::new(RedisConfig::new("redis://localhost:6379"))
            .await
            .unwrap(),
    );
    let key = format!("test:provision:{}", Uuid::new_v4());
    let queue = RedisProvisioningQueue::new(redis.clone(), key.clone());

    let message = ProvisioningMessage::new(Uuid::new_v4(), "3f2a9c", "FR34JJO390G");
    queue.enqueue(&message).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);

    let got = queue
        .dequeue(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(got, message);

    assert!(queue.dequeue(Duration::from_secs(1)).await.unwrap().is_none());
    redis.delete(&key).await.unwrap();
}
