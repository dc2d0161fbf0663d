//! End-to-end admission-control scenarios against live Postgres and Redis.
//!
//! These tests are `#[ignore]` by default because they require a reachable
//! database (`DATABASE_URL` or `DB_*`) and Redis (`REDIS_HOST`/`REDIS_PORT`)
//! with the migrations applied. Run them explicitly:
//!
//! ```bash
//! cargo test -p waitline-service --test admission_flow -- --ignored --test-threads=1
//! ```

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use diesel_async::RunQueryDsl;
use futures::StreamExt;
use once_cell::sync::Lazy;
use serde_json::json;
use tokio::sync::Mutex;
use waitline_service::{
    clock,
    config::Config,
    establish_connection, establish_redis,
    events::{
        CheckinExpiredMessage, DequeuedMessage, EventPublisher, QueuePositionsMessage,
    },
    jobs::JobQueue,
    models::PartyStatus,
    run_migrations, schema,
    services::{CheckinExpiryService, DequeueService, SeatExpiryService},
    store::{PartyStore, StoreError},
    CHECKING_IN_EXPIRED_CHANNEL, CHECKIN_EXPIRED_QUEUE, DEQUEUED_CHANNEL, DEQUEUE_QUEUE,
    QUEUE_POSITIONS_CACHE_KEY, QUEUE_POSITIONS_CHANNEL, SEAT_EXPIRED_QUEUE,
};

// The suite shares one database and one Redis; serialize the tests so their
// table resets cannot interleave.
static SUITE: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

fn test_config() -> Config {
    let mut config = Config::load();
    config.max_seats = 10;
    config.service_time_seconds = 15;
    config.checkin_expiry_seconds = 60;
    config
}

async fn setup() -> (Config, diesel_async::AsyncPgConnection, redis::aio::ConnectionManager) {
    let config = test_config();
    run_migrations().await.expect("migrations failed");

    let mut conn = establish_connection().await.expect("postgres unavailable");
    diesel::delete(schema::parties::table)
        .execute(&mut conn)
        .await
        .expect("failed to reset parties table");

    let mut redis = establish_redis(&config).await.expect("redis unavailable");
    let _: () = redis::cmd("DEL")
        .arg(format!("jobs:{DEQUEUE_QUEUE}"))
        .arg(format!("jobs:{CHECKIN_EXPIRED_QUEUE}"))
        .arg(format!("jobs:{SEAT_EXPIRED_QUEUE}"))
        .arg(QUEUE_POSITIONS_CACHE_KEY)
        .query_async(&mut redis)
        .await
        .expect("failed to reset job queues");

    (config, conn, redis)
}

fn dequeue_service(config: &Config, redis: &redis::aio::ConnectionManager) -> DequeueService {
    DequeueService::new(
        PartyStore::new(config),
        EventPublisher::new(redis.clone()),
        JobQueue::new(redis.clone()),
    )
}

async fn subscribe(config: &Config, channels: &[&str]) -> redis::aio::PubSub {
    let client = redis::Client::open(config.redis_url()).unwrap();
    let mut pubsub = client.get_async_pubsub().await.unwrap();
    for channel in channels {
        pubsub.subscribe(*channel).await.unwrap();
    }
    pubsub
}

async fn next_message(pubsub: &mut redis::aio::PubSub) -> (String, String) {
    let msg = tokio::time::timeout(StdDuration::from_secs(2), pubsub.on_message().next())
        .await
        .expect("timed out waiting for a pub/sub message")
        .expect("pub/sub stream ended");
    let channel = msg.get_channel_name().to_string();
    let payload = msg.get_payload().unwrap();
    (channel, payload)
}

async fn job_scores(redis: &mut redis::aio::ConnectionManager, queue: &str) -> Vec<(String, f64)> {
    redis::cmd("ZRANGE")
        .arg(format!("jobs:{queue}"))
        .arg(0)
        .arg(-1)
        .arg("WITHSCORES")
        .query_async(redis)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore]
async fn single_admit_flips_status_broadcasts_and_schedules_expiry() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, mut redis) = setup().await;
    let store = PartyStore::new(&config);

    let created = store.create(&mut conn, "A", 2).await.unwrap();
    assert_eq!(created.position_in_queue, 1);

    let mut pubsub = subscribe(&config, &[DEQUEUED_CHANNEL, QUEUE_POSITIONS_CHANNEL]).await;
    let mut service = dequeue_service(&config, &redis);
    service.run(&mut conn).await.unwrap();

    let (channel, payload) = next_message(&mut pubsub).await;
    assert_eq!(channel, DEQUEUED_CHANNEL);
    let message: DequeuedMessage = serde_json::from_str(&payload).unwrap();
    assert_eq!(message.party_ids, vec![created.party_id.clone()]);

    let (channel, payload) = next_message(&mut pubsub).await;
    assert_eq!(channel, QUEUE_POSITIONS_CHANNEL);
    let snapshot: QueuePositionsMessage = serde_json::from_str(&payload).unwrap();
    assert!(snapshot.queued_parties.is_empty());

    let party = store.get_by_party_id(&mut conn, &created.party_id).await.unwrap();
    assert_eq!(party.status, PartyStatus::CheckingIn);
    assert_eq!(party.checkin_expiration, Some(message.checking_in_expiration));

    let jobs = job_scores(&mut redis, CHECKIN_EXPIRED_QUEUE).await;
    assert_eq!(jobs.len(), 1);
    let now_ms = Utc::now().timestamp_millis() as f64;
    assert!(jobs[0].1 > now_ms + 55_000.0);
    assert!(jobs[0].1 < now_ms + 61_000.0);
}

#[tokio::test]
#[ignore]
async fn partial_admit_respects_the_fifo_cumulative_bound() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, redis) = setup().await;
    let store = PartyStore::new(&config);

    let p1 = store.create(&mut conn, "P1", 8).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let p2 = store.create(&mut conn, "P2", 2).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let p3 = store.create(&mut conn, "P3", 2).await.unwrap();

    let mut pubsub = subscribe(&config, &[DEQUEUED_CHANNEL]).await;
    let mut service = dequeue_service(&config, &redis);
    service.run(&mut conn).await.unwrap();

    let (_, payload) = next_message(&mut pubsub).await;
    let message: DequeuedMessage = serde_json::from_str(&payload).unwrap();
    assert_eq!(message.party_ids, vec![p1.party_id, p2.party_id]);

    let left_behind = store.get_by_party_id(&mut conn, &p3.party_id).await.unwrap();
    assert_eq!(left_behind.status, PartyStatus::Queued);
}

#[tokio::test]
#[ignore]
async fn full_house_admits_nobody_and_still_refreshes_positions() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, redis) = setup().await;
    let store = PartyStore::new(&config);

    // Occupy all ten seats with a seated party mid-service.
    let big = store.create(&mut conn, "Big", 10).await.unwrap();
    store
        .set_checking_in(&mut conn, &[big.party_id.clone()])
        .await
        .unwrap();
    store.set_seated(&mut conn, &big.party_id, 10).await.unwrap();

    let q = store.create(&mut conn, "Q", 1).await.unwrap();

    let mut pubsub = subscribe(&config, &[DEQUEUED_CHANNEL, QUEUE_POSITIONS_CHANNEL]).await;
    let mut service = dequeue_service(&config, &redis);
    service.run(&mut conn).await.unwrap();

    // The dequeued channel stays silent; the first message is the snapshot.
    let (channel, payload) = next_message(&mut pubsub).await;
    assert_eq!(channel, QUEUE_POSITIONS_CHANNEL);
    let snapshot: QueuePositionsMessage = serde_json::from_str(&payload).unwrap();
    assert_eq!(snapshot.queued_parties.len(), 1);
    assert_eq!(snapshot.queued_parties[0].party_id, q.party_id);
    assert_eq!(snapshot.queued_parties[0].row, 1);

    let still_queued = store.get_by_party_id(&mut conn, &q.party_id).await.unwrap();
    assert_eq!(still_queued.status, PartyStatus::Queued);
}

#[tokio::test]
#[ignore]
async fn check_in_seats_the_party_for_its_service_interval() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, redis) = setup().await;
    let store = PartyStore::new(&config);

    let created = store.create(&mut conn, "A", 2).await.unwrap();
    let mut service = dequeue_service(&config, &redis);
    service.run(&mut conn).await.unwrap();

    let before = Utc::now();
    let seat_expiration = store.set_seated(&mut conn, &created.party_id, 2).await.unwrap();

    // SERVICE_TIME_SECONDS × size = 30s.
    let service_interval = seat_expiration - before;
    assert!(service_interval > Duration::seconds(28));
    assert!(service_interval < Duration::seconds(32));

    let party = store.get_by_party_id(&mut conn, &created.party_id).await.unwrap();
    assert_eq!(party.status, PartyStatus::Seated);
    assert_eq!(party.seat_expiration, Some(seat_expiration));
    assert_eq!(party.checkin_expiration, None);
}

#[tokio::test]
#[ignore]
async fn check_in_outside_the_window_is_rejected() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, _redis) = setup().await;
    let store = PartyStore::new(&config);

    let created = store.create(&mut conn, "Early", 2).await.unwrap();

    // Still queued: the admission never happened.
    let err = store.set_seated(&mut conn, &created.party_id, 2).await.unwrap_err();
    assert!(matches!(err, StoreError::PartyNotFound));

    // Seated twice: the second attempt must not re-time the seat.
    store
        .set_checking_in(&mut conn, &[created.party_id.clone()])
        .await
        .unwrap();
    store.set_seated(&mut conn, &created.party_id, 2).await.unwrap();
    let err = store.set_seated(&mut conn, &created.party_id, 2).await.unwrap_err();
    assert!(matches!(err, StoreError::PartyNotFound));
}

#[tokio::test]
#[ignore]
async fn lapsed_check_in_is_purged_broadcast_and_retriggers_dequeue() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, mut redis) = setup().await;

    // A zero-length window expires as soon as it is granted.
    let mut lapsed_config = config.clone();
    lapsed_config.checkin_expiry_seconds = 0;
    let store = PartyStore::new(&lapsed_config);

    let created = store.create(&mut conn, "A", 2).await.unwrap();
    store
        .set_checking_in(&mut conn, &[created.party_id.clone()])
        .await
        .unwrap();
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    let mut pubsub = subscribe(&config, &[CHECKING_IN_EXPIRED_CHANNEL]).await;
    let mut service = CheckinExpiryService::new(
        store,
        EventPublisher::new(redis.clone()),
        JobQueue::new(redis.clone()),
    );
    service.run(&mut conn).await.unwrap();

    let (_, payload) = next_message(&mut pubsub).await;
    let message: CheckinExpiredMessage = serde_json::from_str(&payload).unwrap();
    assert_eq!(message.party_ids, vec![created.party_id.clone()]);

    let err = store.get_by_party_id(&mut conn, &created.party_id).await.unwrap_err();
    assert!(matches!(err, StoreError::PartyNotFound));

    assert_eq!(job_scores(&mut redis, DEQUEUE_QUEUE).await.len(), 1);
}

#[tokio::test]
#[ignore]
async fn expiry_run_with_nothing_expired_is_a_no_op() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, mut redis) = setup().await;
    let store = PartyStore::new(&config);

    let created = store.create(&mut conn, "Fresh", 2).await.unwrap();
    store
        .set_checking_in(&mut conn, &[created.party_id.clone()])
        .await
        .unwrap();

    let mut service = CheckinExpiryService::new(
        store,
        EventPublisher::new(redis.clone()),
        JobQueue::new(redis.clone()),
    );
    service.run(&mut conn).await.unwrap();

    // Window still open: no purge, no re-trigger.
    assert!(job_scores(&mut redis, DEQUEUE_QUEUE).await.is_empty());
    let party = store.get_by_party_id(&mut conn, &created.party_id).await.unwrap();
    assert_eq!(party.status, PartyStatus::CheckingIn);
}

#[tokio::test]
#[ignore]
async fn elapsed_service_frees_the_seats_and_retriggers_dequeue() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, mut redis) = setup().await;

    let mut instant_config = config.clone();
    instant_config.service_time_seconds = 0;
    let store = PartyStore::new(&instant_config);

    let created = store.create(&mut conn, "Done", 4).await.unwrap();
    store
        .set_checking_in(&mut conn, &[created.party_id.clone()])
        .await
        .unwrap();
    store.set_seated(&mut conn, &created.party_id, 4).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    let mut service = SeatExpiryService::new(store, JobQueue::new(redis.clone()));
    service.run(&mut conn).await.unwrap();

    let err = store.get_by_party_id(&mut conn, &created.party_id).await.unwrap_err();
    assert!(matches!(err, StoreError::PartyNotFound));
    assert_eq!(job_scores(&mut redis, DEQUEUE_QUEUE).await.len(), 1);
}

#[tokio::test]
#[ignore]
async fn leaving_the_queue_lets_the_next_party_through() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, redis) = setup().await;
    let store = PartyStore::new(&config);

    let p1 = store.create(&mut conn, "P1", 6).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    let p2 = store.create(&mut conn, "P2", 4).await.unwrap();

    store.delete_by_party_id(&mut conn, &p1.party_id).await.unwrap();

    let mut service = dequeue_service(&config, &redis);
    service.run(&mut conn).await.unwrap();

    let admitted = store.get_by_party_id(&mut conn, &p2.party_id).await.unwrap();
    assert_eq!(admitted.status, PartyStatus::CheckingIn);
}

#[tokio::test]
#[ignore]
async fn repeated_dequeue_runs_are_idempotent() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, mut redis) = setup().await;
    let store = PartyStore::new(&config);

    // Fill the floor so the queued party cannot be admitted.
    let big = store.create(&mut conn, "Big", 10).await.unwrap();
    store
        .set_checking_in(&mut conn, &[big.party_id.clone()])
        .await
        .unwrap();
    store.set_seated(&mut conn, &big.party_id, 10).await.unwrap();
    let waiting = store.create(&mut conn, "Waiting", 3).await.unwrap();

    let mut pubsub = subscribe(&config, &[QUEUE_POSITIONS_CHANNEL]).await;
    let mut service = dequeue_service(&config, &redis);
    service.run(&mut conn).await.unwrap();
    service.run(&mut conn).await.unwrap();

    let (_, first) = next_message(&mut pubsub).await;
    let (_, second) = next_message(&mut pubsub).await;
    assert_eq!(first, second);

    let party = store.get_by_party_id(&mut conn, &waiting.party_id).await.unwrap();
    assert_eq!(party.status, PartyStatus::Queued);

    let cached: Option<String> = redis::AsyncCommands::get(&mut redis, QUEUE_POSITIONS_CACHE_KEY)
        .await
        .unwrap();
    assert_eq!(cached.as_deref(), Some(second.as_str()));
}

#[tokio::test]
#[ignore]
async fn available_seats_counts_active_and_checking_in_parties_only() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, _redis) = setup().await;
    let store = PartyStore::new(&config);

    assert_eq!(store.available_seats(&mut conn).await.unwrap(), 10);

    let held = store.create(&mut conn, "Held", 4).await.unwrap();
    store
        .set_checking_in(&mut conn, &[held.party_id.clone()])
        .await
        .unwrap();
    assert_eq!(store.available_seats(&mut conn).await.unwrap(), 6);

    // A seat whose service already elapsed no longer occupies capacity.
    let mut instant_config = config.clone();
    instant_config.service_time_seconds = 0;
    let instant_store = PartyStore::new(&instant_config);
    let done = instant_store.create(&mut conn, "Done", 3).await.unwrap();
    instant_store
        .set_checking_in(&mut conn, &[done.party_id.clone()])
        .await
        .unwrap();
    instant_store.set_seated(&mut conn, &done.party_id, 3).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    assert_eq!(store.available_seats(&mut conn).await.unwrap(), 6);
}

#[tokio::test]
#[ignore]
async fn queue_positions_are_monotonic_and_one_based() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, _redis) = setup().await;
    let store = PartyStore::new(&config);

    let mut created = Vec::new();
    for name in ["First", "Second", "Third"] {
        created.push(store.create(&mut conn, name, 2).await.unwrap());
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }

    // Positions reported at creation time grow with the queue.
    assert_eq!(
        created.iter().map(|c| c.position_in_queue).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let positions = store.current_queue_positions(&mut conn).await.unwrap();
    assert_eq!(positions.len(), 3);
    for (i, position) in positions.iter().enumerate() {
        assert_eq!(position.row, i as i64 + 1);
        assert_eq!(position.party_id, created[i].party_id);
    }
}

#[tokio::test]
#[ignore]
async fn deleting_a_party_twice_reports_not_found_the_second_time() {
    let _guard = SUITE.lock().await;
    let (config, mut conn, _redis) = setup().await;
    let store = PartyStore::new(&config);

    let created = store.create(&mut conn, "Gone", 2).await.unwrap();
    store.delete_by_party_id(&mut conn, &created.party_id).await.unwrap();

    let err = store
        .delete_by_party_id(&mut conn, &created.party_id)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PartyNotFound));
}

#[tokio::test]
#[ignore]
async fn delayed_jobs_become_visible_only_after_their_fire_time() {
    let _guard = SUITE.lock().await;
    let (_config, _conn, redis) = setup().await;
    let mut jobs = JobQueue::new(redis);

    jobs.enqueue(DEQUEUE_QUEUE, "later", json!({}), Duration::seconds(60))
        .await
        .unwrap();
    assert!(jobs.pop_due(DEQUEUE_QUEUE).await.unwrap().is_none());

    jobs.enqueue(DEQUEUE_QUEUE, "now", json!({}), Duration::zero())
        .await
        .unwrap();
    let due = jobs.pop_due(DEQUEUE_QUEUE).await.unwrap().unwrap();
    assert_eq!(due.name, "now");

    // The delayed job is still parked, not lost.
    assert!(jobs.pop_due(DEQUEUE_QUEUE).await.unwrap().is_none());

    let fire_at = clock::now() + Duration::seconds(60);
    assert!(clock::delay_until(fire_at) > Duration::seconds(58));
}
