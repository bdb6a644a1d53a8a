#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use tether_queue::{ExponentialBackoff, RateLimitedQueue};
use tokio::time::timeout;

fn queue() -> RateLimitedQueue {
    RateLimitedQueue::new("widgets", ExponentialBackoff::default())
}

async fn next(q: &RateLimitedQueue) -> Option<String> {
    timeout(Duration::from_millis(50), q.get()).await.ok().flatten()
}

#[tokio::test]
async fn duplicate_adds_coalesce_while_pending() {
    let q = queue();
    for _ in 0..5 {
        q.add("default/foo");
    }
    assert_eq!(q.len(), 1);
    assert_eq!(next(&q).await.as_deref(), Some("default/foo"));
    // nothing else was queued for the same key
    assert_eq!(next(&q).await, None);
}

#[tokio::test]
async fn key_is_not_handed_out_twice_before_done() {
    let q = queue();
    q.add("default/foo");
    let first = next(&q).await;
    assert_eq!(first.as_deref(), Some("default/foo"));

    q.add("default/foo");
    assert_eq!(q.len(), 0, "re-added key must wait for done");
    assert_eq!(next(&q).await, None);

    q.done("default/foo");
    assert_eq!(next(&q).await.as_deref(), Some("default/foo"));
}

#[tokio::test]
async fn done_without_readd_releases_key() {
    let q = queue();
    q.add("default/foo");
    let k = next(&q).await.unwrap();
    q.done(&k);
    assert!(q.is_empty());
    assert_eq!(next(&q).await, None);
    q.add("default/foo");
    assert_eq!(next(&q).await.as_deref(), Some("default/foo"));
}

#[tokio::test]
async fn distinct_keys_are_served_in_fifo_order() {
    let q = queue();
    q.add("ns/a");
    q.add("ns/b");
    q.add("ns/a");
    q.add("ns/c");
    let mut got = Vec::new();
    while let Some(k) = next(&q).await {
        got.push(k);
    }
    assert_eq!(got, vec!["ns/a", "ns/b", "ns/c"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_share_a_key() {
    let q = Arc::new(queue());
    let in_flight = Arc::new(std::sync::Mutex::new(std::collections::HashSet::<String>::new()));
    let mut workers = Vec::new();
    for _ in 0..4 {
        let q = Arc::clone(&q);
        let in_flight = Arc::clone(&in_flight);
        workers.push(tokio::spawn(async move {
            let mut handled = 0usize;
            while let Some(key) = q.get().await {
                assert!(in_flight.lock().unwrap().insert(key.clone()), "{key} processed concurrently");
                tokio::task::yield_now().await;
                in_flight.lock().unwrap().remove(&key);
                q.done(&key);
                handled += 1;
            }
            handled
        }));
    }
    for round in 0..200 {
        q.add(&format!("ns/k{}", round % 7));
        if round % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }
    // let the workers drain, then stop them
    for _ in 0..100 {
        if q.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    q.shut_down();
    let mut total = 0;
    for w in workers {
        total += w.await.unwrap();
    }
    assert!(total >= 7, "every key handled at least once, got {total}");
}

#[tokio::test]
async fn shutdown_releases_blocked_getters_and_rejects_adds() {
    let q = Arc::new(queue());
    let mut getters = Vec::new();
    for _ in 0..3 {
        let q = Arc::clone(&q);
        getters.push(tokio::spawn(async move { q.get().await }));
    }
    tokio::task::yield_now().await;
    q.shut_down();
    for g in getters {
        let res = timeout(Duration::from_secs(1), g).await.expect("getter released").unwrap();
        assert_eq!(res, None);
    }
    assert!(q.is_shutting_down());
    q.add("default/foo");
    q.add_after("default/bar", Duration::from_millis(1));
    assert!(q.is_empty());
    assert_eq!(q.get().await, None);
}

#[tokio::test]
async fn shutdown_discards_pending_keys() {
    let q = queue();
    q.add("default/foo");
    q.add("default/bar");
    q.shut_down();
    assert_eq!(q.get().await, None);
    assert!(q.is_empty());
}

#[tokio::test]
async fn done_after_shutdown_does_not_requeue() {
    let q = queue();
    q.add("default/foo");
    let k = q.get().await.unwrap();
    q.add("default/foo");
    q.shut_down();
    q.done(&k);
    assert!(q.is_empty());
}

#[tokio::test(start_paused = true)]
async fn add_after_delays_visibility() {
    let q = queue();
    q.add_after("default/foo", Duration::from_secs(3));
    assert!(q.is_empty());
    let started = tokio::time::Instant::now();
    let k = q.get().await;
    assert_eq!(k.as_deref(), Some("default/foo"));
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn add_after_keeps_earliest_deadline() {
    let q = queue();
    q.add_after("default/foo", Duration::from_secs(2));
    q.add_after("default/foo", Duration::from_secs(30));
    let started = tokio::time::Instant::now();
    assert_eq!(q.get().await.as_deref(), Some("default/foo"));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(30), "waited {waited:?}");
    q.done("default/foo");
    // the superseded later deadline does not redeliver
    assert_eq!(timeout(Duration::from_secs(60), q.get()).await.ok().flatten(), None);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_requeue_backs_off_monotonically_and_caps() {
    let q = queue();
    let mut prev = Duration::ZERO;
    for attempt in 0..8u32 {
        let delay = q.add_rate_limited("default/foo");
        assert!(delay >= prev, "attempt {attempt}: {delay:?} < {prev:?}");
        assert!(delay <= Duration::from_secs(60));
        assert!(delay >= Duration::from_secs(5));
        assert_eq!(q.num_requeues("default/foo"), attempt + 1);

        let started = tokio::time::Instant::now();
        let k = q.get().await.unwrap();
        assert!(started.elapsed() >= delay);
        q.done(&k);
        prev = delay;
    }
    assert_eq!(prev, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn forget_resets_backoff() {
    let q = queue();
    q.add_rate_limited("default/foo");
    q.add_rate_limited("default/foo");
    assert_eq!(q.num_requeues("default/foo"), 2);
    q.forget("default/foo");
    assert_eq!(q.num_requeues("default/foo"), 0);
    assert_eq!(q.add_rate_limited("default/foo"), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn getter_wakes_for_deadline_added_while_blocked() {
    let q = Arc::new(queue());
    let getter = {
        let q = Arc::clone(&q);
        tokio::spawn(async move { q.get().await })
    };
    tokio::task::yield_now().await;
    q.add_after("default/late", Duration::from_secs(10));
    let got = timeout(Duration::from_secs(11), getter).await.expect("woken by deadline").unwrap();
    assert_eq!(got.as_deref(), Some("default/late"));
}
