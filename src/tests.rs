use super::*;
use futures_core::Stream;
use std::{future::poll_fn, pin::Pin, time::Duration};
use tokio::time::Instant;

////////////////////////////////////////////////////////////////////////////////

const EPSILON: Duration = Duration::from_millis(5);

/// Допуск опоздания на реальных часах под нагрузкой
const LOAD_SLACK: Duration = Duration::from_millis(50);

fn queue<T: Send + 'static>(capacity: usize) -> (DueQueue<T>, Output<T>, CancellationToken) {
    let token = CancellationToken::new();
    let (queue, output) = DueQueue::new(token.clone(), capacity).unwrap();
    (queue, output, token)
}

fn direct_queue<T: Send + 'static>(capacity: usize) -> (DueQueue<T>, Output<T>, CancellationToken) {
    let token = CancellationToken::new();
    let config = DueQueueConfig::new()
        .output_capacity(capacity)
        .delivery(DeliveryMode::Direct)
        .name("direct");
    let (queue, output) = DueQueue::with_config(token.clone(), config).unwrap();
    (queue, output, token)
}

fn assert_on_time(due: Instant) {
    let now = Instant::now();
    assert!(now >= due, "emitted {:?} early", due - now);
    assert!(now - due < EPSILON, "emitted {:?} late", now - due);
}

////////////////////////////////////////////////////////////////////////////////

#[tokio::test(start_paused = true)]
async fn elements_yielded_in_time_order() {
    let (queue, mut output, _token) = queue(3);

    let now = Instant::now();
    queue.add(now + Duration::from_millis(100), 2).await.unwrap();
    queue.add(now + Duration::from_millis(200), 3).await.unwrap();
    queue.add(now + Duration::from_millis(50), 1).await.unwrap();

    let mut collect = Vec::new();
    for _ in 0..3 {
        collect.push(output.recv().await.unwrap());
    }

    assert_eq!(collect, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn elements_yielded_at_correct_time() {
    let now = Instant::now();
    let vals = [1, 2, 3, 4, 5];
    let dues = [
        now + Duration::from_millis(100),
        now + Duration::from_millis(300),
        now + Duration::from_millis(600),
        now + Duration::from_millis(650),
        now + Duration::from_secs(1),
    ];

    let (queue, mut output, _token) = queue(5);
    for (due, val) in dues.iter().zip(vals) {
        queue.add(*due, val).await.unwrap();
    }

    for (due, val) in dues.iter().zip(vals) {
        assert_eq!(output.recv().await, Some(val));
        assert_on_time(*due);
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_queue_rejects_and_closes() {
    let (queue, mut output, token) = queue::<u32>(1);
    token.cancel();

    assert_eq!(queue.add(Instant::now(), 1).await, Err(CancelledError));
    assert!(queue.is_cancelled());
    assert_eq!(output.recv().await, None);

    // Повторные вызовы детерминированно отдают ту же ошибку
    for v in 0..3 {
        assert_eq!(
            queue.add_after(Duration::from_millis(v), 1).await,
            Err(CancelledError)
        );
    }
    assert_eq!(output.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn earlier_entry_preempts_pending_alarm() {
    let (queue, mut output, _token) = queue(2);

    let now = Instant::now();
    queue.add(now + Duration::from_secs(10), "late").await.unwrap();
    queue.add(now + Duration::from_millis(10), "early").await.unwrap();

    assert_eq!(output.recv().await, Some("early"));
    assert_on_time(now + Duration::from_millis(10));

    assert_eq!(output.recv().await, Some("late"));
    assert_on_time(now + Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn unbuffered_add_does_not_wait_for_reader() {
    let (queue, mut output, _token) = queue(0);

    // Читателя нет, но добавление проходит
    queue.add(Instant::now(), 1).await.unwrap();
    queue.add_after(Duration::from_millis(5), 2).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.add(Instant::now(), 3).await.unwrap();

    assert_eq!(output.recv().await, Some(1));
    assert_eq!(output.recv().await, Some(2));
    assert_eq!(output.recv().await, Some(3));
}

#[tokio::test(start_paused = true)]
async fn slow_reader_loses_nothing() {
    let (queue, mut output, _token) = queue(0);

    let now = Instant::now();
    for v in (0..50u32).rev() {
        queue.add(now + Duration::from_millis(v as u64), v).await.unwrap();
    }

    // Все уже наступили, а читатель только начинает
    tokio::time::sleep(Duration::from_secs(1)).await;

    for expected in 0..50 {
        assert_eq!(output.recv().await, Some(expected));
    }
}

#[tokio::test(start_paused = true)]
async fn equal_due_keeps_submission_order() {
    let (queue, mut output, _token) = queue(16);

    let due = Instant::now() + Duration::from_millis(20);
    for v in 0..10 {
        queue.add(due, v).await.unwrap();
    }

    for expected in 0..10 {
        assert_eq!(output.recv().await, Some(expected));
    }
    assert_on_time(due);
}

#[tokio::test(start_paused = true)]
async fn cancellation_drops_pending_entries() {
    let (queue, mut output, token) = queue(4);

    let now = Instant::now();
    queue.add(now + Duration::from_millis(10), 1).await.unwrap();
    queue.add(now + Duration::from_secs(5), 2).await.unwrap();
    queue.add(now + Duration::from_secs(6), 3).await.unwrap();

    assert_eq!(output.recv().await, Some(1));

    token.cancel();

    assert_eq!(output.recv().await, None);
    assert_eq!(queue.add(now, 4).await, Err(CancelledError));
}

#[tokio::test(start_paused = true)]
async fn pending_add_fails_when_cancelled() {
    // Координатор занят отдачей в прямом режиме, поэтому заявка зависает
    let (queue, mut output, token) = direct_queue(0);

    queue.add(Instant::now(), 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let pending = tokio::spawn({
        let queue = queue.clone();
        async move { queue.add(Instant::now(), 2).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!pending.is_finished());

    token.cancel();

    assert_eq!(pending.await.unwrap(), Err(CancelledError));
    assert_eq!(output.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn direct_delivery_stalls_submissions_until_read() {
    let (queue, mut output, _token) = direct_queue(0);

    queue.add(Instant::now(), 1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Заявка уже в канале, но координатор ждет читателя
    let stalled = tokio::time::timeout(Duration::from_millis(100), queue.add(Instant::now(), 2)).await;
    assert!(stalled.is_err());

    assert_eq!(output.recv().await, Some(1));
    assert_eq!(output.recv().await, Some(2));
}

#[tokio::test(start_paused = true)]
async fn direct_delivery_keeps_order_and_timing() {
    let (queue, mut output, _token) = direct_queue(2);

    let now = Instant::now();
    queue.add(now + Duration::from_millis(30), 3).await.unwrap();
    queue.add(now + Duration::from_millis(10), 1).await.unwrap();
    queue.add(now + Duration::from_millis(20), 2).await.unwrap();

    for (expected, ms) in [(1, 10), (2, 20), (3, 30)] {
        assert_eq!(output.recv().await, Some(expected));
        assert_on_time(now + Duration::from_millis(ms));
    }
}

#[tokio::test(start_paused = true)]
async fn dropping_handles_drains_then_closes() {
    let (queue, mut output, _token) = queue(1);

    let now = Instant::now();
    let clone = queue.clone();
    clone.add(now + Duration::from_millis(20), 2).await.unwrap();
    queue.add(now + Duration::from_millis(10), 1).await.unwrap();
    drop(queue);
    drop(clone);

    assert_eq!(output.recv().await, Some(1));
    assert_eq!(output.recv().await, Some(2));
    assert_eq!(output.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn output_is_a_stream() {
    let (queue, mut output, token) = queue(1);

    queue.add_after(Duration::from_millis(5), 'a').await.unwrap();

    let next = poll_fn(|cx| Pin::new(&mut output).poll_next(cx)).await;
    assert_eq!(next, Some('a'));

    token.cancel();
    let next = poll_fn(|cx| Pin::new(&mut output).poll_next(cx)).await;
    assert_eq!(next, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_are_all_delivered_on_time() {
    let (queue, mut output, _token) = queue::<(Instant, u32)>(8);

    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..25u32 {
                    let due = Instant::now() + Duration::from_millis(((i * 7 + p) % 20) as u64);
                    queue.add(due, (due, p * 100 + i)).await.unwrap();
                }
            })
        })
        .collect();

    let mut seen = Vec::new();
    for _ in 0..100 {
        let (due, v) = output.recv().await.unwrap();
        let now = Instant::now();
        assert!(now >= due);
        assert!(now - due < LOAD_SLACK, "emitted {:?} late", now - due);
        seen.push(v);
    }

    for producer in producers {
        producer.await.unwrap();
    }

    seen.sort_unstable();
    let expected: Vec<u32> = (0..4).flat_map(|p| (0..25).map(move |i| p * 100 + i)).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn submission_flood_does_not_delay_due_entry() {
    let (queue, mut output, token) = queue::<u32>(1);

    // Непрерывный поток добавлений на далекое будущее
    let flood: Vec<_> = (0..64)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                while queue.add_after(Duration::from_secs(3600), 0).await.is_ok() {}
            })
        })
        .collect();
    tokio::task::yield_now().await;

    let due = Instant::now() + Duration::from_millis(10);
    queue.add(due, 7).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), output.recv())
        .await
        .unwrap();
    let late = Instant::now() - due;

    assert_eq!(received, Some(7));
    assert!(late < LOAD_SLACK, "emitted {:?} late under load", late);

    token.cancel();
    for task in flood {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn unrepresentable_delay_is_clamped() {
    let (queue, mut output, token) = queue(1);

    queue.add_after(Duration::MAX, 1).await.unwrap();
    queue.add_after(Duration::from_millis(10), 2).await.unwrap();

    assert_eq!(output.recv().await, Some(2));

    token.cancel();
    assert_eq!(output.recv().await, None);
}

#[test]
fn construction_rejects_runtime_without_timer() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let config = DueQueueConfig::new().runtime(runtime.handle().clone());
    let res = DueQueue::<u32>::with_config(token.clone(), config);

    assert!(matches!(res, Err(BuildError::TimerDisabled)));
    assert!(!token.is_cancelled());
}

#[test]
fn construction_needs_a_runtime() {
    let res = DueQueue::<u32>::new(CancellationToken::new(), 1);
    assert!(matches!(res, Err(BuildError::NoRuntime(_))));
}

#[test]
fn explicit_runtime_and_blocking_reader() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let config = DueQueueConfig::new()
        .output_capacity(1)
        .runtime(runtime.handle().clone());
    let (queue, mut output) = DueQueue::with_config(token.clone(), config).unwrap();

    let started = std::time::Instant::now();
    runtime
        .block_on(queue.add_after(Duration::from_millis(20), 7))
        .unwrap();

    assert_eq!(output.blocking_recv(), Some(7));
    assert!(started.elapsed() >= Duration::from_millis(20));

    token.cancel();
    assert_eq!(output.blocking_recv(), None);
}
