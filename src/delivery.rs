use crate::output::OutputSender;
use async_condvar_fair::{BatonExt, Condvar};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

////////////////////////////////////////////////////////////////////////////////

/// Состояние буфера под блокировкой
struct Ready<T> {
    /// Значения, которые уже наступили, но еще не отданы читателю
    values: VecDeque<T>,

    /// Координатор больше ничего не положит
    producer_done: bool,

    /// Стадия доставки завершилась, класть что-то бессмысленно
    consumer_done: bool,
}

/// Staging buffer between the coordinator and the delivery task.
///
/// Unbounded: the coordinator never waits on it.
pub(crate) struct Staging<T> {
    ready: Mutex<Ready<T>>,

    /// Оповещение о новых значениях
    signal: Condvar,
}

impl<T> Staging<T> {
    pub(crate) fn new() -> Staging<T> {
        Staging {
            ready: Mutex::new(Ready {
                values: VecDeque::new(),
                producer_done: false,
                consumer_done: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Returns `false` if the delivery task has already stopped and the value
    /// was dropped.
    pub(crate) fn push(&self, value: T) -> bool {
        let mut lock = self.ready.lock();

        if lock.consumer_done {
            return false;
        }

        lock.values.push_back(value);

        // Перед уведомлением снимаем блокировку
        drop(lock);

        self.signal.notify_one();

        true
    }

    /// Marks the producer side finished. The delivery task drains what is
    /// left and then stops.
    pub(crate) fn finish(&self) {
        self.ready.lock().producer_done = true;
        self.signal.notify_all();
    }

    /// Ждем очередное значение, `None` - больше ничего не будет
    #[allow(clippy::await_holding_lock)]
    async fn pop(&self) -> Option<T> {
        loop {
            let mut lock = self.ready.lock();

            if let Some(value) = lock.values.pop_front() {
                return Some(value);
            }

            if lock.producer_done {
                return None;
            }

            // Ожидание само отпустит блокировку
            self.signal.wait_no_relock(lock).await.dispose();
        }
    }

    /// Вызывается стадией доставки при выходе
    fn close(&self) {
        let mut lock = self.ready.lock();
        lock.consumer_done = true;
        lock.values.clear();
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Delivery task: moves staged values to the output stream in order.
///
/// Stops on cancellation, when the reader drops the output stream, or when
/// the coordinator has finished and everything staged has been delivered.
pub(crate) async fn run<T: Send>(
    staging: Arc<Staging<T>>,
    output: OutputSender<T>,
    token: CancellationToken,
) {
    debug!("delivery stage started");

    loop {
        let value = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("delivery stage cancelled");
                break;
            }
            value = staging.pop() => match value {
                Some(value) => value,
                None => {
                    debug!("coordinator finished, nothing left to deliver");
                    break;
                }
            },
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("delivery stage cancelled while waiting for the reader");
                break;
            }
            res = output.deliver(value) => {
                if res.is_err() {
                    debug!("output stream dropped by the reader");
                    break;
                }
                trace!("value delivered");
            }
        }
    }

    staging.close();

    // Выходной канал закрывается вместе с `output`
    drop(output);

    debug!("delivery stage stopped");
}

////////////////////////////////////////////////////////////////////////////////
