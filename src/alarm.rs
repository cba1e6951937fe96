use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::time::{Instant, Sleep};

////////////////////////////////////////////////////////////////////////////////

/// One-shot timer for the earliest known due time.
///
/// Owned by the coordinator only. Arming with an instant in the past makes
/// the next poll complete immediately. Polling a disarmed alarm stays pending
/// and registers no waker, so it must be guarded with [`Alarm::is_armed`].
pub(crate) struct Alarm {
    /// Футура сна переиспользуется через `reset`, без новых аллокаций
    sleep: Pin<Box<Sleep>>,

    /// На какой момент взведен будильник
    armed_for: Option<Instant>,
}

impl Alarm {
    pub(crate) fn new() -> Alarm {
        Alarm {
            sleep: Box::pin(tokio::time::sleep_until(Instant::now())),
            armed_for: None,
        }
    }

    /// Same as [`Alarm::new`], but `None` instead of a panic when the runtime
    /// in context has its time driver disabled.
    pub(crate) fn try_new() -> Option<Alarm> {
        // tokio не дает спросить про таймер напрямую, только через панику
        std::panic::catch_unwind(Alarm::new).ok()
    }

    /// Взводим будильник, прошлое ожидание отменяется
    pub(crate) fn arm(&mut self, due: Instant) {
        self.sleep.as_mut().reset(due);
        self.armed_for = Some(due);
    }

    pub(crate) fn disarm(&mut self) {
        self.armed_for = None;
    }

    pub(crate) fn armed_for(&self) -> Option<Instant> {
        self.armed_for
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed_for.is_some()
    }
}

// Срабатывание и снятие взвода происходят в одном poll,
// так что сработавший будильник нельзя ни потерять, ни посчитать дважды.
impl Future for Alarm {
    type Output = Instant;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let Some(due) = this.armed_for else {
            return Poll::Pending;
        };

        match this.sleep.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(()) => {
                this.armed_for = None;
                Poll::Ready(due)
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
