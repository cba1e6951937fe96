use futures_core::Stream;
use std::{
    pin::Pin,
    task::{ready, Context, Poll},
};
use tokio::sync::{mpsc, oneshot};

////////////////////////////////////////////////////////////////////////////////

/// Значение в выходном канале
struct Handoff<T> {
    value: T,

    /// Для небуферизованного режима: отправитель ждет, пока читатель заберет значение
    taken: Option<oneshot::Sender<()>>,
}

impl<T> Handoff<T> {
    /// `None` if the sender of an unbuffered value already gave up on it,
    /// in which case the value was never delivered.
    fn take(self) -> Option<T> {
        match self.taken {
            None => Some(self.value),
            Some(taken) => taken.send(()).ok().map(|()| self.value),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// The reader side is gone.
#[derive(Debug)]
pub(crate) struct OutputClosed;

/// Write side of the output stream, owned by whoever delivers values.
pub(crate) struct OutputSender<T> {
    tx: mpsc::Sender<Handoff<T>>,

    /// Емкость 0: доставка завершается только после чтения
    rendezvous: bool,
}

impl<T> OutputSender<T> {
    /// Waits for buffer space, or for a reader when unbuffered.
    pub(crate) async fn deliver(&self, value: T) -> Result<(), OutputClosed> {
        if !self.rendezvous {
            return self
                .tx
                .send(Handoff { value, taken: None })
                .await
                .map_err(|_| OutputClosed);
        }

        let (taken_tx, taken_rx) = oneshot::channel();
        self.tx
            .send(Handoff {
                value,
                taken: Some(taken_tx),
            })
            .await
            .map_err(|_| OutputClosed)?;

        // Если читатель бросил канал с нашим значением внутри, то oneshot уничтожится
        taken_rx.await.map_err(|_| OutputClosed)
    }
}

/// Creates the output stream. Capacity `0` means unbuffered.
pub(crate) fn channel<T>(capacity: usize) -> (OutputSender<T>, Output<T>) {
    // tokio не умеет каналы нулевой емкости, поэтому ждем подтверждения чтения
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let sender = OutputSender {
        tx,
        rendezvous: capacity == 0,
    };

    (sender, Output { rx })
}

////////////////////////////////////////////////////////////////////////////////

/// Read side of a [`DueQueue`](crate::DueQueue).
///
/// Yields values in due order, never before they are due. Once the queue is
/// cancelled (or every queue handle is dropped and all pending values have
/// been emitted) the stream ends and stays ended.
pub struct Output<T> {
    rx: mpsc::Receiver<Handoff<T>>,
}

impl<T> Output<T> {
    /// Receives the next due value, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(value) = self.rx.recv().await?.take() {
                return Some(value);
            }
        }
    }

    /// Blocking variant of [`Output::recv`] for use outside of async code.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<T> {
        loop {
            if let Some(value) = self.rx.blocking_recv()?.take() {
                return Some(value);
            }
        }
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        loop {
            let Some(handoff) = ready!(self.rx.poll_recv(cx)) else {
                return Poll::Ready(None);
            };

            if let Some(value) = handoff.take() {
                return Poll::Ready(Some(value));
            }
        }
    }
}

impl<T> Stream for Output<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_recv(cx)
    }
}

////////////////////////////////////////////////////////////////////////////////
