use crate::{
    alarm::Alarm,
    config::{DeliveryMode, DueQueueConfig},
    coordinator::{Coordinator, Sink, Submission},
    delivery::{self, Staging},
    error::{BuildError, CancelledError},
    output::{self, Output},
};
use derive_where::derive_where;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

////////////////////////////////////////////////////////////////////////////////

/// Горизонт для задержек, которые не помещаются в `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

////////////////////////////////////////////////////////////////////////////////

/// Общие данные всех клонов хендла
struct Inner<T> {
    /// Канал заявок в координатор
    submissions: mpsc::UnboundedSender<Submission<T>>,

    /// Токен отмены, которым владеет вызывающий код
    token: CancellationToken,
}

////////////////////////////////////////////////////////////////////////////////

/// Submission handle of a time-ordered delivery queue.
///
/// Values added with a due instant come out of the paired [`Output`] in due
/// order, never before they are due. Entries with equal due time keep their
/// submission order.
///
/// The handle can be cloned and shared between tasks. The background tasks
/// live until the cancellation token fires. If every handle is dropped
/// before that, the queue keeps emitting what it already holds and then
/// closes the output.
///
/// Используем `derive_where`,
/// чтобы не накладывать дополнительные условия на тип `T`.
#[derive_where(Clone)]
pub struct DueQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> DueQueue<T> {
    /// Creates a queue with default settings and the given output buffer
    /// size (`0` for unbuffered), spawned on the current tokio runtime.
    pub fn new(
        token: CancellationToken,
        output_capacity: usize,
    ) -> Result<(DueQueue<T>, Output<T>), BuildError> {
        DueQueue::with_config(
            token,
            DueQueueConfig::default().output_capacity(output_capacity),
        )
    }

    /// Creates a queue and starts its background tasks.
    ///
    /// Fails with [`BuildError::TimerDisabled`] if the runtime was built
    /// without its time driver.
    pub fn with_config(
        token: CancellationToken,
        config: DueQueueConfig,
    ) -> Result<(DueQueue<T>, Output<T>), BuildError> {
        let runtime = config.resolve_runtime()?;

        // Будильник создаем в контексте нужного рантайма до запуска задач
        let alarm = {
            let _guard = runtime.enter();
            Alarm::try_new().ok_or(BuildError::TimerDisabled)?
        };

        let (output_tx, output) = output::channel(config.output_capacity);
        let (submissions_tx, submissions_rx) = mpsc::unbounded_channel();

        let span = tracing::debug_span!(
            "due_queue",
            name = %config.name,
            capacity = config.output_capacity,
            delivery = ?config.delivery
        );

        let sink = match config.delivery {
            DeliveryMode::Decoupled => {
                let staging = Arc::new(Staging::new());
                runtime.spawn(
                    delivery::run(staging.clone(), output_tx, token.clone())
                        .instrument(span.clone()),
                );
                Sink::Staged(staging)
            }
            DeliveryMode::Direct => Sink::Direct(output_tx),
        };

        let coordinator = Coordinator::new(alarm, submissions_rx, token.clone(), sink);
        runtime.spawn(coordinator.run().instrument(span));

        let queue = DueQueue {
            inner: Arc::new(Inner {
                submissions: submissions_tx,
                token,
            }),
        };

        Ok((queue, output))
    }

    /// Adds a value to be emitted at or after `due`.
    ///
    /// Returns once the coordinator has accepted the entry, not once it has
    /// been read. Fails if the queue is cancelled before that happens.
    pub async fn add(&self, due: impl Into<Instant>, value: T) -> Result<(), CancelledError> {
        // Для удобства
        let this = self.inner.as_ref();

        if this.token.is_cancelled() {
            return Err(CancelledError);
        }

        let (accepted_tx, accepted_rx) = oneshot::channel();

        this.submissions
            .send(Submission {
                due: due.into(),
                value,
                accepted: accepted_tx,
            })
            .map_err(|_| CancelledError)?;

        // Отмена приоритетнее: после нее частичного принятия быть не должно
        tokio::select! {
            biased;
            _ = this.token.cancelled() => Err(CancelledError),
            accepted = accepted_rx => accepted.map_err(|_| CancelledError),
        }
    }

    /// Adds a value to be emitted once `delay` has passed from now.
    ///
    /// A delay too large to represent as an instant is clamped to roughly
    /// thirty years from now, the same horizon tokio uses for "never".
    pub async fn add_after(&self, delay: Duration, value: T) -> Result<(), CancelledError> {
        // Фиксированная точка, время ожидания принятия не учитывается
        let now = Instant::now();
        let due = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
        self.add(due, value).await
    }
}

impl<T> DueQueue<T> {
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// The token this queue was created with.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.token
    }
}
