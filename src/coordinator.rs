use crate::{alarm::Alarm, delivery::Staging, heap::DueHeap, output::OutputSender};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

////////////////////////////////////////////////////////////////////////////////

/// Сколько уже пришедших заявок забираем перед срабатыванием будильника
const ABSORB_LIMIT: usize = 128;

////////////////////////////////////////////////////////////////////////////////

/// Заявка на добавление от вызывающего кода
pub(crate) struct Submission<T> {
    pub(crate) due: Instant,
    pub(crate) value: T,

    /// Подтверждение, что координатор принял элемент
    pub(crate) accepted: oneshot::Sender<()>,
}

/// Куда координатор отдает наступившие значения
pub(crate) enum Sink<T> {
    /// Через буфер и отдельную задачу доставки
    Staged(Arc<Staging<T>>),

    /// Прямо в выходной канал, с ожиданием читателя
    Direct(OutputSender<T>),
}

////////////////////////////////////////////////////////////////////////////////

/// Single owner of the due heap and the alarm.
///
/// Invariant after every step: the alarm is armed for the due time of the
/// heap minimum, and disarmed iff the heap is empty.
pub(crate) struct Coordinator<T> {
    heap: DueHeap<T>,
    alarm: Alarm,
    submissions: mpsc::UnboundedReceiver<Submission<T>>,
    token: CancellationToken,
    sink: Sink<T>,

    /// Выходной канал бросили, значения больше некуда отдавать
    output_gone: bool,

    /// Пока жив хотя бы один хендл очереди
    accepting: bool,
}

impl<T: Send> Coordinator<T> {
    pub(crate) fn new(
        alarm: Alarm,
        submissions: mpsc::UnboundedReceiver<Submission<T>>,
        token: CancellationToken,
        sink: Sink<T>,
    ) -> Coordinator<T> {
        Coordinator {
            heap: DueHeap::new(),
            alarm,
            submissions,
            token,
            sink,
            output_gone: false,
            accepting: true,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("coordinator started");

        loop {
            if !self.accepting && self.heap.is_empty() {
                debug!("all queue handles dropped and every entry emitted");
                break;
            }

            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!(pending = self.heap.len(), "cancelled, discarding pending entries");
                    break;
                }
                // Будильник раньше заявок, иначе поток добавлений его не пропустит
                fired = &mut self.alarm, if self.alarm.is_armed() => {
                    if !self.fire(fired).await {
                        debug!(pending = self.heap.len(), "cancelled during delivery");
                        break;
                    }
                }
                submission = self.submissions.recv(), if self.accepting => match submission {
                    Some(submission) => self.accept(submission),
                    None => self.submissions_closed(),
                },
            }
        }

        self.heap.clear();
        self.alarm.disarm();

        // Не принятые заявки уничтожаются вместе с каналом, `add` увидит отмену
        self.submissions.close();

        if let Sink::Staged(staging) = &self.sink {
            staging.finish();
        }

        debug!("coordinator stopped");
    }

    fn submissions_closed(&mut self) {
        debug!(pending = self.heap.len(), "all queue handles dropped");
        self.accepting = false;
    }

    /// Takes in submissions that already arrived, at most `ABSORB_LIMIT`,
    /// so that an earlier entry sent before the fire is not overtaken.
    fn absorb_arrived(&mut self) {
        for _ in 0..ABSORB_LIMIT {
            if !self.accepting {
                return;
            }

            match self.submissions.try_recv() {
                Ok(submission) => self.accept(submission),
                Err(mpsc::error::TryRecvError::Empty) => return,
                Err(mpsc::error::TryRecvError::Disconnected) => self.submissions_closed(),
            }
        }
    }

    fn accept(&mut self, submission: Submission<T>) {
        let Submission {
            due,
            value,
            accepted,
        } = submission;

        self.heap.insert(due, value);

        // Перевзводим только если новый элемент раньше текущего минимума
        match self.alarm.armed_for() {
            Some(armed) if armed <= due => {}
            previous => {
                trace!(?previous, ?due, "alarm rearmed");
                self.alarm.arm(due);
            }
        }

        trace!(pending = self.heap.len(), "entry accepted");

        // Вызывающий мог уже бросить ожидание, элемент все равно принят
        let _ = accepted.send(());
    }

    /// Emits every entry due by now. Returns `false` if cancelled meanwhile.
    async fn fire(&mut self, fired: Instant) -> bool {
        let now = Instant::now();
        trace!(?fired, late_by = ?now.saturating_duration_since(fired), "alarm fired");

        self.absorb_arrived();

        // Будильник взведен не позже минимума, так что минимум точно наступил
        let mut batch = Vec::new();
        if let Some(entry) = self.heap.extract_min() {
            batch.push(entry.value);
        }
        while let Some(entry) = self.heap.extract_due(now) {
            batch.push(entry.value);
        }

        match self.heap.next_due() {
            Some(next) => self.alarm.arm(next),
            None => self.alarm.disarm(),
        }

        for value in batch {
            if !self.forward(value).await {
                return false;
            }
        }

        true
    }

    async fn forward(&mut self, value: T) -> bool {
        if self.output_gone {
            trace!("output stream gone, value discarded");
            return true;
        }

        match &self.sink {
            Sink::Staged(staging) => {
                if !staging.push(value) {
                    debug!("delivery stage stopped, discarding further values");
                    self.output_gone = true;
                }
                true
            }
            Sink::Direct(output) => {
                let delivered = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return false,
                    res = output.deliver(value) => res,
                };

                if delivered.is_err() {
                    debug!("output stream dropped by the reader, discarding further values");
                    self.output_gone = true;
                }
                true
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
