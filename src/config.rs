use std::borrow::Cow;
use tokio::runtime::Handle;

////////////////////////////////////////////////////////////////////////////////

/// How extracted values reach the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Values go through an unbounded staging buffer drained by a separate
    /// delivery task. A slow reader never stalls [`DueQueue::add`], at the
    /// cost of unbounded memory if the reader never catches up.
    ///
    /// [`DueQueue::add`]: crate::DueQueue::add
    #[default]
    Decoupled,

    /// The coordinator itself waits until the output stream takes each value.
    /// A slow reader stalls submissions and alarm processing.
    Direct,
}

////////////////////////////////////////////////////////////////////////////////

/// Construction parameters of a [`DueQueue`](crate::DueQueue).
#[derive(Debug, Clone)]
pub struct DueQueueConfig {
    /// Размер буфера выходного канала, 0 - без буфера
    pub(crate) output_capacity: usize,

    /// Режим доставки
    pub(crate) delivery: DeliveryMode,

    /// Имя для tracing span
    pub(crate) name: Cow<'static, str>,

    /// Рантайм для фоновых задач, по умолчанию текущий
    pub(crate) runtime: Option<Handle>,
}

impl Default for DueQueueConfig {
    fn default() -> Self {
        DueQueueConfig {
            output_capacity: 0,
            delivery: DeliveryMode::default(),
            name: Cow::Borrowed("due_queue"),
            runtime: None,
        }
    }
}

impl DueQueueConfig {
    pub fn new() -> DueQueueConfig {
        DueQueueConfig::default()
    }

    /// Buffer size of the output stream. `0` means unbuffered: every emission
    /// waits until a reader takes the value.
    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    pub fn delivery(mut self, mode: DeliveryMode) -> Self {
        self.delivery = mode;
        self
    }

    /// Name recorded on the tracing span of the queue's background tasks.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Spawn the background tasks on this runtime instead of the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub(crate) fn resolve_runtime(&self) -> Result<Handle, crate::BuildError> {
        match &self.runtime {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current()
                .map_err(|err| crate::BuildError::NoRuntime(err.to_string())),
        }
    }
}
