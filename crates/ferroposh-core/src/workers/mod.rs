mod pipeline;
mod runspace;

pub(crate) use pipeline::PipelineWorker;
pub(crate) use runspace::RunspaceWorker;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use ferroposh_psrp::{ErrorRecord, HostResponse, PsrpEvent, PsValue};

/// What a worker's event queue carries: either a demultiplexed codec
/// event or the shutdown sentinel enqueued by `close()`.
#[derive(Debug)]
pub(crate) enum WorkerInput {
    Event(PsrpEvent),
    Shutdown,
}

/// A host response as stored for the thread that issued the call.
#[derive(Debug, Clone)]
pub(crate) enum HostResponseValue {
    Value(Option<PsValue>),
    Error(ErrorRecord),
}

/// Rendezvous point between a worker observing host-response events and
/// the script thread blocked inside the host facade. At most one entry
/// exists per call id, and each entry is removed exactly once.
#[derive(Debug, Default)]
pub(crate) struct HostRegistry {
    pub(crate) results: Mutex<HashMap<i64, HostResponseValue>>,
    pub(crate) waiter: Condvar,
}

impl HostRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<i64, HostResponseValue>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a response and wake every waiter so the matching call can
    /// claim it.
    pub(crate) fn store(&self, response: &HostResponse) {
        let value = response.error.clone().map_or_else(
            || HostResponseValue::Value(response.result.clone()),
            HostResponseValue::Error,
        );
        self.lock().insert(response.call_id, value);
        self.waiter.notify_all();
    }

    /// Wake waiters without storing anything; used at teardown so a
    /// blocked host call can observe the pipeline leaving Running.
    pub(crate) fn notify_all(&self) {
        drop(self.lock());
        self.waiter.notify_all();
    }
}

#[derive(Debug, Default)]
struct InputState {
    items: Vec<PsValue>,
    complete: bool,
}

/// The pipeline-input queue feeding a running script. The worker thread
/// appends; the script's iterator drains, blocking while the stream is
/// still open.
#[derive(Debug, Default)]
pub(crate) struct InputBuffer {
    state: Mutex<InputState>,
    cond: Condvar,
}

impl InputBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, value: PsValue) {
        self.lock().items.push(value);
        self.cond.notify_all();
    }

    pub(crate) fn set_complete(&self, complete: bool) {
        self.lock().complete = complete;
        self.cond.notify_all();
    }
}

/// Blocking iterator over an [`InputBuffer`], handed to the script
/// engine as the pipeline's input stream.
pub(crate) struct InputCursor {
    buffer: Arc<InputBuffer>,
    index: usize,
}

impl InputCursor {
    pub(crate) fn new(buffer: Arc<InputBuffer>) -> Self {
        Self { buffer, index: 0 }
    }
}

impl Iterator for InputCursor {
    type Item = PsValue;

    fn next(&mut self) -> Option<PsValue> {
        let mut state = self.buffer.lock();
        loop {
            if self.index < state.items.len() {
                let value = state.items[self.index].clone();
                self.index += 1;
                return Some(value);
            }
            if state.complete {
                return None;
            }
            state = self
                .buffer
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cursor_yields_buffered_items_then_ends() {
        let buffer = Arc::new(InputBuffer::new());
        buffer.push(PsValue::I32(1));
        buffer.push(PsValue::I32(2));
        buffer.set_complete(true);

        let collected: Vec<PsValue> = InputCursor::new(buffer).collect();
        assert_eq!(collected, vec![PsValue::I32(1), PsValue::I32(2)]);
    }

    #[test]
    fn cursor_blocks_until_input_arrives() {
        let buffer = Arc::new(InputBuffer::new());
        let reader = Arc::clone(&buffer);
        let handle = std::thread::spawn(move || InputCursor::new(reader).collect::<Vec<_>>());

        std::thread::sleep(Duration::from_millis(50));
        buffer.push(PsValue::str("late"));
        buffer.set_complete(true);

        assert_eq!(handle.join().unwrap(), vec![PsValue::str("late")]);
    }

    #[test]
    fn registry_stores_errors_over_results() {
        let registry = HostRegistry::new();
        registry.store(
            &HostResponse::builder()
                .call_id(1)
                .result(Some(PsValue::str("ok")))
                .error(Some(
                    ErrorRecord::builder()
                        .message("denied".to_string())
                        .fully_qualified_error_id("HostError".to_string())
                        .build(),
                ))
                .build(),
        );

        let removed = registry.lock().remove(&1);
        match removed {
            Some(HostResponseValue::Error(record)) => assert_eq!(record.message, "denied"),
            other => panic!("expected error value, got {other:?}"),
        }
    }
}
