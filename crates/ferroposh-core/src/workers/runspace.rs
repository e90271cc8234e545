use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use ferroposh_psrp::{PsrpEvent, ServerRunspacePool};
use tracing::{debug, info, warn};

use super::{HostRegistry, WorkerInput};
use crate::transport::Outbound;
use crate::ServerError;

/// The long-lived worker servicing the runspace pool's event queue:
/// it forwards codec output to the transport and resolves pool-scoped
/// host calls.
pub(crate) struct RunspaceWorker {
    events: Sender<WorkerInput>,
    registry: Arc<HostRegistry>,
    pool: ServerRunspacePool,
    handle: Option<JoinHandle<()>>,
}

impl RunspaceWorker {
    pub(crate) fn spawn(
        pool: ServerRunspacePool,
        outbound: Arc<Outbound>,
    ) -> Result<Self, ServerError> {
        let (events, receiver) = crossbeam_channel::unbounded();
        let registry = Arc::new(HostRegistry::new());

        let thread_pool = pool.clone();
        let thread_registry = Arc::clone(&registry);
        let handle = std::thread::Builder::new()
            .name("runspace".to_string())
            .spawn(move || run_loop(&receiver, &thread_pool, &outbound, &thread_registry))?;

        Ok(Self {
            events,
            registry,
            pool,
            handle: Some(handle),
        })
    }

    pub(crate) fn registry(&self) -> Arc<HostRegistry> {
        Arc::clone(&self.registry)
    }

    pub(crate) fn send_event(&self, event: PsrpEvent) {
        if self.events.send(WorkerInput::Event(event)).is_err() {
            warn!("runspace worker is gone; dropping event");
        }
    }

    /// Close the pool, flush its final state record, and ask the worker
    /// to wind down.
    pub(crate) fn close(&self, outbound: &Outbound) -> Result<(), ServerError> {
        self.pool.close()?;
        outbound.send_pending(&self.pool)?;
        let _ = self.events.send(WorkerInput::Shutdown);
        Ok(())
    }

    /// Wind the worker down without touching the pool; used when the
    /// read loop exits without a clean Close exchange.
    pub(crate) fn shutdown(&self) {
        let _ = self.events.send(WorkerInput::Shutdown);
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("runspace worker panicked");
            }
        }
    }
}

fn run_loop(
    receiver: &Receiver<WorkerInput>,
    pool: &ServerRunspacePool,
    outbound: &Outbound,
    registry: &HostRegistry,
) {
    info!("starting runspace worker");

    while let Ok(input) = receiver.recv() {
        let event = match input {
            WorkerInput::Shutdown => break,
            WorkerInput::Event(event) => event,
        };
        debug!(?event, "processing runspace event");

        if let PsrpEvent::RunspacePoolHostResponse(response) = &event {
            registry.store(response);
        }

        if let Err(e) = outbound.send_pending(pool) {
            warn!(error = %e, "failed to flush runspace data");
        }
    }

    // Wake anything still blocked on a pool-scoped host call.
    registry.notify_all();
    info!("ending runspace worker");
}
