use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use crate::messages::{
    ErrorCategory, ErrorRecord, HostInfo, PipelineOutput, PipelineStateMessage, PsInvocationState,
};
use crate::pool::ServerRunspacePool;
use crate::{PsrpError, StreamType};

/// Metadata attached when the CREATE_PIPELINE message is parsed.
#[derive(Debug, Clone, Copy)]
pub struct PipelineMetadata {
    pub no_input: bool,
    pub host_info: Option<HostInfo>,
}

#[derive(Debug)]
struct PipelineState {
    state: PsInvocationState,
    metadata: Option<PipelineMetadata>,
}

/// State shared between the pool (which attaches metadata during
/// message parsing) and the pipeline handle.
#[derive(Debug)]
pub(crate) struct PipelineShared {
    state: Mutex<PipelineState>,
}

impl PipelineShared {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_metadata(&self, metadata: PipelineMetadata) {
        self.lock().metadata = Some(metadata);
    }
}

/// Server-side pipeline handle, one per `<Command>` envelope. Clones
/// share state; the handle is used from the pipeline worker, its script
/// thread, and the transport read loop.
#[derive(Debug, Clone)]
pub struct ServerPipeline {
    pool: ServerRunspacePool,
    id: Uuid,
    shared: Arc<PipelineShared>,
}

impl ServerPipeline {
    /// Register a new pipeline with the pool. The nil UUID addresses
    /// the pool itself and is never a valid pipeline id.
    pub fn new(pool: &ServerRunspacePool, id: Uuid) -> Result<Self, PsrpError> {
        if id.is_nil() {
            return Err(PsrpError::InvalidState(
                "the nil UUID cannot identify a pipeline",
            ));
        }

        let shared = Arc::new(PipelineShared {
            state: Mutex::new(PipelineState {
                state: PsInvocationState::NotStarted,
                metadata: None,
            }),
        });
        pool.register_pipeline(id, Arc::clone(&shared))?;

        Ok(Self {
            pool: pool.clone(),
            id,
            shared,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pool(&self) -> &ServerRunspacePool {
        &self.pool
    }

    pub fn state(&self) -> PsInvocationState {
        self.shared.lock().state
    }

    pub fn metadata(&self) -> Option<PipelineMetadata> {
        self.shared.lock().metadata
    }

    /// Transition NotStarted -> Running. No state record is emitted;
    /// the client infers it from having issued the create.
    pub fn start(&self) -> Result<(), PsrpError> {
        let mut state = self.shared.lock();
        if state.state != PsInvocationState::NotStarted {
            return Err(PsrpError::InvalidState(
                "pipeline can only start from NotStarted",
            ));
        }
        state.state = PsInvocationState::Running;
        Ok(())
    }

    /// Emit one output object on the pipeline's stream.
    pub fn write_output(&self, data: crate::value::PsValue) -> Result<(), PsrpError> {
        self.pool.queue_message(
            &PipelineOutput { data },
            Some(self.id),
            StreamType::Default,
        )
    }

    /// Emit a non-terminating error record.
    pub fn write_error(&self, record: &ErrorRecord) -> Result<(), PsrpError> {
        self.pool
            .queue_message(record, Some(self.id), StreamType::Default)
    }

    /// Mark the script as finished and emit the Completed record.
    pub fn complete(&self) -> Result<(), PsrpError> {
        self.change_state(PsInvocationState::Completed, None)
    }

    /// Begin a cooperative stop: the state flips to Stopping and the
    /// running script observes it at its next facade call.
    pub fn begin_stop(&self) {
        let mut state = self.shared.lock();
        if state.state == PsInvocationState::Running {
            debug!(pipeline_id = %self.id, "pipeline stopping");
            state.state = PsInvocationState::Stopping;
        }
    }

    /// Finish a stop: transition to Stopped and emit the state record
    /// carrying the canonical pipeline-stopped error.
    pub fn stop(&self) -> Result<(), PsrpError> {
        self.change_state(PsInvocationState::Stopped, Some(stopped_record()))
    }

    /// Force a state transition, emitting the PIPELINE_STATE record.
    pub fn change_state(
        &self,
        new_state: PsInvocationState,
        error: Option<ErrorRecord>,
    ) -> Result<(), PsrpError> {
        {
            let mut state = self.shared.lock();
            debug!(pipeline_id = %self.id, from = ?state.state, to = ?new_state, "pipeline state change");
            state.state = new_state;
        }

        let message = PipelineStateMessage::builder()
            .state(new_state)
            .error(error)
            .build();
        self.pool
            .queue_message(&message, Some(self.id), StreamType::Default)
    }

    /// Remove the pipeline from the pool. Pending outbound data for the
    /// pipeline survives in the pool queue until drained.
    pub fn close(&self) {
        debug!(pipeline_id = %self.id, "pipeline closed");
        self.pool.unregister_pipeline(self.id);
    }
}

fn stopped_record() -> ErrorRecord {
    ErrorRecord::builder()
        .message("The pipeline has been stopped.".to_string())
        .exception_type("System.Management.Automation.PipelineStoppedException".to_string())
        .category(ErrorCategory::OperationStopped)
        .reason(Some("PipelineStoppedException".to_string()))
        .fully_qualified_error_id("PipelineStopped".to_string())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Defragmenter;
    use crate::message::{MessageType, PsrpMessage};
    use crate::value::PsValue;

    fn drain_messages(pool: &ServerRunspacePool) -> Vec<PsrpMessage> {
        let mut defragmenter = Defragmenter::new();
        let mut messages = Vec::new();
        while let Some(payload) = pool.data_to_send() {
            messages.extend(defragmenter.defragment(&payload.data).unwrap());
        }
        messages
    }

    #[test]
    fn nil_pipeline_id_is_rejected() {
        let pool = ServerRunspacePool::new();
        assert!(ServerPipeline::new(&pool, Uuid::nil()).is_err());
    }

    #[test]
    fn duplicate_pipeline_id_is_rejected() {
        let pool = ServerRunspacePool::new();
        let id = Uuid::new_v4();
        let _first = ServerPipeline::new(&pool, id).unwrap();
        assert!(ServerPipeline::new(&pool, id).is_err());
    }

    #[test]
    fn lifecycle_happy_path_emits_output_then_completed() {
        let pool = ServerRunspacePool::new();
        let pipeline = ServerPipeline::new(&pool, Uuid::new_v4()).unwrap();

        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), PsInvocationState::Running);
        assert!(pipeline.start().is_err());

        pipeline.write_output(PsValue::I64(2)).unwrap();
        pipeline.complete().unwrap();
        assert_eq!(pipeline.state(), PsInvocationState::Completed);

        let types: Vec<MessageType> = drain_messages(&pool)
            .iter()
            .map(|m| m.message_type)
            .collect();
        assert_eq!(
            types,
            vec![MessageType::PipelineOutput, MessageType::PipelineState]
        );
    }

    #[test]
    fn begin_stop_then_stop_emits_the_stopped_record() {
        let pool = ServerRunspacePool::new();
        let pipeline = ServerPipeline::new(&pool, Uuid::new_v4()).unwrap();
        pipeline.start().unwrap();

        pipeline.begin_stop();
        assert_eq!(pipeline.state(), PsInvocationState::Stopping);
        // begin_stop is idempotent once stopping
        pipeline.begin_stop();
        assert_eq!(pipeline.state(), PsInvocationState::Stopping);

        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PsInvocationState::Stopped);

        let messages = drain_messages(&pool);
        let state = PipelineStateMessage::try_from(&messages[0].body().unwrap()).unwrap();
        assert_eq!(state.state, PsInvocationState::Stopped);
        assert_eq!(
            state.error.map(|e| e.fully_qualified_error_id),
            Some("PipelineStopped".to_string())
        );
    }

    #[test]
    fn close_unregisters_but_keeps_pending_output() {
        let pool = ServerRunspacePool::new();
        let id = Uuid::new_v4();
        let pipeline = ServerPipeline::new(&pool, id).unwrap();
        pipeline.start().unwrap();
        pipeline.write_output(PsValue::str("late")).unwrap();
        pipeline.close();

        // The id can be reused after close and pending data still drains.
        let _second = ServerPipeline::new(&pool, id).unwrap();
        let messages = drain_messages(&pool);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, MessageType::PipelineOutput);
    }
}
