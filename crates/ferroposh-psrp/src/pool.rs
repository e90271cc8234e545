use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};
use uuid::Uuid;

use crate::fragment::{Defragmenter, Fragmenter};
use crate::message::{Destination, MessageBody, MessageType, PsrpMessage};
use crate::messages::{
    ApplicationPrivateData, CreatePipeline, ErrorRecord, HostResponse, InitRunspacePool,
    RunspacePoolState, RunspacePoolStateMessage, SessionCapability,
};
use crate::pipeline::{PipelineMetadata, PipelineShared};
use crate::value::PsValue;
use crate::{PsrpError, PsrpPayload, StreamType};

/// Default maximum fragment size for the out-of-process transport.
const MAX_FRAGMENT_SIZE: usize = 32_768;

/// An event surfaced by [`ServerRunspacePool::next_event`] after
/// receiving client data.
#[derive(Debug, Clone)]
pub enum PsrpEvent {
    SessionCapability(SessionCapability),
    InitRunspacePool(InitRunspacePool),
    CreatePipeline(CreatePipelineEvent),
    PipelineInput(PsValue),
    EndOfPipelineInput,
    PipelineHostResponse(HostResponse),
    RunspacePoolHostResponse(HostResponse),
}

#[derive(Debug, Clone)]
pub struct CreatePipelineEvent {
    pub pipeline_id: Uuid,
    pub create: CreatePipeline,
}

#[derive(Debug)]
struct OutboundChunk {
    data: Vec<u8>,
    stream: StreamType,
    pipeline_id: Option<Uuid>,
}

struct PoolInner {
    id: Uuid,
    state: RunspacePoolState,
    host_info: Option<crate::messages::HostInfo>,
    min_runspaces: i32,
    max_runspaces: i32,
    events: VecDeque<PsrpEvent>,
    outgoing: VecDeque<OutboundChunk>,
    fragmenter: Fragmenter,
    defragmenter: Defragmenter,
    pipelines: HashMap<Uuid, Arc<PipelineShared>>,
    next_call_id: i64,
}

/// Server-side runspace pool.
///
/// The handle is cheap to clone and every operation is safe to call
/// from any thread: the transport read loop feeds `receive_data` /
/// `next_event` while workers and script threads drain `data_to_send`
/// concurrently.
#[derive(Clone)]
pub struct ServerRunspacePool {
    inner: Arc<Mutex<PoolInner>>,
}

impl Default for ServerRunspacePool {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerRunspacePool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                id: Uuid::new_v4(),
                state: RunspacePoolState::BeforeOpen,
                host_info: None,
                min_runspaces: 1,
                max_runspaces: 1,
                events: VecDeque::new(),
                outgoing: VecDeque::new(),
                fragmenter: Fragmenter::new(MAX_FRAGMENT_SIZE),
                defragmenter: Defragmenter::new(),
                pipelines: HashMap::new(),
                next_call_id: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.lock().id
    }

    pub fn state(&self) -> RunspacePoolState {
        self.lock().state
    }

    /// Host metadata the client declared when opening the pool.
    pub fn host_info(&self) -> Option<crate::messages::HostInfo> {
        self.lock().host_info
    }

    /// Feed one run of inbound fragment bytes into the pool. Complete
    /// messages update the state machine and surface as events.
    pub fn receive_data(&self, payload: &PsrpPayload) -> Result<(), PsrpError> {
        let messages = self.lock().defragmenter.defragment(&payload.data)?;
        for message in messages {
            self.handle_message(&message)?;
        }
        Ok(())
    }

    /// Pop the next pending event, in the order messages arrived.
    pub fn next_event(&self) -> Option<PsrpEvent> {
        self.lock().events.pop_front()
    }

    /// Drain pending outbound bytes. Consecutive chunks for the same
    /// scope and stream coalesce into one payload; `None` means drained.
    pub fn data_to_send(&self) -> Option<PsrpPayload> {
        let mut inner = self.lock();
        let first = inner.outgoing.pop_front()?;
        let mut payload = PsrpPayload::new(first.data, first.stream, first.pipeline_id);

        while let Some(next) = inner.outgoing.front() {
            if next.stream != payload.stream_type || next.pipeline_id != payload.pipeline_id {
                break;
            }
            let Some(next) = inner.outgoing.pop_front() else {
                break;
            };
            payload.data.extend_from_slice(&next.data);
        }

        Some(payload)
    }

    /// Close the pool and queue the final state transition.
    pub fn close(&self) -> Result<(), PsrpError> {
        {
            let mut inner = self.lock();
            inner.state = RunspacePoolState::Closed;
        }
        self.queue_message(&RunspacePoolStateMessage::closed(), None, StreamType::Default)
    }

    /// Force the pool into the Broken state, carrying the error record
    /// to the client.
    pub fn set_broken(&self, error: ErrorRecord) -> Result<(), PsrpError> {
        {
            let mut inner = self.lock();
            inner.state = RunspacePoolState::Broken;
        }
        self.queue_message(
            &RunspacePoolStateMessage::broken(error),
            None,
            StreamType::Default,
        )
    }

    pub(crate) fn queue_message(
        &self,
        body: &dyn MessageBody,
        pipeline_id: Option<Uuid>,
        stream: StreamType,
    ) -> Result<(), PsrpError> {
        let mut inner = self.lock();
        let message = PsrpMessage::from_body(body, Destination::Client, inner.id, pipeline_id)?;
        trace!(
            message_type = message.message_type.name(),
            pipeline_id = ?pipeline_id,
            "queueing outbound message"
        );
        let data = inner.fragmenter.fragment(&message);
        inner.outgoing.push_back(OutboundChunk {
            data,
            stream,
            pipeline_id,
        });
        Ok(())
    }

    pub(crate) fn next_call_id(&self) -> i64 {
        let mut inner = self.lock();
        inner.next_call_id += 1;
        inner.next_call_id
    }

    pub(crate) fn register_pipeline(
        &self,
        id: Uuid,
        shared: Arc<PipelineShared>,
    ) -> Result<(), PsrpError> {
        let mut inner = self.lock();
        if inner.pipelines.contains_key(&id) {
            return Err(PsrpError::InvalidState("pipeline id already registered"));
        }
        inner.pipelines.insert(id, shared);
        Ok(())
    }

    pub(crate) fn unregister_pipeline(&self, id: Uuid) {
        self.lock().pipelines.remove(&id);
    }

    fn pipeline_shared(&self, id: Uuid) -> Result<Arc<PipelineShared>, PsrpError> {
        self.lock()
            .pipelines
            .get(&id)
            .cloned()
            .ok_or(PsrpError::UnknownPipeline(id))
    }

    fn push_event(&self, event: PsrpEvent) {
        self.lock().events.push_back(event);
    }

    fn handle_message(&self, message: &PsrpMessage) -> Result<(), PsrpError> {
        debug!(
            message_type = message.message_type.name(),
            pid = ?message.pid,
            "processing client message"
        );

        match message.message_type {
            MessageType::SessionCapability => {
                let capability = SessionCapability::try_from(&message.body()?)?;
                self.queue_message(
                    &SessionCapability::server_default(),
                    None,
                    StreamType::Default,
                )?;
                self.lock().state = RunspacePoolState::NegotiationSucceeded;
                self.push_event(PsrpEvent::SessionCapability(capability));
            }
            MessageType::InitRunspacePool => {
                let init = InitRunspacePool::try_from(&message.body()?)?;
                {
                    let mut inner = self.lock();
                    inner.host_info = Some(init.host_info);
                    inner.min_runspaces = init.min_runspaces;
                    inner.max_runspaces = init.max_runspaces;
                }
                self.queue_message(
                    &ApplicationPrivateData::default(),
                    None,
                    StreamType::Default,
                )?;
                self.queue_message(
                    &RunspacePoolStateMessage::opened(),
                    None,
                    StreamType::Default,
                )?;
                self.lock().state = RunspacePoolState::Opened;
                self.push_event(PsrpEvent::InitRunspacePool(init));
            }
            MessageType::CreatePipeline => {
                let pipeline_id = message.pid.ok_or(PsrpError::InvalidState(
                    "CreatePipeline without a pipeline id",
                ))?;
                let create = CreatePipeline::try_from(&message.body()?)?;
                let shared = self.pipeline_shared(pipeline_id)?;
                shared.set_metadata(PipelineMetadata {
                    no_input: create.no_input,
                    host_info: create.host_info,
                });
                self.push_event(PsrpEvent::CreatePipeline(CreatePipelineEvent {
                    pipeline_id,
                    create,
                }));
            }
            MessageType::PipelineInput => {
                self.push_event(PsrpEvent::PipelineInput(message.body()?));
            }
            MessageType::EndOfPipelineInput => {
                self.push_event(PsrpEvent::EndOfPipelineInput);
            }
            MessageType::PipelineHostResponse => {
                let response = HostResponse::parse(&message.body()?, true)?;
                self.push_event(PsrpEvent::PipelineHostResponse(response));
            }
            MessageType::RunspacePoolHostResponse => {
                let response = HostResponse::parse(&message.body()?, false)?;
                self.push_event(PsrpEvent::RunspacePoolHostResponse(response));
            }
            other => return Err(PsrpError::UnexpectedMessage(other.name())),
        }

        Ok(())
    }
}

impl std::fmt::Debug for ServerRunspacePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ServerRunspacePool")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .field("runspaces", &(inner.min_runspaces, inner.max_runspaces))
            .field("pipelines", &inner.pipelines.len())
            .field("pending_events", &inner.events.len())
            .field("pending_chunks", &inner.outgoing.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::HostInfo;
    use crate::ServerPipeline;

    fn client_payload(body: &dyn MessageBody, pid: Option<Uuid>) -> PsrpPayload {
        let message =
            PsrpMessage::from_body(body, Destination::Server, Uuid::new_v4(), pid).unwrap();
        let mut fragmenter = Fragmenter::new(MAX_FRAGMENT_SIZE);
        PsrpPayload::new(fragmenter.fragment(&message), StreamType::Default, pid)
    }

    fn drain_messages(pool: &ServerRunspacePool) -> Vec<PsrpMessage> {
        let mut defragmenter = Defragmenter::new();
        let mut messages = Vec::new();
        while let Some(payload) = pool.data_to_send() {
            messages.extend(defragmenter.defragment(&payload.data).unwrap());
        }
        messages
    }

    #[test]
    fn open_handshake_queues_the_expected_replies() {
        let pool = ServerRunspacePool::new();
        assert_eq!(pool.state(), RunspacePoolState::BeforeOpen);

        pool.receive_data(&client_payload(&SessionCapability::server_default(), None))
            .unwrap();
        assert_eq!(pool.state(), RunspacePoolState::NegotiationSucceeded);
        assert!(matches!(
            pool.next_event(),
            Some(PsrpEvent::SessionCapability(_))
        ));

        pool.receive_data(&client_payload(
            &InitRunspacePool::builder()
                .host_info(HostInfo::builder().is_host_ui_null(false).build())
                .build(),
            None,
        ))
        .unwrap();
        assert_eq!(pool.state(), RunspacePoolState::Opened);
        assert!(matches!(
            pool.next_event(),
            Some(PsrpEvent::InitRunspacePool(_))
        ));
        assert_eq!(pool.host_info().map(|h| h.is_host_ui_null), Some(false));

        let types: Vec<MessageType> = drain_messages(&pool)
            .iter()
            .map(|m| m.message_type)
            .collect();
        assert_eq!(
            types,
            vec![
                MessageType::SessionCapability,
                MessageType::ApplicationPrivateData,
                MessageType::RunspacePoolState,
            ]
        );
    }

    #[test]
    fn set_broken_emits_a_broken_state_record() {
        let pool = ServerRunspacePool::new();
        pool.set_broken(
            ErrorRecord::builder()
                .message("parse failure".to_string())
                .fully_qualified_error_id("ProcessRunspaceMessageFailure".to_string())
                .build(),
        )
        .unwrap();

        assert_eq!(pool.state(), RunspacePoolState::Broken);
        let messages = drain_messages(&pool);
        assert_eq!(messages.len(), 1);
        let state =
            RunspacePoolStateMessage::try_from(&messages[0].body().unwrap()).unwrap();
        assert_eq!(state.state, RunspacePoolState::Broken);
        assert!(state.error.is_some());
    }

    #[test]
    fn unexpected_message_type_is_an_error() {
        let pool = ServerRunspacePool::new();
        let result = pool.receive_data(&client_payload(&RunspacePoolStateMessage::opened(), None));
        assert!(matches!(result, Err(PsrpError::UnexpectedMessage(_))));
    }

    #[test]
    fn create_pipeline_attaches_metadata_to_the_registered_pipeline() {
        let pool = ServerRunspacePool::new();
        let pipeline_id = Uuid::new_v4();
        let pipeline = ServerPipeline::new(&pool, pipeline_id).unwrap();

        let create = CreatePipeline::builder()
            .powershell(crate::messages::PowerShellPipeline::builder()
                .commands(vec![crate::messages::PipelineCommand::script("out 1")])
                .build())
            .no_input(false)
            .build();
        pool.receive_data(&client_payload(&create, Some(pipeline_id)))
            .unwrap();

        let metadata = pipeline.metadata().expect("metadata attached");
        assert!(!metadata.no_input);
        assert!(matches!(
            pool.next_event(),
            Some(PsrpEvent::CreatePipeline(event)) if event.pipeline_id == pipeline_id
        ));
    }

    #[test]
    fn create_pipeline_for_unknown_id_is_rejected() {
        let pool = ServerRunspacePool::new();
        let create = CreatePipeline::builder()
            .powershell(crate::messages::PowerShellPipeline::builder()
                .commands(vec![crate::messages::PipelineCommand::script("out 1")])
                .build())
            .build();
        let result = pool.receive_data(&client_payload(&create, Some(Uuid::new_v4())));
        assert!(matches!(result, Err(PsrpError::UnknownPipeline(_))));
    }

    #[test]
    fn data_to_send_coalesces_same_scope_chunks() {
        let pool = ServerRunspacePool::new();
        pool.queue_message(
            &SessionCapability::server_default(),
            None,
            StreamType::Default,
        )
        .unwrap();
        pool.queue_message(
            &RunspacePoolStateMessage::opened(),
            None,
            StreamType::Default,
        )
        .unwrap();

        let payload = pool.data_to_send().expect("one coalesced payload");
        assert_eq!(payload.pipeline_id, None);
        assert!(pool.data_to_send().is_none());

        let mut defragmenter = Defragmenter::new();
        assert_eq!(defragmenter.defragment(&payload.data).unwrap().len(), 2);
    }

    #[test]
    fn data_to_send_splits_on_scope_boundaries() {
        let pool = ServerRunspacePool::new();
        let pipeline_id = Uuid::new_v4();
        pool.queue_message(
            &SessionCapability::server_default(),
            None,
            StreamType::Default,
        )
        .unwrap();
        pool.queue_message(
            &crate::messages::PipelineOutput {
                data: PsValue::I64(2),
            },
            Some(pipeline_id),
            StreamType::Default,
        )
        .unwrap();

        assert_eq!(pool.data_to_send().map(|p| p.pipeline_id), Some(None));
        assert_eq!(
            pool.data_to_send().map(|p| p.pipeline_id),
            Some(Some(pipeline_id))
        );
        assert!(pool.data_to_send().is_none());
    }
}
