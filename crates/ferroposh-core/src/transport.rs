use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use ferroposh_psrp::{
    ErrorCategory, ErrorRecord, PsrpPayload, RunspacePoolState, ServerPipeline,
    ServerRunspacePool,
};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::connection::Connection;
use crate::engine::ScriptEngine;
use crate::packet::{data_packet, guid_packet, Packet, PacketKind};
use crate::workers::{PipelineWorker, RunspaceWorker};
use crate::ServerError;

/// Read-buffer size for one connection read.
const READ_BUFFER: usize = 32_768;

/// Serializes every outbound packet onto the connection. Shared by the
/// read loop, the runspace worker, the pipeline workers, and their
/// script threads; the mutex orders interleaved writes so packets never
/// interleave mid-frame.
pub(crate) struct Outbound {
    conn: Arc<dyn Connection>,
    write_lock: Mutex<()>,
}

impl Outbound {
    pub(crate) fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn,
            write_lock: Mutex::new(()),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), ServerError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        trace!(len = bytes.len(), "writing packet");
        self.conn.send(bytes)?;
        Ok(())
    }

    pub(crate) fn data(&self, payload: &PsrpPayload) -> Result<(), ServerError> {
        self.write(&data_packet(
            &payload.data,
            payload.stream_type,
            payload.pipeline_id,
        ))
    }

    pub(crate) fn ack(&self, kind: PacketKind, pipeline_id: Option<Uuid>) -> Result<(), ServerError> {
        self.write(&guid_packet(kind, pipeline_id))
    }

    /// Drain everything the codec has queued onto the wire.
    pub(crate) fn send_pending(&self, pool: &ServerRunspacePool) -> Result<(), ServerError> {
        while let Some(payload) = pool.data_to_send() {
            self.data(&payload)?;
        }
        Ok(())
    }
}

enum Outcome {
    Continue,
    Shutdown,
}

/// The out-of-process transport: owns the connection, the runspace
/// worker, and the table of live pipeline workers; runs the read loop
/// and dispatches each decoded packet.
pub struct OutOfProcTransport {
    conn: Arc<dyn Connection>,
    outbound: Arc<Outbound>,
    pool: ServerRunspacePool,
    engine: Arc<dyn ScriptEngine>,
    runspace: Option<RunspaceWorker>,
    pipelines: HashMap<Uuid, PipelineWorker>,
}

impl OutOfProcTransport {
    pub fn new(conn: Box<dyn Connection>, engine: Arc<dyn ScriptEngine>) -> Self {
        let conn: Arc<dyn Connection> = Arc::from(conn);
        Self {
            outbound: Arc::new(Outbound::new(Arc::clone(&conn))),
            conn,
            pool: ServerRunspacePool::new(),
            engine,
            runspace: None,
            pipelines: HashMap::new(),
        }
    }

    /// Run the server until the client closes the pool, the peer hangs
    /// up, or an unrecoverable failure propagates out.
    pub fn run(mut self) -> Result<(), ServerError> {
        info!(pool_id = %self.pool.id(), "starting PSRP server connection");
        self.conn.open()?;
        self.runspace = Some(RunspaceWorker::spawn(
            self.pool.clone(),
            Arc::clone(&self.outbound),
        )?);

        let result = self.read_loop();

        self.shutdown_workers();
        self.conn.close();
        info!("ending PSRP server");
        result
    }

    fn read_loop(&mut self) -> Result<(), ServerError> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; READ_BUFFER];

        loop {
            let n = self.conn.read(&mut chunk)?;
            if n == 0 {
                info!("input pipe has closed");
                return Ok(());
            }
            buffer.extend_from_slice(&chunk[..n]);

            // One packet per line feed; reads may split or batch packets
            // arbitrarily, so keep scanning the buffered bytes.
            while let Some(end) = buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = buffer[..end].to_vec();
                buffer.drain(..=end);

                match self.process(&raw) {
                    Ok(Outcome::Continue) => {}
                    Ok(Outcome::Shutdown) => return Ok(()),
                    Err(e) => return self.handle_process_failure(e),
                }
            }
        }
    }

    /// A failure while the pool is usable breaks the pool and ends the
    /// read loop cleanly; otherwise it propagates and takes the
    /// process down.
    fn handle_process_failure(&mut self, failure: ServerError) -> Result<(), ServerError> {
        error!(error = %failure, "failure during message processing");

        let state = self.pool.state();
        if !matches!(state, RunspacePoolState::Opened | RunspacePoolState::Broken) {
            return Err(failure);
        }

        let record = ErrorRecord::builder()
            .message(failure.to_string())
            .stack_trace(Some(format!("{failure:?}")))
            .category(ErrorCategory::ReadError)
            .activity(Some("Parsing PSRP msg".to_string()))
            .reason(Some("Unknown result".to_string()))
            .target_name(Some(format!("RunspacePool({})", self.pool.id())))
            .target_type(Some("RunspaceWorker".to_string()))
            .fully_qualified_error_id("ProcessRunspaceMessageFailure".to_string())
            .build();

        if let Err(e) = self.pool.set_broken(record) {
            warn!(error = %e, "failed to mark the pool broken");
        }
        if let Err(e) = self.outbound.send_pending(&self.pool) {
            warn!(error = %e, "failed to flush the broken-state record");
        }
        Ok(())
    }

    fn process(&mut self, raw: &[u8]) -> Result<Outcome, ServerError> {
        trace!(packet = %String::from_utf8_lossy(raw), "processing packet");
        let packet = Packet::parse(raw)?;
        let pipeline_id = packet.pipeline_id();
        debug!(kind = packet.kind.tag(), pipeline_id = ?pipeline_id, "processing packet");

        match packet.kind {
            PacketKind::Close => self.process_close(pipeline_id),
            PacketKind::Command => {
                self.process_command(pipeline_id)?;
                Ok(Outcome::Continue)
            }
            PacketKind::Data => {
                self.process_data(&packet)?;
                Ok(Outcome::Continue)
            }
            PacketKind::Signal => {
                self.process_signal(pipeline_id)?;
                Ok(Outcome::Continue)
            }
            other => {
                // Ack packets from the client need no reply.
                debug!(kind = other.tag(), "ignoring packet");
                Ok(Outcome::Continue)
            }
        }
    }

    fn process_close(&mut self, pipeline_id: Option<Uuid>) -> Result<Outcome, ServerError> {
        if let Some(id) = pipeline_id {
            let mut worker = self
                .pipelines
                .remove(&id)
                .ok_or(ServerError::UnknownPipeline(id))?;
            worker.close(&self.outbound)?;
            worker.join();
            self.outbound.ack(PacketKind::CloseAck, Some(id))?;
            return Ok(Outcome::Continue);
        }

        if let Some(worker) = self.runspace.as_mut() {
            worker.close(&self.outbound)?;
            worker.join();
        }
        self.outbound.ack(PacketKind::CloseAck, None)?;
        Ok(Outcome::Shutdown)
    }

    fn process_command(&mut self, pipeline_id: Option<Uuid>) -> Result<(), ServerError> {
        let Some(id) = pipeline_id else {
            // A runspace-scoped Command is not defined; nothing to ack.
            warn!("ignoring Command packet addressed to the pool");
            return Ok(());
        };

        let runspace = self.runspace.as_ref().ok_or_else(|| {
            ServerError::MalformedPacket("Command received before the server started".to_string())
        })?;

        let pipeline = ServerPipeline::new(&self.pool, id)?;
        let worker = PipelineWorker::spawn(
            pipeline,
            runspace.registry(),
            Arc::clone(&self.outbound),
            Arc::clone(&self.engine),
        )?;
        self.pipelines.insert(id, worker);
        self.outbound.ack(PacketKind::CommandAck, Some(id))
    }

    fn process_data(&mut self, packet: &Packet) -> Result<(), ServerError> {
        let pipeline_id = packet.pipeline_id();
        self.pool.receive_data(&PsrpPayload::new(
            packet.payload.clone(),
            packet.stream,
            pipeline_id,
        ))?;

        // Demultiplex: every event goes to exactly one worker queue,
        // chosen by the PSGuid of the carrying packet.
        while let Some(event) = self.pool.next_event() {
            match pipeline_id {
                Some(id) => self
                    .pipelines
                    .get(&id)
                    .ok_or(ServerError::UnknownPipeline(id))?
                    .send_event(event),
                None => {
                    if let Some(runspace) = self.runspace.as_ref() {
                        runspace.send_event(event);
                    }
                }
            }
        }

        self.outbound.ack(PacketKind::DataAck, pipeline_id)
    }

    fn process_signal(&mut self, pipeline_id: Option<Uuid>) -> Result<(), ServerError> {
        let Some(id) = pipeline_id else {
            warn!("ignoring Signal packet addressed to the pool");
            return Ok(());
        };

        self.pipelines
            .get(&id)
            .ok_or(ServerError::UnknownPipeline(id))?
            .stop(&self.outbound)?;
        self.outbound.ack(PacketKind::SignalAck, Some(id))
    }

    /// Best-effort teardown when the read loop exits without a clean
    /// Close exchange (peer hang-up or broken pool). No further state
    /// records go on the wire; workers just drain and exit.
    fn shutdown_workers(&mut self) {
        for (_, mut worker) in self.pipelines.drain() {
            worker.shutdown();
            worker.join();
        }

        if let Some(mut worker) = self.runspace.take() {
            worker.shutdown();
            worker.join();
        }
    }
}
