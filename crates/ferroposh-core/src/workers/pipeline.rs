use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use ferroposh_psrp::{
    CommandParameter, CreatePipelineEvent, ErrorCategory, ErrorRecord, PsInvocationState,
    PsrpEvent, PsValue, ServerPipeline,
};
use tracing::{debug, error, info, warn};

use super::{HostRegistry, InputBuffer, InputCursor, WorkerInput};
use crate::cmdlet::PsCmdlet;
use crate::engine::{EngineError, Invocation, ScriptEngine};
use crate::host::PsHostFacade;
use crate::transport::Outbound;
use crate::ServerError;

/// Per-pipeline worker: services the pipeline's event queue, owns the
/// input buffer feeding the script, and spawns the script subthread on
/// CreatePipeline.
pub(crate) struct PipelineWorker {
    events: Sender<WorkerInput>,
    pipeline: ServerPipeline,
    handle: Option<JoinHandle<()>>,
}

impl PipelineWorker {
    pub(crate) fn spawn(
        pipeline: ServerPipeline,
        runspace_registry: Arc<HostRegistry>,
        outbound: Arc<Outbound>,
        engine: Arc<dyn ScriptEngine>,
    ) -> Result<Self, ServerError> {
        let (events, receiver) = crossbeam_channel::unbounded();

        let thread_pipeline = pipeline.clone();
        let handle = std::thread::Builder::new()
            .name(format!("pipeline-{}", pipeline.id()))
            .spawn(move || {
                run_loop(
                    &receiver,
                    &thread_pipeline,
                    &runspace_registry,
                    &outbound,
                    &engine,
                );
            })?;

        Ok(Self {
            events,
            pipeline,
            handle: Some(handle),
        })
    }

    pub(crate) fn send_event(&self, event: PsrpEvent) {
        if self.events.send(WorkerInput::Event(event)).is_err() {
            warn!(pipeline_id = %self.pipeline.id(), "pipeline worker is gone; dropping event");
        }
    }

    /// Close the pipeline: stop it if still running, remove it from the
    /// pool, flush its remaining output, and wind the worker down.
    pub(crate) fn close(&self, outbound: &Outbound) -> Result<(), ServerError> {
        if self.pipeline.state() == PsInvocationState::Running {
            self.pipeline.begin_stop();
        }
        self.pipeline.close();
        outbound.send_pending(self.pipeline.pool())?;
        let _ = self.events.send(WorkerInput::Shutdown);
        Ok(())
    }

    /// Begin a cooperative stop without tearing the worker down; a
    /// later `<Close>` finishes the job.
    pub(crate) fn stop(&self, outbound: &Outbound) -> Result<(), ServerError> {
        self.pipeline.begin_stop();
        outbound.send_pending(self.pipeline.pool())?;
        Ok(())
    }

    /// Wind the worker down without the close handshake; used when the
    /// read loop exits without a clean Close exchange.
    pub(crate) fn shutdown(&self) {
        self.pipeline.begin_stop();
        let _ = self.events.send(WorkerInput::Shutdown);
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(pipeline_id = %self.pipeline.id(), "pipeline worker panicked");
            }
        }
    }
}

fn run_loop(
    receiver: &Receiver<WorkerInput>,
    pipeline: &ServerPipeline,
    runspace_registry: &Arc<HostRegistry>,
    outbound: &Arc<Outbound>,
    engine: &Arc<dyn ScriptEngine>,
) {
    let pool = pipeline.pool().clone();
    let registry = Arc::new(HostRegistry::new());
    let input = Arc::new(InputBuffer::new());
    // Detached on worker exit; a blocked script unwinds through the
    // input-buffer/host-waiter wakeups below.
    let mut script_thread: Option<JoinHandle<()>> = None;

    info!(pipeline_id = %pipeline.id(), "starting pipeline worker");

    while let Ok(message) = receiver.recv() {
        let event = match message {
            WorkerInput::Shutdown => break,
            WorkerInput::Event(event) => event,
        };
        debug!(pipeline_id = %pipeline.id(), ?event, "processing pipeline event");

        match event {
            PsrpEvent::CreatePipeline(create) => {
                input.set_complete(create.create.no_input);
                match spawn_script(
                    create,
                    pipeline,
                    runspace_registry,
                    &registry,
                    &input,
                    outbound,
                    engine,
                ) {
                    Ok(handle) => script_thread = Some(handle),
                    Err(e) => error!(error = %e, "failed to spawn script thread"),
                }
            }
            PsrpEvent::PipelineInput(value) => input.push(value),
            PsrpEvent::EndOfPipelineInput => input.set_complete(true),
            PsrpEvent::PipelineHostResponse(response) => registry.store(&response),
            _ => {}
        }

        if let Err(e) = outbound.send_pending(&pool) {
            warn!(error = %e, "failed to flush pipeline data");
        }
    }

    // Unblock the script's input iterator and any pending host call so
    // a stuck script can observe the teardown.
    input.set_complete(true);
    registry.notify_all();
    drop(script_thread);
    info!(pipeline_id = %pipeline.id(), "ending pipeline worker");
}

fn spawn_script(
    event: CreatePipelineEvent,
    pipeline: &ServerPipeline,
    runspace_registry: &Arc<HostRegistry>,
    registry: &Arc<HostRegistry>,
    input: &Arc<InputBuffer>,
    outbound: &Arc<Outbound>,
    engine: &Arc<dyn ScriptEngine>,
) -> Result<JoinHandle<()>, ServerError> {
    let pipeline = pipeline.clone();
    let runspace_registry = Arc::clone(runspace_registry);
    let registry = Arc::clone(registry);
    let cursor = InputCursor::new(Arc::clone(input));
    let outbound = Arc::clone(outbound);
    let engine = Arc::clone(engine);

    let handle = std::thread::Builder::new()
        .name(format!("pipeline-{}-script", pipeline.id()))
        .spawn(move || {
            if let Err(e) = exec_script(
                &event,
                &pipeline,
                &runspace_registry,
                &registry,
                cursor,
                &outbound,
                &engine,
            ) {
                error!(pipeline_id = %pipeline.id(), error = %e, "unhandled failure in script thread");
            }
        })?;

    Ok(handle)
}

fn exec_script(
    event: &CreatePipelineEvent,
    pipeline: &ServerPipeline,
    runspace_registry: &Arc<HostRegistry>,
    registry: &Arc<HostRegistry>,
    mut cursor: InputCursor,
    outbound: &Arc<Outbound>,
    engine: &Arc<dyn ScriptEngine>,
) -> Result<(), ServerError> {
    let pool = pipeline.pool().clone();

    pipeline.start()?;
    outbound.send_pending(&pool)?;

    let command = &event.create.powershell.commands[0];
    let script = dedent(&command.command_text);
    let (args, params) = split_parameters(&command.parameters);

    let host = PsHostFacade::new(pipeline, registry, runspace_registry, outbound);
    let cmdlet = PsCmdlet::new(pipeline.clone(), Arc::clone(outbound), host);
    let invocation = Invocation {
        args,
        params,
        input: &mut cursor,
    };

    debug!(pipeline_id = %pipeline.id(), script = %script, "starting script");
    match engine.run(&script, invocation, &cmdlet) {
        Ok(()) => {
            debug!(pipeline_id = %pipeline.id(), "script ran successfully");
            pipeline.complete()?;
        }
        Err(EngineError::Parse { message, detail }) => {
            warn!(pipeline_id = %pipeline.id(), %message, "script has invalid syntax");
            pipeline.change_state(
                PsInvocationState::Failed,
                Some(
                    ErrorRecord::builder()
                        .message(message)
                        .stack_trace(detail)
                        .category(ErrorCategory::ParserError)
                        .reason(Some("InvalidScriptSyntax".to_string()))
                        .fully_qualified_error_id("InvalidScriptSyntax".to_string())
                        .build(),
                ),
            )?;
        }
        Err(EngineError::Stopped) => {
            debug!(pipeline_id = %pipeline.id(), "client requested stop during script");
            pipeline.stop()?;
        }
        Err(EngineError::Runtime { message, detail }) => {
            warn!(pipeline_id = %pipeline.id(), %message, "script raised an uncaught error");
            pipeline.write_error(
                &ErrorRecord::builder()
                    .message(message)
                    .stack_trace(detail)
                    .category(ErrorCategory::NotSpecified)
                    .reason(Some("UncaughtScriptException".to_string()))
                    .fully_qualified_error_id("UncaughtScriptException".to_string())
                    .build(),
            )?;
            pipeline.complete()?;
        }
    }

    outbound.send_pending(&pool)?;
    Ok(())
}

/// Positional arguments are every parameter value in order; named
/// parameters additionally land in the name-keyed map.
fn split_parameters(parameters: &[CommandParameter]) -> (Vec<PsValue>, HashMap<String, PsValue>) {
    let mut args = Vec::with_capacity(parameters.len());
    let mut named = HashMap::new();

    for parameter in parameters {
        args.push(parameter.value.clone());
        if let Some(name) = &parameter.name {
            named.insert(name.clone(), parameter.value.clone());
        }
    }

    (args, named)
}

/// Strip the common leading whitespace from every non-blank line, so an
/// indented script block embedded in a remoting payload parses cleanly.
fn dedent(text: &str) -> String {
    // Indentation is counted in ASCII blanks only, so byte offsets are
    // safe to slice at.
    let indent = |line: &str| line.len() - line.trim_start_matches([' ', '\t']).len();

    let prefix = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(indent)
        .min()
        .unwrap_or(0);

    let dedented: Vec<&str> = text
        .lines()
        .map(|line| &line[prefix.min(indent(line))..])
        .collect();
    dedented.join("\n").trim().to_string()
}
