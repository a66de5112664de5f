//! Per-connection run/input/terminate state machine.
//!
//! A session owns at most one workspace and one live process. Every path
//! that ends a run (natural exit, `terminate`, a new `run`, a failed start,
//! connection loss) goes through [`Session::cancel_active`] or the exit
//! branch of [`Session::apply`], and both remove the workspace.
//!
//! Process output arrives asynchronously. Drive a session with
//! [`Session::recv`] inside `select!` (it is cancel safe) and hand what it
//! returns to [`Session::apply`] outside the `select!`.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    error::Error,
    process::{
        event_channel, EventReceiver, EventSender, ProcessEvent, ProcessHandle, SupervisorEvent,
    },
    resolver::{Introspector, Javap},
    service::ServiceInner,
    types::{ClientMessage, Language, RunRequest, ServerEvent},
    workspace::Workspace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// Last run was ended by an explicit `terminate`; otherwise behaves like `Idle`
    Terminated,
}

pub struct Session<I = Javap> {
    id: Uuid,
    service: Arc<ServiceInner<I>>,
    state: SessionState,
    language: Option<Language>,
    workspace: Option<Workspace>,
    process: Option<ProcessHandle>,
    /// Id of the current run; events tagged with anything else are stale
    run_id: u64,
    events_tx: EventSender,
    events_rx: EventReceiver,
}

impl<I: Introspector + 'static> Session<I> {
    pub(crate) fn new(service: Arc<ServiceInner<I>>) -> Self {
        let (events_tx, events_rx) = event_channel();
        Self {
            id: Uuid::new_v4(),
            service,
            state: SessionState::Idle,
            language: None,
            workspace: None,
            process: None,
            run_id: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn language(&self) -> Option<Language> {
        self.language
    }

    pub fn workspace_dir(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|w| w.path())
    }

    /// Pid of the live process, if any
    pub fn pid(&self) -> Option<u32> {
        self.process
            .as_ref()
            .filter(|p| p.is_alive())
            .and_then(|p| p.pid())
    }

    /// Decode and handle one raw client frame.
    ///
    /// Malformed frames produce an error event and leave the session untouched.
    pub async fn handle_text(&mut self, raw: &str) -> Option<ServerEvent> {
        match serde_json::from_str::<ClientMessage>(raw) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                debug!("Rejected malformed message: {}", e);
                Some(ServerEvent::error(&Error::Protocol(e.to_string())))
            }
        }
    }

    /// Handle one client message, returning the event to send back, if any.
    pub async fn handle(&mut self, message: ClientMessage) -> Option<ServerEvent> {
        match message {
            ClientMessage::Run(request) => match self.run(request).await {
                Ok(()) => None,
                Err(e) => Some(ServerEvent::error(&e)),
            },
            ClientMessage::Input { data } => {
                self.input(&data);
                None
            }
            ClientMessage::Terminate => Some(self.terminate().await),
        }
    }

    /// Cancel whatever is running, then materialize, build and start `request`.
    ///
    /// On error nothing from this run is left behind and the session is `Idle`.
    pub async fn run(&mut self, request: RunRequest) -> Result<(), Error> {
        let language: Language = request.language.parse()?;

        self.cancel_active().await;
        self.run_id += 1;
        self.language = Some(language);
        self.state = SessionState::Idle;

        match self.start(language, &request).await {
            Ok(()) => {
                self.state = SessionState::Running;
                info!(
                    session = %self.id,
                    run = self.run_id,
                    "Started {} program",
                    language
                );
                Ok(())
            }
            Err(e) => {
                error!(session = %self.id, run = self.run_id, "Run failed: {}", e);
                self.cancel_active().await;
                Err(e)
            }
        }
    }

    async fn start(&mut self, language: Language, request: &RunRequest) -> Result<(), Error> {
        if let Some(limit) = self.service.config.max_payload_bytes {
            let size = request.payload_bytes();
            if size > limit {
                return Err(Error::Workspace(format!(
                    "Submitted files total {} bytes, limit is {}",
                    size, limit
                )));
            }
        }

        let entry = request
            .entry_name()
            .ok_or_else(|| Error::Workspace("No source files submitted".to_string()))?
            .to_string();
        let files: Vec<String> = request.files.iter().map(|f| f.name.clone()).collect();

        let workspace = Workspace::create(&self.service.config, &request.files).await?;
        let dir = workspace.path().to_path_buf();
        self.workspace = Some(workspace);

        let plan = self
            .service
            .dispatcher
            .prepare(language, &dir, &files, &entry)
            .await?;

        let handle = self
            .service
            .supervisor
            .spawn(self.run_id, &plan.run, self.events_tx.clone())?;
        self.process = Some(handle);
        Ok(())
    }

    /// Forward a line to the running program; ignored unless `Running`.
    pub fn input(&mut self, line: &str) {
        if self.state != SessionState::Running {
            return;
        }
        if let Some(process) = self.process.as_mut() {
            process.write(line);
        }
    }

    /// Kill any active run and report the explicit-termination marker.
    pub async fn terminate(&mut self) -> ServerEvent {
        self.cancel_active().await;
        self.state = SessionState::Terminated;
        info!(session = %self.id, run = self.run_id, "Terminated by client");
        ServerEvent::terminated()
    }

    /// Connection is gone: same teardown as `terminate`, nothing to report.
    pub async fn close(mut self) {
        self.cancel_active().await;
        debug!(session = %self.id, "Session closed");
    }

    /// Kill the process and remove the workspace. Idempotent.
    async fn cancel_active(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill().await;
        }
        if let Some(mut workspace) = self.workspace.take() {
            workspace.cleanup().await;
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Idle;
        }
    }

    /// Wait for the next supervisor event. Cancel safe.
    pub async fn recv(&mut self) -> SupervisorEvent {
        match self.events_rx.recv().await {
            Some(event) => event,
            // the session holds a sender, so the channel never closes
            None => std::future::pending().await,
        }
    }

    /// Turn a supervisor event into the event for the client. Events of
    /// preempted runs are dropped; an exit also cleans up the workspace.
    pub async fn apply(&mut self, event: SupervisorEvent) -> Option<ServerEvent> {
        if event.run_id != self.run_id || self.process.is_none() {
            return None;
        }

        match event.event {
            ProcessEvent::Stdout(data) => Some(ServerEvent::Stdout { data }),
            ProcessEvent::Stderr(data) => Some(ServerEvent::Stderr { data }),
            ProcessEvent::Exit(status) => {
                info!(
                    session = %self.id,
                    run = self.run_id,
                    "Program exited with {:?}",
                    status
                );
                self.process = None;
                self.state = SessionState::Idle;
                if let Some(mut workspace) = self.workspace.take() {
                    workspace.cleanup().await;
                }
                Some(ServerEvent::Exit {
                    code: status.into(),
                })
            }
        }
    }

    /// `recv` followed by `apply` until something is worth sending.
    /// Not cancel safe; use the two halves inside `select!`.
    pub async fn next_event(&mut self) -> ServerEvent {
        loop {
            let event = self.recv().await;
            if let Some(event) = self.apply(event).await {
                return event;
            }
        }
    }
}
