//! The connection manager and its single-threaded core.
//!
//! Every input reaches the core as a message on one of two channels: the
//! command channel (public API calls, timer firings, host notifications)
//! and the engine signal channel. A dedicated thread owns the core and
//! drains both with `select!`, so state transitions never race. Timers are
//! cancelled by generation bookkeeping at receipt, and engine signals are
//! discarded when their engine id is no longer current.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::config::ClientConfig;
use crate::connection::engine::{
    ConnectTarget, EngineEvent, EngineFactory, EngineId, EngineSignal, TransportEngine,
};
use crate::connection::env::{
    BackgroundTask, BackgroundTaskScheduler, ConnectTargetProvider, ConnectivityMonitor,
};
use crate::connection::liveness::{LivenessController, LivenessTick};
use crate::connection::reconnect::ReconnectionPolicy;
use crate::connection::state::{ConnectionState, DisconnectionSource};
use crate::connection::timer;
use crate::error::{ClientError, DecodeError, EngineError, ServerError};
use crate::events::broadcast::{EventBroadcaster, EventSubscription, StateSubscription, StateUpdates};
use crate::events::decoder::{EventDecoder, JsonEventDecoder};
use crate::events::event::Event;
use crate::events::pipeline::{EventPipeline, PipelineStage};

/// Everything the connection loop consumes, funneled through one channel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Connect,
    Disconnect(DisconnectionSource),
    Liveness(LivenessTick),
    RetryTimer { generation: u64 },
    AppEnteredBackground,
    AppBecameActive,
    BackgroundGraceExpired { generation: u64 },
    ConnectivityChanged { available: bool },
    Shutdown,
}

/// Host collaborators handed to the manager at construction.
pub struct Environment {
    pub target_provider: Box<dyn ConnectTargetProvider>,
    pub engine_factory: Box<dyn EngineFactory>,
    pub decoder: Box<dyn EventDecoder>,
    pub background_scheduler: Option<Box<dyn BackgroundTaskScheduler>>,
    pub connectivity_monitor: Option<Box<dyn ConnectivityMonitor>>,
    pub stages: Vec<Box<dyn PipelineStage>>,
}

impl Environment {
    pub fn new(
        target_provider: Box<dyn ConnectTargetProvider>,
        engine_factory: Box<dyn EngineFactory>,
    ) -> Self {
        Self {
            target_provider,
            engine_factory,
            decoder: Box::new(JsonEventDecoder),
            background_scheduler: None,
            connectivity_monitor: None,
            stages: Vec::new(),
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn EventDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_background_scheduler(mut self, scheduler: Box<dyn BackgroundTaskScheduler>) -> Self {
        self.background_scheduler = Some(scheduler);
        self
    }

    pub fn with_connectivity_monitor(mut self, monitor: Box<dyn ConnectivityMonitor>) -> Self {
        self.connectivity_monitor = Some(monitor);
        self
    }

    pub fn with_stages(mut self, stages: Vec<Box<dyn PipelineStage>>) -> Self {
        self.stages = stages;
        self
    }
}

/// Public handle. Owns the loop thread; dropping it shuts the loop down.
pub struct ConnectionManager {
    commands: Sender<Command>,
    events: Arc<EventBroadcaster>,
    states: Arc<StateUpdates>,
    loop_handle: Option<JoinHandle<()>>,
    // Set when the loop thread could not be spawned: the subsystem is dead
    // and every new state observer is told so up front.
    dead_state: Option<ConnectionState>,
    // Kept alive so the monitor's callback registration outlives `new`.
    _connectivity: Option<Box<dyn ConnectivityMonitor>>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, mut env: Environment) -> Self {
        let (cmd_tx, cmd_rx) = channel::unbounded();
        let (engine_tx, engine_rx) = channel::unbounded();
        let events = Arc::new(EventBroadcaster::new(config.event_queue_capacity));
        let states = Arc::new(StateUpdates::new());

        let mut connectivity = env.connectivity_monitor.take();
        if let Some(monitor) = connectivity.as_mut() {
            let tx = cmd_tx.clone();
            monitor.start(Box::new(move |available| {
                let _ = tx.send(Command::ConnectivityChanged { available });
            }));
        }

        let core = ConnectionCore::new(
            config,
            env,
            cmd_tx.clone(),
            engine_tx,
            Arc::clone(&events),
            Arc::clone(&states),
        );

        let (loop_handle, dead_state) = match thread::Builder::new()
            .name("chatlink-connection".into())
            .spawn(move || run_connection_loop(core, cmd_rx, engine_rx))
        {
            Ok(handle) => (Some(handle), None),
            Err(err) => {
                tracing::error!(error = %err, "failed to spawn connection loop thread");
                let dead = ConnectionState::Disconnected {
                    source: DisconnectionSource::SystemInitiated,
                    error: Some(ClientError::Transport(EngineError::new(format!(
                        "connection loop thread failed to spawn: {err}"
                    )))),
                };
                (None, Some(dead))
            }
        };

        Self {
            commands: cmd_tx,
            events,
            states,
            loop_handle,
            dead_state,
            _connectivity: connectivity,
        }
    }

    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self
            .commands
            .send(Command::Disconnect(DisconnectionSource::UserInitiated));
    }

    pub fn subscribe_events(&self) -> EventSubscription {
        self.events.subscribe()
    }

    pub fn observe_state(&self) -> StateSubscription {
        self.states.subscribe_with_initial(self.dead_state.clone())
    }

    pub fn app_entered_background(&self) {
        let _ = self.commands.send(Command::AppEnteredBackground);
    }

    pub fn app_became_active(&self) {
        let _ = self.commands.send(Command::AppBecameActive);
    }

    /// For hosts without a `ConnectivityMonitor` that still learn about
    /// network changes some other way.
    pub fn connectivity_changed(&self, available: bool) {
        let _ = self.commands.send(Command::ConnectivityChanged { available });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_connection_loop(
    mut core: ConnectionCore,
    commands: Receiver<Command>,
    engine_signals: Receiver<EngineSignal>,
) {
    tracing::debug!("connection loop started");
    loop {
        crossbeam::select! {
            recv(commands) -> msg => match msg {
                Ok(Command::Shutdown) | Err(_) => {
                    core.shutdown();
                    break;
                }
                Ok(cmd) => core.handle_command(cmd),
            },
            recv(engine_signals) -> msg => {
                if let Ok(signal) = msg {
                    core.handle_engine_signal(signal);
                }
            },
        }
    }
    tracing::debug!("connection loop stopped");
}

/// The state machine proper. Single-owner, no interior locking: the loop
/// thread is the only caller.
struct ConnectionCore {
    config: ClientConfig,
    target_provider: Box<dyn ConnectTargetProvider>,
    engine_factory: Box<dyn EngineFactory>,
    decoder: Box<dyn EventDecoder>,
    background_scheduler: Option<Box<dyn BackgroundTaskScheduler>>,
    pipeline: EventPipeline,

    commands: Sender<Command>,
    engine_signals: Sender<EngineSignal>,
    events: Arc<EventBroadcaster>,
    states: Arc<StateUpdates>,

    state: ConnectionState,
    engine: Option<Box<dyn TransportEngine>>,
    engine_id: EngineId,
    next_engine_id: EngineId,
    current_target: Option<ConnectTarget>,

    liveness: LivenessController,
    reconnect: ReconnectionPolicy,
    retry_generation: u64,
    retry_pending: bool,
    // A server error frame arrives just before the close; remembered here
    // so the resulting disconnect carries it.
    pending_server_error: Option<ServerError>,

    in_background: bool,
    background_generation: u64,
    background_task: Option<BackgroundTask>,
    connectivity_available: bool,
}

impl ConnectionCore {
    fn new(
        config: ClientConfig,
        env: Environment,
        commands: Sender<Command>,
        engine_signals: Sender<EngineSignal>,
        events: Arc<EventBroadcaster>,
        states: Arc<StateUpdates>,
    ) -> Self {
        let liveness = LivenessController::new(&config.liveness, commands.clone());
        let reconnect = ReconnectionPolicy::new(config.reconnect.clone());
        Self {
            config,
            target_provider: env.target_provider,
            engine_factory: env.engine_factory,
            decoder: env.decoder,
            background_scheduler: env.background_scheduler,
            pipeline: EventPipeline::new(env.stages),
            commands,
            engine_signals,
            events,
            states,
            state: ConnectionState::Uninitialized,
            engine: None,
            engine_id: 0,
            next_engine_id: 1,
            current_target: None,
            liveness,
            reconnect,
            retry_generation: 0,
            retry_pending: false,
            pending_server_error: None,
            in_background: false,
            background_generation: 0,
            background_task: None,
            connectivity_available: true,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect(source) => self.disconnect(source),
            Command::Liveness(LivenessTick::Probe { generation }) => {
                if self.liveness.handle_probe_tick(generation) {
                    if let Some(engine) = self.engine.as_mut() {
                        engine.send_probe();
                    }
                }
            }
            Command::Liveness(LivenessTick::ReplyTimeout { generation }) => {
                if self.liveness.handle_reply_timeout(generation) {
                    tracing::warn!("no probe reply within timeout, dropping connection");
                    self.disconnect(DisconnectionSource::NoPongReceived);
                }
            }
            Command::RetryTimer { generation } => self.handle_retry_timer(generation),
            Command::AppEnteredBackground => self.app_entered_background(),
            Command::AppBecameActive => self.app_became_active(),
            Command::BackgroundGraceExpired { generation } => {
                self.background_grace_expired(generation)
            }
            Command::ConnectivityChanged { available } => self.connectivity_changed(available),
            Command::Shutdown => {}
        }
    }

    /// Start a connection attempt. Engines are single-use: there is no
    /// reuse path, every attempt asks the factory for a fresh engine, so a
    /// changed target can never race an in-flight link on stale
    /// credentials.
    fn connect(&mut self) {
        if self.state.is_active() {
            tracing::debug!(state = %self.state, "connect ignored, already in progress");
            return;
        }
        // An explicit connect supersedes any pending retry.
        self.cancel_retry();
        self.pending_server_error = None;

        let target = match self.target_provider.connect_target() {
            Ok(target) => target,
            Err(err) => {
                tracing::error!(error = %err, "cannot build connect target");
                self.set_state(ConnectionState::Disconnected {
                    source: DisconnectionSource::SystemInitiated,
                    error: Some(ClientError::Transport(EngineError::new(err.to_string()))),
                });
                return;
            }
        };

        if self.current_target.as_ref() != Some(&target) {
            tracing::info!(target = %target, "connect target changed");
        }
        self.current_target = Some(target.clone());

        // Engines are single-use; every attempt gets a fresh one, and the
        // new id makes any leftover signals from the old engine stale.
        self.engine_id = self.next_engine_id;
        self.next_engine_id += 1;
        let mut engine =
            self.engine_factory
                .create(&target, self.engine_id, self.engine_signals.clone());

        self.set_state(ConnectionState::Connecting);
        engine.open();
        self.engine = Some(engine);
    }

    fn disconnect(&mut self, source: DisconnectionSource) {
        self.cancel_retry();
        let already_closing = matches!(self.state, ConnectionState::Disconnecting { .. });
        if !self.state.is_active() && !already_closing {
            tracing::debug!(state = %self.state, %source, "disconnect ignored, not active");
            return;
        }
        // While a close is in flight a second disconnect still lands: it
        // replaces the source (a user disconnect must override a system
        // teardown so the close stays final).
        self.set_state(ConnectionState::Disconnecting {
            source: source.clone(),
        });
        if already_closing {
            return;
        }
        match self.engine.as_mut() {
            Some(engine) => engine.close(),
            // Nothing on the wire to wait for.
            None => self.finish_disconnect(source, None),
        }
    }

    fn handle_engine_signal(&mut self, signal: EngineSignal) {
        if signal.engine_id != self.engine_id {
            tracing::debug!(
                engine_id = signal.engine_id,
                current = self.engine_id,
                "discarding signal from stale engine"
            );
            return;
        }
        match signal.event {
            EngineEvent::Opened => {
                if self.state == ConnectionState::Connecting {
                    self.set_state(ConnectionState::WaitingForConnectionId);
                }
            }
            EngineEvent::Frame(payload) => self.handle_frame(&payload),
            EngineEvent::Closed(error) => self.handle_closed(error),
        }
    }

    fn handle_frame(&mut self, payload: &[u8]) {
        match self.decoder.decode(payload) {
            Ok(Event::HealthCheck { connection_id }) => {
                // The health check doubles as the liveness probe reply and
                // is consumed here rather than dispatched.
                self.liveness.reply_received();
                self.reconnect.connection_established();
                self.set_state(ConnectionState::Connected { connection_id });
            }
            Ok(event) => {
                if let Some(event) = self.pipeline.process(event) {
                    self.events.publish(event);
                }
            }
            Err(DecodeError::Server(err)) => {
                tracing::warn!(code = err.code, message = %err.message, "server error frame");
                self.pending_server_error = Some(err.clone());
                if self.state.is_active() {
                    self.disconnect(DisconnectionSource::ServerInitiated { error: Some(err) });
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable frame");
            }
        }
    }

    fn handle_closed(&mut self, engine_error: Option<EngineError>) {
        self.engine = None;
        // A close nobody asked for (the requested cases all pass through
        // `Disconnecting` first) counts as system initiated.
        let source = match &self.state {
            ConnectionState::Disconnecting { source } => source.clone(),
            _ => DisconnectionSource::SystemInitiated,
        };
        let error = match self.pending_server_error.take() {
            Some(server_err) => Some(ClientError::Server(server_err)),
            None => engine_error.map(ClientError::Transport),
        };
        self.finish_disconnect(source, error);
    }

    fn finish_disconnect(&mut self, source: DisconnectionSource, error: Option<ClientError>) {
        self.set_state(ConnectionState::Disconnected {
            source: source.clone(),
            error: error.clone(),
        });
        self.maybe_schedule_retry(&source, error.as_ref());
        // A disconnect with no retry coming is terminal; no reason to hold
        // the background grant any longer.
        if !self.retry_pending {
            self.end_background_task();
        }
    }

    fn maybe_schedule_retry(&mut self, source: &DisconnectionSource, error: Option<&ClientError>) {
        if !source.is_retryable() {
            tracing::info!(%source, "disconnect is final, not retrying");
            return;
        }
        if self.in_background && self.background_task.is_none() {
            tracing::info!("backgrounded without execution grant, deferring reconnect");
            return;
        }
        if !self.connectivity_available {
            tracing::info!("network unavailable, reconnect deferred until it returns");
            return;
        }
        match self.reconnect.next_delay(error) {
            Some(delay) => {
                self.retry_generation += 1;
                self.retry_pending = true;
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    failures = self.reconnect.consecutive_failures(),
                    "scheduling reconnect"
                );
                timer::schedule(
                    delay,
                    self.commands.clone(),
                    Command::RetryTimer {
                        generation: self.retry_generation,
                    },
                );
            }
            None => {
                tracing::warn!("error is permanent, not retrying");
            }
        }
    }

    fn handle_retry_timer(&mut self, generation: u64) {
        if !self.retry_pending || generation != self.retry_generation {
            tracing::debug!(generation, "ignoring stale retry timer");
            return;
        }
        self.retry_pending = false;
        if self.state.is_active() {
            return;
        }
        tracing::info!("retrying connection");
        self.connect();
    }

    fn cancel_retry(&mut self) {
        self.retry_generation += 1;
        self.retry_pending = false;
    }

    fn app_entered_background(&mut self) {
        if self.in_background {
            return;
        }
        self.in_background = true;
        if !self.state.is_active() {
            return;
        }
        if !self.config.stay_connected_in_background {
            self.disconnect(DisconnectionSource::SystemInitiated);
            return;
        }
        match self.background_scheduler.as_ref() {
            Some(scheduler) => {
                self.background_generation += 1;
                let generation = self.background_generation;
                let tx = self.commands.clone();
                let granted = scheduler.begin_task(Box::new(move || {
                    let _ = tx.send(Command::BackgroundGraceExpired { generation });
                }));
                match granted {
                    Some(task) => {
                        tracing::debug!(%task, "staying connected under background grant");
                        self.background_task = Some(task);
                    }
                    None => {
                        tracing::info!("background execution denied, disconnecting");
                        self.disconnect(DisconnectionSource::SystemInitiated);
                    }
                }
            }
            None => self.disconnect(DisconnectionSource::SystemInitiated),
        }
    }

    fn background_grace_expired(&mut self, generation: u64) {
        if generation != self.background_generation || !self.in_background {
            return;
        }
        tracing::info!("background grant expired, disconnecting");
        self.background_task = None;
        self.disconnect(DisconnectionSource::SystemInitiated);
    }

    fn app_became_active(&mut self) {
        if !self.in_background {
            return;
        }
        self.in_background = false;
        self.background_generation += 1;
        self.end_background_task();
        if self.connectivity_available && self.should_auto_connect() {
            tracing::info!("app active again, reconnecting");
            self.connect();
        }
    }

    fn end_background_task(&mut self) {
        if let (Some(scheduler), Some(task)) =
            (self.background_scheduler.as_ref(), self.background_task.take())
        {
            tracing::debug!(%task, "releasing background grant");
            scheduler.end_task(task);
        }
    }

    fn connectivity_changed(&mut self, available: bool) {
        if self.connectivity_available == available {
            return;
        }
        self.connectivity_available = available;
        if available {
            if !self.in_background && self.should_auto_connect() {
                tracing::info!("network back, reconnecting");
                self.connect();
            }
        } else {
            self.end_background_task();
            if self.state.is_active() {
                tracing::info!("network gone, disconnecting");
                self.disconnect(DisconnectionSource::InternetUnavailable);
            }
        }
    }

    /// Whether an interrupted connection should be resumed without an
    /// explicit `connect` from the application.
    fn should_auto_connect(&self) -> bool {
        match &self.state {
            ConnectionState::Disconnected { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state == new_state {
            return;
        }
        tracing::info!(from = %self.state, to = %new_state, "connection state changed");
        self.state = new_state;
        self.liveness.state_changed(&self.state);
        self.states.publish(self.state.clone());
    }

    fn shutdown(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.close();
        }
        self.engine = None;
        self.end_background_task();
    }

    #[cfg(test)]
    fn retry_pending(&self) -> bool {
        self.retry_pending
    }
}
