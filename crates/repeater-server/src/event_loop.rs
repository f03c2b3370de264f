//! The cooperative event loop.
//!
//! One task owns the [`Repeater`]. Console lines, radio events, timer
//! expiries and web requests all reach it through a single bounded queue,
//! so no two units of work ever overlap.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use repeater_core::config::USER_GPIO_IN;
use repeater_core::supervisor::{InterruptGate, DEBOUNCE, FIRST_TICK};
use repeater_core::{Flash, Origin, Platform, PowerRequest, Repeater, Reply, SessionId, Signal};
use repeater_protocol::{
    classify, config_page, escape_token, unlock_page, PageValues, TelemetryValues, WebRequest,
};

/// Capacity of the work queue. Signals beyond it are dropped.
pub const QUEUE_DEPTH: usize = 8;

/// Grace period for a web page to reach the browser before a restart.
const WEB_RESTART_DELAY: Duration = Duration::from_secs(2);

pub(crate) enum Job {
    Signal(Signal),
    /// The GPIO debounce one-shot expired.
    Debounced,
    Attach {
        peer: IpAddr,
        out: mpsc::UnboundedSender<Reply>,
        accepted: oneshot::Sender<Option<SessionId>>,
    },
    Detach(SessionId),
    Web {
        peer: IpAddr,
        request: WebRequest,
        respond: oneshot::Sender<WebOutcome>,
    },
}

/// Result of a web page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebOutcome {
    /// The peer's side of the network has no config access.
    Denied,
    Page(String),
}

/// The loop stopped on a restart or sleep request.
pub struct Halted<P, F> {
    pub request: PowerRequest,
    pub repeater: Repeater<P, F>,
}

/// Cloneable entry point into the event loop.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Job>,
    gate: Arc<InterruptGate>,
}

impl EngineHandle {
    /// Queue a signal without waiting. False when it was dropped.
    pub fn post(&self, signal: Signal) -> bool {
        match self.tx.try_send(Job::Signal(signal)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(Job::Signal(signal))) => {
                warn!("Dropping spurious signal {signal:?}: queue full");
                false
            }
            Err(_) => {
                debug!("Engine stopped, signal discarded");
                false
            }
        }
    }

    /// Register a console session. `None` when the peer has no access or
    /// the queue is full.
    pub async fn attach(
        &self,
        peer: IpAddr,
        out: mpsc::UnboundedSender<Reply>,
    ) -> Option<SessionId> {
        let (accepted, rx) = oneshot::channel();
        self.offer(
            Job::Attach {
                peer,
                out,
                accepted,
            },
            "session attach",
        )?;
        rx.await.ok().flatten()
    }

    /// Forget a session. When the queue is full the session is instead
    /// dropped on its next reply, once its receiver is gone.
    pub fn detach(&self, id: SessionId) {
        let _ = self.offer(Job::Detach(id), "session detach");
    }

    /// Run a web request and get the page to serve. `None` when the queue is
    /// full or the engine has stopped.
    pub async fn web(&self, peer: IpAddr, request: WebRequest) -> Option<WebOutcome> {
        let (respond, rx) = oneshot::channel();
        self.offer(
            Job::Web {
                peer,
                request,
                respond,
            },
            "web request",
        )?;
        rx.await.ok()
    }

    fn offer(&self, job: Job, what: &str) -> Option<()> {
        match self.tx.try_send(job) {
            Ok(()) => Some(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Dropping spurious {what}: queue full");
                None
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Engine stopped, {what} discarded");
                None
            }
        }
    }

    /// Interrupt path of the GPIO input.
    ///
    /// Disarms the gate and schedules the debounce one-shot. Edges while
    /// disarmed are ignored.
    pub fn gpio_edge(&self) {
        if !self.gate.fire() {
            return;
        }
        let tx = self.tx.clone();
        let gate = self.gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            if tx.try_send(Job::Debounced).is_err() {
                warn!("Dropping spurious signal: debounce expiry");
                gate.rearm();
            }
        });
    }
}

pub struct EventLoop<P, F> {
    repeater: Repeater<P, F>,
    tx: mpsc::Sender<Job>,
    rx: mpsc::Receiver<Job>,
    gate: Arc<InterruptGate>,
    sessions: HashMap<SessionId, mpsc::UnboundedSender<Reply>>,
    next_session: u32,
    serial: Option<mpsc::UnboundedSender<Reply>>,
}

impl<P: Platform, F: Flash> EventLoop<P, F> {
    pub fn new(repeater: Repeater<P, F>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let gate = repeater.state.gpio_gate.clone();
        Self {
            repeater,
            tx,
            rx,
            gate,
            sessions: HashMap::new(),
            next_session: 0,
            serial: None,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.tx.clone(),
            gate: self.gate.clone(),
        }
    }

    /// Route serial console output to the returned receiver. Without it,
    /// serial output is logged.
    pub fn serial_output(&mut self) -> mpsc::UnboundedReceiver<Reply> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.serial = Some(tx);
        rx
    }

    pub fn repeater(&self) -> &Repeater<P, F> {
        &self.repeater
    }

    pub fn repeater_mut(&mut self) -> &mut Repeater<P, F> {
        &mut self.repeater
    }

    /// Process work until a restart or sleep is requested.
    pub async fn run(mut self) -> Halted<P, F> {
        info!("Event loop started");
        let tick = tokio::time::sleep(FIRST_TICK);
        tokio::pin!(tick);

        loop {
            let mut served_web = false;
            tokio::select! {
                () = &mut tick => {
                    let next = self.repeater.tick();
                    tick.as_mut().reset(Instant::now() + next);
                }
                job = self.rx.recv() => {
                    let Some(job) = job else {
                        warn!("Work queue closed");
                        break;
                    };
                    served_web = matches!(job, Job::Web { .. });
                    self.handle_job(job);
                }
            }
            self.flush_outbox();

            if let Some(request) = self.repeater.state.take_power_request() {
                info!("Halting: {request:?}");
                if served_web {
                    tokio::time::sleep(WEB_RESTART_DELAY).await;
                }
                return Halted {
                    request,
                    repeater: self.repeater,
                };
            }
        }

        Halted {
            request: PowerRequest::Restart,
            repeater: self.repeater,
        }
    }

    fn handle_job(&mut self, job: Job) {
        match job {
            Job::Signal(signal) => {
                for reply in self.repeater.dispatch(signal) {
                    self.route(reply);
                }
            }
            Job::Debounced => {
                let level = self.repeater.platform.gpio_read(USER_GPIO_IN);
                for reply in self.repeater.dispatch(Signal::GpioDebounced { level }) {
                    self.route(reply);
                }
            }
            Job::Attach {
                peer,
                out,
                accepted,
            } => {
                let _ = accepted.send(self.attach(peer, out));
            }
            Job::Detach(id) => {
                if self.sessions.remove(&id).is_some() {
                    debug!("Session {} closed", id.0);
                }
            }
            Job::Web {
                peer,
                request,
                respond,
            } => {
                let outcome = self.handle_web(peer, &request);
                if respond.send(outcome).is_err() {
                    debug!("Web client went away before the page was ready");
                }
            }
        }
    }

    fn attach(&mut self, peer: IpAddr, out: mpsc::UnboundedSender<Reply>) -> Option<SessionId> {
        let cfg = self.repeater.config();
        if !classify(peer, cfg.network_addr).allowed(cfg.config_access) {
            info!("Client {peer} disconnected - no config access on this network");
            return None;
        }
        self.next_session = self.next_session.wrapping_add(1);
        let id = SessionId(self.next_session);
        self.sessions.insert(id, out);
        info!("Console session {} from {peer}", id.0);
        Some(id)
    }

    fn route(&mut self, reply: Reply) {
        match reply.to {
            Origin::Serial => match &self.serial {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => info!("{}", reply.response.text()),
            },
            Origin::Remote(id) => {
                let gone = match self.sessions.get(&id) {
                    Some(tx) => tx.send(reply).is_err(),
                    None => true,
                };
                if gone {
                    debug!("Reply for closed session {} discarded", id.0);
                    self.sessions.remove(&id);
                }
            }
            Origin::Web | Origin::Hardware => debug!("{}", reply.response.text()),
        }
    }

    /// Repost follow-up signals raised while handling the last unit of work.
    fn flush_outbox(&mut self) {
        let outbox = self.repeater.state.drain_outbox();
        if outbox.is_empty() {
            return;
        }
        let handle = self.handle();
        for signal in outbox {
            handle.post(signal);
        }
    }

    fn handle_web(&mut self, peer: IpAddr, request: &WebRequest) -> WebOutcome {
        let cfg = self.repeater.config();
        if !classify(peer, cfg.network_addr).allowed(cfg.config_access) {
            info!("Web client {peer} refused - no config access on this network");
            return WebOutcome::Denied;
        }

        let mut changed = false;
        let mut restart = request.reset;
        for line in &request.commands {
            let command = line.split(' ').take(2).collect::<Vec<_>>().join(" ");
            match self.repeater.try_execute(Origin::Web, line.as_bytes()) {
                Ok(reply) => {
                    debug!("Web {command}: {}", reply.response.text());
                    changed = true;
                    // New settings take effect on the next boot.
                    restart |= line.starts_with("set ");
                }
                Err(e) => warn!("Web {command} failed: {e}"),
            }
        }
        if changed {
            if let Err(e) = self.repeater.persist() {
                error!("Saving web changes failed: {e}");
            }
        }

        if request.lock && !self.repeater.is_locked() {
            let cfg = self.repeater.config();
            let line = if cfg.lock_password.is_empty() {
                format!("lock {}", escape_token(&cfg.password.to_string_lossy()))
            } else {
                "lock".to_string()
            };
            if let Err(e) = self.repeater.try_execute(Origin::Web, line.as_bytes()) {
                warn!("Web lock failed: {e}");
            }
        }
        if request.reconnect && !self.repeater.reconnect_telemetry() {
            debug!("Telemetry reconnect requested but telemetry is off");
        }
        if restart {
            if let Err(e) = self.repeater.try_execute(Origin::Web, b"reset") {
                warn!("Web restart refused: {e}");
            }
        }

        WebOutcome::Page(self.page())
    }

    fn page(&self) -> String {
        let cfg = self.repeater.config();
        if cfg.locked {
            return unlock_page();
        }
        let telemetry = self.repeater.capabilities().telemetry.then(|| TelemetryValues {
            connected: self.repeater.platform.telemetry_connected(),
            host: cfg.mqtt_host.to_string_lossy().into_owned(),
            port: cfg.mqtt_port,
        });
        config_page(&PageValues {
            ssid: cfg.ssid.to_string_lossy().into_owned(),
            password: cfg.password.to_string_lossy().into_owned(),
            ap_ssid: cfg.ap_ssid.to_string_lossy().into_owned(),
            ap_password: cfg.ap_password.to_string_lossy().into_owned(),
            ap_open: cfg.ap_open,
            network: cfg.network_addr,
            telemetry,
        })
    }
}
