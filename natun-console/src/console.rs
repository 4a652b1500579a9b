use std::{collections::VecDeque, sync::Arc, time::Duration};

use chrono::Utc;
use natun_core::{
    ConnectIntent, ConnectRequest, ConnectResponse, ConnectTarget, ConnectionInfo,
    ConnectionPresentation, Effects, KeyValueStore, LocalDevice, PeerDevice, PeerStatus,
    ReconcileEvent, Reconciler, RecentDevice, RecentDeviceStore, ResetPasswordRequest,
    ResetPasswordResponse, ValidationError, find_recent, validate_connect_code,
    validate_connect_password, validate_password,
    api::PLACEHOLDER_IP,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    api::{AgentApi, ApiError},
    clipboard::ClipboardSink,
    feedback::{DEFAULT_FEEDBACK_DURATION, TransientFeedback},
    poller::{DEFAULT_POLL_INTERVAL, StatusPoller},
};

pub const COPY_DEFAULT_LABEL: &str = "click to copy";
pub const COPY_OK_LABEL: &str = "copied!";
pub const COPY_FAILED_LABEL: &str = "copy failed";
pub const RESET_FAILED_MESSAGE: &str = "reset failed, please retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyField {
    ClientId,
    Password,
    PeerIp,
}

/// Completion of work the console started in the background.
///
/// Request completions carry the session they were started in; a completion
/// from before the last [`Console::shutdown`] is dropped.
#[derive(Debug)]
pub enum ConsoleEvent {
    DeviceLoaded {
        session: u64,
        result: Result<Option<LocalDevice>, ApiError>,
    },
    Polled {
        epoch: u64,
        outcome: Result<Option<PeerStatus>, ApiError>,
    },
    ConnectFinished {
        session: u64,
        result: Result<ConnectResponse, ApiError>,
    },
    ResetFinished {
        session: u64,
        result: Result<ResetPasswordResponse, ApiError>,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("a connect request is already in progress")]
    ConnectBusy,
    #[error("a password reset is already in progress")]
    ResetBusy,
    #[error("no saved device with id {0}")]
    UnknownDevice(String),
    #[error("no delete is waiting for confirmation")]
    NothingToConfirm,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsoleSettings {
    pub poll_interval: Duration,
    pub feedback_duration: Duration,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            feedback_duration: DEFAULT_FEEDBACK_DURATION,
        }
    }
}

/// Operator-facing state of the console.
///
/// Every mutation happens on the caller's task: operator actions are methods,
/// and background completions come back through the receiver returned by
/// [`Console::new`] and must be fed to [`Console::handle_event`].
pub struct Console<A, S, C> {
    api: Arc<A>,
    recent_store: RecentDeviceStore<S>,
    clipboard: C,
    settings: ConsoleSettings,
    events: mpsc::UnboundedSender<ConsoleEvent>,

    poller: StatusPoller,
    poll_epoch: u64,
    session: u64,
    running: bool,

    reconciler: Reconciler,
    local_device: LocalDevice,
    device_request_pending: bool,
    recent: Vec<RecentDevice>,

    target_id: String,
    connect_password: String,
    connect_prompt_open: bool,
    connect_pending: bool,

    reset_prompt_open: bool,
    reset_pending: Option<String>,
    reset_error: Option<String>,

    pending_delete: Option<String>,
    feedback: TransientFeedback<CopyField>,
    alerts: VecDeque<String>,
}

impl<A, S, C> Console<A, S, C>
where
    A: AgentApi,
    S: KeyValueStore,
    C: ClipboardSink,
{
    pub fn new(
        api: Arc<A>,
        store: S,
        clipboard: C,
        settings: ConsoleSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ConsoleEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let console = Self {
            api,
            recent_store: RecentDeviceStore::new(store),
            clipboard,
            settings,
            events,
            poller: StatusPoller::new(),
            poll_epoch: 0,
            session: 0,
            running: false,
            reconciler: Reconciler::new(),
            local_device: LocalDevice::default(),
            device_request_pending: false,
            recent: Vec::new(),
            target_id: String::new(),
            connect_password: String::new(),
            connect_prompt_open: false,
            connect_pending: false,
            reset_prompt_open: false,
            reset_pending: None,
            reset_error: None,
            pending_delete: None,
            feedback: TransientFeedback::new(COPY_DEFAULT_LABEL),
            alerts: VecDeque::new(),
        };
        (console, receiver)
    }

    /// Loads the recent-device cache, fetches the local device and starts polling.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.recent = self.recent_store.load();
        info!(recent = self.recent.len(), "console started");
        self.fetch_local_device();
        self.start_polling();
    }

    /// Stops polling and pending feedback timers. Requests still in flight are
    /// abandoned and their busy flags cleared. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.poller.stop();
        self.poll_epoch += 1;
        self.session += 1;
        self.connect_pending = false;
        self.reset_pending = None;
        self.device_request_pending = false;
        self.feedback.cancel_all();
        self.reconciler.apply(ReconcileEvent::Disconnect);
        info!("console stopped");
    }

    pub fn handle_event(&mut self, event: ConsoleEvent) {
        if !self.running {
            debug!("dropping event received after shutdown");
            return;
        }

        match event {
            ConsoleEvent::Polled { epoch, outcome } => self.on_polled(epoch, outcome),
            ConsoleEvent::DeviceLoaded { session, .. }
            | ConsoleEvent::ConnectFinished { session, .. }
            | ConsoleEvent::ResetFinished { session, .. }
                if session != self.session =>
            {
                debug!(session, current = self.session, "dropping result from previous session");
            }
            ConsoleEvent::DeviceLoaded { result, .. } => self.on_device_loaded(result),
            ConsoleEvent::ConnectFinished { result, .. } => self.on_connect_finished(result),
            ConsoleEvent::ResetFinished { result, .. } => self.on_reset_finished(result),
        }
    }

    pub fn open_connect_prompt(&mut self, code: &str) -> Result<(), ConsoleError> {
        validate_connect_code(code)?;
        self.target_id = code.trim().to_owned();
        self.connect_password = find_recent(&self.recent, &self.target_id)
            .map(|device| device.password.clone())
            .unwrap_or_default();
        self.connect_prompt_open = true;
        Ok(())
    }

    pub fn close_connect_prompt(&mut self) {
        self.connect_prompt_open = false;
    }

    pub fn connect(&mut self, password: &str) -> Result<(), ConsoleError> {
        if self.connect_pending {
            return Err(ConsoleError::ConnectBusy);
        }
        validate_connect_code(&self.target_id)?;
        validate_connect_password(password)?;
        self.connect_password = password.to_owned();
        self.dispatch_connect();
        Ok(())
    }

    /// Reconnects to a cached device with its stored password.
    pub fn quick_connect(&mut self, id: &str) -> Result<(), ConsoleError> {
        if self.connect_pending {
            return Err(ConsoleError::ConnectBusy);
        }
        let device = find_recent(&self.recent, id)
            .ok_or_else(|| ConsoleError::UnknownDevice(id.to_owned()))?;
        validate_connect_password(&device.password)?;

        self.target_id = device.id.clone();
        self.connect_password = device.password.clone();
        self.dispatch_connect();
        Ok(())
    }

    pub fn request_delete(&mut self, id: &str) -> Result<(), ConsoleError> {
        if find_recent(&self.recent, id).is_none() {
            return Err(ConsoleError::UnknownDevice(id.to_owned()));
        }
        self.pending_delete = Some(id.to_owned());
        Ok(())
    }

    pub fn confirm_delete(&mut self) -> Result<(), ConsoleError> {
        let id = self
            .pending_delete
            .take()
            .ok_or(ConsoleError::NothingToConfirm)?;
        self.recent = self.recent_store.remove(&self.recent, &id);
        info!(device = %id, "recent device removed");
        Ok(())
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    pub fn open_reset_prompt(&mut self) {
        self.reset_prompt_open = true;
        self.reset_error = None;
    }

    pub fn close_reset_prompt(&mut self) {
        self.reset_prompt_open = false;
        self.reset_error = None;
    }

    pub fn reset_password(&mut self, new_password: &str) -> Result<(), ConsoleError> {
        if self.reset_pending.is_some() {
            return Err(ConsoleError::ResetBusy);
        }
        if let Err(err) = validate_password(new_password) {
            self.reset_error = Some(err.to_string());
            return Err(err.into());
        }

        self.reset_error = None;
        self.reset_pending = Some(new_password.to_owned());
        let request = ResetPasswordRequest {
            new_password: new_password.to_owned(),
        };
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = api.reset_password(request).await;
            let _ = events.send(ConsoleEvent::ResetFinished { session, result });
        });
        Ok(())
    }

    /// Copies a field to the clipboard. Returns false when the field is empty or
    /// still shows a placeholder.
    pub fn copy(&mut self, field: CopyField) -> bool {
        let value = match field {
            CopyField::ClientId if self.local_device.is_loaded() => &self.local_device.client_id,
            CopyField::Password => &self.local_device.password,
            CopyField::PeerIp if self.reconciler.peer().ip != PLACEHOLDER_IP => {
                &self.reconciler.peer().ip
            }
            CopyField::ClientId | CopyField::PeerIp => return false,
        };
        if value.is_empty() {
            return false;
        }
        let value = value.clone();

        let label = match self.clipboard.write_text(&value) {
            Ok(()) => COPY_OK_LABEL,
            Err(err) => {
                warn!(?field, "clipboard write failed: {err}");
                COPY_FAILED_LABEL
            }
        };
        self.feedback
            .show(field, label, self.settings.feedback_duration);
        true
    }

    /// Drains alerts raised since the last call.
    pub fn take_alerts(&mut self) -> Vec<String> {
        self.alerts.drain(..).collect()
    }

    pub fn presentation(&self) -> &ConnectionPresentation {
        self.reconciler.presentation()
    }

    pub fn intent(&self) -> &ConnectIntent {
        self.reconciler.intent()
    }

    pub fn peer(&self) -> &PeerDevice {
        self.reconciler.peer()
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        self.reconciler.connection_info()
    }

    pub fn local_device(&self) -> &LocalDevice {
        &self.local_device
    }

    pub fn recent_devices(&self) -> &[RecentDevice] {
        &self.recent
    }

    pub fn copy_label(&self, field: CopyField) -> String {
        self.feedback.label(&field)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Password shown in the connect prompt (prefilled from the recent cache).
    pub fn connect_password(&self) -> &str {
        &self.connect_password
    }

    pub fn is_connect_prompt_open(&self) -> bool {
        self.connect_prompt_open
    }

    pub fn is_connect_pending(&self) -> bool {
        self.connect_pending
    }

    pub fn is_reset_prompt_open(&self) -> bool {
        self.reset_prompt_open
    }

    pub fn is_reset_pending(&self) -> bool {
        self.reset_pending.is_some()
    }

    pub fn reset_error(&self) -> Option<&str> {
        self.reset_error.as_deref()
    }

    pub fn pending_delete(&self) -> Option<&str> {
        self.pending_delete.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn fetch_local_device(&mut self) {
        if self.device_request_pending {
            return;
        }
        self.device_request_pending = true;
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = api.device().await;
            let _ = events.send(ConsoleEvent::DeviceLoaded { session, result });
        });
    }

    /// Each (re)start gets a new epoch; results from older loops are ignored.
    fn start_polling(&mut self) {
        self.poll_epoch += 1;
        let epoch = self.poll_epoch;
        let api = Arc::clone(&self.api);
        let on_result = self.events.clone();
        let on_error = self.events.clone();

        self.poller.start(
            self.settings.poll_interval,
            move || {
                let api = Arc::clone(&api);
                async move { api.peer_status().await }
            },
            move |status| {
                let _ = on_result.send(ConsoleEvent::Polled {
                    epoch,
                    outcome: Ok(status),
                });
            },
            move |err| {
                let _ = on_error.send(ConsoleEvent::Polled {
                    epoch,
                    outcome: Err(err),
                });
            },
        );
    }

    fn dispatch_connect(&mut self) {
        let target = ConnectTarget::new(self.target_id.clone(), self.connect_password.clone());
        let request = ConnectRequest {
            target_id: target.id.clone(),
            target_pwd: target.password.clone(),
        };
        info!(target = %target.id, "connect requested");

        self.connect_prompt_open = false;
        self.connect_pending = true;
        let effects = self.reconciler.apply(ReconcileEvent::ConnectRequested(target));
        self.apply_effects(effects);

        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        let session = self.session;
        tokio::spawn(async move {
            let result = api.connect(request).await;
            let _ = events.send(ConsoleEvent::ConnectFinished { session, result });
        });
    }

    fn on_device_loaded(&mut self, result: Result<Option<LocalDevice>, ApiError>) {
        self.device_request_pending = false;
        match result {
            Ok(Some(device)) => {
                debug!(client_id = %device.client_id, "local device loaded");
                self.local_device = device;
            }
            Ok(None) => debug!("agent has no local device yet"),
            Err(err) => warn!("failed to load local device: {err}"),
        }
    }

    fn on_polled(&mut self, epoch: u64, outcome: Result<Option<PeerStatus>, ApiError>) {
        if epoch != self.poll_epoch {
            debug!(epoch, current = self.poll_epoch, "dropping stale poll result");
            return;
        }
        // The connect response decides the next state; polls resume after it.
        if self.connect_pending {
            debug!("ignoring poll result while a connect request is in flight");
            return;
        }

        match outcome {
            Ok(Some(status)) => {
                let effects = self.reconciler.apply(ReconcileEvent::Polled(status));
                self.apply_effects(effects);
                if !self.local_device.is_loaded() {
                    self.fetch_local_device();
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!("status poll failed: {err}");
                let effects = self.reconciler.apply(ReconcileEvent::PollUnreachable);
                self.apply_effects(effects);
                self.local_device = LocalDevice::default();
            }
        }
    }

    fn on_connect_finished(&mut self, result: Result<ConnectResponse, ApiError>) {
        self.connect_pending = false;
        let effects = match result {
            Ok(response) if response.is_accepted() => {
                info!(target = %self.target_id, "connect accepted by agent");
                // Fresh status right away instead of waiting for the next tick.
                self.start_polling();
                Effects::default()
            }
            Ok(response) => {
                info!(code = response.code, "connect rejected by agent");
                self.reconciler.apply(ReconcileEvent::ConnectRejected {
                    message: response.message,
                })
            }
            Err(err) => {
                warn!("connect request failed: {err}");
                self.reconciler.apply(ReconcileEvent::ConnectUnreachable)
            }
        };
        self.apply_effects(effects);
    }

    fn on_reset_finished(&mut self, result: Result<ResetPasswordResponse, ApiError>) {
        let submitted = self.reset_pending.take().unwrap_or_default();
        match result {
            Ok(response) if response.code == 0 => {
                info!("device password changed");
                self.local_device.password = response.password.unwrap_or(submitted);
                self.reset_prompt_open = false;
                self.reset_error = None;
            }
            Ok(response) => {
                let message = response
                    .message
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| RESET_FAILED_MESSAGE.to_owned());
                info!(code = response.code, "password reset rejected: {message}");
                self.reset_error = Some(message);
            }
            Err(err) => {
                warn!("password reset request failed: {err}");
                self.reset_error = Some(RESET_FAILED_MESSAGE.to_owned());
            }
        }
    }

    fn apply_effects(&mut self, effects: Effects) {
        if let Some(alert) = effects.alert {
            self.alerts.push_back(alert);
        }
        if let Some(target) = effects.record {
            info!(device = %target.id, "recording recent device");
            let device = RecentDevice::new(target, Utc::now());
            self.recent = self.recent_store.add(&self.recent, device);
        }
    }
}

impl<A, S, C> Drop for Console<A, S, C> {
    fn drop(&mut self) {
        self.poller.stop();
        self.feedback.cancel_all();
    }
}
