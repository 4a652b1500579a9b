//! Connection-state reconciliation.
//!
//! The presentation shown to the operator is a pure function of three inputs:
//! the local connect intent, the polled peer record and the agent's connection
//! info. [`evaluate`] applies the rules in priority order (first match wins):
//!
//! 1. `connectFailed`      -> Failed (clears intent)
//! 2. `peer.alive`         -> Connected (clears intent, records the target
//!    when the live peer is the one the intent asked for)
//! 3. `isConnecting` or intent active -> Connecting (intent unchanged)
//! 4. otherwise            -> Disconnected (clears intent)
//!
//! [`Reconciler`] owns the inputs, folds [`ReconcileEvent`]s into them and
//! replaces the snapshot wholesale after every event.

use crate::{
    MSG_CONNECT_FAILED, MSG_CONNECTING, MSG_REQUEST_FAILED,
    api::{ConnectionInfo, PeerDevice, PeerStatus, STATUS_NOT_CONNECTED},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub id: String,
    pub password: String,
}

impl ConnectTarget {
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
        }
    }
}

/// The attempt the operator asked for and the agent has not yet resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectIntent {
    pending: Option<ConnectTarget>,
}

impl ConnectIntent {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn connecting(target: ConnectTarget) -> Self {
        Self {
            pending: Some(target),
        }
    }

    pub fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    pub fn target(&self) -> Option<&ConnectTarget> {
        self.pending.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Failed,
    Connected,
    Connecting,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPresentation {
    pub online: bool,
    pub message: String,
    pub phase: ConnectionPhase,
}

impl ConnectionPresentation {
    fn new(phase: ConnectionPhase, message: &str) -> Self {
        Self {
            online: phase == ConnectionPhase::Connected,
            message: message.to_owned(),
            phase,
        }
    }
}

impl Default for ConnectionPresentation {
    fn default() -> Self {
        Self::new(ConnectionPhase::Disconnected, STATUS_NOT_CONNECTED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub presentation: ConnectionPresentation,
    pub intent: ConnectIntent,
    /// Set only when the intended peer came alive while its intent was pending.
    pub connected_target: Option<ConnectTarget>,
}

pub fn evaluate(intent: &ConnectIntent, peer: &PeerDevice, info: &ConnectionInfo) -> Evaluation {
    if info.connect_failed {
        let message = non_empty(&info.connect_message).unwrap_or(MSG_CONNECT_FAILED);
        return Evaluation {
            presentation: ConnectionPresentation::new(ConnectionPhase::Failed, message),
            intent: ConnectIntent::idle(),
            connected_target: None,
        };
    }

    if peer.alive {
        return Evaluation {
            presentation: ConnectionPresentation::new(
                ConnectionPhase::Connected,
                &info.status_text,
            ),
            intent: ConnectIntent::idle(),
            // A still-live previous session must not be saved under the new target.
            connected_target: intent
                .target()
                .filter(|target| target.id == peer.client_id)
                .cloned(),
        };
    }

    if info.is_connecting || intent.is_active() {
        let message = non_empty(&info.connect_message)
            .or_else(|| non_empty(&info.status_text))
            .unwrap_or(MSG_CONNECTING);
        return Evaluation {
            presentation: ConnectionPresentation::new(ConnectionPhase::Connecting, message),
            intent: intent.clone(),
            connected_target: None,
        };
    }

    Evaluation {
        presentation: ConnectionPresentation::default(),
        intent: ConnectIntent::idle(),
        connected_target: None,
    }
}

fn non_empty(text: &str) -> Option<&str> {
    if text.is_empty() { None } else { Some(text) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// A poll cycle returned fresh status.
    Polled(PeerStatus),
    /// The poll request itself failed (transport or decode).
    PollUnreachable,
    ConnectRequested(ConnectTarget),
    /// The agent answered the connect request with a nonzero code.
    ConnectRejected { message: Option<String> },
    /// The connect request never got an answer.
    ConnectUnreachable,
    Disconnect,
}

/// Side effects the caller must carry out after a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects {
    /// One-shot message for the operator.
    pub alert: Option<String>,
    /// Peer to store in the recent-device cache.
    pub record: Option<ConnectTarget>,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    intent: ConnectIntent,
    peer: PeerDevice,
    info: ConnectionInfo,
    presentation: ConnectionPresentation,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intent(&self) -> &ConnectIntent {
        &self.intent
    }

    pub fn peer(&self) -> &PeerDevice {
        &self.peer
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn presentation(&self) -> &ConnectionPresentation {
        &self.presentation
    }

    pub fn apply(&mut self, event: ReconcileEvent) -> Effects {
        let mut extra_alert = None;
        match event {
            ReconcileEvent::Polled(status) => {
                self.peer = status.device;
                self.info = status.status;
            }
            ReconcileEvent::PollUnreachable => self.reset_status(),
            ReconcileEvent::ConnectRequested(target) => {
                // Cached status belongs to the previous session.
                self.peer = PeerDevice::default();
                self.info = ConnectionInfo::pending();
                self.intent = ConnectIntent::connecting(target);
            }
            ReconcileEvent::ConnectRejected { message } => {
                self.info = ConnectionInfo::rejected(message.as_deref().unwrap_or_default());
            }
            ReconcileEvent::ConnectUnreachable => {
                self.reset_status();
                extra_alert = Some(MSG_REQUEST_FAILED.to_owned());
            }
            ReconcileEvent::Disconnect => self.intent = ConnectIntent::idle(),
        }

        let mut effects = self.reconcile();
        if effects.alert.is_none() {
            effects.alert = extra_alert;
        }
        effects
    }

    fn reset_status(&mut self) {
        self.peer = PeerDevice::default();
        self.info = ConnectionInfo::default();
        self.intent = ConnectIntent::idle();
    }

    fn reconcile(&mut self) -> Effects {
        let previous = self.presentation.phase;
        let evaluation = evaluate(&self.intent, &self.peer, &self.info);

        let entered_failed = evaluation.presentation.phase == ConnectionPhase::Failed
            && previous != ConnectionPhase::Failed;
        let alert = non_empty(&self.info.connect_message)
            .filter(|_| entered_failed)
            .map(str::to_owned);

        self.intent = evaluation.intent;
        self.presentation = evaluation.presentation;
        Effects {
            alert,
            record: evaluation.connected_target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Latency;

    fn target() -> ConnectTarget {
        ConnectTarget::new("AB12CD34", "123456")
    }

    fn status(alive: bool, info: ConnectionInfo) -> PeerStatus {
        PeerStatus {
            device: PeerDevice {
                client_id: "AB12CD34".to_owned(),
                ip: "10.8.0.2".to_owned(),
                alive,
                latency: Latency::Millis(12),
            },
            status: info,
        }
    }

    fn failed(message: &str) -> ConnectionInfo {
        ConnectionInfo {
            connect_failed: true,
            connect_message: message.to_owned(),
            status_text: "connect failed".to_owned(),
            ..ConnectionInfo::default()
        }
    }

    fn direct() -> ConnectionInfo {
        ConnectionInfo {
            mode: "direct".to_owned(),
            mode_code: 0,
            is_connected: true,
            status_text: "P2P direct".to_owned(),
            ..ConnectionInfo::default()
        }
    }

    fn connecting(message: &str, status_text: &str) -> ConnectionInfo {
        ConnectionInfo {
            is_connecting: true,
            connect_message: message.to_owned(),
            status_text: status_text.to_owned(),
            ..ConnectionInfo::default()
        }
    }

    #[test]
    fn connect_failed_is_offline_and_clears_intent() {
        for intent in [ConnectIntent::idle(), ConnectIntent::connecting(target())] {
            let eval = evaluate(&intent, &PeerDevice::default(), &failed("wrong password"));
            assert!(!eval.presentation.online);
            assert_eq!(eval.presentation.message, "wrong password");
            assert!(!eval.intent.is_active());
        }
    }

    #[test]
    fn failure_without_message_uses_generic_text() {
        let eval = evaluate(&ConnectIntent::idle(), &PeerDevice::default(), &failed(""));
        assert_eq!(eval.presentation.message, MSG_CONNECT_FAILED);
    }

    #[test]
    fn failed_takes_priority_over_alive_peer() {
        let polled = status(true, failed("peer rejected"));
        let eval = evaluate(&ConnectIntent::connecting(target()), &polled.device, &polled.status);
        assert_eq!(eval.presentation.phase, ConnectionPhase::Failed);
        assert!(!eval.presentation.online);
        assert!(eval.connected_target.is_none());
    }

    #[test]
    fn alive_peer_is_online_even_if_agent_says_not_connected() {
        let info = ConnectionInfo {
            is_connected: false,
            status_text: "server relay".to_owned(),
            ..ConnectionInfo::default()
        };
        let polled = status(true, info);
        let eval = evaluate(&ConnectIntent::idle(), &polled.device, &polled.status);
        assert!(eval.presentation.online);
        assert_eq!(eval.presentation.message, "server relay");
    }

    #[test]
    fn alive_peer_is_recorded_only_with_pending_intent() {
        let polled = status(true, direct());

        let with_intent =
            evaluate(&ConnectIntent::connecting(target()), &polled.device, &polled.status);
        assert_eq!(with_intent.connected_target, Some(target()));
        assert!(!with_intent.intent.is_active());

        let restored = evaluate(&ConnectIntent::idle(), &polled.device, &polled.status);
        assert!(restored.presentation.online);
        assert_eq!(restored.connected_target, None);
    }

    #[test]
    fn live_previous_peer_is_not_recorded_for_new_target() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(ReconcileEvent::ConnectRequested(ConnectTarget::new(
            "BBBB0002", "111111",
        )));

        let mut previous = status(true, direct());
        previous.device.client_id = "AAAA0001".to_owned();
        let effects = reconciler.apply(ReconcileEvent::Polled(previous));

        assert_eq!(effects.record, None);
        assert!(reconciler.presentation().online);
        assert_eq!(reconciler.peer().client_id, "AAAA0001");
        assert!(!reconciler.intent().is_active());
    }

    #[test]
    fn connecting_message_falls_back_in_order() {
        let peer = PeerDevice::default();
        let intent = ConnectIntent::idle();

        let eval = evaluate(&intent, &peer, &connecting("punching hole", "connecting..."));
        assert_eq!(eval.presentation.message, "punching hole");

        let eval = evaluate(&intent, &peer, &connecting("", "waiting for peer"));
        assert_eq!(eval.presentation.message, "waiting for peer");

        let eval = evaluate(&intent, &peer, &connecting("", ""));
        assert_eq!(eval.presentation.message, MSG_CONNECTING);
        assert_eq!(eval.presentation.phase, ConnectionPhase::Connecting);
    }

    #[test]
    fn backend_connecting_flag_does_not_create_intent() {
        let eval = evaluate(&ConnectIntent::idle(), &PeerDevice::default(), &connecting("", ""));
        assert_eq!(eval.presentation.phase, ConnectionPhase::Connecting);
        assert!(!eval.intent.is_active());
    }

    #[test]
    fn local_intent_alone_shows_connecting() {
        let info = ConnectionInfo {
            status_text: String::new(),
            ..ConnectionInfo::default()
        };
        let eval = evaluate(&ConnectIntent::connecting(target()), &PeerDevice::default(), &info);
        assert_eq!(eval.presentation.phase, ConnectionPhase::Connecting);
        assert_eq!(eval.presentation.message, MSG_CONNECTING);
        assert_eq!(eval.intent.target(), Some(&target()));
    }

    #[test]
    fn idle_status_is_disconnected() {
        let eval = evaluate(&ConnectIntent::idle(), &PeerDevice::default(), &ConnectionInfo::default());
        assert_eq!(eval.presentation, ConnectionPresentation::default());
        assert_eq!(eval.presentation.message, STATUS_NOT_CONNECTED);
    }

    #[test]
    fn connect_request_shows_connecting_before_first_poll() {
        let mut reconciler = Reconciler::new();
        let effects = reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        assert_eq!(effects, Effects::default());
        assert_eq!(reconciler.presentation().phase, ConnectionPhase::Connecting);
        assert_eq!(reconciler.presentation().message, MSG_CONNECTING);
        assert!(reconciler.intent().is_active());
    }

    #[test]
    fn connect_after_previous_failure_is_not_failed_immediately() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(ReconcileEvent::Polled(status(false, failed("timeout"))));
        assert_eq!(reconciler.presentation().phase, ConnectionPhase::Failed);

        reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        assert_eq!(reconciler.presentation().phase, ConnectionPhase::Connecting);
        assert!(reconciler.intent().is_active());
    }

    #[test]
    fn full_attempt_records_once_and_clears_intent() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        let effects = reconciler.apply(ReconcileEvent::Polled(status(false, connecting("", "connecting..."))));
        assert_eq!(effects.record, None);
        assert!(reconciler.intent().is_active());

        let effects = reconciler.apply(ReconcileEvent::Polled(status(true, direct())));
        assert_eq!(effects.record, Some(target()));
        assert!(reconciler.presentation().online);
        assert_eq!(reconciler.presentation().message, "P2P direct");

        let effects = reconciler.apply(ReconcileEvent::Polled(status(true, direct())));
        assert_eq!(effects.record, None);
    }

    #[test]
    fn failure_alert_fires_once_per_transition() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(ReconcileEvent::ConnectRequested(target()));

        let first = reconciler.apply(ReconcileEvent::Polled(status(false, failed("wrong password"))));
        assert_eq!(first.alert.as_deref(), Some("wrong password"));
        assert!(!reconciler.intent().is_active());

        let repeat = reconciler.apply(ReconcileEvent::Polled(status(false, failed("wrong password"))));
        assert_eq!(repeat.alert, None);

        reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        let again = reconciler.apply(ReconcileEvent::Polled(status(false, failed("wrong password"))));
        assert_eq!(again.alert.as_deref(), Some("wrong password"));
    }

    #[test]
    fn silent_failure_has_no_alert() {
        let mut reconciler = Reconciler::new();
        let effects = reconciler.apply(ReconcileEvent::Polled(status(false, failed(""))));
        assert_eq!(effects.alert, None);
        assert_eq!(reconciler.presentation().message, MSG_CONNECT_FAILED);
    }

    #[test]
    fn rejection_is_surfaced_like_a_failure() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        let effects = reconciler.apply(ReconcileEvent::ConnectRejected {
            message: Some("invalid target id".to_owned()),
        });
        assert_eq!(effects.alert.as_deref(), Some("invalid target id"));
        assert_eq!(reconciler.presentation().phase, ConnectionPhase::Failed);
        assert_eq!(reconciler.presentation().message, "invalid target id");
        assert!(!reconciler.intent().is_active());

        reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        reconciler.apply(ReconcileEvent::ConnectRejected { message: None });
        assert_eq!(reconciler.presentation().message, MSG_CONNECT_FAILED);
    }

    #[test]
    fn poll_failure_resets_every_status_entity() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        reconciler.apply(ReconcileEvent::Polled(status(true, direct())));

        let effects = reconciler.apply(ReconcileEvent::PollUnreachable);
        assert_eq!(effects, Effects::default());
        assert_eq!(reconciler.peer(), &PeerDevice::default());
        assert_eq!(reconciler.connection_info(), &ConnectionInfo::default());
        assert_eq!(reconciler.presentation(), &ConnectionPresentation::default());
        assert!(!reconciler.intent().is_active());
    }

    #[test]
    fn unreachable_connect_alerts_and_rests_disconnected() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        let effects = reconciler.apply(ReconcileEvent::ConnectUnreachable);
        assert_eq!(effects.alert.as_deref(), Some(MSG_REQUEST_FAILED));
        assert_eq!(reconciler.presentation(), &ConnectionPresentation::default());
        assert!(!reconciler.intent().is_active());
    }

    #[test]
    fn disconnect_clears_intent_but_keeps_backend_view() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(ReconcileEvent::ConnectRequested(target()));
        reconciler.apply(ReconcileEvent::Polled(status(false, connecting("", "connecting..."))));

        reconciler.apply(ReconcileEvent::Disconnect);
        assert!(!reconciler.intent().is_active());
        // The agent still reports an attempt in progress.
        assert_eq!(reconciler.presentation().phase, ConnectionPhase::Connecting);

        reconciler.apply(ReconcileEvent::Polled(status(false, ConnectionInfo::default())));
        assert_eq!(reconciler.presentation(), &ConnectionPresentation::default());
    }
}
