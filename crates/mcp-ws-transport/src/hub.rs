//! The hub: sole owner of the registry, correlator, admission counters, and
//! heartbeat supervisor.
//!
//! It runs as one tokio task. Socket tasks, HTTP handlers, and the dispatcher
//! reach it only through [`TransportHandle`], so none of its state is shared
//! or locked. One interval drives heartbeat, correlation-TTL, and rate-window
//! sweeps; every timestamp comes from the injected [`Clock`].

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use chrono::{SecondsFormat, Utc};
use mcp_ws_protocol::{CloseCode, CloseReason, JsonRpcMessage, RequestId, Welcome};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::admission::{AdmissionGuard, RequestContext, SecurityConfig};
use crate::clock::{Clock, Timestamp};
use crate::config::TransportConfig;
use crate::correlator::RequestCorrelator;
use crate::error::TransportError;
use crate::heartbeat::{HeartbeatAction, HeartbeatSupervisor};
use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionSink, Outbound, RegistrySnapshot};
use crate::server::MessageHandler;

/// Where an outbound frame went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Reply to the connection that issued the matching request.
    Direct(ConnectionId),
    /// No origin known; sent to every live connection.
    Broadcast,
}

/// Result of a `send`. Individual write failures are counted, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub route: Route,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSnapshot {
    #[serde(flatten)]
    pub connections: RegistrySnapshot,
    pub pending_requests: usize,
    pub rate_windows: usize,
}

pub(crate) enum HubCommand {
    Connect {
        context: RequestContext,
        sink: ConnectionSink,
        reply: oneshot::Sender<Result<ConnectionId, TransportError>>,
    },
    /// Inbound frame that carries no method (responses, undecodable frames).
    Touch { id: ConnectionId },
    /// Inbound request or notification: touch, charge the rate windows, and
    /// record the correlation when allowed.
    Admit {
        id: ConnectionId,
        request_id: Option<RequestId>,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Pong { id: ConnectionId },
    Disconnected { id: ConnectionId },
    Send {
        message: JsonRpcMessage,
        reply: oneshot::Sender<Result<DeliveryReport, TransportError>>,
    },
    Snapshot { reply: oneshot::Sender<TransportSnapshot> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable entry point to a running transport; what the dispatcher holds.
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::Sender<HubCommand>,
}

impl TransportHandle {
    pub(crate) fn new(commands: mpsc::Sender<HubCommand>) -> Self {
        Self { commands }
    }

    /// Route `message`: point-to-point for a response whose request is known,
    /// otherwise broadcast. Resolves once every write has been queued.
    pub async fn send(
        &self,
        message: impl Into<JsonRpcMessage>,
    ) -> Result<DeliveryReport, TransportError> {
        let message = message.into();
        self.request(|reply| HubCommand::Send { message, reply }).await?
    }

    pub async fn snapshot(&self) -> Result<TransportSnapshot, TransportError> {
        self.request(|reply| HubCommand::Snapshot { reply }).await
    }

    pub(crate) async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)
    }

    /// Fire-and-forget; a stopped hub has nothing left to update.
    pub(crate) async fn notify(&self, command: HubCommand) {
        let _ = self.commands.send(command).await;
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

pub(crate) struct Hub<H: MessageHandler> {
    registry: ConnectionRegistry,
    correlator: RequestCorrelator,
    guard: AdmissionGuard,
    heartbeat: HeartbeatSupervisor,
    handler: Arc<H>,
    clock: Arc<dyn Clock>,
    rate_sweep_interval_ms: u64,
    last_rate_sweep: Timestamp,
    /// `on_close` already fired for the current empty state.
    close_notified: bool,
}

impl<H: MessageHandler> Hub<H> {
    pub(crate) fn new(
        config: &TransportConfig,
        security: Arc<SecurityConfig>,
        handler: Arc<H>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            registry: ConnectionRegistry::new(config.max_connections),
            correlator: RequestCorrelator::new(TransportConfig::ms(config.request_ttl)),
            guard: AdmissionGuard::new(security),
            heartbeat: HeartbeatSupervisor::new(TransportConfig::ms(config.client_timeout)),
            handler,
            clock,
            rate_sweep_interval_ms: TransportConfig::ms(config.rate_limit_sweep_interval),
            last_rate_sweep: now,
            close_notified: false,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>, tick: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle(command).is_break() {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                _ = ticker.tick() => self.tick(),
            }
        }
        debug!("hub stopped");
    }

    pub(crate) fn handle(&mut self, command: HubCommand) -> ControlFlow<()> {
        match command {
            HubCommand::Connect {
                context,
                sink,
                reply,
            } => {
                let _ = reply.send(self.connect(context, sink));
            }
            HubCommand::Touch { id } => {
                self.registry.touch(&id, self.clock.now());
            }
            HubCommand::Admit {
                id,
                request_id,
                reply,
            } => {
                let _ = reply.send(self.admit_frame(&id, request_id));
            }
            HubCommand::Pong { id } => {
                self.registry.mark_alive(&id);
            }
            HubCommand::Disconnected { id } => {
                self.drop_connection(&id, "client disconnected");
            }
            HubCommand::Send { message, reply } => {
                let _ = reply.send(self.send(&message));
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            HubCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn connect(
        &mut self,
        context: RequestContext,
        sink: ConnectionSink,
    ) -> Result<ConnectionId, TransportError> {
        let now = self.clock.now();

        if let Err(err) = self.guard.admit(&context, now) {
            warn!(client_id = %context.client_id, error = %err, "connection rejected");
            if let Some(code) = err.close_code() {
                sink.close(code, err.close_reason());
            }
            return Err(err);
        }

        let client_id = context.client_id.clone();
        let id = self.registry.accept(sink, context, now).inspect_err(|err| {
            warn!(client_id = %client_id, error = %err, "connection rejected");
        })?;
        self.close_notified = false;

        let welcome = Welcome::new(
            id.as_str(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        if let Some(conn) = self.registry.get(&id) {
            let delivered = serde_json::to_string(&welcome)
                .map_err(TransportError::from)
                .and_then(|frame| conn.deliver(Outbound::Text(frame.into())));
            if let Err(err) = delivered {
                warn!(conn_id = %id, error = %err, "failed to send welcome");
            }
        }

        info!(conn_id = %id, client_id = %client_id, total = self.registry.len(), "client connected");
        Ok(id)
    }

    fn admit_frame(
        &mut self,
        id: &ConnectionId,
        request_id: Option<RequestId>,
    ) -> Result<(), TransportError> {
        let now = self.clock.now();
        if !self.registry.touch(id, now) {
            return Err(TransportError::Closed);
        }
        if let Some(conn) = self.registry.get(id) {
            self.guard.charge(&conn.context, now).inspect_err(|err| {
                debug!(conn_id = %id, error = %err, "frame rate limited");
            })?;
            // Notifications get no reply; requests settle in `send`.
            if request_id.is_none() {
                self.guard.settle(&conn.context, now, true, now);
            }
        }
        if let Some(request_id) = request_id {
            self.correlator.record_request(request_id, id.clone(), now);
        }
        Ok(())
    }

    fn send(&mut self, message: &JsonRpcMessage) -> Result<DeliveryReport, TransportError> {
        let text: Utf8Bytes = message.to_json()?.into();

        match self.correlator.take_pending(message) {
            Some(pending) => {
                let target = pending.connection_id;
                let mut report = DeliveryReport {
                    route: Route::Direct(target.clone()),
                    delivered: 0,
                    failed: 0,
                };
                match self.registry.get(&target) {
                    Some(conn) => {
                        let success = matches!(message, JsonRpcMessage::Response(r) if !r.is_error());
                        self.guard
                            .settle(&conn.context, pending.timestamp, success, self.clock.now());
                        match conn.deliver(Outbound::Text(text)) {
                            Ok(()) => report.delivered = 1,
                            Err(err) => {
                                warn!(error = %err, "reply delivery failed");
                                report.failed = 1;
                            }
                        }
                    }
                    None => {
                        warn!(conn_id = %target, "reply target no longer registered");
                        report.failed = 1;
                    }
                }
                Ok(report)
            }
            None => {
                let mut report = DeliveryReport {
                    route: Route::Broadcast,
                    delivered: 0,
                    failed: 0,
                };
                for conn in self.registry.iter() {
                    match conn.deliver(Outbound::Text(text.clone())) {
                        Ok(()) => report.delivered += 1,
                        Err(err) => {
                            warn!(error = %err, "broadcast delivery failed");
                            report.failed += 1;
                        }
                    }
                }
                debug!(
                    kind = message.kind(),
                    delivered = report.delivered,
                    failed = report.failed,
                    "broadcast"
                );
                Ok(report)
            }
        }
    }

    /// Remove a connection and everything hanging off it. Fires `on_close`
    /// when this leaves the registry empty.
    fn drop_connection(&mut self, id: &ConnectionId, reason: &str) -> bool {
        let Some(conn) = self.registry.remove(id) else {
            return false;
        };
        let evicted = self.correlator.evict_by_connection(id);
        info!(
            conn_id = %id,
            client_id = %conn.context.client_id,
            reason,
            messages = conn.message_count,
            evicted_requests = evicted,
            total = self.registry.len(),
            "client disconnected"
        );
        if self.registry.is_empty() {
            self.notify_closed();
        }
        true
    }

    fn notify_closed(&mut self) {
        if !self.close_notified {
            self.close_notified = true;
            self.handler.on_close();
        }
    }

    pub(crate) fn tick(&mut self) {
        let now = self.clock.now();

        for action in self.heartbeat.sweep(&mut self.registry, now) {
            match action {
                HeartbeatAction::Ping(id) => {
                    if let Some(conn) = self.registry.get(&id) {
                        if let Err(err) = conn.deliver(Outbound::Ping) {
                            debug!(error = %err, "ping not queued");
                        }
                    }
                }
                HeartbeatAction::Terminate(id) => {
                    if let Some(conn) = self.registry.get(&id) {
                        conn.terminate();
                    }
                    warn!(conn_id = %id, "no pong since last probe; terminating");
                    self.drop_connection(&id, "heartbeat missed");
                }
                HeartbeatAction::IdleTimeout { id, idle_ms } => {
                    let err = TransportError::ConnectionTimeout {
                        connection_id: id.clone(),
                        idle_ms,
                    };
                    if let (Some(conn), Some(code)) = (self.registry.get(&id), err.close_code()) {
                        conn.close(code, err.close_reason());
                    }
                    info!(error = %err, "closing idle connection");
                    self.drop_connection(&id, CloseReason::CLIENT_TIMEOUT);
                }
            }
        }

        let expired = self.correlator.sweep_expired(now);
        if expired > 0 {
            debug!(expired, "expired pending requests");
        }

        if now.saturating_sub(self.last_rate_sweep) >= self.rate_sweep_interval_ms {
            self.last_rate_sweep = now;
            let swept = self.guard.sweep(now);
            if swept > 0 {
                debug!(swept, "swept idle rate windows");
            }
        }
    }

    fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            connections: self.registry.snapshot(self.clock.now()),
            pending_requests: self.correlator.len(),
            rate_windows: self.guard.rate_window_count(),
        }
    }

    fn shutdown(&mut self) {
        let connections = self.registry.drain();
        let count = connections.len();
        for conn in connections {
            conn.close(CloseCode::GoingAway, CloseReason::SHUTTING_DOWN);
        }
        self.correlator.clear();
        self.notify_closed();
        info!(closed = count, "transport hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AuthPolicy, RateLimitPolicy, WindowPolicy};
    use crate::clock::ManualClock;
    use crate::registry::OutboundQueue;
    use crate::registry::tests::context;
    use mcp_ws_protocol::{Notification, Response, RpcError};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHandler {
        closes: AtomicUsize,
    }

    impl MessageHandler for CountingHandler {
        async fn on_message(&self, _message: JsonRpcMessage, _transport: TransportHandle) {}

        fn on_close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        hub: Hub<CountingHandler>,
        handler: Arc<CountingHandler>,
        clock: ManualClock,
    }

    fn config() -> TransportConfig {
        TransportConfig {
            max_connections: 2,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(60),
            request_ttl: Duration::from_secs(60),
            ..TransportConfig::default()
        }
    }

    fn fixture(security: SecurityConfig) -> Fixture {
        let handler = Arc::new(CountingHandler::default());
        let clock = ManualClock::new(0);
        let hub = Hub::new(
            &config(),
            Arc::new(security),
            handler.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            hub,
            handler,
            clock,
        }
    }

    fn connect(f: &mut Fixture, client: &str) -> (Result<ConnectionId, TransportError>, OutboundQueue) {
        let (sink, queue) = ConnectionSink::channel(16);
        (f.hub.connect(context(client), sink), queue)
    }

    /// Connect and swallow the welcome frame.
    fn connected(f: &mut Fixture, client: &str) -> (ConnectionId, OutboundQueue) {
        let (id, mut queue) = connect(f, client);
        let id = id.unwrap();
        let welcome = text_frame(&mut queue).unwrap();
        assert_eq!(welcome["type"], "welcome");
        (id, queue)
    }

    fn text_frame(queue: &mut OutboundQueue) -> Option<Value> {
        match queue.frames.try_recv().ok()? {
            Outbound::Text(t) => Some(serde_json::from_str(t.as_str()).unwrap()),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn close_frame(queue: &mut OutboundQueue) -> (u16, String) {
        match queue.frames.try_recv() {
            Ok(Outbound::Close { code, reason }) => (code.code(), reason),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    fn request(f: &mut Fixture, id: &ConnectionId, request_id: i32) {
        f.hub.admit_frame(id, Some(request_id.into())).unwrap();
    }

    fn reply(id: i32) -> JsonRpcMessage {
        Response::success(id.into(), json!({"ok": true})).into()
    }

    #[test]
    fn welcome_carries_connection_id() {
        let mut f = fixture(SecurityConfig::default());
        let (id, mut queue) = connect(&mut f, "a");
        let id = id.unwrap();
        let welcome = text_frame(&mut queue).unwrap();
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["clientId"], id.as_str());
        assert!(welcome["timestamp"].is_string());
    }

    #[test]
    fn capacity_rejection_closes_with_1013() {
        let mut f = fixture(SecurityConfig::default());
        connected(&mut f, "a");
        connected(&mut f, "b");

        let (result, mut queue) = connect(&mut f, "c");
        assert!(matches!(result, Err(TransportError::CapacityExceeded { max: 2 })));
        assert_eq!(close_frame(&mut queue).0, 1013);
    }

    #[test]
    fn bad_api_key_closes_with_1008() {
        let mut f = fixture(SecurityConfig {
            auth: AuthPolicy {
                enabled: true,
                api_keys: vec!["good".into()],
            },
            ..SecurityConfig::default()
        });
        let (result, mut queue) = connect(&mut f, "a");
        assert!(matches!(result, Err(TransportError::AuthenticationFailure)));
        assert_eq!(
            close_frame(&mut queue),
            (1008, CloseReason::AUTHENTICATION_FAILED.to_string())
        );
    }

    #[test]
    fn replies_go_only_to_the_requesting_connection() {
        let mut f = fixture(SecurityConfig::default());
        let (a, mut qa) = connected(&mut f, "a");
        let (b, mut qb) = connected(&mut f, "b");
        request(&mut f, &a, 1);
        request(&mut f, &b, 2);

        let report = f.hub.send(&reply(1)).unwrap();
        assert_eq!(report.route, Route::Direct(a.clone()));
        assert_eq!(report.delivered, 1);
        assert_eq!(text_frame(&mut qa).unwrap()["id"], 1);
        assert!(text_frame(&mut qb).is_none());

        let report = f.hub.send(&reply(2)).unwrap();
        assert_eq!(report.route, Route::Direct(b));
        assert_eq!(text_frame(&mut qb).unwrap()["id"], 2);
        assert!(text_frame(&mut qa).is_none());
    }

    #[test]
    fn second_resolution_of_same_id_broadcasts() {
        let mut f = fixture(SecurityConfig::default());
        let (a, _qa) = connected(&mut f, "a");
        request(&mut f, &a, 5);

        assert_eq!(f.hub.send(&reply(5)).unwrap().route, Route::Direct(a));
        assert_eq!(f.hub.send(&reply(5)).unwrap().route, Route::Broadcast);
    }

    #[test]
    fn disconnect_purges_correlations() {
        let mut f = fixture(SecurityConfig::default());
        let (a, _qa) = connected(&mut f, "a");
        let (_b, mut qb) = connected(&mut f, "b");
        request(&mut f, &a, 3);

        f.hub.handle(HubCommand::Disconnected { id: a });
        assert_eq!(f.hub.snapshot().pending_requests, 0);

        let report = f.hub.send(&reply(3)).unwrap();
        assert_eq!(report.route, Route::Broadcast);
        assert_eq!(report.delivered, 1);
        assert_eq!(text_frame(&mut qb).unwrap()["id"], 3);
    }

    #[test]
    fn notifications_broadcast_to_everyone() {
        let mut f = fixture(SecurityConfig::default());
        let (_a, mut qa) = connected(&mut f, "a");
        let (_b, mut qb) = connected(&mut f, "b");

        let note = Notification::new("notifications/resources/updated", None);
        let report = f.hub.send(&note.into()).unwrap();
        assert_eq!(report.delivered, 2);
        assert!(text_frame(&mut qa).is_some());
        assert!(text_frame(&mut qb).is_some());
    }

    #[test]
    fn one_dead_recipient_does_not_block_the_rest() {
        let mut f = fixture(SecurityConfig::default());
        let (_a, qa) = connected(&mut f, "a");
        let (_b, mut qb) = connected(&mut f, "b");
        drop(qa);

        let report = f.hub.send(&Notification::new("x", None).into()).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(text_frame(&mut qb).is_some());
    }

    #[test]
    fn on_close_fires_only_when_registry_empties() {
        let mut f = fixture(SecurityConfig::default());
        let (a, _qa) = connected(&mut f, "a");
        let (b, _qb) = connected(&mut f, "b");

        f.hub.handle(HubCommand::Disconnected { id: a.clone() });
        assert_eq!(f.handler.closes.load(Ordering::SeqCst), 0);
        f.hub.handle(HubCommand::Disconnected { id: a });
        f.hub.handle(HubCommand::Disconnected { id: b });
        assert_eq!(f.handler.closes.load(Ordering::SeqCst), 1);

        connected(&mut f, "c");
        assert!(f.hub.handle(HubCommand::Shutdown { reply: oneshot::channel().0 }).is_break());
        assert_eq!(f.handler.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unanswered_ping_terminates_within_one_interval() {
        let mut f = fixture(SecurityConfig::default());
        let (a, mut qa) = connected(&mut f, "a");

        f.clock.advance(30_000);
        f.hub.tick();
        assert_eq!(qa.frames.try_recv().unwrap(), Outbound::Ping);

        f.clock.advance(30_000);
        f.hub.tick();
        assert!(f.hub.registry.get(&a).is_none());
        assert_eq!(f.handler.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pong_only_client_is_evicted_for_idleness() {
        let mut f = fixture(SecurityConfig::default());
        let (a, mut qa) = connected(&mut f, "a");

        for _ in 0..2 {
            f.clock.advance(30_000);
            f.hub.tick();
            assert_eq!(qa.frames.try_recv().unwrap(), Outbound::Ping);
            f.hub.handle(HubCommand::Pong { id: a.clone() });
        }
        f.clock.advance(30_000);
        f.hub.tick();

        assert_eq!(close_frame(&mut qa), (1000, "Client timeout".to_string()));
        assert!(f.hub.registry.get(&a).is_none());
    }

    #[test]
    fn unanswered_requests_expire_on_tick() {
        let mut f = fixture(SecurityConfig::default());
        let (a, _qa) = connected(&mut f, "a");
        request(&mut f, &a, 1);

        f.clock.advance(30_000);
        f.hub.tick();
        f.hub.handle(HubCommand::Pong { id: a.clone() });
        request(&mut f, &a, 2);
        assert_eq!(f.hub.snapshot().pending_requests, 2);

        f.clock.advance(31_000);
        f.hub.tick();
        assert_eq!(f.hub.snapshot().pending_requests, 1);
    }

    #[test]
    fn frames_are_rate_limited_per_client() {
        let mut f = fixture(SecurityConfig {
            rate_limit: RateLimitPolicy {
                enabled: true,
                global: WindowPolicy {
                    max_requests: 1_000,
                    ..WindowPolicy::default()
                },
                per_client: WindowPolicy {
                    window_ms: 1_000,
                    max_requests: 3,
                    skip_successful_requests: false,
                },
            },
            ..SecurityConfig::default()
        });
        // The handshake consumes one slot.
        let (a, _qa) = connected(&mut f, "a");
        request(&mut f, &a, 1);
        request(&mut f, &a, 2);

        let err = f.hub.admit_frame(&a, Some(3.into())).unwrap_err();
        assert!(matches!(err, TransportError::RateLimited { .. }));
        assert_eq!(f.hub.snapshot().pending_requests, 2);

        f.clock.advance(1_000);
        assert!(f.hub.admit_frame(&a, Some(4.into())).is_ok());
    }

    #[test]
    fn rate_limited_handshake_closes_with_1013() {
        let mut f = fixture(SecurityConfig {
            rate_limit: RateLimitPolicy {
                enabled: true,
                global: WindowPolicy {
                    window_ms: 60_000,
                    max_requests: 1,
                    skip_successful_requests: false,
                },
                per_client: WindowPolicy::default(),
            },
            ..SecurityConfig::default()
        });
        connected(&mut f, "a");

        let (result, mut queue) = connect(&mut f, "b");
        assert!(matches!(result, Err(TransportError::RateLimited { .. })));
        assert_eq!(
            close_frame(&mut queue),
            (1013, "Global rate limit exceeded".to_string())
        );
        assert_eq!(f.hub.snapshot().connections.count, 1);
    }

    fn skip_successes(client_max: u32) -> SecurityConfig {
        SecurityConfig {
            rate_limit: RateLimitPolicy {
                enabled: true,
                global: WindowPolicy {
                    max_requests: 1_000,
                    ..WindowPolicy::default()
                },
                per_client: WindowPolicy {
                    window_ms: 60_000,
                    max_requests: client_max,
                    skip_successful_requests: true,
                },
            },
            ..SecurityConfig::default()
        }
    }

    /// Admit up to `attempts` requests, answering each with `answer(id)`.
    fn admitted_with(
        f: &mut Fixture,
        id: &ConnectionId,
        attempts: i32,
        answer: impl Fn(i32) -> JsonRpcMessage,
    ) -> i32 {
        let mut admitted = 0;
        for n in 0..attempts {
            if f.hub.admit_frame(id, Some(n.into())).is_err() {
                break;
            }
            admitted += 1;
            f.hub.send(&answer(n)).unwrap();
        }
        admitted
    }

    #[test]
    fn failed_replies_count_when_successes_are_skipped() {
        let mut f = fixture(skip_successes(2));
        let (a, _qa) = connected(&mut f, "a");

        let admitted = admitted_with(&mut f, &a, 10, |n| {
            Response::error(Some(n.into()), RpcError::internal("boom")).into()
        });
        assert_eq!(admitted, 2);
    }

    #[test]
    fn successful_replies_are_not_counted_when_skipped() {
        let mut f = fixture(skip_successes(2));
        let (a, _qa) = connected(&mut f, "a");

        assert_eq!(admitted_with(&mut f, &a, 10, reply), 10);
        // Unanswered requests stay counted.
        request(&mut f, &a, 100);
        request(&mut f, &a, 101);
        assert!(f.hub.admit_frame(&a, Some(102.into())).is_err());
    }

    #[test]
    fn shutdown_closes_everyone_with_1001() {
        let mut f = fixture(SecurityConfig::default());
        let (_a, mut qa) = connected(&mut f, "a");
        let (_b, mut qb) = connected(&mut f, "b");

        f.hub.shutdown();
        assert_eq!(close_frame(&mut qa).0, 1001);
        assert_eq!(close_frame(&mut qb).0, 1001);
        assert_eq!(f.hub.snapshot().connections.count, 0);
        assert_eq!(f.handler.closes.load(Ordering::SeqCst), 1);
    }
}
