//! services/client/src/room/session.rs
//!
//! Owns the lifecycle of the connection to the reactions broker:
//! teardown of the previous room, connect, subscribe, and the dispatch loop
//! that feeds inbound frames to the dispatcher in delivery order.

use crate::{
    config::ChannelConfig,
    error::ClientError,
    room::{dispatcher::Dispatcher, render::Notifier},
};
use futures::StreamExt;
use listening_room_core::domain::SessionIdentity;
use listening_room_core::ports::{ChannelConnection, ChannelTransport, InboundStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The externally visible state of the channel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Everything that belongs to one live connection.
struct ActiveChannel {
    generation: u64,
    identity: SessionIdentity,
    connection: Arc<dyn ChannelConnection>,
    room_subscription: String,
    cancellation_token: CancellationToken,
    dispatch_task: JoinHandle<()>,
    /// Set by the dispatch loop, under the state lock, when the broker ends the stream.
    link_closed: Arc<AtomicBool>,
}

enum ChannelState {
    Disconnected,
    Connecting,
    Subscribed(ActiveChannel),
}

impl ChannelState {
    fn status(&self) -> ChannelStatus {
        match self {
            ChannelState::Disconnected => ChannelStatus::Disconnected,
            ChannelState::Connecting => ChannelStatus::Connecting,
            ChannelState::Subscribed(_) => ChannelStatus::Subscribed,
        }
    }
}

pub struct SessionManager {
    transport: Arc<dyn ChannelTransport>,
    dispatcher: Arc<Dispatcher>,
    notifier: Notifier,
    config: ChannelConfig,
    state: Arc<Mutex<ChannelState>>,
    /// Serializes connect/disconnect so two rooms can never overlap.
    operation: Mutex<u64>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        dispatcher: Arc<Dispatcher>,
        notifier: Notifier,
        config: ChannelConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            notifier,
            config,
            state: Arc::new(Mutex::new(ChannelState::Disconnected)),
            operation: Mutex::new(0),
        }
    }

    pub async fn status(&self) -> ChannelStatus {
        self.state.lock().await.status()
    }

    /// The identity of the room currently subscribed to, if any.
    pub async fn active_identity(&self) -> Option<SessionIdentity> {
        match &*self.state.lock().await {
            ChannelState::Subscribed(active) => Some(active.identity.clone()),
            _ => None,
        }
    }

    /// Joins the room of `identity.song_id`, leaving any previous room first.
    ///
    /// Errors are reported to the user and returned; nothing is retried.
    pub async fn connect(&self, identity: SessionIdentity) -> Result<(), ClientError> {
        let mut generation = self.operation.lock().await;

        if self.teardown().await {
            self.notifier.info("Previous reactions connection closed.");
        }

        *self.state.lock().await = ChannelState::Connecting;
        *generation += 1;
        info!(
            nickname = %identity.nickname,
            song_id = %identity.song_id,
            "Connecting to the reactions broker"
        );

        match self.establish(identity, *generation).await {
            Ok(active) => {
                let mut state = self.state.lock().await;
                if active.link_closed.load(Ordering::SeqCst) {
                    // The broker hung up before the session was published.
                    *state = ChannelState::Disconnected;
                    drop(state);
                    active.cancellation_token.cancel();
                    self.notifier.error("Lost the connection to the reactions server.");
                    return Err(ClientError::Internal(
                        "reactions connection closed during setup".to_string(),
                    ));
                }
                *state = ChannelState::Subscribed(active);
                drop(state);
                self.notifier.success("Connected to the reactions server.");
                Ok(())
            }
            Err(e) => {
                *self.state.lock().await = ChannelState::Disconnected;
                error!("Reactions connection failed: {}", e);
                self.notifier.error("Could not connect to the reactions server.");
                Err(e)
            }
        }
    }

    /// Leaves the current room. A no-op while disconnected.
    pub async fn disconnect(&self) {
        let _operation = self.operation.lock().await;
        if self.teardown().await {
            self.notifier.info("Reactions connection closed.");
        }
    }

    /// Sends `body` to `destination` over the live connection.
    ///
    /// Without a subscribed session this only warns the user.
    pub async fn send(&self, destination: &str, body: &str) -> Result<(), ClientError> {
        let connection = match &*self.state.lock().await {
            ChannelState::Subscribed(active) => Some(active.connection.clone()),
            _ => None,
        };
        let Some(connection) = connection else {
            self.notifier
                .error("No active connection to the reactions server.");
            return Ok(());
        };
        connection.send(destination, body).await.map_err(|e| {
            error!("Failed to send to {}: {}", destination, e);
            self.notifier.error("Failed to send message to the reactions server.");
            ClientError::from(e)
        })
    }

    /// Connects, subscribes and starts the dispatch loop.
    async fn establish(
        &self,
        identity: SessionIdentity,
        generation: u64,
    ) -> Result<ActiveChannel, ClientError> {
        let link = self.transport.connect(&identity.nickname).await?;
        let connection: Arc<dyn ChannelConnection> = Arc::from(link.connection);

        let subscriptions = self.subscribe_all(connection.as_ref(), &identity).await;
        let (room_subscription, private_subscription) = match subscriptions {
            Ok(ids) => ids,
            Err(e) => {
                if let Err(close_err) = connection.disconnect().await {
                    warn!("Failed to close half-open connection: {}", close_err);
                }
                return Err(e);
            }
        };

        let cancellation_token = CancellationToken::new();
        let link_closed = Arc::new(AtomicBool::new(false));
        let dispatch_task = tokio::spawn(dispatch_loop(
            link.frames,
            Routing {
                generation,
                identity: identity.clone(),
                room_subscription: room_subscription.clone(),
                private_subscription,
                link_closed: link_closed.clone(),
            },
            self.dispatcher.clone(),
            self.notifier.clone(),
            self.state.clone(),
            cancellation_token.clone(),
        ));

        Ok(ActiveChannel {
            generation,
            identity,
            connection,
            room_subscription,
            cancellation_token,
            dispatch_task,
            link_closed,
        })
    }

    async fn subscribe_all(
        &self,
        connection: &dyn ChannelConnection,
        identity: &SessionIdentity,
    ) -> Result<(String, Option<String>), ClientError> {
        let room_topic = self.config.room_topic(&identity.song_id);
        let room_subscription = connection.subscribe(&room_topic).await?;
        debug!(topic = %room_topic, id = %room_subscription, "Subscribed to room");

        let private_subscription = match &self.config.private_queue {
            Some(queue) => {
                let id = connection.subscribe(queue).await?;
                debug!(queue = %queue, id = %id, "Subscribed to private queue");
                Some(id)
            }
            None => None,
        };
        Ok((room_subscription, private_subscription))
    }

    /// Unsubscribes and disconnects the live session, waiting for the broker's
    /// acknowledgement. Returns `true` if there was something to tear down.
    async fn teardown(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock().await, ChannelState::Disconnected);
        let active = match previous {
            ChannelState::Subscribed(active) => active,
            _ => return false,
        };

        debug!(generation = active.generation, "Tearing down reactions session");
        if let Err(e) = active.connection.unsubscribe(&active.room_subscription).await {
            warn!("Failed to unsubscribe from the room: {}", e);
        }
        if let Err(e) = active.connection.disconnect().await {
            warn!("Broker did not acknowledge the disconnect: {}", e);
        }

        active.cancellation_token.cancel();
        if let Err(e) = active.dispatch_task.await {
            error!("Dispatch loop ended abnormally: {:?}", e);
        }
        true
    }
}

/// How frames of one connection are routed.
struct Routing {
    generation: u64,
    identity: SessionIdentity,
    room_subscription: String,
    private_subscription: Option<String>,
    link_closed: Arc<AtomicBool>,
}

async fn dispatch_loop(
    mut frames: InboundStream,
    routing: Routing,
    dispatcher: Arc<Dispatcher>,
    notifier: Notifier,
    state: Arc<Mutex<ChannelState>>,
    cancellation_token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!(generation = routing.generation, "Dispatch loop cancelled.");
                return;
            }
            frame = frames.next() => frame,
        };

        let Some(frame) = frame else { break };
        if frame.subscription_id == routing.room_subscription {
            dispatcher.on_room_message(&routing.identity, &frame.body).await;
        } else if routing.private_subscription.as_deref() == Some(frame.subscription_id.as_str()) {
            dispatcher.on_private_message(&frame.body);
        } else {
            debug!(
                destination = %frame.destination,
                "Frame for an unknown subscription ignored"
            );
        }
    }

    // The broker closed the stream without being asked to.
    let mut state = state.lock().await;
    routing.link_closed.store(true, Ordering::SeqCst);
    let still_current = matches!(
        &*state,
        ChannelState::Subscribed(active) if active.generation == routing.generation
    );
    if still_current {
        *state = ChannelState::Disconnected;
        notifier.error("Lost the connection to the reactions server.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlayer, FakeTransport, RecordingSurface};
    use listening_room_core::domain::LogLevel;
    use std::time::Duration;

    struct Harness {
        manager: SessionManager,
        transport: Arc<FakeTransport>,
        surface: Arc<RecordingSurface>,
        dispatcher: Arc<Dispatcher>,
    }

    fn harness(config: ChannelConfig) -> Harness {
        let transport = Arc::new(FakeTransport::default());
        let surface = Arc::new(RecordingSurface::default());
        let notifier = Notifier::new(surface.clone());
        let dispatcher = Arc::new(Dispatcher::new(
            notifier.clone(),
            Arc::new(FakePlayer::new(false)),
        ));
        let manager =
            SessionManager::new(transport.clone(), dispatcher.clone(), notifier, config);
        Harness {
            manager,
            transport,
            surface,
            dispatcher,
        }
    }

    fn identity(song: &str) -> SessionIdentity {
        SessionIdentity::parse("ana", song).unwrap()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_subscribes_to_room_and_private_queue() {
        let h = harness(ChannelConfig::default());

        h.manager.connect(identity("song1")).await.unwrap();

        assert_eq!(h.manager.status().await, ChannelStatus::Subscribed);
        assert_eq!(h.transport.connects(), vec!["ana".to_string()]);
        let destinations: Vec<String> = h
            .transport
            .active_subscriptions()
            .into_iter()
            .map(|s| s.destination)
            .collect();
        assert_eq!(
            destinations,
            vec![
                "/broker/canciones/song1".to_string(),
                "/user/queue/notificaciones".to_string()
            ]
        );
        assert_eq!(h.manager.active_identity().await, Some(identity("song1")));
    }

    #[tokio::test]
    async fn private_queue_is_optional() {
        let h = harness(ChannelConfig {
            private_queue: None,
            ..ChannelConfig::default()
        });

        h.manager.connect(identity("song1")).await.unwrap();

        assert_eq!(h.transport.active_subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn connecting_twice_keeps_exactly_one_room_subscription() {
        let h = harness(ChannelConfig::default());

        h.manager.connect(identity("song1")).await.unwrap();
        h.manager.connect(identity("song1")).await.unwrap();

        let room_subs: Vec<_> = h
            .transport
            .active_subscriptions()
            .into_iter()
            .filter(|s| s.destination == "/broker/canciones/song1")
            .collect();
        assert_eq!(room_subs.len(), 1);
        assert_eq!(h.transport.disconnects(), 1);
        assert_eq!(h.transport.connects().len(), 2);
        assert!(h
            .surface
            .logs()
            .iter()
            .any(|(_, line)| line == "Previous reactions connection closed."));
    }

    #[tokio::test]
    async fn concurrent_connects_never_overlap() {
        let h = harness(ChannelConfig::default());
        let manager = Arc::new(h.manager);

        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(identity("song1")).await }
        });
        let b = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect(identity("song2")).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let room_subs = h
            .transport
            .active_subscriptions()
            .into_iter()
            .filter(|s| s.destination.starts_with("/broker/canciones/"))
            .count();
        assert_eq!(room_subs, 1);
        assert_eq!(manager.status().await, ChannelStatus::Subscribed);
    }

    #[tokio::test]
    async fn switching_songs_moves_the_room_subscription() {
        let h = harness(ChannelConfig::default());

        h.manager.connect(identity("song1")).await.unwrap();
        h.manager.connect(identity("song2")).await.unwrap();

        let rooms: Vec<String> = h
            .transport
            .active_subscriptions()
            .into_iter()
            .map(|s| s.destination)
            .filter(|d| d.starts_with("/broker/canciones/"))
            .collect();
        assert_eq!(rooms, vec!["/broker/canciones/song2".to_string()]);
    }

    #[tokio::test]
    async fn connect_failure_leaves_session_disconnected() {
        let h = harness(ChannelConfig::default());
        h.transport.set_fail_connect(true);

        let err = h.manager.connect(identity("song1")).await.unwrap_err();

        assert!(matches!(err, ClientError::Port(_)));
        assert_eq!(h.manager.status().await, ChannelStatus::Disconnected);
        assert_eq!(
            h.surface.error_lines(),
            vec!["Could not connect to the reactions server.".to_string()]
        );

        // A manual retry works once the broker is back.
        h.transport.set_fail_connect(false);
        h.manager.connect(identity("song1")).await.unwrap();
        assert_eq!(h.manager.status().await, ChannelStatus::Subscribed);
    }

    #[tokio::test]
    async fn send_without_connection_only_warns() {
        let h = harness(ChannelConfig::default());

        h.manager.send("/app/reproducir", "{}").await.unwrap();

        assert!(h.transport.sent().is_empty());
        assert_eq!(h.surface.error_lines().len(), 1);
    }

    #[tokio::test]
    async fn send_goes_through_while_subscribed() {
        let h = harness(ChannelConfig::default());
        h.manager.connect(identity("song1")).await.unwrap();

        h.manager.send("/app/reproducir", "{\"a\":1}").await.unwrap();

        assert_eq!(
            h.transport.sent(),
            vec![("/app/reproducir".to_string(), "{\"a\":1}".to_string())]
        );
    }

    #[tokio::test]
    async fn frames_are_routed_by_subscription() {
        let h = harness(ChannelConfig::default());
        h.manager.connect(identity("song1")).await.unwrap();

        assert!(h.transport.deliver(
            "/broker/canciones/song1",
            r#"{"nickname":"bob","idCancion":"song1","tipo":"PLAY"}"#
        ));
        assert!(h.transport.deliver(
            "/user/queue/notificaciones",
            r#"{"tipo":"INFO","titulo":"Hola","mensaje":"Bienvenido"}"#
        ));
        settle().await;

        assert!(h.dispatcher.roster().await.contains("bob"));
        assert_eq!(h.surface.toasts().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_tears_down_and_is_idempotent() {
        let h = harness(ChannelConfig::default());
        h.manager.connect(identity("song1")).await.unwrap();

        h.manager.disconnect().await;
        h.manager.disconnect().await;

        assert_eq!(h.manager.status().await, ChannelStatus::Disconnected);
        assert!(h.transport.active_subscriptions().is_empty());
        assert_eq!(h.transport.disconnects(), 1);
    }

    #[tokio::test]
    async fn broker_hangup_marks_session_disconnected() {
        let h = harness(ChannelConfig::default());
        h.manager.connect(identity("song1")).await.unwrap();

        h.transport.drop_latest();
        settle().await;

        assert_eq!(h.manager.status().await, ChannelStatus::Disconnected);
        assert!(h.surface.logs().iter().any(|(level, line)| *level == LogLevel::Error
            && line == "Lost the connection to the reactions server."));
    }
    #[tokio::test]
    async fn subscribe_failure_closes_the_half_open_connection() {
        let h = harness(ChannelConfig::default());
        h.transport.set_fail_subscribe(true);

        let err = h.manager.connect(identity("song1")).await.unwrap_err();

        assert!(matches!(err, ClientError::Port(_)));
        assert_eq!(h.transport.disconnects(), 1);
        assert!(h.transport.active_subscriptions().is_empty());
        assert_eq!(h.manager.status().await, ChannelStatus::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hang_up_during_setup_never_leaves_a_live_session() {
        for _ in 0..200 {
            let h = harness(ChannelConfig::default());
            h.transport.set_hang_up_on_connect(true);

            let _ = h.manager.connect(identity("song1")).await;

            let settled = tokio::time::timeout(Duration::from_secs(2), async {
                while h.manager.status().await != ChannelStatus::Disconnected {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
            .await;
            assert!(settled.is_ok(), "session stayed subscribed on a dead link");

            let lost = h
                .surface
                .error_lines()
                .iter()
                .filter(|line| *line == "Lost the connection to the reactions server.")
                .count();
            assert_eq!(lost, 1);
        }
    }
}
