//! services/client/src/testing.rs
//!
//! In-memory fakes of the ports, shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use listening_room_core::domain::{
    LogLevel, PlayableAudio, PrivateNotification, ReactionType, SongRequest,
};
use listening_room_core::ports::{
    ChannelConnection, ChannelLink, ChannelTransport, ChunkStream, InboundFrame, PlayerSurface,
    PortError, PortResult, RenderSurface, SongStreamService,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

//=========================================================================================
// Rendering
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Log(LogLevel, String),
    Bubble(String),
    Floating(String, ReactionType),
    Toast(PrivateNotification),
    Roster(Vec<String>),
}

#[derive(Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<Rendered>>,
}

impl RecordingSurface {
    pub fn events(&self) -> Vec<Rendered> {
        self.events.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Rendered::Log(level, line) => Some((level, line)),
                _ => None,
            })
            .collect()
    }

    pub fn error_lines(&self) -> Vec<String> {
        self.logs()
            .into_iter()
            .filter(|(level, _)| *level == LogLevel::Error)
            .map(|(_, line)| line)
            .collect()
    }

    pub fn bubbles(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Rendered::Bubble(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn toasts(&self) -> Vec<PrivateNotification> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Rendered::Toast(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn rosters(&self) -> Vec<Vec<String>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Rendered::Roster(members) => Some(members),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Rendered) {
        self.events.lock().unwrap().push(event);
    }
}

impl RenderSurface for RecordingSurface {
    fn log(&self, level: LogLevel, message: &str) {
        self.record(Rendered::Log(level, message.to_string()));
    }

    fn status_bubble(&self, text: &str) {
        self.record(Rendered::Bubble(text.to_string()));
    }

    fn floating_reaction(&self, nickname: &str, reaction: ReactionType) {
        self.record(Rendered::Floating(nickname.to_string(), reaction));
    }

    fn toast(&self, notification: &PrivateNotification) {
        self.record(Rendered::Toast(notification.clone()));
    }

    fn roster_changed(&self, members: &[String]) {
        self.record(Rendered::Roster(members.to_vec()));
    }
}

//=========================================================================================
// Player
//=========================================================================================

pub struct FakePlayer {
    paused: AtomicBool,
    refuse_playback: bool,
    show_calls: AtomicUsize,
    played: Mutex<Vec<PlayableAudio>>,
}

impl FakePlayer {
    pub fn new(paused: bool) -> Self {
        Self {
            paused: AtomicBool::new(paused),
            refuse_playback: false,
            show_calls: AtomicUsize::new(0),
            played: Mutex::new(Vec::new()),
        }
    }

    pub fn refusing_playback() -> Self {
        Self {
            refuse_playback: true,
            ..Self::new(true)
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn show_calls(&self) -> usize {
        self.show_calls.load(Ordering::SeqCst)
    }

    pub fn played(&self) -> Vec<PlayableAudio> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlayerSurface for FakePlayer {
    fn show(&self) {
        self.show_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn load_and_play(&self, audio: PlayableAudio) -> PortResult<()> {
        self.played.lock().unwrap().push(audio);
        if self.refuse_playback {
            return Err(PortError::Rejected("autoplay blocked".to_string()));
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

//=========================================================================================
// Streamed RPC
//=========================================================================================

/// Hands out prepared streams in order; fails with `NotFound` once they run out.
#[derive(Default)]
pub struct FakeSongs {
    streams: Mutex<VecDeque<ChunkStream>>,
    requests: Mutex<Vec<SongRequest>>,
}

impl FakeSongs {
    pub fn push(&self, stream: ChunkStream) {
        self.streams.lock().unwrap().push_back(stream);
    }

    pub fn requests(&self) -> Vec<SongRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SongStreamService for FakeSongs {
    async fn stream_song(&self, request: &SongRequest) -> PortResult<ChunkStream> {
        self.requests.lock().unwrap().push(request.clone());
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PortError::NotFound(request.title.clone()))
    }
}

pub fn scripted_stream(items: Vec<PortResult<Bytes>>) -> ChunkStream {
    futures::stream::iter(items).boxed()
}

/// A stream fed by the returned sender; it ends when the sender is dropped.
pub fn held_stream() -> (ChunkStream, mpsc::UnboundedSender<PortResult<Bytes>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (stream.boxed(), tx)
}

//=========================================================================================
// Channel
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeSubscription {
    pub connection: usize,
    pub id: String,
    pub destination: String,
}

#[derive(Default)]
struct BrokerState {
    connects: Vec<String>,
    subscriptions: Vec<FakeSubscription>,
    sent: Vec<(String, String)>,
    disconnects: usize,
    next_id: usize,
    fail_subscribe: bool,
    inbound: Vec<Option<mpsc::UnboundedSender<InboundFrame>>>,
}

/// A broker that lives in memory. Every connection shares its bookkeeping so
/// tests can look at what is subscribed right now.
#[derive(Default)]
pub struct FakeTransport {
    broker: Arc<Mutex<BrokerState>>,
    fail_connect: AtomicBool,
    hang_up_on_connect: AtomicBool,
}

impl FakeTransport {
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.broker.lock().unwrap().fail_subscribe = fail;
    }

    /// New connections come with an inbound stream that has already ended.
    pub fn set_hang_up_on_connect(&self, hang_up: bool) {
        self.hang_up_on_connect.store(hang_up, Ordering::SeqCst);
    }

    pub fn connects(&self) -> Vec<String> {
        self.broker.lock().unwrap().connects.clone()
    }

    pub fn active_subscriptions(&self) -> Vec<FakeSubscription> {
        self.broker.lock().unwrap().subscriptions.clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.broker.lock().unwrap().sent.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.broker.lock().unwrap().disconnects
    }

    /// Delivers `body` to the newest connection's subscription on `destination`.
    pub fn deliver(&self, destination: &str, body: &str) -> bool {
        let broker = self.broker.lock().unwrap();
        let Some(sub) = broker
            .subscriptions
            .iter()
            .rev()
            .find(|s| s.destination == destination)
        else {
            return false;
        };
        let Some(Some(tx)) = broker.inbound.get(sub.connection) else {
            return false;
        };
        tx.send(InboundFrame {
            subscription_id: sub.id.clone(),
            destination: destination.to_string(),
            body: body.to_string(),
        })
        .is_ok()
    }

    /// Simulates the broker dropping the newest connection.
    pub fn drop_latest(&self) {
        let mut broker = self.broker.lock().unwrap();
        if let Some(last) = broker.inbound.last_mut() {
            last.take();
        }
    }
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn connect(&self, nickname: &str) -> PortResult<ChannelLink> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(PortError::Transport("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let index = {
            let mut broker = self.broker.lock().unwrap();
            broker.connects.push(nickname.to_string());
            if self.hang_up_on_connect.load(Ordering::SeqCst) {
                broker.inbound.push(None);
            } else {
                broker.inbound.push(Some(tx));
            }
            broker.inbound.len() - 1
        };
        let frames = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });
        Ok(ChannelLink {
            connection: Box::new(FakeConnection {
                index,
                broker: self.broker.clone(),
            }),
            frames: frames.boxed(),
        })
    }
}

struct FakeConnection {
    index: usize,
    broker: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl ChannelConnection for FakeConnection {
    async fn subscribe(&self, destination: &str) -> PortResult<String> {
        let mut broker = self.broker.lock().unwrap();
        if broker.fail_subscribe {
            return Err(PortError::Transport("subscription refused".to_string()));
        }
        broker.next_id += 1;
        let id = format!("sub-{}", broker.next_id);
        broker.subscriptions.push(FakeSubscription {
            connection: self.index,
            id: id.clone(),
            destination: destination.to_string(),
        });
        Ok(id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> PortResult<()> {
        self.broker
            .lock()
            .unwrap()
            .subscriptions
            .retain(|s| s.id != subscription_id);
        Ok(())
    }

    async fn send(&self, destination: &str, body: &str) -> PortResult<()> {
        self.broker
            .lock()
            .unwrap()
            .sent
            .push((destination.to_string(), body.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> PortResult<()> {
        let mut broker = self.broker.lock().unwrap();
        broker.disconnects += 1;
        let index = self.index;
        broker.subscriptions.retain(|s| s.connection != index);
        if let Some(slot) = broker.inbound.get_mut(index) {
            slot.take();
        }
        Ok(())
    }
}
