//! Transporte falso que registra cada llamada, para tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use super::{ConnectionHandle, PlaybackId, Transport};
use crate::{audio::track::Track, error::TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(GuildId, ChannelId),
    Disconnect(GuildId),
    Play { title: String, playback: PlaybackId, volume: u8 },
    Stop,
    Pause,
    Resume,
    Volume(u8),
}

pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    fail_connect: AtomicBool,
    fail_titles: Mutex<Vec<String>>,
    /// `true` mientras `connect` debe quedar esperando.
    connect_gate: watch::Sender<bool>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            fail_connect: AtomicBool::new(false),
            fail_titles: Mutex::default(),
            connect_gate: watch::channel(false).0,
        }
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Deja cada `connect` bloqueado hasta que se libere.
    pub fn hold_connect(&self, hold: bool) {
        self.connect_gate.send_replace(hold);
    }

    /// Hace fallar `play` para el track con este título.
    pub fn fail_play_for(&self, title: &str) {
        self.fail_titles.lock().push(title.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn played(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Play { title, .. } => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_playback(&self) -> Option<PlaybackId> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            Call::Play { playback, .. } => Some(*playback),
            _ => None,
        })
    }

    pub fn volumes(&self) -> Vec<u8> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Volume(level) => Some(*level),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls.lock().iter().filter(|call| *call == wanted).count()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<ConnectionHandle, TransportError> {
        self.calls.lock().push(Call::Connect(guild_id, channel_id));
        let mut held = self.connect_gate.subscribe();
        let _ = held.wait_for(|hold| !hold).await;
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Join("canal lleno".to_string()));
        }
        Ok(ConnectionHandle { guild_id, channel_id, session: 0 })
    }

    async fn disconnect(&self, handle: &ConnectionHandle) {
        self.calls.lock().push(Call::Disconnect(handle.guild_id));
    }

    async fn play(
        &self,
        _handle: &ConnectionHandle,
        track: &Track,
        playback: PlaybackId,
        volume: u8,
    ) -> Result<(), TransportError> {
        if self.fail_titles.lock().iter().any(|title| title == track.title()) {
            return Err(TransportError::Input(format!("sin stream para {}", track.title())));
        }
        self.calls.lock().push(Call::Play {
            title: track.title().to_string(),
            playback,
            volume,
        });
        Ok(())
    }

    async fn stop(&self, _handle: &ConnectionHandle) {
        self.calls.lock().push(Call::Stop);
    }

    async fn pause(&self, _handle: &ConnectionHandle) {
        self.calls.lock().push(Call::Pause);
    }

    async fn resume(&self, _handle: &ConnectionHandle) {
        self.calls.lock().push(Call::Resume);
    }

    async fn set_volume(&self, _handle: &ConnectionHandle, volume: u8) {
        self.calls.lock().push(Call::Volume(volume));
    }
}
