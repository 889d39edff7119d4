use std::sync::Arc;
use livekit::options::TrackPublishOptions;
use livekit::prelude::*;
use livekit::track::TrackSource as LkTrackSource;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::prelude::*;
use livekit::webrtc::video_source::native::NativeVideoSource;
use tokio::sync::Mutex;

use crate::errors::HuddleError;
use crate::events::TrackSource;

/// Audio source options.
const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 1;
const AUDIO_QUEUE_SIZE_MS: u32 = 100;

/// Default video resolution.
const VIDEO_WIDTH: u32 = 1280;
const VIDEO_HEIGHT: u32 = 720;

/// Ticket for one in-flight toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOp {
    id: u64,
    rollback: bool,
}

/// Displayed on/off state for one local control, tolerant of overlapping
/// in-flight requests.
///
/// `begin` flips the displayed state immediately and stamps a generation;
/// a failed completion rolls back only if no newer request has superseded
/// it, so the display always follows the last issued desired state.
#[derive(Debug, Default)]
pub struct ToggleLatch {
    displayed: bool,
    generation: u64,
}

impl ToggleLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn displayed(&self) -> bool {
        self.displayed
    }

    /// Start a toggle towards `desired`. The displayed state flips now.
    pub fn begin(&mut self, desired: bool) -> ToggleOp {
        self.generation += 1;
        let rollback = self.displayed;
        self.displayed = desired;
        ToggleOp {
            id: self.generation,
            rollback,
        }
    }

    /// Record the outcome of a toggle. Stale completions are discarded.
    pub fn settle(&mut self, op: ToggleOp, ok: bool) {
        if !ok && op.id == self.generation {
            self.displayed = op.rollback;
        }
    }

    /// Adopt an externally observed state (local track published or
    /// unpublished by something other than a toggle). Invalidates
    /// in-flight ops.
    pub fn observe(&mut self, actual: bool) {
        self.generation += 1;
        self.displayed = actual;
    }
}

/// Shared toggle state for the local media controls, written by
/// [`LocalControls`] and mirrored by the room event loop.
#[derive(Default)]
pub struct LocalMediaState {
    pub(crate) microphone: Mutex<ToggleLatch>,
    pub(crate) camera: Mutex<ToggleLatch>,
    pub(crate) screen_share: Mutex<ToggleLatch>,
}

impl LocalMediaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn latch(&self, source: TrackSource) -> Option<&Mutex<ToggleLatch>> {
        match source {
            TrackSource::Microphone => Some(&self.microphone),
            TrackSource::Camera => Some(&self.camera),
            TrackSource::ScreenShare => Some(&self.screen_share),
            TrackSource::Unknown => None,
        }
    }

    /// Mirror path: adopt the published/unpublished state the room reported.
    pub(crate) async fn observe(&self, source: TrackSource, published: bool) {
        if let Some(latch) = self.latch(source) {
            latch.lock().await.observe(published);
        }
    }

    pub(crate) async fn clear(&self) {
        self.microphone.lock().await.observe(false);
        self.camera.lock().await.observe(false);
        self.screen_share.lock().await.observe(false);
    }
}

/// Controls for local media (microphone, camera, screen share).
///
/// Manages local track creation, publishing, and mute/unmute. UI shells
/// feed captured audio/video frames into the sources exposed here.
pub struct LocalControls {
    room: Arc<Mutex<Option<Arc<Room>>>>,
    state: Arc<LocalMediaState>,
    audio_source: Arc<Mutex<Option<NativeAudioSource>>>,
    video_source: Arc<Mutex<Option<NativeVideoSource>>>,
    screen_sources: Arc<Mutex<Option<(NativeVideoSource, NativeAudioSource)>>>,
}

impl LocalControls {
    pub fn new(room: Arc<Mutex<Option<Arc<Room>>>>, state: Arc<LocalMediaState>) -> Self {
        Self {
            room,
            state,
            audio_source: Arc::new(Mutex::new(None)),
            video_source: Arc::new(Mutex::new(None)),
            screen_sources: Arc::new(Mutex::new(None)),
        }
    }

    /// Flip the microphone. The displayed state changes immediately and
    /// rolls back if this request fails before a newer one supersedes it.
    pub async fn toggle_microphone(&self) -> Result<(), HuddleError> {
        let (desired, op) = {
            let mut latch = self.state.microphone.lock().await;
            let desired = !latch.displayed();
            (desired, latch.begin(desired))
        };
        let result = self.set_microphone_enabled(desired).await;
        self.state
            .microphone
            .lock()
            .await
            .settle(op, result.is_ok());
        result
    }

    /// Flip the camera, with the same rollback semantics as the microphone.
    pub async fn toggle_camera(&self) -> Result<(), HuddleError> {
        let (desired, op) = {
            let mut latch = self.state.camera.lock().await;
            let desired = !latch.displayed();
            (desired, latch.begin(desired))
        };
        let result = self.set_camera_enabled(desired).await;
        self.state.camera.lock().await.settle(op, result.is_ok());
        result
    }

    /// Enable or disable the local microphone publication.
    ///
    /// The first enable publishes an audio track; later calls mute/unmute
    /// the existing publication.
    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), HuddleError> {
        let room = self.room.lock().await;
        let room = room
            .as_ref()
            .ok_or_else(|| HuddleError::Room("not connected".into()))?;

        let local = room.local_participant();
        let existing = local
            .track_publications()
            .into_values()
            .find(|p| p.source() == LkTrackSource::Microphone);

        match existing {
            Some(publication) => {
                if enabled {
                    publication.unmute();
                } else {
                    publication.mute();
                }
            }
            None if enabled => {
                let source = NativeAudioSource::new(
                    AudioSourceOptions {
                        echo_cancellation: true,
                        noise_suppression: true,
                        auto_gain_control: true,
                    },
                    AUDIO_SAMPLE_RATE,
                    AUDIO_CHANNELS,
                    AUDIO_QUEUE_SIZE_MS,
                );

                let track = LocalAudioTrack::create_audio_track(
                    "microphone",
                    RtcAudioSource::Native(source.clone()),
                );

                local
                    .publish_track(
                        LocalTrack::Audio(track),
                        TrackPublishOptions {
                            source: LkTrackSource::Microphone,
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| HuddleError::Media(format!("publish microphone: {e}")))?;

                *self.audio_source.lock().await = Some(source);
                tracing::info!("microphone track published");
            }
            None => {}
        }

        tracing::info!("microphone enabled: {enabled}");
        Ok(())
    }

    /// Enable or disable the local camera publication.
    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), HuddleError> {
        let room = self.room.lock().await;
        let room = room
            .as_ref()
            .ok_or_else(|| HuddleError::Room("not connected".into()))?;

        let local = room.local_participant();
        let existing = local
            .track_publications()
            .into_values()
            .find(|p| p.source() == LkTrackSource::Camera);

        match existing {
            Some(publication) => {
                if enabled {
                    publication.unmute();
                } else {
                    publication.mute();
                }
            }
            None if enabled => {
                let source = NativeVideoSource::new(
                    VideoResolution {
                        width: VIDEO_WIDTH,
                        height: VIDEO_HEIGHT,
                    },
                    false, // not a screencast
                );

                let track = LocalVideoTrack::create_video_track(
                    "camera",
                    RtcVideoSource::Native(source.clone()),
                );

                local
                    .publish_track(
                        LocalTrack::Video(track),
                        TrackPublishOptions {
                            source: LkTrackSource::Camera,
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| HuddleError::Media(format!("publish camera: {e}")))?;

                *self.video_source.lock().await = Some(source);
                tracing::info!("camera track published");
            }
            None => {}
        }

        tracing::info!("camera enabled: {enabled}");
        Ok(())
    }

    /// Start sharing the screen: publishes a screencast video track and a
    /// screen-audio track. Refused while a share is already active.
    pub async fn start_screen_share(&self) -> Result<(), HuddleError> {
        let op = {
            let mut latch = self.state.screen_share.lock().await;
            if latch.displayed() {
                return Err(HuddleError::Media("screen share already active".into()));
            }
            latch.begin(true)
        };

        let result = self.publish_screen_tracks().await;
        self.state
            .screen_share
            .lock()
            .await
            .settle(op, result.is_ok());
        result
    }

    /// Stop sharing: unpublishes every local screen-share publication.
    /// No-op when nothing is being shared.
    pub async fn stop_screen_share(&self) -> Result<(), HuddleError> {
        let room = self.room.lock().await;
        let room = room
            .as_ref()
            .ok_or_else(|| HuddleError::Room("not connected".into()))?;

        let local = room.local_participant();
        let screen_publications: Vec<_> = local
            .track_publications()
            .into_values()
            .filter(|p| {
                matches!(
                    p.source(),
                    LkTrackSource::Screenshare | LkTrackSource::ScreenshareAudio
                )
            })
            .collect();

        for publication in screen_publications {
            if let Err(e) = local.unpublish_track(&publication.sid()).await {
                tracing::warn!("unpublish screen track {}: {e}", publication.sid());
            }
        }

        *self.screen_sources.lock().await = None;
        self.state.screen_share.lock().await.observe(false);
        tracing::info!("screen share stopped");
        Ok(())
    }

    async fn publish_screen_tracks(&self) -> Result<(), HuddleError> {
        let room = self.room.lock().await;
        let room = room
            .as_ref()
            .ok_or_else(|| HuddleError::Room("not connected".into()))?;

        let local = room.local_participant();

        let video_source = NativeVideoSource::new(
            VideoResolution {
                width: VIDEO_WIDTH,
                height: VIDEO_HEIGHT,
            },
            true, // screencast
        );
        let video_track = LocalVideoTrack::create_video_track(
            "screen",
            RtcVideoSource::Native(video_source.clone()),
        );
        local
            .publish_track(
                LocalTrack::Video(video_track),
                TrackPublishOptions {
                    source: LkTrackSource::Screenshare,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| HuddleError::Media(format!("publish screen: {e}")))?;

        let audio_source = NativeAudioSource::new(
            AudioSourceOptions {
                echo_cancellation: false,
                noise_suppression: false,
                auto_gain_control: false,
            },
            AUDIO_SAMPLE_RATE,
            AUDIO_CHANNELS,
            AUDIO_QUEUE_SIZE_MS,
        );
        let audio_track = LocalAudioTrack::create_audio_track(
            "screen-audio",
            RtcAudioSource::Native(audio_source.clone()),
        );
        if let Err(e) = local
            .publish_track(
                LocalTrack::Audio(audio_track),
                TrackPublishOptions {
                    source: LkTrackSource::ScreenshareAudio,
                    ..Default::default()
                },
            )
            .await
        {
            // Roll the video half back so a failed pair leaves nothing
            // published.
            if let Some(publication) = local
                .track_publications()
                .into_values()
                .find(|p| p.source() == LkTrackSource::Screenshare)
            {
                if let Err(e) = local.unpublish_track(&publication.sid()).await {
                    tracing::warn!("rollback of screen video failed: {e}");
                }
            }
            return Err(HuddleError::Media(format!("publish screen audio: {e}")));
        }

        *self.screen_sources.lock().await = Some((video_source, audio_source));
        tracing::info!("screen share started");
        Ok(())
    }

    pub async fn is_microphone_enabled(&self) -> bool {
        self.state.microphone.lock().await.displayed()
    }

    pub async fn is_camera_enabled(&self) -> bool {
        self.state.camera.lock().await.displayed()
    }

    pub async fn is_screen_sharing(&self) -> bool {
        self.state.screen_share.lock().await.displayed()
    }

    /// Get the audio source for feeding PCM frames from platform capture.
    pub async fn audio_source(&self) -> Option<NativeAudioSource> {
        self.audio_source.lock().await.clone()
    }

    /// Get the video source for feeding video frames from platform capture.
    pub async fn video_source(&self) -> Option<NativeVideoSource> {
        self.video_source.lock().await.clone()
    }
}
