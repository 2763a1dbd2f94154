//! Audio sources feeding the monitor with magnitude snapshots.
//!
//! An [`AudioDevice`] is acquired once per session and yields an
//! [`AudioSource`]; acquisition is where microphone access is granted or
//! refused. Two devices are provided: live capture through `ffmpeg` and
//! replay of a recorded MP3 file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use minimp3::{Decoder, Error as Minimp3Error, Frame};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::analyser::FrequencyAnalyser;
use crate::error::TrackerError;
use crate::schedule::{AudioClock, FRAME_PERIOD};

/// Capture rate requested from `ffmpeg`.
pub const CAPTURE_SAMPLE_RATE: u32 = 48_000;

/// How long a freshly started capture may take to deliver its first audio.
const FIRST_AUDIO_TIMEOUT: Duration = Duration::from_secs(5);

/// Pulls one magnitude snapshot per tick.
#[allow(async_fn_in_trait)]
pub trait AudioSource {
    /// Returns the current snapshot, or `None` once the source is exhausted.
    async fn magnitude_snapshot(&mut self) -> Option<&[u8]>;
}

/// Something that can be opened as an [`AudioSource`], subject to permission.
#[allow(async_fn_in_trait)]
pub trait AudioDevice {
    type Source: AudioSource;

    /// Opens the one capture stream of a session.
    ///
    /// # Errors
    /// [`TrackerError::PermissionDenied`] when access is refused.
    async fn acquire(&mut self) -> Result<Self::Source, TrackerError>;
}

/// Samples consumed per tick at `sample_rate`.
fn hop_size(sample_rate: u32) -> usize {
    ((u128::from(sample_rate) * FRAME_PERIOD.as_millis() / 1_000) as usize).max(1)
}

/// Microphone captured by spawning `ffmpeg` on an ALSA device.
#[derive(Debug, Clone)]
pub struct FfmpegMicrophone {
    /// The identifier of the audio capture device (e.g. plughw:1,0)
    pub device_id: String,
    program: PathBuf,
}

impl FfmpegMicrophone {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            program: PathBuf::from("ffmpeg"),
        }
    }

    /// Uses a different `ffmpeg` executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl AudioDevice for FfmpegMicrophone {
    type Source = FfmpegCapture;

    /// Starts `ffmpeg` streaming mono 16-bit PCM to stdout and waits for the
    /// first block of audio. A process that cannot start, or that delivers
    /// nothing in time, counts as refused access.
    #[tracing::instrument(skip(self), fields(device = %self.device_id))]
    async fn acquire(&mut self) -> Result<FfmpegCapture, TrackerError> {
        let rate = CAPTURE_SAMPLE_RATE.to_string();
        let mut child = Command::new(&self.program)
            .args([
                "-loglevel", "error",
                "-f", "alsa",
                "-ac", "1",
                "-i", &self.device_id,
                "-ar", &rate,
                "-ac", "1",
                "-f", "s16le",
                "-acodec", "pcm_s16le",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TrackerError::PermissionDenied(format!("could not start {}: {e}", self.program.display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrackerError::Source("ffmpeg stdout was not captured".to_string()))?;

        let hop = hop_size(CAPTURE_SAMPLE_RATE);
        let mut capture = FfmpegCapture {
            child,
            stdout,
            analyser: FrequencyAnalyser::new(),
            raw: vec![0; hop * 2],
            pcm: vec![0.0; hop],
        };

        match tokio::time::timeout(FIRST_AUDIO_TIMEOUT, capture.read_hop()).await {
            Ok(Ok(())) => {
                info!("Microphone capture started on {}", self.device_id);
                Ok(capture)
            }
            Ok(Err(e)) => Err(TrackerError::PermissionDenied(format!("{} produced no audio: {e}", self.device_id))),
            Err(_) => Err(TrackerError::PermissionDenied(format!("{} produced no audio within {:?}", self.device_id, FIRST_AUDIO_TIMEOUT))),
        }
    }
}

/// Live capture stream. The `ffmpeg` process is stopped when this is dropped.
pub struct FfmpegCapture {
    child: Child,
    stdout: ChildStdout,
    analyser: FrequencyAnalyser,
    raw: Vec<u8>,
    pcm: Vec<f32>,
}

impl FfmpegCapture {
    /// Reads one tick's worth of PCM into the analyser.
    async fn read_hop(&mut self) -> std::io::Result<()> {
        self.stdout.read_exact(&mut self.raw).await?;
        for (sample, bytes) in self.pcm.iter_mut().zip(self.raw.chunks_exact(2)) {
            *sample = f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / f32::from(i16::MAX);
        }
        self.analyser.push_samples(&self.pcm);
        Ok(())
    }
}

impl AudioSource for FfmpegCapture {
    async fn magnitude_snapshot(&mut self) -> Option<&[u8]> {
        if let Err(e) = self.read_hop().await {
            warn!("Microphone stream ended: {e}");
            return None;
        }
        Some(self.analyser.byte_frequency_data())
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        info!("Stopping microphone capture.");
        if let Err(e) = self.child.start_kill() {
            debug!("ffmpeg already stopped: {e}");
        }
    }
}

/// Mono PCM normalized to `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> TimeDelta {
        let ms = self.samples.len() as u64 * 1_000 / u64::from(self.sample_rate.max(1));
        TimeDelta::milliseconds(ms as i64)
    }
}

/// Decodes an MP3 file, mixing multi-channel frames down to mono.
///
/// This function uses the `minimp3` crate to decode the MP3 file.
///
/// # Example
/// ```no_run
/// use snore_recorder::source::decode_mp3;
/// let audio = decode_mp3("/path/to/audio.mp3".as_ref()).expect("Failed to decode MP3 file");
/// ```
#[tracing::instrument]
pub fn decode_mp3(path: &Path) -> Result<DecodedAudio, TrackerError> {
    let file = File::open(path)
        .map_err(|e| TrackerError::Source(format!("Failed to open file: {} with error {}", path.display(), e)))?;
    let mut decoder = Decoder::new(file);
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(Frame { data, sample_rate: rate, channels, .. }) => {
                sample_rate = rate.max(0) as u32;
                let channels = channels.max(1);
                samples.extend(data.chunks(channels).map(|frame| {
                    frame.iter().map(|&s| f32::from(s) / f32::from(i16::MAX)).sum::<f32>() / frame.len() as f32
                }));
            }
            Err(Minimp3Error::Eof) => break,
            Err(Minimp3Error::SkippedData) => continue,
            Err(e) => return Err(TrackerError::Source(format!("Failed to decode {}: {:?}", path.display(), e))),
        }
    }

    if sample_rate == 0 {
        return Err(TrackerError::Source(format!("{} contains no audio frames", path.display())));
    }
    info!("Decoded {} samples at {} Hz from {}", samples.len(), sample_rate, path.display());
    Ok(DecodedAudio { samples, sample_rate })
}

/// A recording replayed as if it were being captured live.
///
/// The recording is assumed to have ended just now, so its timeline starts
/// one recording-length in the past. Timestamps follow the audio position
/// through [`Recording::clock`].
#[derive(Debug)]
pub struct Recording {
    audio: Option<DecodedAudio>,
    clock: AudioClock,
}

impl Recording {
    /// Decodes `path` into a replayable recording.
    pub fn open_mp3(path: &Path) -> Result<Self, TrackerError> {
        Ok(Self::from_audio(decode_mp3(path)?))
    }

    pub fn from_audio(audio: DecodedAudio) -> Self {
        let clock = AudioClock::new(Utc::now() - audio.duration(), audio.sample_rate);
        Self { audio: Some(audio), clock }
    }

    /// Clock following the replay position.
    pub fn clock(&self) -> AudioClock {
        self.clock.clone()
    }
}

impl AudioDevice for Recording {
    type Source = PcmReplay;

    async fn acquire(&mut self) -> Result<PcmReplay, TrackerError> {
        let audio = self
            .audio
            .take()
            .ok_or_else(|| TrackerError::Source("recording has already been replayed".to_string()))?;
        Ok(PcmReplay::new(audio, self.clock.clone()))
    }
}

/// Feeds decoded PCM through the analyser one tick at a time.
pub struct PcmReplay {
    samples: Vec<f32>,
    position: usize,
    hop: usize,
    analyser: FrequencyAnalyser,
    clock: AudioClock,
}

impl PcmReplay {
    pub fn new(audio: DecodedAudio, clock: AudioClock) -> Self {
        Self {
            hop: hop_size(audio.sample_rate),
            samples: audio.samples,
            position: 0,
            analyser: FrequencyAnalyser::new(),
            clock,
        }
    }
}

impl AudioSource for PcmReplay {
    async fn magnitude_snapshot(&mut self) -> Option<&[u8]> {
        if self.position >= self.samples.len() {
            return None;
        }
        let end = (self.position + self.hop).min(self.samples.len());
        self.analyser.push_samples(&self.samples[self.position..end]);
        self.clock.advance((end - self.position) as u64);
        self.position = end;
        Some(self.analyser.byte_frequency_data())
    }
}
