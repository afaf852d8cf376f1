//! Scratch sound effects.
//!
//! WAV samples from the sfx directory are decoded once at startup. Every
//! scratch burst picks the next sample in turn and plays it at the rate and
//! volume the [`ScratchTrigger`](crate::scratch::ScratchTrigger) asks for,
//! backwards when the record is pulled back.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::Context;

use crate::scratch::ScratchVoice;

/// A mono sample ready for playback.
#[derive(Debug, Clone)]
pub struct ScratchSample {
    pub name: String,
    pub sample_rate: u32,
    frames: Arc<[f32]>,
}

impl ScratchSample {
    pub fn new(name: impl Into<String>, sample_rate: u32, frames: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            sample_rate: sample_rate.max(1),
            frames: frames.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Linear interpolation between neighbouring frames, wrapping at the end.
    fn at(&self, position: f64) -> f32 {
        let len = self.frames.len();
        let index = position.floor();
        let frac = (position - index) as f32;
        let i0 = (index as usize) % len;
        let i1 = (i0 + 1) % len;
        self.frames[i0] + (self.frames[i1] - self.frames[i0]) * frac
    }
}

pub fn read_wav(path: &Path) -> anyhow::Result<ScratchSample> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("Failed to decode {}", path.display()))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to decode {}", path.display()))?
        }
    };

    let frames = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ScratchSample::new(name, spec.sample_rate, frames))
}

/// Loads every `.wav` in `dir`, sorted by file name. Files that fail to
/// decode are skipped with a warning.
pub fn load_samples(dir: &Path) -> anyhow::Result<Vec<ScratchSample>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
        })
        .collect();
    paths.sort();

    let mut samples = Vec::with_capacity(paths.len());
    for path in paths {
        match read_wav(&path) {
            Ok(sample) if !sample.is_empty() => samples.push(sample),
            Ok(_) => log::warn!("Skipping empty sample {}", path.display()),
            Err(e) => log::warn!("Skipping scratch sample: {e:#}"),
        }
    }
    Ok(samples)
}

/// Hands out samples round-robin, one per scratch burst.
#[derive(Debug, Default)]
pub struct SampleBank {
    samples: Vec<ScratchSample>,
    next: usize,
}

impl SampleBank {
    pub fn new(samples: Vec<ScratchSample>) -> Self {
        Self { samples, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn next_sample(&mut self) -> Option<ScratchSample> {
        if self.samples.is_empty() {
            return None;
        }
        let sample = self.samples[self.next % self.samples.len()].clone();
        self.next = (self.next + 1) % self.samples.len();
        Some(sample)
    }
}

/// Renders the active scratch voice into an interleaved output buffer.
#[derive(Debug)]
pub struct VoicePlayer {
    output_rate: u32,
    sample: Option<ScratchSample>,
    voice: Option<ScratchVoice>,
    cursor: f64,
}

impl VoicePlayer {
    pub fn new(output_rate: u32) -> Self {
        Self {
            output_rate: output_rate.max(1),
            sample: None,
            voice: None,
            cursor: 0.0,
        }
    }

    /// Starts a burst on `sample`. Pulling back starts from the tail.
    pub fn start(&mut self, sample: ScratchSample, voice: ScratchVoice) {
        self.cursor = if voice.reverse {
            sample.len().saturating_sub(1) as f64
        } else {
            0.0
        };
        self.sample = Some(sample);
        self.voice = Some(voice);
    }

    pub fn set_voice(&mut self, voice: ScratchVoice) {
        self.voice = Some(voice);
    }

    pub fn stop(&mut self) {
        self.voice = None;
    }

    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let (Some(voice), Some(sample)) = (self.voice, self.sample.as_ref()) else {
            out.fill(0.0);
            return;
        };
        if sample.is_empty() {
            out.fill(0.0);
            return;
        }

        let len = sample.len() as f64;
        let mut step = f64::from(voice.rate) * f64::from(sample.sample_rate)
            / f64::from(self.output_rate);
        if voice.reverse {
            step = -step;
        }

        for frame in out.chunks_mut(channels) {
            frame.fill(sample.at(self.cursor) * voice.volume);
            self.cursor = (self.cursor + step).rem_euclid(len);
        }
    }
}

/// The frame side of scratch playback.
pub struct ScratchOutput {
    bank: SampleBank,
    player: Arc<Mutex<VoicePlayer>>,
    playing: bool,
    #[cfg(feature = "audio")]
    _stream: Option<cpal::Stream>,
}

impl ScratchOutput {
    /// Loads samples from `sfx_dir` and, with the `audio` feature, opens the
    /// default output device. Missing samples or devices leave the deck
    /// silent rather than failing.
    pub fn open(sfx_dir: &Path) -> Self {
        let samples = match load_samples(sfx_dir) {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("No scratch samples: {e:#}");
                Vec::new()
            }
        };
        log::info!("Loaded {} scratch sample(s) from {}", samples.len(), sfx_dir.display());

        let bank = SampleBank::new(samples);

        #[cfg(feature = "audio")]
        match device::open_stream() {
            Ok((stream, player)) => {
                return Self {
                    bank,
                    player,
                    playing: false,
                    _stream: Some(stream),
                }
            }
            Err(e) => log::warn!("Scratch audio disabled: {e:#}"),
        }

        Self::silent(bank)
    }

    /// Tracks bursts without an output device.
    pub fn silent(bank: SampleBank) -> Self {
        Self {
            bank,
            player: Arc::new(Mutex::new(VoicePlayer::new(44_100))),
            playing: false,
            #[cfg(feature = "audio")]
            _stream: None,
        }
    }

    pub fn play(&mut self, voice: ScratchVoice) {
        let mut player = self
            .player
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.playing {
            player.set_voice(voice);
            return;
        }
        self.playing = true;
        if let Some(sample) = self.bank.next_sample() {
            log::debug!(
                "Scratch burst on {} at {:.2}x{}",
                sample.name,
                voice.rate,
                if voice.reverse { " reversed" } else { "" }
            );
            player.start(sample, voice);
        }
    }

    pub fn silence(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.player
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stop();
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

#[cfg(feature = "audio")]
mod device {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Context};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::VoicePlayer;

    pub(super) fn open_stream() -> anyhow::Result<(cpal::Stream, Arc<Mutex<VoicePlayer>>)> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"))?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let supported = device
            .default_output_config()
            .context("Failed to query output config")?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(anyhow!(
                "{name} wants {:?} samples, only f32 is supported",
                supported.sample_format()
            ));
        }

        let config: cpal::StreamConfig = supported.config();
        let rate = config.sample_rate.0;
        let channels = config.channels as usize;
        let player = Arc::new(Mutex::new(VoicePlayer::new(rate)));
        let callback_player = Arc::clone(&player);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    match callback_player.lock() {
                        Ok(mut player) => player.render(data, channels),
                        Err(_) => data.fill(0.0),
                    }
                },
                move |err| log::error!("Scratch audio stream error: {err}"),
                None,
            )
            .context("Failed to build output stream")?;
        stream.play().context("Failed to start output stream")?;

        log::info!("Scratch audio on {name} ({channels} ch, {rate} Hz)");
        Ok((stream, player))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> ScratchSample {
        ScratchSample::new("ramp", 1_000, (0..len).map(|i| i as f32 / 10.0).collect())
    }

    fn voice(rate: f32, volume: f32, reverse: bool) -> ScratchVoice {
        ScratchVoice {
            rate,
            volume,
            reverse,
        }
    }

    #[test]
    fn silent_without_a_voice() {
        let mut player = VoicePlayer::new(1_000);
        let mut out = [1.0f32; 8];
        player.render(&mut out, 2);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn forward_at_unit_rate_reads_frames_in_order() {
        let mut player = VoicePlayer::new(1_000);
        player.start(ramp(10), voice(1.0, 1.0, false));
        let mut out = [0.0f32; 8];
        player.render(&mut out, 2);
        assert_eq!(out, [0.0, 0.0, 0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn reverse_reads_from_the_tail() {
        let mut player = VoicePlayer::new(1_000);
        player.start(ramp(10), voice(1.0, 0.5, true));
        let mut out = [0.0f32; 3];
        player.render(&mut out, 1);
        let expected = [0.45, 0.4, 0.35];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn double_rate_skips_and_wraps() {
        let mut player = VoicePlayer::new(1_000);
        player.start(ramp(4), voice(2.0, 1.0, false));
        let mut out = [0.0f32; 4];
        player.render(&mut out, 1);
        let expected = [0.0, 0.2, 0.0, 0.2];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn half_rate_interpolates() {
        let mut player = VoicePlayer::new(1_000);
        player.start(ramp(4), voice(0.5, 1.0, false));
        let mut out = [0.0f32; 3];
        player.render(&mut out, 1);
        let expected = [0.0, 0.05, 0.1];
        for (got, want) in out.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn bank_rotates_per_burst() {
        let mut output = ScratchOutput::silent(SampleBank::new(vec![
            ScratchSample::new("a", 1_000, vec![0.1; 4]),
            ScratchSample::new("b", 1_000, vec![0.2; 4]),
        ]));
        let names = |output: &ScratchOutput| {
            output
                .player
                .lock()
                .unwrap()
                .sample
                .as_ref()
                .map(|s| s.name.clone())
        };

        output.play(voice(1.0, 1.0, false));
        output.play(voice(1.5, 1.0, false));
        assert_eq!(names(&output).as_deref(), Some("a"));
        output.silence();
        assert!(!output.is_playing());

        output.play(voice(1.0, 1.0, true));
        assert_eq!(names(&output).as_deref(), Some("b"));
        output.silence();
        output.play(voice(1.0, 1.0, false));
        assert_eq!(names(&output).as_deref(), Some("a"));
    }

    #[test]
    fn loads_wav_files_and_ignores_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(dir.path().join("scratch1.wav"), spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16_384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();
        std::fs::write(dir.path().join("broken.wav"), [0u8; 12]).unwrap();

        let samples = load_samples(dir.path()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, "scratch1");
        assert_eq!(samples[0].sample_rate, 22_050);
        assert_eq!(samples[0].len(), 100);
        assert!((samples[0].at(0.0) - 0.25).abs() < 1e-4);
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(load_samples(Path::new("/definitely/not/here")).is_err());
    }
}
