/// Audio output using cpal - a small polyphonic sine voice for previewing
/// patterns without a MIDI synth.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::sequencer::playback::NoteSink;

const VOICE_GAIN: f32 = 0.15;

#[derive(Debug, Clone, Copy)]
struct Voice {
    note: u8,
    frequency: f32,
    phase: f32,
    gain: f32,
}

type Voices = Arc<Mutex<Vec<Voice>>>;

/// Keeps the output stream alive. The stream is not `Send` on every
/// platform, so it stays on the thread that opened it; playback talks to it
/// through [`AudioSink`].
pub struct AudioOutput {
    _stream: cpal::Stream,
    voices: Voices,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let voices: Voices = Arc::new(Mutex::new(Vec::new()));
        let stream = Self::setup_audio_stream(Arc::clone(&voices))?;
        Ok(Self {
            _stream: stream,
            voices,
        })
    }

    fn setup_audio_stream(voices: Voices) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no default output device".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(Error::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                config.sample_format()
            )));
        }

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels().max(1) as usize;

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut voices = voices.lock().unwrap_or_else(PoisonError::into_inner);
                    for frame in data.chunks_mut(channels) {
                        let value = render_frame(&mut voices, sample_rate);
                        frame.fill(value);
                    }
                },
                |err| log::error!(target: "audio", "Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        Ok(stream)
    }

    /// Handle for the playback thread.
    pub fn sink(&self) -> AudioSink {
        AudioSink {
            voices: Arc::clone(&self.voices),
        }
    }
}

/// Sums every sounding voice into one sample and advances their phases.
fn render_frame(voices: &mut [Voice], sample_rate: f32) -> f32 {
    let mut sample = 0.0_f32;
    for voice in voices.iter_mut() {
        sample += (voice.phase * 2.0 * std::f32::consts::PI).sin() * voice.gain;
        voice.phase += voice.frequency / sample_rate;
        if voice.phase >= 1.0 {
            voice.phase -= 1.0;
        }
    }
    sample.clamp(-1.0, 1.0)
}

#[derive(Clone)]
pub struct AudioSink {
    voices: Voices,
}

impl AudioSink {
    fn voices(&self) -> std::sync::MutexGuard<'_, Vec<Voice>> {
        self.voices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sounding(&self) -> usize {
        self.voices().len()
    }
}

impl NoteSink for AudioSink {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<()> {
        let gain = VOICE_GAIN * velocity as f32 / 127.0;
        let mut voices = self.voices();
        voices.retain(|v| v.note != note);
        voices.push(Voice {
            note,
            frequency: midi_note_to_frequency(note),
            phase: 0.0,
            gain,
        });
        Ok(())
    }

    fn note_off(&mut self, note: u8) -> Result<()> {
        self.voices().retain(|v| v.note != note);
        Ok(())
    }
}

fn midi_note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}
