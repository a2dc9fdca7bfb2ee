/// MIDI output using midir
use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{Error, Result};
use crate::sequencer::playback::NoteSink;
use crate::tempo::metronome::{ClickSink, CLICK_CHANNEL, CLICK_NOTE, CLICK_VELOCITY};

const CLIENT_NAME: &str = "pianoseq MIDI Output";

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
    channel: u8,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: None,
            channel: 0,
        }
    }

    /// Channel (0-15) used for note messages.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel & 0x0f;
        self
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<()> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| Error::DeviceUnavailable(format!("failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| Error::DeviceUnavailable(format!("no MIDI port {}", port_index)))?;

        let connection = midi_out
            .connect(port, "pianoseq")
            .map_err(|e| Error::DeviceUnavailable(format!("failed to connect: {}", e)))?;

        self.connection = Some(connection);
        log::info!(target: "midi", "connected to MIDI port {}", port_index);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        match self.connection {
            Some(ref mut conn) => conn
                .send(message)
                .map_err(|e| Error::DeviceUnavailable(format!("failed to send: {}", e))),
            None => Err(Error::DeviceUnavailable("MIDI output not connected".to_string())),
        }
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteSink for MidiOutputDevice {
    fn note_on(&mut self, note: u8, velocity: u8) -> Result<()> {
        self.send(&[NOTE_ON | self.channel, note & 0x7f, velocity & 0x7f])
    }

    fn note_off(&mut self, note: u8) -> Result<()> {
        self.send(&[NOTE_OFF | self.channel, note & 0x7f, 0])
    }
}

impl ClickSink for MidiOutputDevice {
    fn open(&mut self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::DeviceUnavailable("MIDI output not connected".to_string()))
        }
    }

    fn click(&mut self) -> Result<()> {
        self.send(&[NOTE_ON | CLICK_CHANNEL, CLICK_NOTE, CLICK_VELOCITY])?;
        self.send(&[NOTE_OFF | CLICK_CHANNEL, CLICK_NOTE, 0])
    }
}
