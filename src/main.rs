use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use pianoseq::tempo::metronome::NoClick;
use pianoseq::{
    note_name, AudioOutput, ClickSink, Config, GridView, MidiOutputDevice, NoteSink, NullSink,
    PlaybackEvent, ScaleKind, Session, TempoMode,
};

#[derive(Parser, Debug)]
#[command(name = "pianoseq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Plays a piano-roll note grid through MIDI or the default audio device", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config dir)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tempo in beats per minute
    #[arg(long)]
    bpm: Option<u32>,

    /// Number of beats in the grid
    #[arg(long)]
    beats: Option<usize>,

    /// Scale used to generate a pattern
    #[arg(long, value_enum)]
    scale: Option<ScaleArg>,

    /// Fill the grid with a random pattern on the scale
    #[arg(short, long)]
    generate: bool,

    /// Notes file to load before playing
    #[arg(short, long, value_name = "FILE")]
    load: Option<PathBuf>,

    /// Write the pattern to a notes file before playing
    #[arg(short, long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// MIDI output port index
    #[arg(long)]
    midi_port: Option<usize>,

    /// List MIDI output ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Run silently
    #[arg(long)]
    no_sound: bool,

    /// Click along on the MIDI percussion channel
    #[arg(long)]
    metronome: bool,

    /// Align beats to the metronome loop
    #[arg(long)]
    cued: bool,

    /// Times to play through the grid
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScaleArg {
    None,
    Major,
    Pentatonic,
}

impl From<ScaleArg> for ScaleKind {
    fn from(arg: ScaleArg) -> Self {
        match arg {
            ScaleArg::None => ScaleKind::None,
            ScaleArg::Major => ScaleKind::Major,
            ScaleArg::Pentatonic => ScaleKind::Pentatonic,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_default().context("failed to load default config")?,
    };

    if let Some(bpm) = cli.bpm {
        config.bpm = bpm;
    }
    if let Some(beats) = cli.beats {
        config.num_beats = beats;
    }
    if let Some(scale) = cli.scale {
        config.scale = scale.into();
    }
    if cli.midi_port.is_some() {
        config.midi_port = cli.midi_port;
    }
    if cli.no_sound {
        config.use_sound = false;
    }
    if cli.cued {
        config.tempo_mode = TempoMode::ExternallyCued;
    }
    Ok(config.validate()?)
}

fn connect_midi(port: usize, channel: u8) -> Option<MidiOutputDevice> {
    let mut device = MidiOutputDevice::new().with_channel(channel);
    match device.connect(port) {
        Ok(()) => Some(device),
        Err(e) => {
            log::warn!("{}", e);
            None
        }
    }
}

/// Picks the note backend. Anything that fails to open degrades to silence.
fn open_outputs(config: &Config) -> (Box<dyn NoteSink>, Box<dyn ClickSink>, Option<AudioOutput>) {
    if !config.use_sound {
        return (Box::new(NullSink), Box::new(NoClick), None);
    }

    if let Some(port) = config.midi_port {
        if let Some(notes) = connect_midi(port, 0) {
            let click: Box<dyn ClickSink> = match connect_midi(port, 0) {
                Some(device) => Box::new(device),
                None => Box::new(NoClick),
            };
            return (Box::new(notes), click, None);
        }
        log::warn!("MIDI port {} unavailable, trying audio output", port);
    }

    match AudioOutput::new() {
        Ok(output) => (Box::new(output.sink()), Box::new(NoClick), Some(output)),
        Err(e) => {
            log::warn!("{}, playing silently", e);
            (Box::new(NullSink), Box::new(NoClick), None)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_ports {
        let ports = MidiOutputDevice::available_ports();
        if ports.is_empty() {
            println!("No MIDI ports available");
        }
        for (index, name) in ports.iter().enumerate() {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    let config = load_config(&cli)?;
    // the audio stream must outlive playback
    let (sink, click, _audio) = open_outputs(&config);
    let mut session = Session::from_config(&config, sink, click);

    if let Some(path) = &cli.load {
        session
            .load_notes(path)
            .with_context(|| format!("failed to load notes from {}", path.display()))?;
    } else if cli.generate {
        if session.scale() == ScaleKind::None {
            log::warn!("--generate needs --scale major or --scale pentatonic");
        } else {
            let placed = session.generate();
            log::info!("generated {} notes on the {} scale", placed, session.scale().name());
        }
    }

    if let Some(path) = &cli.save {
        session
            .save_notes(path)
            .with_context(|| format!("failed to save notes to {}", path.display()))?;
    }

    if cli.loops == 0 || session.num_beats() == 0 {
        return Ok(());
    }

    if cli.metronome {
        session.start_metronome();
    }

    log::info!(
        "playing {} beats x {} loops at {} bpm",
        session.num_beats(),
        cli.loops,
        session.tempo().bpm()
    );
    session.play()?;

    let mut completed = 0;
    while completed < cli.loops {
        thread::sleep(Duration::from_millis(10));
        for event in session.poll_events() {
            match event {
                PlaybackEvent::BeatAdvanced(0) => completed += 1,
                PlaybackEvent::BeatAdvanced(beat) => log::trace!("beat {}", beat),
                PlaybackEvent::NoteOn(note, velocity) => {
                    log::debug!("on  {} ({})", note_name(note), velocity)
                }
                PlaybackEvent::NoteOff(note) => log::debug!("off {}", note_name(note)),
            }
        }
    }

    session.stop()?;
    session.stop_metronome();
    Ok(())
}
