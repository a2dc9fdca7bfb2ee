//! Notes file - one line per active cell, `x: <beat> y: <pitch>`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::sequencer::Grid;

/// Writes every active cell, beat-major. Returns the number of lines.
pub fn write_notes<W: Write>(grid: &Grid, mut writer: W) -> Result<usize> {
    let mut written = 0;
    for (beat, pitch) in grid.active_cells() {
        writeln!(writer, "x: {} y: {}", beat, pitch)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Parses `(beat, pitch)` pairs. Blank lines are skipped; leading
/// whitespace is accepted.
pub fn read_notes<R: BufRead>(reader: R) -> Result<Vec<(usize, usize)>> {
    let mut cells = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        cells.push(parse_line(&line).map_err(|message| Error::NotesFormat {
            line: index + 1,
            message,
        })?);
    }
    Ok(cells)
}

fn parse_line(line: &str) -> std::result::Result<(usize, usize), String> {
    let mut beat = None;
    let mut pitch = None;
    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        let slot = match token {
            "x:" => &mut beat,
            "y:" => &mut pitch,
            other => return Err(format!("unexpected token \"{other}\"")),
        };
        let value = tokens
            .next()
            .ok_or_else(|| format!("missing value after \"{token}\""))?;
        let value = value
            .parse::<usize>()
            .map_err(|e| format!("bad value \"{value}\": {e}"))?;
        *slot = Some(value);
    }
    match (beat, pitch) {
        (Some(beat), Some(pitch)) => Ok((beat, pitch)),
        _ => Err("expected \"x: <beat> y: <pitch>\"".to_string()),
    }
}

pub fn save_notes(grid: &Grid, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let written = write_notes(grid, BufWriter::new(File::create(path)?))?;
    log::info!(target: "persistence", "saved {} notes to {}", written, path.display());
    Ok(written)
}

/// Clears the grid, then activates every cell in the file. Cells outside
/// the grid are skipped with a warning. Returns the number activated.
pub fn load_notes(grid: &mut Grid, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let cells = read_notes(BufReader::new(File::open(path)?))?;

    grid.clear();
    let mut loaded = 0;
    for (beat, pitch) in cells {
        match grid.set_cell(beat, pitch, true) {
            Ok(_) => loaded += 1,
            Err(e) => log::warn!(target: "persistence", "skipping note: {}", e),
        }
    }
    log::info!(target: "persistence", "loaded {} notes from {}", loaded, path.display());
    Ok(loaded)
}
