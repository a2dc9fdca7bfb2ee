/// Random pattern generation constrained to a scale.
use std::ops::Range;

use rand::Rng;

use super::scale::{is_on_scale, ScaleKind};
use super::Grid;

/// The seven octave bands a generated pattern may occupy. Each spans twelve
/// pitch offsets; together they cover `[3, 87)`.
pub const PITCH_BANDS: [Range<usize>; 7] = [
    3..15,
    15..27,
    27..39,
    39..51,
    51..63,
    63..75,
    75..87,
];

/// Picks one band for the whole pattern, then draws one pitch per beat.
/// A draw that falls off the scale leaves that beat silent; there is no
/// retry. Existing cells are not cleared.
///
/// Returns the number of cells activated. `ScaleKind::None` generates
/// nothing.
pub fn generate<R: Rng + ?Sized>(grid: &mut Grid, kind: ScaleKind, rng: &mut R) -> usize {
    if kind == ScaleKind::None {
        return 0;
    }

    let band = PITCH_BANDS[rng.random_range(0..PITCH_BANDS.len())].clone();
    log::debug!(target: "generator", "generating {:?} pattern in band {:?}", kind, band);

    let mut placed = 0;
    for beat in 0..grid.num_beats() {
        let pitch = rng.random_range(band.clone());
        if is_on_scale(pitch, kind) && grid.set_cell(beat, pitch, true).is_ok() {
            placed += 1;
        }
    }
    placed
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn band_of(grid: &Grid) -> Option<usize> {
        let (_, pitch) = grid.active_cells().next()?;
        PITCH_BANDS.iter().position(|band| band.contains(&pitch))
    }

    #[test]
    fn test_bands_cover_range() {
        assert_eq!(PITCH_BANDS[0].start, 3);
        assert_eq!(PITCH_BANDS[6].end, 87);
        for pair in PITCH_BANDS.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert_eq!(pair[0].len(), 12);
        }
    }

    #[test]
    fn test_generated_cells_are_on_scale() {
        for kind in [ScaleKind::Major, ScaleKind::Pentatonic] {
            let mut rng = StdRng::seed_from_u64(7);
            let mut grid = Grid::new(128);
            generate(&mut grid, kind, &mut rng);
            for (_, pitch) in grid.active_cells() {
                assert!(is_on_scale(pitch, kind));
            }
        }
    }

    #[test]
    fn test_at_most_one_note_per_beat_within_one_band() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut grid = Grid::new(128);
        let placed = generate(&mut grid, ScaleKind::Major, &mut rng);
        assert_eq!(placed, grid.active_count());

        let band = &PITCH_BANDS[band_of(&grid).unwrap()];
        for beat in 0..grid.num_beats() {
            let pitches: Vec<_> = grid.active_pitches(beat).collect();
            assert!(pitches.len() <= 1);
            assert!(pitches.iter().all(|p| band.contains(p)));
        }
    }

    #[test]
    fn test_some_beats_left_silent() {
        // 7 of 12 classes are major, so across 128 beats some draws miss
        let mut rng = StdRng::seed_from_u64(3);
        let mut grid = Grid::new(128);
        let placed = generate(&mut grid, ScaleKind::Major, &mut rng);
        assert!(placed > 0);
        assert!(placed < 128);
    }

    #[test]
    fn test_none_scale_is_noop() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut grid = Grid::new(16);
        assert_eq!(generate(&mut grid, ScaleKind::None, &mut rng), 0);
        assert_eq!(grid.active_count(), 0);
    }

    #[test]
    fn test_does_not_clear_existing_cells() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut grid = Grid::new(16);
        grid.set_cell(0, 0, true).unwrap();
        generate(&mut grid, ScaleKind::Pentatonic, &mut rng);
        assert!(grid.is_active(0, 0));
    }

    #[test]
    fn test_empty_grid() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut grid = Grid::new(0);
        assert_eq!(generate(&mut grid, ScaleKind::Major, &mut rng), 0);
    }
}
