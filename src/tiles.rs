//! Spatial tiling of the catalogue into a fixed angular grid.
//!
//! The sky is divided into rectangular cells of `tile_deg` degrees on each
//! axis. Right ascension is wrapped into `[0, 360)` before indexing, so the
//! column index is non-negative for any finite input, including negative or
//! oversized values. Declination is shifted by 90 degrees; values inside
//! `[-90, 90)` land in rows `[0, 180/tile_deg)` and exactly `+90` lands in
//! the single boundary row above them.
//!
//! Records keep their original serialized line, so the plain and gzipped
//! outputs of a tile hold identical bytes and rerunning the partition over
//! the same input reproduces every file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

/// Grid cell key. `tx` is the wrapped right-ascension column, `ty` the
/// declination row. `ty` is only negative for declinations below -90, which
/// no normalized record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    pub tx: i32,
    pub ty: i32,
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tx, self.ty)
    }
}

/// Wrap a right ascension in degrees into `[0, 360)`.
///
/// The double modulo maps negative inputs without a branch; the second
/// reduction also catches the rounding case where a tiny negative input
/// lands exactly on 360.
pub fn wrap_ra_deg(ra_deg: f64) -> f64 {
    ((ra_deg % 360.0) + 360.0) % 360.0
}

/// Grid cell for a coordinate pair, for cells of `tile_deg` degrees.
pub fn tile_key(ra_deg: f64, dec_deg: f64, tile_deg: f64) -> TileKey {
    TileKey {
        tx: (wrap_ra_deg(ra_deg) / tile_deg).floor() as i32,
        ty: ((dec_deg + 90.0) / tile_deg).floor() as i32,
    }
}

/// Counters for one partitioning run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TileStats {
    /// Non-empty input lines seen.
    pub lines_read: usize,
    /// Lines that were not valid JSON objects.
    pub bad_json: usize,
    /// Valid objects without usable `ra`/`dec` values.
    pub missing_coords: usize,
}

/// An in-memory partition of catalogue lines into grid cells.
///
/// Insertion order is preserved within each cell; cells iterate in key
/// order, so output is deterministic for a given input.
#[derive(Debug)]
pub struct TilePartition {
    pub tile_deg: f64,
    pub tiles: BTreeMap<TileKey, Vec<String>>,
    pub stats: TileStats,
}

impl TilePartition {
    pub fn new(tile_deg: f64) -> Self {
        Self {
            tile_deg,
            tiles: BTreeMap::new(),
            stats: TileStats::default(),
        }
    }

    /// Assign a single NDJSON line to its cell.
    ///
    /// Blank lines are ignored. Lines that fail to parse, and records whose
    /// `ra` or `dec` is missing or not interpretable as a finite number, are
    /// counted and dropped.
    pub fn insert_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        self.stats.lines_read += 1;

        let record: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => {
                self.stats.bad_json += 1;
                return;
            }
        };

        let ra = record.get("ra").and_then(coord_value);
        let dec = record.get("dec").and_then(coord_value);
        let (Some(ra), Some(dec)) = (ra, dec) else {
            self.stats.missing_coords += 1;
            return;
        };

        let key = tile_key(ra, dec, self.tile_deg);
        self.tiles.entry(key).or_default().push(trimmed.to_string());
    }

    /// Partition every line of a reader.
    pub fn from_reader<R: BufRead>(reader: R, tile_deg: f64) -> Result<Self> {
        let mut partition = Self::new(tile_deg);
        for line in reader.lines() {
            let line = line.context("reading input line")?;
            partition.insert_line(&line);
        }
        Ok(partition)
    }

    /// Partition an NDJSON file.
    pub fn from_path(path: &Path, tile_deg: f64) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::from_reader(BufReader::new(file), tile_deg)
    }

    /// Number of records assigned to cells.
    pub fn record_count(&self) -> usize {
        self.tiles.values().map(Vec::len).sum()
    }

    /// Write every non-empty cell as `<tx>_<ty>.ndjson` plus a gzipped copy
    /// of the same bytes. Existing files for the same keys are overwritten.
    ///
    /// Returns the number of tiles written.
    pub fn write_tiles(&self, out_dir: &Path) -> Result<usize> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating tile directory {}", out_dir.display()))?;

        for (key, lines) in &self.tiles {
            let mut plain = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
            for line in lines {
                plain.push_str(line);
                plain.push('\n');
            }

            let plain_path = out_dir.join(format!("{key}.ndjson"));
            fs::write(&plain_path, plain.as_bytes())
                .with_context(|| format!("writing tile {}", plain_path.display()))?;

            let gz_path = out_dir.join(format!("{key}.ndjson.gz"));
            let gz_file = File::create(&gz_path)
                .with_context(|| format!("creating tile {}", gz_path.display()))?;
            let mut encoder = GzEncoder::new(gz_file, Compression::default());
            encoder
                .write_all(plain.as_bytes())
                .with_context(|| format!("compressing tile {}", gz_path.display()))?;
            encoder
                .finish()
                .with_context(|| format!("finishing tile {}", gz_path.display()))?;
        }

        Ok(self.tiles.len())
    }
}

/// Interpret a JSON value as a finite coordinate. Accepts numbers and
/// numeric strings; everything else, including non-finite values, is None.
fn coord_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    const TILE_DEG: f64 = 4.0;

    fn line(hip: u32, ra: f64, dec: f64) -> String {
        format!(r#"{{"hip":{hip},"ra":{ra},"dec":{dec},"vmag":6.5}}"#)
    }

    #[test]
    fn wrap_covers_all_finite_inputs() {
        let inputs = [
            0.0, 359.999, 360.0, 361.0, 720.25, -0.5, -10.0, -360.0, -719.9, 1.0e9, -1.0e9, -1e-20,
        ];
        for ra in inputs {
            let wrapped = wrap_ra_deg(ra);
            assert!(
                (0.0..360.0).contains(&wrapped),
                "ra {ra} wrapped to {wrapped}"
            );
            let tx = (wrapped / TILE_DEG).floor() as i32;
            assert!((0..90).contains(&tx), "ra {ra} gave tx {tx}");
        }
    }

    #[test]
    fn wrap_examples() {
        assert!((wrap_ra_deg(361.0) - 1.0).abs() < 1e-12);
        assert!((wrap_ra_deg(-10.0) - 350.0).abs() < 1e-12);
        assert_eq!(wrap_ra_deg(0.0), 0.0);
    }

    #[test]
    fn key_for_wrapped_ra() {
        // 361 degrees wraps to 1, column 0.
        assert_eq!(tile_key(361.0, 0.0, TILE_DEG).tx, 0);
        // -10 wraps to 350, column 87; dec -90 sits in row 0.
        let key = tile_key(-10.0, -90.0, TILE_DEG);
        assert_eq!(key, TileKey { tx: 87, ty: 0 });
    }

    #[test]
    fn declination_rows_cover_valid_range() {
        assert_eq!(tile_key(0.0, -90.0, TILE_DEG).ty, 0);
        assert_eq!(tile_key(0.0, -0.01, TILE_DEG).ty, 22);
        assert_eq!(tile_key(0.0, 89.9, TILE_DEG).ty, 44);
        // The north pole itself lands in the boundary row.
        assert_eq!(tile_key(0.0, 90.0, TILE_DEG).ty, 45);

        for tenth in -900..900 {
            let dec = tenth as f64 / 10.0;
            let ty = tile_key(0.0, dec, TILE_DEG).ty;
            assert!((0..45).contains(&ty), "dec {dec} gave ty {ty}");
        }
    }

    #[test]
    fn key_formats_as_filename_stem() {
        assert_eq!(TileKey { tx: 87, ty: 0 }.to_string(), "87_0");
        assert_eq!(TileKey { tx: 3, ty: 45 }.to_string(), "3_45");
    }

    #[test]
    fn partition_assigns_every_valid_record_exactly_once() {
        let mut partition = TilePartition::new(TILE_DEG);
        let mut expected = Vec::new();
        for i in 0..200u32 {
            let ra = (i as f64 * 7.3) - 100.0;
            let dec = ((i as f64 * 1.7) % 180.0) - 90.0;
            let l = line(i, ra, dec);
            expected.push(l.clone());
            partition.insert_line(&l);
        }

        assert_eq!(partition.stats.lines_read, 200);
        assert_eq!(partition.stats.bad_json, 0);
        assert_eq!(partition.stats.missing_coords, 0);
        assert_eq!(partition.record_count(), 200);

        // Union of the cells is the input set, with no duplicates.
        let mut seen: Vec<&String> = partition.tiles.values().flatten().collect();
        assert_eq!(seen.len(), 200);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 200);
        for l in &expected {
            assert!(seen.binary_search(&l).is_ok(), "missing record {l}");
        }

        // Every record sits in the cell its coordinates map to.
        for (key, lines) in &partition.tiles {
            for l in lines {
                let value: Value = serde_json::from_str(l).expect("tile line parses");
                let ra = value["ra"].as_f64().expect("ra");
                let dec = value["dec"].as_f64().expect("dec");
                assert_eq!(tile_key(ra, dec, TILE_DEG), *key);
            }
        }
    }

    #[test]
    fn insertion_order_is_kept_within_a_cell() {
        let mut partition = TilePartition::new(TILE_DEG);
        // All three share a cell; interleave a record from another cell.
        partition.insert_line(&line(1, 0.5, 0.5));
        partition.insert_line(&line(9, 200.0, -50.0));
        partition.insert_line(&line(2, 1.5, 1.5));
        partition.insert_line(&line(3, 2.5, 2.5));

        let key = tile_key(0.5, 0.5, TILE_DEG);
        let hips: Vec<u32> = partition.tiles[&key]
            .iter()
            .map(|l| {
                let value: Value = serde_json::from_str(l).expect("line parses");
                value["hip"].as_u64().expect("hip") as u32
            })
            .collect();
        assert_eq!(hips, vec![1, 2, 3]);
    }

    #[test]
    fn malformed_and_incomplete_lines_are_dropped() {
        let mut partition = TilePartition::new(TILE_DEG);
        partition.insert_line("{ not json");
        partition.insert_line("");
        partition.insert_line(r#"{"hip": 1}"#);
        partition.insert_line(r#"{"hip": 2, "ra": 10.0}"#);
        partition.insert_line(r#"{"hip": 3, "ra": "abc", "dec": 5.0}"#);
        partition.insert_line(r#"{"hip": 4, "ra": null, "dec": 5.0}"#);
        partition.insert_line(r#"{"hip": 5, "ra": "12.5", "dec": "-45.25"}"#);

        assert_eq!(partition.stats.lines_read, 6);
        assert_eq!(partition.stats.bad_json, 1);
        assert_eq!(partition.stats.missing_coords, 4);
        assert_eq!(partition.record_count(), 1);
        // Numeric strings are accepted.
        let key = tile_key(12.5, -45.25, TILE_DEG);
        assert_eq!(partition.tiles[&key].len(), 1);
    }

    #[test]
    fn written_tiles_round_trip_through_gzip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut partition = TilePartition::new(TILE_DEG);
        for i in 0..50u32 {
            partition.insert_line(&line(i, i as f64 * 11.0, (i as f64 * 3.0) - 60.0));
        }

        let written = partition.write_tiles(dir.path()).expect("writing tiles");
        assert_eq!(written, partition.tiles.len());

        for (key, lines) in &partition.tiles {
            let plain_path = dir.path().join(format!("{key}.ndjson"));
            let plain = fs::read(&plain_path).expect("reading plain tile");

            let expected: String = lines.iter().map(|l| format!("{l}\n")).collect();
            assert_eq!(plain, expected.as_bytes());

            let gz_path = dir.path().join(format!("{key}.ndjson.gz"));
            let gz_file = File::open(&gz_path).expect("opening gz tile");
            let mut decoder = flate2::read::GzDecoder::new(gz_file);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .expect("decompressing tile");
            assert_eq!(decompressed, plain, "gzip mismatch for tile {key}");
        }
    }

    #[test]
    fn rerunning_the_partition_is_deterministic() {
        let input: String = (0..120u32)
            .map(|i| line(i, (i as f64 * 13.7) - 40.0, ((i as f64 * 2.3) % 180.0) - 90.0) + "\n")
            .collect();

        let first = TilePartition::from_reader(input.as_bytes(), TILE_DEG).expect("first run");
        let second = TilePartition::from_reader(input.as_bytes(), TILE_DEG).expect("second run");
        assert_eq!(first.tiles, second.tiles);
        assert_eq!(first.stats, second.stats);

        let dir_a = tempfile::tempdir().expect("tempdir");
        let dir_b = tempfile::tempdir().expect("tempdir");
        first.write_tiles(dir_a.path()).expect("writing first");
        second.write_tiles(dir_b.path()).expect("writing second");

        for key in first.tiles.keys() {
            for suffix in ["ndjson", "ndjson.gz"] {
                let a = fs::read(dir_a.path().join(format!("{key}.{suffix}"))).expect("tile a");
                let b = fs::read(dir_b.path().join(format!("{key}.{suffix}"))).expect("tile b");
                assert_eq!(a, b, "rerun differs for {key}.{suffix}");
            }
        }
    }

    #[test]
    fn overwrites_existing_tiles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut partition = TilePartition::new(TILE_DEG);
        partition.insert_line(&line(1, 0.5, 0.5));
        let key = tile_key(0.5, 0.5, TILE_DEG);

        let stale = dir.path().join(format!("{key}.ndjson"));
        fs::write(&stale, b"stale contents\n").expect("writing stale tile");

        partition.write_tiles(dir.path()).expect("writing tiles");
        let fresh = fs::read_to_string(&stale).expect("reading tile");
        assert!(fresh.contains("\"hip\":1"));
        assert!(!fresh.contains("stale"));
    }
}
