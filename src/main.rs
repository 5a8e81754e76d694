use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::info;

use starpipe::catalogs::hipparcos::{normalize_table, CatalogSource};
use starpipe::catalogs::simbad::NameSource;
use starpipe::catalogs::write_csv;
use starpipe::enrich::{apply_names, lookup_missing, LookupConfig, NameCache};
use starpipe::synth::{synthesize, SynthConfig};
use starpipe::{ndjson, StarRecord, TilePartition, DEFAULT_TILE_DEG};

/// Seed for the sample drawn from the normalized catalogue.
const SAMPLE_SEED: u64 = 42;

#[derive(Parser)]
#[command(name = "starpipe", about = "Hipparcos catalogue batch pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the Hipparcos main catalogue from VizieR and normalize it.
    Fetch {
        /// Output path for the normalized NDJSON catalogue.
        #[arg(long, default_value = "output/hipparcos.ndjson")]
        out: PathBuf,

        /// Output path for the normalized CSV snapshot.
        #[arg(long, default_value = "output/hipparcos.csv")]
        csv: PathBuf,

        /// Output path for a random sample of the catalogue.
        #[arg(long, default_value = "data/hipparcos_sample.ndjson")]
        sample: PathBuf,

        /// Number of records in the sample.
        #[arg(long, default_value = "5000")]
        sample_size: usize,
    },

    /// Cross-match SIMBAD names onto the catalogue, with a local cache.
    Enrich {
        /// Input NDJSON catalogue.
        #[arg(long, default_value = "output/hipparcos.ndjson")]
        input: PathBuf,

        /// Output NDJSON catalogue with names.
        #[arg(long, default_value = "output/hipparcos.with_names.ndjson")]
        out: PathBuf,

        /// JSON cache of previous lookups.
        #[arg(long, default_value = "output/names_cache.json")]
        cache: PathBuf,

        /// Output path for a small named sample.
        #[arg(long, default_value = "data/hipparcos_sample_named.ndjson")]
        sample: PathBuf,

        /// Number of records in the named sample.
        #[arg(long, default_value = "50")]
        sample_size: usize,

        /// Delay between lookup batches, in seconds.
        #[arg(long, default_value = "1.0")]
        delay: f64,

        /// Identifiers per lookup batch.
        #[arg(long, default_value = "50")]
        batch: usize,
    },

    /// Generate synthetic stars by perturbing existing records.
    Synth {
        /// Input NDJSON catalogue.
        #[arg(long, default_value = "output/hipparcos.ndjson")]
        input: PathBuf,

        /// Fallback input when the full catalogue is absent.
        #[arg(long, default_value = "data/hipparcos_sample.ndjson")]
        fallback: PathBuf,

        /// Output path for the new records only.
        #[arg(long, default_value = "data/hipparcos_synth.ndjson")]
        out_new: PathBuf,

        /// Output path for the augmented catalogue (input plus new records).
        #[arg(long, default_value = "output/hipparcos_augmented.ndjson")]
        out_augmented: PathBuf,

        /// Number of synthetic records to create.
        #[arg(long, default_value = "10000")]
        num_new: usize,

        /// New HIP numbers start just above this value.
        #[arg(long, default_value = "50")]
        start_after_hip: u32,

        /// Random seed.
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Partition the catalogue into fixed-size sky tiles.
    Tile {
        /// Input NDJSON catalogue.
        #[arg(long, default_value = "output/hipparcos.ndjson")]
        input: PathBuf,

        /// Directory receiving the tile files.
        #[arg(long, default_value = "data/tiles")]
        out_dir: PathBuf,

        /// Grid cell size in degrees.
        #[arg(long, default_value = "4.0")]
        tile_deg: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Fetch {
            out,
            csv,
            sample,
            sample_size,
        } => cmd_fetch(&out, &csv, &sample, sample_size),
        Commands::Enrich {
            input,
            out,
            cache,
            sample,
            sample_size,
            delay,
            batch,
        } => cmd_enrich(&input, &out, &cache, &sample, sample_size, delay, batch),
        Commands::Synth {
            input,
            fallback,
            out_new,
            out_augmented,
            num_new,
            start_after_hip,
            seed,
        } => cmd_synth(
            &input,
            &fallback,
            &out_new,
            &out_augmented,
            SynthConfig {
                num_new,
                start_after_hip,
                seed,
            },
        ),
        Commands::Tile {
            input,
            out_dir,
            tile_deg,
        } => cmd_tile(&input, &out_dir, tile_deg),
    }
}

fn cmd_fetch(out: &Path, csv: &Path, sample: &Path, sample_size: usize) -> Result<()> {
    let table = CatalogSource::vizier().fetch_table()?;
    info!("fetched {} raw catalogue rows", table.len());

    let (records, dropped) = normalize_table(&table)?;
    info!("normalized {} records ({dropped} dropped)", records.len());
    if records.is_empty() {
        bail!("no usable records in the catalogue response");
    }

    write_csv(csv, &records)?;
    info!("saved CSV to {}", csv.display());

    ndjson::write_records(out, &records)?;
    info!("saved NDJSON to {}", out.display());

    let mut rng = SmallRng::seed_from_u64(SAMPLE_SEED);
    let count = sample_size.min(records.len());
    let picks = rand::seq::index::sample(&mut rng, records.len(), count);
    let sampled: Vec<&StarRecord> = picks.iter().map(|i| &records[i]).collect();
    ndjson::write_records(sample, &sampled)?;
    info!("saved {count}-record sample to {}", sample.display());

    Ok(())
}

fn cmd_enrich(
    input: &Path,
    out: &Path,
    cache_path: &Path,
    sample: &Path,
    sample_size: usize,
    delay: f64,
    batch: usize,
) -> Result<()> {
    let (mut records, skipped) = ndjson::read_records::<StarRecord>(input)
        .with_context(|| format!("reading {}", input.display()))?;
    info!(
        "loaded {} records from {} ({skipped} lines skipped)",
        records.len(),
        input.display()
    );

    let mut hips: Vec<u32> = records.iter().map(|r| r.hip).collect();
    hips.sort_unstable();
    hips.dedup();
    info!("{} distinct HIP identifiers", hips.len());

    let mut cache = NameCache::load(cache_path);
    info!("loaded {} cached name entries", cache.len());

    let config = LookupConfig {
        batch_size: batch,
        delay_s: delay,
    };
    let queried = lookup_missing(&mut cache, &hips, &NameSource::simbad(), &config)?;
    if queried > 0 {
        cache.save(cache_path)?;
        info!(
            "looked up {queried} identifiers; cache now holds {} entries",
            cache.len()
        );
    } else {
        info!("all identifiers already cached");
    }

    apply_names(&mut records, &cache);
    let named = records.iter().filter(|r| r.name.is_some()).count();
    info!("{named} of {} records have names", records.len());

    ndjson::write_records(out, &records)?;
    info!("saved NDJSON to {}", out.display());

    let head: Vec<&StarRecord> = records.iter().take(sample_size).collect();
    ndjson::write_records(sample, &head)?;
    info!("saved {}-record sample to {}", head.len(), sample.display());

    Ok(())
}

fn cmd_synth(
    input: &Path,
    fallback: &Path,
    out_new: &Path,
    out_augmented: &Path,
    config: SynthConfig,
) -> Result<()> {
    let source = if input.exists() {
        input
    } else if fallback.exists() {
        fallback
    } else {
        bail!(
            "no input NDJSON found at {} or {}; run the fetch stage first",
            input.display(),
            fallback.display()
        );
    };

    let (base, skipped) = ndjson::read_records::<StarRecord>(source)
        .with_context(|| format!("reading {}", source.display()))?;
    info!(
        "loaded {} base records from {} ({skipped} lines skipped)",
        base.len(),
        source.display()
    );

    let new_records = synthesize(&base, &config)?;

    ndjson::write_records(out_new, &new_records)?;
    info!(
        "saved {} new records to {}",
        new_records.len(),
        out_new.display()
    );

    let augmented: Vec<&StarRecord> = base.iter().chain(new_records.iter()).collect();
    ndjson::write_records(out_augmented, &augmented)?;
    info!(
        "saved augmented catalogue ({} records) to {}",
        augmented.len(),
        out_augmented.display()
    );

    Ok(())
}

fn cmd_tile(input: &Path, out_dir: &Path, tile_deg: f64) -> Result<()> {
    if !(tile_deg > 0.0) {
        bail!("tile size must be positive, got {tile_deg}");
    }
    if (tile_deg - DEFAULT_TILE_DEG).abs() > f64::EPSILON {
        info!("using non-default tile size of {tile_deg} degrees");
    }

    let partition = TilePartition::from_path(input, tile_deg)?;
    info!(
        "read {} lines from {}: {} records, {} bad json, {} missing coordinates",
        partition.stats.lines_read,
        input.display(),
        partition.record_count(),
        partition.stats.bad_json,
        partition.stats.missing_coords
    );

    let written = partition.write_tiles(out_dir)?;
    info!("wrote {written} tiles to {}", out_dir.display());

    Ok(())
}
