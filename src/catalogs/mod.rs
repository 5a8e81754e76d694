//! Star catalogue records and derived physical quantities.
//!
//! A [`StarRecord`] is one row of the pipeline's working catalogue. The raw
//! fields come from the Hipparcos main catalogue; the derived fields
//! (`dist_pc`, `absmag`, `temp_k`) are filled in by [`StarRecord::recompute_derived`]
//! and each stay `None` when their inputs are missing or unphysical.

pub mod hipparcos;
pub mod simbad;

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A single star, as written to NDJSON and CSV.
///
/// Field order matches the serialized column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarRecord {
    pub hip: u32,
    pub ra: f64,
    pub dec: f64,
    #[serde(default)]
    pub dist_pc: Option<f64>,
    #[serde(default)]
    pub vmag: Option<f64>,
    #[serde(default)]
    pub plx: Option<f64>,
    #[serde(default)]
    pub bv: Option<f64>,
    #[serde(default)]
    pub sp_type: Option<String>,
    #[serde(default)]
    pub absmag: Option<f64>,
    #[serde(default)]
    pub temp_k: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl StarRecord {
    /// Recompute `dist_pc`, `absmag` and `temp_k` from the raw fields.
    ///
    /// Each derived field is independently nullable: distance requires a
    /// strictly positive parallax, absolute magnitude requires both a
    /// distance and an apparent magnitude, temperature requires a usable
    /// color index.
    pub fn recompute_derived(&mut self) {
        self.dist_pc = self.plx.and_then(distance_pc);
        self.absmag = match (self.vmag, self.dist_pc) {
            (Some(vmag), Some(dist)) => absolute_magnitude(vmag, dist),
            _ => None,
        };
        self.temp_k = self.bv.and_then(ballesteros_temp_k);
    }
}

/// Distance in parsecs from a parallax in milliarcseconds.
///
/// Undefined (`None`) for missing, non-positive or non-finite parallax.
pub fn distance_pc(plx_mas: f64) -> Option<f64> {
    if plx_mas.is_finite() && plx_mas > 0.0 {
        Some(1000.0 / plx_mas)
    } else {
        None
    }
}

/// Absolute magnitude `M = m - 5 * (log10(d) - 1)` for a distance in parsecs.
pub fn absolute_magnitude(vmag: f64, dist_pc: f64) -> Option<f64> {
    if vmag.is_finite() && dist_pc.is_finite() && dist_pc > 0.0 {
        Some(vmag - 5.0 * (dist_pc.log10() - 1.0))
    } else {
        None
    }
}

/// Effective temperature in Kelvin from a B-V color index, using the
/// Ballesteros approximation.
pub fn ballesteros_temp_k(bv: f64) -> Option<f64> {
    if !bv.is_finite() {
        return None;
    }
    let temp = 4600.0 * (1.0 / (0.92 * bv + 1.7) + 1.0 / (0.92 * bv + 0.62));
    if temp.is_finite() {
        Some(temp)
    } else {
        None
    }
}

/// Write records as CSV with one header row, creating parent directories.
///
/// Missing optional fields serialize as empty cells.
pub fn write_csv(path: &Path, records: &[StarRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV file {}", path.display()))?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("writing CSV row for HIP {}", record.hip))?;
    }
    writer.flush().context("flushing CSV output")?;
    Ok(())
}

static HTTP_AGENT: OnceLock<ureq::Agent> = OnceLock::new();

/// Shared blocking HTTP agent, reused across catalogue and name lookups.
pub(crate) fn http_agent() -> &'static ureq::Agent {
    HTTP_AGENT.get_or_init(ureq::Agent::new_with_defaults)
}
