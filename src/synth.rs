//! Synthetic star generation.
//!
//! New records are minted by perturbing randomly chosen existing records,
//! starting from the first free HIP number above a configured threshold.
//! The run is deterministic for a fixed seed.

use std::collections::HashSet;

use anyhow::{bail, Result};
use rand::rngs::SmallRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::catalogs::{absolute_magnitude, ballesteros_temp_k, distance_pc};
use crate::tiles::wrap_ra_deg;
use crate::StarRecord;

#[derive(Debug, Clone)]
pub struct SynthConfig {
    /// Number of synthetic records to create.
    pub num_new: usize,
    /// Candidate HIP numbers start just above this value.
    pub start_after_hip: u32,
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            num_new: 10_000,
            start_after_hip: 50,
            seed: 42,
        }
    }
}

struct Perturbations {
    ra_jitter: Normal<f64>,
    dec_jitter: Normal<f64>,
    log_dist_factor: Normal<f64>,
    vmag_jitter: Normal<f64>,
    vmag_fresh: Normal<f64>,
    bv_jitter: Normal<f64>,
    bv_fresh: Normal<f64>,
}

impl Perturbations {
    fn new() -> Self {
        Self {
            ra_jitter: Normal::new(0.0, 5.0).unwrap(),
            dec_jitter: Normal::new(0.0, 3.0).unwrap(),
            log_dist_factor: Normal::new(0.0, 0.25).unwrap(),
            vmag_jitter: Normal::new(0.0, 0.7).unwrap(),
            vmag_fresh: Normal::new(8.0, 2.5).unwrap(),
            bv_jitter: Normal::new(0.0, 0.15).unwrap(),
            bv_fresh: Normal::new(0.65, 0.5).unwrap(),
        }
    }
}

/// Generate `num_new` synthetic records from the base catalogue.
///
/// Candidate HIP numbers are walked upward from `start_after_hip + 1`,
/// skipping any already present in the base set, with an iteration guard of
/// five times the requested count.
pub fn synthesize(base: &[StarRecord], config: &SynthConfig) -> Result<Vec<StarRecord>> {
    let mut existing: HashSet<u32> = base.iter().map(|r| r.hip).collect();

    // One template per distinct HIP, in catalogue order.
    let mut seen = HashSet::new();
    let templates: Vec<&StarRecord> = base.iter().filter(|r| seen.insert(r.hip)).collect();
    if templates.is_empty() {
        bail!("no template stars available to synthesize from");
    }

    let mut rng = SmallRng::seed_from_u64(config.seed);
    let perturb = Perturbations::new();

    let mut new_records = Vec::with_capacity(config.num_new);
    let max_iterations = config.num_new.saturating_mul(5);
    let mut iterations = 0usize;
    let mut candidate = config.start_after_hip.saturating_add(1);

    while new_records.len() < config.num_new && iterations < max_iterations {
        iterations += 1;
        let hip = candidate;
        candidate = candidate.saturating_add(1);
        if existing.contains(&hip) {
            continue;
        }

        let template = templates.choose(&mut rng).copied().unwrap_or(templates[0]);
        let record = perturb_from_template(template, hip, &perturb, &mut rng);
        existing.insert(hip);
        new_records.push(record);
    }

    tracing::info!(
        "created {} synthetic stars in {iterations} iterations",
        new_records.len()
    );
    Ok(new_records)
}

fn perturb_from_template(
    template: &StarRecord,
    hip: u32,
    perturb: &Perturbations,
    rng: &mut SmallRng,
) -> StarRecord {
    let ra = wrap_ra_deg(template.ra + perturb.ra_jitter.sample(rng));
    let dec = (template.dec + perturb.dec_jitter.sample(rng)).clamp(-90.0, 90.0);

    // Distance: multiplicative log-normal jitter around the template, or a
    // skewed draw over roughly 1..5000 pc when the template has none.
    let dist_pc_sampled = match template.dist_pc {
        Some(dist) if dist > 0.0 => {
            let factor = 10f64.powf(perturb.log_dist_factor.sample(rng));
            (dist * factor).max(1.0)
        }
        _ => 10f64.powf(rng.random_range(0.0..3.7)),
    };
    let plx = 1000.0 / dist_pc_sampled;

    let vmag = match template.vmag {
        Some(v) => (v + perturb.vmag_jitter.sample(rng)).max(-2.0),
        None => perturb.vmag_fresh.sample(rng).clamp(-2.0, 18.0),
    };

    let bv = match template.bv {
        Some(b) => b + perturb.bv_jitter.sample(rng),
        None => perturb.bv_fresh.sample(rng),
    }
    .clamp(-0.5, 2.0);

    let dist_pc = distance_pc(plx);
    StarRecord {
        hip,
        ra,
        dec,
        dist_pc,
        vmag: Some(vmag),
        plx: Some(plx),
        bv: Some(bv),
        sp_type: None,
        absmag: dist_pc.and_then(|d| absolute_magnitude(vmag, d)),
        temp_k: ballesteros_temp_k(bv),
        name: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star(hip: u32, ra: f64, dec: f64) -> StarRecord {
        let mut record = StarRecord {
            hip,
            ra,
            dec,
            dist_pc: None,
            vmag: Some(7.2),
            plx: Some(12.0),
            bv: Some(0.6),
            sp_type: Some("G0".to_string()),
            absmag: None,
            temp_k: None,
            name: None,
        };
        record.recompute_derived();
        record
    }

    fn base() -> Vec<StarRecord> {
        (1..=40).map(|i| star(i, i as f64 * 9.0, -30.0)).collect()
    }

    #[test]
    fn generates_requested_count_with_fresh_ids() {
        let base = base();
        let config = SynthConfig {
            num_new: 100,
            start_after_hip: 20,
            seed: 42,
        };
        let new = synthesize(&base, &config).expect("synthesizing");
        assert_eq!(new.len(), 100);

        let base_ids: HashSet<u32> = base.iter().map(|r| r.hip).collect();
        let mut new_ids = HashSet::new();
        for record in &new {
            assert!(record.hip > config.start_after_hip);
            assert!(!base_ids.contains(&record.hip), "collided on {}", record.hip);
            assert!(new_ids.insert(record.hip), "duplicate id {}", record.hip);
        }
        // Ids 21..=40 exist in the base, so the first fresh id is 41.
        assert_eq!(new.iter().map(|r| r.hip).min(), Some(41));
    }

    #[test]
    fn deterministic_for_a_fixed_seed() {
        let base = base();
        let config = SynthConfig {
            num_new: 50,
            start_after_hip: 50,
            seed: 7,
        };
        let a = synthesize(&base, &config).expect("first run");
        let b = synthesize(&base, &config).expect("second run");
        assert_eq!(a, b);

        let other = synthesize(
            &base,
            &SynthConfig {
                seed: 8,
                ..config.clone()
            },
        )
        .expect("different seed");
        assert_ne!(a, other);
    }

    #[test]
    fn perturbed_fields_stay_in_physical_ranges() {
        let base = base();
        let config = SynthConfig {
            num_new: 500,
            start_after_hip: 100,
            seed: 3,
        };
        let new = synthesize(&base, &config).expect("synthesizing");
        for record in &new {
            assert!((0.0..360.0).contains(&record.ra), "ra {}", record.ra);
            assert!((-90.0..=90.0).contains(&record.dec), "dec {}", record.dec);
            let plx = record.plx.expect("parallax");
            assert!(plx > 0.0);
            let dist = record.dist_pc.expect("distance");
            assert!(dist >= 1.0 - 1e-9, "dist {dist}");
            let vmag = record.vmag.expect("vmag");
            assert!(vmag >= -2.0);
            let bv = record.bv.expect("bv");
            assert!((-0.5..=2.0).contains(&bv));
            assert!(record.absmag.is_some());
            assert!(record.sp_type.is_none());
        }
    }

    #[test]
    fn derived_fields_match_perturbed_inputs() {
        let base = base();
        let config = SynthConfig {
            num_new: 20,
            start_after_hip: 1000,
            seed: 11,
        };
        let new = synthesize(&base, &config).expect("synthesizing");
        for record in &new {
            let mut recomputed = record.clone();
            recomputed.recompute_derived();
            assert_eq!(&recomputed, record);
        }
    }

    #[test]
    fn empty_base_is_an_error() {
        let config = SynthConfig::default();
        assert!(synthesize(&[], &config).is_err());
    }

    #[test]
    fn iteration_guard_bounds_a_crowded_id_space() {
        // Base occupies ids 1..=40; ask to start inside the occupied range.
        let base = base();
        let config = SynthConfig {
            num_new: 10,
            start_after_hip: 0,
            seed: 42,
        };
        let new = synthesize(&base, &config).expect("synthesizing");
        assert_eq!(new.len(), 10);
        assert_eq!(new.iter().map(|r| r.hip).min(), Some(41));
    }
}
