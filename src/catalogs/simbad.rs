//! Name resolution against the SIMBAD script service.
//!
//! Identifiers are looked up in batches of `HIP <n>` queries through the
//! sim-script endpoint. Each result row carries the canonical `MAIN_ID` and
//! the full cross-identification list; rows are keyed back to the requested
//! HIP number by scanning that list. A row that cannot be keyed is assigned
//! to the first identifier of the batch, a best-effort fallback that callers
//! must not rely on for per-identifier accuracy.

use std::collections::HashMap;
use std::io::Read;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::http_agent;

pub const SIMBAD_SCRIPT_ENDPOINT: &str = "https://simbad.cds.unistra.fr/simbad/sim-script";

/// Attempts per batch before the error propagates.
const RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// One cached cross-match result. `main_id` is `None` for a negative match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameEntry {
    pub main_id: Option<String>,
    pub ids: Vec<String>,
}

/// Cache key for a HIP identifier.
pub fn hip_key(hip: u32) -> String {
    format!("HIP:{hip}")
}

/// Where name lookups are answered from.
///
/// `Preloaded` resolves from a fixed map, for tests and offline use.
#[derive(Debug, Clone)]
pub enum NameSource {
    Simbad { endpoint: String },
    Preloaded { entries: HashMap<u32, NameEntry> },
}

impl Default for NameSource {
    fn default() -> Self {
        Self::simbad()
    }
}

impl NameSource {
    pub fn simbad() -> Self {
        NameSource::Simbad {
            endpoint: SIMBAD_SCRIPT_ENDPOINT.to_string(),
        }
    }

    pub fn preloaded(entries: HashMap<u32, NameEntry>) -> Self {
        NameSource::Preloaded { entries }
    }

    /// Look up one batch of HIP identifiers.
    ///
    /// Returns entries keyed as `"HIP:<n>"`. Identifiers without a match are
    /// simply absent; an empty map means the whole batch came back empty.
    /// Remote failures are retried a fixed number of times, then propagate.
    pub fn query_batch(&self, hips: &[u32]) -> Result<HashMap<String, NameEntry>> {
        match self {
            NameSource::Simbad { endpoint } => {
                let script = build_script(hips);
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    match query_sim_script(endpoint, &script) {
                        Ok(body) => return Ok(parse_sim_script(&body, hips)),
                        Err(err) if attempt < RETRIES => {
                            tracing::warn!("SIMBAD query attempt {attempt} failed: {err:#}");
                            thread::sleep(RETRY_DELAY);
                        }
                        Err(err) => {
                            return Err(err).with_context(|| {
                                format!("SIMBAD lookup failed after {RETRIES} attempts")
                            });
                        }
                    }
                }
            }
            NameSource::Preloaded { entries } => {
                let mut out = HashMap::new();
                for &hip in hips {
                    if let Some(entry) = entries.get(&hip) {
                        out.insert(hip_key(hip), entry.clone());
                    }
                }
                Ok(out)
            }
        }
    }
}

fn build_script(hips: &[u32]) -> String {
    let mut script = String::from(
        "output console=off script=off\nformat object \"%MAIN_ID\\t%IDLIST[%*|]\"\n",
    );
    for hip in hips {
        script.push_str(&format!("query id HIP {hip}\n"));
    }
    script
}

fn query_sim_script(endpoint: &str, script: &str) -> Result<String> {
    let response = http_agent()
        .get(endpoint)
        .query("script", script)
        .call()
        .with_context(|| format!("querying SIMBAD at {endpoint}"))?;

    if response.status() != 200 {
        bail!("SIMBAD returned HTTP status {}", response.status());
    }

    let mut body = String::new();
    response
        .into_body()
        .into_reader()
        .read_to_string(&mut body)
        .context("reading SIMBAD response body")?;
    Ok(body)
}

/// Parse a sim-script response body.
///
/// Result rows follow a `::data::` marker, one object per line as
/// `MAIN_ID<tab>id1|id2|...`. Error sections and anything outside the data
/// block are ignored.
fn parse_sim_script(body: &str, batch: &[u32]) -> HashMap<String, NameEntry> {
    let mut out = HashMap::new();
    let mut in_data = false;

    for line in body.lines() {
        if line.starts_with("::data") {
            in_data = true;
            continue;
        }
        if line.starts_with("::") {
            in_data = false;
            continue;
        }
        if !in_data || line.trim().is_empty() {
            continue;
        }

        let (main_raw, ids_raw) = match line.split_once('\t') {
            Some((main, ids)) => (main.trim(), ids),
            None => (line.trim(), ""),
        };
        let ids = split_id_list(ids_raw);

        let key = ids
            .iter()
            .find_map(|token| hip_number(token))
            .map(hip_key)
            // Unkeyable rows fall back to the first identifier of the batch.
            .or_else(|| batch.first().copied().map(hip_key));
        let Some(key) = key else { continue };

        let main_id = if main_raw.is_empty() {
            None
        } else {
            Some(main_raw.to_string())
        };
        out.insert(key, NameEntry { main_id, ids });
    }

    out
}

/// Split an identifier list on `|`, or on `;` when no pipe is present.
fn split_id_list(raw: &str) -> Vec<String> {
    let separator = if raw.contains('|') { '|' } else { ';' };
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extract the number from a `HIP <n>` style token.
pub fn hip_number(token: &str) -> Option<u32> {
    let compact: String = token.chars().filter(|c| !c.is_whitespace()).collect();
    let prefix = compact.get(..3)?;
    if !prefix.eq_ignore_ascii_case("HIP") {
        return None;
    }
    compact.get(3..)?.parse::<u32>().ok()
}
