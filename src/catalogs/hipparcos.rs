//! Hipparcos main catalogue access via the VizieR tab-separated service.
//!
//! The ASU TSV endpoint returns `#`-prefixed comment lines, a tab-separated
//! header, a dash ruler, then one record per line with empty fields for
//! missing values. Normalization coerces the raw text fields, applies the
//! derived-quantity rules and drops rows that are unusable downstream.

use std::io::Read;

use anyhow::{bail, Context, Result};

use super::{http_agent, StarRecord};

pub const VIZIER_TSV_ENDPOINT: &str = "https://vizier.cds.unistra.fr/viz-bin/asu-tsv";
pub const HIPPARCOS_CATALOG: &str = "I/239/hip_main";

/// Columns requested from the main catalogue.
const QUERY_COLUMNS: &str = "HIP,RAICRS,DEICRS,Plx,Vmag,B-V,SpType";

/// Where the raw catalogue table comes from.
///
/// `Preloaded` carries a TSV payload directly, for tests and offline use.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    Vizier { endpoint: String, catalog: String },
    Preloaded { tsv: String },
}

impl Default for CatalogSource {
    fn default() -> Self {
        Self::vizier()
    }
}

impl CatalogSource {
    /// VizieR source with the default CDS endpoint and catalogue id.
    pub fn vizier() -> Self {
        CatalogSource::Vizier {
            endpoint: VIZIER_TSV_ENDPOINT.to_string(),
            catalog: HIPPARCOS_CATALOG.to_string(),
        }
    }

    pub fn preloaded(tsv: impl Into<String>) -> Self {
        CatalogSource::Preloaded { tsv: tsv.into() }
    }

    /// Fetch and parse the raw catalogue table.
    pub fn fetch_table(&self) -> Result<RawTable> {
        match self {
            CatalogSource::Vizier { endpoint, catalog } => {
                let tsv = query_vizier_tsv(endpoint, catalog)?;
                parse_asu_tsv(&tsv)
            }
            CatalogSource::Preloaded { tsv } => parse_asu_tsv(tsv),
        }
    }
}

fn query_vizier_tsv(endpoint: &str, catalog: &str) -> Result<String> {
    tracing::info!("querying VizieR for {catalog}");
    let response = http_agent()
        .get(endpoint)
        .query("-source", catalog)
        .query("-out", QUERY_COLUMNS)
        .query("-out.max", "unlimited")
        .call()
        .with_context(|| format!("querying VizieR at {endpoint}"))?;

    if response.status() != 200 {
        bail!("VizieR returned HTTP status {}", response.status());
    }

    let mut body = String::new();
    response
        .into_body()
        .into_reader()
        .read_to_string(&mut body)
        .context("reading VizieR response body")?;
    Ok(body)
}

/// A parsed tabular response: column names plus rows of raw text fields.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by exact name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of the first column whose upper-cased name starts with `prefix`.
    fn column_with_prefix(&self, prefix: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.to_uppercase().starts_with(prefix))
    }
}

/// Parse a VizieR ASU TSV payload into a [`RawTable`].
///
/// Short rows are padded with empty fields so every row has one entry per
/// column. A blank line after the data ends the table.
pub fn parse_asu_tsv(text: &str) -> Result<RawTable> {
    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut in_data = false;

    for line in text.lines() {
        if line.starts_with('#') {
            continue;
        }
        if line.trim().is_empty() {
            if in_data {
                break;
            }
            continue;
        }

        if columns.is_empty() {
            columns = line.split('\t').map(|c| c.trim().to_string()).collect();
            continue;
        }

        // Ruler line of dashes directly under the header.
        if !in_data && line.chars().all(|c| c == '-' || c == '\t' || c == ' ') {
            in_data = true;
            continue;
        }
        in_data = true;

        let mut row: Vec<String> = line.split('\t').map(|f| f.trim().to_string()).collect();
        if row.len() < columns.len() {
            row.resize(columns.len(), String::new());
        }
        rows.push(row);
    }

    if columns.is_empty() {
        bail!("catalogue response contained no table header");
    }

    Ok(RawTable { columns, rows })
}

/// Resolve the coordinate columns: exact ICRS names first, then the first
/// columns starting with `RA`/`DE`.
fn coordinate_columns(table: &RawTable) -> Result<(usize, usize)> {
    if let (Some(ra), Some(dec)) = (table.column("RAICRS"), table.column("DEICRS")) {
        return Ok((ra, dec));
    }
    match (
        table.column_with_prefix("RA"),
        table.column_with_prefix("DE"),
    ) {
        (Some(ra), Some(dec)) => Ok((ra, dec)),
        _ => bail!("catalogue response has no recognizable coordinate columns"),
    }
}

fn parse_optional_f64(field: Option<&String>) -> Option<f64> {
    let trimmed = field?.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn clean_sp_type(field: Option<&String>) -> Option<String> {
    let trimmed = field?.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }
    Some(trimmed.to_string())
}

/// Convert a raw table to [`StarRecord`]s.
///
/// Rows are dropped when the HIP id does not parse, when `ra`, `dec` or
/// `vmag` is missing after coercion, or when the coordinates fall outside
/// `[0, 360)` x `[-90, 90]`. Returns the kept records and the drop count.
pub fn normalize_table(table: &RawTable) -> Result<(Vec<StarRecord>, usize)> {
    let hip_col = table
        .column("HIP")
        .context("catalogue response has no HIP column")?;
    let (ra_col, dec_col) = coordinate_columns(table)?;
    let vmag_col = table.column("Vmag");
    let plx_col = table.column("Plx");
    let bv_col = table.column("B-V");
    let sp_col = table.column("SpType");

    let mut records = Vec::with_capacity(table.len());
    let mut dropped = 0usize;

    for row in &table.rows {
        let hip = row
            .get(hip_col)
            .and_then(|f| f.trim().parse::<u32>().ok());
        let ra = parse_optional_f64(row.get(ra_col));
        let dec = parse_optional_f64(row.get(dec_col));
        let vmag = vmag_col.and_then(|i| parse_optional_f64(row.get(i)));

        let (Some(hip), Some(ra), Some(dec), Some(vmag)) = (hip, ra, dec, vmag) else {
            dropped += 1;
            continue;
        };
        if !(0.0..360.0).contains(&ra) || !(-90.0..=90.0).contains(&dec) {
            dropped += 1;
            continue;
        }

        let mut record = StarRecord {
            hip,
            ra,
            dec,
            dist_pc: None,
            vmag: Some(vmag),
            plx: plx_col.and_then(|i| parse_optional_f64(row.get(i))),
            bv: bv_col.and_then(|i| parse_optional_f64(row.get(i))),
            sp_type: sp_col.and_then(|i| clean_sp_type(row.get(i))),
            absmag: None,
            temp_k: None,
            name: None,
        };
        record.recompute_derived();
        records.push(record);
    }

    Ok((records, dropped))
}
