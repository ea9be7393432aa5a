/// Result aggregation: reads each unit's raw tool output into typed rows,
/// reshapes it (ID splits, p-value reconstruction, per-test pivot, allele
/// counts) and concatenates units into one cohort table per tool.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::error::PipelineError;
use crate::parse::table_reader;

// ---------------------------------------------------------------------------
// Numeric transforms
// ---------------------------------------------------------------------------

/// `p = 10^(-x)` for a reported `-log10(p)`.
pub fn pvalue_from_log10(log10p: f64) -> f64 {
    10f64.powf(-log10p)
}

/// `round(freq * 2 * n)`, halves to even.
pub fn allele_count(freq: Option<f64>, n_samples: f64) -> Option<u64> {
    let ac = (freq? * 2.0 * n_samples).round_ties_even();
    ac.is_finite().then_some(ac.max(0.0) as u64)
}

// ---------------------------------------------------------------------------
// Cell formatting
// ---------------------------------------------------------------------------

pub const NA: &str = "NA";

/// Shortest round-trip form, switching to exponent notation for very small
/// or very large magnitudes.
pub fn fmt_float(value: Option<f64>) -> String {
    match value {
        None => NA.to_string(),
        Some(v) if v.is_nan() => NA.to_string(),
        Some(v) if v != 0.0 && (v.abs() < 1e-4 || v.abs() >= 1e15) => format!("{:e}", v),
        Some(v) => format!("{}", v),
    }
}

pub fn fmt_count(value: Option<u64>) -> String {
    value.map_or_else(|| NA.to_string(), |v| v.to_string())
}

pub fn fmt_text(value: Option<&str>) -> String {
    value.unwrap_or(NA).to_string()
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Coordinates the tool reported for a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locus {
    pub chrom: String,
    pub pos: u64,
}

/// One output row: a join key, the tool's locus, and the result cells
/// (aligned with the owning table's `columns`).
pub trait ResultRow {
    /// Columns every table of this row type has, before any per-unit extras.
    fn base_columns() -> Vec<String>
    where
        Self: Sized;
    /// Transcript ID for gene rows, variant ID for marker rows.
    fn key(&self) -> &str;
    fn locus(&self) -> &Locus;
    fn fields(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct ResultTable<R> {
    pub columns: Vec<String>,
    pub rows: Vec<R>,
}

impl<R: ResultRow> ResultTable<R> {
    pub fn empty() -> Self {
        Self {
            columns: R::base_columns(),
            rows: Vec::new(),
        }
    }

    /// Union of unit tables. Every unit must have exactly the same columns.
    pub fn concat(tool: &str, tables: Vec<Self>) -> Result<Self> {
        let mut iter = tables.into_iter();
        let Some(mut merged) = iter.next() else {
            return Ok(Self::empty());
        };
        for table in iter {
            if table.columns != merged.columns {
                return Err(PipelineError::SchemaMismatch {
                    tool: tool.to_string(),
                    expected: merged.columns.clone(),
                    found: table.columns,
                }
                .into());
            }
            merged.rows.extend(table.rows);
        }
        Ok(merged)
    }
}

fn names(cols: &[&str]) -> Vec<String> {
    cols.iter().map(|c| c.to_string()).collect()
}

/// `MASK-MAF` tarball prefixes carry both parts; anything else is a bare mask.
pub fn mask_and_maf(prefix: &str) -> (String, Option<String>) {
    match prefix.split_once('-') {
        Some((mask, maf)) => (mask.to_string(), Some(maf.to_string())),
        None => (prefix.to_string(), None),
    }
}

// ---------------------------------------------------------------------------
// BOLT-LMM
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BoltRecord {
    #[serde(rename = "SNP")]
    snp: String,
    #[serde(rename = "CHR")]
    chr: String,
    #[serde(rename = "BP")]
    bp: u64,
    #[serde(rename = "A1FREQ", default, deserialize_with = "csv::invalid_option")]
    a1freq: Option<f64>,
    #[serde(rename = "INFO", default, deserialize_with = "csv::invalid_option")]
    info: Option<f64>,
    #[serde(rename = "CHISQ_LINREG", default, deserialize_with = "csv::invalid_option")]
    chisq_linreg: Option<f64>,
    #[serde(rename = "P_LINREG", default, deserialize_with = "csv::invalid_option")]
    p_linreg: Option<f64>,
    #[serde(rename = "BETA", default, deserialize_with = "csv::invalid_option")]
    beta: Option<f64>,
    #[serde(rename = "SE", default, deserialize_with = "csv::invalid_option")]
    se: Option<f64>,
    #[serde(rename = "CHISQ_BOLT_LMM_INF", default, deserialize_with = "csv::invalid_option")]
    chisq_lmm_inf: Option<f64>,
    #[serde(rename = "P_BOLT_LMM_INF", default, deserialize_with = "csv::invalid_option")]
    p_lmm_inf: Option<f64>,
    #[serde(rename = "CHISQ_BOLT_LMM", default, deserialize_with = "csv::invalid_option")]
    chisq_lmm: Option<f64>,
    #[serde(rename = "P_BOLT_LMM", default, deserialize_with = "csv::invalid_option")]
    p_lmm: Option<f64>,
}

impl BoltRecord {
    fn stats(&self) -> BoltStats {
        BoltStats {
            info: self.info,
            chisq_linreg: self.chisq_linreg,
            p_linreg: self.p_linreg,
            beta: self.beta,
            se: self.se,
            chisq_lmm_inf: self.chisq_lmm_inf,
            p_lmm_inf: self.p_lmm_inf,
            chisq_lmm: self.chisq_lmm,
            p_lmm: self.p_lmm,
        }
    }
}

/// Association columns BOLT reports per tested variant. Columns BOLT omits
/// for a given model are NA.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoltStats {
    pub info: Option<f64>,
    pub chisq_linreg: Option<f64>,
    pub p_linreg: Option<f64>,
    pub beta: Option<f64>,
    pub se: Option<f64>,
    pub chisq_lmm_inf: Option<f64>,
    pub p_lmm_inf: Option<f64>,
    pub chisq_lmm: Option<f64>,
    pub p_lmm: Option<f64>,
}

const BOLT_STATS_COLUMNS: [&str; 9] = [
    "INFO",
    "CHISQ_LINREG",
    "P_LINREG",
    "BETA",
    "SE",
    "CHISQ_BOLT_LMM_INF",
    "P_BOLT_LMM_INF",
    "CHISQ_BOLT_LMM",
    "P_BOLT_LMM",
];

impl BoltStats {
    fn fields(&self) -> impl Iterator<Item = String> {
        [
            self.info,
            self.chisq_linreg,
            self.p_linreg,
            self.beta,
            self.se,
            self.chisq_lmm_inf,
            self.p_lmm_inf,
            self.chisq_lmm,
            self.p_lmm,
        ]
        .into_iter()
        .map(fmt_float)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoltGeneRow {
    pub enst: String,
    pub locus: Locus,
    pub mask: String,
    pub maf: Option<String>,
    pub a1freq: Option<f64>,
    pub stats: BoltStats,
    pub ac: Option<u64>,
}

impl ResultRow for BoltGeneRow {
    fn base_columns() -> Vec<String> {
        let mut cols = names(&["MASK", "MAF", "A1FREQ"]);
        cols.extend(names(&BOLT_STATS_COLUMNS));
        cols.push("AC".to_string());
        cols
    }

    fn key(&self) -> &str {
        &self.enst
    }

    fn locus(&self) -> &Locus {
        &self.locus
    }

    fn fields(&self) -> Vec<String> {
        let mut out = vec![
            self.mask.clone(),
            fmt_text(self.maf.as_deref()),
            fmt_float(self.a1freq),
        ];
        out.extend(self.stats.fields());
        out.push(fmt_count(self.ac));
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoltMarkerRow {
    pub var_id: String,
    pub locus: Locus,
    pub maf: Option<f64>,
    pub stats: BoltStats,
    pub ac: Option<u64>,
}

impl ResultRow for BoltMarkerRow {
    fn base_columns() -> Vec<String> {
        let mut cols = names(&["BOLT_MAF"]);
        cols.extend(names(&BOLT_STATS_COLUMNS));
        cols.push("BOLT_AC".to_string());
        cols
    }

    fn key(&self) -> &str {
        &self.var_id
    }

    fn locus(&self) -> &Locus {
        &self.locus
    }

    fn fields(&self) -> Vec<String> {
        let mut out = vec![fmt_float(self.maf)];
        out.extend(self.stats.fields());
        out.push(fmt_count(self.ac));
        out
    }
}

/// Split a renamed mask variant ID `ENST-MASK[-MAF]`.
pub fn split_bolt_gene_id(id: &str) -> Result<(String, String, Option<String>)> {
    let parts: Vec<&str> = id.split('-').collect();
    match parts.as_slice() {
        [enst, mask] => Ok((enst.to_string(), mask.to_string(), None)),
        [enst, mask, maf] => Ok((enst.to_string(), mask.to_string(), Some(maf.to_string()))),
        _ => Err(PipelineError::MalformedId {
            id: id.to_string(),
            expected: "ENST-MASK or ENST-MASK-MAF".to_string(),
        }
        .into()),
    }
}

pub struct BoltTables {
    pub genes: ResultTable<BoltGeneRow>,
    pub markers: ResultTable<BoltMarkerRow>,
}

/// Read a BOLT `--statsFileBgenSnps` table and split it into gene rows
/// (IDs containing `ENST`) and marker rows (IDs containing `:`).
pub fn read_bolt_stats(path: &Path, n_samples: u64) -> Result<BoltTables> {
    let mut reader = table_reader(path, b'\t', false)?;
    let n = n_samples as f64;
    let mut genes = ResultTable::empty();
    let mut markers = ResultTable::empty();

    for (i, record) in reader.deserialize::<BoltRecord>().enumerate() {
        let record =
            record.with_context(|| format!("parsing '{}' row {}", path.display(), i + 2))?;
        let stats = record.stats();
        let locus = Locus {
            chrom: record.chr,
            pos: record.bp,
        };
        if record.snp.contains("ENST") {
            let (enst, mask, maf) = split_bolt_gene_id(&record.snp)?;
            genes.rows.push(BoltGeneRow {
                enst,
                locus,
                mask,
                maf,
                a1freq: record.a1freq,
                stats,
                ac: allele_count(record.a1freq, n),
            });
        } else if record.snp.contains(':') {
            markers.rows.push(BoltMarkerRow {
                var_id: record.snp,
                locus,
                maf: record.a1freq,
                stats,
                ac: allele_count(record.a1freq, n),
            });
        }
    }
    Ok(BoltTables { genes, markers })
}

// ---------------------------------------------------------------------------
// REGENIE
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegenieRecord {
    #[serde(rename = "CHROM")]
    chrom: String,
    #[serde(rename = "GENPOS")]
    genpos: u64,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "A1FREQ", default, deserialize_with = "csv::invalid_option")]
    a1freq: Option<f64>,
    #[serde(rename = "N", default, deserialize_with = "csv::invalid_option")]
    n: Option<f64>,
    #[serde(rename = "TEST", default)]
    test: String,
    #[serde(rename = "BETA", default, deserialize_with = "csv::invalid_option")]
    beta: Option<f64>,
    #[serde(rename = "SE", default, deserialize_with = "csv::invalid_option")]
    se: Option<f64>,
    #[serde(rename = "CHISQ", default, deserialize_with = "csv::invalid_option")]
    chisq: Option<f64>,
    #[serde(rename = "LOG10P", default, deserialize_with = "csv::invalid_option")]
    log10p: Option<f64>,
}

impl RegenieRecord {
    fn pvalue(&self) -> Option<f64> {
        self.log10p.map(pvalue_from_log10)
    }
}

const REGENIE_ADDITIVE_TEST: &str = "ADD";

/// Gene row after pivoting: the additive test's effect columns plus one
/// p-value column per other test.
#[derive(Debug, Clone, PartialEq)]
pub struct RegenieGeneRow {
    pub enst: String,
    pub locus: Locus,
    pub mask: String,
    pub maf: Option<String>,
    pub a1freq: Option<f64>,
    pub n: Option<u64>,
    pub beta: Option<f64>,
    pub se: Option<f64>,
    pub chisq: Option<f64>,
    pub pvalue: Option<f64>,
    pub tests: BTreeMap<String, Option<f64>>,
    pub ac: Option<u64>,
}

impl ResultRow for RegenieGeneRow {
    fn base_columns() -> Vec<String> {
        names(&["MASK", "MAF", "A1FREQ", "N", "BETA", "SE", "CHISQ", "PVALUE", "AC"])
    }

    fn key(&self) -> &str {
        &self.enst
    }

    fn locus(&self) -> &Locus {
        &self.locus
    }

    fn fields(&self) -> Vec<String> {
        let mut out = vec![
            self.mask.clone(),
            fmt_text(self.maf.as_deref()),
            fmt_float(self.a1freq),
            fmt_count(self.n),
            fmt_float(self.beta),
            fmt_float(self.se),
            fmt_float(self.chisq),
            fmt_float(self.pvalue),
        ];
        out.extend(self.tests.values().map(|p| fmt_float(*p)));
        out.push(fmt_count(self.ac));
        out
    }
}

fn regenie_gene_columns(tests: &BTreeSet<String>) -> Vec<String> {
    let mut cols = RegenieGeneRow::base_columns();
    let ac = cols.pop();
    cols.extend(tests.iter().cloned());
    cols.extend(ac);
    cols
}

/// Concatenate per-unit gene tables. Units can report different test sets
/// (or none, for a unit with no `all` rows), so each is widened to the union
/// of tests with missing p-values before stacking.
pub fn concat_regenie_units(
    tables: Vec<ResultTable<RegenieGeneRow>>,
) -> Result<ResultTable<RegenieGeneRow>> {
    let base = RegenieGeneRow::base_columns();
    let tests: BTreeSet<String> = tables
        .iter()
        .flat_map(|t| t.columns.iter())
        .filter(|c| !base.contains(c))
        .cloned()
        .collect();
    let columns = regenie_gene_columns(&tests);

    let widened = tables
        .into_iter()
        .map(|mut table| {
            for row in &mut table.rows {
                for test in &tests {
                    row.tests.entry(test.clone()).or_insert(None);
                }
            }
            table.columns = columns.clone();
            table
        })
        .collect();
    ResultTable::concat("REGENIE", widened)
}

/// Split a REGENIE mask ID `ENST.MASK.SUBSET` into its three parts.
pub fn split_regenie_id(id: &str) -> Result<(String, String, String)> {
    let malformed = || PipelineError::MalformedId {
        id: id.to_string(),
        expected: "ENST.MASK.SUBSET".to_string(),
    };
    let (enst, rest) = id.split_once('.').ok_or_else(malformed)?;
    let (mask, subset) = rest.rsplit_once('.').ok_or_else(malformed)?;
    if enst.is_empty() || mask.is_empty() || subset.is_empty() {
        return Err(malformed().into());
    }
    Ok((enst.to_string(), mask.to_string(), subset.to_string()))
}

/// Pivot one unit's gene-level REGENIE records (one per gene × test) into
/// one row per gene. Only the `all` subset is kept; genes with no additive
/// test row are dropped.
fn pivot_regenie(
    records: Vec<RegenieRecord>,
    tarball_prefix: &str,
    source: &Path,
) -> Result<ResultTable<RegenieGeneRow>> {
    let (mask, maf) = mask_and_maf(tarball_prefix);
    let mut order: Vec<String> = Vec::new();
    let mut additive: HashMap<String, RegenieRecord> = HashMap::new();
    let mut other: HashMap<String, BTreeMap<String, Option<f64>>> = HashMap::new();
    let mut test_names: BTreeSet<String> = BTreeSet::new();

    for record in records {
        let (enst, _, subset) = split_regenie_id(&record.id)?;
        if subset != "all" {
            continue;
        }
        if !additive.contains_key(&enst) && !other.contains_key(&enst) {
            order.push(enst.clone());
        }
        if record.test == REGENIE_ADDITIVE_TEST {
            if additive.contains_key(&enst) {
                anyhow::bail!(
                    "'{}': transcript {} has more than one {} row",
                    source.display(),
                    enst,
                    REGENIE_ADDITIVE_TEST
                );
            }
            additive.insert(enst, record);
        } else {
            let tests = other.entry(enst.clone()).or_default();
            if tests.contains_key(&record.test) {
                anyhow::bail!(
                    "'{}': transcript {} has more than one {} row",
                    source.display(),
                    enst,
                    record.test
                );
            }
            test_names.insert(record.test.clone());
            tests.insert(record.test.clone(), record.pvalue());
        }
    }

    let mut table = ResultTable {
        columns: regenie_gene_columns(&test_names),
        rows: Vec::new(),
    };
    for enst in order {
        let Some(add) = additive.remove(&enst) else {
            continue;
        };
        let found = other.remove(&enst).unwrap_or_default();
        let tests = test_names
            .iter()
            .map(|t| (t.clone(), found.get(t).copied().flatten()))
            .collect();
        let pvalue = add.pvalue();
        table.rows.push(RegenieGeneRow {
            locus: Locus {
                chrom: add.chrom,
                pos: add.genpos,
            },
            mask: mask.clone(),
            maf: maf.clone(),
            a1freq: add.a1freq,
            n: add.n.map(|n| n.round() as u64),
            beta: add.beta,
            se: add.se,
            chisq: add.chisq,
            pvalue,
            tests,
            ac: add.n.and_then(|n| allele_count(add.a1freq, n)),
            enst,
        });
    }
    Ok(table)
}

/// Read one (mask, chromosome) step 2 output (`<prefix>.<chrom>_<pheno>.regenie`).
pub fn read_regenie_unit(path: &Path, tarball_prefix: &str) -> Result<ResultTable<RegenieGeneRow>> {
    let mut reader = table_reader(path, b' ', true)?;
    let records = reader
        .deserialize::<RegenieRecord>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("parsing '{}'", path.display()))?;
    pivot_regenie(records, tarball_prefix, path)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegenieMarkerRow {
    pub var_id: String,
    pub locus: Locus,
    pub maf: Option<f64>,
    pub n: Option<u64>,
    pub beta: Option<f64>,
    pub se: Option<f64>,
    pub chisq: Option<f64>,
    pub pvalue: Option<f64>,
}

impl ResultRow for RegenieMarkerRow {
    fn base_columns() -> Vec<String> {
        names(&["REGENIE_MAF", "N", "BETA", "SE", "CHISQ", "PVALUE"])
    }

    fn key(&self) -> &str {
        &self.var_id
    }

    fn locus(&self) -> &Locus {
        &self.locus
    }

    fn fields(&self) -> Vec<String> {
        vec![
            fmt_float(self.maf),
            fmt_count(self.n),
            fmt_float(self.beta),
            fmt_float(self.se),
            fmt_float(self.chisq),
            fmt_float(self.pvalue),
        ]
    }
}

/// Read one chromosome's per-marker output (`<chrom>.markers.REGENIE_<pheno>.regenie`).
pub fn read_regenie_markers(path: &Path) -> Result<ResultTable<RegenieMarkerRow>> {
    let mut reader = table_reader(path, b' ', true)?;
    let mut table = ResultTable::empty();
    for (i, record) in reader.deserialize::<RegenieRecord>().enumerate() {
        let record =
            record.with_context(|| format!("parsing '{}' row {}", path.display(), i + 2))?;
        let pvalue = record.pvalue();
        table.rows.push(RegenieMarkerRow {
            var_id: record.id,
            locus: Locus {
                chrom: record.chrom,
                pos: record.genpos,
            },
            maf: record.a1freq,
            n: record.n.map(|n| n.round() as u64),
            beta: record.beta,
            se: record.se,
            chisq: record.chisq,
            pvalue,
        });
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// STAAR
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StaarRecord {
    #[serde(rename = "ENST")]
    enst: String,
    #[serde(rename = "n.snps", default, deserialize_with = "csv::invalid_option")]
    n_snps: Option<f64>,
    #[serde(rename = "cMAC", default, deserialize_with = "csv::invalid_option")]
    cmac: Option<f64>,
    #[serde(rename = "staar.O.p", default, deserialize_with = "csv::invalid_option")]
    o_p: Option<f64>,
    #[serde(rename = "staar.SKAT.p", default, deserialize_with = "csv::invalid_option")]
    skat_p: Option<f64>,
    #[serde(rename = "staar.burden.p", default, deserialize_with = "csv::invalid_option")]
    burden_p: Option<f64>,
    #[serde(rename = "staar.ACAT.p", default, deserialize_with = "csv::invalid_option")]
    acat_p: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaarGeneRow {
    pub enst: String,
    pub locus: Locus,
    pub pheno_name: String,
    pub mask: String,
    pub maf: Option<String>,
    pub n_var: Option<u64>,
    pub o_p: Option<f64>,
    pub skat_p: Option<f64>,
    pub burden_p: Option<f64>,
    pub acat_p: Option<f64>,
    pub ac: Option<u64>,
}

impl ResultRow for StaarGeneRow {
    fn base_columns() -> Vec<String> {
        names(&[
            "pheno_name",
            "MASK",
            "MAF",
            "n_var",
            "staar.O.p",
            "staar.SKAT.p",
            "staar.burden.p",
            "staar.ACAT.p",
            "AC",
        ])
    }

    fn key(&self) -> &str {
        &self.enst
    }

    fn locus(&self) -> &Locus {
        &self.locus
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.pheno_name.clone(),
            self.mask.clone(),
            fmt_text(self.maf.as_deref()),
            fmt_count(self.n_var),
            fmt_float(self.o_p),
            fmt_float(self.skat_p),
            fmt_float(self.burden_p),
            fmt_float(self.acat_p),
            fmt_count(self.ac),
        ]
    }
}

/// Read one (phenotype, mask, chromosome) STAAR result table.
///
/// `loci` maps each transcript to its first variant in the mask's variants
/// table; a result for a transcript not in that table is an error.
pub fn read_staar_unit(
    path: &Path,
    tarball_prefix: &str,
    pheno_name: &str,
    loci: &HashMap<String, Locus>,
    variants_table: &Path,
) -> Result<ResultTable<StaarGeneRow>> {
    let (mask, maf) = mask_and_maf(tarball_prefix);
    let mut reader = table_reader(path, b'\t', false)?;
    let mut table = ResultTable::empty();
    for (i, record) in reader.deserialize::<StaarRecord>().enumerate() {
        let record: StaarRecord =
            record.with_context(|| format!("parsing '{}' row {}", path.display(), i + 2))?;
        let locus = loci
            .get(&record.enst)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownGene {
                enst: record.enst.clone(),
                path: variants_table.to_path_buf(),
            })?;
        table.rows.push(StaarGeneRow {
            enst: record.enst,
            locus,
            pheno_name: pheno_name.to_string(),
            mask: mask.clone(),
            maf: maf.clone(),
            n_var: record.n_snps.map(|n| n.round() as u64),
            o_p: record.o_p,
            skat_p: record.skat_p,
            burden_p: record.burden_p,
            acat_p: record.acat_p,
            ac: record.cmac.map(|c| c.round_ties_even().max(0.0) as u64),
        });
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
