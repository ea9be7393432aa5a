/// Per-unit input preparation: dosage subsetting, bgen renaming/filtering and
/// the REGENIE annotation, set-list and mask-definition files.
use anyhow::{Context, Result};
use polars::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cli::{FilterDosageArgs, MaskFilesArgs};
use crate::command::{self, Plink2Export, RegenieMaskFiles};
use crate::error::PipelineError;
use crate::invoke::run_tool;
use crate::pack::{AssociationPack, BgenFiles, Chromosome, DosageFiles};
use crate::parse::{open_text, read_pvar_ids, read_sample_set, table_reader};

/// Leading non-sample columns of a dosage matrix.
const DOSAGE_FIXED_COLUMNS: [&str; 5] = ["rsID", "chrom", "pos", "REF", "ALT"];

/// Tab-separated writer with bare `\n` terminators and no quoting.
fn tsv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path).with_context(|| format!("creating '{}'", path.display()))?;
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(BufWriter::new(file)))
}

// ---------------------------------------------------------------------------
// Dosage matrices (BOLT dosage mode)
// ---------------------------------------------------------------------------

/// Sample names of a dosage matrix: column 2 of each tab-separated line.
fn read_dosage_samples(path: &Path) -> Result<Vec<String>> {
    let reader = open_text(path)?;
    let mut samples = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading '{}'", path.display()))?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 2 {
            return Err(PipelineError::DimensionMismatch {
                context: format!("'{}' line {}", path.display(), i + 1),
                expected: 2,
                actual: cols.len(),
            }
            .into());
        }
        samples.push(cols[1].to_string());
    }
    Ok(samples)
}

/// Paths written by [`filter_dosage`].
#[derive(Debug, Clone)]
pub struct FilteredDosage {
    pub dosage: PathBuf,
    pub fam: PathBuf,
}

/// Keep only the sample columns of `files.dosage` listed in `include`.
///
/// Writes `<chrom>.INCLUDE.dosage` (floats to 4 decimals, missing as `-9`) and
/// `<chrom>.INCLUDE.fam` with each kept sample name written twice.
pub fn filter_dosage(
    files: &DosageFiles,
    include: &Path,
    chrom: &str,
    out_dir: &Path,
) -> Result<FilteredDosage> {
    let samples = read_dosage_samples(&files.sample)?;
    let keep_set = read_sample_set(include)?;

    if !files.dosage.exists() {
        return Err(PipelineError::MissingInput {
            path: files.dosage.clone(),
        }
        .into());
    }
    let mut df = CsvReadOptions::default()
        .with_has_header(false)
        .with_infer_schema_length(None)
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(b'\t')
                .with_null_values(Some(NullValues::AllColumnsSingle("NA".into()))),
        )
        .try_into_reader_with_file_path(Some(files.dosage.clone()))?
        .finish()
        .with_context(|| format!("reading dosage matrix '{}'", files.dosage.display()))?;

    let expected = DOSAGE_FIXED_COLUMNS.len() + samples.len();
    if df.width() != expected {
        return Err(PipelineError::DimensionMismatch {
            context: format!("dosage matrix '{}'", files.dosage.display()),
            expected,
            actual: df.width(),
        }
        .into());
    }
    let names: Vec<String> = DOSAGE_FIXED_COLUMNS
        .iter()
        .map(|s| s.to_string())
        .chain(samples.iter().cloned())
        .collect();
    df.set_column_names(names.iter().map(String::as_str))?;

    let kept_samples: Vec<&String> = samples.iter().filter(|s| keep_set.contains(*s)).collect();
    let selection: Vec<String> = DOSAGE_FIXED_COLUMNS
        .iter()
        .map(|s| s.to_string())
        .chain(kept_samples.iter().map(|s| s.to_string()))
        .collect();
    let mut filtered = df.select(selection)?;

    let out = FilteredDosage {
        dosage: out_dir.join(format!("{}.INCLUDE.dosage", chrom)),
        fam: out_dir.join(format!("{}.INCLUDE.fam", chrom)),
    };
    let mut dosage_out = File::create(&out.dosage)
        .with_context(|| format!("creating '{}'", out.dosage.display()))?;
    CsvWriter::new(&mut dosage_out)
        .include_header(false)
        .with_separator(b'\t')
        .with_float_precision(Some(4))
        .with_null_value("-9".to_string())
        .finish(&mut filtered)
        .with_context(|| format!("writing '{}'", out.dosage.display()))?;

    let mut fam = tsv_writer(&out.fam)?;
    for sample in &kept_samples {
        fam.write_record([sample.as_str(), sample.as_str()])?;
    }
    fam.flush()?;

    log::debug!(
        "chromosome {}: kept {} of {} dosage samples",
        chrom,
        kept_samples.len(),
        samples.len()
    );
    Ok(out)
}

/// `filter-dosage` subcommand.
pub fn run_filter_dosage(args: FilterDosageArgs) -> Result<()> {
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating '{}'", args.out_dir.display()))?;
    let files = DosageFiles {
        dosage: args.dosage,
        sample: args.sample,
    };
    let out = filter_dosage(&files, &args.include, &args.chromosome, &args.out_dir)?;
    log::info!("Wrote {}", out.dosage.display());
    log::info!("Wrote {}", out.fam.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// bgen preparation (plink2)
// ---------------------------------------------------------------------------

/// Rename every variant of a mask bgen to `<id>-<prefix>` and restrict it to
/// the include list, writing `<prefix>.<chrom>.bgen/.sample`.
pub fn prepare_bolt_bgen(pack: &AssociationPack, prefix: &str, chrom: Chromosome) -> Result<()> {
    let stem = format!("{}.{}", prefix, chrom);
    let bgen = pack.path(format!("{}.BOLT.bgen", stem));
    let out = pack.path(&stem);
    let plink2 = &pack.executables.plink2;

    run_tool(
        &command::plink2_make_just_pvar(plink2, &bgen, &out),
        &pack.work_dir,
        None,
    )?;

    let pvar = pack.path(format!("{}.pvar", stem));
    let fixer = pack.path(format!("{}.fixer", stem));
    let mut writer = BufWriter::new(
        File::create(&fixer).with_context(|| format!("creating '{}'", fixer.display()))?,
    );
    for id in read_pvar_ids(&pvar)? {
        writeln!(writer, "{} {}-{}", id, id, prefix)?;
    }
    writer.flush()?;

    let export = Plink2Export {
        bgen,
        sample: pack.path(format!("{}.BOLT.sample", stem)),
        update_name: Some(fixer),
        keep_fam: pack.resources.sample_include.clone(),
        out,
    };
    run_tool(
        &command::plink2_export_bgen(plink2, &export),
        &pack.work_dir,
        None,
    )
}

/// Write a BOLT/REGENIE compatible sample file from a plink2 bgen `.sample`.
///
/// The plink2 file has two header lines, then `FID IID ...` per sample.
pub fn write_bolt_sample(plink_sample: &Path, out: &Path) -> Result<usize> {
    let reader = open_text(plink_sample)?;
    let mut writer =
        BufWriter::new(File::create(out).with_context(|| format!("creating '{}'", out.display()))?);
    writer.write_all(b"ID_1 ID_2 missing sex\n0 0 0 D\n")?;
    let mut n = 0usize;
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading '{}'", plink_sample.display()))?;
        if i < 2 || line.trim().is_empty() {
            continue;
        }
        let iid = line.split_whitespace().nth(1).ok_or_else(|| PipelineError::DimensionMismatch {
            context: format!("'{}' line {}", plink_sample.display(), i + 1),
            expected: 2,
            actual: line.split_whitespace().count(),
        })?;
        writeln!(writer, "{} {} 0 NA", iid, iid)?;
        n += 1;
    }
    writer.flush()?;
    Ok(n)
}

/// Export the marker bgen of one chromosome restricted to the include list
/// as `<chrom>.markers.bgen` plus `<chrom>.markers.bolt.sample`.
pub fn prepare_marker_bgen(pack: &AssociationPack, chrom: Chromosome, files: &BgenFiles) -> Result<()> {
    let stem = format!("{}.markers", chrom);
    let export = Plink2Export {
        bgen: files.bgen.clone(),
        sample: files.sample.clone(),
        update_name: None,
        keep_fam: pack.resources.sample_include.clone(),
        out: pack.path(&stem),
    };
    run_tool(
        &command::plink2_export_bgen(&pack.executables.plink2, &export),
        &pack.work_dir,
        None,
    )?;
    let n = write_bolt_sample(
        &pack.path(format!("{}.sample", stem)),
        &pack.path(format!("{}.bolt.sample", stem)),
    )?;
    log::debug!("chromosome {}: {} samples in marker bgen", chrom, n);
    Ok(())
}

// ---------------------------------------------------------------------------
// Variants tables and REGENIE mask files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VariantRecord {
    #[serde(rename = "varID")]
    var_id: String,
    #[serde(rename = "ENST")]
    enst: String,
    chrom: String,
    pos: u64,
}

/// Variants of one transcript within a mask, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneGroup {
    pub enst: String,
    pub chrom: String,
    /// Position of the first variant seen for this transcript.
    pub pos: u64,
    pub var_ids: Vec<String>,
}

/// Variants table after dropping consecutive duplicate varIDs (first kept).
#[derive(Debug, Clone, Default)]
pub struct VariantsTable {
    /// (varID, ENST) in file order.
    pub variants: Vec<(String, String)>,
    /// One group per transcript in first-encounter order.
    pub genes: Vec<GeneGroup>,
}

pub fn read_variants_table(path: &Path) -> Result<VariantsTable> {
    let mut reader = table_reader(path, b'\t', false)?;
    let mut table = VariantsTable::default();
    let mut gene_index: HashMap<String, usize> = HashMap::new();
    let mut last_var: Option<String> = None;

    for (i, record) in reader.deserialize::<VariantRecord>().enumerate() {
        let record =
            record.with_context(|| format!("parsing '{}' row {}", path.display(), i + 2))?;
        if last_var.as_deref() == Some(record.var_id.as_str()) {
            continue;
        }
        last_var = Some(record.var_id.clone());

        match gene_index.get(&record.enst) {
            Some(&idx) => table.genes[idx].var_ids.push(record.var_id.clone()),
            None => {
                gene_index.insert(record.enst.clone(), table.genes.len());
                table.genes.push(GeneGroup {
                    enst: record.enst.clone(),
                    chrom: record.chrom.clone(),
                    pos: record.pos,
                    var_ids: vec![record.var_id.clone()],
                });
            }
        }
        table.variants.push((record.var_id, record.enst));
    }
    Ok(table)
}

/// Paths of the three REGENIE mask artifacts for one (mask, chromosome).
pub fn regenie_mask_paths(dir: &Path, prefix: &str, chrom: &str) -> RegenieMaskFiles {
    let stem = format!("{}.{}.REGENIE", prefix, chrom);
    RegenieMaskFiles {
        annotation: dir.join(format!("{}.annotationFile.tsv", stem)),
        mask_def: dir.join(format!("{}.maskfile.tsv", stem)),
        set_list: dir.join(format!("{}.setListFile.tsv", stem)),
    }
}

/// Write the annotation, set-list and mask-definition files for one
/// variants table.
pub fn make_regenie_files(
    variants_table: &Path,
    prefix: &str,
    chrom: &str,
    out_dir: &Path,
) -> Result<RegenieMaskFiles> {
    let table = read_variants_table(variants_table)?;
    let files = regenie_mask_paths(out_dir, prefix, chrom);

    let mut annotation = tsv_writer(&files.annotation)?;
    for (var_id, enst) in &table.variants {
        annotation.write_record([var_id.as_str(), enst.as_str(), prefix])?;
    }
    annotation.flush()?;

    let mut genes: Vec<&GeneGroup> = table.genes.iter().collect();
    genes.sort_by_key(|g| g.pos);
    let mut set_list = tsv_writer(&files.set_list)?;
    for gene in genes {
        let pos = gene.pos.to_string();
        let var_ids = gene.var_ids.join(",");
        set_list.write_record([
            gene.enst.as_str(),
            gene.chrom.as_str(),
            pos.as_str(),
            var_ids.as_str(),
        ])?;
    }
    set_list.flush()?;

    let mut mask = tsv_writer(&files.mask_def)?;
    mask.write_record([prefix, prefix])?;
    mask.flush()?;

    Ok(files)
}

/// `mask-files` subcommand.
pub fn run_mask_files(args: MaskFilesArgs) -> Result<()> {
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating '{}'", args.out_dir.display()))?;
    let files = make_regenie_files(
        &args.variants_table,
        &args.tarball_prefix,
        &args.chromosome,
        &args.out_dir,
    )?;
    for path in [&files.annotation, &files.set_list, &files.mask_def] {
        log::info!("Wrote {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
