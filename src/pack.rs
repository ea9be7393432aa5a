/// Run-wide configuration: the association pack, chromosome units and
/// per-chromosome file discovery.
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::cli::PackArgs;

// ---------------------------------------------------------------------------
// Chromosomes
// ---------------------------------------------------------------------------

/// One partition of the genome. Orders autosomes numerically, then X, then Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Chromosome {
    Autosome(u8),
    X,
    Y,
}

impl Chromosome {
    /// Chromosomes tested by BOLT and REGENIE.
    pub fn autosomes_and_x() -> Vec<Chromosome> {
        (1u8..=22)
            .map(Chromosome::Autosome)
            .chain(std::iter::once(Chromosome::X))
            .collect()
    }

    /// Chromosomes tested by STAAR.
    pub fn autosomes_x_and_y() -> Vec<Chromosome> {
        let mut chroms = Self::autosomes_and_x();
        chroms.push(Chromosome::Y);
        chroms
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chromosome::Autosome(n) => write!(f, "{}", n),
            Chromosome::X => f.write_str("X"),
            Chromosome::Y => f.write_str("Y"),
        }
    }
}

impl FromStr for Chromosome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bare = s
            .strip_prefix("chr")
            .or_else(|| s.strip_prefix("CHR"))
            .unwrap_or(s);
        match bare {
            "X" | "x" => Ok(Chromosome::X),
            "Y" | "y" => Ok(Chromosome::Y),
            _ => match bare.parse::<u8>() {
                Ok(n) if (1..=22).contains(&n) => Ok(Chromosome::Autosome(n)),
                _ => Err(format!("unrecognised chromosome '{}'", s)),
            },
        }
    }
}

/// Ordering for a chromosome column read from a file: known chromosomes in
/// genome order first, anything else afterwards in lexical order.
pub fn compare_chroms(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.parse::<Chromosome>(), b.parse::<Chromosome>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Build a per-chromosome path from a pattern.
///
/// `@` in the pattern is replaced by the chromosome (`bgen/chr@.bgen` →
/// `bgen/chr7.bgen`); a pattern without `@` gets the chromosome appended.
pub fn chrom_path(pattern: &str, chrom: Chromosome) -> String {
    if pattern.contains('@') {
        pattern.replace('@', &chrom.to_string())
    } else {
        format!("{}{}", pattern, chrom)
    }
}

// ---------------------------------------------------------------------------
// Per-chromosome inputs
// ---------------------------------------------------------------------------

/// Dosage matrix and its sample list for one chromosome (BOLT dosage mode).
#[derive(Debug, Clone)]
pub struct DosageFiles {
    pub dosage: PathBuf,
    pub sample: PathBuf,
}

/// Per-marker genotypes for one chromosome, plus the variant annotation
/// index that marker-level results are joined against.
#[derive(Debug, Clone)]
pub struct BgenFiles {
    pub bgen: PathBuf,
    pub sample: PathBuf,
    pub variant_index: PathBuf,
}

/// Static inputs shared by every tool.
#[derive(Debug, Clone)]
pub struct Resources {
    pub genetics_bfile: PathBuf,
    pub low_mac_list: PathBuf,
    pub pheno_covar_file: PathBuf,
    pub sample_include: PathBuf,
    pub transcripts: PathBuf,
    pub ld_scores: PathBuf,
    pub genetic_map: PathBuf,
    pub staar_scripts: PathBuf,
    pub sparse_grm: PathBuf,
    pub sparse_grm_samples: PathBuf,
}

/// Names (or paths) of the external binaries.
#[derive(Debug, Clone)]
pub struct Executables {
    pub plink2: String,
    pub bolt: String,
    pub regenie: String,
    pub rscript: String,
    pub bgzip: String,
    pub tabix: String,
}

// ---------------------------------------------------------------------------
// AssociationPack
// ---------------------------------------------------------------------------

/// Settings read by a single tool, fixed when the pack is built.
#[derive(Debug, Clone, Default)]
pub struct ToolSettings {
    /// `(dosage, sample)` path patterns. Switches BOLT to dosage mode.
    pub dosage_patterns: Option<(String, String)>,
    pub bolt_non_infinite: bool,
    /// SNP list restricting REGENIE step 1, relative to the working directory.
    pub regenie_snps: Option<PathBuf>,
}

/// Everything a run needs to know, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct AssociationPack {
    pub pheno_names: Vec<String>,
    pub tarball_prefixes: Vec<String>,
    pub is_binary: bool,
    pub is_dosage: bool,
    pub is_bolt_non_infinite: bool,
    pub found_quantitative_covariates: Vec<String>,
    pub found_categorical_covariates: Vec<String>,
    pub threads: usize,
    pub dosage_files: BTreeMap<Chromosome, DosageFiles>,
    pub bgen_files: BTreeMap<Chromosome, BgenFiles>,
    pub run_marker_tests: bool,
    pub regenie_snps_file: Option<PathBuf>,
    pub output_prefix: String,
    pub work_dir: PathBuf,
    pub resources: Resources,
    pub executables: Executables,
}

impl AssociationPack {
    /// Build the pack, discovering marker bgen files (and dosage files, in
    /// dosage mode) for `chromosomes`.
    pub fn from_args(
        args: &PackArgs,
        chromosomes: &[Chromosome],
        settings: ToolSettings,
    ) -> Result<Self> {
        anyhow::ensure!(
            !args.pheno_name.is_empty(),
            "at least one --pheno-name is required"
        );
        anyhow::ensure!(
            !args.output_prefix.is_empty(),
            "--output-prefix must not be empty"
        );

        let work_dir = args.work_dir.clone();
        let threads = match args.threads {
            Some(0) => anyhow::bail!("--threads must be at least 1"),
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };

        let r = &args.resources;
        let resources = Resources {
            genetics_bfile: work_dir.join(&r.genetics_bfile),
            low_mac_list: work_dir.join(&r.low_mac_list),
            pheno_covar_file: work_dir.join(&r.pheno_covar_file),
            sample_include: work_dir.join(&r.sample_include),
            transcripts: work_dir.join(&r.transcripts),
            ld_scores: work_dir.join(&r.ld_scores),
            genetic_map: work_dir.join(&r.genetic_map),
            staar_scripts: work_dir.join(&r.staar_scripts),
            sparse_grm: work_dir.join(&r.sparse_grm),
            sparse_grm_samples: work_dir.join(&r.sparse_grm_samples),
        };

        let e = &args.executables;
        let executables = Executables {
            plink2: e.plink2.clone(),
            bolt: e.bolt.clone(),
            regenie: e.regenie.clone(),
            rscript: e.rscript.clone(),
            bgzip: e.bgzip.clone(),
            tabix: e.tabix.clone(),
        };

        let mut bgen_files = BTreeMap::new();
        for &chrom in chromosomes {
            let bgen = work_dir.join(chrom_path(&args.marker_bgen, chrom));
            let sample = work_dir.join(chrom_path(&args.marker_sample, chrom));
            if bgen.exists() && sample.exists() {
                let variant_index = work_dir.join(chrom_path(&args.variant_index, chrom));
                bgen_files.insert(
                    chrom,
                    BgenFiles {
                        bgen,
                        sample,
                        variant_index,
                    },
                );
            }
        }

        let dosage_files = match &settings.dosage_patterns {
            Some((dosage, sample)) => find_dosage_files(&work_dir, dosage, sample, chromosomes),
            None => BTreeMap::new(),
        };

        Ok(Self {
            pheno_names: args.pheno_name.clone(),
            tarball_prefixes: args.tarball_prefixes.clone(),
            is_binary: args.is_binary,
            is_dosage: settings.dosage_patterns.is_some(),
            is_bolt_non_infinite: settings.bolt_non_infinite,
            found_quantitative_covariates: args.quant_covars.clone(),
            found_categorical_covariates: args.cat_covars.clone(),
            threads,
            dosage_files,
            bgen_files,
            run_marker_tests: args.run_marker_tests,
            regenie_snps_file: settings.regenie_snps.map(|p| work_dir.join(p)),
            output_prefix: args.output_prefix.clone(),
            work_dir,
            resources,
            executables,
        })
    }

    /// Phenotype used by the single-phenotype tools (BOLT, REGENIE).
    pub fn primary_phenotype(&self) -> &str {
        &self.pheno_names[0]
    }

    /// Path of a working file.
    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Path of a file named after the output prefix.
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.path(format!("{}{}", self.output_prefix, suffix))
    }
}

/// Dosage inputs for every chromosome that has both files.
fn find_dosage_files(
    work_dir: &Path,
    dosage_pattern: &str,
    sample_pattern: &str,
    chromosomes: &[Chromosome],
) -> BTreeMap<Chromosome, DosageFiles> {
    let mut found = BTreeMap::new();
    for &chrom in chromosomes {
        let dosage = work_dir.join(chrom_path(dosage_pattern, chrom));
        let sample = work_dir.join(chrom_path(sample_pattern, chrom));
        if dosage.exists() && sample.exists() {
            found.insert(chrom, DosageFiles { dosage, sample });
        }
    }
    found
}

// ---------------------------------------------------------------------------
// Units of parallel work
// ---------------------------------------------------------------------------

/// One (mask, chromosome) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaskUnit {
    pub tarball_prefix: String,
    pub chromosome: Chromosome,
}

/// Key returned by a finished unit job; locates that unit's output on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub tarball_prefix: String,
    pub chromosome: Chromosome,
    pub phenotype: String,
}

/// Every (mask, chromosome) pair whose precondition file exists.
///
/// Pairs without the file are not an error: there is simply nothing to do
/// for them.
pub fn units_with_file<F>(
    prefixes: &[String],
    chromosomes: &[Chromosome],
    precondition: F,
) -> Vec<MaskUnit>
where
    F: Fn(&str, Chromosome) -> PathBuf,
{
    let mut units = Vec::new();
    for &chromosome in chromosomes {
        for prefix in prefixes {
            if precondition(prefix, chromosome).exists() {
                units.push(MaskUnit {
                    tarball_prefix: prefix.clone(),
                    chromosome,
                });
            }
        }
    }
    units
}
