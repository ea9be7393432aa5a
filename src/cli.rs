/// CLI argument definitions using clap derive macros.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "burden",
    about = "Rare-variant burden tests with BOLT-LMM, REGENIE and STAAR",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run BOLT-LMM on mask bgen files (or dosage files) and annotate the results
    Bolt(BoltArgs),
    /// Run REGENIE step 1 and per-mask step 2, then annotate the results
    Regenie(RegenieArgs),
    /// Run the STAAR null model and per-mask gene tests, then annotate the results
    Staar(StaarArgs),
    /// Write the REGENIE annotation, set-list and mask files for one variants table
    MaskFiles(MaskFilesArgs),
    /// Subset a dosage matrix to the sample include list and write its fam file
    FilterDosage(FilterDosageArgs),
}

// ---------------------------------------------------------------------------
// Shared run options
// ---------------------------------------------------------------------------

#[derive(Args, Clone, Debug)]
pub struct PackArgs {
    /// Phenotype column(s) in the phenotype/covariate table (comma-separated).
    /// BOLT and REGENIE test the first; STAAR tests all of them.
    #[arg(long, value_delimiter = ',', required = true)]
    pub pheno_name: Vec<String>,

    /// Mask (tarball) prefixes to test, comma-separated (e.g. HC_PTV-MAF_01,MISS-MAF_01)
    #[arg(long, value_delimiter = ',')]
    pub tarball_prefixes: Vec<String>,

    /// The phenotype is binary (case/control) rather than quantitative
    #[arg(long, default_value_t = false)]
    pub is_binary: bool,

    /// Additional quantitative covariates present in the phenotype/covariate table
    #[arg(long, value_delimiter = ',')]
    pub quant_covars: Vec<String>,

    /// Additional categorical covariates present in the phenotype/covariate table
    #[arg(long, value_delimiter = ',')]
    pub cat_covars: Vec<String>,

    /// Thread budget. Defaults to the number of available cores.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Also run per-marker tests and write a marker-level results table
    #[arg(long, default_value_t = false)]
    pub run_marker_tests: bool,

    /// Prefix for every output file
    #[arg(long)]
    pub output_prefix: String,

    /// Directory holding inputs, intermediate files and outputs
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Per-chromosome marker bgen file; `@` is replaced by the chromosome
    #[arg(long, default_value = "bgen/@.filtered.bgen")]
    pub marker_bgen: String,

    /// Per-chromosome sample file accompanying --marker-bgen
    #[arg(long, default_value = "bgen/@.filtered.sample")]
    pub marker_sample: String,

    /// Per-chromosome variant annotation index joined against marker results
    #[arg(long, default_value = "filtered_bgen/@.filtered.vep.tsv.gz")]
    pub variant_index: String,

    #[command(flatten)]
    pub resources: ResourceArgs,

    #[command(flatten)]
    pub executables: ExecutableArgs,
}

#[derive(Args, Clone, Debug)]
pub struct ResourceArgs {
    /// PLINK binary fileset (prefix) of QC'd array genotypes
    #[arg(long, default_value = "genetics/UKBB_470K_Autosomes_QCd_WBA")]
    pub genetics_bfile: PathBuf,

    /// SNP list of low-MAC array variants excluded from the BOLT model
    #[arg(long, default_value = "genetics/UKBB_470K_Autosomes_QCd.low_MAC.snplist")]
    pub low_mac_list: PathBuf,

    /// Combined phenotype + covariate table
    #[arg(long, default_value = "phenotypes_covariates.formatted.txt")]
    pub pheno_covar_file: PathBuf,

    /// Sample IDs to include, one per line
    #[arg(long, default_value = "SAMPLES_Include.txt")]
    pub sample_include: PathBuf,

    /// Transcript coordinate/annotation table (ENST chrom start end ...)
    #[arg(long, default_value = "transcripts.tsv.gz")]
    pub transcripts: PathBuf,

    /// BOLT-LMM LD score table
    #[arg(long, default_value = "BOLT-LMM_v2.4/tables/LDSCORE.1000G_EUR.tab.gz")]
    pub ld_scores: PathBuf,

    /// BOLT-LMM genetic map table
    #[arg(long, default_value = "BOLT-LMM_v2.4/tables/genetic_map_hg19_withX.txt.gz")]
    pub genetic_map: PathBuf,

    /// Directory containing runSTAAR_Null.R and runSTAAR_Genes.R
    #[arg(long, default_value = "/prog")]
    pub staar_scripts: PathBuf,

    /// Sparse GRM used by the STAAR null model
    #[arg(long, default_value = "genetics/sparseGRM_470K_Autosomes_QCd.sparseGRM.mtx")]
    pub sparse_grm: PathBuf,

    /// Sample IDs matching the rows of --sparse-grm
    #[arg(
        long,
        default_value = "genetics/sparseGRM_470K_Autosomes_QCd.sparseGRM.mtx.sampleIDs.txt"
    )]
    pub sparse_grm_samples: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub struct ExecutableArgs {
    #[arg(long, default_value = "plink2")]
    pub plink2: String,

    #[arg(long, default_value = "bolt")]
    pub bolt: String,

    #[arg(long, default_value = "regenie")]
    pub regenie: String,

    #[arg(long, default_value = "Rscript")]
    pub rscript: String,

    #[arg(long, default_value = "bgzip")]
    pub bgzip: String,

    #[arg(long, default_value = "tabix")]
    pub tabix: String,
}

// ---------------------------------------------------------------------------
// bolt
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct BoltArgs {
    #[command(flatten)]
    pub pack: PackArgs,

    /// Per-chromosome dosage matrix (`@` = chromosome). Enables dosage mode.
    #[arg(long, requires = "dosage_sample")]
    pub dosage: Option<String>,

    /// Per-chromosome sample list accompanying --dosage (sample name in column 2)
    #[arg(long, requires = "dosage")]
    pub dosage_sample: Option<String>,

    /// Fit the non-infinitesimal mixture model (--lmmForceNonInf) instead of --lmmInfOnly
    #[arg(long, default_value_t = false)]
    pub bolt_non_infinite: bool,
}

// ---------------------------------------------------------------------------
// regenie
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct RegenieArgs {
    #[command(flatten)]
    pub pack: PackArgs,

    /// Optional SNP list restricting the step 1 model (plink2 --extract)
    #[arg(long)]
    pub regenie_snps: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// staar
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct StaarArgs {
    #[command(flatten)]
    pub pack: PackArgs,
}

// ---------------------------------------------------------------------------
// mask-files
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct MaskFilesArgs {
    /// Variants table (tab-separated; header with at least varID ENST chrom pos)
    #[arg(long)]
    pub variants_table: PathBuf,

    /// Mask (tarball) prefix used as the annotation and mask name
    #[arg(long)]
    pub tarball_prefix: String,

    /// Chromosome the table covers
    #[arg(long)]
    pub chromosome: String,

    /// Directory for the three output files
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// filter-dosage
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct FilterDosageArgs {
    /// Dosage matrix: rsID chrom pos REF ALT followed by one column per sample, no header
    #[arg(long)]
    pub dosage: PathBuf,

    /// Sample list for the dosage columns (tab-separated, sample name in column 2)
    #[arg(long)]
    pub sample: PathBuf,

    /// Sample IDs to keep, one per line
    #[arg(long)]
    pub include: PathBuf,

    /// Chromosome the matrix covers (names the output files)
    #[arg(long)]
    pub chromosome: String,

    /// Directory for <chrom>.INCLUDE.dosage and <chrom>.INCLUDE.fam
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}
