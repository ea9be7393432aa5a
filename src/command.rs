/// Argument-list builders for every external binary.
///
/// Each builder is a pure function of a typed options struct; nothing here
/// touches the filesystem or spawns a process. Arguments are kept as a
/// vector (never a shell string) so paths need no quoting.
use std::fmt;
use std::path::{Path, PathBuf};

/// A program plus its argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Bare argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `--flag value` as two arguments.
    pub fn opt(mut self, flag: &str, value: impl fmt::Display) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.to_string());
        self
    }

    /// `--flag=value` as one argument (BOLT style).
    pub fn assign(mut self, flag: &str, value: impl fmt::Display) -> Self {
        self.args.push(format!("{}={}", flag, value));
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

// ---------------------------------------------------------------------------
// plink2
// ---------------------------------------------------------------------------

/// Threads given to every plink2 conversion job.
const PLINK_CONVERSION_THREADS: usize = 4;

/// Write the variant list of a mask bgen (`<out>.pvar`).
pub fn plink2_make_just_pvar(plink2: &str, bgen: &Path, out: &Path) -> ToolCommand {
    ToolCommand::new(plink2)
        .opt("--threads", PLINK_CONVERSION_THREADS)
        .opt("--bgen", display(bgen))
        .arg("ref-last")
        .opt("--out", display(out))
        .arg("--make-just-pvar")
}

/// Re-export a bgen restricted to the include list, optionally renaming
/// variants through an `--update-name` file.
#[derive(Debug, Clone)]
pub struct Plink2Export {
    pub bgen: PathBuf,
    pub sample: PathBuf,
    pub update_name: Option<PathBuf>,
    pub keep_fam: PathBuf,
    pub out: PathBuf,
}

pub fn plink2_export_bgen(plink2: &str, opts: &Plink2Export) -> ToolCommand {
    let mut cmd = ToolCommand::new(plink2)
        .opt("--threads", PLINK_CONVERSION_THREADS)
        .opt("--bgen", display(&opts.bgen))
        .arg("ref-last")
        .opt("--sample", display(&opts.sample));
    if let Some(fixer) = &opts.update_name {
        cmd = cmd.opt("--update-name", display(fixer));
    }
    cmd.opt("--export", "bgen-1.2")
        .arg("bits=8")
        .opt("--out", display(&opts.out))
        .opt("--keep-fam", display(&opts.keep_fam))
}

/// Minimum allele count of SNPs used to fit the REGENIE step 1 model.
pub const REGENIE_STEP1_MIN_AC: u64 = 100;

/// Maximum allele count for step 1 SNPs: `2N - 100` for N included samples.
pub fn regenie_max_ac(n_samples: usize) -> Option<u64> {
    let max = (n_samples as u64 * 2).checked_sub(100)?;
    (max >= REGENIE_STEP1_MIN_AC).then_some(max)
}

#[derive(Debug, Clone)]
pub struct Plink2SnpList {
    pub bfile: PathBuf,
    pub max_ac: u64,
    pub extract: Option<PathBuf>,
    pub out: PathBuf,
}

/// SNP list for REGENIE step 1, filtered on allele count.
pub fn plink2_write_snplist(plink2: &str, opts: &Plink2SnpList) -> ToolCommand {
    let mut cmd = ToolCommand::new(plink2)
        .opt("--bfile", display(&opts.bfile))
        .opt("--min-ac", REGENIE_STEP1_MIN_AC)
        .opt("--max-ac", opts.max_ac)
        .arg("--write-snplist")
        .opt("--out", display(&opts.out));
    if let Some(extract) = &opts.extract {
        cmd = cmd.opt("--extract", display(extract));
    }
    cmd
}

// ---------------------------------------------------------------------------
// BOLT-LMM
// ---------------------------------------------------------------------------

/// How BOLT receives the imputed/mask genotypes.
#[derive(Debug, Clone)]
pub enum BoltGenotypes {
    /// `--bgenSampleFileList` pointing at a file of `<bgen> <sample>` lines.
    BgenList { list: PathBuf, stats: PathBuf },
    /// One `--dosageFile` per chromosome and a single FID/IID file.
    Dosage {
        dosage_files: Vec<PathBuf>,
        fid_iid: PathBuf,
        stats: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct BoltOptions {
    pub bfile: PathBuf,
    pub exclude: PathBuf,
    pub pheno_covar_file: PathBuf,
    pub pheno_name: String,
    pub ld_scores: PathBuf,
    pub genetic_map: PathBuf,
    pub threads: usize,
    pub stats_file: PathBuf,
    pub genotypes: BoltGenotypes,
    pub non_infinite: bool,
    pub quantitative_covariates: Vec<String>,
    pub categorical_covariates: Vec<String>,
}

const BOLT_BASE_CATEGORICAL: &[&str] = &["sex", "wes_batch"];
const BOLT_BASE_QUANTITATIVE: &[&str] = &["age", "age_squared", "PC{1:10}"];

pub fn bolt_command(bolt: &str, opts: &BoltOptions) -> ToolCommand {
    let mut cmd = ToolCommand::new(bolt)
        .assign("--bfile", display(&opts.bfile))
        .assign("--exclude", display(&opts.exclude))
        .assign("--phenoFile", display(&opts.pheno_covar_file))
        .assign("--phenoCol", &opts.pheno_name)
        .assign("--covarFile", display(&opts.pheno_covar_file));
    for covar in BOLT_BASE_CATEGORICAL {
        cmd = cmd.assign("--covarCol", covar);
    }
    for covar in BOLT_BASE_QUANTITATIVE {
        cmd = cmd.assign("--qCovarCol", covar);
    }
    cmd = cmd
        .assign("--covarMaxLevels", 110)
        .assign("--LDscoresFile", display(&opts.ld_scores))
        .assign("--geneticMapFile", display(&opts.genetic_map))
        .assign("--numThreads", opts.threads)
        .assign("--statsFile", display(&opts.stats_file))
        .arg("--verboseStats");

    match &opts.genotypes {
        BoltGenotypes::Dosage {
            dosage_files,
            fid_iid,
            stats,
        } => {
            for file in dosage_files {
                cmd = cmd.assign("--dosageFile", display(file));
            }
            cmd = cmd
                .assign("--dosageFidIidFile", display(fid_iid))
                .assign("--statsFileDosageSnps", display(stats));
        }
        BoltGenotypes::BgenList { list, stats } => {
            cmd = cmd
                .assign("--bgenSampleFileList", display(list))
                .assign("--statsFileBgenSnps", display(stats));
        }
    }

    cmd = if opts.non_infinite {
        cmd.arg("--lmmForceNonInf")
    } else {
        cmd.arg("--lmmInfOnly")
    };

    for covar in &opts.quantitative_covariates {
        cmd = cmd.assign("--qCovarCol", covar);
    }
    for covar in &opts.categorical_covariates {
        cmd = cmd.assign("--covarCol", covar);
    }
    cmd
}

// ---------------------------------------------------------------------------
// REGENIE
// ---------------------------------------------------------------------------

const REGENIE_BASE_QUANTITATIVE: &[&str] = &[
    "PC1", "PC2", "PC3", "PC4", "PC5", "PC6", "PC7", "PC8", "PC9", "PC10", "age", "age_squared",
    "sex",
];
const REGENIE_BASE_CATEGORICAL: &[&str] = &["wes_batch"];

/// Covariate and trait-type flags shared by every REGENIE invocation.
#[derive(Debug, Clone, Default)]
pub struct RegenieCovariates {
    pub quantitative: Vec<String>,
    pub categorical: Vec<String>,
    pub is_binary: bool,
}

impl RegenieCovariates {
    fn apply(&self, mut cmd: ToolCommand) -> ToolCommand {
        let quant: Vec<&str> = REGENIE_BASE_QUANTITATIVE
            .iter()
            .copied()
            .chain(self.quantitative.iter().map(String::as_str))
            .collect();
        let cat: Vec<&str> = REGENIE_BASE_CATEGORICAL
            .iter()
            .copied()
            .chain(self.categorical.iter().map(String::as_str))
            .collect();
        cmd = cmd.opt("--covarColList", quant.join(","));
        if !cat.is_empty() {
            cmd = cmd.opt("--catCovarList", cat.join(","));
        }
        if self.is_binary {
            cmd = cmd.arg("--bt").arg("--firth").arg("--approx");
        }
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct RegenieStepOne {
    pub bed: PathBuf,
    pub extract: PathBuf,
    pub pheno_covar_file: PathBuf,
    pub pheno_name: String,
    pub out: PathBuf,
    pub threads: usize,
    pub covariates: RegenieCovariates,
}

pub fn regenie_step_one(regenie: &str, opts: &RegenieStepOne) -> ToolCommand {
    let cmd = ToolCommand::new(regenie)
        .opt("--step", 1)
        .opt("--bed", display(&opts.bed))
        .opt("--extract", display(&opts.extract))
        .opt("--covarFile", display(&opts.pheno_covar_file))
        .opt("--phenoFile", display(&opts.pheno_covar_file))
        .opt("--maxCatLevels", 100)
        .opt("--bsize", 1000)
        .opt("--out", display(&opts.out))
        .opt("--threads", opts.threads)
        .opt("--phenoCol", &opts.pheno_name);
    opts.covariates.apply(cmd)
}

/// Inputs common to both kinds of step 2 run.
#[derive(Debug, Clone)]
pub struct RegenieStepTwoInputs {
    pub bgen: PathBuf,
    pub sample: PathBuf,
    pub pheno_covar_file: PathBuf,
    pub pheno_name: String,
    pub pred: PathBuf,
    pub out: PathBuf,
    pub covariates: RegenieCovariates,
}

/// The three per-mask files written by the mask preparer.
#[derive(Debug, Clone)]
pub struct RegenieMaskFiles {
    pub annotation: PathBuf,
    pub mask_def: PathBuf,
    pub set_list: PathBuf,
}

fn regenie_step_two_base(regenie: &str, inputs: &RegenieStepTwoInputs) -> ToolCommand {
    ToolCommand::new(regenie)
        .opt("--step", 2)
        .opt("--bgen", display(&inputs.bgen))
        .opt("--sample", display(&inputs.sample))
        .opt("--covarFile", display(&inputs.pheno_covar_file))
        .opt("--phenoFile", display(&inputs.pheno_covar_file))
        .opt("--phenoCol", &inputs.pheno_name)
        .opt("--pred", display(&inputs.pred))
}

/// Gene-level burden/SKAT-O tests for one mask on one chromosome.
pub fn regenie_step_two_mask(
    regenie: &str,
    inputs: &RegenieStepTwoInputs,
    mask: &RegenieMaskFiles,
) -> ToolCommand {
    let cmd = regenie_step_two_base(regenie, inputs)
        .opt("--anno-file", display(&mask.annotation))
        .opt("--mask-def", display(&mask.mask_def))
        .opt("--set-list", display(&mask.set_list))
        .opt("--aaf-bins", 1)
        .opt("--vc-tests", "skato-acat,acato-full")
        .opt("--bsize", 400)
        .opt("--threads", 1)
        .opt("--minMAC", 1)
        .opt("--maxCatLevels", 100)
        .opt("--out", display(&inputs.out));
    inputs.covariates.apply(cmd)
}

/// Single-marker tests for one chromosome.
pub fn regenie_step_two_markers(regenie: &str, inputs: &RegenieStepTwoInputs) -> ToolCommand {
    let cmd = regenie_step_two_base(regenie, inputs)
        .opt("--maxCatLevels", 100)
        .opt("--bsize", 200)
        .opt("--threads", 4)
        .opt("--out", display(&inputs.out));
    inputs.covariates.apply(cmd)
}

// ---------------------------------------------------------------------------
// STAAR (R engine)
// ---------------------------------------------------------------------------

fn r_list(items: &[String]) -> String {
    if items.is_empty() {
        "NULL".to_string()
    } else {
        items.join(",")
    }
}

fn r_bool(b: bool) -> &'static str {
    if b {
        "TRUE"
    } else {
        "FALSE"
    }
}

#[derive(Debug, Clone)]
pub struct StaarNull {
    pub scripts: PathBuf,
    pub sparse_grm: PathBuf,
    pub sparse_grm_samples: PathBuf,
    pub pheno_covar_file: PathBuf,
    pub pheno_name: String,
    pub is_binary: bool,
    pub quantitative_covariates: Vec<String>,
    pub categorical_covariates: Vec<String>,
}

pub fn staar_null(rscript: &str, opts: &StaarNull) -> ToolCommand {
    ToolCommand::new(rscript)
        .arg(display(&opts.scripts.join("runSTAAR_Null.R")))
        .arg(display(&opts.sparse_grm))
        .arg(display(&opts.sparse_grm_samples))
        .arg(display(&opts.pheno_covar_file))
        .arg(opts.pheno_name.clone())
        .arg(r_bool(opts.is_binary))
        .arg(r_list(&opts.quantitative_covariates))
        .arg(r_list(&opts.categorical_covariates))
}

#[derive(Debug, Clone)]
pub struct StaarGenes {
    pub scripts: PathBuf,
    pub matrix: PathBuf,
    pub variants_table: PathBuf,
    pub null_model: PathBuf,
    pub pheno_name: String,
    pub tarball_prefix: String,
    pub chromosome: String,
}

pub fn staar_genes(rscript: &str, opts: &StaarGenes) -> ToolCommand {
    ToolCommand::new(rscript)
        .arg(display(&opts.scripts.join("runSTAAR_Genes.R")))
        .arg(display(&opts.matrix))
        .arg(display(&opts.variants_table))
        .arg(display(&opts.null_model))
        .arg(opts.pheno_name.clone())
        .arg(opts.tarball_prefix.clone())
        .arg(opts.chromosome.clone())
        .arg("none")
}

// ---------------------------------------------------------------------------
// bgzip / tabix
// ---------------------------------------------------------------------------

/// Compress in place (`file` → `file.gz`), overwriting an earlier result.
pub fn bgzip(bgzip: &str, file: &Path) -> ToolCommand {
    ToolCommand::new(bgzip).arg("-f").arg(display(file))
}

/// 1-based column numbers for a tabix index over a file with one header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabixColumns {
    pub seq: usize,
    pub begin: usize,
    pub end: usize,
}

impl TabixColumns {
    /// ENST chrom start end ...
    pub const GENE: TabixColumns = TabixColumns {
        seq: 2,
        begin: 3,
        end: 4,
    };
    /// varID CHROM POS ...
    pub const MARKER: TabixColumns = TabixColumns {
        seq: 2,
        begin: 3,
        end: 3,
    };
}

pub fn tabix(tabix: &str, file: &Path, cols: TabixColumns) -> ToolCommand {
    ToolCommand::new(tabix)
        .arg("-f")
        .opt("-S", 1)
        .opt("-s", cols.seq)
        .opt("-b", cols.begin)
        .opt("-e", cols.end)
        .arg(display(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flag names (text before any `=`) that occur more than once.
    fn repeated_flags(cmd: &ToolCommand) -> Vec<String> {
        let mut seen: Vec<&str> = Vec::new();
        let mut repeated: Vec<String> = Vec::new();
        for arg in &cmd.args {
            if !arg.starts_with("--") {
                continue;
            }
            let flag = arg.split('=').next().unwrap_or(arg);
            if seen.contains(&flag) {
                if !repeated.iter().any(|r| r == flag) {
                    repeated.push(flag.to_string());
                }
            } else {
                seen.push(flag);
            }
        }
        repeated
    }

    fn covars() -> RegenieCovariates {
        RegenieCovariates {
            quantitative: vec!["bmi".into()],
            categorical: vec!["centre".into()],
            is_binary: false,
        }
    }

    fn bolt_opts(genotypes: BoltGenotypes) -> BoltOptions {
        BoltOptions {
            bfile: "/test/genetics/arr".into(),
            exclude: "/test/genetics/low.snplist".into(),
            pheno_covar_file: "/test/pheno.txt".into(),
            pheno_name: "LDL".into(),
            ld_scores: "/tables/ld.tab.gz".into(),
            genetic_map: "/tables/map.txt.gz".into(),
            threads: 16,
            stats_file: "/test/out.stats.gz".into(),
            genotypes,
            non_infinite: false,
            quantitative_covariates: vec!["bmi".into(), "height".into()],
            categorical_covariates: vec!["centre".into()],
        }
    }

    #[test]
    fn test_bolt_bgen_flags() {
        let cmd = bolt_command(
            "bolt",
            &bolt_opts(BoltGenotypes::BgenList {
                list: "/test/poss_chromosomes.txt".into(),
                stats: "/test/out.bgen.stats.gz".into(),
            }),
        );
        assert_eq!(cmd.program, "bolt");
        assert_eq!(cmd.args[0], "--bfile=/test/genetics/arr");
        assert!(cmd.args.contains(&"--phenoCol=LDL".to_string()));
        assert!(cmd.args.contains(&"--numThreads=16".to_string()));
        assert!(cmd.args.contains(&"--qCovarCol=PC{1:10}".to_string()));
        assert!(cmd.args.contains(&"--qCovarCol=bmi".to_string()));
        assert!(cmd.args.contains(&"--covarCol=centre".to_string()));
        assert!(cmd
            .args
            .contains(&"--bgenSampleFileList=/test/poss_chromosomes.txt".to_string()));
        assert!(cmd.args.contains(&"--lmmInfOnly".to_string()));
        assert!(!cmd.args.contains(&"--lmmForceNonInf".to_string()));
    }

    /// Only covariate flags may repeat.
    #[test]
    fn test_bolt_repeats_only_covariates() {
        let cmd = bolt_command(
            "bolt",
            &bolt_opts(BoltGenotypes::BgenList {
                list: "l".into(),
                stats: "s".into(),
            }),
        );
        let mut repeated = repeated_flags(&cmd);
        repeated.sort();
        assert_eq!(repeated, vec!["--covarCol", "--qCovarCol"]);
    }

    #[test]
    fn test_bolt_dosage_mode() {
        let mut opts = bolt_opts(BoltGenotypes::Dosage {
            dosage_files: vec!["/test/1.INCLUDE.dosage".into(), "/test/2.INCLUDE.dosage".into()],
            fid_iid: "/test/1.INCLUDE.fam".into(),
            stats: "/test/out.dosage.stats.gz".into(),
        });
        opts.non_infinite = true;
        let cmd = bolt_command("bolt", &opts);
        let dosage: Vec<&String> = cmd
            .args
            .iter()
            .filter(|a| a.starts_with("--dosageFile="))
            .collect();
        assert_eq!(dosage.len(), 2);
        assert!(cmd
            .args
            .contains(&"--dosageFidIidFile=/test/1.INCLUDE.fam".to_string()));
        assert!(cmd.args.contains(&"--lmmForceNonInf".to_string()));
        assert!(!cmd.args.iter().any(|a| a.starts_with("--bgenSampleFileList")));
    }

    #[test]
    fn test_regenie_step_one() {
        let cmd = regenie_step_one(
            "regenie",
            &RegenieStepOne {
                bed: "/test/genetics/arr".into(),
                extract: "/test/REGENIE_extract.snplist".into(),
                pheno_covar_file: "/test/pheno.txt".into(),
                pheno_name: "LDL".into(),
                out: "/test/fit_out".into(),
                threads: 8,
                covariates: covars(),
            },
        );
        let line = cmd.to_string();
        assert!(line.starts_with("regenie --step 1 --bed /test/genetics/arr"));
        assert!(line.contains("--bsize 1000"));
        assert!(line.contains("--threads 8"));
        assert!(line.contains(
            "--covarColList PC1,PC2,PC3,PC4,PC5,PC6,PC7,PC8,PC9,PC10,age,age_squared,sex,bmi"
        ));
        assert!(line.contains("--catCovarList wes_batch,centre"));
        assert!(!line.contains("--bt"));
        assert!(repeated_flags(&cmd).is_empty());
    }

    #[test]
    fn test_regenie_step_two_mask_binary() {
        let mut cov = covars();
        cov.is_binary = true;
        let inputs = RegenieStepTwoInputs {
            bgen: "/test/1.markers.bgen".into(),
            sample: "/test/1.markers.bolt.sample".into(),
            pheno_covar_file: "/test/pheno.txt".into(),
            pheno_name: "T2D".into(),
            pred: "/test/fit_out_pred.list".into(),
            out: "/test/HC_PTV-MAF_01.1".into(),
            covariates: cov,
        };
        let mask = RegenieMaskFiles {
            annotation: "/test/HC_PTV-MAF_01.1.REGENIE.annotationFile.tsv".into(),
            mask_def: "/test/HC_PTV-MAF_01.1.REGENIE.maskfile.tsv".into(),
            set_list: "/test/HC_PTV-MAF_01.1.REGENIE.setListFile.tsv".into(),
        };
        let cmd = regenie_step_two_mask("regenie", &inputs, &mask);
        let line = cmd.to_string();
        assert!(line.contains("--vc-tests skato-acat,acato-full"));
        assert!(line.contains("--aaf-bins 1"));
        assert!(line.contains("--threads 1"));
        assert!(line.ends_with("--bt --firth --approx"));
        assert!(repeated_flags(&cmd).is_empty());

        let markers = regenie_step_two_markers("regenie", &inputs);
        assert!(markers.to_string().contains("--bsize 200 --threads 4"));
        assert!(!markers.args.iter().any(|a| a == "--anno-file"));
    }

    #[test]
    fn test_regenie_max_ac() {
        assert_eq!(regenie_max_ac(1000), Some(1900));
        assert_eq!(regenie_max_ac(100), Some(100));
        assert_eq!(regenie_max_ac(60), None);
        assert_eq!(regenie_max_ac(10), None);
    }

    #[test]
    fn test_plink2_export_with_rename() {
        let cmd = plink2_export_bgen(
            "plink2",
            &Plink2Export {
                bgen: "/test/A.1.BOLT.bgen".into(),
                sample: "/test/A.1.BOLT.sample".into(),
                update_name: Some("/test/A.1.fixer".into()),
                keep_fam: "/test/SAMPLES_Include.txt".into(),
                out: "/test/A.1".into(),
            },
        );
        assert_eq!(
            cmd.args,
            vec![
                "--threads", "4", "--bgen", "/test/A.1.BOLT.bgen", "ref-last", "--sample",
                "/test/A.1.BOLT.sample", "--update-name", "/test/A.1.fixer", "--export",
                "bgen-1.2", "bits=8", "--out", "/test/A.1", "--keep-fam",
                "/test/SAMPLES_Include.txt",
            ]
        );
    }

    #[test]
    fn test_plink2_snplist_extract_optional() {
        let mut opts = Plink2SnpList {
            bfile: "/g/arr".into(),
            max_ac: 1900,
            extract: None,
            out: "/test/REGENIE_extract".into(),
        };
        let cmd = plink2_write_snplist("plink2", &opts);
        assert!(cmd.to_string().contains("--min-ac 100 --max-ac 1900 --write-snplist"));
        assert!(!cmd.args.contains(&"--extract".to_string()));
        opts.extract = Some("/g/snps.txt".into());
        let cmd = plink2_write_snplist("plink2", &opts);
        assert!(cmd.to_string().ends_with("--extract /g/snps.txt"));
    }

    #[test]
    fn test_staar_null_lists() {
        let cmd = staar_null(
            "Rscript",
            &StaarNull {
                scripts: "/prog".into(),
                sparse_grm: "/g/grm.mtx".into(),
                sparse_grm_samples: "/g/grm.ids".into(),
                pheno_covar_file: "/test/pheno.txt".into(),
                pheno_name: "LDL".into(),
                is_binary: false,
                quantitative_covariates: vec![],
                categorical_covariates: vec!["centre".into(), "array".into()],
            },
        );
        assert_eq!(cmd.args[0], "/prog/runSTAAR_Null.R");
        assert_eq!(&cmd.args[4..], &["LDL", "FALSE", "NULL", "centre,array"]);
    }

    #[test]
    fn test_tabix_columns() {
        let gene = tabix("tabix", Path::new("/t/x.tsv.gz"), TabixColumns::GENE);
        assert_eq!(gene.to_string(), "tabix -f -S 1 -s 2 -b 3 -e 4 /t/x.tsv.gz");
        let marker = tabix("tabix", Path::new("/t/m.tsv.gz"), TabixColumns::MARKER);
        assert_eq!(marker.to_string(), "tabix -f -S 1 -s 2 -b 3 -e 3 /t/m.tsv.gz");
    }
}
