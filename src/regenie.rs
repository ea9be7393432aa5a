/// REGENIE runner: step 1 whole-genome model, per-chromosome bgen export,
/// per-mask set files, step 2 gene tests and optional marker tests.
use anyhow::Result;
use std::path::PathBuf;

use crate::aggregate::{
    concat_regenie_units, read_regenie_markers, read_regenie_unit, RegenieMarkerRow, ResultTable,
};
use crate::annotate::{annotate, report_outputs, write_indexed, AnnotationTable};
use crate::cli::RegenieArgs;
use crate::command::{
    plink2_write_snplist, regenie_max_ac, regenie_step_one, regenie_step_two_markers,
    regenie_step_two_mask, Plink2SnpList, RegenieCovariates, RegenieStepOne,
    RegenieStepTwoInputs, REGENIE_STEP1_MIN_AC,
};
use crate::error::PipelineError;
use crate::invoke::{concat_logs, run_tool};
use crate::pack::{
    units_with_file, AssociationPack, Chromosome, JobResult, MaskUnit, ToolSettings,
};
use crate::parse::{count_samples, parse_plink_remaining_variants};
use crate::pool::TaskPool;
use crate::prepare::{make_regenie_files, prepare_marker_bgen, regenie_mask_paths};

pub fn run(args: RegenieArgs) -> Result<()> {
    let chromosomes = Chromosome::autosomes_and_x();
    let settings = ToolSettings {
        regenie_snps: args.regenie_snps,
        ..ToolSettings::default()
    };
    let pack = AssociationPack::from_args(&args.pack, &chromosomes, settings)?;

    log::info!("Running REGENIE step 1");
    step_one(&pack)?;

    log::info!("Preparing marker bgen files for REGENIE step 2");
    prepare_bgens(&pack)?;

    let units = mask_units(&pack, &chromosomes);
    log::info!("Making REGENIE mask files for {} unit(s)", units.len());
    make_mask_files(&pack, &units)?;

    log::info!("Running REGENIE step 2");
    let finished = step_two(&pack, &units)?;

    let mut outputs = vec![
        pack.path("fit_out_pred.list"),
        pack.path("fit_out_1.loco"),
        pack.output_path(".REGENIE_step1.log"),
        pack.output_path(".REGENIE_step2.log"),
    ];
    let exe = &pack.executables;
    let genes = concat_regenie_units(
        finished
            .iter()
            .map(|job| read_regenie_unit(&unit_results_path(&pack, job), &job.tarball_prefix))
            .collect::<Result<Vec<_>>>()?,
    )?;
    let transcripts = AnnotationTable::load_transcripts(&pack.resources.transcripts)?;
    outputs.extend(write_indexed(
        &annotate(&genes, &transcripts),
        &pack.output_path(".genes.REGENIE.stats.tsv"),
        &exe.bgzip,
        &exe.tabix,
        &pack.work_dir,
    )?);

    if pack.run_marker_tests {
        log::info!("Running REGENIE marker tests");
        let markers = marker_tests(&pack)?;
        let index_files: Vec<PathBuf> = pack
            .bgen_files
            .values()
            .map(|f| f.variant_index.clone())
            .collect();
        let index = AnnotationTable::load_variant_index(&index_files)?;
        outputs.push(pack.output_path(".REGENIE_markers.log"));
        outputs.extend(write_indexed(
            &annotate(&markers, &index),
            &pack.output_path(".markers.REGENIE.stats.tsv"),
            &exe.bgzip,
            &exe.tabix,
            &pack.work_dir,
        )?);
    }

    report_outputs(&outputs);
    Ok(())
}

fn covariates(pack: &AssociationPack) -> RegenieCovariates {
    RegenieCovariates {
        quantitative: pack.found_quantitative_covariates.clone(),
        categorical: pack.found_categorical_covariates.clone(),
        is_binary: pack.is_binary,
    }
}

// ---------------------------------------------------------------------------
// Step 1
// ---------------------------------------------------------------------------

fn step_one(pack: &AssociationPack) -> Result<()> {
    let n_samples = count_samples(&pack.resources.sample_include)?;
    let max_ac = regenie_max_ac(n_samples).ok_or(PipelineError::TooFewSamples {
        n: n_samples,
        min_ac: REGENIE_STEP1_MIN_AC,
    })?;

    let snplist = Plink2SnpList {
        bfile: pack.resources.genetics_bfile.clone(),
        max_ac,
        extract: pack.regenie_snps_file.clone(),
        out: pack.path("REGENIE_extract"),
    };
    let plink_log = pack.path("plink_out.txt");
    run_tool(
        &plink2_write_snplist(&pack.executables.plink2, &snplist),
        &pack.work_dir,
        Some(&plink_log),
    )?;
    match parse_plink_remaining_variants(&plink_log)? {
        Some(n) => log::info!("Number of SNPs for REGENIE Step 1: {}", n),
        None => log::warn!("plink2 did not report a SNP count for REGENIE Step 1"),
    }

    let opts = RegenieStepOne {
        bed: pack.resources.genetics_bfile.clone(),
        extract: pack.path("REGENIE_extract.snplist"),
        pheno_covar_file: pack.resources.pheno_covar_file.clone(),
        pheno_name: pack.primary_phenotype().to_string(),
        out: pack.path("fit_out"),
        threads: pack.threads,
        covariates: covariates(pack),
    };
    run_tool(
        &regenie_step_one(&pack.executables.regenie, &opts),
        &pack.work_dir,
        Some(&pack.output_path(".REGENIE_step1.log")),
    )
}

// ---------------------------------------------------------------------------
// Step 2 inputs
// ---------------------------------------------------------------------------

fn prepare_bgens(pack: &AssociationPack) -> Result<()> {
    let mut pool: TaskPool<'_, ()> =
        TaskPool::new("A REGENIE bgen thread failed", pack.threads, 4).progress_every(10);
    for (&chrom, files) in &pack.bgen_files {
        pool.submit(move || prepare_marker_bgen(pack, chrom, files));
    }
    pool.join_all()?;
    Ok(())
}

/// (mask, chromosome) pairs with a variants table and a marker bgen to test against.
fn mask_units(pack: &AssociationPack, chromosomes: &[Chromosome]) -> Vec<MaskUnit> {
    let tested: Vec<Chromosome> = chromosomes
        .iter()
        .copied()
        .filter(|c| pack.bgen_files.contains_key(c))
        .collect();
    units_with_file(&pack.tarball_prefixes, &tested, |prefix, chrom| {
        variants_table_path(pack, prefix, chrom)
    })
}

fn variants_table_path(pack: &AssociationPack, prefix: &str, chrom: Chromosome) -> PathBuf {
    pack.path(format!("{}.{}.variants_table.STAAR.tsv", prefix, chrom))
}

fn make_mask_files(pack: &AssociationPack, units: &[MaskUnit]) -> Result<()> {
    let mut pool: TaskPool<'_, ()> =
        TaskPool::new("A REGENIE mask thread failed", pack.threads, 1).progress_every(10);
    for unit in units {
        pool.submit(move || {
            make_regenie_files(
                &variants_table_path(pack, &unit.tarball_prefix, unit.chromosome),
                &unit.tarball_prefix,
                &unit.chromosome.to_string(),
                &pack.work_dir,
            )
            .map(|_| ())
        });
    }
    pool.join_all()?;
    Ok(())
}

fn step_two_inputs(pack: &AssociationPack, chrom: Chromosome, out: PathBuf) -> RegenieStepTwoInputs {
    RegenieStepTwoInputs {
        bgen: pack.path(format!("{}.markers.bgen", chrom)),
        sample: pack.path(format!("{}.markers.bolt.sample", chrom)),
        pheno_covar_file: pack.resources.pheno_covar_file.clone(),
        pheno_name: pack.primary_phenotype().to_string(),
        pred: pack.path("fit_out_pred.list"),
        out,
        covariates: covariates(pack),
    }
}

// ---------------------------------------------------------------------------
// Step 2 and marker tests
// ---------------------------------------------------------------------------

fn unit_results_path(pack: &AssociationPack, job: &JobResult) -> PathBuf {
    pack.path(format!(
        "{}.{}_{}.regenie",
        job.tarball_prefix, job.chromosome, job.phenotype
    ))
}

fn step_two(pack: &AssociationPack, units: &[MaskUnit]) -> Result<Vec<JobResult>> {
    let mut pool = TaskPool::new("A REGENIE step 2 thread failed", pack.threads, 1)
        .progress_every(10);
    for unit in units {
        pool.submit(move || {
            let stem = format!("{}.{}", unit.tarball_prefix, unit.chromosome);
            let inputs = step_two_inputs(pack, unit.chromosome, pack.path(&stem));
            let masks = regenie_mask_paths(
                &pack.work_dir,
                &unit.tarball_prefix,
                &unit.chromosome.to_string(),
            );
            run_tool(
                &regenie_step_two_mask(&pack.executables.regenie, &inputs, &masks),
                &pack.work_dir,
                Some(&pack.path(format!("{}.REGENIE_step2.log", stem))),
            )?;
            Ok(JobResult {
                tarball_prefix: unit.tarball_prefix.clone(),
                chromosome: unit.chromosome,
                phenotype: pack.primary_phenotype().to_string(),
            })
        });
    }
    let finished = pool.join_all()?;

    let sections: Vec<(String, PathBuf)> = finished
        .iter()
        .map(|job| {
            (
                format!("{}-{}.log", job.tarball_prefix, job.chromosome),
                pack.path(format!(
                    "{}.{}.REGENIE_step2.log",
                    job.tarball_prefix, job.chromosome
                )),
            )
        })
        .collect();
    concat_logs(&pack.output_path(".REGENIE_step2.log"), &sections)?;
    Ok(finished)
}

fn marker_tests(pack: &AssociationPack) -> Result<ResultTable<RegenieMarkerRow>> {
    let chroms: Vec<Chromosome> = pack.bgen_files.keys().copied().collect();
    let mut pool: TaskPool<'_, Chromosome> =
        TaskPool::new("A REGENIE marker thread failed", pack.threads, 4).progress_every(1);
    for &chrom in &chroms {
        pool.submit(move || {
            let inputs =
                step_two_inputs(pack, chrom, pack.path(format!("{}.markers.REGENIE", chrom)));
            run_tool(
                &regenie_step_two_markers(&pack.executables.regenie, &inputs),
                &pack.work_dir,
                Some(&pack.path(format!("{}.REGENIE_markers.log", chrom))),
            )?;
            Ok(chrom)
        });
    }
    let finished = pool.join_all()?;

    let sections: Vec<(String, PathBuf)> = finished
        .iter()
        .map(|chrom| {
            (
                format!("{}.log", chrom),
                pack.path(format!("{}.REGENIE_markers.log", chrom)),
            )
        })
        .collect();
    concat_logs(&pack.output_path(".REGENIE_markers.log"), &sections)?;

    let tables = finished
        .iter()
        .map(|chrom| {
            read_regenie_markers(&pack.path(format!(
                "{}.markers.REGENIE_{}.regenie",
                chrom,
                pack.primary_phenotype()
            )))
        })
        .collect::<Result<Vec<_>>>()?;
    ResultTable::concat("REGENIE markers", tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;
    use std::path::Path;

    fn pack_in(dir: &Path, extra: &[&str]) -> AssociationPack {
        let mut argv = vec![
            "burden",
            "regenie",
            "--pheno-name",
            "LDL",
            "--output-prefix",
            "out",
            "--tarball-prefixes",
            "HC_PTV-MAF_01,MISS",
            "--threads",
            "1",
            "--work-dir",
            dir.to_str().unwrap(),
        ];
        argv.extend_from_slice(extra);
        let Command::Regenie(args) = Cli::parse_from(argv).command else {
            panic!("expected regenie subcommand");
        };
        AssociationPack::from_args(
            &args.pack,
            &Chromosome::autosomes_and_x(),
            ToolSettings::default(),
        )
        .unwrap()
    }

    fn touch(dir: &Path, name: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_mask_units_need_marker_bgen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "bgen/1.filtered.bgen");
        touch(root, "bgen/1.filtered.sample");
        touch(root, "HC_PTV-MAF_01.1.variants_table.STAAR.tsv");
        touch(root, "MISS.1.variants_table.STAAR.tsv");
        touch(root, "MISS.2.variants_table.STAAR.tsv");

        let pack = pack_in(root, &[]);
        let units = mask_units(&pack, &Chromosome::autosomes_and_x());
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.chromosome == Chromosome::Autosome(1)));
    }

    #[test]
    fn test_too_few_samples() {
        let dir = tempfile::tempdir().unwrap();
        let ids: String = (0..50).map(|i| format!("s{}\n", i)).collect();
        std::fs::write(dir.path().join("SAMPLES_Include.txt"), ids).unwrap();
        let pack = pack_in(dir.path(), &["--plink2", "true"]);
        let err = step_one(&pack).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::TooFewSamples { n: 50, .. })
        ));
    }

    #[test]
    fn test_step_two_concatenates_unit_logs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let pack = pack_in(root, &["--regenie", "echo"]);
        let units = vec![
            MaskUnit {
                tarball_prefix: "HC_PTV-MAF_01".to_string(),
                chromosome: Chromosome::Autosome(1),
            },
            MaskUnit {
                tarball_prefix: "MISS".to_string(),
                chromosome: Chromosome::Autosome(2),
            },
        ];
        let finished = step_two(&pack, &units).unwrap();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[1].phenotype, "LDL");
        assert_eq!(
            unit_results_path(&pack, &finished[0]),
            root.join("HC_PTV-MAF_01.1_LDL.regenie")
        );

        let combined = std::fs::read_to_string(root.join("out.REGENIE_step2.log")).unwrap();
        let banners: Vec<&str> = combined.lines().filter(|l| l.starts_with("---")).collect();
        assert_eq!(banners.len(), 2);
        assert!(banners[0].contains("HC_PTV-MAF_01-1.log"));
        assert!(banners[1].contains("MISS-2.log"));
        assert!(combined.contains("--anno-file"));
    }

    /// Write an executable shell script standing in for an external tool.
    fn stub_tool(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    // Reports a SNP count for --write-snplist and writes a plink2-style
    // .sample for --export.
    const PLINK2: &str = r#"out=""
export_bgen=0
while [ $# -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift ;;
    --export) export_bgen=1; shift ;;
  esac
  shift
done
echo "12 variants remaining after main filters."
if [ "$export_bgen" = 1 ]; then
  printf 'ID_1 ID_2 missing sex\n0 0 0 D\ns1 s1 0 NA\ns2 s2 0 NA\n' > "$out.sample"
fi
"#;

    // Step 2 mask runs write a results table: mask A has one gene with two
    // tests, mask B only a header.
    const REGENIE: &str = r#"step=""
out=""
anno=""
while [ $# -gt 0 ]; do
  case "$1" in
    --step) step="$2"; shift ;;
    --out) out="$2"; shift ;;
    --anno-file) anno="$2"; shift ;;
  esac
  shift
done
echo "regenie step $step"
if [ "$step" = 2 ] && [ -n "$anno" ]; then
  f="${out}_LDL.regenie"
  printf '##MASKS=<A="A">\nCHROM GENPOS ID ALLELE0 ALLELE1 A1FREQ N TEST BETA SE CHISQ LOG10P EXTRA\n' > "$f"
  case "$out" in
    */A.1)
      printf '1 50 ENST01.A.all ref A.all 0.001 1000 ADD 0.5 0.1 25 6 NA\n' >> "$f"
      printf '1 50 ENST01.A.all ref A.all 0.001 1000 ADD-SKATO-ACAT NA NA NA 4 DF=1\n' >> "$f"
      ;;
  esac
fi
"#;

    #[test]
    fn test_full_run_with_header_only_unit() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let ids: String = (0..100).map(|i| format!("s{}\n", i)).collect();
        std::fs::write(root.join("SAMPLES_Include.txt"), ids).unwrap();
        touch(root, "bgen/1.filtered.bgen");
        touch(root, "bgen/1.filtered.sample");
        std::fs::write(
            root.join("A.1.variants_table.STAAR.tsv"),
            "varID\tENST\tchrom\tpos\n1:50:C:G\tENST01\t1\t50\n",
        )
        .unwrap();
        std::fs::write(
            root.join("B.1.variants_table.STAAR.tsv"),
            "varID\tENST\tchrom\tpos\n1:70:G:T\tENST02\t1\t70\n",
        )
        .unwrap();
        std::fs::write(
            root.join("transcripts.tsv"),
            "ENST\tchrom\tstart\tend\tSYMBOL\n\
             ENST01\t1\t40\t900\tGENE1\n\
             ENST02\t1\t60\t800\tGENE2\n",
        )
        .unwrap();
        let plink2 = stub_tool(root, "plink2.sh", PLINK2);
        let regenie = stub_tool(root, "regenie.sh", REGENIE);

        let argv = vec![
            "burden",
            "regenie",
            "--pheno-name",
            "LDL",
            "--output-prefix",
            "out",
            "--tarball-prefixes",
            "A,B",
            "--threads",
            "1",
            "--work-dir",
            root.to_str().unwrap(),
            "--transcripts",
            "transcripts.tsv",
            "--plink2",
            plink2.as_str(),
            "--regenie",
            regenie.as_str(),
            "--bgzip",
            "true",
            "--tabix",
            "true",
        ];
        let Command::Regenie(args) = Cli::parse_from(argv).command else {
            panic!("expected regenie subcommand");
        };
        run(args).unwrap();

        let sample = std::fs::read_to_string(root.join("1.markers.bolt.sample")).unwrap();
        assert_eq!(sample.lines().count(), 4);
        assert!(root.join("A.1.REGENIE.setListFile.tsv").exists());
        assert!(root.join("B.1.REGENIE.annotationFile.tsv").exists());

        let step2 = std::fs::read_to_string(root.join("out.REGENIE_step2.log")).unwrap();
        assert_eq!(step2.lines().filter(|l| l.starts_with("---")).count(), 2);

        let genes = std::fs::read_to_string(root.join("out.genes.REGENIE.stats.tsv")).unwrap();
        let lines: Vec<&str> = genes.lines().collect();
        assert_eq!(lines.len(), 2, "header plus the single gene of mask A");
        assert!(lines[0].ends_with("\tPVALUE\tADD-SKATO-ACAT\tAC"));
        assert!(lines[1].starts_with("ENST01\t1\t40\t900\tGENE1\tA\tNA\t0.001\t1000\t0.5\t0.1\t25\t"));
        assert!(lines[1].ends_with("\t2"));
    }

    #[test]
    fn test_step_two_failure_names_batch() {
        let dir = tempfile::tempdir().unwrap();
        let pack = pack_in(dir.path(), &["--regenie", "false"]);
        let units = vec![MaskUnit {
            tarball_prefix: "MISS".to_string(),
            chromosome: Chromosome::X,
        }];
        let err = step_two(&pack, &units).unwrap_err();
        assert_eq!(err.to_string(), "A REGENIE step 2 thread failed");
        assert!(!dir.path().join("out.REGENIE_step2.log").exists());
    }
}
