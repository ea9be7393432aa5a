/// BOLT-LMM runner: prepares per-unit genotype files, runs BOLT once over
/// all of them and turns its stats file into gene and marker tables.
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use crate::aggregate::read_bolt_stats;
use crate::annotate::{annotate, report_outputs, write_indexed, AnnotationTable};
use crate::cli::BoltArgs;
use crate::command::{bolt_command, BoltGenotypes, BoltOptions};
use crate::invoke::run_tool;
use crate::pack::{units_with_file, AssociationPack, Chromosome, ToolSettings};
use crate::parse::parse_bolt_sample_count;
use crate::pool::TaskPool;
use crate::prepare::{filter_dosage, prepare_bolt_bgen, prepare_marker_bgen};

/// One `<genotype file> <sample file>` line of the BOLT input list.
#[derive(Debug, Clone)]
struct InputPair {
    genotypes: PathBuf,
    samples: PathBuf,
}

pub fn run(args: BoltArgs) -> Result<()> {
    let chromosomes = Chromosome::autosomes_and_x();
    let pack = AssociationPack::from_args(&args.pack, &chromosomes, tool_settings(&args))?;

    log::info!("Processing BGEN files for BOLT run...");
    let inputs = prepare_inputs(&pack, &chromosomes)?;
    anyhow::ensure!(!inputs.is_empty(), "no genotype files found for BOLT");

    log::info!("Running BOLT...");
    let log = pack.output_path(".BOLT.log");
    run_tool(
        &bolt_command(&pack.executables.bolt, &bolt_options(&pack, &inputs)),
        &pack.work_dir,
        Some(&log),
    )?;

    log::info!("Processing BOLT outputs...");
    let mut outputs = vec![pack.output_path(".stats.gz")];
    if pack.is_dosage {
        outputs.push(pack.output_path(".dosage.stats.gz"));
    } else {
        outputs.extend(process_outputs(&pack, &log)?);
    }
    outputs.push(log);
    report_outputs(&outputs);
    Ok(())
}

fn tool_settings(args: &BoltArgs) -> ToolSettings {
    ToolSettings {
        dosage_patterns: args.dosage.clone().zip(args.dosage_sample.clone()),
        bolt_non_infinite: args.bolt_non_infinite,
        ..ToolSettings::default()
    }
}

/// Prepare every unit in parallel and write `poss_chromosomes.txt`.
fn prepare_inputs(pack: &AssociationPack, chromosomes: &[Chromosome]) -> Result<Vec<InputPair>> {
    let mut inputs: Vec<InputPair> = Vec::new();
    let mut pool: TaskPool<'_, ()> =
        TaskPool::new("A BOLT thread failed", pack.threads, 4).progress_every(10);

    if pack.is_dosage {
        for (&chrom, files) in &pack.dosage_files {
            let name = chrom.to_string();
            inputs.push(InputPair {
                genotypes: pack.path(format!("{}.INCLUDE.dosage", name)),
                samples: pack.path(format!("{}.INCLUDE.fam", name)),
            });
            pool.submit(move || {
                filter_dosage(files, &pack.resources.sample_include, &name, &pack.work_dir)
                    .map(|_| ())
            });
        }
    } else {
        let units = units_with_file(&pack.tarball_prefixes, chromosomes, |prefix, chrom| {
            pack.path(format!("{}.{}.BOLT.bgen", prefix, chrom))
        });
        for unit in units {
            let stem = format!("{}.{}", unit.tarball_prefix, unit.chromosome);
            inputs.push(InputPair {
                genotypes: pack.path(format!("{}.bgen", stem)),
                samples: pack.path(format!("{}.sample", stem)),
            });
            pool.submit(move || prepare_bolt_bgen(pack, &unit.tarball_prefix, unit.chromosome));
        }

        if pack.run_marker_tests {
            for (&chrom, files) in &pack.bgen_files {
                inputs.push(InputPair {
                    genotypes: pack.path(format!("{}.markers.bgen", chrom)),
                    samples: pack.path(format!("{}.markers.bolt.sample", chrom)),
                });
                pool.submit(move || prepare_marker_bgen(pack, chrom, files));
            }
        }
    }

    let list = pack.path("poss_chromosomes.txt");
    let mut writer = BufWriter::new(
        File::create(&list).with_context(|| format!("creating '{}'", list.display()))?,
    );
    for pair in &inputs {
        writeln!(
            writer,
            "{} {}",
            pair.genotypes.display(),
            pair.samples.display()
        )?;
    }
    writer.flush()?;

    log::info!("Preparing {} BOLT input unit(s)", pool.len());
    pool.join_all()?;
    Ok(inputs)
}

fn bolt_options(pack: &AssociationPack, inputs: &[InputPair]) -> BoltOptions {
    let genotypes = if pack.is_dosage {
        BoltGenotypes::Dosage {
            dosage_files: inputs.iter().map(|p| p.genotypes.clone()).collect(),
            fid_iid: inputs
                .first()
                .map(|p| p.samples.clone())
                .unwrap_or_default(),
            stats: pack.output_path(".dosage.stats.gz"),
        }
    } else {
        BoltGenotypes::BgenList {
            list: pack.path("poss_chromosomes.txt"),
            stats: pack.output_path(".bgen.stats.gz"),
        }
    };
    BoltOptions {
        bfile: pack.resources.genetics_bfile.clone(),
        exclude: pack.resources.low_mac_list.clone(),
        pheno_covar_file: pack.resources.pheno_covar_file.clone(),
        pheno_name: pack.primary_phenotype().to_string(),
        ld_scores: pack.resources.ld_scores.clone(),
        genetic_map: pack.resources.genetic_map.clone(),
        threads: pack.threads,
        stats_file: pack.output_path(".stats.gz"),
        genotypes,
        non_infinite: pack.is_bolt_non_infinite,
        quantitative_covariates: pack.found_quantitative_covariates.clone(),
        categorical_covariates: pack.found_categorical_covariates.clone(),
    }
}

/// Gene and (optionally) marker tables from the bgen stats file.
fn process_outputs(pack: &AssociationPack, log: &std::path::Path) -> Result<Vec<PathBuf>> {
    let n_samples = parse_bolt_sample_count(log)?;
    log::info!("BOLT tested {} samples", n_samples);
    let tables = read_bolt_stats(&pack.output_path(".bgen.stats.gz"), n_samples)?;
    let exe = &pack.executables;

    let transcripts = AnnotationTable::load_transcripts(&pack.resources.transcripts)?;
    let mut outputs = write_indexed(
        &annotate(&tables.genes, &transcripts),
        &pack.output_path(".genes.BOLT.stats.tsv"),
        &exe.bgzip,
        &exe.tabix,
        &pack.work_dir,
    )?;

    if pack.run_marker_tests {
        let index_files: Vec<PathBuf> = pack
            .bgen_files
            .values()
            .map(|f| f.variant_index.clone())
            .collect();
        let index = AnnotationTable::load_variant_index(&index_files)?;
        outputs.extend(write_indexed(
            &annotate(&tables.markers, &index),
            &pack.output_path(".markers.BOLT.stats.tsv"),
            &exe.bgzip,
            &exe.tabix,
            &pack.work_dir,
        )?);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;
    use std::path::Path;

    fn pack_in(dir: &Path, extra: &[&str]) -> (AssociationPack, Vec<Chromosome>) {
        let mut argv = vec![
            "burden",
            "bolt",
            "--pheno-name",
            "LDL",
            "--output-prefix",
            "out",
            "--tarball-prefixes",
            "A,B",
            "--threads",
            "2",
            "--work-dir",
            dir.to_str().unwrap(),
        ];
        argv.extend_from_slice(extra);
        let Command::Bolt(args) = Cli::parse_from(argv).command else {
            panic!("expected bolt subcommand");
        };
        let chroms = Chromosome::autosomes_and_x();
        let pack = AssociationPack::from_args(&args.pack, &chroms, tool_settings(&args)).unwrap();
        (pack, chroms)
    }

    #[test]
    fn test_dosage_inputs_and_options() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for chrom in ["1", "2"] {
            std::fs::write(
                root.join(format!("chr{}.dosage", chrom)),
                "rs1\t1\t100\tA\tG\t0.1\t0.2\t0.3\n",
            )
            .unwrap();
            std::fs::write(root.join(format!("chr{}.sample", chrom)), "0\ts1\n0\ts2\n0\ts3\n")
                .unwrap();
        }
        std::fs::write(root.join("SAMPLES_Include.txt"), "s1\ns3\n").unwrap();

        let (pack, chroms) = pack_in(
            root,
            &["--dosage", "chr@.dosage", "--dosage-sample", "chr@.sample"],
        );
        assert!(pack.is_dosage);
        let inputs = prepare_inputs(&pack, &chroms).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(root.join("1.INCLUDE.dosage").exists());
        assert!(root.join("2.INCLUDE.fam").exists());

        let list = std::fs::read_to_string(root.join("poss_chromosomes.txt")).unwrap();
        assert_eq!(list.lines().count(), 2);
        assert!(list.lines().next().unwrap().ends_with("1.INCLUDE.fam"));

        let cmd = bolt_command("bolt", &bolt_options(&pack, &inputs));
        let dosage_args = cmd.args.iter().filter(|a| a.starts_with("--dosageFile=")).count();
        assert_eq!(dosage_args, 2);
        assert!(cmd
            .args
            .contains(&format!("--dosageFidIidFile={}", root.join("1.INCLUDE.fam").display())));
    }

    #[test]
    fn test_bgen_mode_uses_file_list() {
        let dir = tempfile::tempdir().unwrap();
        let (pack, _) = pack_in(dir.path(), &["--bolt-non-infinite"]);
        let opts = bolt_options(&pack, &[]);
        assert!(matches!(opts.genotypes, BoltGenotypes::BgenList { .. }));
        assert!(opts.non_infinite);
        assert_eq!(opts.stats_file, dir.path().join("out.stats.gz"));
    }

    /// Write an executable shell script standing in for an external tool.
    fn stub_tool(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    // Writes a one-variant pvar for --make-just-pvar; exports are no-ops.
    const PLINK2: &str = r#"out=""
pvar=0
while [ $# -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift ;;
    --make-just-pvar) pvar=1 ;;
  esac
  shift
done
if [ "$pvar" = 1 ]; then
  printf '##fileformat=PVARv1.0\n#CHROM\tPOS\tID\tREF\tALT\n1\t1000\tENST01\tC\tA\n' > "$out.pvar"
fi
"#;

    // Reports the bgen sample count and writes a gzipped bgen stats table
    // with one gene row, one marker row and one rsID row.
    const BOLT: &str = r#"for a in "$@"; do
  case "$a" in
    --statsFileBgenSnps=*) stats="${a#--statsFileBgenSnps=}" ;;
  esac
done
echo "Number of samples (Nbgen): 1000"
printf 'SNP\tCHR\tBP\tGENPOS\tALLELE1\tALLELE0\tA1FREQ\tINFO\tCHISQ_LINREG\tP_LINREG\tBETA\tSE\tCHISQ_BOLT_LMM_INF\tP_BOLT_LMM_INF\n' > stats.tmp
printf 'ENST01-A\t1\t1000\t0\tA\tC\t0.001\t1\t2.5\t0.11\t0.2\t0.1\t2.4\t0.12\n' >> stats.tmp
printf '1:12345:A:G\t1\t12345\t0\tG\tA\t0.25\t0.98\t3.9\t0.048\t0.05\t0.02\t3.8\t0.05\n' >> stats.tmp
printf 'rs999\t1\t20000\t0\tG\tA\t0.3\t1\t0.1\t0.9\t0.0\t0.1\t0.1\t0.9\n' >> stats.tmp
gzip -c stats.tmp > "$stats"
"#;

    #[test]
    fn test_full_run_bgen_mode() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("A.1.BOLT.bgen"), "").unwrap();
        std::fs::write(
            root.join("transcripts.tsv"),
            "ENST\tchrom\tstart\tend\tSYMBOL\nENST01\t1\t40\t900\tGENE1\n",
        )
        .unwrap();
        let plink2 = stub_tool(root, "plink2.sh", PLINK2);
        let bolt = stub_tool(root, "bolt.sh", BOLT);

        let argv = vec![
            "burden",
            "bolt",
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
            "--bolt",
            bolt.as_str(),
            "--bgzip",
            "true",
            "--tabix",
            "true",
        ];
        let Command::Bolt(args) = Cli::parse_from(argv).command else {
            panic!("expected bolt subcommand");
        };
        run(args).unwrap();

        let fixer = std::fs::read_to_string(root.join("A.1.fixer")).unwrap();
        assert_eq!(fixer, "ENST01 ENST01-A\n");
        let list = std::fs::read_to_string(root.join("poss_chromosomes.txt")).unwrap();
        assert_eq!(list.lines().count(), 1, "only mask A has a bgen on chromosome 1");

        let genes = std::fs::read_to_string(root.join("out.genes.BOLT.stats.tsv")).unwrap();
        let lines: Vec<&str> = genes.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ENST\tchrom\tstart\tend\tSYMBOL\tMASK\tMAF\tA1FREQ\t"));
        assert!(lines[0].ends_with("\tAC"));
        assert!(lines[1].starts_with("ENST01\t1\t40\t900\tGENE1\tA\tNA\t0.001\t"));
        assert!(lines[1].ends_with("\t2"), "AC = round(0.001 * 2 * 1000)");

        assert!(
            !root.join("out.markers.BOLT.stats.tsv").exists(),
            "marker table only with --run-marker-tests"
        );
    }

    #[test]
    fn test_failed_preparation_aborts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("A.1.BOLT.bgen"), "").unwrap();
        let (pack, chroms) = pack_in(root, &["--plink2", "false"]);
        let err = prepare_inputs(&pack, &chroms).unwrap_err();
        assert_eq!(err.to_string(), "A BOLT thread failed");
    }
}
