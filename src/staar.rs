/// STAAR runner: one null model per phenotype, then gene tests for every
/// (phenotype, mask, chromosome) with a prepared genotype matrix.
use anyhow::Result;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::aggregate::{read_staar_unit, Locus, ResultTable, StaarGeneRow};
use crate::annotate::{annotate, report_outputs, write_indexed, AnnotationTable};
use crate::cli::StaarArgs;
use crate::command::{staar_genes, staar_null, StaarGenes, StaarNull};
use crate::invoke::run_tool;
use crate::pack::{
    units_with_file, AssociationPack, Chromosome, JobResult, MaskUnit, ToolSettings,
};
use crate::pool::TaskPool;
use crate::prepare::read_variants_table;

pub fn run(args: StaarArgs) -> Result<()> {
    let chromosomes = Chromosome::autosomes_x_and_y();
    let pack = AssociationPack::from_args(&args.pack, &chromosomes, ToolSettings::default())?;

    log::info!("Running STAAR null model(s)");
    fit_null_models(&pack)?;

    let units = units_with_file(&pack.tarball_prefixes, &chromosomes, |prefix, chrom| {
        matrix_path(&pack, prefix, chrom)
    });
    log::info!(
        "Running STAAR gene tests for {} phenotype(s) over {} unit(s)",
        pack.pheno_names.len(),
        units.len()
    );
    let finished = run_gene_tests(&pack, &units)?;

    let genes = collect_results(&pack, &finished)?;
    let transcripts = AnnotationTable::load_transcripts(&pack.resources.transcripts)?;
    let mut outputs = write_indexed(
        &annotate(&genes, &transcripts),
        &pack.output_path(".genes.STAAR.stats.tsv"),
        &pack.executables.bgzip,
        &pack.executables.tabix,
        &pack.work_dir,
    )?;
    outputs.extend(pack.pheno_names.iter().map(|p| null_model_path(&pack, p)));
    report_outputs(&outputs);
    Ok(())
}

fn matrix_path(pack: &AssociationPack, prefix: &str, chrom: Chromosome) -> PathBuf {
    pack.path(format!("{}.{}.STAAR.matrix.rds", prefix, chrom))
}

fn variants_table_path(pack: &AssociationPack, prefix: &str, chrom: Chromosome) -> PathBuf {
    pack.path(format!("{}.{}.variants_table.STAAR.tsv", prefix, chrom))
}

fn null_model_path(pack: &AssociationPack, pheno: &str) -> PathBuf {
    pack.path(format!("{}.STAAR_null.rds", pheno))
}

fn results_path(pack: &AssociationPack, job: &JobResult) -> PathBuf {
    pack.path(format!(
        "{}.{}.{}.STAAR_results.tsv",
        job.tarball_prefix, job.phenotype, job.chromosome
    ))
}

/// Every null model must exist before any gene job starts, so this batch is
/// joined on its own.
fn fit_null_models(pack: &AssociationPack) -> Result<()> {
    let mut pool: TaskPool<'_, ()> =
        TaskPool::new("A STAAR null model thread failed", pack.threads, 1).progress_every(10);
    for pheno in &pack.pheno_names {
        pool.submit(move || {
            let opts = StaarNull {
                scripts: pack.resources.staar_scripts.clone(),
                sparse_grm: pack.resources.sparse_grm.clone(),
                sparse_grm_samples: pack.resources.sparse_grm_samples.clone(),
                pheno_covar_file: pack.resources.pheno_covar_file.clone(),
                pheno_name: pheno.clone(),
                is_binary: pack.is_binary,
                quantitative_covariates: pack.found_quantitative_covariates.clone(),
                categorical_covariates: pack.found_categorical_covariates.clone(),
            };
            run_tool(
                &staar_null(&pack.executables.rscript, &opts),
                &pack.work_dir,
                Some(&pack.path(format!("{}.STAAR_null.log", pheno))),
            )
        });
    }
    pool.join_all()?;
    Ok(())
}

fn run_gene_tests(pack: &AssociationPack, units: &[MaskUnit]) -> Result<Vec<JobResult>> {
    let mut pool = TaskPool::new("A STAAR thread failed", pack.threads, 1).progress_every(10);
    for pheno in &pack.pheno_names {
        for unit in units {
            pool.submit(move || {
                let chrom = unit.chromosome;
                let prefix = &unit.tarball_prefix;
                let opts = StaarGenes {
                    scripts: pack.resources.staar_scripts.clone(),
                    matrix: matrix_path(pack, prefix, chrom),
                    variants_table: variants_table_path(pack, prefix, chrom),
                    null_model: null_model_path(pack, pheno),
                    pheno_name: pheno.clone(),
                    tarball_prefix: prefix.clone(),
                    chromosome: chrom.to_string(),
                };
                run_tool(
                    &staar_genes(&pack.executables.rscript, &opts),
                    &pack.work_dir,
                    Some(&pack.path(format!("{}.{}.{}.STAAR.log", prefix, pheno, chrom))),
                )?;
                Ok(JobResult {
                    tarball_prefix: prefix.clone(),
                    chromosome: chrom,
                    phenotype: pheno.clone(),
                })
            });
        }
    }
    if pool.is_empty() {
        log::warn!("No STAAR genotype matrices found; the results table will be empty");
    }
    pool.join_all()
}

fn gene_loci(variants_table: &Path) -> Result<HashMap<String, Locus>> {
    Ok(read_variants_table(variants_table)?
        .genes
        .into_iter()
        .map(|g| {
            (
                g.enst,
                Locus {
                    chrom: g.chrom,
                    pos: g.pos,
                },
            )
        })
        .collect())
}

/// Stack every unit's results, placing each gene at its first variant.
fn collect_results(
    pack: &AssociationPack,
    finished: &[JobResult],
) -> Result<ResultTable<StaarGeneRow>> {
    let mut loci: HashMap<(String, Chromosome), HashMap<String, Locus>> = HashMap::new();
    let mut tables = Vec::with_capacity(finished.len());
    for job in finished {
        let table_path = variants_table_path(pack, &job.tarball_prefix, job.chromosome);
        let unit_loci = match loci.entry((job.tarball_prefix.clone(), job.chromosome)) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(gene_loci(&table_path)?),
        };
        tables.push(read_staar_unit(
            &results_path(pack, job),
            &job.tarball_prefix,
            &job.phenotype,
            unit_loci,
            &table_path,
        )?);
    }
    ResultTable::concat("STAAR", tables)
}
