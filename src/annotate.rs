/// Joins cohort result tables to their annotation (transcript table for
/// genes, variant index for markers), sorts by coordinate and writes a
/// bgzipped, tabix-indexed TSV.
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::aggregate::{ResultRow, ResultTable, NA};
use crate::command::{self, TabixColumns};
use crate::error::PipelineError;
use crate::invoke::run_tool;
use crate::pack::compare_chroms;
use crate::parse::table_reader;

/// Which coordinate layout an output table has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableShape {
    /// `ENST chrom start end ...`
    Gene,
    /// `varID CHROM POS ...`
    Marker,
}

impl TableShape {
    fn key_column(self) -> &'static str {
        match self {
            TableShape::Gene => "ENST",
            TableShape::Marker => "varID",
        }
    }

    fn coordinate_columns(self) -> &'static [&'static str] {
        match self {
            TableShape::Gene => &["chrom", "start", "end"],
            TableShape::Marker => &["CHROM", "POS"],
        }
    }

    fn tabix_columns(self) -> TabixColumns {
        match self {
            TableShape::Gene => TabixColumns::GENE,
            TableShape::Marker => TabixColumns::MARKER,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub extra: Vec<String>,
}

/// Annotation lookup keyed by transcript or variant ID.
#[derive(Debug, Clone)]
pub struct AnnotationTable {
    pub shape: TableShape,
    /// Passthrough columns, in file order.
    pub extra_columns: Vec<String>,
    pub entries: HashMap<String, Annotation>,
    files_loaded: usize,
}

fn is_true(value: &str) -> bool {
    matches!(value.trim(), "true" | "True" | "TRUE" | "T" | "1")
}

fn parse_coord(value: &str, column: &str, path: &Path, row: usize) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("'{}' row {}: bad {} '{}'", path.display(), row, column, value))
}

impl AnnotationTable {
    pub fn new(shape: TableShape) -> Self {
        Self {
            shape,
            extra_columns: Vec::new(),
            entries: HashMap::new(),
            files_loaded: 0,
        }
    }

    /// Load the transcript table. Rows flagged in a `fail` column are
    /// skipped and `fail` itself is not carried through.
    pub fn load_transcripts(path: &Path) -> Result<Self> {
        let mut table = Self::new(TableShape::Gene);
        table.extend_from(path)?;
        log::info!(
            "Loaded {} transcripts from {}",
            table.entries.len(),
            path.display()
        );
        Ok(table)
    }

    /// Load and stack per-chromosome variant index files. All files must
    /// share the same columns.
    pub fn load_variant_index(paths: &[PathBuf]) -> Result<Self> {
        let mut table = Self::new(TableShape::Marker);
        for path in paths {
            table.extend_from(path)?;
        }
        log::info!(
            "Loaded {} variant annotations from {} file(s)",
            table.entries.len(),
            paths.len()
        );
        Ok(table)
    }

    fn extend_from(&mut self, path: &Path) -> Result<()> {
        let mut reader = table_reader(path, b'\t', false)?;
        let headers = reader
            .headers()
            .with_context(|| format!("reading header of '{}'", path.display()))?
            .clone();
        let position = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| anyhow::anyhow!("'{}' has no '{}' column", path.display(), name))
        };

        let key_idx = position(self.shape.key_column())?;
        let coord_names = self.shape.coordinate_columns();
        let coord_idx: Vec<usize> = coord_names
            .iter()
            .map(|c| position(c))
            .collect::<Result<_>>()?;
        let fail_idx = headers.iter().position(|h| h == "fail");

        let mut fixed: Vec<usize> = vec![key_idx];
        fixed.extend(&coord_idx);
        fixed.extend(fail_idx);
        let extra_idx: Vec<usize> = (0..headers.len()).filter(|i| !fixed.contains(i)).collect();
        let extra_columns: Vec<String> =
            extra_idx.iter().map(|&i| headers[i].to_string()).collect();

        if self.files_loaded == 0 {
            self.extra_columns = extra_columns;
        } else if self.extra_columns != extra_columns {
            return Err(PipelineError::SchemaMismatch {
                tool: format!("annotation file '{}'", path.display()),
                expected: self.extra_columns.clone(),
                found: extra_columns,
            }
            .into());
        }

        let mut duplicates = 0usize;
        for (i, record) in reader.records().enumerate() {
            let row = i + 2;
            let record = record.with_context(|| format!("parsing '{}' row {}", path.display(), row))?;
            if fail_idx.is_some_and(|f| is_true(&record[f])) {
                continue;
            }
            let start = parse_coord(&record[coord_idx[1]], coord_names[1], path, row)?;
            let end = match coord_idx.get(2) {
                Some(&e) => parse_coord(&record[e], coord_names[2], path, row)?,
                None => start,
            };
            let annotation = Annotation {
                chrom: record[coord_idx[0]].to_string(),
                start,
                end,
                extra: extra_idx.iter().map(|&i| record[i].to_string()).collect(),
            };
            let key = record[key_idx].to_string();
            if self.entries.contains_key(&key) {
                duplicates += 1;
                continue;
            }
            self.entries.insert(key, annotation);
        }
        if duplicates > 0 {
            log::warn!(
                "{}: {} duplicate {} value(s); kept the first of each",
                path.display(),
                duplicates,
                self.shape.key_column()
            );
        }
        self.files_loaded += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Join and sort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRow {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AnnotatedTable {
    pub shape: TableShape,
    pub header: Vec<String>,
    pub rows: Vec<AnnotatedRow>,
}

/// Left join keeping every result row, then sort by coordinate.
///
/// Rows without an annotation match keep the locus the tool reported and
/// get `NA` in every passthrough column.
pub fn annotate<R: ResultRow>(table: &ResultTable<R>, annotations: &AnnotationTable) -> AnnotatedTable {
    let shape = annotations.shape;
    let mut header: Vec<String> = vec![shape.key_column().to_string()];
    header.extend(shape.coordinate_columns().iter().map(|c| c.to_string()));
    header.extend(annotations.extra_columns.iter().cloned());
    header.extend(table.columns.iter().cloned());

    let mut unmatched = 0usize;
    let mut rows: Vec<AnnotatedRow> = table
        .rows
        .iter()
        .map(|row| {
            let (chrom, start, end, extra) = match annotations.entries.get(row.key()) {
                Some(a) => (a.chrom.clone(), a.start, a.end, a.extra.clone()),
                None => {
                    unmatched += 1;
                    let locus = row.locus();
                    (
                        locus.chrom.clone(),
                        locus.pos,
                        locus.pos,
                        vec![NA.to_string(); annotations.extra_columns.len()],
                    )
                }
            };
            let mut cells = vec![row.key().to_string(), chrom.clone(), start.to_string()];
            if shape == TableShape::Gene {
                cells.push(end.to_string());
            }
            cells.extend(extra);
            cells.extend(row.fields());
            AnnotatedRow {
                chrom,
                start,
                end,
                cells,
            }
        })
        .collect();

    if unmatched > 0 {
        log::warn!(
            "{} of {} result rows have no {} annotation",
            unmatched,
            rows.len(),
            shape.key_column()
        );
    }

    rows.sort_by(|a, b| {
        compare_chroms(&a.chrom, &b.chrom)
            .then(a.start.cmp(&b.start))
            .then(a.end.cmp(&b.end))
    });

    AnnotatedTable { shape, header, rows }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

pub fn write_tsv(table: &AnnotatedTable, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating '{}'", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .terminator(csv::Terminator::Any(b'\n'))
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(BufWriter::new(file));
    writer.write_record(&table.header)?;
    for row in &table.rows {
        writer.write_record(&row.cells)?;
    }
    writer
        .flush()
        .with_context(|| format!("writing '{}'", path.display()))?;
    Ok(())
}

/// Write `path`, bgzip it and build a tabix index. Returns the `.gz` and
/// `.gz.tbi` paths.
pub fn write_indexed(
    table: &AnnotatedTable,
    path: &Path,
    bgzip: &str,
    tabix: &str,
    cwd: &Path,
) -> Result<Vec<PathBuf>> {
    write_tsv(table, path)?;
    run_tool(&command::bgzip(bgzip, path), cwd, None)?;

    let mut gz = path.as_os_str().to_owned();
    gz.push(".gz");
    let gz = PathBuf::from(gz);
    run_tool(
        &command::tabix(tabix, &gz, table.shape.tabix_columns()),
        cwd,
        None,
    )?;

    let mut tbi = gz.as_os_str().to_owned();
    tbi.push(".tbi");
    log::info!("Wrote {} ({} rows)", gz.display(), table.rows.len());
    Ok(vec![gz, PathBuf::from(tbi)])
}

/// Log the files a run leaves behind. Missing ones are flagged, not fatal.
pub fn report_outputs(outputs: &[PathBuf]) {
    log::info!("{:-^width$}", " outputs ", width = 50);
    for path in outputs {
        if path.exists() {
            log::info!("{}", path.display());
        } else {
            log::warn!("{} (not found)", path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
