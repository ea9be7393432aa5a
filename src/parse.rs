/// File parsing utilities: plain/gzip text readers, include lists and the
/// handful of tool log lines we pull numbers out of.
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Open a text file, transparently decompressing `.gz` (including bgzip,
/// which is multi-member gzip).
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>> {
    if !path.exists() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        }
        .into());
    }
    let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// CSV reader over a delimited text table with a header row.
///
/// With `skip_comments`, lines starting with `#` are ignored (REGENIE writes
/// `##` metadata above its header).
pub fn table_reader(
    path: &Path,
    delimiter: u8,
    skip_comments: bool,
) -> Result<csv::Reader<Box<dyn BufRead>>> {
    let input = open_text(path)?;
    let mut builder = csv::ReaderBuilder::new();
    builder.delimiter(delimiter).has_headers(true).flexible(false);
    if skip_comments {
        builder.comment(Some(b'#'));
    }
    Ok(builder.from_reader(input))
}

/// Read a one-ID-per-line include list into a set.
pub fn read_sample_set(path: &Path) -> Result<HashSet<String>> {
    let reader = open_text(path)?;
    let mut samples = HashSet::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading '{}' line {}", path.display(), i + 1))?;
        let id = line.trim();
        if !id.is_empty() {
            samples.insert(id.to_string());
        }
    }
    Ok(samples)
}

/// Number of samples listed in an include list (one per line).
pub fn count_samples(path: &Path) -> Result<usize> {
    let reader = open_text(path)?;
    let mut n = 0usize;
    for line in reader.lines() {
        let line = line.with_context(|| format!("reading '{}'", path.display()))?;
        if !line.trim().is_empty() {
            n += 1;
        }
    }
    Ok(n)
}

/// Variant IDs from a plink2 `.pvar`, in file order.
pub fn read_pvar_ids(path: &Path) -> Result<Vec<String>> {
    let reader = open_text(path)?;
    let mut id_col: Option<usize> = None;
    let mut ids = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading '{}' line {}", path.display(), i + 1))?;
        if line.starts_with("##") || line.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        match id_col {
            None => {
                id_col = cols.iter().position(|c| *c == "ID");
                if id_col.is_none() {
                    anyhow::bail!("'{}' has no ID column in header '{}'", path.display(), line);
                }
            }
            Some(idx) => {
                let id = cols.get(idx).ok_or_else(|| PipelineError::DimensionMismatch {
                    context: format!("'{}' line {}", path.display(), i + 1),
                    expected: idx + 1,
                    actual: cols.len(),
                })?;
                ids.push(id.to_string());
            }
        }
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Tool logs
// ---------------------------------------------------------------------------

/// First line of a log containing `pattern`.
pub fn find_log_line(path: &Path, pattern: &str) -> Result<Option<String>> {
    let reader = open_text(path)?;
    for line in reader.lines() {
        let line = line.with_context(|| format!("reading log '{}'", path.display()))?;
        if line.contains(pattern) {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

const BOLT_SAMPLES_PATTERN: &str = "samples (Nbgen):";

/// Sample count BOLT reports for the bgen data (`samples (Nbgen): 4567`).
pub fn parse_bolt_sample_count(log: &Path) -> Result<u64> {
    let line = find_log_line(log, BOLT_SAMPLES_PATTERN)?.ok_or_else(|| {
        PipelineError::LogFieldMissing {
            pattern: BOLT_SAMPLES_PATTERN.to_string(),
            path: log.to_path_buf(),
        }
    })?;
    let value = line
        .split_once(BOLT_SAMPLES_PATTERN)
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();
    value
        .parse()
        .with_context(|| format!("parsing sample count from '{}'", line))
}

const PLINK_REMAINING_PATTERN: &str = "variants remaining after main filters";

/// SNP count plink2 reports after filtering (`12345 variants remaining after main filters`).
pub fn parse_plink_remaining_variants(log: &Path) -> Result<Option<u64>> {
    let Some(line) = find_log_line(log, PLINK_REMAINING_PATTERN)? else {
        return Ok(None);
    };
    let before = line
        .split_once(PLINK_REMAINING_PATTERN)
        .map(|(head, _)| head)
        .unwrap_or_default();
    let count = before
        .split_whitespace()
        .last()
        .ok_or_else(|| anyhow::anyhow!("no count before '{}' in '{}'", PLINK_REMAINING_PATTERN, line))?
        .parse()
        .with_context(|| format!("parsing variant count from '{}'", line))?;
    Ok(Some(count))
}

/// Last `n` lines of a text file, for error context.
pub fn tail_lines(path: &Path, n: usize) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(n);
            lines[start..].join("\n")
        }
        Err(_) => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_gz(path: &Path, content: &str) {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        let file = File::create(path).unwrap();
        let mut gz = GzEncoder::new(file, Compression::fast());
        gz.write_all(content.as_bytes()).unwrap();
        gz.finish().unwrap();
    }

    #[test]
    fn test_open_text_reads_gz_and_plain() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("a.tsv.gz");
        let plain = dir.path().join("a.tsv");
        write_gz(&gz, "x\ty\n1\t2\n");
        std::fs::write(&plain, "x\ty\n1\t2\n").unwrap();

        for path in [&gz, &plain] {
            let lines: Vec<String> = open_text(path).unwrap().lines().map(|l| l.unwrap()).collect();
            assert_eq!(lines, vec!["x\ty", "1\t2"]);
        }
    }

    #[test]
    fn test_open_text_missing_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_text(&dir.path().join("nope.txt")).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingInput { .. })
        ));
    }

    #[test]
    fn test_count_samples_ignores_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SAMPLES_Include.txt");
        std::fs::write(&path, "1001\n1002\n\n1003\n").unwrap();
        assert_eq!(count_samples(&path).unwrap(), 3);
        let set = read_sample_set(&path).unwrap();
        assert!(set.contains("1002"));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_parse_bolt_sample_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.BOLT.log");
        std::fs::write(
            &log,
            "Reading bgen file list\nNumber of indivs in bgen: 500\nsamples (Nbgen): 4521\nDone\n",
        )
        .unwrap();
        assert_eq!(parse_bolt_sample_count(&log).unwrap(), 4521);
    }

    #[test]
    fn test_parse_bolt_sample_count_missing_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.BOLT.log");
        std::fs::write(&log, "nothing useful\n").unwrap();
        let err = parse_bolt_sample_count(&log).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::LogFieldMissing { .. })
        ));
    }

    #[test]
    fn test_parse_plink_remaining_variants() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("plink_out.txt");
        std::fs::write(
            &log,
            "PLINK v2.00a3\n--min-ac: 1200 variants removed.\n98765 variants remaining after main filters.\n",
        )
        .unwrap();
        assert_eq!(parse_plink_remaining_variants(&log).unwrap(), Some(98765));

        std::fs::write(&log, "no filters\n").unwrap();
        assert_eq!(parse_plink_remaining_variants(&log).unwrap(), None);
    }

    #[test]
    fn test_read_pvar_ids_skips_meta() {
        let dir = tempfile::tempdir().unwrap();
        let pvar = dir.path().join("m.pvar");
        std::fs::write(
            &pvar,
            "##fileformat=PVARv1.0\n#CHROM\tPOS\tID\tREF\tALT\n1\t100\tENST01\tA\tC\n1\t200\tENST02\tA\tC\n",
        )
        .unwrap();
        assert_eq!(read_pvar_ids(&pvar).unwrap(), vec!["ENST01", "ENST02"]);
    }

    #[test]
    fn test_tail_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("t.log");
        std::fs::write(&log, "a\nb\nc\nd\n").unwrap();
        assert_eq!(tail_lines(&log, 2), "c\nd");
        assert_eq!(tail_lines(&dir.path().join("missing"), 2), "");
    }
}
