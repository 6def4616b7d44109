//! Corpus discovery and chunking.
//!
//! Input paths may be individual files or directories. Directories are
//! walked recursively and filtered with the `[corpus]` include/exclude
//! globs. Every discovered file is processed in sorted relative-path
//! order so chunk order, and therefore `id_to_idx`, is reproducible.
//!
//! A file that cannot be used never aborts the corpus. It is recorded in
//! the [`CorpusReport`] with the reason:
//!
//! - unsupported or unreadable format, extraction failure
//! - larger than `corpus.max_file_bytes`
//! - a stem that normalizes to an empty `file_id`
//! - a `file_id` already claimed by an earlier file
//!
//! Files whose extracted text is empty are kept in the report as `empty`
//! and contribute zero chunks.

use anyhow::{bail, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};
use walkdir::WalkDir;

use citation_drift_core::chunk::chunk_pages;
use citation_drift_core::ident::file_id_for;
use citation_drift_core::models::Chunk;

use crate::config::Config;
use crate::extract::{extract_file, DocFormat};
use crate::progress::{Phase, ProgressEvent, ProgressReporter};

/// A document selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the input root, recorded on each chunk.
    pub rel_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CorpusReport {
    pub files_scanned: usize,
    pub files_ingested: usize,
    pub skipped: Vec<SkippedFile>,
    /// Files that extracted to no text.
    pub empty: Vec<String>,
}

impl CorpusReport {
    fn skip(&mut self, path: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(path, %reason, "skipping file");
        self.skipped.push(SkippedFile {
            path: path.to_string(),
            reason,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct Corpus {
    pub chunks: Vec<Chunk>,
    pub report: CorpusReport,
}

/// Walk `inputs` and return the matching files in sorted order.
pub fn discover(inputs: &[PathBuf], config: &Config) -> Result<Vec<SourceFile>> {
    let corpus = &config.corpus;
    let include_set = build_globset(&corpus.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(corpus.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for input in inputs {
        if !input.exists() {
            bail!("Input path does not exist: {}", input.display());
        }

        if input.is_file() {
            let rel_path = input
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| input.display().to_string());
            files.push(SourceFile {
                path: input.clone(),
                rel_path,
            });
            continue;
        }

        let walker = WalkDir::new(input).follow_links(corpus.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(input).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }

            files.push(SourceFile {
                path: path.to_path_buf(),
                rel_path: rel_str,
            });
        }
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path).then_with(|| a.path.cmp(&b.path)));
    files.dedup_by(|a, b| a.path == b.path);
    debug!(count = files.len(), "discovered corpus files");

    Ok(files)
}

/// Extract and chunk every file, isolating per-file failures.
pub fn load_corpus(
    files: &[SourceFile],
    config: &Config,
    progress: &dyn ProgressReporter,
) -> Corpus {
    let mut corpus = Corpus::default();
    let mut claimed: HashMap<String, String> = HashMap::new();
    let total = files.len() as u64;

    progress.report(ProgressEvent::Started {
        phase: Phase::Extracting,
    });

    for (i, file) in files.iter().enumerate() {
        corpus.report.files_scanned += 1;
        load_one(file, config, &mut claimed, &mut corpus);
        progress.report(ProgressEvent::Advanced {
            phase: Phase::Extracting,
            n: i as u64 + 1,
            total,
        });
    }

    corpus
}

fn load_one(
    file: &SourceFile,
    config: &Config,
    claimed: &mut HashMap<String, String>,
    corpus: &mut Corpus,
) {
    let report = &mut corpus.report;
    let rel = file.rel_path.as_str();

    if DocFormat::from_path(&file.path).is_none() {
        report.skip(rel, "unsupported file type");
        return;
    }

    match std::fs::metadata(&file.path) {
        Ok(meta) if meta.len() > config.corpus.max_file_bytes => {
            report.skip(
                rel,
                format!(
                    "file is {} bytes, over the {} byte limit",
                    meta.len(),
                    config.corpus.max_file_bytes
                ),
            );
            return;
        }
        Ok(_) => {}
        Err(e) => {
            report.skip(rel, e.to_string());
            return;
        }
    }

    let file_id = file_id_for(&file.path);
    if file_id.is_empty() {
        report.skip(rel, "file name normalizes to an empty file_id");
        return;
    }
    if let Some(owner) = claimed.get(&file_id) {
        report.skip(rel, format!("file_id '{}' already used by {}", file_id, owner));
        return;
    }

    let pages = match extract_file(&file.path) {
        Ok(pages) => pages,
        Err(e) => {
            report.skip(rel, e.to_string());
            return;
        }
    };

    claimed.insert(file_id.clone(), rel.to_string());
    report.files_ingested += 1;

    let chunks = chunk_pages(
        &file_id,
        rel,
        pages.iter().map(|p| (p.page_no, p.text.as_str())),
        config.chunking.max_tokens,
    );
    if chunks.is_empty() {
        warn!(path = rel, "no text extracted");
        report.empty.push(rel.to_string());
    }
    debug!(path = rel, file_id = %file_id, chunks = chunks.len(), "chunked file");
    corpus.chunks.extend(chunks);
}

/// Patterns match case-insensitively so `Bylaws.PDF` is picked up by `**/*.pdf`.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::path::Path;

    fn write(dir: &Path, rel: &str, body: &[u8]) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn discovers_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.md", b"B.");
        write(dir.path(), "a/c.txt", b"C.");
        write(dir.path(), "skip.bin", b"x");
        write(dir.path(), "node_modules/x.md", b"X.");

        let files = discover(&[dir.path().to_path_buf()], &Config::default()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["a/c.txt", "b.md"]);
    }

    #[test]
    fn uppercase_extensions_are_discovered() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Bylaws.MD", b"Pets are permitted.");
        write(dir.path(), "Rules.TXT", b"Quiet hours start at ten.");

        let config = Config::default();
        let files = discover(&[dir.path().to_path_buf()], &config).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["Bylaws.MD", "Rules.TXT"]);

        let corpus = load_corpus(&files, &config, &NoProgress);
        assert_eq!(corpus.report.files_ingested, 2);
        assert!(corpus.report.skipped.is_empty());
        assert_eq!(corpus.chunks[0].chunk_id, "bylaws_0_0");
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(&[dir.path().join("nope")], &Config::default()).is_err());
    }

    #[test]
    fn per_file_failures_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.pdf", b"not a pdf");
        write(dir.path(), "empty.md", b"   \n");
        write(dir.path(), "good.md", b"Pets are permitted. Quiet hours start at ten.");

        let config = Config::default();
        let files = discover(&[dir.path().to_path_buf()], &config).unwrap();
        let corpus = load_corpus(&files, &config, &NoProgress);

        assert_eq!(corpus.report.files_scanned, 3);
        assert_eq!(corpus.report.files_ingested, 2);
        assert_eq!(corpus.report.skipped.len(), 1);
        assert_eq!(corpus.report.skipped[0].path, "broken.pdf");
        assert_eq!(corpus.report.empty, vec!["empty.md".to_string()]);
        assert_eq!(corpus.chunks.len(), 1);
        assert_eq!(corpus.chunks[0].chunk_id, "good_0_0");
        assert_eq!(corpus.chunks[0].source_file, "good.md");
    }

    #[test]
    fn file_id_collision_skips_later_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Rules.md", b"First.");
        write(dir.path(), "rules.txt", b"Second.");

        let config = Config::default();
        let files = discover(&[dir.path().to_path_buf()], &config).unwrap();
        let corpus = load_corpus(&files, &config, &NoProgress);

        assert_eq!(corpus.chunks.len(), 1);
        assert_eq!(corpus.chunks[0].text, "First.");
        assert!(corpus.report.skipped[0].reason.contains("already used"));
    }

    #[test]
    fn oversized_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.md", &[b'a'; 64]);

        let mut config = Config::default();
        config.corpus.max_file_bytes = 10;
        let files = discover(&[dir.path().to_path_buf()], &config).unwrap();
        let corpus = load_corpus(&files, &config, &NoProgress);
        assert!(corpus.chunks.is_empty());
        assert!(corpus.report.skipped[0].reason.contains("byte limit"));
    }

    #[test]
    fn reingestion_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "Doc1.md",
            "Pets are permitted. Dogs must be leashed. Cats may roam.".as_bytes(),
        );
        let mut config = Config::default();
        config.chunking.max_tokens = 6;

        let files = discover(&[dir.path().to_path_buf()], &config).unwrap();
        let first = load_corpus(&files, &config, &NoProgress);
        let second = load_corpus(&files, &config, &NoProgress);
        assert_eq!(first.chunks, second.chunks);
        assert!(first.chunks.len() > 1);
        assert_eq!(first.chunks[0].chunk_id, "doc1_0_0");
    }
}
