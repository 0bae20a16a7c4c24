use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use tar::EntryType;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{HarvestError, Result};
use crate::pool::TaskPool;

pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// What became of one blob during an extraction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlobDisposition {
    Extracted,
    Skipped,
}

/// Typed outcome of one pass over a blob directory.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub extracted: usize,
    pub skipped: usize,
    pub failures: Vec<(PathBuf, HarvestError)>,
}

/// Unpacks archive blobs from a content store's blob directory into an
/// output tree.
///
/// Blobs are classified by the gzip magic bytes or a `.tar.gz` suffix;
/// everything else is ignored. Each blob runs on its own blocking task under
/// its own deadline, with at most `limit` in flight.
pub struct BlobExtractor {
    limit: usize,
    timeout: Duration,
}

impl BlobExtractor {
    pub fn new(limit: usize, timeout: Duration) -> Self {
        BlobExtractor { limit, timeout }
    }

    /// Extracts every archive blob found directly under `blob_dir` into
    /// `dest`. Per-blob failures land in the report; only a failure to read
    /// the directory itself is an error.
    pub async fn extract_dir(&self, blob_dir: &Path, dest: &Path) -> Result<ExtractionReport> {
        let mut entries = tokio::fs::read_dir(blob_dir)
            .await
            .map_err(|err| HarvestError::filesystem(blob_dir, err))?;

        let mut pool = TaskPool::new(self.limit);

        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|err| HarvestError::filesystem(blob_dir, err))?;
            let Some(entry) = entry else { break };

            let file_type = entry
                .file_type()
                .await
                .map_err(|err| HarvestError::filesystem(entry.path(), err))?;
            if file_type.is_dir() {
                continue;
            }

            let blob = entry.path();
            let dest = dest.to_path_buf();
            let deadline = self.timeout;
            pool.spawn(async move {
                let result = extract_blob(blob.clone(), dest, deadline).await;
                (blob, result)
            });
        }

        let mut report = ExtractionReport::default();
        for (blob, result) in pool.join_all().await {
            match result {
                Ok(BlobDisposition::Extracted) => report.extracted += 1,
                Ok(BlobDisposition::Skipped) => {
                    debug!("Blob {} is not an archive; ignored", blob.display());
                    report.skipped += 1;
                }
                Err(err) => report.failures.push((blob, err)),
            }
        }

        Ok(report)
    }
}

/// Classifies and unpacks one blob on the blocking pool, bounded by
/// `deadline`. When the deadline fires first the blob is reported failed;
/// the decompression task itself is abandoned, not interrupted.
async fn extract_blob(
    blob: PathBuf,
    dest: PathBuf,
    deadline: Duration,
) -> Result<BlobDisposition> {
    let operation = format!("extracting blob {}", blob.display());

    let work = tokio::task::spawn_blocking(move || {
        if !is_archive_blob(&blob)? {
            return Ok(BlobDisposition::Skipped);
        }
        unpack_tar_gz(&blob, &dest).map(|_| BlobDisposition::Extracted)
    });

    match tokio::time::timeout(deadline, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) if join_err.is_panic() => {
            std::panic::resume_unwind(join_err.into_panic())
        }
        Ok(Err(join_err)) => Err(HarvestError::format(operation, join_err)),
        Err(_) => Err(HarvestError::Timeout {
            operation,
            timeout: deadline,
        }),
    }
}

/// An archive blob is non-empty and either starts with the gzip magic bytes
/// or carries a `.tar.gz`-style name.
fn is_archive_blob(blob: &Path) -> Result<bool> {
    let metadata = std::fs::metadata(blob).map_err(|err| HarvestError::filesystem(blob, err))?;
    if metadata.len() == 0 {
        return Ok(false);
    }

    if blob.to_string_lossy().ends_with(".tar.gz") {
        return Ok(true);
    }

    let mut file = std::fs::File::open(blob).map_err(|err| HarvestError::filesystem(blob, err))?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(_) => Ok(false),
    }
}

fn unpack_tar_gz(blob: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(blob).map_err(|err| HarvestError::filesystem(blob, err))?;
    let decoder = GzDecoder::new(std::io::BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|err| HarvestError::format(format!("archive {}", blob.display()), err))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|err| HarvestError::format(format!("archive {}", blob.display()), err))?;
        let entry_path = entry
            .path()
            .map_err(|err| HarvestError::format(format!("archive {}", blob.display()), err))?
            .into_owned();

        if entry_path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
        {
            return Err(HarvestError::format(
                format!("archive {}", blob.display()),
                format!("entry {} escapes the extraction root", entry_path.display()),
            ));
        }

        let target = dest.join(&entry_path);

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&target)
                    .map_err(|err| HarvestError::filesystem(&target, err))?;
            }
            EntryType::Regular => {
                // Idempotent re-extraction: an existing file is never
                // overwritten.
                if target.exists() {
                    continue;
                }
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|err| HarvestError::filesystem(parent, err))?;
                }
                let mut out = std::fs::File::create(&target)
                    .map_err(|err| HarvestError::filesystem(&target, err))?;
                std::io::copy(&mut entry, &mut out).map_err(|err| {
                    HarvestError::format(
                        format!("archive entry {} in {}", entry_path.display(), blob.display()),
                        err,
                    )
                })?;
            }
            other => {
                return Err(HarvestError::format(
                    format!("archive {}", blob.display()),
                    format!(
                        "unsupported entry type {other:?} for {}",
                        entry_path.display()
                    ),
                ));
            }
        }
    }

    Ok(())
}

/// Every `.gz` file under `root`, recursively.
pub fn gz_files_under(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|err| HarvestError::from_walkdir(root, err))?;
        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(".gz")
        {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Decompresses a standalone (non-tar) `.gz` file into `dest_dir`, named by
/// the gzip header when present and by the source name with `.gz` stripped
/// otherwise. Empty inputs are skipped.
pub fn decompress_gz_file(gz_path: &Path, dest_dir: &Path) -> Result<Option<PathBuf>> {
    let metadata =
        std::fs::metadata(gz_path).map_err(|err| HarvestError::filesystem(gz_path, err))?;
    if metadata.len() == 0 {
        return Ok(None);
    }

    let file = std::fs::File::open(gz_path).map_err(|err| HarvestError::filesystem(gz_path, err))?;
    let mut decoder = GzDecoder::new(std::io::BufReader::new(file));

    // The gzip header is only parsed once the stream has been read, so
    // decompress fully before asking for the embedded name.
    let mut content = Vec::new();
    std::io::copy(&mut decoder, &mut content)
        .map_err(|err| HarvestError::format(format!("gzip file {}", gz_path.display()), err))?;

    let embedded_name = decoder
        .header()
        .and_then(|header| header.filename())
        .and_then(|name| std::str::from_utf8(name).ok())
        .map(str::to_string);

    let file_name = embedded_name.unwrap_or_else(|| {
        let name = gz_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.strip_suffix(".gz").unwrap_or(&name).to_string()
    });

    let out_path = dest_dir.join(file_name);
    std::fs::write(&out_path, content)
        .map_err(|err| HarvestError::filesystem(&out_path, err))?;

    Ok(Some(out_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn tar_gz(entries: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap()
    }

    async fn extract(dir: &Path, dest: &Path) -> ExtractionReport {
        BlobExtractor::new(10, Duration::from_secs(60))
            .extract_dir(dir, dest)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn extracts_archive_blobs_and_ignores_the_rest() {
        let blobs = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        std::fs::write(
            blobs.path().join("aaaa"),
            tar_gz(&[("e2e/report.xml", "<ok/>"), ("e2e/log.txt", "passed")]),
        )
        .unwrap();
        std::fs::write(blobs.path().join("bbbb"), b"{\"config\": true}").unwrap();
        std::fs::write(blobs.path().join("cccc"), b"").unwrap();

        let report = extract(blobs.path(), dest.path()).await;

        assert_eq!(report.extracted, 1);
        assert_eq!(report.skipped, 2);
        assert!(report.failures.is_empty());
        assert_eq!(
            std::fs::read_to_string(dest.path().join("e2e/report.xml")).unwrap(),
            "<ok/>"
        );
        assert_eq!(
            std::fs::read_to_string(dest.path().join("e2e/log.txt")).unwrap(),
            "passed"
        );
    }

    #[tokio::test]
    async fn re_extraction_preserves_existing_files() {
        let blobs = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        std::fs::write(blobs.path().join("aaaa"), tar_gz(&[("report.xml", "<new/>")])).unwrap();
        std::fs::write(dest.path().join("report.xml"), "<original/>").unwrap();

        let report = extract(blobs.path(), dest.path()).await;

        assert_eq!(report.extracted, 1);
        assert_eq!(
            std::fs::read_to_string(dest.path().join("report.xml")).unwrap(),
            "<original/>"
        );
    }

    #[tokio::test]
    async fn corrupt_gzip_is_a_format_error() {
        let blobs = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let mut corrupt = GZIP_MAGIC.to_vec();
        corrupt.extend_from_slice(b"definitely not a deflate stream");
        std::fs::write(blobs.path().join("aaaa"), corrupt).unwrap();

        let report = extract(blobs.path(), dest.path()).await;

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].1, HarvestError::Format { .. }));
        assert!(std::fs::read_dir(dest.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn unsupported_entry_type_fails_that_blob_only() {
        let blobs = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, "link", "target").unwrap();
        let bytes = builder.into_inner().unwrap().finish().unwrap();
        std::fs::write(blobs.path().join("aaaa"), bytes).unwrap();

        std::fs::write(blobs.path().join("bbbb"), tar_gz(&[("fine.txt", "ok")])).unwrap();

        let report = extract(blobs.path(), dest.path()).await;

        assert_eq!(report.extracted, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].0.ends_with("aaaa"));
        assert_eq!(
            std::fs::read_to_string(dest.path().join("fine.txt")).unwrap(),
            "ok"
        );
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout_error() {
        let blobs = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let entries: Vec<(String, String)> = (0..2000)
            .map(|i| (format!("logs/file-{i}.txt"), format!("line {i}")))
            .collect();
        let borrowed: Vec<(&str, &str)> = entries
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_str()))
            .collect();
        std::fs::write(blobs.path().join("aaaa"), tar_gz(&borrowed)).unwrap();

        let report = BlobExtractor::new(10, Duration::ZERO)
            .extract_dir(blobs.path(), dest.path())
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        let (blob, err) = &report.failures[0];
        assert!(blob.ends_with("aaaa"));
        assert!(matches!(err, HarvestError::Timeout { .. }));
    }

    #[test]
    fn decompress_gz_uses_embedded_name() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("blob.gz");

        let mut encoder = flate2::GzBuilder::new()
            .filename("build.log")
            .write(std::fs::File::create(&gz_path).unwrap(), Compression::default());
        encoder.write_all(b"build ok").unwrap();
        encoder.finish().unwrap();

        let out = decompress_gz_file(&gz_path, dir.path()).unwrap().unwrap();
        assert_eq!(out, dir.path().join("build.log"));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "build ok");
    }

    #[test]
    fn decompress_gz_falls_back_to_stripped_name() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("build-log.gz");

        let mut encoder = GzEncoder::new(
            std::fs::File::create(&gz_path).unwrap(),
            Compression::default(),
        );
        encoder.write_all(b"build ok").unwrap();
        encoder.finish().unwrap();

        let out = decompress_gz_file(&gz_path, dir.path()).unwrap().unwrap();
        assert_eq!(out, dir.path().join("build-log"));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "build ok");
    }

    #[test]
    fn decompress_gz_skips_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let gz_path = dir.path().join("empty.gz");
        std::fs::write(&gz_path, b"").unwrap();

        assert!(decompress_gz_file(&gz_path, dir.path()).unwrap().is_none());
    }

    #[test]
    fn gz_files_found_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/x.gz"), b"x").unwrap();
        std::fs::write(dir.path().join("a/y.txt"), b"y").unwrap();

        let files = gz_files_under(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a/b/x.gz")]);
    }
}
