//! Input resolution: normalise a user-supplied path, directory, or URL to a
//! list of local PDF files.
//!
//! pdfium needs a file-system path, so URLs are downloaded into a `TempDir`
//! that lives as long as the [`ResolvedInput`]. Magic bytes (`%PDF`) are
//! checked per file by [`validate_pdf`] so a stray non-PDF in a directory
//! fails that one document instead of the whole batch.

use crate::error::TranslateError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Where the PDFs of a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    File,
    Directory,
    Url,
}

/// The PDFs to process, in processing order.
#[derive(Debug)]
pub struct ResolvedInput {
    kind: InputKind,
    pdfs: Vec<PathBuf>,
    /// Kept alive so downloaded files survive until processing completes.
    _temp_dir: Option<TempDir>,
}

impl ResolvedInput {
    pub fn kind(&self) -> InputKind {
        self.kind
    }

    pub fn pdfs(&self) -> &[PathBuf] {
        &self.pdfs
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to local PDFs.
///
/// `selector` picks a single PDF out of a directory, by file name or stem
/// (`paper.pdf` or `paper`).
pub async fn resolve_input(
    input: &str,
    selector: Option<&str>,
    timeout_secs: u64,
) -> Result<ResolvedInput, TranslateError> {
    if input.trim().is_empty() {
        return Err(TranslateError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        let (path, temp_dir) = download_url(input, timeout_secs).await?;
        return Ok(ResolvedInput {
            kind: InputKind::Url,
            pdfs: vec![path],
            _temp_dir: Some(temp_dir),
        });
    }

    let path = PathBuf::from(input);
    if path.is_dir() {
        let pdfs = list_pdfs(&path, selector)?;
        debug!("Resolved {} PDF(s) in {}", pdfs.len(), path.display());
        return Ok(ResolvedInput {
            kind: InputKind::Directory,
            pdfs,
            _temp_dir: None,
        });
    }

    validate_pdf(&path)?;
    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput {
        kind: InputKind::File,
        pdfs: vec![path],
        _temp_dir: None,
    })
}

/// All `*.pdf` files directly inside `dir`, sorted by name.
fn list_pdfs(dir: &Path, selector: Option<&str>) -> Result<Vec<PathBuf>, TranslateError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => TranslateError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => TranslateError::ReadFailed {
            path: dir.to_path_buf(),
            source: e,
        },
    })?;

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")))
        .collect();
    pdfs.sort();

    if let Some(sel) = selector {
        pdfs.retain(|p| {
            p.file_name().is_some_and(|n| n == sel) || p.file_stem().is_some_and(|s| s == sel)
        });
    }

    if pdfs.is_empty() {
        return Err(TranslateError::NoPdfFound {
            dir: dir.to_path_buf(),
        });
    }
    Ok(pdfs)
}

/// Validate that `path` exists, is readable, and starts with `%PDF`.
pub fn validate_pdf(path: &Path) -> Result<(), TranslateError> {
    if !path.exists() {
        return Err(TranslateError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            use std::io::Read;
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(TranslateError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(TranslateError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(TranslateError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<(PathBuf, TempDir), TranslateError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| TranslateError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TranslateError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| TranslateError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(TranslateError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| TranslateError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());
    Ok((file_path, temp_dir))
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}
