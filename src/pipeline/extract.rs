//! Raw PDF extraction: positioned text spans, best-effort tables, and figures.
//!
//! The rest of the pipeline only sees the [`RawDocument`] produced here, via
//! the [`PdfExtractor`] trait, so tests can feed hand-built pages and other
//! backends can be slotted in.
//!
//! ## Why spawn_blocking?
//!
//! pdfium keeps thread-local state and is not async-safe. [`extract_pdf`]
//! runs the whole extraction on the blocking pool.
//!
//! ## Layout reconstruction
//!
//! pdfium reports text as segments (runs of same-styled characters). They
//! are grouped into lines by vertical centre, lines whose fragments sit in
//! well-separated columns for at least two consecutive rows become a table
//! grid, and the remaining lines are joined into paragraph spans wherever
//! the vertical gap stays below a fraction of the line height.

use crate::document::BBox;
use crate::error::TranslateError;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A positioned text run as delivered by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpan {
    pub text: String,
    pub bbox: BBox,
}

impl RawSpan {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

/// A table grid detected from column-aligned lines.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub bbox: BBox,
    pub cells: Vec<Vec<String>>,
}

/// An embedded figure, PNG-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub page_number: usize,
    pub bbox: BBox,
    pub bytes: Vec<u8>,
    /// Filled in once the figure has been written to disk.
    pub image_path: Option<String>,
}

/// Everything extracted from one page, spans in reading order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    /// 1-indexed.
    pub page_number: usize,
    pub width: f32,
    pub height: f32,
    pub spans: Vec<RawSpan>,
    pub tables: Vec<RawTable>,
    pub images: Vec<RawImage>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDocument {
    pub title: Option<String>,
    pub pages: Vec<RawPage>,
}

/// Source of raw page content. Implementations are blocking.
pub trait PdfExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<RawDocument, TranslateError>;
}

/// Run an extractor on the blocking pool.
pub async fn extract_pdf(
    extractor: Arc<dyn PdfExtractor>,
    path: &Path,
) -> Result<RawDocument, TranslateError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || extractor.extract(&path))
        .await
        .map_err(|e| TranslateError::Internal(format!("Extraction task panicked: {}", e)))?
}

// ── pdfium implementation ────────────────────────────────────────────────

/// [`PdfExtractor`] backed by pdfium-render.
#[derive(Debug, Clone, Default)]
pub struct PdfiumExtractor {
    password: Option<String>,
    include_images: bool,
}

impl PdfiumExtractor {
    pub fn new(password: Option<String>, include_images: bool) -> Self {
        Self {
            password,
            include_images,
        }
    }
}

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the
/// system library.
pub fn bind_pdfium() -> Result<Pdfium, TranslateError> {
    if let Ok(p) = std::env::var("PDFIUM_LIB_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Pdfium::bind_to_library(&path)
                .map(Pdfium::new)
                .map_err(|e| TranslateError::PdfiumBindingFailed(format!("{}: {e}", path.display())));
        }
        warn!("PDFIUM_LIB_PATH '{}' not found; trying default locations", p);
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| TranslateError::PdfiumBindingFailed(format!("{e:?}")))
}

impl PdfExtractor for PdfiumExtractor {
    fn extract(&self, path: &Path) -> Result<RawDocument, TranslateError> {
        let pdfium = bind_pdfium()?;
        let password = self.password.as_deref();

        let document = pdfium.load_pdf_from_file(path, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    TranslateError::WrongPassword {
                        path: path.to_path_buf(),
                    }
                } else {
                    TranslateError::PasswordRequired {
                        path: path.to_path_buf(),
                    }
                }
            } else {
                TranslateError::CorruptPdf {
                    path: path.to_path_buf(),
                    detail: err_str,
                }
            }
        })?;

        let title = document
            .metadata()
            .get(PdfDocumentMetadataTagType::Title)
            .map(|t| t.value().trim().to_string())
            .filter(|t| !t.is_empty());

        let mut pages = Vec::new();
        for (idx, page) in document.pages().iter().enumerate() {
            let page_number = idx + 1;
            let width = page.width().value;
            let height = page.height().value;

            let text = page.text().map_err(|e| TranslateError::ExtractionFailed {
                page: page_number,
                detail: format!("{:?}", e),
            })?;

            let mut fragments = Vec::new();
            for segment in text.segments().iter() {
                let raw = segment.text();
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let r = segment.bounds();
                fragments.push(RawSpan::new(
                    trimmed,
                    BBox::new(
                        r.left().value,
                        height - r.top().value,
                        r.right().value,
                        height - r.bottom().value,
                    ),
                ));
            }

            let lines = build_lines(fragments);
            let (tables, body) = split_tables(lines);
            let spans = build_paragraphs(&body);

            let images = if self.include_images {
                extract_images(&page, page_number, height)
            } else {
                Vec::new()
            };

            debug!(
                "Page {}: {} spans, {} tables, {} images",
                page_number,
                spans.len(),
                tables.len(),
                images.len()
            );

            pages.push(RawPage {
                page_number,
                width,
                height,
                spans,
                tables,
                images,
            });
        }

        info!("Extracted {} pages from {}", pages.len(), path.display());
        Ok(RawDocument { title, pages })
    }
}

fn extract_images(page: &PdfPage, page_number: usize, page_height: f32) -> Vec<RawImage> {
    let mut images = Vec::new();
    for object in page.objects().iter() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        let bounds = match object.bounds() {
            Ok(b) => b,
            Err(e) => {
                warn!("Page {}: image without bounds skipped: {:?}", page_number, e);
                continue;
            }
        };
        let image = match image_object.get_raw_image() {
            Ok(img) => img,
            Err(e) => {
                warn!("Page {}: image decode failed: {:?}", page_number, e);
                continue;
            }
        };
        let mut bytes = Vec::new();
        if let Err(e) = image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png) {
            warn!("Page {}: PNG encoding failed: {}", page_number, e);
            continue;
        }
        images.push(RawImage {
            page_number,
            bbox: BBox::new(
                bounds.left().value,
                page_height - bounds.top().value,
                bounds.right().value,
                page_height - bounds.bottom().value,
            ),
            bytes,
            image_path: None,
        });
    }
    images
}

// ── Layout helpers (pure) ────────────────────────────────────────────────

/// Horizontal gap (pt) that separates table columns rather than words.
const COLUMN_GAP: f32 = 15.0;

/// A paragraph continues while the gap to the next line stays below this
/// multiple of the line height.
const PARAGRAPH_GAP_FACTOR: f32 = 0.8;

/// One visual line: fragments sorted left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub fragments: Vec<RawSpan>,
    pub bbox: BBox,
}

impl Line {
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut prev_x1: Option<f32> = None;
        for f in &self.fragments {
            if let Some(x1) = prev_x1 {
                if f.bbox.x0 - x1 > 1.0 && !out.ends_with(' ') && !f.text.starts_with(' ') {
                    out.push(' ');
                }
            }
            out.push_str(&f.text);
            prev_x1 = Some(f.bbox.x1);
        }
        out
    }

    /// Fragments grouped into cells wherever the gap exceeds [`COLUMN_GAP`].
    pub fn cells(&self) -> Vec<String> {
        let mut cells: Vec<String> = Vec::new();
        let mut prev_x1: Option<f32> = None;
        for f in &self.fragments {
            match (prev_x1, cells.last_mut()) {
                (Some(x1), Some(cell)) if f.bbox.x0 - x1 <= COLUMN_GAP => {
                    cell.push(' ');
                    cell.push_str(&f.text);
                }
                _ => cells.push(f.text.clone()),
            }
            prev_x1 = Some(f.bbox.x1);
        }
        cells
    }
}

/// Group fragments into lines by vertical centre, top to bottom.
pub fn build_lines(mut fragments: Vec<RawSpan>) -> Vec<Line> {
    fragments.sort_by(|a, b| {
        a.bbox
            .y0
            .partial_cmp(&b.bbox.y0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.bbox
                    .x0
                    .partial_cmp(&b.bbox.x0)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    let mut lines: Vec<Line> = Vec::new();
    for frag in fragments {
        let (_, cy) = frag.bbox.center();
        let joins = lines.last().is_some_and(|line| {
            let tolerance = (line.bbox.height() * 0.5).max(1.0);
            (line.bbox.center().1 - cy).abs() <= tolerance
        });
        match lines.last_mut() {
            Some(line) if joins => {
                line.bbox = line.bbox.union(&frag.bbox);
                line.fragments.push(frag);
            }
            _ => lines.push(Line {
                bbox: frag.bbox,
                fragments: vec![frag],
            }),
        }
    }

    for line in &mut lines {
        line.fragments.sort_by(|a, b| {
            a.bbox
                .x0
                .partial_cmp(&b.bbox.x0)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    lines
}

/// Pull runs of ≥ 2 consecutive lines with the same column count (≥ 2) out
/// as tables. Returns the tables and the remaining body lines.
pub fn split_tables(lines: Vec<Line>) -> (Vec<RawTable>, Vec<Line>) {
    let mut tables = Vec::new();
    let mut body = Vec::new();
    let mut run: Vec<(Line, Vec<String>)> = Vec::new();

    let flush = |run: &mut Vec<(Line, Vec<String>)>, tables: &mut Vec<RawTable>, body: &mut Vec<Line>| {
        if run.len() >= 2 {
            let bbox = run
                .iter()
                .skip(1)
                .fold(run[0].0.bbox, |acc, (l, _)| acc.union(&l.bbox));
            tables.push(RawTable {
                bbox,
                cells: run.drain(..).map(|(_, c)| c).collect(),
            });
        } else {
            body.extend(run.drain(..).map(|(l, _)| l));
        }
    };

    for line in lines {
        let cells = line.cells();
        let width = cells.len();
        let continues = width >= 2 && run.last().is_none_or(|(_, c)| c.len() == width);
        if continues {
            run.push((line, cells));
            continue;
        }
        flush(&mut run, &mut tables, &mut body);
        if width >= 2 {
            run.push((line, cells));
        } else {
            body.push(line);
        }
    }
    flush(&mut run, &mut tables, &mut body);

    body.sort_by(|a, b| {
        a.bbox
            .y0
            .partial_cmp(&b.bbox.y0)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    (tables, body)
}

/// Join consecutive lines into paragraph spans.
pub fn build_paragraphs(lines: &[Line]) -> Vec<RawSpan> {
    let mut spans: Vec<RawSpan> = Vec::new();
    let mut prev: Option<&Line> = None;

    for line in lines {
        let text = line.text();
        let continues = prev.is_some_and(|p| {
            let gap = line.bbox.y0 - p.bbox.y1;
            gap >= -1.0 && gap <= p.bbox.height().max(1.0) * PARAGRAPH_GAP_FACTOR
        });

        match spans.last_mut() {
            Some(span) if continues => {
                if span.text.ends_with('-') {
                    span.text.pop();
                } else {
                    span.text.push(' ');
                }
                span.text.push_str(&text);
                span.bbox = span.bbox.union(&line.bbox);
            }
            _ => spans.push(RawSpan::new(text, line.bbox)),
        }
        prev = Some(line);
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(text: &str, x0: f32, y0: f32, x1: f32) -> RawSpan {
        RawSpan::new(text, BBox::new(x0, y0, x1, y0 + 10.0))
    }

    #[test]
    fn fragments_on_same_baseline_form_one_line() {
        let lines = build_lines(vec![
            frag("world", 60.0, 100.5, 90.0),
            frag("Hello", 10.0, 100.0, 50.0),
            frag("Next", 10.0, 115.0, 40.0),
        ]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "Hello world");
        assert_eq!(lines[1].text(), "Next");
    }

    #[test]
    fn close_lines_join_into_paragraph_with_dehyphenation() {
        let lines = build_lines(vec![
            frag("Neural net-", 10.0, 100.0, 80.0),
            frag("works learn.", 10.0, 112.0, 90.0),
            frag("New paragraph.", 10.0, 160.0, 100.0),
        ]);
        let spans = build_paragraphs(&lines);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].text, "Neural networks learn.");
        assert_eq!(spans[1].text, "New paragraph.");
    }

    #[test]
    fn column_aligned_rows_become_table() {
        let lines = build_lines(vec![
            frag("Intro text", 10.0, 50.0, 90.0),
            frag("Model", 10.0, 100.0, 50.0),
            frag("Acc", 120.0, 100.0, 150.0),
            frag("BERT", 10.0, 112.0, 45.0),
            frag("91.2", 120.0, 112.0, 145.0),
            frag("Closing text", 10.0, 160.0, 90.0),
        ]);
        let (tables, body) = split_tables(lines);
        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables[0].cells,
            vec![vec!["Model", "Acc"], vec!["BERT", "91.2"]]
        );
        assert_eq!(body.len(), 2);
        assert_eq!(body[0].text(), "Intro text");
    }

    #[test]
    fn single_columnar_line_stays_body() {
        let lines = build_lines(vec![
            frag("Left", 10.0, 100.0, 40.0),
            frag("Right", 200.0, 100.0, 240.0),
        ]);
        let (tables, body) = split_tables(lines);
        assert!(tables.is_empty());
        assert_eq!(body.len(), 1);
    }
}
