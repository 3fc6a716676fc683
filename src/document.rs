//! Document model: blocks, pages, and the checkpoint format.
//!
//! A [`Document`] is what extraction produces and what translation
//! annotates. It serialises to the checkpoint JSON written next to every
//! report, so a run can be resumed after extraction or after translation
//! without paying for either stage twice:
//!
//! ```text
//! { "title": …,
//!   "stage": "extracted" | "translated",
//!   "pages": [ { "page_num": 1,
//!                "blocks": [ { "type": "text", "content": …, "bbox": …,
//!                              "translated_content": … }, … ] } ],
//!   "images": [ … ], "table_data": [ … ] }
//! ```
//!
//! Block content is a closed sum type ([`BlockContent`]). The variant is
//! fixed at construction and translated fields can be attached only once;
//! both rules are enforced by keeping the fields private.

use crate::error::TranslateError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

// ── Geometry ─────────────────────────────────────────────────────────────

/// Axis-aligned bounding box in PDF points, top-left origin.
///
/// `y0` is the top edge and grows downwards, so sorting by `y0` yields
/// reading order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Smallest box enclosing both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Vertical gap between two boxes; 0 when they overlap vertically.
    pub fn vertical_gap(&self, other: &BBox) -> f32 {
        if other.y0 >= self.y1 {
            other.y0 - self.y1
        } else if self.y0 >= other.y1 {
            self.y0 - other.y1
        } else {
            0.0
        }
    }
}

// ── Blocks ───────────────────────────────────────────────────────────────

/// Content type tag of a [`Block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Formula,
    Table,
    Image,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockKind::Text => "text",
            BlockKind::Formula => "formula",
            BlockKind::Table => "table",
            BlockKind::Image => "image",
        };
        f.write_str(s)
    }
}

/// Source payload and translation slot of a block, one variant per type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockContent {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translated_content: Option<String>,
    },
    Formula {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translated_content: Option<String>,
    },
    Table {
        content: Vec<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translated_cells: Option<Vec<Vec<String>>>,
    },
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_path: Option<String>,
        /// Text found inside the figure area (labels, axis titles).
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translated_content: Option<String>,
    },
}

/// Atomic unit of page content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    content: BlockContent,
    page_number: usize,
    bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    translated_caption: Option<String>,
}

impl Block {
    fn with_content(content: BlockContent, page_number: usize, bbox: BBox) -> Self {
        Self {
            content,
            page_number,
            bbox,
            caption: None,
            translated_caption: None,
        }
    }

    pub fn text(page_number: usize, bbox: BBox, content: impl Into<String>) -> Self {
        Self::with_content(
            BlockContent::Text {
                content: content.into(),
                translated_content: None,
            },
            page_number,
            bbox,
        )
    }

    pub fn formula(page_number: usize, bbox: BBox, content: impl Into<String>) -> Self {
        Self::with_content(
            BlockContent::Formula {
                content: content.into(),
                translated_content: None,
            },
            page_number,
            bbox,
        )
    }

    pub fn table(page_number: usize, bbox: BBox, cells: Vec<Vec<String>>) -> Self {
        Self::with_content(
            BlockContent::Table {
                content: cells,
                translated_cells: None,
            },
            page_number,
            bbox,
        )
    }

    pub fn image(
        page_number: usize,
        bbox: BBox,
        image_path: Option<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::with_content(
            BlockContent::Image {
                image_path,
                content: text.into(),
                translated_content: None,
            },
            page_number,
            bbox,
        )
    }

    pub fn kind(&self) -> BlockKind {
        match self.content {
            BlockContent::Text { .. } => BlockKind::Text,
            BlockContent::Formula { .. } => BlockKind::Formula,
            BlockContent::Table { .. } => BlockKind::Table,
            BlockContent::Image { .. } => BlockKind::Image,
        }
    }

    pub fn content(&self) -> &BlockContent {
        &self.content
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    /// Source text for text, formula, and image blocks. `None` for tables.
    pub fn source_text(&self) -> Option<&str> {
        match &self.content {
            BlockContent::Text { content, .. }
            | BlockContent::Formula { content, .. }
            | BlockContent::Image { content, .. } => Some(content),
            BlockContent::Table { .. } => None,
        }
    }

    /// Source grid for table blocks.
    pub fn cells(&self) -> Option<&[Vec<String>]> {
        match &self.content {
            BlockContent::Table { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn image_path(&self) -> Option<&str> {
        match &self.content {
            BlockContent::Image { image_path, .. } => image_path.as_deref(),
            _ => None,
        }
    }

    pub fn translated_text(&self) -> Option<&str> {
        match &self.content {
            BlockContent::Text {
                translated_content, ..
            }
            | BlockContent::Formula {
                translated_content, ..
            }
            | BlockContent::Image {
                translated_content, ..
            } => translated_content.as_deref(),
            BlockContent::Table { .. } => None,
        }
    }

    pub fn translated_cells(&self) -> Option<&[Vec<String>]> {
        match &self.content {
            BlockContent::Table {
                translated_cells, ..
            } => translated_cells.as_deref(),
            _ => None,
        }
    }

    pub fn caption(&self) -> Option<&str> {
        self.caption.as_deref()
    }

    pub fn translated_caption(&self) -> Option<&str> {
        self.translated_caption.as_deref()
    }

    /// Whether the main payload has been translated (captions aside).
    pub fn is_translated(&self) -> bool {
        match &self.content {
            BlockContent::Table {
                translated_cells, ..
            } => translated_cells.is_some(),
            _ => self.translated_text().is_some(),
        }
    }

    /// Concatenate another text block onto this one. Only valid before
    /// translation; returns `false` and leaves `self` untouched otherwise.
    pub(crate) fn absorb_text(&mut self, separator: &str, tail: &str, other_bbox: BBox) -> bool {
        match &mut self.content {
            BlockContent::Text {
                content,
                translated_content: None,
            } => {
                content.push_str(separator);
                content.push_str(tail);
                self.bbox = self.bbox.union(&other_bbox);
                true
            }
            _ => false,
        }
    }

    /// Attach a caption found near this block. First caption wins.
    pub fn attach_caption(&mut self, caption: impl Into<String>) -> bool {
        if self.caption.is_some() {
            return false;
        }
        self.caption = Some(caption.into());
        true
    }

    /// Set the image file path once the figure has been written to disk.
    pub fn assign_image_path(&mut self, path: impl Into<String>) -> bool {
        match &mut self.content {
            BlockContent::Image { image_path, .. } if image_path.is_none() => {
                *image_path = Some(path.into());
                true
            }
            _ => false,
        }
    }

    /// Attach the translation of a text, formula, or image block.
    ///
    /// Returns `false` if a translation is already present or the block is a
    /// table; the existing value is never overwritten.
    pub fn set_translation(&mut self, translation: impl Into<String>) -> bool {
        match &mut self.content {
            BlockContent::Text {
                translated_content, ..
            }
            | BlockContent::Formula {
                translated_content, ..
            }
            | BlockContent::Image {
                translated_content, ..
            } => {
                if translated_content.is_some() {
                    return false;
                }
                *translated_content = Some(translation.into());
                true
            }
            BlockContent::Table { .. } => false,
        }
    }

    /// Attach the translated grid of a table block. At most once.
    pub fn set_translated_cells(&mut self, cells: Vec<Vec<String>>) -> bool {
        match &mut self.content {
            BlockContent::Table {
                translated_cells, ..
            } if translated_cells.is_none() => {
                *translated_cells = Some(cells);
                true
            }
            _ => false,
        }
    }

    /// Attach the caption translation. At most once, and only if a caption exists.
    pub fn set_translated_caption(&mut self, translation: impl Into<String>) -> bool {
        if self.caption.is_none() || self.translated_caption.is_some() {
            return false;
        }
        self.translated_caption = Some(translation.into());
        true
    }
}

// ── Pages & documents ────────────────────────────────────────────────────

/// Ordered blocks of one page. Insertion order is reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_num: usize,
    pub blocks: Vec<Block>,
}

impl Page {
    pub fn new(page_num: usize, blocks: Vec<Block>) -> Self {
        Self { page_num, blocks }
    }
}

/// How far a checkpoint has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Extracted,
    Translated,
}

/// Flat view of one figure, cross-referenced by page and ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub page_number: usize,
    /// Position among the image blocks of the same page (0-based).
    pub index: usize,
    pub bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_caption: Option<String>,
}

/// Flat view of one table, cross-referenced by page and ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub page_number: usize,
    /// Position among the table blocks of the same page (0-based).
    pub index: usize,
    pub bbox: BBox,
    pub cells: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_cells: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_caption: Option<String>,
}

/// A whole extracted (and possibly translated) document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    #[serde(default)]
    pub stage: Stage,
    pub pages: Vec<Page>,
    #[serde(default)]
    pub images: Vec<ImageEntry>,
    #[serde(default)]
    pub table_data: Vec<TableEntry>,
}

impl Document {
    /// Build a document and derive its flat image/table lists.
    pub fn new(title: impl Into<String>, pages: Vec<Page>) -> Self {
        let mut doc = Self {
            title: title.into(),
            stage: Stage::Extracted,
            pages,
            images: Vec::new(),
            table_data: Vec::new(),
        };
        doc.sync_media();
        doc
    }

    /// Iterate all blocks in document order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.pages.iter().flat_map(|p| p.blocks.iter())
    }

    /// Count blocks of one kind.
    pub fn count(&self, kind: BlockKind) -> usize {
        self.blocks().filter(|b| b.kind() == kind).count()
    }

    /// Rebuild `images` and `table_data` from the page blocks.
    ///
    /// The flat lists are a second view of the same entities; this keeps
    /// exactly one entry per image/table block, keyed by page and ordinal.
    pub fn sync_media(&mut self) {
        let mut images = Vec::new();
        let mut tables = Vec::new();
        for page in &self.pages {
            let mut img_idx = 0;
            let mut tbl_idx = 0;
            for block in &page.blocks {
                match block.content() {
                    BlockContent::Image { image_path, .. } => {
                        images.push(ImageEntry {
                            page_number: page.page_num,
                            index: img_idx,
                            bbox: block.bbox(),
                            image_path: image_path.clone(),
                            caption: block.caption.clone(),
                            translated_caption: block.translated_caption.clone(),
                        });
                        img_idx += 1;
                    }
                    BlockContent::Table {
                        content,
                        translated_cells,
                    } => {
                        tables.push(TableEntry {
                            page_number: page.page_num,
                            index: tbl_idx,
                            bbox: block.bbox(),
                            cells: content.clone(),
                            translated_cells: translated_cells.clone(),
                            caption: block.caption.clone(),
                            translated_caption: block.translated_caption.clone(),
                        });
                        tbl_idx += 1;
                    }
                    BlockContent::Text { .. } | BlockContent::Formula { .. } => {}
                }
            }
        }
        self.images = images;
        self.table_data = tables;
    }

    /// Check that every image/table block has exactly one flat entry with
    /// the same page number and ordinal, and vice versa.
    pub fn media_consistent(&self) -> bool {
        let mut expected_images = Vec::new();
        let mut expected_tables = Vec::new();
        for page in &self.pages {
            let (mut i, mut t) = (0, 0);
            for block in &page.blocks {
                match block.kind() {
                    BlockKind::Image => {
                        expected_images.push((page.page_num, i));
                        i += 1;
                    }
                    BlockKind::Table => {
                        expected_tables.push((page.page_num, t));
                        t += 1;
                    }
                    BlockKind::Text | BlockKind::Formula => {}
                }
            }
        }
        let mut images: Vec<_> = self.images.iter().map(|e| (e.page_number, e.index)).collect();
        let mut tables: Vec<_> = self
            .table_data
            .iter()
            .map(|e| (e.page_number, e.index))
            .collect();
        images.sort_unstable();
        tables.sort_unstable();
        images == expected_images && tables == expected_tables
    }
}

// ── Checkpoint I/O ───────────────────────────────────────────────────────

/// Load a checkpoint written by [`save_checkpoint`].
///
/// Flat media lists that disagree with the page blocks are rebuilt from the
/// blocks, which are authoritative.
pub async fn load_checkpoint(path: impl AsRef<Path>) -> Result<Document, TranslateError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| TranslateError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    let mut doc: Document =
        serde_json::from_slice(&bytes).map_err(|e| TranslateError::CheckpointMalformed {
            path: path.to_path_buf(),
            source: e,
        })?;
    if !doc.media_consistent() {
        warn!(
            "Checkpoint '{}': image/table lists out of sync with blocks, rebuilding",
            path.display()
        );
        doc.sync_media();
    }
    debug!(
        "Loaded checkpoint '{}' ({} pages, stage {:?})",
        path.display(),
        doc.pages.len(),
        doc.stage
    );
    Ok(doc)
}

/// Write a checkpoint atomically (temp file + rename).
pub async fn save_checkpoint(doc: &Document, path: impl AsRef<Path>) -> Result<(), TranslateError> {
    let path = path.as_ref();
    let json = serde_json::to_vec_pretty(doc)
        .map_err(|e| TranslateError::Internal(format!("checkpoint serialisation: {e}")))?;
    crate::output::write_atomic(path, &json).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BBox {
        BBox::new(10.0, 20.0, 200.0, 40.0)
    }

    #[test]
    fn translation_attaches_only_once() {
        let mut b = Block::text(1, bbox(), "Hello");
        assert!(b.set_translation("你好"));
        assert!(!b.set_translation("哈囉"));
        assert_eq!(b.translated_text(), Some("你好"));
    }

    #[test]
    fn table_rejects_text_translation() {
        let mut b = Block::table(1, bbox(), vec![vec!["a".into()]]);
        assert!(!b.set_translation("x"));
        assert!(b.set_translated_cells(vec![vec!["甲".into()]]));
        assert!(!b.set_translated_cells(vec![vec!["乙".into()]]));
        assert!(b.is_translated());
    }

    #[test]
    fn caption_translation_requires_caption() {
        let mut b = Block::image(1, bbox(), None, "");
        assert!(!b.set_translated_caption("圖 1"));
        assert!(b.attach_caption("Figure 1: Overview"));
        assert!(!b.attach_caption("Figure 2"));
        assert!(b.set_translated_caption("圖 1：概覽"));
    }

    #[test]
    fn absorb_refused_after_translation() {
        let mut b = Block::text(1, bbox(), "a");
        b.set_translation("甲");
        assert!(!b.absorb_text("\n\n", "b", bbox()));
        assert_eq!(b.source_text(), Some("a"));
    }

    #[test]
    fn block_serialises_with_type_tag() {
        let b = Block::formula(2, bbox(), "E=mc^2");
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["type"], "formula");
        assert_eq!(v["content"], "E=mc^2");
        assert_eq!(v["page_number"], 2);
        assert!(v.get("translated_content").is_none());

        let back: Block = serde_json::from_value(v).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn sync_media_indexes_per_page() {
        let pages = vec![
            Page::new(
                1,
                vec![
                    Block::text(1, bbox(), "intro"),
                    Block::image(1, bbox(), Some("p1_0.png".into()), ""),
                    Block::table(1, bbox(), vec![vec!["a".into(), "b".into()]]),
                    Block::image(1, bbox(), Some("p1_1.png".into()), ""),
                ],
            ),
            Page::new(2, vec![Block::image(2, bbox(), None, "")]),
        ];
        let doc = Document::new("t", pages);
        let idx: Vec<_> = doc.images.iter().map(|e| (e.page_number, e.index)).collect();
        assert_eq!(idx, vec![(1, 0), (1, 1), (2, 0)]);
        assert_eq!(doc.table_data.len(), 1);
        assert!(doc.media_consistent());
    }

    #[test]
    fn media_inconsistency_detected() {
        let pages = vec![Page::new(1, vec![Block::image(1, bbox(), None, "")])];
        let mut doc = Document::new("t", pages);
        doc.images.clear();
        assert!(!doc.media_consistent());
        doc.sync_media();
        assert!(doc.media_consistent());
    }

    #[tokio::test]
    async fn checkpoint_roundtrip_preserves_translations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc_translation_data.json");

        let mut block = Block::text(1, bbox(), "Models are trained.");
        block.set_translation("模型被訓練。");
        let mut doc = Document::new("Paper", vec![Page::new(1, vec![block])]);
        doc.stage = Stage::Translated;

        save_checkpoint(&doc, &path).await.unwrap();
        let loaded = load_checkpoint(&path).await.unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(loaded.stage, Stage::Translated);
    }

    #[tokio::test]
    async fn malformed_checkpoint_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();
        let err = load_checkpoint(&path).await.unwrap_err();
        assert!(matches!(err, TranslateError::CheckpointMalformed { .. }));
    }
}
