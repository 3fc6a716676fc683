//! Block segmentation: raw page content → ordered, typed [`Block`]s.
//!
//! [`BlockSegmenter::segment`] labels every span with the
//! [`ContentClassifier`], interleaves tables and figures by vertical
//! position, folds text that sits inside a figure into that figure, and
//! attaches caption lines to the nearest figure or table.
//!
//! [`BlockSegmenter::merge_adjacent`] then collapses fragmented text:
//!
//! * a text block contained in its neighbour is absorbed by it;
//! * a block whose tail overlaps the next block's head (within the overlap
//!   window) is concatenated with it, overlap removed, paragraph separator
//!   in between;
//! * a text block whose prefix fingerprint was already emitted is dropped.
//!
//! Passes repeat until the block count stops changing. Every action removes
//! one block, so the loop terminates, and its result is a fixed point:
//! merging again changes nothing.

use crate::config::SegmenterConfig;
use crate::document::{BBox, Block, BlockKind};
use crate::pipeline::classify::{caption_target, split_tabular, CaptionTarget, ContentClassifier, SpanClass};
use crate::pipeline::extract::RawPage;
use std::collections::HashSet;
use tracing::debug;

/// Turns raw pages into block sequences.
#[derive(Debug, Clone, Default)]
pub struct BlockSegmenter {
    classifier: ContentClassifier,
    config: SegmenterConfig,
}

/// A span-derived block plus whether it is a caption candidate.
struct Pending {
    block: Block,
    caption: Option<CaptionTarget>,
}

impl BlockSegmenter {
    pub fn new(classifier: ContentClassifier, config: SegmenterConfig) -> Self {
        Self { classifier, config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Build the ordered block sequence of one page.
    pub fn segment(&self, page: &RawPage) -> Vec<Block> {
        let page_num = page.page_number;

        let mut figures: Vec<(Block, Vec<String>)> = page
            .images
            .iter()
            .map(|img| {
                (
                    Block::image(page_num, img.bbox, img.image_path.clone(), ""),
                    Vec::new(),
                )
            })
            .collect();

        let mut pending: Vec<Pending> = Vec::with_capacity(page.spans.len());
        for span in &page.spans {
            let text = span.text.trim();
            if text.is_empty() {
                continue;
            }
            let (cx, cy) = span.bbox.center();

            // Already captured as a table grid.
            if page.tables.iter().any(|t| t.bbox.contains_point(cx, cy)) {
                continue;
            }

            let class = self.classifier.classify(text);

            if class != SpanClass::FigureCaption {
                if let Some((_, inner)) = figures
                    .iter_mut()
                    .find(|(b, _)| b.bbox().contains_point(cx, cy))
                {
                    inner.push(text.to_string());
                    continue;
                }
            }

            let entry = match class {
                SpanClass::Text => Pending {
                    block: Block::text(page_num, span.bbox, text),
                    caption: None,
                },
                SpanClass::Formula => Pending {
                    block: Block::formula(page_num, span.bbox, text),
                    caption: None,
                },
                SpanClass::Table => Pending {
                    block: Block::table(page_num, span.bbox, split_tabular(text)),
                    caption: None,
                },
                SpanClass::FigureCaption => Pending {
                    block: Block::text(page_num, span.bbox, text),
                    caption: caption_target(text),
                },
            };
            pending.push(entry);
        }

        let mut media: Vec<Block> = figures
            .into_iter()
            .map(|(fig, inner)| {
                if inner.is_empty() {
                    fig
                } else {
                    Block::image(page_num, fig.bbox(), fig.image_path().map(String::from), inner.join("\n"))
                }
            })
            .chain(
                page.tables
                    .iter()
                    .map(|t| Block::table(page_num, t.bbox, t.cells.clone())),
            )
            .collect();
        media.sort_by(|a, b| {
            a.bbox()
                .y0
                .partial_cmp(&b.bbox().y0)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Interleave media into the span sequence by top edge.
        for block in media {
            let y0 = block.bbox().y0;
            let pos = pending
                .iter()
                .position(|p| p.block.bbox().y0 > y0)
                .unwrap_or(pending.len());
            pending.insert(
                pos,
                Pending {
                    block,
                    caption: None,
                },
            );
        }

        self.attach_captions(pending)
    }

    /// Move caption lines onto their figure/table; unmatched captions stay text.
    fn attach_captions(&self, mut pending: Vec<Pending>) -> Vec<Block> {
        let mut consumed = vec![false; pending.len()];

        for i in 0..pending.len() {
            let Some(target) = pending[i].caption else {
                continue;
            };
            let wanted = match target {
                CaptionTarget::Figure => BlockKind::Image,
                CaptionTarget::Table => BlockKind::Table,
            };
            let cap_bbox = pending[i].block.bbox();

            let best = pending
                .iter()
                .enumerate()
                .filter(|(j, p)| {
                    *j != i
                        && p.block.kind() == wanted
                        && p.block.caption().is_none()
                        && p.block.bbox().vertical_gap(&cap_bbox) <= self.config.caption_distance
                })
                .min_by(|(_, a), (_, b)| {
                    caption_rank(&a.block.bbox(), &cap_bbox)
                        .partial_cmp(&caption_rank(&b.block.bbox(), &cap_bbox))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(j, _)| j);

            if let Some(j) = best {
                let caption = pending[i]
                    .block
                    .source_text()
                    .unwrap_or_default()
                    .to_string();
                if pending[j].block.attach_caption(caption) {
                    consumed[i] = true;
                    debug!(
                        "Page {}: caption attached to {}",
                        pending[j].block.page_number(),
                        wanted
                    );
                }
            }
        }

        pending
            .into_iter()
            .zip(consumed)
            .filter(|(_, used)| !used)
            .map(|(p, _)| p.block)
            .collect()
    }

    /// Collapse fragmented adjacent text blocks until nothing changes.
    pub fn merge_adjacent(&self, blocks: Vec<Block>) -> Vec<Block> {
        let mut current = blocks;
        loop {
            let before = current.len();
            current = self.merge_pass(current);
            if current.len() == before {
                return current;
            }
        }
    }

    fn merge_pass(&self, blocks: Vec<Block>) -> Vec<Block> {
        let sep = self.config.separator.as_str();
        let mut out: Vec<Block> = Vec::with_capacity(blocks.len());
        let mut seen: HashSet<String> = HashSet::new();

        for block in blocks {
            if !is_open_text(&block) {
                out.push(block);
                continue;
            }
            let text = block.source_text().unwrap_or_default().to_string();

            if let Some(prev) = out.last_mut().filter(|p| is_open_text(p)) {
                let prev_text = prev.source_text().unwrap_or_default().to_string();

                if self.swallows(&prev_text, &text) {
                    continue;
                }
                if self.swallows(&text, &prev_text) {
                    seen.insert(self.fingerprint(&text));
                    *prev = block;
                    continue;
                }
                if let Some(k) = self.overlap(&prev_text, &text) {
                    let tail: String = text.chars().skip(k).collect();
                    prev.absorb_text(sep, tail.trim_start(), block.bbox());
                    if let Some(merged) = prev.source_text() {
                        seen.insert(self.fingerprint(merged));
                    }
                    continue;
                }
            }

            if !seen.insert(self.fingerprint(&text)) {
                debug!("Dropping duplicate block on page {}", block.page_number());
                continue;
            }
            out.push(block);
        }
        out
    }

    /// `outer` contains `inner`, and `inner` is long enough to be meaningful.
    fn swallows(&self, outer: &str, inner: &str) -> bool {
        inner.chars().count() >= self.config.min_overlap && outer.contains(inner)
    }

    /// Longest k in `[min_overlap, overlap_window]` such that the last k
    /// chars of `a` equal the first k chars of `b`.
    fn overlap(&self, a: &str, b: &str) -> Option<usize> {
        let a_chars: Vec<char> = a.chars().collect();
        let b_chars: Vec<char> = b.chars().collect();
        let max_k = self
            .config
            .overlap_window
            .min(a_chars.len())
            .min(b_chars.len());

        (self.config.min_overlap..=max_k)
            .rev()
            .find(|&k| a_chars[a_chars.len() - k..] == b_chars[..k])
    }

    /// Whitespace-normalised prefix used to spot repeated blocks.
    pub fn fingerprint(&self, text: &str) -> String {
        text.split_whitespace()
            .flat_map(|w| w.chars().chain(std::iter::once(' ')))
            .take(self.config.fingerprint_chars)
            .collect::<String>()
            .trim_end()
            .to_string()
    }
}

/// Untranslated text block: the only kind merging touches.
fn is_open_text(block: &Block) -> bool {
    block.kind() == BlockKind::Text && !block.is_translated()
}

/// Captions below their figure rank before captions above it.
fn caption_rank(media: &BBox, caption: &BBox) -> (u8, f32) {
    let below = caption.y0 >= media.y1 - 1.0;
    (if below { 0 } else { 1 }, media.vertical_gap(caption))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::{RawImage, RawSpan, RawTable};

    fn bb(y0: f32) -> BBox {
        BBox::new(50.0, y0, 500.0, y0 + 12.0)
    }

    fn text(s: &str) -> Block {
        Block::text(1, bb(0.0), s)
    }

    fn contents(blocks: &[Block]) -> Vec<String> {
        blocks
            .iter()
            .map(|b| b.source_text().unwrap_or("<table>").to_string())
            .collect()
    }

    #[test]
    fn segment_labels_and_orders_spans() {
        let page = RawPage {
            page_number: 1,
            spans: vec![
                RawSpan::new("Introduction to training.", bb(10.0)),
                RawSpan::new("y = (a + b) / 2", bb(30.0)),
                RawSpan::new("More prose follows here.", bb(200.0)),
            ],
            tables: vec![RawTable {
                bbox: BBox::new(50.0, 100.0, 500.0, 150.0),
                cells: vec![vec!["A".into(), "B".into()], vec!["1".into(), "2".into()]],
            }],
            ..Default::default()
        };
        let blocks = BlockSegmenter::default().segment(&page);
        let kinds: Vec<_> = blocks.iter().map(|b| b.kind()).collect();
        assert_eq!(
            kinds,
            vec![BlockKind::Text, BlockKind::Formula, BlockKind::Table, BlockKind::Text]
        );
        assert!(blocks.iter().all(|b| b.page_number() == 1));
    }

    #[test]
    fn caption_attaches_to_figure_above_it() {
        let page = RawPage {
            page_number: 2,
            spans: vec![
                RawSpan::new("Body text before.", bb(10.0)),
                RawSpan::new("Figure 1: Training loss", bb(330.0)),
            ],
            images: vec![RawImage {
                page_number: 2,
                bbox: BBox::new(50.0, 100.0, 500.0, 300.0),
                bytes: vec![],
                image_path: Some("fig.png".into()),
            }],
            ..Default::default()
        };
        let blocks = BlockSegmenter::default().segment(&page);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].kind(), BlockKind::Image);
        assert_eq!(blocks[1].caption(), Some("Figure 1: Training loss"));
        assert_eq!(blocks[1].image_path(), Some("fig.png"));
    }

    #[test]
    fn distant_caption_stays_text() {
        let page = RawPage {
            page_number: 1,
            spans: vec![RawSpan::new("Table 3: Ablations", bb(600.0))],
            tables: vec![RawTable {
                bbox: BBox::new(50.0, 100.0, 500.0, 150.0),
                cells: vec![vec!["x".into(), "y".into()]],
            }],
            ..Default::default()
        };
        let blocks = BlockSegmenter::default().segment(&page);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].caption().is_none());
        assert_eq!(blocks[1].kind(), BlockKind::Text);
    }

    #[test]
    fn text_inside_figure_becomes_figure_text() {
        let page = RawPage {
            page_number: 1,
            spans: vec![RawSpan::new("Accuracy", BBox::new(100.0, 150.0, 160.0, 160.0))],
            images: vec![RawImage {
                page_number: 1,
                bbox: BBox::new(50.0, 100.0, 500.0, 300.0),
                bytes: vec![],
                image_path: None,
            }],
            ..Default::default()
        };
        let blocks = BlockSegmenter::default().segment(&page);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].source_text(), Some("Accuracy"));
    }

    #[test]
    fn substring_block_is_absorbed() {
        let seg = BlockSegmenter::default();
        let merged = seg.merge_adjacent(vec![
            text("The model converges quickly."),
            text("model converges"),
        ]);
        assert_eq!(contents(&merged), vec!["The model converges quickly."]);

        let merged = seg.merge_adjacent(vec![
            text("model converges"),
            text("The model converges quickly."),
        ]);
        assert_eq!(contents(&merged), vec!["The model converges quickly."]);
    }

    #[test]
    fn overlapping_tail_and_head_are_joined() {
        let seg = BlockSegmenter::default();
        let merged = seg.merge_adjacent(vec![
            text("We train the network with Adam"),
            text("network with Adam and a cosine schedule."),
        ]);
        assert_eq!(
            contents(&merged),
            vec!["We train the network with Adam\n\nand a cosine schedule."]
        );
    }

    #[test]
    fn short_overlap_is_not_a_continuation() {
        let seg = BlockSegmenter::default();
        let merged = seg.merge_adjacent(vec![text("ends in the"), text("the start")]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn repeated_header_is_dropped() {
        let seg = BlockSegmenter::default();
        let merged = seg.merge_adjacent(vec![
            text("Journal of Machine Learning Research"),
            Block::formula(1, bb(20.0), "x^2"),
            text("Journal of Machine Learning Research"),
            text("Actual content."),
        ]);
        assert_eq!(
            contents(&merged),
            vec!["Journal of Machine Learning Research", "x^2", "Actual content."]
        );
    }

    #[test]
    fn non_text_blocks_break_adjacency() {
        let seg = BlockSegmenter::default();
        let merged = seg.merge_adjacent(vec![
            text("We train the network with Adam"),
            Block::formula(1, bb(20.0), "θ ← θ − η∇L"),
            text("network with Adam and a cosine schedule."),
        ]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn merge_is_idempotent() {
        let seg = BlockSegmenter::default();
        let input = vec![
            text("Attention is all you need for translation"),
            text("you need for translation tasks at scale."),
            text("tasks at scale."),
            text("Attention is all you need for translation"),
            Block::table(1, bb(50.0), vec![vec!["a".into()]]),
            text("Closing remarks about the experiments."),
            text("Closing remarks about the experiments."),
        ];
        let once = seg.merge_adjacent(input);
        let twice = seg.merge_adjacent(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn fingerprint_normalises_whitespace_and_caps_length() {
        let seg = BlockSegmenter::default();
        assert_eq!(seg.fingerprint("a  b\n\nc"), "a b c");
        assert_eq!(seg.fingerprint(&"x".repeat(500)).chars().count(), 100);
    }
}
