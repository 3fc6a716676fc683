//! Bilingual Markdown report.
//!
//! One section per page; each block shows its source and its translation.
//! Formulas are set side by side, tables are rendered twice as GFM pipe
//! tables, figures link to the PNG written during extraction. A short
//! summary table at the end lists translated and fallback counts.

use crate::document::{Block, BlockContent, Document, Stage};
use crate::output::{KindCounts, TranslationStats};

/// Render the report for a (possibly partially) translated document.
pub fn render_report(doc: &Document, stats: &TranslationStats, include_metadata: bool) -> String {
    let mut out = String::new();

    if include_metadata {
        out.push_str(&format_yaml_front_matter(doc, stats));
    }

    out.push_str(&format!("# {}\n\n", doc.title.trim()));

    for page in &doc.pages {
        out.push_str(&format!("## Page {}\n\n", page.page_num));
        for block in &page.blocks {
            render_block(&mut out, block);
        }
    }

    render_summary(&mut out, stats);
    out
}

fn render_block(out: &mut String, block: &Block) {
    match block.content() {
        BlockContent::Text {
            content,
            translated_content,
        } => {
            out.push_str(content.trim());
            out.push_str("\n\n");
            if let Some(t) = translated_content.as_deref().filter(|t| !t.trim().is_empty()) {
                push_quoted(out, t);
            }
        }
        BlockContent::Formula {
            content,
            translated_content,
        } => {
            out.push_str("| Original | Translated |\n|---|---|\n");
            out.push_str(&format!(
                "| `{}` | `{}` |\n\n",
                escape_cell(content),
                escape_cell(translated_content.as_deref().unwrap_or(content))
            ));
        }
        BlockContent::Table {
            content,
            translated_cells,
        } => {
            push_caption(out, block);
            push_grid(out, content);
            if let Some(grid) = translated_cells {
                push_grid(out, grid);
            }
        }
        BlockContent::Image {
            image_path,
            content,
            translated_content,
        } => {
            if let Some(path) = image_path {
                let alt = block.caption().unwrap_or("figure");
                out.push_str(&format!("![{}]({})\n\n", escape_alt(alt), path));
            }
            push_caption(out, block);
            if !content.trim().is_empty() {
                out.push_str(&format!("Figure text: {}\n\n", content.trim()));
                if let Some(t) = translated_content.as_deref().filter(|t| !t.trim().is_empty()) {
                    push_quoted(out, t);
                }
            }
        }
    }
}

fn push_quoted(out: &mut String, text: &str) {
    for line in text.trim().lines() {
        if line.trim().is_empty() {
            out.push_str(">\n");
        } else {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push('\n');
}

fn push_caption(out: &mut String, block: &Block) {
    if let Some(caption) = block.caption() {
        out.push_str(&format!("*{}*", caption.trim()));
        if let Some(t) = block.translated_caption() {
            out.push_str(&format!(" / *{}*", t.trim()));
        }
        out.push_str("\n\n");
    }
}

/// Render a grid as a GFM table. The first row is the header; ragged rows
/// are padded to the widest row.
fn push_grid(out: &mut String, grid: &[Vec<String>]) {
    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return;
    }
    for (i, row) in grid.iter().enumerate() {
        out.push('|');
        for col in 0..width {
            let cell = row.get(col).map(String::as_str).unwrap_or("");
            out.push_str(&format!(" {} |", escape_cell(cell)));
        }
        out.push('\n');
        if i == 0 {
            out.push('|');
            out.push_str(&"---|".repeat(width));
            out.push('\n');
        }
    }
    out.push('\n');
}

fn escape_cell(s: &str) -> String {
    s.trim().replace('|', "\\|").replace('\n', "<br>")
}

fn escape_alt(s: &str) -> String {
    s.replace(['[', ']'], "")
}

fn render_summary(out: &mut String, stats: &TranslationStats) {
    out.push_str("## Summary\n\n| Content | Translated | Original kept |\n|---|---|---|\n");
    let rows: [(&str, &KindCounts); 5] = [
        ("Text blocks", &stats.text_blocks),
        ("Formulas", &stats.formulas),
        ("Tables", &stats.tables),
        ("Figure text", &stats.images),
        ("Captions", &stats.captions),
    ];
    for (label, counts) in rows {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            label, counts.translated, counts.fallback
        ));
    }
    out.push('\n');
}

/// Format document metadata as YAML front matter.
fn format_yaml_front_matter(doc: &Document, stats: &TranslationStats) -> String {
    let mut yaml = String::from("---\n");
    yaml.push_str(&format!("title: \"{}\"\n", doc.title.replace('"', "\\\"")));
    yaml.push_str(&format!("pages: {}\n", doc.pages.len()));
    yaml.push_str(&format!(
        "stage: {}\n",
        match doc.stage {
            Stage::Extracted => "extracted",
            Stage::Translated => "translated",
        }
    ));
    yaml.push_str(&format!("translated_items: {}\n", stats.total_translated()));
    yaml.push_str(&format!("fallback_items: {}\n", stats.total_fallbacks()));
    yaml.push_str("---\n\n");
    yaml
}
