use std::sync::LazyLock;

use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Node};

// DART cell tags: TE is a body cell, TU a header cell.
static DART_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(/?)(te|tu)([\s>/])").unwrap());
// DART image blocks carry the file name as text, which an HTML parser would keep.
static DART_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<image\b[^>]*>.*?</image\s*>|<img\b[^>]*>[^<]*</img\s*>").unwrap()
});

/// Elements dropped together with everything inside them.
const SKIPPED: &[&str] = &[
    "script", "style", "head", "img", "image", "svg", "object", "embed", "noscript", "iframe",
    "template",
];

/// Elements that do not break the line.
const INLINE: &[&str] = &[
    "span", "a", "b", "i", "u", "em", "strong", "font", "sub", "sup", "small", "big", "label",
    "abbr", "code", "s", "strike", "mark", "q", "cite",
];

struct Row {
    header: bool,
    cells: Vec<String>,
}

/// Flatten a markup document into lines of text, tables rendered as pipe tables in place.
///
/// The result still carries redundant whitespace; callers collapse it afterwards.
pub fn markup_to_text(markup: &str) -> String {
    let source = prepare_dart_markup(markup);
    let document = Html::parse_document(&source);
    let mut out = String::with_capacity(source.len() / 2);
    render_children(document.root_element(), &mut out);
    out
}

fn prepare_dart_markup(markup: &str) -> String {
    let without_images = DART_IMAGE_RE.replace_all(markup, "");
    DART_CELL_RE
        .replace_all(&without_images, |caps: &Captures| {
            let tag = if caps[2].eq_ignore_ascii_case("tu") { "th" } else { "td" };
            format!("<{}{}{}", &caps[1], tag, &caps[3])
        })
        .into_owned()
}

fn render_children(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => push_text(out, text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_element(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn render_element(el: ElementRef<'_>, out: &mut String) {
    let name = el.value().name();
    if SKIPPED.contains(&name) {
        return;
    }
    match name {
        "br" => out.push('\n'),
        "table" => {
            start_line(out);
            out.push_str(&render_table(el));
            out.push('\n');
        }
        _ if INLINE.contains(&name) => render_children(el, out),
        _ => {
            start_line(out);
            render_children(el, out);
            start_line(out);
        }
    }
}

fn start_line(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn needs_space(out: &str) -> bool {
    !out.is_empty() && !out.ends_with(char::is_whitespace)
}

fn push_text(out: &mut String, text: &str) {
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        if !text.is_empty() && needs_space(out) {
            out.push(' ');
        }
        return;
    };
    if text.starts_with(char::is_whitespace) && needs_space(out) {
        out.push(' ');
    }
    out.push_str(first);
    for word in words {
        out.push(' ');
        out.push_str(word);
    }
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

/// Header line (when the first row is a header), dash separator, then one line per row.
fn render_table(table: ElementRef<'_>) -> String {
    let mut caption = None;
    let mut rows = Vec::new();
    collect_rows(table, false, &mut caption, &mut rows);

    let mut lines: Vec<String> = Vec::with_capacity(rows.len() + 2);
    if let Some(c) = caption.filter(|c: &String| !c.is_empty()) {
        lines.push(c);
    }

    let mut body = rows.iter().filter(|r| !r.cells.is_empty()).peekable();
    if let Some(head) = body.next_if(|r| r.header) {
        lines.push(format_row(&head.cells));
        lines.push(format_row(&vec!["---".to_string(); head.cells.len()]));
    }
    lines.extend(body.map(|r| format_row(&r.cells)));
    lines.join("\n")
}

fn collect_rows(el: ElementRef<'_>, in_thead: bool, caption: &mut Option<String>, rows: &mut Vec<Row>) {
    for child in el.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(read_row(child, in_thead)),
            "thead" => collect_rows(child, true, caption, rows),
            "caption" => *caption = Some(cell_text(child)),
            // nested tables are rendered inside their cell
            "table" => {}
            _ => collect_rows(child, in_thead, caption, rows),
        }
    }
}

fn read_row(tr: ElementRef<'_>, in_thead: bool) -> Row {
    let mut all_th = true;
    let mut cells = Vec::new();
    for cell in tr.children().filter_map(ElementRef::wrap) {
        match cell.value().name() {
            "th" => cells.push(cell_text(cell)),
            "td" => {
                all_th = false;
                cells.push(cell_text(cell));
            }
            _ => {}
        }
    }
    Row {
        header: !cells.is_empty() && (in_thead || all_th),
        cells,
    }
}

fn cell_text(cell: ElementRef<'_>) -> String {
    let mut raw = String::new();
    render_children(cell, &mut raw);
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

fn format_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}
