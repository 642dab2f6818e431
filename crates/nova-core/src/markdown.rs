//! Markdown rendering for markdown cells.

use pulldown_cmark::{Options, Parser, html};

/// Render CommonMark (with tables, footnotes, strikethrough and task lists)
/// to HTML. Math is not typeset and headings get no anchor ids.
pub fn render_markdown(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(source, options);
    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}
