//! HTML fallback handling for payloads that carry no Markdown.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use specter_shared::{Result, SpecterError};

/// Convert an HTML page to Markdown, dropping non-content tags.
pub(crate) fn html_to_markdown(html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "head",
        ])
        .build();

    let markdown = converter
        .convert(html)
        .map_err(|e| SpecterError::Conversion(format!("htmd conversion failed: {e}")))?;

    Ok(collapse_blank_lines(markdown.trim()))
}

/// The document `<title>`, if present and non-empty.
pub(crate) fn html_title(html: &str) -> Option<String> {
    static TITLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("title").expect("valid selector"));

    let doc = Html::parse_document(html);
    doc.select(&TITLE_SEL)
        .next()
        .map(|el| el.text().collect::<String>())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

/// Heuristic: does this string look like markup rather than Markdown/text?
pub(crate) fn looks_like_html(text: &str) -> bool {
    let head = text.trim_start();
    let prefix: String = head.chars().take(64).collect::<String>().to_ascii_lowercase();
    prefix.starts_with("<!doctype html") || prefix.starts_with("<html") || {
        head.starts_with('<') && (head.contains("</p>") || head.contains("</div>"))
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>  Acme Data
Breach Settlement </title><style>p{}</style></head>
<body><nav>Menu</nav><h1>Acme Settlement</h1><p>Claims due <b>June 1</b>.</p>


<p>Second paragraph.</p><script>track()</script></body></html>"#;

    #[test]
    fn converts_html_without_chrome() {
        let md = html_to_markdown(PAGE).unwrap();
        assert!(md.contains("Acme Settlement"));
        assert!(md.contains("**June 1**"));
        assert!(!md.contains("track()"));
        assert!(!md.contains("Menu"));
        assert!(!md.contains("\n\n\n"));
    }

    #[test]
    fn extracts_collapsed_title() {
        assert_eq!(html_title(PAGE).as_deref(), Some("Acme Data Breach Settlement"));
        assert!(html_title("<p>no title</p>").is_none());
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html(PAGE));
        assert!(looks_like_html("<div><p>x</p></div>"));
        assert!(!looks_like_html("# Heading\n\nSome <b>inline</b> text"));
    }
}
