//! Plain-text extraction for uploaded files and fetched pages.
//!
//! Rich formats (PDF, DOCX) are external collaborators as far as the
//! platform is concerned: a bytes-to-text function invoked at upload time.
//! The built-in fallback recovers whatever UTF-8 text the bytes contain so
//! the pipeline stays usable without the external extractors.

use anyhow::{bail, Result};

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".html", ".htm", ".csv", ".json", ".pdf", ".docx",
];

pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Extract plain text from file bytes based on the file extension.
pub fn extract_text(filename: &str, content: &[u8]) -> Result<String> {
    let ext = extension_of(filename);
    match ext.as_str() {
        ".txt" | ".md" | ".csv" | ".json" => Ok(String::from_utf8_lossy(content).into_owned()),
        ".html" | ".htm" => Ok(html_to_text(&String::from_utf8_lossy(content))),
        ".pdf" | ".docx" => Ok(fallback_text(content)),
        other => bail!("unsupported file type: {}", other),
    }
}

pub fn is_allowed_extension(filename: &str) -> bool {
    let ext = extension_of(filename);
    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

fn extension_of(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) => filename[idx..].to_lowercase(),
        None => String::new(),
    }
}

/// Salvage printable text runs from an otherwise binary payload.
fn fallback_text(content: &[u8]) -> String {
    let lossy = String::from_utf8_lossy(content);
    let mut out = String::new();
    let mut run = String::new();
    for ch in lossy.chars() {
        if ch.is_control() && ch != '\n' && ch != '\t' {
            if run.chars().filter(|c| c.is_alphanumeric()).count() >= 4 {
                out.push_str(&run);
                out.push('\n');
            }
            run.clear();
        } else {
            run.push(ch);
        }
    }
    if run.chars().filter(|c| c.is_alphanumeric()).count() >= 4 {
        out.push_str(&run);
    }
    out
}

const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "svg", "head"];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "nav", "main", "h1", "h2", "h3", "h4",
    "h5", "h6", "li", "tr", "br", "hr", "blockquote", "pre", "table", "ul", "ol", "dl", "dt",
    "dd", "figure", "figcaption", "aside",
];

/// Convert HTML to visible plain text: drop tags, skip script-like
/// subtrees, break at block elements, decode the common entities, and
/// normalize whitespace.
pub fn html_to_text(html: &str) -> String {
    let mut pieces = String::new();
    let mut chars = html.char_indices().peekable();
    let mut skip_depth = 0usize;

    while let Some((idx, ch)) = chars.next() {
        if ch != '<' {
            if skip_depth == 0 {
                pieces.push(ch);
            }
            continue;
        }

        // Find the end of the tag
        let rest = &html[idx + 1..];
        let Some(end) = rest.find('>') else {
            break;
        };
        let tag_body = &rest[..end];
        // Advance the iterator past the closing '>' at idx + 1 + end
        while let Some(&(i, _)) = chars.peek() {
            if i > idx + 1 + end {
                break;
            }
            chars.next();
        }

        let is_closing = tag_body.starts_with('/');
        let name: String = tag_body
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        if SKIP_TAGS.contains(&name.as_str()) {
            if is_closing {
                skip_depth = skip_depth.saturating_sub(1);
            } else if !tag_body.ends_with('/') {
                skip_depth += 1;
            }
        } else if BLOCK_TAGS.contains(&name.as_str()) && skip_depth == 0 {
            pieces.push('\n');
        }
    }

    let decoded = decode_entities(&pieces);

    // Collapse runs of spaces within lines and cap blank runs
    let mut lines: Vec<String> = Vec::new();
    for line in decoded.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        lines.push(collapsed);
    }
    let mut out = String::new();
    let mut blank_run = 0usize;
    for line in lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
    }
    out.trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_allowlist() {
        assert!(is_allowed_extension("notes.txt"));
        assert!(is_allowed_extension("Report.PDF"));
        assert!(!is_allowed_extension("archive.zip"));
        assert!(!is_allowed_extension("noextension"));
    }

    #[test]
    fn test_plain_text_extraction() {
        let out = extract_text("a.txt", b"hello world").unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_unsupported_extension_errors() {
        assert!(extract_text("a.exe", b"MZ").is_err());
    }

    #[test]
    fn test_html_to_text_strips_tags() {
        let html = "<html><head><title>T</title></head>\
                    <body><h1>Title</h1><p>Hello <b>world</b>.</p></body></html>";
        let out = html_to_text(html);
        assert!(out.contains("Title"));
        assert!(out.contains("Hello world."));
        assert!(!out.contains('<'));
    }

    #[test]
    fn test_html_skips_script_and_style() {
        let html = "<p>keep</p><script>var x = 'drop';</script><style>.a{}</style><p>also</p>";
        let out = html_to_text(html);
        assert!(out.contains("keep"));
        assert!(out.contains("also"));
        assert!(!out.contains("drop"));
        assert!(!out.contains(".a{}"));
    }

    #[test]
    fn test_html_entities_decoded() {
        let out = html_to_text("<p>fish &amp; chips &lt;now&gt;</p>");
        assert_eq!(out, "fish & chips <now>");
    }

    #[test]
    fn test_html_head_content_skipped() {
        let html = "<head><title>Site title</title></head><body><p>visible</p></body>";
        let out = html_to_text(html);
        assert_eq!(out, "visible");
    }
}
