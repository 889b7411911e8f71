//! Text cleanup applied between parsing and storage.
//!
//! Datasources that emit markdown may carry embedded HTML (Notion export
//! artifacts, Confluence `body.view` markup). These helpers strip comments,
//! flatten HTML tags into markdown-ish plain text, and normalize blank-line
//! runs so the chunker sees consistent paragraph boundaries.

/// Full cleanup pass: strip HTML comments, flatten remaining tags, then
/// collapse excess blank lines.
pub fn clean_markdown(text: &str) -> String {
    let without_comments = strip_html_comments(text);
    let flattened = flatten_html(&without_comments);
    normalize_blank_lines(&flattened)
}

/// True when the text has no content worth storing.
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// Remove `<!-- ... -->` spans. An unterminated comment swallows the rest
/// of the input.
pub fn strip_html_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Convert HTML tags to lightweight markdown markers, keeping inner text.
///
/// Structural tags become newlines or list/heading markers, inline emphasis
/// becomes markdown emphasis, anchors become `[text](href)`, and
/// script/style bodies are dropped entirely. Unknown tags vanish, leaving
/// their content in place.
pub fn flatten_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    // href values for currently open <a> tags
    let mut link_stack: Vec<Option<String>> = Vec::new();

    while let Some(lt) = rest.find('<') {
        out.push_str(&decode_entities(&rest[..lt]));
        let after = &rest[lt + 1..];
        let Some(gt) = after.find('>') else {
            // stray '<' with no closing '>', keep it literally
            out.push('<');
            rest = after;
            continue;
        };
        let tag_body = &after[..gt];
        rest = &after[gt + 1..];

        let closing = tag_body.starts_with('/');
        let name_part = tag_body.trim_start_matches('/');
        let name: String = name_part
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        if !closing && (name == "script" || name == "style") {
            let close = format!("</{}", name);
            if let Some(pos) = rest.to_ascii_lowercase().find(&close) {
                let tail = &rest[pos..];
                match tail.find('>') {
                    Some(end) => rest = &tail[end + 1..],
                    None => rest = "",
                }
            } else {
                rest = "";
            }
            continue;
        }

        match (name.as_str(), closing) {
            ("br", _) | ("hr", _) => out.push('\n'),
            ("p", _) | ("div", _) | ("section", _) | ("article", _) | ("table", _) => {
                out.push_str("\n\n")
            }
            ("tr", _) | ("ul", _) | ("ol", _) => out.push('\n'),
            ("td", true) | ("th", true) => out.push_str(" | "),
            ("li", false) => out.push_str("\n- "),
            ("li", true) => {}
            ("b", _) | ("strong", _) => out.push_str("**"),
            ("i", _) | ("em", _) => out.push('*'),
            ("code", _) => out.push('`'),
            ("pre", _) => out.push_str("\n```\n"),
            ("blockquote", false) => out.push_str("\n> "),
            ("blockquote", true) => out.push('\n'),
            ("h1", false) => out.push_str("\n\n# "),
            ("h2", false) => out.push_str("\n\n## "),
            ("h3", false) => out.push_str("\n\n### "),
            ("h4", false) => out.push_str("\n\n#### "),
            ("h5", false) => out.push_str("\n\n##### "),
            ("h6", false) => out.push_str("\n\n###### "),
            ("h1", true) | ("h2", true) | ("h3", true) | ("h4", true) | ("h5", true)
            | ("h6", true) => out.push('\n'),
            ("a", false) => {
                link_stack.push(tag_attribute(tag_body, "href"));
                out.push('[');
            }
            ("a", true) => match link_stack.pop().flatten() {
                Some(href) => {
                    out.push_str("](");
                    out.push_str(&href);
                    out.push(')');
                }
                None => out.push(']'),
            },
            ("img", _) => {
                if let Some(alt) = tag_attribute(tag_body, "alt") {
                    if !alt.trim().is_empty() {
                        out.push_str(&alt);
                    }
                }
            }
            _ => {}
        }
    }
    out.push_str(&decode_entities(rest));
    out
}

/// Pull a quoted attribute value out of a raw tag body.
fn tag_attribute(tag_body: &str, attr: &str) -> Option<String> {
    let lower = tag_body.to_ascii_lowercase();
    let needle = format!("{}=", attr);
    let pos = lower.find(&needle)?;
    let value_start = pos + needle.len();
    let bytes = tag_body.as_bytes();
    if value_start >= bytes.len() {
        return None;
    }
    let quote = bytes[value_start];
    if quote == b'"' || quote == b'\'' {
        let tail = &tag_body[value_start + 1..];
        let end = tail.find(quote as char)?;
        Some(tail[..end].to_string())
    } else {
        let tail = &tag_body[value_start..];
        let end = tail.find(char::is_whitespace).unwrap_or(tail.len());
        Some(tail[..end].to_string())
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let Some(semi) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..semi];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            "nbsp" => out.push(' '),
            _ => {
                let decoded = entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32);
                match decoded {
                    Some(c) => out.push(c),
                    None => out.push_str(&tail[..semi + 1]),
                }
            }
        }
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    out
}

/// Trim trailing whitespace per line and collapse runs of three or more
/// newlines down to a single blank line.
pub fn normalize_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(clean_markdown("hello world"), "hello world");
    }

    #[test]
    fn comments_are_removed() {
        assert_eq!(
            strip_html_comments("before <!-- hidden --> after"),
            "before  after"
        );
    }

    #[test]
    fn unterminated_comment_drops_tail() {
        assert_eq!(strip_html_comments("keep <!-- gone forever"), "keep ");
    }

    #[test]
    fn emphasis_tags_become_markdown() {
        assert_eq!(flatten_html("<b>bold</b> and <em>soft</em>"), "**bold** and *soft*");
    }

    #[test]
    fn anchors_keep_target() {
        assert_eq!(
            flatten_html(r#"<a href="https://example.com">docs</a>"#),
            "[docs](https://example.com)"
        );
    }

    #[test]
    fn list_items_get_markers() {
        let html = "<ul><li>one</li><li>two</li></ul>";
        let flat = flatten_html(html);
        assert!(flat.contains("- one"));
        assert!(flat.contains("- two"));
    }

    #[test]
    fn script_body_is_dropped() {
        let html = "visible<script>var x = 1;</script> text";
        assert_eq!(flatten_html(html), "visible text");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(flatten_html("a &amp; b &lt;c&gt; &#8212;"), "a & b <c> \u{2014}");
    }

    #[test]
    fn blank_runs_collapse() {
        let text = "one\n\n\n\ntwo\n\n\nthree";
        assert_eq!(normalize_blank_lines(text), "one\n\ntwo\n\nthree");
    }

    #[test]
    fn headings_survive_flattening() {
        let html = "<h2>Title</h2><p>body</p>";
        let cleaned = clean_markdown(html);
        assert_eq!(cleaned, "## Title\n\nbody");
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank("   \n\t "));
        assert!(!is_blank(" x "));
    }
}
