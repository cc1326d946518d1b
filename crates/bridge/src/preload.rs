//! HTML preload injection.
//!
//! HTML documents served from application resources get the preload snippet
//! (the render-side half of the IPC protocol) injected before any document
//! script runs.

/// Injects `preload` as the first module script of `html`: right after the
/// opening `<head>` tag when present, otherwise after `<html>`, otherwise
/// prepended.
pub fn inject_html_preload(html: &str, preload: &str) -> String {
    if preload.is_empty() {
        return html.to_string();
    }

    let script = format!("<script type=\"module\">{preload}</script>");

    for tag in ["<head", "<html"] {
        if let Some(position) = find_tag_end(html, tag) {
            let mut injected = String::with_capacity(html.len() + script.len());
            injected.push_str(&html[..position]);
            injected.push_str(&script);
            injected.push_str(&html[position..]);
            return injected;
        }
    }

    format!("{script}{html}")
}

/// Byte offset just past the `>` of the first occurrence of `tag`
/// (case-insensitive), skipping e.g. `<header>`.
fn find_tag_end(html: &str, tag: &str) -> Option<usize> {
    // ascii lowering keeps byte offsets aligned with the original
    let lowered = html.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(offset) = lowered[search_from..].find(tag) {
        let start = search_from + offset;
        let after = start + tag.len();
        let rest = lowered[after..].as_bytes();
        // a real tag ends the name here with '>' or an attribute
        if matches!(rest.first(), Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n')) {
            return lowered[after..]
                .find('>')
                .map(|close| after + close + 1);
        }
        search_from = after;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injects_after_head() {
        let html = "<html><head><title>t</title></head><body></body></html>";
        let injected = inject_html_preload(html, "globalThis.__ready__ = 1;");
        assert!(injected.starts_with(
            "<html><head><script type=\"module\">globalThis.__ready__ = 1;</script><title>"
        ));
    }

    #[test]
    fn test_injects_after_head_with_attributes() {
        let html = "<HEAD lang=\"en\"><title>t</title></HEAD>";
        let injected = inject_html_preload(html, "x");
        assert!(injected.contains("<HEAD lang=\"en\"><script type=\"module\">x</script><title>"));
    }

    #[test]
    fn test_header_element_is_not_head() {
        let html = "<body><header>h</header></body>";
        let injected = inject_html_preload(html, "x");
        assert!(injected.starts_with("<script type=\"module\">x</script><body>"));
    }

    #[test]
    fn test_falls_back_to_html_then_prepend() {
        let html = "<html><body>b</body></html>";
        let injected = inject_html_preload(html, "x");
        assert!(injected.starts_with("<html><script type=\"module\">x</script><body>"));

        let fragment = "<p>no shell</p>";
        let injected = inject_html_preload(fragment, "x");
        assert!(injected.starts_with("<script type=\"module\">x</script><p>"));
    }

    #[test]
    fn test_empty_preload_is_identity() {
        let html = "<html></html>";
        assert_eq!(inject_html_preload(html, ""), html);
    }
}
