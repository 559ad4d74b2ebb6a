//! Best-effort structured extraction from fetched pages.
//!
//! None of these are expected to succeed on every page: each returns an
//! `Option` and callers fall back to the normalizer's empty defaults.

use base64::{engine::general_purpose, Engine as _};
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

/// Finds `marker` in `content` and parses the JSON object or array that
/// follows it, e.g. the `{...}` after `"videos":` inside an inline script.
pub fn embedded_json(content: &str, marker: &str) -> Option<Value> {
    let start = content.find(marker)? + marker.len();
    let rest = content[start..].trim_start();
    let end = balanced_end(rest)?;
    serde_json::from_str(&rest[..end]).ok()
}

/// Byte length of the bracketed value at the start of `text`, honoring
/// string literals so braces inside titles don't end the scan early.
fn balanced_end(text: &str) -> Option<usize> {
    let open = text.chars().next()?;
    let close = match open {
        '{' => '}',
        '[' => ']',
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses the Next.js `__NEXT_DATA__` payload many catalog sites embed.
pub fn next_data(html: &str) -> Option<Value> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script#__NEXT_DATA__").ok()?;
    let script = document.select(&selector).next()?;
    let text = script.text().collect::<String>();
    serde_json::from_str(text.trim()).ok()
}

/// Returns the bodies of inline scripts that mention `needle`.
pub fn scripts_containing(html: &str, needle: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("script") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|s| s.text().collect::<String>())
        .filter(|body| body.contains(needle))
        .collect()
}

/// Extracts the value following `marker` from the first inline script that
/// contains it.
pub fn script_json(html: &str, marker: &str) -> Option<Value> {
    scripts_containing(html, marker)
        .iter()
        .find_map(|body| embedded_json(body, marker))
}

/// Decodes a base64 redirect parameter, tolerating missing padding and the
/// URL-safe alphabet. Returns `None` unless the result is UTF-8 text.
pub fn decode_redirect(param: &str) -> Option<String> {
    let trimmed = param.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return None;
    }
    let bytes = general_purpose::STANDARD_NO_PAD
        .decode(trimmed)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(trimmed))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Resolves the real target of a link like `/embed?r=aHR0cHM6Ly8...`,
/// falling back to `None` when there is no decodable `r` parameter.
pub fn redirect_target(link: &str, base: &str) -> Option<String> {
    let url = absolute_url(base, link)?;
    let parsed = Url::parse(&url).ok()?;
    let param = parsed
        .query_pairs()
        .find(|(k, _)| k == "r")
        .map(|(_, v)| v.into_owned())?;
    decode_redirect(&param).filter(|target| Url::parse(target).is_ok())
}

/// Joins a possibly relative `href` onto the page it was found on.
pub fn absolute_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(String::from)
}

/// Rewrites a scraped link into the address a player should open: `?r=`
/// redirects are decoded and relative paths are joined onto `base`.
/// Returns `None` when the link is already usable as-is.
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    if let Some(target) = redirect_target(href, base) {
        return Some(target);
    }
    if Url::parse(href.trim()).is_err() {
        return absolute_url(base, href);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_object_with_braces_in_strings() {
        let script = r#"self.__next_f.push({"videos":{"latino":[{"result":"https://a/{x}","cyberlocker":"voe"}]},"other":1})"#;
        let videos = embedded_json(script, r#""videos":"#).unwrap();
        assert_eq!(
            videos,
            json!({"latino": [{"result": "https://a/{x}", "cyberlocker": "voe"}]})
        );
    }

    #[test]
    fn truncated_or_missing_payload_is_none() {
        assert!(embedded_json(r#""videos":{"latino":[1,2"#, r#""videos":"#).is_none());
        assert!(embedded_json("no marker here", r#""videos":"#).is_none());
        assert!(embedded_json(r#""videos": 42"#, r#""videos":"#).is_none());
    }

    #[test]
    fn next_data_script() {
        let html = r#"<html><body>
            <script id="__NEXT_DATA__" type="application/json">
              {"props":{"pageProps":{"thisSerie":{"TMDbId":"287231","titles":{"name":"Show"}}}}}
            </script></body></html>"#;
        let data = next_data(html).unwrap();
        assert_eq!(data["props"]["pageProps"]["thisSerie"]["TMDbId"], json!("287231"));
        assert!(next_data("<html></html>").is_none());
    }

    #[test]
    fn inline_script_lookup() {
        let html = r#"<script>var a = 1;</script><script>window.x = {"serie":{"id":3}};</script>"#;
        assert_eq!(scripts_containing(html, "\"serie\"").len(), 1);
        assert_eq!(script_json(html, r#""serie":"#), Some(json!({"id": 3})));
    }

    #[test]
    fn base64_redirects() {
        // "https://example.com/live" without padding
        assert_eq!(
            decode_redirect("aHR0cHM6Ly9leGFtcGxlLmNvbS9saXZl").as_deref(),
            Some("https://example.com/live")
        );
        assert_eq!(
            redirect_target("/embed/?r=aHR0cHM6Ly9leGFtcGxlLmNvbS9saXZl", "https://site.tv/agenda/").as_deref(),
            Some("https://example.com/live")
        );
        assert!(decode_redirect("!!!").is_none());
        assert!(redirect_target("/embed/?x=1", "https://site.tv/").is_none());
    }

    #[test]
    fn relative_and_redirect_links() {
        let base = "https://site.tv/agenda/";
        assert_eq!(
            absolute_url(base, "/ver/canal").as_deref(),
            Some("https://site.tv/ver/canal")
        );
        assert_eq!(
            resolve_link(base, "/ver/canal").as_deref(),
            Some("https://site.tv/ver/canal")
        );
        assert_eq!(
            resolve_link(base, "https://site.tv/embed/?r=aHR0cHM6Ly9leGFtcGxlLmNvbS9saXZl").as_deref(),
            Some("https://example.com/live")
        );
        assert!(resolve_link(base, "https://cdn.example.com/a.m3u8").is_none());
        // decodes to text that is not a URL
        assert!(redirect_target("/embed/?r=aGVsbG8", base).is_none());
    }
}
