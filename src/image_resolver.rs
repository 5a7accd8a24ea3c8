//! Inline image resolution: rewrites `<img src="cid:...">` references
//! against an attachment pool, and optionally fetches remote `<img src=
//! "http(s)://...">` targets into `data:` URIs.
//!
//! This is deliberately a targeted regex rewrite, not a DOM parse — the
//! HTML bodies this crate handles are recovered fragments (from
//! de-encapsulated RTF or a client's own `PR_BODY_HTML`), not validated
//! documents, and a single-attribute rewrite is enough to resolve `cid:`
//! references without pulling in an HTML parser.

use base64::Engine;
use std::sync::LazyLock;

static IMG_SRC: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"(?i)(<img\b[^>]*?\bsrc\s*=\s*")([^"]*)(")"#).expect("valid regex")
});

/// One candidate image source available for `cid:` resolution.
pub struct ImageAttachment<'a> {
    pub content_id: &'a str,
    pub mime_hint: &'a str,
    pub bytes: &'a [u8],
}

/// Rewrite every `cid:` reference in `html` to a `data:` URI drawn from
/// `attachments`, by matching `content_id` case-insensitively against the
/// `cid:` value with its optional angle brackets stripped. References with
/// no matching attachment are left untouched.
pub fn resolve_cid_images(html: &[u8], attachments: &[ImageAttachment<'_>]) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(html) else {
        return html.to_vec();
    };

    let rewritten = IMG_SRC.replace_all(text, |caps: &regex::Captures| {
        let prefix = &caps[1];
        let src = &caps[2];
        let suffix = &caps[3];

        let Some(raw_cid) = src.strip_prefix("cid:").or_else(|| src.strip_prefix("CID:")) else {
            return format!("{prefix}{src}{suffix}");
        };
        let cid = raw_cid.trim_start_matches('<').trim_end_matches('>');

        match attachments.iter().find(|a| a.content_id.eq_ignore_ascii_case(cid)) {
            Some(att) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(att.bytes);
                format!("{prefix}data:{};base64,{encoded}{suffix}", att.mime_hint)
            }
            None => format!("{prefix}{src}{suffix}"),
        }
    });

    rewritten.into_owned().into_bytes()
}

/// Collect every `cid:` content-id referenced by an `<img src>` in `html`,
/// lower-cased and with any surrounding `<…>` brackets stripped.
///
/// Used to derive [`crate::tnef::Disposition`]: an attachment is `inline`
/// exactly when its content id appears here for some body of the message it
/// belongs to.
pub fn referenced_cids(html: &[u8]) -> std::collections::HashSet<String> {
    let Ok(text) = std::str::from_utf8(html) else {
        return std::collections::HashSet::new();
    };

    IMG_SRC
        .captures_iter(text)
        .filter_map(|caps| {
            let src = &caps[2];
            let raw_cid = src.strip_prefix("cid:").or_else(|| src.strip_prefix("CID:"))?;
            let cid = raw_cid.trim_start_matches('<').trim_end_matches('>');
            Some(cid.to_ascii_lowercase())
        })
        .collect()
}

#[cfg(feature = "external-images")]
mod external {
    use super::IMG_SRC;
    use std::collections::HashMap;
    use std::io::Read;
    use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
    use std::time::Duration;
    use tracing::warn;

    const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
    const MAX_BODY_BYTES: u64 = 5 * 1024 * 1024;

    /// Fetch every external `http(s)://` image reference in `html`, inlining
    /// it as a `data:` URI. Every failure mode (scheme rejected, host
    /// resolves to a disallowed address, timeout, oversize body, non-image
    /// content type) silently leaves the original `src` untouched — this
    /// operation never surfaces a [`crate::error::ConvertError`].
    ///
    /// `cache` is caller-owned and keyed by URL, so a single call fetches
    /// each distinct URL at most once.
    pub fn inline_external_images(html: &[u8], cache: &mut HashMap<String, Option<String>>) -> Vec<u8> {
        let Ok(text) = std::str::from_utf8(html) else {
            return html.to_vec();
        };

        let client = build_client();

        let rewritten = IMG_SRC.replace_all(text, |caps: &regex::Captures| {
            let prefix = &caps[1];
            let src = &caps[2];
            let suffix = &caps[3];

            if !(src.starts_with("http://") || src.starts_with("https://")) {
                return format!("{prefix}{src}{suffix}");
            }

            let data_uri = cache
                .entry(src.to_string())
                .or_insert_with(|| fetch_as_data_uri(&client, src))
                .clone();

            match data_uri {
                Some(uri) => format!("{prefix}{uri}{suffix}"),
                None => format!("{prefix}{src}{suffix}"),
            }
        });

        rewritten.into_owned().into_bytes()
    }

    fn build_client() -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::custom(|attempt| {
                match validate_url(attempt.url()) {
                    Ok(()) => attempt.follow(),
                    Err(_) => attempt.stop(),
                }
            }))
            .build()
            .expect("static client configuration is always valid")
    }

    fn fetch_as_data_uri(client: &reqwest::blocking::Client, url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let addr = validate_url(&parsed).ok()?;

        let host = parsed.host_str()?;
        let port = parsed.port_or_known_default().unwrap_or(443);
        let request = client
            .get(parsed.clone())
            .resolve(host, SocketAddr::new(addr, port));

        let response = request.send().ok()?;
        if !response.status().is_success() {
            return None;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("image/") {
            return None;
        }
        if response.content_length().is_some_and(|len| len > MAX_BODY_BYTES) {
            return None;
        }

        let mut buf = Vec::new();
        let mut reader = response.take(MAX_BODY_BYTES + 1);
        std::io::Read::read_to_end(&mut reader, &mut buf).ok()?;
        if buf.len() as u64 > MAX_BODY_BYTES {
            warn!(url, "external image exceeded size cap, dropping");
            return None;
        }

        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&buf);
        Some(format!("data:{content_type};base64,{encoded}"))
    }

    /// Resolve `url`'s host and reject it unless every resolved address
    /// (and the hostname itself) clears the SSRF deny-list. Returns the
    /// single address the caller should pin the connection to.
    fn validate_url(url: &url::Url) -> Result<IpAddr, ()> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(());
        }
        let host = url.host_str().ok_or(())?;
        if is_denied_hostname(host) {
            return Err(());
        }

        let port = url.port_or_known_default().unwrap_or(443);
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs().map_err(|_| ())?.collect();
        if addrs.is_empty() {
            return Err(());
        }
        for addr in &addrs {
            if is_denied_address(addr.ip()) {
                return Err(());
            }
        }
        Ok(addrs[0].ip())
    }

    fn is_denied_hostname(host: &str) -> bool {
        let lower = host.to_ascii_lowercase();
        lower == "localhost"
            || lower == "metadata.google.internal"
            || lower.ends_with(".internal")
            || lower.ends_with(".local")
    }

    fn is_denied_address(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_unspecified()
                    || v4.is_multicast()
                    || v4.octets()[0] == 169 && v4.octets()[1] == 254
            }
            IpAddr::V6(v6) => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_multicast()
                    || is_unique_local_v6(v6)
                    || is_link_local_v6(v6)
            }
        }
    }

    fn is_unique_local_v6(v6: std::net::Ipv6Addr) -> bool {
        (v6.segments()[0] & 0xfe00) == 0xfc00
    }

    fn is_link_local_v6(v6: std::net::Ipv6Addr) -> bool {
        (v6.segments()[0] & 0xffc0) == 0xfe80
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::net::Ipv4Addr;

        #[test]
        fn rejects_loopback_and_private() {
            assert!(is_denied_address(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
            assert!(is_denied_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
            assert!(is_denied_address(IpAddr::V4(Ipv4Addr::new(169, 254, 1, 1))));
            assert!(!is_denied_address(IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))));
        }

        #[test]
        fn rejects_metadata_and_internal_hostnames() {
            assert!(is_denied_hostname("metadata.google.internal"));
            assert!(is_denied_hostname("printer.local"));
            assert!(is_denied_hostname("payments.internal"));
            assert!(!is_denied_hostname("example.com"));
        }

        #[test]
        fn rejects_non_http_scheme() {
            let url = url::Url::parse("file:///etc/passwd").unwrap();
            assert!(validate_url(&url).is_err());
        }
    }
}

#[cfg(feature = "external-images")]
pub use external::inline_external_images;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_matching_cid() {
        let html = br#"<p>hi <img src="cid:logo@example"></p>"#;
        let attachments = [ImageAttachment { content_id: "logo@example", mime_hint: "image/png", bytes: b"\x89PNG" }];
        let out = resolve_cid_images(html, &attachments);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("data:image/png;base64,"));
    }

    #[test]
    fn resolves_angle_bracket_cid_form() {
        let html = br#"<img src="cid:<logo@example>">"#;
        let attachments = [ImageAttachment { content_id: "logo@example", mime_hint: "image/png", bytes: b"x" }];
        let out = resolve_cid_images(html, &attachments);
        assert!(String::from_utf8(out).unwrap().contains("data:image/png;base64,"));
    }

    #[test]
    fn unmatched_cid_is_left_untouched() {
        let html = br#"<img src="cid:missing@nowhere">"#;
        let out = resolve_cid_images(html, &[]);
        assert_eq!(out, html);
    }

    #[test]
    fn non_cid_src_is_untouched() {
        let html = br#"<img src="https://example.com/a.png">"#;
        let out = resolve_cid_images(html, &[]);
        assert_eq!(out, html);
    }

    #[test]
    fn cid_resolution_is_idempotent() {
        let html = br#"<img src="cid:logo@x">"#;
        let attachments = [ImageAttachment { content_id: "logo@x", mime_hint: "image/png", bytes: b"abc" }];
        let once = resolve_cid_images(html, &attachments);
        let twice = resolve_cid_images(&once, &attachments);
        assert_eq!(once, twice);
    }

    #[test]
    fn referenced_cids_strips_brackets_and_lowercases() {
        let html = br#"<img src="cid:<Logo@X>"><img src="cid:other">"#;
        let found = referenced_cids(html);
        assert!(found.contains("logo@x"));
        assert!(found.contains("other"));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn referenced_cids_ignores_non_cid_sources() {
        let html = br#"<img src="https://example.com/a.png">"#;
        assert!(referenced_cids(html).is_empty());
    }
}
