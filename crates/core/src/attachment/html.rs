//! Embedded image extraction from HTML bodies.
//!
//! Every `<img>` tag is visited once, in document order:
//! - inline `data:image/...;base64,` sources are decoded and replaced with a
//!   fresh `cid:` token
//! - sources on the public object domain become pending references to an
//!   already stored object
//! - images without any width get `max-width: 100%;`
//!
//! Text outside image tags, and tags that need no change, are copied through
//! byte for byte.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use regex::{Captures, Regex};
use tracing::debug;
use uuid::Uuid;

use super::key::derive_key;
use super::types::{EmbeddedImage, ExtractedHtml, ExtractedImage};

const MAX_WIDTH_RULE: &str = "max-width: 100%;";

/// An `<img ...>` start tag. Quoted attribute values may contain `>`.
static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b((?:[^>"']|"[^"]*"|'[^']*')*?)(/?)>"#).expect("img tag pattern compiles")
});

/// One attribute inside a start tag: bare, double quoted, single quoted or unquoted.
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#).expect("attribute pattern compiles")
});

/// Parsed attributes of one tag, in source order.
struct Attributes(Vec<(String, Option<String>)>);

impl Attributes {
    fn parse(raw: &str) -> Self {
        Self(
            ATTRIBUTE
                .captures_iter(raw)
                .map(|caps| {
                    let value = caps
                        .get(2)
                        .or_else(|| caps.get(3))
                        .or_else(|| caps.get(4))
                        .map(|m| m.as_str().to_string());
                    (caps[1].to_string(), value)
                })
                .collect(),
        )
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }

    fn has(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    fn set(&mut self, name: &str, value: String) {
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, v)) => *v = Some(value),
            None => self.0.push((name.to_string(), Some(value))),
        }
    }

    fn render(&self, self_closing: bool) -> String {
        let mut tag = String::from("<img");
        for (name, value) in &self.0 {
            tag.push(' ');
            tag.push_str(name);
            if let Some(value) = value {
                tag.push_str("=\"");
                tag.push_str(&value.replace('"', "&quot;"));
                tag.push('"');
            }
        }
        tag.push_str(if self_closing { " />" } else { ">" });
        tag
    }
}

/// Rewrite every embedded image of `html`.
///
/// Pure apart from token generation. References are returned unresolved; the
/// caller looks their keys up in the catalog.
#[must_use]
pub fn rewrite_embedded_images(html: &str, public_object_domain: Option<&str>) -> ExtractedHtml {
    let origin = public_object_domain.and_then(normalize_domain);
    let prefix = origin.map(|origin| format!("{origin}/"));
    let mut images = Vec::new();

    let rewritten = IMG_TAG.replace_all(html, |caps: &Captures<'_>| {
        let mut attrs = Attributes::parse(&caps[1]);
        let mut changed = false;

        if let Some(src) = attrs.get("src").map(str::to_string) {
            if src.starts_with("data:image") {
                match decode_data_image(&src) {
                    Some(image) => {
                        attrs.set("src", format!("cid:{}", image.content_id));
                        images.push(ExtractedImage::Inline(image));
                        changed = true;
                    }
                    None => debug!(len = src.len(), "leaving undecodable data image"),
                }
            } else if let Some(key) = prefix
                .as_deref()
                .and_then(|prefix| src.strip_prefix(prefix))
                .filter(|key| !key.is_empty())
            {
                let content_id = new_content_id();
                attrs.set("src", format!("cid:{content_id}"));
                images.push(ExtractedImage::Reference {
                    key: key.to_string(),
                    content_id,
                });
                changed = true;
            }
        }

        let style = attrs.get("style").unwrap_or_default().to_string();
        if !attrs.has("width") && !declares_width(&style) {
            attrs.set("style", append_max_width(&style));
            changed = true;
        }

        if changed {
            attrs.render(!caps[2].is_empty())
        } else {
            caps[0].to_string()
        }
    });

    ExtractedHtml {
        html: rewritten.into_owned(),
        images,
    }
}

/// Normalize a configured domain to `scheme://host` without a trailing slash.
///
/// A bare host gets `https://`. Blank input means no domain.
#[must_use]
pub fn normalize_domain(domain: &str) -> Option<String> {
    let domain = domain.trim().trim_end_matches('/');
    if domain.is_empty() {
        return None;
    }
    if domain.contains("://") {
        Some(domain.to_string())
    } else {
        Some(format!("https://{domain}"))
    }
}

/// Decode a `data:image/<subtype>;base64,<payload>` URI.
fn decode_data_image(src: &str) -> Option<EmbeddedImage> {
    let (mime_type, bytes) = decode_data_uri(src)?;
    if !mime_type.starts_with("image/") {
        return None;
    }
    let filename = format!("image.{}", image_subtype(&mime_type));
    let key = derive_key(&bytes, &filename);

    Some(EmbeddedImage {
        key,
        filename,
        mime_type,
        size: bytes.len() as u64,
        content_id: new_content_id(),
        content: Some(Bytes::from(bytes)),
    })
}

/// Split a base64 `data:` URI into its MIME type and decoded bytes.
pub(crate) fn decode_data_uri(src: &str) -> Option<(String, Vec<u8>)> {
    let rest = src.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mut params = header.split(';');
    let mime_type = params.next()?.trim().to_ascii_lowercase();
    if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return None;
    }
    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(payload).ok()?;
    Some((mime_type, bytes))
}

fn image_subtype(mime_type: &str) -> &str {
    let subtype = mime_type.split_once('/').map_or("", |(_, s)| s);
    let subtype = subtype.split('+').next().unwrap_or(subtype);
    if subtype.is_empty() { "bin" } else { subtype }
}

fn new_content_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Whether a style attribute carries a `width` declaration.
fn declares_width(style: &str) -> bool {
    style.split(';').any(|declaration| {
        declaration.split_once(':').is_some_and(|(property, value)| {
            property.trim().eq_ignore_ascii_case("width") && !value.trim().is_empty()
        })
    })
}

fn append_max_width(style: &str) -> String {
    let style = style.trim();
    if style.is_empty() {
        return MAX_WIDTH_RULE.to_string();
    }
    let style = style.strip_suffix(';').unwrap_or(style);
    format!("{style}; {MAX_WIDTH_RULE}")
}

#[cfg(test)]
#[path = "html_tests.rs"]
mod tests;
