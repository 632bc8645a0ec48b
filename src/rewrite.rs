//! HTML body rewriting and plain-text extraction.
//!
//! Page bodies arrive from the generator with relative image paths and
//! hrefs that are relative to the page itself. Before storage we rewrite
//! both to stable application URLs, drop the leading `<h1>` (the title is
//! served separately), and pass everything else through untouched. The
//! rewriter is a streaming event pass: read events, patch attributes on
//! `<img>` and `<a>`, write events back out.

use std::collections::HashMap;
use std::io::Cursor;

use anyhow::{Context, Result};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use scraper::Html;

/// URL builder for one version of one project.
pub struct PageUrls<'a> {
    pub machine_name: &'a str,
    pub version: &'a str,
}

impl PageUrls<'_> {
    pub fn page_url(&self, path: &str) -> String {
        format!(
            "/api/v1/projects/{}/versions/{}/pages/{}",
            self.machine_name, self.version, path
        )
    }

    pub fn image_url(&self, image_id: &str) -> String {
        format!(
            "/api/v1/projects/{}/versions/{}/images/{}",
            self.machine_name, self.version, image_id
        )
    }
}

/// Rewrite a page body: image sources become image URLs (via `images`,
/// keyed by bundle path), internal references become absolute page URLs,
/// and the first `<h1>` is removed.
pub fn rewrite_body(
    body: &str,
    urls: &PageUrls<'_>,
    images: &HashMap<String, String>,
) -> Result<String> {
    rewrite_html(body, urls, images, false)
}

/// Rewrite a table-of-contents fragment: every relative href becomes an
/// absolute page URL. TOC fragments carry no images or headings.
pub fn rewrite_toc(html: &str, urls: &PageUrls<'_>) -> Result<String> {
    rewrite_html(html, urls, &HashMap::new(), true)
}

fn rewrite_html(
    html: &str,
    urls: &PageUrls<'_>,
    images: &HashMap<String, String>,
    all_links: bool,
) -> Result<String> {
    if html.is_empty() {
        return Ok(String::new());
    }

    let mut reader = Reader::from_str(html);
    // Generator output is XHTML-shaped but not strict XML.
    reader.config_mut().check_end_names = false;

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut dropped_h1 = false;
    let mut in_dropped_h1 = false;

    loop {
        let event = reader.read_event().context("malformed page markup")?;
        match event {
            // h1 content is inline; nothing in there nests another h1.
            Event::End(e) if in_dropped_h1 => {
                if e.local_name().as_ref() == b"h1" {
                    in_dropped_h1 = false;
                }
            }
            _ if in_dropped_h1 => {}

            Event::Start(e) if e.local_name().as_ref() == b"h1" && !dropped_h1 => {
                dropped_h1 = true;
                in_dropped_h1 = true;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"h1" && !dropped_h1 => {
                dropped_h1 = true;
            }

            Event::Start(e) if e.local_name().as_ref() == b"img" => {
                let patched = patch_img(&e, urls, images)?;
                writer.write_event(Event::Start(patched))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"img" => {
                let patched = patch_img(&e, urls, images)?;
                writer.write_event(Event::Empty(patched))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"a" => {
                let patched = patch_anchor(&e, urls, all_links)?;
                writer.write_event(Event::Start(patched))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"a" => {
                let patched = patch_anchor(&e, urls, all_links)?;
                writer.write_event(Event::Empty(patched))?;
            }

            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).context("rewritten markup is not UTF-8")
}

fn attr_value(attr: &Attribute<'_>) -> String {
    attr.unescape_value()
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned())
}

/// Rebuild an element, replacing the value of `target` via `replace`.
/// Untouched attributes keep their original (still escaped) bytes.
fn patch_attr(
    elem: &BytesStart<'_>,
    target: &[u8],
    replace: impl Fn(&str) -> Option<String>,
) -> Result<BytesStart<'static>> {
    let mut out = elem.to_owned();
    out.clear_attributes();
    for attr in elem.attributes() {
        let attr = attr.context("malformed attribute")?;
        if attr.key.as_ref() == target {
            if let Some(new_value) = replace(&attr_value(&attr)) {
                out.push_attribute((
                    String::from_utf8_lossy(target).as_ref(),
                    new_value.as_str(),
                ));
                continue;
            }
        }
        out.push_attribute(attr);
    }
    Ok(out)
}

fn patch_img(
    elem: &BytesStart<'_>,
    urls: &PageUrls<'_>,
    images: &HashMap<String, String>,
) -> Result<BytesStart<'static>> {
    patch_attr(elem, b"src", |src| {
        let key = src.replace("../", "");
        images.get(&key).map(|id| urls.image_url(id))
    })
}

fn patch_anchor(
    elem: &BytesStart<'_>,
    urls: &PageUrls<'_>,
    all_links: bool,
) -> Result<BytesStart<'static>> {
    let rewrite = all_links || anchor_is_internal_reference(elem)?;
    if !rewrite {
        return Ok(elem.to_owned());
    }
    patch_attr(elem, b"href", |href| rewrite_internal_href(href, urls))
}

/// Internal cross-references carry `class="reference internal"`.
fn anchor_is_internal_reference(elem: &BytesStart<'_>) -> Result<bool> {
    for attr in elem.attributes() {
        let attr = attr.context("malformed attribute")?;
        if attr.key.as_ref() == b"class" {
            let classes = attr_value(&attr);
            let mut has_reference = false;
            let mut has_internal = false;
            for class in classes.split_whitespace() {
                has_reference |= class == "reference";
                has_internal |= class == "internal";
            }
            return Ok(has_reference && has_internal);
        }
    }
    Ok(false)
}

/// Turn a page-relative href into an absolute page URL, preserving any
/// `#anchor`. External and fragment-only hrefs are left alone.
fn rewrite_internal_href(href: &str, urls: &PageUrls<'_>) -> Option<String> {
    if href.starts_with('#') || href.contains("://") {
        return None;
    }
    let (mut path, anchor) = match href.split_once('#') {
        Some((p, a)) => (p, Some(a)),
        None => (href, None),
    };
    path = path.trim_end_matches('/');
    while let Some(rest) = path.strip_prefix("../") {
        path = rest;
    }
    let mut url = urls.page_url(path);
    if let Some(anchor) = anchor {
        url.push('#');
        url.push_str(anchor);
    }
    Some(url)
}

/// Collapse a rewritten body into plain text for the search index.
pub fn extract_text(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    let words: Vec<&str> = fragment
        .root_element()
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect();
    words.join(" ")
}
