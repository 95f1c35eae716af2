//! A small markup parser for folio documents.
//!
//! Understands just enough HTML and CSS to feed the controller:
//!
//! | Construct                                   | Becomes                    |
//! |---------------------------------------------|----------------------------|
//! | `<section data-page="p">…</section>`        | one [`ContentPage`] each   |
//! | `<template data-file="f">…</template>`      | embedded file `f`          |
//! | `src="…"`, `href="…"`, CSS `url(…)`         | page asset URLs            |
//! | `@font-face { font-family; src: url(…) }`   | page font faces            |
//! | everything outside tags                     | page text                  |
//!
//! A document without sections is a single page named `index`. Stylesheets
//! (`text/css`) parse into one page with no text.

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use folio_glyphs::{DOCUMENT_SCHEME, FontFace, FontStretch, FontStyle, FontWeight};
use regex::Regex;
use tracing::trace;

use crate::document::{ContentPage, Document, DocumentParser, FileBundle};
use crate::error::ParseError;

pub const CSS_CONTENT_TYPE: &str = "text/css";

struct Patterns {
    template: Regex,
    section: Regex,
    script: Regex,
    style: Regex,
    attr_url: Regex,
    css_url: Regex,
    font_face: Regex,
    font_family: Regex,
    font_src: Regex,
    font_weight: Regex,
    font_style: Regex,
    font_stretch: Regex,
    tag: Regex,
    space: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            template: Regex::new(r#"(?is)<template\b[^>]*\bdata-file\s*=\s*["']([^"']+)["'][^>]*>(.*?)</template\s*>"#)?,
            section: Regex::new(r#"(?is)<section\b[^>]*\bdata-page\s*=\s*["']([^"']+)["'][^>]*>(.*?)</section\s*>"#)?,
            script: Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>")?,
            style: Regex::new(r"(?is)<style\b[^>]*>(.*?)</style\s*>")?,
            attr_url: Regex::new(r#"(?i)\b(?:src|href)\s*=\s*["']([^"']+)["']"#)?,
            css_url: Regex::new(r#"(?i)url\(\s*['"]?([^'")]+?)['"]?\s*\)"#)?,
            font_face: Regex::new(r"(?is)@font-face\s*\{([^}]*)\}")?,
            font_family: Regex::new(r#"(?i)font-family\s*:\s*['"]?([^;'"]+?)['"]?\s*(?:;|$)"#)?,
            font_src: Regex::new(r"(?i)\bsrc\s*:\s*([^;]+)")?,
            font_weight: Regex::new(r"(?i)font-weight\s*:\s*([a-z0-9]+)")?,
            font_style: Regex::new(r"(?i)font-style\s*:\s*([a-z]+)")?,
            font_stretch: Regex::new(r"(?i)font-stretch\s*:\s*([0-9]+)%")?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
            space: Regex::new(r"\s+")?,
        })
    }
}

/// Parses markup and stylesheets into [`MarkupDocument`]s.
pub struct MarkupParser {
    patterns: Patterns,
}

impl MarkupParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self { patterns: Patterns::compile()? })
    }

    fn parse_markup(&self, text: &str) -> MarkupDocument {
        let p = &self.patterns;

        let mut files = FileBundle::new();
        for cap in p.template.captures_iter(text) {
            files.insert(&cap[1], Bytes::copy_from_slice(cap[2].trim().as_bytes()));
        }
        let body = p.template.replace_all(text, "");

        let mut pages: Vec<ContentPage> = p
            .section
            .captures_iter(&body)
            .map(|cap| self.page(&cap[1], &cap[2]))
            .collect();
        if pages.is_empty() {
            pages.push(self.page("index", &body));
        }
        trace!(pages = pages.len(), files = files.len(), "markup parsed");
        MarkupDocument { pages, files }
    }

    fn page(&self, path: &str, markup: &str) -> ContentPage {
        let p = &self.patterns;
        let mut page = ContentPage { path: path.to_string(), ..Default::default() };

        for cap in p.style.captures_iter(markup) {
            self.stylesheet(&cap[1], &mut page);
        }
        for cap in p.attr_url.captures_iter(markup) {
            push_asset(&mut page, &cap[1]);
        }

        let visible = p.script.replace_all(markup, " ");
        let visible = p.style.replace_all(&visible, " ");
        let visible = p.tag.replace_all(&visible, " ");
        let visible = decode_entities(&visible);
        page.text = p.space.replace_all(&visible, " ").trim().to_string();
        page
    }

    fn stylesheet(&self, css: &str, page: &mut ContentPage) {
        let p = &self.patterns;
        for cap in p.font_face.captures_iter(css) {
            if let Some(face) = self.font_face(&cap[1]) {
                page.font_faces.push(face);
            }
        }
        let rest = p.font_face.replace_all(css, "");
        for cap in p.css_url.captures_iter(&rest) {
            push_asset(page, &cap[1]);
        }
    }

    fn font_face(&self, body: &str) -> Option<FontFace> {
        let p = &self.patterns;
        let family = p.font_family.captures(body)?[1].trim().to_string();
        let src = p.font_src.captures(body)?;
        let sources: Vec<String> = p
            .css_url
            .captures_iter(&src[1])
            .map(|cap| font_locator(&cap[1]))
            .collect();
        if family.is_empty() || sources.is_empty() {
            return None;
        }

        let mut face = FontFace::new(family, sources);
        if let Some(cap) = p.font_weight.captures(body) {
            face.weight = match cap[1].to_ascii_lowercase().as_str() {
                "normal" => FontWeight::NORMAL,
                "bold" => FontWeight::BOLD,
                other => other.parse().map(FontWeight).unwrap_or_default(),
            };
        }
        if let Some(cap) = p.font_style.captures(body) {
            face.style = FontStyle::from_str(&cap[1].to_ascii_lowercase()).unwrap_or_default();
        }
        if let Some(cap) = p.font_stretch.captures(body) {
            face.stretch = cap[1].parse().map(FontStretch).unwrap_or_default();
        }
        Some(face)
    }
}

impl DocumentParser for MarkupParser {
    fn parse(&self, data: Bytes, content_type: &str) -> Result<Arc<dyn Document>, ParseError> {
        let text = std::str::from_utf8(&data).map_err(|e| ParseError::Encoding(e.to_string()))?;
        let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();

        if mime == CSS_CONTENT_TYPE {
            let mut page = ContentPage { path: "style.css".to_string(), ..Default::default() };
            self.stylesheet(text, &mut page);
            return Ok(Arc::new(MarkupDocument { pages: vec![page], files: FileBundle::new() }));
        }
        let markup = mime.is_empty() || mime.starts_with("text/") || mime.contains("html") || mime.contains("xml");
        if !markup {
            return Err(ParseError::ContentType(mime));
        }
        if text.trim().is_empty() {
            return Err(ParseError::Malformed("empty document".to_string()));
        }
        Ok(Arc::new(self.parse_markup(text)))
    }
}

/// What [`MarkupParser`] produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupDocument {
    pages: Vec<ContentPage>,
    files: FileBundle,
}

impl MarkupDocument {
    pub fn files(&self) -> &FileBundle {
        &self.files
    }
}

impl Document for MarkupDocument {
    fn pages(&self) -> &[ContentPage] {
        &self.pages
    }

    fn is_file_exists(&self, name: &str) -> bool {
        self.files.contains(name)
    }

    fn file_data(&self, name: &str) -> Option<Bytes> {
        self.files.get(name)
    }
}

fn push_asset(page: &mut ContentPage, url: &str) {
    let url = url.trim();
    let skip = url.is_empty()
        || url.starts_with('#')
        || ["data:", "javascript:", "mailto:"].iter().any(|s| url.starts_with(s));
    if !skip {
        page.assets.insert(url.to_string());
    }
}

/// Bare names inside `@font-face` refer to embedded files.
fn font_locator(url: &str) -> String {
    let url = url.trim();
    if url.contains("://") {
        url.to_string()
    } else {
        format!("{DOCUMENT_SCHEME}{}", url.trim_start_matches("./"))
    }
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

    fn parse(text: &str, content_type: &str) -> Arc<dyn Document> {
        MarkupParser::new().unwrap().parse(Bytes::copy_from_slice(text.as_bytes()), content_type).unwrap()
    }

    #[test]
    fn single_page_text_and_assets() {
        let doc = parse(
            r##"<html><head><script>var x = "<b>";</script></head>
               <body><h1>Hello &amp; welcome</h1>
               <img src="http://cdn.example/a.png"> <a href="#top">top</a>
               <img src='images/local.png'></body></html>"##,
            "text/html",
        );
        let pages = doc.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].path, "index");
        assert_eq!(pages[0].text, "Hello & welcome top");
        let assets: Vec<&str> = pages[0].assets.iter().map(String::as_str).collect();
        assert_eq!(assets, vec!["http://cdn.example/a.png", "images/local.png"]);
    }

    #[test]
    fn sections_become_pages() {
        let doc = parse(
            r#"<section data-page="one">First</section>
               <section data-page="two"><p>Second</p><img src="b.png"></section>"#,
            "",
        );
        let pages = doc.pages();
        assert_eq!(pages.len(), 2);
        assert_eq!((pages[0].path.as_str(), pages[0].text.as_str()), ("one", "First"));
        assert!(pages[1].assets.contains("b.png"));
    }

    #[test]
    fn templates_are_embedded_files_not_text() {
        let doc = parse(
            r#"<template data-file="style/site.css">body { color: red }</template><p>Hi</p>"#,
            "text/html",
        );
        assert!(doc.is_file_exists("style/site.css"));
        assert_eq!(doc.file_data("style/site.css").as_deref(), Some(&b"body { color: red }"[..]));
        assert_eq!(doc.pages()[0].text, "Hi");
    }

    #[test]
    fn font_faces_from_style_blocks() {
        let doc = parse(
            r#"<style>
                @font-face { font-family: "Body Serif"; src: url(fonts/serif.ttf), url("http://f.example/s.ttf"); font-weight: bold; font-style: italic; }
                @font-face { font-family: Broken; }
                body { background: url('http://cdn.example/bg.png'); }
               </style><p>text</p>"#,
            "text/html",
        );
        let page = &doc.pages()[0];
        assert_eq!(page.font_faces.len(), 1);
        let face = &page.font_faces[0];
        assert_eq!(face.family, "Body Serif");
        assert_eq!(face.sources, vec!["document://fonts/serif.ttf".to_string(), "http://f.example/s.ttf".to_string()]);
        assert_eq!(face.weight, FontWeight::BOLD);
        assert_eq!(face.style, FontStyle::Italic);
        // Font URLs are not page assets; the background is.
        assert_eq!(page.assets.iter().collect::<Vec<_>>(), vec!["http://cdn.example/bg.png"]);
        assert_eq!(page.text, "text");
    }

    #[test]
    fn stylesheet_content_type() {
        let doc = parse(
            "@font-face { font-family: mono; src: url(local://mono.ttf); font-stretch: 75%; }\n.x { background: url(data:image/png;base64,AAAA) }",
            "text/css; charset=utf-8",
        );
        let page = &doc.pages()[0];
        assert!(page.text.is_empty());
        assert!(page.assets.is_empty());
        assert_eq!(page.font_faces[0].sources, vec!["local://mono.ttf".to_string()]);
        assert_eq!(page.font_faces[0].stretch, FontStretch(75));
    }

    #[test]
    fn rejects_binary_and_empty_content() {
        let parser = MarkupParser::new().unwrap();
        assert!(matches!(
            parser.parse(Bytes::from_static(b"PNG"), "image/png"),
            Err(ParseError::ContentType(_))
        ));
        assert!(matches!(
            parser.parse(Bytes::from_static(&[0xff, 0xfe, 0x00]), "text/html"),
            Err(ParseError::Encoding(_))
        ));
        assert!(matches!(parser.parse(Bytes::from_static(b"  "), "text/html"), Err(ParseError::Malformed(_))));
    }
}
