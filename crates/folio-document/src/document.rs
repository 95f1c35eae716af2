//! The parser seam: structured documents built from raw bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use folio_glyphs::{DOCUMENT_SCHEME, FontFace, FontFaceMap, FontLoader, FsFontLoader};

use crate::error::ParseError;

/// One page of a document with everything it references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentPage {
    pub path: String,
    /// URLs of images, stylesheets and other resources the page uses.
    pub assets: BTreeSet<String>,
    pub font_faces: Vec<FontFace>,
    /// Visible text, whitespace collapsed.
    pub text: String,
}

/// A parsed document. Built on a worker, read from any thread.
pub trait Document: Send + Sync {
    fn pages(&self) -> &[ContentPage];

    /// Whether the document embeds a file at logical path `name`.
    fn is_file_exists(&self, name: &str) -> bool;

    fn file_data(&self, name: &str) -> Option<Bytes>;

    /// Every asset URL across all pages.
    fn all_assets(&self) -> BTreeSet<String> {
        self.pages().iter().flat_map(|p| p.assets.iter().cloned()).collect()
    }

    /// Every declared face, in page order.
    fn font_faces(&self) -> FontFaceMap {
        self.pages().iter().flat_map(|p| p.font_faces.iter().cloned()).collect()
    }

    fn text(&self) -> String {
        let texts: Vec<&str> = self.pages().iter().map(|p| p.text.as_str()).collect();
        texts.join("\n")
    }
}

pub trait DocumentParser: Send + Sync {
    fn parse(&self, data: Bytes, content_type: &str) -> Result<Arc<dyn Document>, ParseError>;
}

/// Files embedded in a document, by logical path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileBundle {
    files: BTreeMap<String, Bytes>,
}

impl FileBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.files.insert(normalize(&name.into()), data.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(&normalize(name))
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files.get(&normalize(name)).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// `./a/b.css`, `/a/b.css` and `document://a/b.css` name the same file.
fn normalize(name: &str) -> String {
    let name = name.strip_prefix(DOCUMENT_SCHEME).unwrap_or(name);
    name.trim_start_matches("./").trim_start_matches('/').to_string()
}

/// Resolves `document://` fonts from a document's embedded files and
/// everything else through the filesystem loader.
pub struct DocumentFontLoader {
    document: Arc<dyn Document>,
    fallback: FsFontLoader,
}

impl DocumentFontLoader {
    pub fn new(document: Arc<dyn Document>, fallback: FsFontLoader) -> Self {
        Self { document, fallback }
    }
}

impl FontLoader for DocumentFontLoader {
    fn load(&self, source: &str) -> Option<Bytes> {
        match source.strip_prefix(DOCUMENT_SCHEME) {
            Some(name) => self.document.file_data(name),
            None => self.fallback.load(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pages(Vec<ContentPage>, FileBundle);

    impl Document for Pages {
        fn pages(&self) -> &[ContentPage] {
            &self.0
        }
        fn is_file_exists(&self, name: &str) -> bool {
            self.1.contains(name)
        }
        fn file_data(&self, name: &str) -> Option<Bytes> {
            self.1.get(name)
        }
    }

    #[test]
    fn bundle_paths_are_normalized() {
        let mut bundle = FileBundle::new();
        bundle.insert("./fonts/a.ttf", "A");
        assert!(bundle.contains("fonts/a.ttf"));
        assert!(bundle.contains("/fonts/a.ttf"));
        assert!(bundle.contains("document://fonts/a.ttf"));
        assert_eq!(bundle.names().collect::<Vec<_>>(), vec!["fonts/a.ttf"]);
    }

    #[test]
    fn default_methods_merge_pages() {
        let mut first = ContentPage { path: "1".into(), text: "one".into(), ..Default::default() };
        first.assets.insert("http://a/x.png".into());
        first.font_faces.push(FontFace::new("serif", vec!["document://s.ttf".into()]));
        let mut second = ContentPage { path: "2".into(), text: "two".into(), ..Default::default() };
        second.assets.insert("http://a/x.png".into());
        second.assets.insert("http://a/y.png".into());

        let doc = Pages(vec![first, second], FileBundle::new());
        assert_eq!(doc.all_assets().len(), 2);
        assert_eq!(doc.font_faces().len(), 1);
        assert_eq!(doc.text(), "one\ntwo");
    }

    #[test]
    fn document_fonts_come_from_the_bundle() {
        let mut bundle = FileBundle::new();
        bundle.insert("fonts/s.ttf", "abc");
        let doc: Arc<dyn Document> = Arc::new(Pages(Vec::new(), bundle));
        let loader = DocumentFontLoader::new(doc, FsFontLoader::default());
        assert_eq!(loader.load("document://fonts/s.ttf").as_deref(), Some(&b"abc"[..]));
        assert!(loader.load("document://fonts/none.ttf").is_none());
        assert!(loader.load("local://none.ttf").is_none());
    }
}
