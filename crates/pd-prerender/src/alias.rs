//! URLs that identify one prerender.

use url::Url;

/// Ordered, append-only list of URLs a prerender answers to.
///
/// The first URL pushed is the prerender's own URL and stays first; later
/// entries are the redirect chain observed while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasSet {
    urls: Vec<Url>,
}

impl AliasSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, url: Url) {
        self.urls.push(url);
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.urls.iter().any(|alias| alias == url)
    }

    pub fn first(&self) -> Option<&Url> {
        self.urls.first()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.urls.iter()
    }

    pub fn as_slice(&self) -> &[Url] {
        &self.urls
    }

    /// Adopts another set wholesale. Both sets must share the same first URL.
    pub(crate) fn replace_with(&mut self, other: &AliasSet) {
        assert_eq!(
            self.first(),
            other.first(),
            "alias sets must share their primary URL"
        );
        self.urls = other.urls.clone();
    }
}
