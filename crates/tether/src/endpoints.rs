//! Ordered candidate URLs for the current content.

use url::Url;

/// Candidate stream URLs, primary first, with the index being played and
/// the attempt counter for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSet {
    urls: Vec<String>,
    current_index: usize,
    retry_count: u32,
    cycle: u32,
}

impl EndpointSet {
    /// Build a set from raw URLs, dropping blank entries.
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls = urls
            .into_iter()
            .map(Into::into)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        Self {
            urls,
            current_index: 0,
            retry_count: 0,
            cycle: 0,
        }
    }

    pub fn single(url: impl Into<String>) -> Self {
        Self::new([url.into()])
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&str> {
        self.urls.get(self.current_index).map(String::as_str)
    }

    /// Attempts made on the current URL.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Completed passes over the whole list.
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub(crate) fn increment_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    pub(crate) fn reset_retry(&mut self) {
        self.retry_count = 0;
    }

    /// Move to the next URL, resetting the attempt counter to zero.
    /// Returns true when the rotation wrapped back to the first URL.
    pub(crate) fn advance(&mut self) -> bool {
        if self.urls.is_empty() {
            return false;
        }
        self.retry_count = 0;
        let next = self.current_index + 1;
        if next >= self.urls.len() {
            self.current_index = 0;
            self.cycle += 1;
            true
        } else {
            self.current_index = next;
            false
        }
    }

    /// Human readable label for the URL at `index`, e.g. `stream 2/3 (cdn.example.com)`.
    pub fn label(&self, index: usize) -> String {
        let Some(raw) = self.urls.get(index) else {
            return String::from("no stream");
        };
        let host = Url::parse(raw)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| raw.clone());
        format!("stream {}/{} ({})", index + 1, self.urls.len(), host)
    }

    pub fn current_label(&self) -> String {
        self.label(self.current_index)
    }
}
