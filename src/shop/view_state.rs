//! URL-backed view state shared by a search page and its table.
//!
//! The query string (`page`, `searchText`) is the only state shared across
//! concerns, so it is modelled as a versioned value. Every write is a pure
//! `Transition` computed against a specific version; applying a transition
//! computed against an older version is rejected instead of clobbering a
//! newer write. All writes replace the current URL without adding a history
//! entry.

use axum::extract::Query;
use axum::http::Uri;
use serde::{Deserialize, Serialize};

/// Raw query parameters as they appear in the URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewQuery {
    pub page: Option<String>,
    pub search_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    version: u64,
    /// 1-based page number as shown in the URL.
    page: usize,
    search_text: Option<String>,
}

/// A history-suppressed replacement of the current URL's query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlReplace {
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    based_on: u64,
    next: ViewState,
}

impl Transition {
    pub fn state(&self) -> &ViewState {
        &self.next
    }

    pub fn url(&self) -> UrlReplace {
        UrlReplace {
            query: self.next.to_query_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stale view transition: computed against version {based_on}, current is {current}")]
pub struct StaleTransition {
    pub based_on: u64,
    pub current: u64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            version: 0,
            page: 1,
            search_text: None,
        }
    }
}

impl ViewState {
    pub fn from_query(query: &ViewQuery) -> Self {
        let page = query
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<usize>().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1);
        let search_text = query
            .search_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            version: 0,
            page,
            search_text,
        }
    }

    /// Read the view state from a full URI. Malformed queries yield defaults.
    pub fn from_uri(uri: &Uri) -> Self {
        match Query::<ViewQuery>::try_from_uri(uri) {
            Ok(Query(query)) => Self::from_query(&query),
            Err(_) => Self::default(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn page(&self) -> usize {
        self.page
    }

    /// 0-based page index used by the table.
    pub fn page_index(&self) -> usize {
        self.page - 1
    }

    pub fn search_text(&self) -> Option<&str> {
        self.search_text.as_deref()
    }

    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(text) = &self.search_text {
            parts.push(format!("searchText={}", urlencoding::encode(text)));
        }
        parts.push(format!("page={}", self.page));
        parts.join("&")
    }

    fn transition(&self, page: usize, search_text: Option<String>) -> Transition {
        Transition {
            based_on: self.version,
            next: ViewState {
                version: self.version + 1,
                page,
                search_text,
            },
        }
    }

    pub fn with_page_index(&self, page_index: usize) -> Transition {
        self.transition(page_index + 1, self.search_text.clone())
    }

    /// A new search always starts again on page 1.
    pub fn with_search_text(&self, search_text: Option<&str>) -> Transition {
        let search_text = search_text
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        self.transition(1, search_text)
    }

    pub fn apply(&mut self, transition: Transition) -> Result<(), StaleTransition> {
        if transition.based_on != self.version {
            return Err(StaleTransition {
                based_on: transition.based_on,
                current: self.version,
            });
        }
        *self = transition.next;
        Ok(())
    }
}

/// Send the view back to page 1 when the current page no longer exists
/// (e.g. after a filter shrank the result set). Page 1 is never corrected.
pub fn correct_page_boundary(state: &ViewState, page_count: usize) -> Option<Transition> {
    let page_index = state.page_index();
    (page_index > 0 && page_count <= page_index).then(|| state.with_page_index(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(page: &str, search: Option<&str>) -> ViewState {
        ViewState::from_query(&ViewQuery {
            page: Some(page.to_string()),
            search_text: search.map(str::to_string),
        })
    }

    #[test]
    fn test_absent_page_defaults_to_first() {
        let s = ViewState::from_query(&ViewQuery::default());
        assert_eq!(s.page(), 1);
        assert_eq!(s.page_index(), 0);
        assert!(s.search_text().is_none());
    }

    #[test]
    fn test_invalid_page_defaults_to_first() {
        assert_eq!(state("0", None).page(), 1);
        assert_eq!(state("-3", None).page(), 1);
        assert_eq!(state("abc", None).page(), 1);
        assert_eq!(state("4", None).page_index(), 3);
    }

    #[test]
    fn test_blank_search_text_is_absent() {
        assert!(state("1", Some("   ")).search_text().is_none());
        assert_eq!(state("1", Some(" ada ")).search_text(), Some("ada"));
    }

    #[test]
    fn test_from_uri() {
        let uri: Uri = "/tickets?searchText=ada%20l&page=3".parse().unwrap();
        let s = ViewState::from_uri(&uri);
        assert_eq!(s.page(), 3);
        assert_eq!(s.search_text(), Some("ada l"));

        let uri: Uri = "/tickets".parse().unwrap();
        assert_eq!(ViewState::from_uri(&uri), ViewState::default());
    }

    #[test]
    fn test_query_string_encodes_search_text() {
        let s = state("2", Some("a&b c"));
        assert_eq!(s.to_query_string(), "searchText=a%26b%20c&page=2");
        assert_eq!(ViewState::default().to_query_string(), "page=1");
    }

    #[test]
    fn test_transitions_bump_version() {
        let mut s = ViewState::default();
        let t = s.with_page_index(2);
        assert_eq!(t.url().query, "page=3");
        s.apply(t).unwrap();
        assert_eq!(s.page(), 3);
        assert_eq!(s.version(), 1);
    }

    #[test]
    fn test_stale_transition_is_rejected() {
        let mut s = ViewState::default();
        let first = s.with_page_index(1);
        let stale = s.with_page_index(5);
        s.apply(first).unwrap();
        let err = s.apply(stale).unwrap_err();
        assert_eq!(err, StaleTransition { based_on: 0, current: 1 });
        assert_eq!(s.page(), 2);
    }

    #[test]
    fn test_new_search_resets_page() {
        let s = state("4", Some("old"));
        let t = s.with_search_text(Some("new"));
        assert_eq!(t.state().page(), 1);
        assert_eq!(t.state().search_text(), Some("new"));
        assert!(s.with_search_text(None).state().search_text().is_none());
    }

    #[test]
    fn test_boundary_correction() {
        // page 3 (index 2) with only 2 pages left -> back to page 1
        let s = state("3", Some("x"));
        let t = correct_page_boundary(&s, 2).expect("should correct");
        assert_eq!(t.state().page(), 1);
        assert_eq!(t.url().query, "searchText=x&page=1");

        // still in range -> nothing to do
        assert!(correct_page_boundary(&s, 3).is_none());

        // page 1 is never corrected, even with zero pages
        assert!(correct_page_boundary(&state("1", None), 0).is_none());
    }
}
