//! Tabular view controller: sort, filter, paginate and row navigation over
//! an already-fetched result set.
//!
//! Filters and sorting operate on each column's display value (the string
//! a user sees), not on the raw field. The current page lives in the
//! URL-backed [`ViewState`]; page changes are applied to it and reported as
//! [`Effect::ReplaceUrl`] so the page URL stays in sync without history
//! entries.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::view_state::{Transition, UrlReplace, ViewState, correct_page_boundary};
use crate::errors::ShopError;

pub const EMPTY_MESSAGE: &str = "No data found";

/// A record that can be shown as a table row.
pub trait TableRecord {
    fn row_id(&self) -> i64;

    /// Display value for `column`. Unknown columns render as empty.
    fn cell(&self, column: &str) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Case-insensitive substring match.
    Text,
    /// Exact match against one of the column's faceted values.
    Select,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub key: &'static str,
    pub filter: FilterKind,
}

impl ColumnDef {
    pub const fn text(key: &'static str) -> Self {
        Self {
            key,
            filter: FilterKind::Text,
        }
    }

    pub const fn select(key: &'static str) -> Self {
        Self {
            key,
            filter: FilterKind::Select,
        }
    }

    /// Header label: the column key with its first letter upper-cased.
    pub fn header(&self) -> String {
        let mut chars = self.key.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sort {
    pub column: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortIcon {
    Ascending,
    Descending,
    Unsorted,
}

/// An entry in a row's actions menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowAction {
    pub label: String,
    pub href: String,
}

/// Static description of one table: its columns, page size and links.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub columns: Vec<ColumnDef>,
    pub page_size: usize,
    pub default_sort: Option<Sort>,
    pub detail_href: fn(i64) -> String,
    pub row_actions: fn(i64) -> Vec<RowAction>,
}

/// Where inside a row a click landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    Row,
    /// An explicitly interactive sub-element such as the actions menu.
    Interactive,
}

/// Side effect the hosting page must carry out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    ReplaceUrl(UrlReplace),
    Navigate { href: String },
    /// Re-request the page data, bypassing any cache.
    Refresh,
}

// ── Render output ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderView {
    pub key: &'static str,
    pub label: String,
    pub sort_icon: SortIcon,
    pub filter: FilterKind,
    pub filter_value: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    pub id: i64,
    pub href: String,
    pub cells: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<RowAction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyView {
    Empty { message: &'static str, col_span: usize },
    Rows { rows: Vec<RowView> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Footer {
    pub page_label: String,
    pub results_label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub headers: Vec<HeaderView>,
    pub body: BodyView,
    pub footer: Footer,
    pub page_index: usize,
    pub page_count: usize,
    pub can_previous_page: bool,
    pub can_next_page: bool,
}

pub fn results_label(count: usize) -> String {
    if count == 1 {
        "[1 result]".to_string()
    } else {
        format!("[{} total results]", count)
    }
}

// ── Controller ────────────────────────────────────────────────────────

/// Sort, filter and paging state over one result set.
///
/// The HTTP pages render the default sort with no filters; sorting,
/// filtering and page changes are transitions the client drives on its own
/// copy, and the page URL only ever records `page` and `searchText`.
pub struct TableController<R> {
    spec: TableSpec,
    rows: Vec<R>,
    sorting: Option<Sort>,
    filters: BTreeMap<&'static str, String>,
    view: ViewState,
}

impl<R: TableRecord> TableController<R> {
    pub fn new(spec: TableSpec, rows: Vec<R>, view: ViewState) -> Self {
        let sorting = spec.default_sort.clone();
        Self {
            spec,
            rows,
            sorting,
            filters: BTreeMap::new(),
            view,
        }
    }

    pub fn view_state(&self) -> &ViewState {
        &self.view
    }

    pub fn sorting(&self) -> Option<&Sort> {
        self.sorting.as_ref()
    }

    fn column(&self, key: &str) -> Result<&ColumnDef, ShopError> {
        self.spec
            .columns
            .iter()
            .find(|c| c.key == key)
            .ok_or_else(|| ShopError::BadRequest(format!("Unknown column '{}'", key)))
    }

    fn commit(&mut self, transition: Transition) -> Option<Effect> {
        let url = transition.url();
        match self.view.apply(transition) {
            Ok(()) => Some(Effect::ReplaceUrl(url)),
            Err(stale) => {
                tracing::debug!(error = %stale, "dropping stale view transition");
                None
            }
        }
    }

    // ── Sorting ───────────────────────────────────────────────────────

    /// Header click: ascending -> descending -> unsorted -> ascending.
    /// Only one column is sorted at a time.
    pub fn toggle_sort(&mut self, column: &str) -> Result<(), ShopError> {
        let key = self.column(column)?.key;
        self.sorting = match self.sorting.take() {
            Some(sort) if sort.column == key => match sort.direction {
                SortDirection::Asc => Some(Sort {
                    column: key.to_string(),
                    direction: SortDirection::Desc,
                }),
                SortDirection::Desc => None,
            },
            _ => Some(Sort {
                column: key.to_string(),
                direction: SortDirection::Asc,
            }),
        };
        Ok(())
    }

    pub fn sort_icon(&self, column: &str) -> SortIcon {
        match &self.sorting {
            Some(sort) if sort.column == column => match sort.direction {
                SortDirection::Asc => SortIcon::Ascending,
                SortDirection::Desc => SortIcon::Descending,
            },
            _ => SortIcon::Unsorted,
        }
    }

    pub fn reset_sorting(&mut self) {
        self.sorting = self.spec.default_sort.clone();
    }

    // ── Filtering ─────────────────────────────────────────────────────

    /// Set (or clear, with an empty value) one column's filter. Returns the
    /// URL correction when the current page fell off the end.
    pub fn set_filter(&mut self, column: &str, value: &str) -> Result<Option<Effect>, ShopError> {
        let key = self.column(column)?.key;
        let value = value.trim();
        if value.is_empty() {
            self.filters.remove(key);
        } else {
            self.filters.insert(key, value.to_string());
        }
        Ok(self.correct_page())
    }

    pub fn reset_filters(&mut self) -> Option<Effect> {
        self.filters.clear();
        self.correct_page()
    }

    pub fn filter_value(&self, column: &str) -> Option<&str> {
        self.filters.get(column).map(String::as_str)
    }

    fn matches(&self, row: &R) -> bool {
        self.filters.iter().all(|(key, wanted)| {
            let cell = row.cell(key);
            let kind = self
                .spec
                .columns
                .iter()
                .find(|c| c.key == *key)
                .map(|c| c.filter)
                .unwrap_or(FilterKind::Text);
            match kind {
                FilterKind::Text => cell.to_lowercase().contains(&wanted.to_lowercase()),
                FilterKind::Select => cell == *wanted,
            }
        })
    }

    /// Unique display values of a column across all rows, for select filters.
    pub fn faceted_values(&self, column: &str) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| row.cell(column))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rows passing every filter, in display order.
    pub fn filtered_rows(&self) -> Vec<&R> {
        let mut rows: Vec<&R> = self.rows.iter().filter(|r| self.matches(r)).collect();
        if let Some(sort) = &self.sorting {
            rows.sort_by(|a, b| {
                let ord = compare_cells(&a.cell(&sort.column), &b.cell(&sort.column));
                match sort.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }
        rows
    }

    pub fn filtered_count(&self) -> usize {
        self.rows.iter().filter(|r| self.matches(r)).count()
    }

    // ── Pagination ────────────────────────────────────────────────────

    pub fn page_index(&self) -> usize {
        self.view.page_index()
    }

    pub fn page_count(&self) -> usize {
        self.filtered_count().div_ceil(self.spec.page_size.max(1))
    }

    pub fn can_previous_page(&self) -> bool {
        self.page_index() > 0
    }

    pub fn can_next_page(&self) -> bool {
        self.page_index() + 1 < self.page_count()
    }

    pub fn next_page(&mut self) -> Option<Effect> {
        if !self.can_next_page() {
            return None;
        }
        let transition = self.view.with_page_index(self.page_index() + 1);
        self.commit(transition)
    }

    pub fn previous_page(&mut self) -> Option<Effect> {
        if !self.can_previous_page() {
            return None;
        }
        let transition = self.view.with_page_index(self.page_index() - 1);
        self.commit(transition)
    }

    /// Reset to page 1 when the current page no longer exists.
    pub fn correct_page(&mut self) -> Option<Effect> {
        let transition = correct_page_boundary(&self.view, self.page_count())?;
        self.commit(transition)
    }

    pub fn page_rows(&self) -> Vec<&R> {
        let size = self.spec.page_size.max(1);
        self.filtered_rows()
            .into_iter()
            .skip(self.page_index() * size)
            .take(size)
            .collect()
    }

    pub fn footer(&self) -> Footer {
        Footer {
            page_label: format!("Page {} of {}", self.page_index() + 1, self.page_count()),
            results_label: results_label(self.filtered_count()),
        }
    }

    // ── Data & interaction ────────────────────────────────────────────

    /// Swap in freshly fetched rows, keeping sort and filters.
    pub fn replace_rows(&mut self, rows: Vec<R>) -> Option<Effect> {
        self.rows = rows;
        self.correct_page()
    }

    pub fn refresh(&self) -> Effect {
        Effect::Refresh
    }

    pub fn click_row(&self, row_id: i64, target: ClickTarget) -> Option<Effect> {
        match target {
            ClickTarget::Interactive => None,
            ClickTarget::Row => self
                .rows
                .iter()
                .any(|r| r.row_id() == row_id)
                .then(|| Effect::Navigate {
                    href: (self.spec.detail_href)(row_id),
                }),
        }
    }

    pub fn render(&self) -> TableView {
        let headers = self
            .spec
            .columns
            .iter()
            .map(|col| HeaderView {
                key: col.key,
                label: col.header(),
                sort_icon: self.sort_icon(col.key),
                filter: col.filter,
                filter_value: self.filter_value(col.key).map(str::to_string),
                facets: match col.filter {
                    FilterKind::Select => self.faceted_values(col.key),
                    FilterKind::Text => Vec::new(),
                },
            })
            .collect();

        let rows: Vec<RowView> = self
            .page_rows()
            .into_iter()
            .map(|row| {
                let id = row.row_id();
                RowView {
                    id,
                    href: (self.spec.detail_href)(id),
                    cells: self.spec.columns.iter().map(|c| row.cell(c.key)).collect(),
                    actions: (self.spec.row_actions)(id),
                }
            })
            .collect();

        let body = if rows.is_empty() {
            BodyView::Empty {
                message: EMPTY_MESSAGE,
                col_span: self.spec.columns.len(),
            }
        } else {
            BodyView::Rows { rows }
        };

        TableView {
            headers,
            body,
            footer: self.footer(),
            page_index: self.page_index(),
            page_count: self.page_count(),
            can_previous_page: self.can_previous_page(),
            can_next_page: self.can_next_page(),
        }
    }
}

fn numeric_cell(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Total order over display values: finite numbers first, in numeric
/// order, then everything else as case-insensitive text.
fn compare_cells(a: &str, b: &str) -> Ordering {
    match (numeric_cell(a), numeric_cell(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_lowercase().cmp(&b.to_lowercase()),
    }
}

pub fn no_row_actions(_id: i64) -> Vec<RowAction> {
    Vec::new()
}
