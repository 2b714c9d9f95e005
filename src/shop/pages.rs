//! Page composition: the ticket and customer search pages, the two form
//! pages and the explanatory views shown instead of a form.
//!
//! Loaders fetch through the [`DbHandle`] and return plain serializable
//! views; the HTTP layer only adds status codes and headers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::mpsc;

use super::db::DbHandle;
use super::form::{FormView, customer_form, ticket_form};
use super::models::{Capabilities, Customer, TicketSearchRow};
use super::poll::{LivePoller, RefreshRequest, RefreshSignal};
use super::table::{
    ColumnDef, Effect, RowAction, Sort, TableController, TableRecord, TableSpec, TableView,
    no_row_actions,
};
use super::view_state::{UrlReplace, ViewState};
use crate::errors::ShopError;

pub const NO_RESULTS_MESSAGE: &str = "No results found";
pub const GO_BACK: &str = "Go Back";

/// `YYYY-MM-DD` for a stored timestamp; unparseable values pass through.
pub fn display_date(timestamp: &str) -> String {
    if let Ok(dt) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S") {
        return dt.format("%Y-%m-%d").to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
        return dt.format("%Y-%m-%d").to_string();
    }
    timestamp.to_string()
}

// ── Table rows ────────────────────────────────────────────────────────

impl TableRecord for TicketSearchRow {
    fn row_id(&self) -> i64 {
        self.id
    }

    fn cell(&self, column: &str) -> String {
        match column {
            "title" => self.title.clone(),
            "firstName" => self.first_name.clone(),
            "lastName" => self.last_name.clone(),
            "email" => self.email.clone(),
            "ticketDate" => display_date(&self.ticket_date),
            "tech" => self.tech.clone(),
            "completed" => if self.completed { "COMPLETED" } else { "OPEN" }.to_string(),
            _ => String::new(),
        }
    }
}

impl TableRecord for Customer {
    fn row_id(&self) -> i64 {
        self.id
    }

    fn cell(&self, column: &str) -> String {
        match column {
            "firstName" => self.first_name.clone(),
            "lastName" => self.last_name.clone(),
            "email" => self.email.clone(),
            "phone" => self.phone.clone(),
            "city" => self.city.clone(),
            "zip" => self.zip.clone(),
            "active" => if self.active { "ACTIVE" } else { "INACTIVE" }.to_string(),
            "createdAt" => display_date(&self.created_at),
            _ => String::new(),
        }
    }
}

pub fn ticket_table_spec(page_size: usize) -> TableSpec {
    TableSpec {
        columns: vec![
            ColumnDef::text("title"),
            ColumnDef::text("firstName"),
            ColumnDef::text("lastName"),
            ColumnDef::text("email"),
            ColumnDef::text("ticketDate"),
            ColumnDef::select("tech"),
            ColumnDef::select("completed"),
        ],
        page_size,
        default_sort: Some(Sort::desc("ticketDate")),
        detail_href: |id| format!("/tickets/form?ticketId={}", id),
        row_actions: no_row_actions,
    }
}

pub fn customer_row_actions(id: i64) -> Vec<RowAction> {
    vec![
        RowAction {
            label: "New Ticket".into(),
            href: format!("/tickets/form?customerId={}", id),
        },
        RowAction {
            label: "Edit Customer".into(),
            href: format!("/customers/form?customerId={}", id),
        },
    ]
}

pub fn customer_table_spec(page_size: usize) -> TableSpec {
    TableSpec {
        columns: vec![
            ColumnDef::text("firstName"),
            ColumnDef::text("lastName"),
            ColumnDef::text("email"),
            ColumnDef::text("phone"),
            ColumnDef::text("city"),
            ColumnDef::text("zip"),
            ColumnDef::select("active"),
            ColumnDef::text("createdAt"),
        ],
        page_size,
        default_sort: Some(Sort::desc("createdAt")),
        detail_href: |id| format!("/customers/form?customerId={}", id),
        row_actions: customer_row_actions,
    }
}

// ── Search pages ──────────────────────────────────────────────────────

/// How a search page should keep itself fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivePoll {
    pub interval_secs: u64,
    pub revision: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub title: &'static str,
    pub search_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TableView>,
    /// History-suppressed URL rewrite the page must apply on arrival.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_url: Option<UrlReplace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_poll: Option<LivePoll>,
}

impl SearchPage {
    fn empty(title: &'static str, view: &ViewState) -> Self {
        Self {
            title,
            search_text: view.search_text().map(str::to_string),
            message: None,
            table: None,
            replace_url: None,
            live_poll: None,
        }
    }

    /// Poll while a search term is present.
    pub fn with_live_poll(mut self, interval_secs: u64, revision: u64) -> Self {
        if self.search_text.is_some() {
            self.live_poll = Some(LivePoll {
                interval_secs,
                revision,
            });
        }
        self
    }
}

fn results_page<R: TableRecord>(
    title: &'static str,
    view: ViewState,
    rows: Vec<R>,
    spec: TableSpec,
) -> SearchPage {
    let mut page = SearchPage::empty(title, &view);
    if rows.is_empty() {
        page.message = Some(NO_RESULTS_MESSAGE);
        return page;
    }
    let mut table = TableController::new(spec, rows, view);
    page.replace_url = match table.correct_page() {
        Some(Effect::ReplaceUrl(url)) => Some(url),
        _ => None,
    };
    page.table = Some(table.render());
    page
}

/// Without a search term the ticket page lists every open ticket.
pub fn ticket_search_page(view: ViewState, rows: Vec<TicketSearchRow>, page_size: usize) -> SearchPage {
    results_page("Ticket Search", view, rows, ticket_table_spec(page_size))
}

/// `rows` is `None` when no search was run; only the search box is shown.
pub fn customer_search_page(view: ViewState, rows: Option<Vec<Customer>>, page_size: usize) -> SearchPage {
    match rows {
        None => SearchPage::empty("Customer Search", &view),
        Some(rows) => results_page("Customer Search", view, rows, customer_table_spec(page_size)),
    }
}

/// Rows behind the ticket table: search matches, or every open ticket
/// when there is no search term.
pub fn fetch_ticket_rows(
    db: DbHandle,
    search_text: Option<String>,
) -> BoxFuture<'static, Result<Vec<TicketSearchRow>, ShopError>> {
    async move {
        db.call(move |db| match search_text {
            Some(text) => db.search_tickets(&text),
            None => db.get_open_tickets(),
        })
        .await
    }
    .boxed()
}

/// Customer search matches; no search term means no rows.
pub fn fetch_customer_rows(
    db: DbHandle,
    search_text: Option<String>,
) -> BoxFuture<'static, Result<Vec<Customer>, ShopError>> {
    async move {
        match search_text {
            Some(text) => db.call(move |db| db.search_customers(&text)).await,
            None => Ok(Vec::new()),
        }
    }
    .boxed()
}

pub async fn load_ticket_search(
    db: &DbHandle,
    view: ViewState,
    page_size: usize,
) -> Result<SearchPage, ShopError> {
    let rows = fetch_ticket_rows(db.clone(), view.search_text().map(str::to_string)).await?;
    tracing::debug!(search_text = ?view.search_text(), results = rows.len(), "ticket search");
    Ok(ticket_search_page(view, rows, page_size))
}

pub async fn load_customer_search(
    db: &DbHandle,
    view: ViewState,
    page_size: usize,
) -> Result<SearchPage, ShopError> {
    let rows = match view.search_text() {
        Some(text) => Some(fetch_customer_rows(db.clone(), Some(text.to_string())).await?),
        None => None,
    };
    Ok(customer_search_page(view, rows, page_size))
}

// ── Live search sessions ──────────────────────────────────────────────

type FetchRows<R> = fn(DbHandle, Option<String>) -> BoxFuture<'static, Result<Vec<R>, ShopError>>;

/// One open search page: its table plus the poller that keeps it fresh.
///
/// The poller only runs while the view carries a search term. Each
/// refresh it requests reloads the rows through the page's fetcher and
/// hands them to [`TableController::replace_rows`], so a shrinking result
/// set still corrects the page.
pub struct SearchSession<R> {
    db: DbHandle,
    table: TableController<R>,
    poller: LivePoller,
    refreshes: mpsc::Receiver<RefreshRequest>,
    fetch: FetchRows<R>,
}

impl<R: TableRecord + Send + 'static> SearchSession<R> {
    /// Fetch the first rows and start polling. Also returns the page
    /// correction the first render needs, if any.
    pub async fn open(
        db: DbHandle,
        view: ViewState,
        spec: TableSpec,
        fetch: FetchRows<R>,
        signal: Arc<dyn RefreshSignal>,
        interval: Duration,
    ) -> Result<(Self, Option<Effect>), ShopError> {
        let rows = fetch(db.clone(), view.search_text().map(str::to_string)).await?;
        let mut table = TableController::new(spec, rows, view);
        let effect = table.correct_page();

        let (tx, refreshes) = mpsc::channel(4);
        let mut poller = LivePoller::new(interval, signal, tx);
        poller.sync(table.view_state());

        let session = Self {
            db,
            table,
            poller,
            refreshes,
            fetch,
        };
        Ok((session, effect))
    }

    pub fn table(&self) -> &TableController<R> {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut TableController<R> {
        &mut self.table
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    /// Reload the rows for the current search now.
    pub async fn reload(&mut self) -> Result<Option<Effect>, ShopError> {
        let search_text = self.table.view_state().search_text().map(str::to_string);
        let rows = (self.fetch)(self.db.clone(), search_text).await?;
        tracing::debug!(results = rows.len(), "search session reloaded");
        Ok(self.table.replace_rows(rows))
    }

    /// Wait for the poller to report a change, then reload. `None` once
    /// polling has stopped.
    pub async fn next_refresh(&mut self) -> Option<Result<Option<Effect>, ShopError>> {
        loop {
            if !self.poller.is_running() {
                return None;
            }
            let request = self.refreshes.recv().await?;
            // Left over from a search the view has since moved away from.
            if self.table.view_state().search_text() != Some(request.search_text.as_str()) {
                continue;
            }
            return Some(self.reload().await);
        }
    }

    pub fn close(&mut self) {
        self.poller.stop();
    }
}

pub async fn open_ticket_session(
    db: DbHandle,
    view: ViewState,
    page_size: usize,
    signal: Arc<dyn RefreshSignal>,
    interval: Duration,
) -> Result<(SearchSession<TicketSearchRow>, Option<Effect>), ShopError> {
    SearchSession::open(db, view, ticket_table_spec(page_size), fetch_ticket_rows, signal, interval).await
}

pub async fn open_customer_session(
    db: DbHandle,
    view: ViewState,
    page_size: usize,
    signal: Arc<dyn RefreshSignal>,
    interval: Duration,
) -> Result<(SearchSession<Customer>, Option<Effect>), ShopError> {
    SearchSession::open(db, view, customer_table_spec(page_size), fetch_customer_rows, signal, interval).await
}

// ── Form pages ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainKind {
    MissingIds,
    NotFound,
    Inactive,
}

/// Shown instead of a form when the requested record cannot be edited.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainView {
    pub message: String,
    pub action: &'static str,
    #[serde(skip)]
    pub kind: ExplainKind,
}

impl ExplainView {
    fn new(kind: ExplainKind, message: String) -> Self {
        Self {
            message,
            action: GO_BACK,
            kind,
        }
    }
}

/// Read-only customer summary on the ticket form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub name: String,
    pub address_lines: Vec<String>,
    pub email: String,
    pub phone: String,
}

impl CustomerInfo {
    pub fn from_customer(c: &Customer) -> Self {
        let mut address_lines = vec![c.address1.clone()];
        if let Some(line) = c.address2.as_deref().filter(|l| !l.is_empty()) {
            address_lines.push(line.to_string());
        }
        address_lines.push(format!("{}, {} {}", c.city, c.state, c.zip));
        Self {
            name: c.full_name(),
            address_lines,
            email: c.email.clone(),
            phone: format!("Phone: {}", c.phone),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormPage {
    CustomerForm {
        form: FormView,
    },
    TicketForm {
        form: FormView,
        customer: CustomerInfo,
    },
    Explain(ExplainView),
}

/// Parse an id from the URL. Anything that is not a positive integer can
/// never match a record.
fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().filter(|id| *id > 0)
}

pub async fn load_customer_form(
    db: &DbHandle,
    caps: &Capabilities,
    customer_id: Option<&str>,
) -> Result<FormPage, ShopError> {
    let Some(raw) = customer_id.filter(|s| !s.trim().is_empty()) else {
        return Ok(FormPage::CustomerForm {
            form: customer_form(caps, None).render(),
        });
    };
    let customer = match parse_id(raw) {
        Some(id) => db.call(move |db| db.get_customer(id)).await?,
        None => None,
    };
    Ok(match customer {
        Some(c) => FormPage::CustomerForm {
            form: customer_form(caps, Some(&c)).render(),
        },
        None => FormPage::Explain(ExplainView::new(
            ExplainKind::NotFound,
            format!("Customer ID #{} not found", raw),
        )),
    })
}

/// A `customerId` opens a new ticket for that customer and wins over
/// `ticketId` when both are given.
pub async fn load_ticket_form(
    db: &DbHandle,
    caps: &Capabilities,
    customer_id: Option<&str>,
    ticket_id: Option<&str>,
    technicians: &[String],
) -> Result<FormPage, ShopError> {
    let customer_id = customer_id.filter(|s| !s.trim().is_empty());
    let ticket_id = ticket_id.filter(|s| !s.trim().is_empty());

    if let Some(raw) = customer_id {
        let customer = match parse_id(raw) {
            Some(id) => db.call(move |db| db.get_customer(id)).await?,
            None => None,
        };
        let Some(customer) = customer else {
            return Ok(FormPage::Explain(ExplainView::new(
                ExplainKind::NotFound,
                format!("Customer ID #{} not found", raw),
            )));
        };
        if !customer.active {
            return Ok(FormPage::Explain(ExplainView::new(
                ExplainKind::Inactive,
                format!("Customer ID #{} is not active", raw),
            )));
        }
        return Ok(FormPage::TicketForm {
            form: ticket_form(caps, None, &customer, technicians).render(),
            customer: CustomerInfo::from_customer(&customer),
        });
    }

    let Some(raw) = ticket_id else {
        return Ok(FormPage::Explain(ExplainView::new(
            ExplainKind::MissingIds,
            "Ticket ID or Customer ID required to load ticket form".to_string(),
        )));
    };

    let found = match parse_id(raw) {
        Some(id) => {
            db.call(move |db| {
                let Some(ticket) = db.get_ticket(id)? else {
                    return Ok(None);
                };
                let customer = db
                    .get_customer(ticket.customer_id)?
                    .ok_or(ShopError::CustomerNotFound {
                        id: ticket.customer_id,
                    })?;
                Ok(Some((ticket, customer)))
            })
            .await?
        }
        None => None,
    };
    Ok(match found {
        Some((ticket, customer)) => FormPage::TicketForm {
            form: ticket_form(caps, Some(&ticket), &customer, technicians).render(),
            customer: CustomerInfo::from_customer(&customer),
        },
        None => FormPage::Explain(ExplainView::new(
            ExplainKind::NotFound,
            format!("Ticket ID #{} not found", raw),
        )),
    })
}
