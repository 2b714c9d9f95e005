use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use super::schema::{CustomerInput, TicketInput};
use crate::errors::ShopError;

/// Async-safe handle to the shop database.
///
/// Wraps `ShopDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ShopDb>>,
}

impl DbHandle {
    pub fn new(db: ShopDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, ShopError>
    where
        F: FnOnce(&ShopDb) -> Result<R, ShopError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| ShopError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, ShopDb>, ShopError> {
        self.inner.lock().map_err(|_| ShopError::LockPoisoned)
    }
}

pub struct ShopDb {
    conn: Connection,
}

const CUSTOMER_COLUMNS: &str = "id, first_name, last_name, email, phone, address1, address2, city, state, zip, notes, active, created_at, updated_at";

const TICKET_COLUMNS: &str =
    "id, customer_id, title, description, completed, tech, created_at, updated_at";

const TICKET_ROW_SELECT: &str = "SELECT t.id, t.created_at, t.title, c.first_name, c.last_name, c.email, t.tech, t.completed
     FROM tickets t JOIN customers c ON c.id = t.customer_id";

impl ShopDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS customers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    phone TEXT NOT NULL UNIQUE,
                    address1 TEXT NOT NULL,
                    address2 TEXT,
                    city TEXT NOT NULL,
                    state TEXT NOT NULL,
                    zip TEXT NOT NULL,
                    notes TEXT,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    customer_id INTEGER NOT NULL REFERENCES customers(id),
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    completed INTEGER NOT NULL DEFAULT 0,
                    tech TEXT NOT NULL DEFAULT 'unassigned',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_tickets_customer ON tickets(customer_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_completed ON tickets(completed);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Customers ─────────────────────────────────────────────────────

    pub fn create_customer(&self, input: &CustomerInput) -> Result<Customer, ShopError> {
        self.conn.execute(
            "INSERT INTO customers (first_name, last_name, email, phone, address1, address2, city, state, zip, notes, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                input.first_name.trim(),
                input.last_name.trim(),
                input.email.trim().to_lowercase(),
                input.phone,
                input.address1.trim(),
                non_empty(&input.address2),
                input.city.trim(),
                input.state.to_uppercase(),
                input.zip,
                non_empty(&input.notes),
                input.active,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_customer(id)?
            .ok_or(ShopError::CustomerNotFound { id })
    }

    pub fn update_customer(&self, input: &CustomerInput) -> Result<Customer, ShopError> {
        let changed = self.conn.execute(
            "UPDATE customers SET first_name = ?1, last_name = ?2, email = ?3, phone = ?4,
                address1 = ?5, address2 = ?6, city = ?7, state = ?8, zip = ?9, notes = ?10,
                active = ?11, updated_at = datetime('now')
             WHERE id = ?12",
            params![
                input.first_name.trim(),
                input.last_name.trim(),
                input.email.trim().to_lowercase(),
                input.phone,
                input.address1.trim(),
                non_empty(&input.address2),
                input.city.trim(),
                input.state.to_uppercase(),
                input.zip,
                non_empty(&input.notes),
                input.active,
                input.id,
            ],
        )?;
        if changed == 0 {
            return Err(ShopError::CustomerNotFound { id: input.id });
        }
        self.get_customer(input.id)?
            .ok_or(ShopError::CustomerNotFound { id: input.id })
    }

    pub fn get_customer(&self, id: i64) -> Result<Option<Customer>, ShopError> {
        let sql = format!("SELECT {} FROM customers WHERE id = ?1", CUSTOMER_COLUMNS);
        let customer = self
            .conn
            .query_row(&sql, params![id], customer_from_row)
            .optional()?;
        Ok(customer)
    }

    pub fn search_customers(&self, search_text: &str) -> Result<Vec<Customer>, ShopError> {
        let sql = format!(
            "SELECT {} FROM customers
             WHERE first_name LIKE ?1 ESCAPE '\\' OR last_name LIKE ?1 ESCAPE '\\'
                OR email LIKE ?1 ESCAPE '\\' OR phone LIKE ?1 ESCAPE '\\'
                OR city LIKE ?1 ESCAPE '\\' OR zip LIKE ?1 ESCAPE '\\'
                OR (first_name || ' ' || last_name) LIKE ?1 ESCAPE '\\'
             ORDER BY last_name COLLATE NOCASE, id",
            CUSTOMER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![like_pattern(search_text)], customer_from_row)?;
        let mut customers = Vec::new();
        for row in rows {
            customers.push(row?);
        }
        Ok(customers)
    }

    // ── Tickets ───────────────────────────────────────────────────────

    pub fn create_ticket(&self, input: &TicketInput) -> Result<Ticket, ShopError> {
        self.conn.execute(
            "INSERT INTO tickets (customer_id, title, description, completed, tech)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                input.customer_id,
                input.title.trim(),
                input.description,
                input.completed,
                input.tech.trim().to_lowercase(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_ticket(id)?.ok_or(ShopError::TicketNotFound { id })
    }

    pub fn update_ticket(&self, id: i64, input: &TicketInput) -> Result<Ticket, ShopError> {
        let changed = self.conn.execute(
            "UPDATE tickets SET title = ?1, description = ?2, completed = ?3, tech = ?4,
                updated_at = datetime('now')
             WHERE id = ?5",
            params![
                input.title.trim(),
                input.description,
                input.completed,
                input.tech.trim().to_lowercase(),
                id,
            ],
        )?;
        if changed == 0 {
            return Err(ShopError::TicketNotFound { id });
        }
        self.get_ticket(id)?.ok_or(ShopError::TicketNotFound { id })
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, ShopError> {
        let sql = format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS);
        let ticket = self
            .conn
            .query_row(&sql, params![id], |row| {
                Ok(Ticket {
                    id: row.get(0)?,
                    customer_id: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get(3)?,
                    completed: row.get(4)?,
                    tech: row.get(5)?,
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })
            .optional()?;
        Ok(ticket)
    }

    pub fn get_open_tickets(&self) -> Result<Vec<TicketSearchRow>, ShopError> {
        let sql = format!(
            "{} WHERE t.completed = 0 ORDER BY t.created_at, t.id",
            TICKET_ROW_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], ticket_row_from_row)?;
        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row?);
        }
        Ok(tickets)
    }

    pub fn search_tickets(&self, search_text: &str) -> Result<Vec<TicketSearchRow>, ShopError> {
        let sql = format!(
            "{} WHERE t.title LIKE ?1 ESCAPE '\\' OR t.tech LIKE ?1 ESCAPE '\\'
                OR c.first_name LIKE ?1 ESCAPE '\\' OR c.last_name LIKE ?1 ESCAPE '\\'
                OR c.email LIKE ?1 ESCAPE '\\' OR c.phone LIKE ?1 ESCAPE '\\'
                OR c.city LIKE ?1 ESCAPE '\\' OR c.zip LIKE ?1 ESCAPE '\\'
                OR (c.first_name || ' ' || c.last_name) LIKE ?1 ESCAPE '\\'
             ORDER BY t.created_at, t.id",
            TICKET_ROW_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![like_pattern(search_text)], ticket_row_from_row)?;
        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row?);
        }
        Ok(tickets)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> rusqlite::Result<()> {
        self.conn.execute_batch(sql)
    }
}

fn customer_from_row(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        address1: row.get(5)?,
        address2: row.get(6)?,
        city: row.get(7)?,
        state: row.get(8)?,
        zip: row.get(9)?,
        notes: row.get(10)?,
        active: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn ticket_row_from_row(row: &Row<'_>) -> rusqlite::Result<TicketSearchRow> {
    Ok(TicketSearchRow {
        id: row.get(0)?,
        ticket_date: row.get(1)?,
        title: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        email: row.get(5)?,
        tech: row.get(6)?,
        completed: row.get(7)?,
    })
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// `%text%` with LIKE wildcards in the user's text escaped.
fn like_pattern(search_text: &str) -> String {
    let mut escaped = String::with_capacity(search_text.len() + 2);
    escaped.push('%');
    for ch in search_text.trim().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::shop::models::TicketId;

    pub(crate) fn customer_input(first: &str, last: &str, email: &str, phone: &str) -> CustomerInput {
        CustomerInput {
            first_name: first.into(),
            last_name: last.into(),
            address1: "12 High St".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            zip: "62701".into(),
            phone: phone.into(),
            email: email.into(),
            ..CustomerInput::default()
        }
    }

    pub(crate) fn ticket_input(customer_id: i64, title: &str, tech: &str) -> TicketInput {
        TicketInput {
            title: title.into(),
            description: format!("{} description", title),
            tech: tech.into(),
            ..TicketInput::for_customer(customer_id)
        }
    }

    #[test]
    fn test_create_database_and_run_migrations() -> anyhow::Result<()> {
        let db = ShopDb::new_in_memory()?;
        let tables: Vec<String> = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        assert_eq!(tables, vec!["customers", "tickets"]);
        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop.db");
        {
            let db = ShopDb::new(&path)?;
            db.create_customer(&customer_input("A", "B", "a@b.co", "555-555-0001"))?;
        }
        let db = ShopDb::new(&path)?;
        assert!(db.get_customer(1)?.is_some());
        Ok(())
    }

    #[test]
    fn test_create_and_get_customer() -> anyhow::Result<()> {
        let db = ShopDb::new_in_memory()?;
        let mut input = customer_input("Ada", "Lovelace", "Ada@Example.com", "555-555-0001");
        input.state = "il".into();
        let customer = db.create_customer(&input)?;
        assert!(customer.id > 0);
        assert_eq!(customer.email, "ada@example.com");
        assert_eq!(customer.state, "IL");
        assert!(customer.active);
        assert!(customer.address2.is_none());
        assert!(!customer.created_at.is_empty());

        let fetched = db.get_customer(customer.id)?.expect("customer should exist");
        assert_eq!(fetched, customer);
        assert!(db.get_customer(999)?.is_none());
        Ok(())
    }

    #[test]
    fn test_duplicate_email_is_reported_as_duplicate() -> anyhow::Result<()> {
        let db = ShopDb::new_in_memory()?;
        db.create_customer(&customer_input("A", "One", "dup@example.com", "555-555-0001"))?;
        let err = db
            .create_customer(&customer_input("B", "Two", "dup@example.com", "555-555-0002"))
            .unwrap_err();
        match err {
            ShopError::Duplicate { detail } => assert!(detail.contains("customers.email")),
            other => panic!("Expected Duplicate, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_update_customer() -> anyhow::Result<()> {
        let db = ShopDb::new_in_memory()?;
        let customer = db.create_customer(&customer_input("Ada", "L", "ada@example.com", "555-555-0001"))?;
        let mut input = CustomerInput::from_customer(&customer);
        input.city = "London".into();
        input.active = false;
        let updated = db.update_customer(&input)?;
        assert_eq!(updated.city, "London");
        assert!(!updated.active);

        input.id = 404;
        assert!(matches!(
            db.update_customer(&input),
            Err(ShopError::CustomerNotFound { id: 404 })
        ));
        Ok(())
    }

    #[test]
    fn test_search_customers() -> anyhow::Result<()> {
        let db = ShopDb::new_in_memory()?;
        db.create_customer(&customer_input("Ada", "Lovelace", "ada@example.com", "555-555-0001"))?;
        db.create_customer(&customer_input("Alan", "Turing", "alan@example.com", "555-555-0002"))?;

        let results = db.search_customers("ada lovelace")?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].first_name, "Ada");

        let results = db.search_customers("example.com")?;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].last_name, "Lovelace");

        assert!(db.search_customers("100%")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_and_update_ticket() -> anyhow::Result<()> {
        let db = ShopDb::new_in_memory()?;
        let customer = db.create_customer(&customer_input("Ada", "L", "ada@example.com", "555-555-0001"))?;
        let ticket = db.create_ticket(&ticket_input(customer.id, "Broken fan", "Tech@Shop.com"))?;
        assert_eq!(ticket.customer_id, customer.id);
        assert_eq!(ticket.tech, "tech@shop.com");
        assert!(!ticket.completed);

        let mut input = TicketInput::from_ticket(&ticket);
        assert_eq!(input.id, TicketId::Existing(ticket.id));
        input.completed = true;
        let updated = db.update_ticket(ticket.id, &input)?;
        assert!(updated.completed);

        assert!(matches!(
            db.update_ticket(999, &input),
            Err(ShopError::TicketNotFound { id: 999 })
        ));
        Ok(())
    }

    #[test]
    fn test_ticket_requires_existing_customer() -> anyhow::Result<()> {
        let db = ShopDb::new_in_memory()?;
        let err = db.create_ticket(&ticket_input(42, "Orphan", "tech@shop.com")).unwrap_err();
        assert!(matches!(err, ShopError::Database(_)));
        Ok(())
    }

    #[test]
    fn test_open_tickets_and_search() -> anyhow::Result<()> {
        let db = ShopDb::new_in_memory()?;
        let ada = db.create_customer(&customer_input("Ada", "Lovelace", "ada@example.com", "555-555-0001"))?;
        let alan = db.create_customer(&customer_input("Alan", "Turing", "alan@example.com", "555-555-0002"))?;
        let t1 = db.create_ticket(&ticket_input(ada.id, "Laptop hinge", "one@shop.com"))?;
        db.create_ticket(&ticket_input(alan.id, "Virus removal", "two@shop.com"))?;
        let mut done = TicketInput::from_ticket(&t1);
        done.completed = true;
        db.update_ticket(t1.id, &done)?;

        let open = db.get_open_tickets()?;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].title, "Virus removal");
        assert_eq!(open[0].first_name, "Alan");

        let found = db.search_tickets("LOVELACE")?;
        assert_eq!(found.len(), 1);
        assert!(found[0].completed);

        let found = db.search_tickets("shop.com")?;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].title, "Laptop hinge");

        assert!(db.search_tickets("nothing-matches")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" ada "), "%ada%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[tokio::test]
    async fn test_db_handle_call() {
        let handle = DbHandle::new(ShopDb::new_in_memory().unwrap());
        let customer = handle
            .call(|db| db.create_customer(&customer_input("A", "B", "a@b.co", "555-555-0001")))
            .await
            .unwrap();
        let fetched = handle
            .call(move |db| db.get_customer(customer.id))
            .await
            .unwrap();
        assert!(fetched.is_some());
        assert!(handle.lock_sync().is_ok());
    }
}
