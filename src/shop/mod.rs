//! Repair shop back-end: customers, service tickets and the views over them.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (handlers, AppState, Caller)       │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         ├─ pages.rs   search + form pages        │
//!                       │         │     ├─ table.rs   sort/filter/paginate │
//!                       │         │     └─ form.rs    validated forms      │
//!                       │         │                                        │
//!                       │         └─ actions.rs save customer / ticket     │
//!                       │               │                                  │
//!                       │               v                                  │
//!                       │  db.rs  (ShopDb over SQLite, DbHandle)           │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                           |
//! |--------------|----------------------------------------------------------|
//! | `models`     | `Customer`, `Ticket`, `TicketId`, `Capabilities`         |
//! | `schema`     | Field rules and messages for customer and ticket input   |
//! | `view_state` | Versioned `page`/`searchText` URL state and transitions  |
//! | `poll`       | `LivePoller`, `RefreshSignal`, data `Revision`           |
//! | `notify`     | `Notifier` trait and severities                          |
//! | `ws`         | `WsMessage` enum + `broadcast_message()` helper          |
//!
//! ## Typical Request Flow (save a ticket)
//!
//! 1. `POST /api/tickets` → `api::save_ticket()` with the caller's
//!    `Capabilities` taken from the identity headers.
//! 2. The input goes through a `FormController`; invalid fields come back
//!    as `validationErrors` and nothing is written.
//! 3. `ShopActions::save_ticket()` checks the customer and assignment
//!    rules, then writes through `DbHandle`.
//! 4. On success the data `Revision` is bumped and `TicketSaved` is
//!    broadcast; pollers watching `/api/revision` refresh their search.

pub mod actions;
pub mod api;
pub mod db;
pub mod form;
pub mod models;
pub mod notify;
pub mod pages;
pub mod poll;
pub mod schema;
pub mod server;
pub mod table;
pub mod view_state;
pub mod ws;
