//! Server actions: the "save customer" and "save ticket" mutations.
//!
//! Each action validates its input, applies the caller's capabilities,
//! writes through the [`DbHandle`] and, on success, bumps the data revision
//! and broadcasts the saved record. Every failure other than a validation
//! failure passes through [`handle_server_error`], which decides what the
//! user sees and what is reported.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use super::db::DbHandle;
use super::form::Mutation;
use super::models::{Capabilities, Customer, Ticket, TicketId};
use super::poll::Revision;
use super::schema::{CustomerInput, FormSchema, NEW_TICKET_TECH, TicketInput};
use super::ws::{WsMessage, broadcast_message};
use crate::errors::{FieldErrors, ShopError};

pub const DATABASE_ERROR_MESSAGE: &str =
    "Database Error: Your data did not save. Support will be notified";

// ── Telemetry ─────────────────────────────────────────────────────────

/// What was being attempted when an error was captured.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub action_name: &'static str,
    pub client_input: serde_json::Value,
}

impl ErrorContext {
    pub fn new<T: Serialize>(action_name: &'static str, input: &T) -> Self {
        Self {
            action_name,
            client_input: serde_json::to_value(input).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Sink for unexpected errors (the crash collector).
pub trait ErrorReporter: Send + Sync {
    fn capture(&self, error: &ShopError, context: &ErrorContext);
}

/// Reports errors as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture(&self, error: &ShopError, context: &ErrorContext) {
        tracing::error!(
            error = %error,
            action = context.action_name,
            client_input = %context.client_input,
            "server error captured"
        );
    }
}

// ── Results ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Duplicate,
    BadRequest,
    Forbidden,
    NotFound,
    Database,
    Internal,
}

/// Outcome of a mutation, serialized as `{message}`,
/// `{validationErrors}` or `{serverError}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ActionOutcome {
    Saved {
        message: String,
    },
    Invalid {
        #[serde(rename = "validationErrors")]
        validation_errors: FieldErrors,
    },
    Failed {
        #[serde(rename = "serverError")]
        server_error: String,
        #[serde(skip)]
        kind: FailureKind,
    },
}

impl ActionOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, ActionOutcome::Saved { .. })
    }
}

/// Map a failed action to the message the user sees, reporting it unless
/// it is an expected uniqueness violation.
pub fn handle_server_error(
    err: &ShopError,
    context: &ErrorContext,
    reporter: &dyn ErrorReporter,
) -> ActionOutcome {
    let kind = match err {
        ShopError::Duplicate { .. } => {
            return ActionOutcome::Failed {
                server_error: err.to_string(),
                kind: FailureKind::Duplicate,
            };
        }
        ShopError::Database(_) | ShopError::LockPoisoned => {
            reporter.capture(err, context);
            return ActionOutcome::Failed {
                server_error: DATABASE_ERROR_MESSAGE.to_string(),
                kind: FailureKind::Database,
            };
        }
        e if e.is_not_found() => FailureKind::NotFound,
        ShopError::Forbidden(_) => FailureKind::Forbidden,
        ShopError::CustomerInactive { .. } | ShopError::BadRequest(_) => FailureKind::BadRequest,
        _ => FailureKind::Internal,
    };
    reporter.capture(err, context);
    ActionOutcome::Failed {
        server_error: err.to_string(),
        kind,
    }
}

// ── Actions ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ShopActions {
    db: DbHandle,
    revision: Revision,
    ws_tx: broadcast::Sender<String>,
    reporter: Arc<dyn ErrorReporter>,
}

impl ShopActions {
    pub fn new(
        db: DbHandle,
        revision: Revision,
        ws_tx: broadcast::Sender<String>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            db,
            revision,
            ws_tx,
            reporter,
        }
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn reporter(&self) -> &dyn ErrorReporter {
        self.reporter.as_ref()
    }

    fn finish<T>(
        &self,
        action_name: &'static str,
        input: &impl Serialize,
        result: Result<(T, String), ShopError>,
        saved: impl FnOnce(T, u64) -> WsMessage,
    ) -> ActionOutcome {
        match result {
            Ok((record, message)) => {
                let revision = self.revision.bump();
                broadcast_message(&self.ws_tx, &saved(record, revision));
                tracing::info!(action = action_name, revision, %message, "record saved");
                ActionOutcome::Saved { message }
            }
            Err(ShopError::Validation(validation_errors)) => {
                tracing::debug!(action = action_name, ?validation_errors, "rejected invalid input");
                ActionOutcome::Invalid { validation_errors }
            }
            Err(e) => {
                let context = ErrorContext::new(action_name, input);
                handle_server_error(&e, &context, self.reporter.as_ref())
            }
        }
    }

    pub async fn save_customer(&self, caps: &Capabilities, input: CustomerInput) -> ActionOutcome {
        let result = self.try_save_customer(caps.clone(), input.clone()).await;
        self.finish("saveCustomerAction", &input, result, |customer, revision| {
            WsMessage::CustomerSaved { customer, revision }
        })
    }

    async fn try_save_customer(
        &self,
        caps: Capabilities,
        mut input: CustomerInput,
    ) -> Result<(Customer, String), ShopError> {
        input.ensure_valid()?;
        self.db
            .call(move |db| {
                if input.is_new() {
                    let customer = db.create_customer(&input)?;
                    let message = format!("Customer ID #{} created successfully", customer.id);
                    return Ok((customer, message));
                }
                let existing = db
                    .get_customer(input.id)?
                    .ok_or(ShopError::CustomerNotFound { id: input.id })?;
                if !caps.manager {
                    input.active = existing.active;
                }
                let customer = db.update_customer(&input)?;
                let message = format!("Customer ID #{} updated successfully", customer.id);
                Ok((customer, message))
            })
            .await
    }

    pub async fn save_ticket(&self, caps: &Capabilities, input: TicketInput) -> ActionOutcome {
        let result = self.try_save_ticket(caps.clone(), input.clone()).await;
        self.finish("saveTicketAction", &input, result, |ticket, revision| {
            WsMessage::TicketSaved { ticket, revision }
        })
    }

    async fn try_save_ticket(
        &self,
        caps: Capabilities,
        mut input: TicketInput,
    ) -> Result<(Ticket, String), ShopError> {
        input.ensure_valid()?;
        self.db
            .call(move |db| match input.id {
                TicketId::New => {
                    let customer = db
                        .get_customer(input.customer_id)?
                        .ok_or(ShopError::CustomerNotFound {
                            id: input.customer_id,
                        })?;
                    if !customer.active {
                        return Err(ShopError::CustomerInactive { id: customer.id });
                    }
                    if !caps.manager {
                        input.tech = NEW_TICKET_TECH.to_string();
                    }
                    let ticket = db.create_ticket(&input)?;
                    let message = format!("Ticket ID #{} created successfully", ticket.id);
                    Ok((ticket, message))
                }
                TicketId::Existing(id) => {
                    let existing = db
                        .get_ticket(id)?
                        .ok_or(ShopError::TicketNotFound { id })?;
                    if !caps.manager {
                        if !caps.is_assigned(&existing.tech) {
                            return Err(ShopError::Forbidden(format!(
                                "Ticket ID #{} is not assigned to you",
                                id
                            )));
                        }
                        // Only managers reassign tickets.
                        input.tech = existing.tech;
                    }
                    let ticket = db.update_ticket(id, &input)?;
                    let message = format!("Ticket ID #{} updated successfully", ticket.id);
                    Ok((ticket, message))
                }
            })
            .await
    }
}

/// Binds the customer form to [`ShopActions::save_customer`] for one caller.
pub struct CustomerMutation {
    pub actions: ShopActions,
    pub caps: Capabilities,
}

#[async_trait]
impl Mutation<CustomerInput> for CustomerMutation {
    async fn save(&self, input: CustomerInput) -> ActionOutcome {
        self.actions.save_customer(&self.caps, input).await
    }
}

/// Binds the ticket form to [`ShopActions::save_ticket`] for one caller.
pub struct TicketMutation {
    pub actions: ShopActions,
    pub caps: Capabilities,
}

#[async_trait]
impl Mutation<TicketInput> for TicketMutation {
    async fn save(&self, input: TicketInput) -> ActionOutcome {
        self.actions.save_ticket(&self.caps, input).await
    }
}
