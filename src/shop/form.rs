//! Validated form controller.
//!
//! Binds a [`FormSchema`] record to its fields, validates a field when it
//! loses focus and the whole record on submit, and hands valid records to a
//! [`Mutation`]. The outcome is surfaced through a [`Notifier`]: exactly one
//! notification per completed submit that reached the server.
//!
//! Field visibility and editability come from the caller's
//! [`Capabilities`], resolved once and passed in by the constructors at the
//! bottom of this file.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Serialize;

use super::actions::ActionOutcome;
use super::models::{Capabilities, Customer, Ticket};
use super::notify::Notifier;
use super::schema::{CustomerInput, FieldValue, FormSchema, TicketInput};
use crate::errors::{FieldErrors, ShopError};

pub const SAVE_ERROR_FALLBACK: &str = "Something went wrong while saving.";
pub const CUSTOMER_SAVED_FALLBACK: &str = "Customer saved successfully!";
pub const TICKET_SAVED_FALLBACK: &str = "Ticket saved successfully!";

/// The server-side write a form submits to.
#[async_trait]
pub trait Mutation<S: FormSchema>: Send + Sync {
    async fn save(&self, input: S) -> ActionOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormMode {
    Create,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAccess {
    Editable,
    ReadOnly,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitBlocked {
    /// A previous submit has not finished yet.
    Pending,
    /// The form is read-only for this caller.
    ReadOnly,
    Invalid(FieldErrors),
}

impl std::fmt::Display for SubmitBlocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitBlocked::Pending => f.write_str("a save is already in progress"),
            SubmitBlocked::ReadOnly => f.write_str("form is read-only"),
            SubmitBlocked::Invalid(errors) => write!(f, "{} invalid field(s)", errors.len()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub name: &'static str,
    pub value: serde_json::Value,
    pub access: FieldAccess,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormView {
    pub heading: String,
    pub mode: FormMode,
    pub read_only: bool,
    pub fields: Vec<FieldView>,
    pub pending: bool,
    pub submit_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<ActionOutcome>,
}

pub struct FormController<S: FormSchema> {
    mode: FormMode,
    heading: String,
    defaults: S,
    values: S,
    errors: FieldErrors,
    access: BTreeMap<&'static str, FieldAccess>,
    options: BTreeMap<&'static str, Vec<String>>,
    editable: bool,
    pending: bool,
    last_result: Option<ActionOutcome>,
    success_fallback: &'static str,
}

impl<S: FormSchema> FormController<S> {
    pub fn new(mode: FormMode, heading: String, defaults: S, success_fallback: &'static str) -> Self {
        Self {
            mode,
            heading,
            values: defaults.clone(),
            defaults,
            errors: FieldErrors::new(),
            access: BTreeMap::new(),
            options: BTreeMap::new(),
            editable: true,
            pending: false,
            last_result: None,
            success_fallback,
        }
    }

    pub fn with_access(mut self, field: &'static str, access: FieldAccess) -> Self {
        self.access.insert(field, access);
        self
    }

    pub fn with_options(mut self, field: &'static str, options: Vec<String>) -> Self {
        self.options.insert(field, options);
        self
    }

    /// A non-editable form renders every field read-only and cannot submit.
    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    pub fn mode(&self) -> FormMode {
        self.mode
    }

    pub fn heading(&self) -> &str {
        &self.heading
    }

    pub fn values(&self) -> &S {
        &self.values
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn field_error(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_read_only(&self) -> bool {
        !self.editable
    }

    pub fn last_result(&self) -> Option<&ActionOutcome> {
        self.last_result.as_ref()
    }

    pub fn access(&self, field: &str) -> FieldAccess {
        let access = self
            .access
            .get(field)
            .copied()
            .unwrap_or(FieldAccess::Editable);
        match access {
            FieldAccess::Editable if !self.editable => FieldAccess::ReadOnly,
            other => other,
        }
    }

    /// Change a field. Read-only and hidden fields refuse writes. A field
    /// that is already showing an error is re-checked immediately.
    pub fn set_value(&mut self, field: &str, value: FieldValue) -> Result<(), ShopError> {
        if self.access(field) != FieldAccess::Editable {
            return Err(ShopError::Forbidden(format!("Field '{}' is not editable", field)));
        }
        if let (Some(options), FieldValue::Text(text)) = (self.options.get(field), &value) {
            if !options.iter().any(|o| o == text) {
                return Err(ShopError::BadRequest(format!(
                    "'{}' is not an option for field '{}'",
                    text, field
                )));
            }
        }
        self.values.set_field(field, value)?;
        if self.errors.contains_key(field) {
            self.blur(field);
        }
        Ok(())
    }

    /// Validate one field as it loses focus.
    pub fn blur(&mut self, field: &str) -> Option<&str> {
        if self.access(field) == FieldAccess::Hidden {
            return None;
        }
        match self.values.validate_field(field) {
            Some(message) => {
                self.errors.insert(field.to_string(), message);
            }
            None => {
                self.errors.remove(field);
            }
        }
        self.field_error(field)
    }

    /// Validate everything and mark the form busy. Returns the record to
    /// send; the caller must follow up with [`finish_submit`].
    ///
    /// [`finish_submit`]: FormController::finish_submit
    pub fn begin_submit(&mut self) -> Result<S, SubmitBlocked> {
        if self.pending {
            return Err(SubmitBlocked::Pending);
        }
        if !self.editable {
            return Err(SubmitBlocked::ReadOnly);
        }
        self.errors = self.values.validate();
        if !self.errors.is_empty() {
            return Err(SubmitBlocked::Invalid(self.errors.clone()));
        }
        self.pending = true;
        Ok(self.values.clone())
    }

    /// Record a mutation outcome. Field values are kept whatever happened.
    pub fn finish_submit(&mut self, outcome: ActionOutcome, notifier: &dyn Notifier) {
        self.pending = false;
        match &outcome {
            ActionOutcome::Saved { message } => {
                let text = if message.is_empty() {
                    self.success_fallback
                } else {
                    message.as_str()
                };
                notifier.success(text);
            }
            ActionOutcome::Failed { server_error, .. } => {
                let text = if server_error.is_empty() {
                    SAVE_ERROR_FALLBACK
                } else {
                    server_error.as_str()
                };
                notifier.error(text);
            }
            ActionOutcome::Invalid { validation_errors } => {
                self.errors.extend(validation_errors.clone());
            }
        }
        self.last_result = Some(outcome);
    }

    pub async fn submit(
        &mut self,
        mutation: &dyn Mutation<S>,
        notifier: &dyn Notifier,
    ) -> Result<(), SubmitBlocked> {
        let input = self.begin_submit()?;
        let outcome = mutation.save(input).await;
        self.finish_submit(outcome, notifier);
        Ok(())
    }

    /// Restore the original values and forget any submit result.
    pub fn reset(&mut self) {
        self.values = self.defaults.clone();
        self.errors.clear();
        self.last_result = None;
    }

    pub fn render(&self) -> FormView {
        let values = serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null);
        let fields = S::FIELDS
            .iter()
            .filter(|field| self.access(field) != FieldAccess::Hidden)
            .map(|&name| FieldView {
                name,
                value: values.get(name).cloned().unwrap_or(serde_json::Value::Null),
                access: self.access(name),
                error: self.errors.get(name).cloned(),
                options: self.options.get(name).cloned(),
            })
            .collect();
        FormView {
            heading: self.heading.clone(),
            mode: self.mode,
            read_only: !self.editable,
            fields,
            pending: self.pending,
            submit_label: if self.pending { "Saving" } else { "Save" },
            last_result: self.last_result.clone(),
        }
    }
}

// ── Concrete forms ────────────────────────────────────────────────────

fn customer_heading(id: Option<i64>) -> String {
    match id {
        Some(id) => format!("Edit Customer #{}", id),
        None => "New Customer Form".to_string(),
    }
}

fn ticket_heading(id: Option<i64>) -> String {
    match id {
        Some(id) => format!("Edit Ticket # {}", id),
        None => "New Ticket Form".to_string(),
    }
}

pub fn customer_form(caps: &Capabilities, customer: Option<&Customer>) -> FormController<CustomerInput> {
    let (mode, defaults) = match customer {
        Some(c) => (FormMode::Edit, CustomerInput::from_customer(c)),
        None => (FormMode::Create, CustomerInput::default()),
    };
    let active = if caps.manager && mode == FormMode::Edit {
        FieldAccess::Editable
    } else {
        FieldAccess::Hidden
    };
    FormController::new(
        mode,
        customer_heading(customer.map(|c| c.id)),
        defaults,
        CUSTOMER_SAVED_FALLBACK,
    )
    .with_access("active", active)
}

/// A customer form filled in by the client and submitted in one request.
/// Capability rules are enforced by the save action itself.
pub fn submitted_customer(input: CustomerInput) -> FormController<CustomerInput> {
    let (mode, id) = if input.is_new() {
        (FormMode::Create, None)
    } else {
        (FormMode::Edit, Some(input.id))
    };
    FormController::new(mode, customer_heading(id), input, CUSTOMER_SAVED_FALLBACK)
}

/// Ticket counterpart of [`submitted_customer`].
pub fn submitted_ticket(input: TicketInput) -> FormController<TicketInput> {
    let id = input.id.existing();
    let mode = if id.is_some() {
        FormMode::Edit
    } else {
        FormMode::Create
    };
    FormController::new(mode, ticket_heading(id), input, TICKET_SAVED_FALLBACK)
}

/// Whether `caps` may edit `ticket` (None means a new ticket).
pub fn ticket_editable(caps: &Capabilities, ticket: Option<&Ticket>) -> bool {
    match ticket {
        None => true,
        Some(t) => caps.manager || caps.is_assigned(&t.tech),
    }
}

/// Technicians offered to managers, always including the current value.
pub fn technician_options(technicians: &[String], current: &str) -> Vec<String> {
    let mut options: BTreeSet<String> = technicians.iter().map(|t| t.to_lowercase()).collect();
    options.insert(current.to_string());
    options.into_iter().collect()
}

pub fn ticket_form(
    caps: &Capabilities,
    ticket: Option<&Ticket>,
    customer: &Customer,
    technicians: &[String],
) -> FormController<TicketInput> {
    let (mode, defaults) = match ticket {
        Some(t) => (FormMode::Edit, TicketInput::from_ticket(t)),
        None => (FormMode::Create, TicketInput::for_customer(customer.id)),
    };
    let form = FormController::new(
        mode,
        ticket_heading(ticket.map(|t| t.id)),
        defaults,
        TICKET_SAVED_FALLBACK,
    )
    .editable(ticket_editable(caps, ticket));
    if caps.manager {
        let options = technician_options(technicians, &form.values().tech);
        form.with_options("tech", options)
    } else {
        form.with_access("tech", FieldAccess::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::actions::FailureKind;
    use crate::shop::models::TicketId;
    use crate::shop::notify::{CollectingNotifier, Notification, Severity};
    use crate::shop::schema::NEW_TICKET_TECH;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedMutation {
        calls: AtomicUsize,
        outcome: ActionOutcome,
    }

    impl FixedMutation {
        fn new(outcome: ActionOutcome) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome,
            }
        }
    }

    #[async_trait]
    impl<S: FormSchema> Mutation<S> for FixedMutation {
        async fn save(&self, _input: S) -> ActionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn customer(id: i64) -> Customer {
        Customer {
            id,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@x.com".into(),
            phone: "555-123-4567".into(),
            address1: "12 High St".into(),
            address2: None,
            city: "Springfield".into(),
            state: "IL".into(),
            zip: "62701".into(),
            notes: None,
            active: true,
            created_at: "2024-01-01 10:00:00".into(),
            updated_at: "2024-01-01 10:00:00".into(),
        }
    }

    fn ticket(tech: &str) -> Ticket {
        Ticket {
            id: 4,
            customer_id: 1,
            title: "Broken screen".into(),
            description: "Cracked".into(),
            completed: false,
            tech: tech.into(),
            created_at: "2024-01-02 10:00:00".into(),
            updated_at: "2024-01-02 10:00:00".into(),
        }
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn test_create_mode_defaults() {
        let form = customer_form(&Capabilities::manager("boss@shop.com"), None);
        assert_eq!(form.mode(), FormMode::Create);
        assert_eq!(form.heading(), "New Customer Form");
        assert_eq!(form.values(), &CustomerInput::default());
        assert_eq!(form.access("active"), FieldAccess::Hidden);

        let form = ticket_form(&Capabilities::default(), None, &customer(3), &[]);
        assert_eq!(form.heading(), "New Ticket Form");
        assert_eq!(form.values().id, TicketId::New);
        assert_eq!(form.values().customer_id, 3);
        assert_eq!(form.values().tech, NEW_TICKET_TECH);
    }

    #[test]
    fn test_edit_mode_seeded_from_record() {
        let form = customer_form(&Capabilities::manager("boss@shop.com"), Some(&customer(5)));
        assert_eq!(form.mode(), FormMode::Edit);
        assert_eq!(form.heading(), "Edit Customer #5");
        assert_eq!(form.values().first_name, "Ada");
        assert_eq!(form.access("active"), FieldAccess::Editable);

        let staff = customer_form(&Capabilities::staff("tech@shop.com"), Some(&customer(5)));
        assert_eq!(staff.access("active"), FieldAccess::Hidden);
        assert!(staff.render().fields.iter().all(|f| f.name != "active"));
    }

    #[test]
    fn test_blur_validates_single_field() {
        let mut form = customer_form(&Capabilities::default(), None);
        form.set_value("email", text("nope")).unwrap();
        assert_eq!(form.field_error("email"), None);
        assert_eq!(form.blur("email"), Some("Invalid email address"));
        assert!(form.field_error("phone").is_none());

        // fixing a field that shows an error clears it right away
        form.set_value("email", text("ada@x.com")).unwrap();
        assert_eq!(form.field_error("email"), None);
    }

    #[tokio::test]
    async fn test_invalid_tech_never_reaches_mutation() {
        let caps = Capabilities::manager("boss@shop.com");
        let techs = vec!["tech@shop.com".to_string(), "bad-address".to_string()];
        let mut form = ticket_form(&caps, None, &customer(1), &techs);
        form.set_value("title", text("Broken screen")).unwrap();
        form.set_value("description", text("Cracked")).unwrap();
        form.set_value("tech", text("bad-address")).unwrap();

        let notifier = CollectingNotifier::default();
        let mutation = FixedMutation::new(ActionOutcome::Saved {
            message: "Ticket ID #1 created successfully".into(),
        });

        let blocked = form.submit(&mutation, &notifier).await.unwrap_err();
        assert!(matches!(blocked, SubmitBlocked::Invalid(_)));
        assert_eq!(form.field_error("tech"), Some("Invalid email address"));
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 0);
        assert!(notifier.take().is_empty());

        form.set_value("tech", text("tech@shop.com")).unwrap();
        form.submit(&mutation, &notifier).await.unwrap();
        assert_eq!(mutation.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            notifier.take(),
            vec![Notification {
                message: "Ticket ID #1 created successfully".into(),
                severity: Severity::Success,
            }]
        );
    }

    #[test]
    fn test_pending_guard_blocks_second_submit() {
        let mut form = ticket_form(&Capabilities::default(), None, &customer(1), &[]);
        form.set_value("title", text("Broken")).unwrap();
        form.set_value("description", text("Cracked")).unwrap();
        form.begin_submit().unwrap();
        assert!(form.is_pending());
        assert_eq!(form.render().submit_label, "Saving");
        assert_eq!(form.begin_submit().unwrap_err(), SubmitBlocked::Pending);

        let notifier = CollectingNotifier::default();
        form.finish_submit(
            ActionOutcome::Saved {
                message: String::new(),
            },
            &notifier,
        );
        assert!(!form.is_pending());
        assert_eq!(notifier.take()[0].message, TICKET_SAVED_FALLBACK);
    }

    #[tokio::test]
    async fn test_failure_notifies_and_keeps_values() {
        let mut form = customer_form(&Capabilities::default(), None);
        for (field, value) in [
            ("firstName", "Ada"),
            ("lastName", "Lovelace"),
            ("address1", "12 High St"),
            ("city", "Springfield"),
            ("state", "IL"),
            ("zip", "62701"),
            ("email", "ada@x.com"),
            ("phone", "555-123-4567"),
        ] {
            form.set_value(field, text(value)).unwrap();
        }
        let notifier = CollectingNotifier::default();
        let mutation = FixedMutation::new(ActionOutcome::Failed {
            server_error: String::new(),
            kind: FailureKind::Internal,
        });
        form.submit(&mutation, &notifier).await.unwrap();

        assert_eq!(
            notifier.take(),
            vec![Notification {
                message: SAVE_ERROR_FALLBACK.into(),
                severity: Severity::Error,
            }]
        );
        assert_eq!(form.values().first_name, "Ada");
        assert!(form.last_result().is_some());

        form.reset();
        assert_eq!(form.values(), &CustomerInput::default());
        assert!(form.last_result().is_none());
        assert!(form.errors().is_empty());
    }

    #[test]
    fn test_server_validation_errors_show_inline() {
        let mut form = customer_form(&Capabilities::default(), None);
        let notifier = CollectingNotifier::default();
        let mut errors = FieldErrors::new();
        errors.insert("email".into(), "Invalid email address".into());
        form.finish_submit(
            ActionOutcome::Invalid {
                validation_errors: errors,
            },
            &notifier,
        );
        assert_eq!(form.field_error("email"), Some("Invalid email address"));
        assert!(notifier.take().is_empty());
    }

    #[test]
    fn test_ticket_form_access_for_staff() {
        let staff = Capabilities::staff("tech@shop.com");

        let own = ticket_form(&staff, Some(&ticket("tech@shop.com")), &customer(1), &[]);
        assert_eq!(own.heading(), "Edit Ticket # 4");
        assert!(!own.is_read_only());
        assert_eq!(own.access("tech"), FieldAccess::ReadOnly);
        assert_eq!(own.access("title"), FieldAccess::Editable);

        let mut other = ticket_form(&staff, Some(&ticket("else@shop.com")), &customer(1), &[]);
        assert!(other.is_read_only());
        assert_eq!(other.access("title"), FieldAccess::ReadOnly);
        assert!(other.set_value("title", text("x")).is_err());
        assert_eq!(other.begin_submit().unwrap_err(), SubmitBlocked::ReadOnly);
    }

    #[test]
    fn test_ticket_form_manager_gets_technician_select() {
        let caps = Capabilities::manager("boss@shop.com");
        let techs = vec!["a@shop.com".to_string(), "B@shop.com".to_string()];
        let mut form = ticket_form(&caps, Some(&ticket("gone@shop.com")), &customer(1), &techs);
        let view = form.render();
        let tech = view.fields.iter().find(|f| f.name == "tech").unwrap();
        assert_eq!(tech.access, FieldAccess::Editable);
        assert_eq!(
            tech.options.as_deref(),
            Some(&["a@shop.com".to_string(), "b@shop.com".to_string(), "gone@shop.com".to_string()][..])
        );
        assert!(form.set_value("tech", text("stranger@shop.com")).is_err());
        form.set_value("tech", text("a@shop.com")).unwrap();
        assert_eq!(form.values().tech, "a@shop.com");
    }

    #[test]
    fn test_submitted_forms_pick_mode_from_id() {
        let form = submitted_customer(CustomerInput::default());
        assert_eq!(form.mode(), FormMode::Create);
        let form = submitted_customer(CustomerInput {
            id: 9,
            ..CustomerInput::default()
        });
        assert_eq!(form.heading(), "Edit Customer #9");

        let mut input = TicketInput::for_customer(1);
        assert_eq!(submitted_ticket(input.clone()).mode(), FormMode::Create);
        input.id = TicketId::Existing(2);
        assert_eq!(submitted_ticket(input).heading(), "Edit Ticket # 2");
    }
}
