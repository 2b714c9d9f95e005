//! Declarative validation for the customer and ticket inputs.
//!
//! Each input type lists its fields once and validates them one at a time,
//! so the form controller can check a single field on blur and the whole
//! record on submit with the same rules the server actions apply.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::models::{Customer, Ticket, TicketId};
use crate::errors::{FieldErrors, ShopError};

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_'+\-]+(\.[A-Za-z0-9_'+\-]+)*@([A-Za-z0-9][A-Za-z0-9\-]*\.)+[A-Za-z]{2,}$")
        .unwrap()
});

static ZIP_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{5}(-\d{4})?$").unwrap());

static PHONE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{3}-\d{3}-\d{4}$").unwrap());

/// Default technician for a brand-new ticket.
pub const NEW_TICKET_TECH: &str = "new-ticket@example.com";

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_REGEX.is_match(value)
}

fn required(value: &str, message: &str) -> Option<String> {
    value.trim().is_empty().then(|| message.to_string())
}

/// A value written into a form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl FieldValue {
    fn into_text(self, field: &str) -> Result<String, ShopError> {
        match self {
            FieldValue::Text(s) => Ok(s),
            other => Err(ShopError::BadRequest(format!(
                "Field '{}' expects text, got {:?}",
                field, other
            ))),
        }
    }

    fn into_bool(self, field: &str) -> Result<bool, ShopError> {
        match self {
            FieldValue::Bool(b) => Ok(b),
            other => Err(ShopError::BadRequest(format!(
                "Field '{}' expects a boolean, got {:?}",
                field, other
            ))),
        }
    }
}

/// A typed record bound to a form.
pub trait FormSchema: Clone + Serialize + Send + Sync + 'static {
    /// Field names in display order.
    const FIELDS: &'static [&'static str];

    /// Validate one field, returning its message when invalid.
    fn validate_field(&self, field: &str) -> Option<String>;

    /// Write a value into a field by name.
    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), ShopError>;

    fn validate(&self) -> FieldErrors {
        Self::FIELDS
            .iter()
            .filter_map(|field| {
                self.validate_field(field)
                    .map(|message| (field.to_string(), message))
            })
            .collect()
    }

    fn ensure_valid(&self) -> Result<(), ShopError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShopError::Validation(errors))
        }
    }
}

fn unknown_field(field: &str) -> ShopError {
    ShopError::BadRequest(format!("Unknown field '{}'", field))
}

// ── Customer ──────────────────────────────────────────────────────────

/// Customer as submitted by the customer form. `id == 0` means new.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInput {
    #[serde(default)]
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub address1: String,
    #[serde(default)]
    pub address2: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub phone: String,
    pub email: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Default for CustomerInput {
    fn default() -> Self {
        Self {
            id: 0,
            first_name: String::new(),
            last_name: String::new(),
            address1: String::new(),
            address2: String::new(),
            city: String::new(),
            state: String::new(),
            zip: String::new(),
            phone: String::new(),
            email: String::new(),
            notes: String::new(),
            active: true,
        }
    }
}

impl CustomerInput {
    pub fn from_customer(customer: &Customer) -> Self {
        Self {
            id: customer.id,
            first_name: customer.first_name.clone(),
            last_name: customer.last_name.clone(),
            address1: customer.address1.clone(),
            address2: customer.address2.clone().unwrap_or_default(),
            city: customer.city.clone(),
            state: customer.state.clone(),
            zip: customer.zip.clone(),
            phone: customer.phone.clone(),
            email: customer.email.clone(),
            notes: customer.notes.clone().unwrap_or_default(),
            active: customer.active,
        }
    }

    pub fn is_new(&self) -> bool {
        self.id == 0
    }
}

impl FormSchema for CustomerInput {
    const FIELDS: &'static [&'static str] = &[
        "firstName",
        "lastName",
        "address1",
        "address2",
        "city",
        "state",
        "zip",
        "email",
        "phone",
        "notes",
        "active",
    ];

    fn validate_field(&self, field: &str) -> Option<String> {
        match field {
            "firstName" => required(&self.first_name, "First name is required"),
            "lastName" => required(&self.last_name, "Last name is required"),
            "address1" => required(&self.address1, "Address is required"),
            "city" => required(&self.city, "City is required"),
            "state" => (self.state.chars().count() != 2)
                .then(|| "State must be exactly 2 characters".to_string()),
            "email" => (!is_valid_email(&self.email)).then(|| "Invalid email address".to_string()),
            "zip" => (!ZIP_REGEX.is_match(&self.zip)).then(|| {
                "Invalid Zip code. Use 5 digits or 5 digits followed by a hyphen and 4 digits"
                    .to_string()
            }),
            "phone" => (!PHONE_REGEX.is_match(&self.phone))
                .then(|| "Invalid phone number format. Use XXX-XXX-XXXX".to_string()),
            _ => None,
        }
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), ShopError> {
        match field {
            "firstName" => self.first_name = value.into_text(field)?,
            "lastName" => self.last_name = value.into_text(field)?,
            "address1" => self.address1 = value.into_text(field)?,
            "address2" => self.address2 = value.into_text(field)?,
            "city" => self.city = value.into_text(field)?,
            "state" => self.state = value.into_text(field)?,
            "zip" => self.zip = value.into_text(field)?,
            "email" => self.email = value.into_text(field)?,
            "phone" => self.phone = value.into_text(field)?,
            "notes" => self.notes = value.into_text(field)?,
            "active" => self.active = value.into_bool(field)?,
            _ => return Err(unknown_field(field)),
        }
        Ok(())
    }
}

// ── Ticket ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketInput {
    pub id: TicketId,
    pub customer_id: i64,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    pub tech: String,
}

impl TicketInput {
    /// Create-mode defaults for a new ticket belonging to `customer_id`.
    pub fn for_customer(customer_id: i64) -> Self {
        Self {
            id: TicketId::New,
            customer_id,
            title: String::new(),
            description: String::new(),
            completed: false,
            tech: NEW_TICKET_TECH.to_string(),
        }
    }

    pub fn from_ticket(ticket: &Ticket) -> Self {
        Self {
            id: TicketId::Existing(ticket.id),
            customer_id: ticket.customer_id,
            title: ticket.title.clone(),
            description: ticket.description.clone(),
            completed: ticket.completed,
            tech: ticket.tech.clone(),
        }
    }
}

impl FormSchema for TicketInput {
    const FIELDS: &'static [&'static str] = &["title", "tech", "completed", "description"];

    fn validate_field(&self, field: &str) -> Option<String> {
        match field {
            "title" => required(&self.title, "Title is required"),
            "description" => required(&self.description, "Description is required"),
            "tech" => (!is_valid_email(&self.tech)).then(|| "Invalid email address".to_string()),
            _ => None,
        }
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> Result<(), ShopError> {
        match field {
            "title" => self.title = value.into_text(field)?,
            "description" => self.description = value.into_text(field)?,
            "tech" => self.tech = value.into_text(field)?,
            "completed" => self.completed = value.into_bool(field)?,
            _ => return Err(unknown_field(field)),
        }
        Ok(())
    }

    fn validate(&self) -> FieldErrors {
        let mut errors: FieldErrors = Self::FIELDS
            .iter()
            .filter_map(|field| {
                self.validate_field(field)
                    .map(|message| (field.to_string(), message))
            })
            .collect();
        if self.customer_id <= 0 {
            errors.insert("customerId".into(), "Customer is required".into());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_customer() -> CustomerInput {
        CustomerInput {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            address1: "1 Navy Way".into(),
            city: "Arlington".into(),
            state: "VA".into(),
            zip: "22201".into(),
            phone: "555-123-4567".into(),
            email: "grace@example.com".into(),
            ..CustomerInput::default()
        }
    }

    #[test]
    fn test_valid_customer_has_no_errors() {
        assert!(valid_customer().validate().is_empty());
        assert!(valid_customer().ensure_valid().is_ok());
    }

    #[test]
    fn test_customer_state_must_be_two_chars() {
        let mut c = valid_customer();
        c.state = "VIR".into();
        assert_eq!(
            c.validate_field("state").as_deref(),
            Some("State must be exactly 2 characters")
        );
    }

    #[test]
    fn test_customer_zip_formats() {
        let mut c = valid_customer();
        for ok in ["12345", "12345-6789"] {
            c.zip = ok.into();
            assert!(c.validate_field("zip").is_none(), "{ok} should be valid");
        }
        for bad in ["1234", "123456", "12345-678", "abcde"] {
            c.zip = bad.into();
            assert!(c.validate_field("zip").is_some(), "{bad} should be invalid");
        }
    }

    #[test]
    fn test_customer_phone_format() {
        let mut c = valid_customer();
        c.phone = "5551234567".into();
        assert!(c.validate_field("phone").unwrap().contains("XXX-XXX-XXXX"));
    }

    #[test]
    fn test_empty_customer_reports_every_required_field() {
        let errors = CustomerInput::default().validate();
        for field in ["firstName", "lastName", "address1", "city", "state", "zip", "email", "phone"] {
            assert!(errors.contains_key(field), "missing error for {field}");
        }
        assert!(!errors.contains_key("address2"));
        assert!(!errors.contains_key("notes"));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("tech@shop.example.com"));
        assert!(is_valid_email("first.last+tag@example.io"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn test_set_field_type_checks() {
        let mut c = valid_customer();
        c.set_field("active", FieldValue::Bool(false)).unwrap();
        assert!(!c.active);
        assert!(c.set_field("active", FieldValue::Text("no".into())).is_err());
        assert!(c.set_field("bogus", FieldValue::Text("x".into())).is_err());
    }

    #[test]
    fn test_ticket_defaults_and_validation() {
        let mut t = TicketInput::for_customer(4);
        assert_eq!(t.id, TicketId::New);
        assert_eq!(t.tech, NEW_TICKET_TECH);
        let errors = t.validate();
        assert_eq!(errors.get("title").map(String::as_str), Some("Title is required"));
        assert!(errors.contains_key("description"));
        assert!(!errors.contains_key("tech"));

        t.tech = "bob".into();
        assert_eq!(t.validate_field("tech").as_deref(), Some("Invalid email address"));
    }

    #[test]
    fn test_ticket_requires_customer() {
        let mut t = TicketInput::for_customer(0);
        t.title = "Broken screen".into();
        t.description = "Cracked".into();
        let errors = t.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("customerId"));
    }

    #[test]
    fn test_ticket_input_deserializes_sentinel() {
        let json = r#"{"id":"(New)","customerId":1,"title":"t","description":"d","tech":"a@b.co"}"#;
        let t: TicketInput = serde_json::from_str(json).unwrap();
        assert_eq!(t.id, TicketId::New);
        assert!(!t.completed);
    }
}
