use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel the ticket form uses for a ticket that has not been saved yet.
pub const NEW_TICKET_SENTINEL: &str = "(New)";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub notes: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: i64,
    pub customer_id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub tech: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Identifier of a ticket as carried by the ticket form: either the
/// `"(New)"` sentinel or the numeric id of a stored ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketId {
    New,
    Existing(i64),
}

impl TicketId {
    pub fn existing(&self) -> Option<i64> {
        match self {
            Self::New => None,
            Self::Existing(id) => Some(*id),
        }
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => f.write_str(NEW_TICKET_SENTINEL),
            Self::Existing(id) => write!(f, "{}", id),
        }
    }
}

impl Serialize for TicketId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::New => serializer.serialize_str(NEW_TICKET_SENTINEL),
            Self::Existing(id) => serializer.serialize_i64(*id),
        }
    }
}

impl<'de> Deserialize<'de> for TicketId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(id) => Ok(Self::Existing(id)),
            Raw::Text(s) if s == NEW_TICKET_SENTINEL => Ok(Self::New),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "Invalid ticket id: expected a number or \"{}\", got \"{}\"",
                NEW_TICKET_SENTINEL, s
            ))),
        }
    }
}

/// A ticket joined with its customer, as shown in the ticket table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketSearchRow {
    pub id: i64,
    pub ticket_date: String,
    pub title: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub tech: String,
    pub completed: bool,
}

/// What the current caller may do. Resolved once per request from the
/// identity the auth proxy forwards, then passed down as plain data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub email: Option<String>,
    pub manager: bool,
}

impl Capabilities {
    pub fn manager(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            manager: true,
        }
    }

    pub fn staff(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            manager: false,
        }
    }

    /// Parse a comma separated permission list such as `"manager,reports"`.
    pub fn from_permissions(email: Option<String>, permissions: &str) -> Self {
        let manager = permissions
            .split(',')
            .map(str::trim)
            .any(|p| p.eq_ignore_ascii_case("manager"));
        Self { email, manager }
    }

    /// Whether the caller is the technician assigned to `tech`.
    pub fn is_assigned(&self, tech: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|email| email.eq_ignore_ascii_case(tech))
    }
}
