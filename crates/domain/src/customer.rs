//! Customers and their booking statistics.

use chrono::{DateTime, Utc};
use common::{BusinessId, CustomerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactError {
    #[error("customer name is required")]
    MissingName,
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default)]
    pub country: Option<String>,
}

/// Contact details submitted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
}

impl CustomerContact {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: None,
            address: None,
        }
    }

    pub fn validate(&self) -> Result<(), ContactError> {
        if self.name.trim().is_empty() {
            return Err(ContactError::MissingName);
        }
        let email = self.email.trim();
        let valid = email
            .split_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
            });
        if !valid || email.contains(char::is_whitespace) {
            return Err(ContactError::InvalidEmail(self.email.clone()));
        }
        Ok(())
    }

    /// Customers are matched per business by this key.
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// A customer of one business, with aggregate booking statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub business_id: BusinessId,
    pub name: String,
    /// Stored normalized (trimmed, lowercase).
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<Address>,
    pub booking_count: u32,
    pub total_spent: Money,
    pub last_booking_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// A first-time customer with zeroed statistics.
    pub fn from_contact(business_id: BusinessId, contact: &CustomerContact, now: DateTime<Utc>) -> Self {
        Self {
            id: CustomerId::new(),
            business_id,
            name: contact.name.trim().to_string(),
            email: contact.normalized_email(),
            phone: contact.phone.clone(),
            address: contact.address.clone(),
            booking_count: 0,
            total_spent: Money::zero(),
            last_booking_at: None,
            created_at: now,
        }
    }

    /// Counts one confirmed booking paid with `amount`.
    pub fn record_confirmed_booking(&mut self, amount: Money, at: DateTime<Utc>) {
        self.booking_count += 1;
        self.total_spent += amount;
        self.last_booking_at = Some(at);
    }
}
