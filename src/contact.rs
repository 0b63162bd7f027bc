//! Contact form state and validation.

use crate::bus::{Event, EventBus};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static email pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Name,
    Email,
    Company,
    LicenseType,
    Message,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Name,
        Field::Email,
        Field::Company,
        Field::LicenseType,
        Field::Message,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Email => "email",
            Field::Company => "company",
            Field::LicenseType => "licenseType",
            Field::Message => "message",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown form field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LicenseType {
    #[serde(rename = "MS Office")]
    MsOffice,
    #[serde(rename = "Adobe Suite")]
    AdobeSuite,
    #[serde(rename = "AutoCAD")]
    AutoCad,
    #[serde(rename = "SAP")]
    Sap,
    #[serde(rename = "Oracle")]
    Oracle,
    #[serde(rename = "Salesforce")]
    Salesforce,
    #[serde(rename = "Other")]
    Other,
}

impl LicenseType {
    pub const ALL: [LicenseType; 7] = [
        LicenseType::MsOffice,
        LicenseType::AdobeSuite,
        LicenseType::AutoCad,
        LicenseType::Sap,
        LicenseType::Oracle,
        LicenseType::Salesforce,
        LicenseType::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LicenseType::MsOffice => "MS Office",
            LicenseType::AdobeSuite => "Adobe Suite",
            LicenseType::AutoCad => "AutoCAD",
            LicenseType::Sap => "SAP",
            LicenseType::Oracle => "Oracle",
            LicenseType::Salesforce => "Salesforce",
            LicenseType::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        LicenseType::ALL.into_iter().find(|t| t.label() == label)
    }
}

impl fmt::Display for LicenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inline message shown next to a failing field.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("Name is required")]
    NameRequired,
    #[error("Email is required")]
    EmailRequired,
    #[error("Invalid email format")]
    InvalidEmail,
    #[error("Company is required")]
    CompanyRequired,
    #[error("Please select a license type")]
    LicenseTypeRequired,
    #[error("Message is required")]
    MessageRequired,
}

impl Serialize for FieldError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub type FieldErrors = BTreeMap<Field, FieldError>;

/// A validated form, ready to hand to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub company: String,
    pub license_type: LicenseType,
    pub message: String,
}

/// Receives submissions that passed validation.
pub trait ContactSink: Send + Sync {
    fn deliver(&self, submission: &ContactSubmission) -> Result<()>;
}

/// Traces the payload; the only delivery the site performs today.
pub struct LogSink;

impl ContactSink for LogSink {
    fn deliver(&self, submission: &ContactSubmission) -> Result<()> {
        info!(
            name = %submission.name,
            email = %submission.email,
            company = %submission.company,
            license_type = %submission.license_type,
            message = %submission.message,
            "Form submitted"
        );
        Ok(())
    }
}

/// Announces the submission to UI subscribers.
pub struct BusSink {
    bus: Arc<EventBus>,
}

impl BusSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl ContactSink for BusSink {
    fn deliver(&self, submission: &ContactSubmission) -> Result<()> {
        self.bus.publish(Event::ContactSubmitted(submission.clone()));
        Ok(())
    }
}

/// What the presentation layer shows for a form being filled in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactFormSnapshot {
    pub form_id: String,
    pub fields: BTreeMap<Field, String>,
    pub errors: FieldErrors,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted(ContactSubmission),
    Rejected(FieldErrors),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub license_type: String,
    #[serde(default)]
    pub message: String,
    #[serde(skip)]
    errors: FieldErrors,
}

impl ContactForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn snapshot(&self, form_id: impl Into<String>) -> ContactFormSnapshot {
        ContactFormSnapshot {
            form_id: form_id.into(),
            fields: Field::ALL
                .into_iter()
                .map(|f| (f, self.field(f).to_string()))
                .collect(),
            errors: self.errors.clone(),
        }
    }

    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::Email => &self.email,
            Field::Company => &self.company,
            Field::LicenseType => &self.license_type,
            Field::Message => &self.message,
        }
    }

    /// Updates a field and clears its error, if any. Other fields are not
    /// re-checked.
    pub fn set_field(&mut self, field: Field, value: impl Into<String>) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Email => &mut self.email,
            Field::Company => &mut self.company,
            Field::LicenseType => &mut self.license_type,
            Field::Message => &mut self.message,
        };
        *slot = value.into();
        self.errors.remove(&field);
    }

    /// Re-checks every field, replacing the stored errors. Returns true when
    /// the form is valid.
    pub fn validate(&mut self) -> bool {
        self.errors = check_fields(self);
        self.errors.is_empty()
    }

    /// Validates and, when valid, delivers the payload to every sink and
    /// clears the form.
    ///
    /// Every sink is attempted even if an earlier one fails. If any sink
    /// fails, the field values are kept so the visitor can retry, and the
    /// first error is returned. Sinks that already succeeded are not undone.
    pub fn submit(&mut self, sinks: &[Arc<dyn ContactSink>]) -> Result<SubmitOutcome> {
        if !self.validate() {
            return Ok(SubmitOutcome::Rejected(self.errors.clone()));
        }

        let Some(license_type) = LicenseType::from_label(&self.license_type) else {
            return Ok(SubmitOutcome::Rejected(self.errors.clone()));
        };
        let submission = ContactSubmission {
            name: self.name.clone(),
            email: self.email.clone(),
            company: self.company.clone(),
            license_type,
            message: self.message.clone(),
        };

        let mut first_error = None;
        for sink in sinks {
            if let Err(e) = sink.deliver(&submission) {
                warn!("Contact sink failed: {:#}", e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        *self = Self::default();
        Ok(SubmitOutcome::Submitted(submission))
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn check_fields(form: &ContactForm) -> FieldErrors {
    let mut errors = FieldErrors::new();

    if is_blank(&form.name) {
        errors.insert(Field::Name, FieldError::NameRequired);
    }

    if is_blank(&form.email) {
        errors.insert(Field::Email, FieldError::EmailRequired);
    } else if !EMAIL_RE.is_match(&form.email) {
        errors.insert(Field::Email, FieldError::InvalidEmail);
    }

    if is_blank(&form.company) {
        errors.insert(Field::Company, FieldError::CompanyRequired);
    }

    if LicenseType::from_label(&form.license_type).is_none() {
        errors.insert(Field::LicenseType, FieldError::LicenseTypeRequired);
    }

    if is_blank(&form.message) {
        errors.insert(Field::Message, FieldError::MessageRequired);
    }

    errors
}
