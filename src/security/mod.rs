//! Validation and sanitization of untrusted form input.

use lettre::address::AddressError;
use lettre::Address;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use thiserror::Error;

pub mod deliverability;
pub mod html;

/// Field name to value, in submission order.
pub type FormData = Map<String, Value>;

/// Largest accepted form, measured as compact JSON.
pub const MAX_FORM_SIZE: usize = 10_000;

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_PART_LEN: usize = 64;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>?").expect("tag pattern is valid"));

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("The email address is empty.")]
    Empty,
    #[error("The email address is too long ({0} characters).")]
    TooLong(usize),
    #[error("The part before the @-sign is too long ({0} characters).")]
    LocalPartTooLong(usize),
    #[error("The email address is not valid: {0}")]
    Syntax(#[from] AddressError),
    #[error("The domain name {0} is not valid. It should have a period.")]
    DomainWithoutPeriod(String),
    #[error("The domain name {0} is not valid.")]
    InvalidDomain(String),
    #[error("The domain name {0} does not exist.")]
    DomainNotFound(String),
    #[error("The domain name {0} does not accept email.")]
    Undeliverable(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("No form data received")]
    Empty,
    #[error("Form data too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },
}

/// Parses and normalizes an address. The domain is lowercased; the local
/// part is kept as given.
pub fn validate_email(raw: &str) -> Result<Address, EmailError> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        return Err(EmailError::Empty);
    }
    if candidate.len() > MAX_ADDRESS_LEN {
        return Err(EmailError::TooLong(candidate.len()));
    }

    let address: Address = candidate.parse()?;
    if address.user().len() > MAX_LOCAL_PART_LEN {
        return Err(EmailError::LocalPartTooLong(address.user().len()));
    }

    let domain = address.domain().to_ascii_lowercase();
    check_domain(&domain)?;

    Ok(Address::new(address.user(), domain)?)
}

fn check_domain(domain: &str) -> Result<(), EmailError> {
    if domain.starts_with('[') {
        return Err(EmailError::InvalidDomain(domain.to_string()));
    }
    if !domain.contains('.') {
        return Err(EmailError::DomainWithoutPeriod(domain.to_string()));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    let bad_label = labels
        .iter()
        .any(|label| label.is_empty() || label.starts_with('-') || label.ends_with('-'));
    let numeric_tld = labels
        .last()
        .map(|tld| tld.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(true);

    if bad_label || numeric_tld {
        return Err(EmailError::InvalidDomain(domain.to_string()));
    }
    Ok(())
}

pub fn is_valid_email(raw: &str) -> bool {
    validate_email(raw).is_ok()
}

/// Removes anything that looks like a tag, including an unterminated one at
/// the end of the string.
pub fn strip_tags(input: &str) -> Cow<'_, str> {
    TAG.replace_all(input, "")
}

/// Strips tags from every string, walking into objects and arrays.
pub fn sanitize_input(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_tags(s).into_owned()),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_input).collect()),
        Value::Object(fields) => Value::Object(sanitize_form(fields)),
        other => other.clone(),
    }
}

pub fn sanitize_form(form: &FormData) -> FormData {
    form.iter()
        .map(|(key, value)| (key.clone(), sanitize_input(value)))
        .collect()
}

pub fn validate_form_data(form: &FormData, max_size: usize) -> Result<(), FormError> {
    if form.is_empty() {
        return Err(FormError::Empty);
    }

    let size = serde_json::to_string(form)
        .map(|encoded| encoded.len())
        .unwrap_or(usize::MAX);
    if size > max_size {
        return Err(FormError::TooLarge {
            size,
            limit: max_size,
        });
    }

    Ok(())
}
