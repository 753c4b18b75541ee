//! Builds outbound messages from sanitized form data.

use lettre::message::{Mailbox, MultiPart};
use lettre::{Address, Message};
use serde_json::Value;

use super::MailError;
use crate::security::{self, html, FormData};

const ANONYMOUS: &str = "a user";

/// A validated `/contact` submission.
#[derive(Debug, Clone)]
pub struct ContactMessage {
    pub name: String,
    pub email: Address,
    pub subject: String,
    pub message: String,
}

/// Collapses runs of whitespace, including line breaks, to single spaces.
fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn submission_subject(form: &FormData) -> String {
    let name = form
        .get("name")
        .and_then(Value::as_str)
        .map(single_line)
        .filter(|name| !name.is_empty());

    format!(
        "New Form Submission from {}",
        name.as_deref().unwrap_or(ANONYMOUS)
    )
}

pub fn render_text(form: &FormData) -> String {
    let mut body = String::from("You have received a new form submission.\n\n");
    for (key, value) in form {
        body.push_str(&format!("{}: {}\n", key, display_value(value)));
    }
    body
}

pub fn render_html(form: &FormData) -> String {
    let rows: String = form
        .iter()
        .map(|(key, value)| {
            format!(
                "      <tr><th align=\"left\">{}</th><td style=\"white-space: pre-wrap\">{}</td></tr>\n",
                html::escape(key),
                html::text_only(&display_value(value)),
            )
        })
        .collect();

    format!(
        "<!DOCTYPE html>\n<html>\n  <body>\n    <h2>New Form Submission</h2>\n    <table>\n{rows}    </table>\n  </body>\n</html>\n"
    )
}

/// Reply-To for a submission: the form's own `email` field, when valid.
fn reply_to(form: &FormData) -> Option<Mailbox> {
    let email = form.get("email").and_then(Value::as_str)?;
    let address = security::validate_email(email).ok()?;
    let name = form
        .get("name")
        .and_then(Value::as_str)
        .map(single_line)
        .filter(|name| !name.is_empty());
    Some(Mailbox::new(name, address))
}

pub fn form_submission(
    from: &Mailbox,
    to: &Address,
    form: &FormData,
) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .to(Mailbox::new(None, to.clone()))
        .subject(submission_subject(form));

    if let Some(reply_to) = reply_to(form) {
        builder = builder.reply_to(reply_to);
    }

    let message = builder.multipart(MultiPart::alternative_plain_html(
        render_text(form),
        render_html(form),
    ))?;
    Ok(message)
}

pub fn contact_message(
    from: &Mailbox,
    to: &Address,
    contact: &ContactMessage,
) -> Result<Message, MailError> {
    let body = format!(
        "Name: {}\nEmail: {}\n\nMessage:\n{}\n",
        contact.name, contact.email, contact.message
    );

    let message = Message::builder()
        .from(from.clone())
        .to(Mailbox::new(None, to.clone()))
        .reply_to(Mailbox::new(
            Some(single_line(&contact.name)),
            contact.email.clone(),
        ))
        .subject(format!("Contact Form: {}", single_line(&contact.subject)))
        .body(body)?;
    Ok(message)
}
