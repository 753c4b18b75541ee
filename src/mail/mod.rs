use lettre::address::{AddressError, Envelope};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::stub::AsyncStubTransport;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{MailConfig, MailTransportKind};
use crate::security::FormData;

pub mod compose;

pub use compose::ContactMessage;

/// Sender used by the log transport when none is configured.
const LOG_SENDER: &str = "FormSendr <noreply@localhost>";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("no sender configured; set mail.default_sender or mail.username")]
    MissingSender,
    #[error("invalid mailbox `{value}`: {source}")]
    InvalidMailbox {
        value: String,
        #[source]
        source: AddressError,
    },
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("log transport failed: {0}")]
    Stub(#[from] lettre::transport::stub::Error),
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    Log(AsyncStubTransport),
}

pub struct Mailer {
    transport: Transport,
    sender: Mailbox,
    send_in_background: bool,
}

impl Mailer {
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        let mailer = match config.transport {
            MailTransportKind::Smtp => {
                let sender = parse_mailbox(config.sender().ok_or(MailError::MissingSender)?)?;
                Self {
                    transport: Transport::Smtp(smtp_transport(config)?),
                    sender,
                    send_in_background: config.send_in_background,
                }
            }
            MailTransportKind::Log => {
                let sender = parse_mailbox(config.sender().unwrap_or(LOG_SENDER))?;
                Self::log(sender).background(config.send_in_background)
            }
        };
        Ok(mailer)
    }

    /// Keeps messages in memory and logs them; nothing leaves the process.
    pub fn log(sender: Mailbox) -> Self {
        Self {
            transport: Transport::Log(AsyncStubTransport::new_ok()),
            sender,
            send_in_background: false,
        }
    }

    pub fn background(mut self, enabled: bool) -> Self {
        self.send_in_background = enabled;
        self
    }

    pub fn sends_in_background(&self) -> bool {
        self.send_in_background
    }

    pub fn sender(&self) -> &Mailbox {
        &self.sender
    }

    pub fn transport_name(&self) -> &'static str {
        match self.transport {
            Transport::Smtp(_) => MailTransportKind::Smtp.as_str(),
            Transport::Log(_) => MailTransportKind::Log.as_str(),
        }
    }

    pub async fn send(&self, message: Message) -> Result<(), MailError> {
        match &self.transport {
            Transport::Smtp(smtp) => {
                let response = smtp.send(message).await?;
                debug!(code = %response.code(), "SMTP server accepted message");
            }
            Transport::Log(stub) => {
                let recipients: Vec<String> = message
                    .envelope()
                    .to()
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                info!(
                    recipients = ?recipients,
                    bytes = message.formatted().len(),
                    "Message captured by log transport"
                );
                stub.send(message).await?;
            }
        }
        Ok(())
    }

    pub async fn send_form_submission(
        &self,
        recipient: &Address,
        form: &FormData,
    ) -> Result<(), MailError> {
        let message = compose::form_submission(&self.sender, recipient, form)?;
        self.send(message).await
    }

    pub async fn send_contact(
        &self,
        recipient: &Address,
        contact: &ContactMessage,
    ) -> Result<(), MailError> {
        let message = compose::contact_message(&self.sender, recipient, contact)?;
        self.send(message).await
    }

    /// Messages held by the log transport. Always empty for SMTP.
    pub async fn outbox(&self) -> Vec<(Envelope, String)> {
        match &self.transport {
            Transport::Smtp(_) => Vec::new(),
            Transport::Log(stub) => stub.messages().await,
        }
    }
}

fn parse_mailbox(value: &str) -> Result<Mailbox, MailError> {
    value.parse().map_err(|source| MailError::InvalidMailbox {
        value: value.to_string(),
        source,
    })
}

fn smtp_transport(config: &MailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
    let mut builder = if config.use_ssl {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)?
    } else if config.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
    };

    builder = builder
        .port(config.port)
        .timeout(Some(Duration::from_secs(config.timeout_seconds)));

    if !config.username.is_empty() {
        builder = builder.credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ));
    }

    Ok(builder.build())
}
