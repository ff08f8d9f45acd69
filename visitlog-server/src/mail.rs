//! Outgoing mail for the password reset flow.

use std::sync::Arc;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use tinytemplate::TinyTemplate;
use tracing::{info, warn};

use crate::server::config::AppConfig;

/// How long a reset code stays valid, in minutes.
pub const RESET_CODE_TTL_MINUTES: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail is not configured")]
    NotConfigured,

    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("message build failed: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("template error: {0}")]
    Template(#[from] tinytemplate::error::Error),
}

/// Delivers password reset codes. Implementations are blocking; call them
/// from `spawn_blocking`.
pub trait Mailer: Send + Sync {
    fn send_reset_code(&self, to: &str, code: &str) -> Result<(), MailError>;
}

const SUBJECT: &str = "Password Reset Verification Code";

static TEXT_TEMPLATE: &str = "Hello,

Your verification code is: {code}

The code expires in {ttl_minutes} minutes. If you did not request a password reset, you can ignore this email.

Library Attendance System
";

static HTML_TEMPLATE: &str = r#"<html><body style="font-family: Arial, sans-serif;">
<h2>Password Reset</h2>
<p>Your verification code is:</p>
<p style="font-size: 28px; font-weight: bold; letter-spacing: 6px;">{code}</p>
<p>The code expires in {ttl_minutes} minutes. If you did not request a password reset, you can ignore this email.</p>
<p>Library Attendance System</p>
</body></html>"#;

#[derive(Serialize)]
struct CodeContext<'a> {
    code: &'a str,
    ttl_minutes: i64,
}

/// Renders the plain-text and HTML bodies for a reset code.
pub fn render_reset_bodies(code: &str) -> Result<(String, String), MailError> {
    let mut tt = TinyTemplate::new();
    tt.add_template("text", TEXT_TEMPLATE)?;
    tt.add_template("html", HTML_TEMPLATE)?;
    let ctx = CodeContext {
        code,
        ttl_minutes: RESET_CODE_TTL_MINUTES,
    };
    let html = tt.render("html", &ctx)?;
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    let text = tt.render("text", &ctx)?;
    Ok((text, html))
}

/// STARTTLS SMTP delivery via `lettre`.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
    /// Log the code instead of failing when delivery breaks (debug deployments).
    log_on_failure: bool,
}

impl SmtpMailer {
    pub fn new(
        server: &str,
        port: u16,
        username: &str,
        password: &str,
        from: &str,
        log_on_failure: bool,
    ) -> Result<Self, MailError> {
        let transport = SmtpTransport::starttls_relay(server)?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();
        Ok(Self {
            transport,
            from: from.parse()?,
            log_on_failure,
        })
    }

    fn deliver(&self, to: &str, code: &str) -> Result<(), MailError> {
        let (text, html) = render_reset_bodies(code)?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(SUBJECT)
            .multipart(MultiPart::alternative_plain_html(text, html))?;
        self.transport.send(&email)?;
        Ok(())
    }
}

impl Mailer for SmtpMailer {
    fn send_reset_code(&self, to: &str, code: &str) -> Result<(), MailError> {
        match self.deliver(to, code) {
            Ok(()) => {
                info!(to, "reset code sent");
                Ok(())
            }
            Err(e) if self.log_on_failure => {
                warn!(to, code, error = %e, "mail: delivery failed, code logged instead");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Writes the code to the log. Used in debug mode when no SMTP credentials exist.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_reset_code(&self, to: &str, code: &str) -> Result<(), MailError> {
        warn!(to, code, "mail: no SMTP credentials, reset code logged");
        Ok(())
    }
}

/// Rejects every send; password reset is unavailable.
pub struct DisabledMailer;

impl Mailer for DisabledMailer {
    fn send_reset_code(&self, _to: &str, _code: &str) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}

/// Picks the mailer for `config`: SMTP when credentials exist, the log
/// mailer in debug mode, otherwise a mailer that always fails.
pub fn mailer_from_config(config: &AppConfig) -> Result<Arc<dyn Mailer>, MailError> {
    match config.mail.credentials() {
        Some((user, pass)) => {
            let from = config.mail.from.as_deref().unwrap_or(user);
            Ok(Arc::new(SmtpMailer::new(
                &config.mail.server,
                config.mail.port,
                user,
                pass,
                from,
                config.debug,
            )?))
        }
        None if config.debug => Ok(Arc::new(LogMailer)),
        None => {
            warn!("mail: MAIL_USERNAME/MAIL_PASSWORD not set, password reset disabled");
            Ok(Arc::new(DisabledMailer))
        }
    }
}
