//! Email notification delivery via SMTP.
//!
//! [`EmailNotifier`] wraps the `lettre` async SMTP transport to tell a
//! submitter that their analysis ended. Configuration is loaded from
//! environment variables; if `SMTP_HOST` is not set,
//! [`EmailConfig::from_env`] returns `None` and the caller should fall back
//! to [`NullNotifier`](crate::NullNotifier).

use std::sync::LazyLock;

use async_trait::async_trait;
use phylo_core::{AnalysisId, AnalysisStatus, NotificationTarget};
use regex::Regex;

use crate::notifier::{NotifyError, Notifier};

/// Addresses that do not match are silently skipped.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("valid regex")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Configuration for the SMTP notifier.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    /// Base URL of the result page; the analysis id is appended.
    pub result_url: String,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` or `SMTP_FROM` is not set.
    ///
    /// | Variable        | Required | Default |
    /// |-----------------|----------|---------|
    /// | `SMTP_HOST`     | yes      |         |
    /// | `SMTP_FROM`     | yes      |         |
    /// | `SMTP_PORT`     | no       | `587`   |
    /// | `SMTP_USER`     | no       |         |
    /// | `SMTP_PASSWORD` | no       |         |
    /// | `RESULT_URL`    | no       | `""`    |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok().filter(|h| !h.is_empty())?;
        let from_address = std::env::var("SMTP_FROM").ok().filter(|f| !f.is_empty())?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address,
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            result_url: std::env::var("RESULT_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// EmailNotifier
// ---------------------------------------------------------------------------

/// Sends one plain-text email per ended analysis.
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn subject(target: &NotificationTarget) -> String {
        match target.run_name.as_deref() {
            Some(name) if !name.is_empty() => format!("Support analysis results: {name}"),
            _ => "Support analysis results".to_string(),
        }
    }

    fn body(&self, status: AnalysisStatus, id: &AnalysisId) -> String {
        format!(
            "Hello,\n\n\
             Your analysis has ended with status: '{}'.\n\
             The result page is available at:\n {}/{}\n",
            status.label(),
            self.config.result_url,
            id
        )
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(
        &self,
        status: AnalysisStatus,
        id: &AnalysisId,
        target: &NotificationTarget,
    ) -> Result<(), NotifyError> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials,
            AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        };

        let Some(to_email) = target.email.as_deref().filter(|e| is_valid_email(e)) else {
            tracing::debug!(analysis_id = %id, "No valid notification address, skipping email");
            return Ok(());
        };

        let email = Message::builder()
            .from(self.config.from_address.parse()?)
            .to(to_email.parse()?)
            .subject(Self::subject(target))
            .header(ContentType::TEXT_PLAIN)
            .body(self.body(status, id))
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let mailer = transport_builder.build();
        mailer.send(email).await?;

        tracing::info!(to = to_email, analysis_id = %id, %status, "Notification email sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
