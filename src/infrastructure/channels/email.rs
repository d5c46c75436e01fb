//! SMTP email channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use lettre::{
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
        response::Response,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    application::services::{
        NotificationChannel,
        template::{PLATFORM_NAME, SYSTEM_NOTICE},
    },
    config::EmailConfig,
    domain::{
        errors::NotifyError,
        models::{ChannelKind, SendRequest, SendResponse},
    },
    utils::{
        email_domain, escape_html, is_valid_email, sanitize_content,
        format::{event_text, priority_color, priority_icon, priority_text},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// TLS from the first byte, usually port 465.
    Implicit,
    /// Plain connection upgraded with STARTTLS, usually port 587.
    StartTls,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpEndpoint {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
}

/// A public mailbox provider whose SMTP endpoint is derived from the sender domain.
#[derive(Debug)]
pub struct KnownProvider {
    pub name: &'static str,
    domains: &'static [&'static str],
    host: &'static str,
    port: u16,
    security: SmtpSecurity,
    auth_hint: &'static str,
}

const AUTH_CODE_HINT: &str =
    "use the SMTP authorization code from the mailbox settings, not the login password";

static KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        name: "qq",
        domains: &["qq.com", "foxmail.com"],
        host: "smtp.qq.com",
        port: 465,
        security: SmtpSecurity::Implicit,
        auth_hint: AUTH_CODE_HINT,
    },
    KnownProvider {
        name: "163",
        domains: &["163.com"],
        host: "smtp.163.com",
        port: 465,
        security: SmtpSecurity::Implicit,
        auth_hint: AUTH_CODE_HINT,
    },
    KnownProvider {
        name: "126",
        domains: &["126.com"],
        host: "smtp.126.com",
        port: 465,
        security: SmtpSecurity::Implicit,
        auth_hint: AUTH_CODE_HINT,
    },
    KnownProvider {
        name: "gmail",
        domains: &["gmail.com"],
        host: "smtp.gmail.com",
        port: 587,
        security: SmtpSecurity::StartTls,
        auth_hint: "use an App Password; regular account passwords are rejected",
    },
    KnownProvider {
        name: "outlook",
        domains: &["outlook.com", "hotmail.com", "live.com"],
        host: "smtp.office365.com",
        port: 587,
        security: SmtpSecurity::StartTls,
        auth_hint: "check that SMTP AUTH is enabled for the mailbox",
    },
    KnownProvider {
        name: "yahoo",
        domains: &["yahoo.com"],
        host: "smtp.mail.yahoo.com",
        port: 465,
        security: SmtpSecurity::Implicit,
        auth_hint: "use an app password generated in the account security settings",
    },
    KnownProvider {
        name: "sina",
        domains: &["sina.com"],
        host: "smtp.sina.com",
        port: 465,
        security: SmtpSecurity::Implicit,
        auth_hint: AUTH_CODE_HINT,
    },
    KnownProvider {
        name: "sohu",
        domains: &["sohu.com"],
        host: "smtp.sohu.com",
        port: 465,
        security: SmtpSecurity::Implicit,
        auth_hint: AUTH_CODE_HINT,
    },
];

impl KnownProvider {
    pub fn detect(address: &str) -> Option<&'static KnownProvider> {
        let domain = email_domain(address)?;
        KNOWN_PROVIDERS
            .iter()
            .find(|provider| provider.domains.contains(&domain.as_str()))
    }

    fn endpoint(&self) -> SmtpEndpoint {
        SmtpEndpoint {
            host: self.host.to_string(),
            port: self.port,
            security: self.security,
        }
    }
}

pub struct EmailChannel {
    config: EmailConfig,
    provider: Option<&'static KnownProvider>,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        let provider = KnownProvider::detect(&config.from_address);
        Self { config, provider }
    }

    pub fn into_channel(self) -> Arc<dyn NotificationChannel> {
        Arc::new(self)
    }

    /// A known sender domain decides the endpoint; otherwise the configured host is used.
    pub fn endpoint(&self) -> Result<SmtpEndpoint, NotifyError> {
        if let Some(provider) = self.provider {
            return Ok(provider.endpoint());
        }

        let host = self.config.smtp_host.trim();
        if host.is_empty() {
            return Err(NotifyError::Config(format!(
                "no SMTP host configured and sender domain of {:?} is not a known provider",
                self.config.from_address
            )));
        }

        let (port, security) = match (self.config.smtp_port, self.config.use_tls) {
            (_, false) => (self.config.smtp_port.unwrap_or(25), SmtpSecurity::None),
            (Some(465) | None, true) => (465, SmtpSecurity::Implicit),
            (Some(port), true) => (port, SmtpSecurity::StartTls),
        };

        Ok(SmtpEndpoint {
            host: host.to_string(),
            port,
            security,
        })
    }

    fn username(&self) -> &str {
        if self.config.smtp_username.is_empty() {
            &self.config.from_address
        } else {
            &self.config.smtp_username
        }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let endpoint = self.endpoint()?;
        let tls = match endpoint.security {
            SmtpSecurity::None => Tls::None,
            SmtpSecurity::Implicit | SmtpSecurity::StartTls => {
                let params = TlsParameters::new(endpoint.host.clone())
                    .map_err(|err| NotifyError::Config(format!("invalid TLS parameters: {err}")))?;
                if endpoint.security == SmtpSecurity::Implicit {
                    Tls::Wrapper(params)
                } else {
                    Tls::Required(params)
                }
            }
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(endpoint.host)
            .port(endpoint.port)
            .tls(tls)
            .timeout(Some(self.config.settings.timeout));
        if !self.config.smtp_password.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.username().to_string(),
                self.config.smtp_password.clone(),
            ));
        }
        Ok(builder.build())
    }

    pub fn build_message(&self, request: &SendRequest) -> Result<Message, NotifyError> {
        let from_address: Address = self
            .config
            .from_address
            .parse()
            .map_err(|err| NotifyError::Config(format!("invalid sender address: {err}")))?;
        let from_name = Some(self.config.from_name.clone()).filter(|n| !n.is_empty());

        let to_address: Address = request
            .recipient_addr
            .trim()
            .parse()
            .map_err(|err| NotifyError::InvalidInput(format!("invalid recipient address: {err}")))?;
        let to_name = Some(request.recipient_name.clone()).filter(|n| !n.is_empty());

        let subject = match request.work_order_sn() {
            Some(sn) => format!("[{sn}] {}", request.subject),
            None => request.subject.clone(),
        };

        let body = MultiPart::alternative()
            .singlepart(SinglePart::plain(sanitize_content(&request.content)))
            .singlepart(SinglePart::html(render_html(request)));

        let body = if request.attachments.is_empty() {
            body
        } else {
            let mut mixed = MultiPart::mixed().multipart(body);
            for attachment in &request.attachments {
                let content_type = ContentType::parse(&attachment.content_type)
                    .or_else(|_| ContentType::parse("application/octet-stream"))
                    .map_err(|err| {
                        NotifyError::InvalidInput(format!(
                            "invalid content type for {}: {err}",
                            attachment.name
                        ))
                    })?;
                mixed = mixed.singlepart(
                    MailAttachment::new(attachment.name.clone())
                        .body(attachment.data.clone(), content_type),
                );
            }
            mixed
        };

        Message::builder()
            .from(Mailbox::new(from_name, from_address))
            .to(Mailbox::new(to_name, to_address))
            .subject(subject)
            .multipart(body)
            .map_err(|err| NotifyError::InvalidInput(format!("failed to build email: {err}")))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        request: &SendRequest,
    ) -> Result<SendResponse, NotifyError> {
        let recipient = request.recipient_addr.trim();
        if !is_valid_email(recipient) {
            return Err(NotifyError::InvalidInput(format!(
                "invalid email recipient {recipient:?}"
            )));
        }

        let message = self.build_message(request)?;
        let transport = self.transport()?;
        debug!(
            message_id = %request.message_id,
            provider = self.provider.map_or("custom", |p| p.name),
            attachments = request.attachments.len(),
            "sending email"
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NotifyError::Cancelled),
            result = transport.send(message) => result,
        };

        match result {
            Ok(response) => {
                let external_id = queued_id(&response);
                let summary: Vec<&str> = response.message().collect();
                Ok(SendResponse::sent(&request.message_id, external_id).with_provider_response(
                    serde_json::json!({
                        "code": response.code().to_string(),
                        "message": summary.join(" "),
                    }),
                ))
            }
            Err(err) => {
                let code = err.status().and_then(|c| c.to_string().parse::<u16>().ok());
                let mapped = classify_smtp_error(code, &err.to_string(), self.provider);
                warn!(message_id = %request.message_id, error = %mapped, "email delivery failed");
                Err(mapped)
            }
        }
    }

    fn validate(&self) -> Result<(), NotifyError> {
        if !is_valid_email(&self.config.from_address) {
            return Err(NotifyError::Config(format!(
                "invalid sender address {:?}",
                self.config.from_address
            )));
        }
        self.endpoint()?;
        if self.provider.is_some() && self.config.smtp_password.is_empty() {
            return Err(NotifyError::Config(
                "SMTP password is required for public mailbox providers".into(),
            ));
        }
        if self.config.settings.timeout.is_zero() {
            return Err(NotifyError::Config("email timeout must be positive".into()));
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.settings.enabled
    }

    fn max_retries(&self) -> u32 {
        self.config.settings.max_retries
    }

    fn retry_interval(&self) -> Duration {
        self.config.settings.retry_interval
    }
}

/// Extracts the queue id from a `250 ... queued as XYZ` reply.
fn queued_id(response: &Response) -> Option<String> {
    response.message().find_map(|line| {
        let (_, rest) = line.split_once("queued as ")?;
        rest.split_whitespace().next().map(str::to_string)
    })
}

/// Maps an SMTP failure to an error with a diagnosis. Permanent failures that
/// another attempt cannot fix come back as non-retryable variants.
pub fn classify_smtp_error(
    code: Option<u16>,
    detail: &str,
    provider: Option<&KnownProvider>,
) -> NotifyError {
    let lower = detail.to_ascii_lowercase();
    let hint = |base: String| match provider {
        Some(provider) => format!("{base} ({}: {})", provider.name, provider.auth_hint),
        None => base,
    };

    match code {
        Some(535) | Some(534) | Some(530) => {
            NotifyError::Config(hint(format!("SMTP authentication failed: {detail}")))
        }
        Some(550) | Some(551) | Some(553) => {
            NotifyError::InvalidInput(format!("recipient mailbox rejected: {detail}"))
        }
        Some(552) => NotifyError::provider(format!("recipient mailbox is full: {detail}")),
        Some(554) => NotifyError::InvalidInput(format!("message content rejected: {detail}")),
        Some(code) if (400..500).contains(&code) => {
            NotifyError::provider(format!("temporary SMTP failure {code}: {detail}"))
        }
        _ if lower.contains("timed out") || lower.contains("timeout") => {
            NotifyError::Timeout(format!("SMTP connection timed out: {detail}"))
        }
        _ if lower.contains("connection refused") => NotifyError::provider(format!(
            "SMTP connection refused, check host and port: {detail}"
        )),
        _ if lower.contains("certificate") || lower.contains("tls") => NotifyError::provider(
            format!("TLS handshake failed, check the port and TLS mode: {detail}"),
        ),
        _ if lower.contains("dns") || lower.contains("lookup") || lower.contains("resolve") => {
            NotifyError::provider(format!("SMTP host could not be resolved: {detail}"))
        }
        _ => NotifyError::provider(format!("SMTP delivery failed: {detail}")),
    }
}

fn render_html(request: &SendRequest) -> String {
    let work_order = request
        .work_order_sn()
        .unwrap_or_else(|| SYSTEM_NOTICE.to_string());
    let greeting = if request.recipient_name.is_empty() {
        String::from("Hello,")
    } else {
        format!("Hello {},", escape_html(&request.recipient_name))
    };
    let content = escape_html(&sanitize_content(&request.content)).replace('\n', "<br>");

    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333;">
  <div style="max-width: 640px; margin: 0 auto; border: 1px solid #e5e5e5; border-radius: 6px;">
    <div style="background: {color}; color: #fff; padding: 12px 16px; border-radius: 6px 6px 0 0;">
      <span>{icon} {priority}</span>
      <span style="float: right;">{work_order}</span>
    </div>
    <div style="padding: 16px;">
      <h2 style="margin-top: 0;">{subject}</h2>
      <p style="color: #888;">{event}</p>
      <p>{greeting}</p>
      <div>{content}</div>
    </div>
    <div style="padding: 8px 16px; font-size: 12px; color: #999; border-top: 1px solid #e5e5e5;">
      {platform} &middot; {sent_at}
    </div>
  </div>
</body>
</html>"#,
        color = priority_color(request.priority),
        icon = priority_icon(request.priority),
        priority = priority_text(request.priority),
        work_order = escape_html(&work_order),
        subject = escape_html(&request.subject),
        event = event_text(request.event_type),
        greeting = greeting,
        content = content,
        platform = PLATFORM_NAME,
        sent_at = Local::now().format("%Y-%m-%d %H:%M:%S"),
    )
}
