//! Email over SMTP.

use async_trait::async_trait;
use eventping_core::{
    config::{EmailConfig, SmtpTls},
    ChannelKind, ReminderMessage,
};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, Error as SmtpError},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use crate::{
    channel::Channel,
    error::ChannelError,
    render::render,
    types::{ChannelStatus, StatusCell},
};

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    status: StatusCell,
}

impl EmailChannel {
    pub fn new(cfg: &EmailConfig) -> Result<Self, ChannelError> {
        let mut builder = match cfg.tls {
            SmtpTls::Wrapper => AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host),
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host),
            SmtpTls::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &cfg.host,
            )),
        }
        .map_err(|e| ChannelError::ConfigError(format!("smtp relay {}: {e}", cfg.host)))?;

        if let Some(port) = cfg.port {
            builder = builder.port(port);
        }
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from: Mailbox = cfg
            .from
            .parse()
            .map_err(|e| ChannelError::ConfigError(format!("invalid from address: {e}")))?;

        Ok(Self {
            transport: builder.build(),
            from,
            status: StatusCell::new(),
        })
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Connecting);
        match self.transport.test_connection().await {
            Ok(true) => {
                self.status.set(ChannelStatus::Connected);
                Ok(())
            }
            Ok(false) => {
                let reason = "SMTP server did not answer NOOP".to_string();
                self.status.set(ChannelStatus::Error(reason.clone()));
                Err(ChannelError::ConnectionFailed(reason))
            }
            Err(e) => {
                let err = classify_smtp(e);
                self.status.set(ChannelStatus::Error(err.to_string()));
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, recipient: &str, message: &ReminderMessage) -> Result<(), ChannelError> {
        let to: Mailbox = recipient
            .trim()
            .parse()
            .map_err(|e| ChannelError::InvalidRecipient(format!("{recipient}: {e}")))?;

        let rendered = render(ChannelKind::Email, message);
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(rendered.subject.unwrap_or_default())
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .map_err(|e| ChannelError::Rejected(format!("could not build message: {e}")))?;

        self.transport.send(email).await.map_err(classify_smtp)?;
        debug!("email reminder accepted by SMTP server");
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }
}

/// 5xx SMTP replies are permanent; everything else (4xx, TLS, I/O) is retried.
fn classify_smtp(err: SmtpError) -> ChannelError {
    if err.is_permanent() {
        ChannelError::Rejected(err.to_string())
    } else if err.is_timeout() {
        ChannelError::Transient(format!("smtp timeout: {err}"))
    } else if err.is_transient() {
        ChannelError::Transient(err.to_string())
    } else {
        ChannelError::ConnectionFailed(err.to_string())
    }
}
