use crate::models::Event;
use axum::async_trait;
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, Address, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use url::Url;

/// Delivery backend for outbound mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, msg: Message) -> anyhow::Result<()>;
}

pub struct SmtpTransport(AsyncSmtpTransport<Tokio1Executor>);

impl SmtpTransport {
    pub fn new(relay: &str, username: String, password: String) -> anyhow::Result<SmtpTransport> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(relay)?
            .credentials(Credentials::new(username, password))
            .build();
        Ok(SmtpTransport(mailer))
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, msg: Message) -> anyhow::Result<()> {
        self.0.send(msg).await?;
        Ok(())
    }
}

/// Used when no SMTP credentials are configured: mail is only logged.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, msg: Message) -> anyhow::Result<()> {
        let to = msg.envelope().to().iter().map(|a| a.to_string()).collect::<Vec<_>>();
        tracing::info!(?to, "mail transport disabled, dropping message");
        Ok(())
    }
}

#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn MailTransport>,
    from: Mailbox,
    app_url: Url,
}

impl Mailer {
    pub fn new(transport: Arc<dyn MailTransport>, from: Mailbox, app_url: Url) -> Mailer {
        Mailer {
            transport,
            from,
            app_url,
        }
    }

    /// Absolute link to `path` on the site carrying a one-time token.
    pub fn link(&self, path: &str, token: &str) -> String {
        let mut url = self.app_url.join(path).unwrap_or_else(|_| self.app_url.clone());
        url.query_pairs_mut().append_pair("token", token);
        url.to_string()
    }

    fn compose(&self, to: &str, subject: &str, body: String) -> anyhow::Result<Message> {
        let address = to.parse::<Address>()?;
        Ok(Message::builder()
            .from(self.from.clone())
            .to(Mailbox::new(None, address))
            .subject(subject)
            .body(body)?)
    }

    pub async fn send_now(&self, to: &str, subject: &str, body: String) -> anyhow::Result<()> {
        let msg = self.compose(to, subject, body)?;
        self.transport.deliver(msg).await
    }

    /// Sends in the background. Failures are logged, never retried.
    pub fn dispatch(&self, to: &str, subject: &str, body: String) {
        let mailer = self.clone();
        let to = to.to_string();
        let subject = subject.to_string();
        tokio::spawn(async move {
            if let Err(e) = mailer.send_now(&to, &subject, body).await {
                tracing::warn!(%to, %subject, error = %e, "failed to send email");
            }
        });
    }

    pub fn send_verification(&self, to: &str, token: &str) {
        let link = self.link("/verify-email", token);
        self.dispatch(
            to,
            "Verify your email for UCclub",
            format!("Please open this link to verify your email:\n\n{link}\n"),
        );
    }

    pub fn send_password_reset(&self, to: &str, token: &str) {
        let mut link = self
            .app_url
            .join("/reset-password/")
            .and_then(|u| u.join(token))
            .unwrap_or_else(|_| self.app_url.clone());
        link.set_query(None);
        self.dispatch(
            to,
            "Reset your password - UCclub",
            format!(
                "You requested a password reset. Open this link within the next hour to choose a new password:\n\n{link}\n\nIf you didn't request this, ignore this email."
            ),
        );
    }

    pub fn send_rsvp_confirmation(&self, to: &str, event: &Event) {
        let location = event.location.as_deref().unwrap_or("TBA");
        let when = event
            .starts_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "TBA".to_string());
        self.dispatch(
            to,
            &format!("RSVP Confirmed: {}", event.title),
            format!("You RSVPed for {} at {location} on {when}.", event.title),
        );
    }

    pub fn send_notification(
        &self,
        to: &str,
        club_name: &str,
        item_type: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) {
        let mut body = format!("Hello,\n\n{club_name} has posted a new {item_type}:\n");
        if let Some(title) = title {
            body.push_str(&format!("\nTitle: {title}"));
        }
        if let Some(description) = description {
            body.push_str(&format!("\nDescription: {description}"));
        }
        body.push_str("\n\nCheck it out on the platform!");
        self.dispatch(to, &format!("New {item_type} from {club_name}"), body);
    }

    pub fn send_club_decision(&self, to: &str, club_name: &str, approved: bool, notes: &str) {
        let body = if approved {
            format!("Congratulations! {club_name} has been approved. You can now log in with your club email.")
        } else {
            format!("Unfortunately the registration request for {club_name} was rejected.\n\nNotes: {notes}")
        };
        self.dispatch(to, &format!("Club registration: {club_name}"), body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Message>>);

    #[async_trait]
    impl MailTransport for Recorder {
        async fn deliver(&self, msg: Message) -> anyhow::Result<()> {
            self.0.lock().await.push(msg);
            Ok(())
        }
    }

    fn mailer(transport: Arc<dyn MailTransport>) -> Mailer {
        Mailer::new(
            transport,
            "UCclub <admin@clubhub.com>".parse().unwrap(),
            Url::parse("https://clubs.example.edu").unwrap(),
        )
    }

    #[test]
    fn links_carry_the_token() {
        let mailer = mailer(Arc::new(LogTransport));
        assert_eq!(
            mailer.link("/verify-email", "abc123"),
            "https://clubs.example.edu/verify-email?token=abc123"
        );
    }

    #[tokio::test]
    async fn messages_reach_the_transport() {
        let recorder = Arc::new(Recorder::default());
        let mailer = mailer(recorder.clone());
        mailer
            .send_now("201012345@psu.edu.sa", "Hello", "body".to_string())
            .await
            .unwrap();

        let sent = recorder.0.lock().await;
        assert_eq!(sent.len(), 1);
        let raw = String::from_utf8(sent[0].formatted()).unwrap();
        assert!(raw.contains("To: 201012345@psu.edu.sa"));
        assert!(raw.contains("Subject: Hello"));
    }

    #[tokio::test]
    async fn invalid_recipients_fail() {
        let mailer = mailer(Arc::new(LogTransport));
        assert!(mailer.send_now("not an address", "Hi", String::new()).await.is_err());
    }
}
