use envconfig::Envconfig;
use std::time::Duration;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub db_url: String,
    #[envconfig(from = "PORT", default = "3000")]
    pub port: u16,
    /// Public base url used in emailed links.
    #[envconfig(from = "APP_URL", default = "http://localhost:3000")]
    pub app_url: String,
    /// Base64 HMAC secret signing the session cookie.
    #[envconfig(from = "SESSION_SECRET")]
    pub session_secret: String,
    #[envconfig(from = "SESSION_IDLE_MINUTES", default = "15")]
    pub session_idle_minutes: u64,
    #[envconfig(from = "SESSION_LIFETIME_HOURS", default = "24")]
    pub session_lifetime_hours: u64,

    #[envconfig(from = "SMTP_RELAY", default = "smtp.gmail.com")]
    pub smtp_relay: String,
    #[envconfig(from = "EMAIL_USERNAME")]
    pub email_username: Option<String>,
    #[envconfig(from = "EMAIL_PASSWORD")]
    pub email_password: Option<String>,
    #[envconfig(from = "MAIL_FROM", default = "UCclub <admin@clubhub.com>")]
    pub mail_from: String,

    #[envconfig(from = "ADMIN_EMAIL", default = "admin@clubhub.com")]
    pub admin_email: String,
    #[envconfig(from = "ADMIN_PASSWORD")]
    pub admin_password: Option<String>,
    #[envconfig(from = "DEAN_EMAIL", default = "dean@clubhub.com")]
    pub dean_email: String,
    #[envconfig(from = "DEAN_PASSWORD")]
    pub dean_password: Option<String>,

    #[envconfig(from = "UPLOAD_DIR", default = "uploads")]
    pub upload_dir: String,
}

impl Config {
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_minutes * 60)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime_hours * 60 * 60)
    }
}
