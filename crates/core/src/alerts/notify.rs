//! Outbound alert notifications

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// A notification channel with no transport configured
///
/// Returned by notifiers so the dispatcher can count the job as skipped
/// rather than sent or failed.
#[derive(Debug, Error)]
#[error("no {0} transport configured")]
pub struct TransportUnavailable(pub &'static str);

/// Trait for notification transports
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()>;

    async fn send_chat(&self, webhook_url: &str, text: &str) -> Result<()>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct MailRequest<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Notifier posting JSON over HTTP
///
/// Chat messages go to the rule's incoming-webhook URL as `{"text": ...}`.
/// Email is handed to a mail relay as `{to, subject, body}`; without a relay
/// configured, email fails with [`TransportUnavailable`].
pub struct HttpNotifier {
    client: Client,
    mail_relay_url: Option<Url>,
}

impl HttpNotifier {
    pub fn new(mail_relay_url: Option<&str>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create notification HTTP client")?;
        let mail_relay_url = mail_relay_url
            .filter(|u| !u.is_empty())
            .map(Url::parse)
            .transpose()
            .context("Invalid mail relay URL")?;

        Ok(Self {
            client,
            mail_relay_url,
        })
    }

    async fn post_json<T: Serialize + Sync>(&self, url: Url, body: &T) -> Result<()> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url.host_str().unwrap_or("endpoint")))?;

        if !response.status().is_success() {
            bail!("{} responded with {}", url.host_str().unwrap_or("endpoint"), response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let Some(relay) = &self.mail_relay_url else {
            return Err(TransportUnavailable("email").into());
        };

        self.post_json(relay.clone(), &MailRequest { to, subject, body })
            .await
            .context("Email notification failed")?;
        debug!(to = %to, "Email notification sent");
        Ok(())
    }

    async fn send_chat(&self, webhook_url: &str, text: &str) -> Result<()> {
        let url = Url::parse(webhook_url).context("Invalid chat webhook URL")?;
        self.post_json(url, &ChatMessage { text })
            .await
            .context("Chat notification failed")?;
        debug!("Chat notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_chat_posts_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/T1")
            .match_body(Matcher::Json(serde_json::json!({"text": "High CPU usage: 91.00%"})))
            .with_status(200)
            .create_async()
            .await;

        let notifier = HttpNotifier::new(None, Duration::from_secs(2)).unwrap();
        notifier
            .send_chat(&format!("{}/hooks/T1", server.url()), "High CPU usage: 91.00%")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_error_status_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hooks/T1")
            .with_status(500)
            .create_async()
            .await;

        let notifier = HttpNotifier::new(None, Duration::from_secs(2)).unwrap();
        let result = notifier
            .send_chat(&format!("{}/hooks/T1", server.url()), "x")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_email_goes_through_relay() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/send")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "to": "ops@example.com",
                "subject": "[DockScope Alert] cpu"
            })))
            .with_status(202)
            .create_async()
            .await;

        let relay = format!("{}/send", server.url());
        let notifier = HttpNotifier::new(Some(&relay), Duration::from_secs(2)).unwrap();
        notifier
            .send_email("ops@example.com", "[DockScope Alert] cpu", "body")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_email_without_relay_is_unavailable() {
        let notifier = HttpNotifier::new(Some(""), Duration::from_secs(1)).unwrap();
        let err = notifier
            .send_email("ops@example.com", "s", "b")
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<TransportUnavailable>().is_some());
    }

    #[test]
    fn test_invalid_relay_url_is_rejected() {
        assert!(HttpNotifier::new(Some("not a url"), Duration::from_secs(1)).is_err());
    }
}
