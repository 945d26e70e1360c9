use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;

/// Header values must be latin1-safe; anything beyond that is stripped
/// down to ASCII.
fn encode_header(value: &str) -> String {
    if value.chars().all(|c| (c as u32) < 256) {
        return value.to_string();
    }
    value.chars().filter(char::is_ascii).collect()
}

/// Sends one-shot notifications to an ntfy topic. Every failure is
/// logged and swallowed; notifications never stall the pipeline.
pub struct Notifier {
    client: Client,
    topic_url: Option<String>,
}

impl Notifier {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.ntfy_request_timeout))
            .user_agent("spindle/0.1.0")
            .build()
            .unwrap_or_default();

        Notifier {
            client,
            topic_url: config.ntfy_topic.clone(),
        }
    }

    pub async fn send(
        &self,
        message: &str,
        title: Option<&str>,
        priority: &str,
        tags: Option<&str>,
    ) -> bool {
        let Some(topic_url) = &self.topic_url else {
            debug!("No ntfy topic configured, skipping notification");
            return false;
        };

        let mut request = self.client.post(topic_url).body(message.to_string());
        if let Some(title) = title {
            request = request.header("Title", encode_header(title));
        }
        if priority != "default" {
            request = request.header("Priority", priority);
        }
        if let Some(tags) = tags {
            request = request.header("Tags", tags);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Sent notification: {}", title.unwrap_or(message));
                true
            }
            Ok(response) => {
                warn!("Notification failed with status {}", response.status());
                false
            }
            Err(e) => {
                warn!("Failed to send notification: {e}");
                false
            }
        }
    }

    pub async fn notify_disc_detected(&self, disc_title: &str, disc_type: &str) {
        self.send(
            &format!("Detected {disc_type} disc: {disc_title}"),
            Some("Disc Detected"),
            "default",
            Some("spindle,disc,detected"),
        )
        .await;
    }

    pub async fn notify_rip_started(&self, disc_title: &str) {
        self.send(
            &format!("Started ripping: {disc_title}"),
            Some("Ripping Started"),
            "default",
            Some("spindle,rip,started"),
        )
        .await;
    }

    pub async fn notify_rip_completed(&self, disc_title: &str, duration: &str) {
        self.send(
            &format!("Completed ripping: {disc_title} (took {duration})"),
            Some("Ripping Complete"),
            "default",
            Some("spindle,rip,completed"),
        )
        .await;
    }

    pub async fn notify_media_added(&self, title: &str, media_type: &str) {
        let header = format!("{media_type} Added");
        self.send(
            &format!("Added to library: {title}"),
            Some(header.as_str()),
            "default",
            Some("spindle,library,added"),
        )
        .await;
    }

    pub async fn notify_unidentified_media(&self, name: &str) {
        self.send(
            &format!("Could not identify: {name}\nMoved to review directory"),
            Some("Unidentified Media"),
            "default",
            Some("spindle,unidentified,review"),
        )
        .await;
    }

    pub async fn notify_error(&self, error_message: &str, context: Option<&str>) {
        let message = match context {
            Some(context) => format!("Error: {error_message}\nContext: {context}"),
            None => format!("Error: {error_message}"),
        };
        self.send(
            &message,
            Some("Spindle Error"),
            "high",
            Some("spindle,error,alert"),
        )
        .await;
    }

    pub async fn test_notification(&self) -> bool {
        self.send(
            "Spindle notification system is working correctly!",
            Some("Test Notification"),
            "default",
            Some("spindle,test"),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_latin1_passthrough() {
        assert_eq!(encode_header("Disc Détecté"), "Disc Détecté");
        assert_eq!(encode_header("plain ascii"), "plain ascii");
    }

    #[test]
    fn test_encode_header_strips_wide_chars() {
        assert_eq!(encode_header("Done ✅ now"), "Done  now");
        assert_eq!(encode_header("日本語"), "");
    }

    #[tokio::test]
    async fn test_send_without_topic_is_noop() {
        let notifier = Notifier::new(&Config::default());
        assert!(!notifier.send("hello", None, "default", None).await);
    }
}
