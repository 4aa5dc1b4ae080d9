//! Logged-in EMR web session.

use std::time::Duration;

use docflow_engine::{FlowError, FlowResult};

use crate::config::HttpTimeouts;
use crate::settings::EmrSettings;

/// Cookie-carrying HTTP session against the EMR.
///
/// Clones share the same cookie jar.
#[derive(Clone)]
pub struct EmrSession {
    client: reqwest::Client,
    base_url: String,
    settings: EmrSettings,
}

impl EmrSession {
    /// Create a new session; no request is made until [`login`](Self::login).
    pub fn new(settings: EmrSettings, timeouts: HttpTimeouts) -> FlowResult<Self> {
        let client = timeouts
            .client_builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!settings.verify_https)
            .build()
            .map_err(|e| FlowError::Configuration(format!("cannot build EMR client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            settings,
        })
    }

    /// Underlying HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Absolute URL for a path below the EMR base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Post credentials once.
    async fn try_login(&self) -> FlowResult<()> {
        let mut form = vec![
            ("username", self.settings.username.as_str()),
            ("password", self.settings.password.as_str()),
        ];
        if let Some(pin) = self.settings.pin.as_deref() {
            form.push(("pin", pin));
        }

        let response = self
            .client
            .post(self.url("login.do"))
            .form(&form)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(FlowError::Session(format!(
                "login rejected with status {}",
                response.status()
            )))
        }
    }

    /// Log in with exponential backoff up to the configured attempt ceiling.
    pub async fn login(&self) -> FlowResult<()> {
        let max_attempts = self.settings.login_max_attempts.max(1);
        let max_delay = Duration::from_millis(self.settings.login_max_delay_ms);
        let mut delay = Duration::from_millis(self.settings.login_initial_delay_ms);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.try_login().await {
                Ok(()) => {
                    tracing::debug!(attempt, "EMR login succeeded");
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tracing::warn!(
                            attempt,
                            max_attempts,
                            error = %e,
                            "EMR login failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay = std::cmp::min(delay * 2, max_delay);
                    }
                }
            }
        }

        Err(FlowError::Session(format!(
            "login failed after {} attempts: {}",
            max_attempts, last_error
        )))
    }

    /// End the session. Failures are only logged.
    pub async fn logout(&self) {
        if let Err(e) = self.client.get(self.url("logout.jsp")).send().await {
            tracing::debug!(error = %e, "EMR logout failed");
        }
    }
}

impl std::fmt::Debug for EmrSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmrSession")
            .field("base_url", &self.base_url)
            .field("username", &self.settings.username)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_settings(base_url: &str) -> EmrSettings {
    EmrSettings {
        base_url: base_url.to_string(),
        username: "moa".to_string(),
        password: "secret".to_string(),
        pin: None,
        verify_https: true,
        login_max_attempts: 3,
        login_initial_delay_ms: 1,
        login_max_delay_ms: 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let session =
            EmrSession::new(test_settings("https://emr.example.org/oscar/"), HttpTimeouts::default())
                .unwrap();
        assert_eq!(session.url("/login.do"), "https://emr.example.org/oscar/login.do");
        assert_eq!(
            session.url("dms/documents/7"),
            "https://emr.example.org/oscar/dms/documents/7"
        );
    }

    #[tokio::test]
    async fn test_login_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/login.do")
            .with_status(200)
            .create_async()
            .await;

        let session = EmrSession::new(test_settings(&server.url()), HttpTimeouts::default()).unwrap();
        session.login().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_gives_up_after_ceiling() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/login.do")
            .with_status(401)
            .expect(3)
            .create_async()
            .await;

        let session = EmrSession::new(test_settings(&server.url()), HttpTimeouts::default()).unwrap();
        let result = session.login().await;

        assert!(matches!(result, Err(FlowError::Session(_))));
        mock.assert_async().await;
    }
}
