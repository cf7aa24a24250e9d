use std::time::Duration;

use crate::errors::UploadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub body: Vec<u8>,
    pub gzipped: bool,
    pub nickname: Option<String>,
}

/// Blocking HTTP POST of one upload batch.
///
/// Returns the response status for any response the server sent, including
/// 4xx and 5xx. `Err` is reserved for transport failures (refused connection,
/// timeout, TLS).
pub trait HttpSubmitter: Send + Sync {
    fn submit(&self, request: &SubmitRequest) -> Result<u16, UploadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitterConfig {
    pub url: String,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

pub struct UreqSubmitter {
    config: SubmitterConfig,
    agent: ureq::Agent,
}

impl UreqSubmitter {
    pub fn new(config: SubmitterConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .timeout_write(config.read_timeout)
            .user_agent(&config.user_agent)
            .build();
        Self { config, agent }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl HttpSubmitter for UreqSubmitter {
    fn submit(&self, request: &SubmitRequest) -> Result<u16, UploadError> {
        let mut req = self
            .agent
            .post(&self.config.url)
            .set("Content-Type", "application/json");
        if request.gzipped {
            req = req.set("Content-Encoding", "gzip");
        }
        if let Some(nickname) = request.nickname.as_deref() {
            req = req.set("X-Nickname", nickname);
        }

        match req.send_bytes(&request.body) {
            Ok(resp) => Ok(resp.status()),
            Err(ureq::Error::Status(code, _resp)) => Ok(code),
            Err(ureq::Error::Transport(err)) => Err(UploadError::Transport(err.to_string())),
        }
    }
}
