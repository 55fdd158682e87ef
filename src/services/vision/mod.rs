pub mod claude;
pub mod gemini;
pub mod prompt_profiles;

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::time::timeout;

use crate::models::VisionTarget;

const DEFAULT_PROVIDER_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision provider unavailable")]
    Unavailable,
    #[error("vision provider http error: {status}")]
    ProviderHttpError { status: u16 },
    #[error("vision provider rate limited")]
    RateLimited,
    #[error("unknown vision provider '{0}'")]
    UnknownProvider(String),
    #[error("unknown prompt profile '{0}'")]
    UnknownPromptProfile(String),
}

/// Uniform result shape every provider variant converges on (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct ProviderRaw {
    pub json_text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub model: String,
    pub provider: String,
}

/// One backend per variant, dispatched by name the way the teacher dispatches
/// external-device protocols in `services/external_devices.rs::poll_device`
/// (`match config.protocol.as_str() { "modbus_tcp" => ..., "snmp" => ... }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    Gemini,
    Claude,
}

impl ProviderKind {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "gemini" => Some(ProviderKind::Gemini),
            "claude" => Some(ProviderKind::Claude),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct VisionClient {
    http: Client,
    gemini_api_key: Option<String>,
    claude_api_key: Option<String>,
}

impl VisionClient {
    pub fn new(http: Client, gemini_api_key: Option<String>, claude_api_key: Option<String>) -> Self {
        Self {
            http,
            gemini_api_key,
            claude_api_key,
        }
    }

    pub async fn read(
        &self,
        image_bytes: &[u8],
        target: &VisionTarget,
    ) -> Result<ProviderRaw, VisionError> {
        let prompt = prompt_profiles::prompt_text(&target.prompt_profile)
            .ok_or_else(|| VisionError::UnknownPromptProfile(target.prompt_profile.clone()))?;
        let kind = ProviderKind::parse(&target.provider)
            .ok_or_else(|| VisionError::UnknownProvider(target.provider.clone()))?;

        let call = async {
            match kind {
                ProviderKind::Gemini => {
                    let key = self.gemini_api_key.as_deref().unwrap_or_default();
                    gemini::read(&self.http, key, image_bytes, &target.model, prompt).await
                }
                ProviderKind::Claude => {
                    let key = self.claude_api_key.as_deref().unwrap_or_default();
                    claude::read(&self.http, key, image_bytes, &target.model, prompt).await
                }
            }
        };

        timeout(DEFAULT_PROVIDER_DEADLINE, call)
            .await
            .map_err(|_| VisionError::Unavailable)?
    }
}

fn map_status(status: reqwest::StatusCode) -> VisionError {
    if status.as_u16() == 429 {
        VisionError::RateLimited
    } else {
        VisionError::ProviderHttpError {
            status: status.as_u16(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_providers() {
        assert_eq!(ProviderKind::parse("gemini"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::parse("claude"), Some(ProviderKind::Claude));
        assert_eq!(ProviderKind::parse("bogus"), None);
    }
}
