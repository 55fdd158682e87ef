use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};

use super::{map_status, ProviderRaw, VisionError};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(super) async fn read(
    http: &Client,
    api_key: &str,
    image_bytes: &[u8],
    model: &str,
    prompt: &str,
) -> Result<ProviderRaw, VisionError> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);

    let body = json!({
        "model": model,
        "max_tokens": 1024,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "image", "source": { "type": "base64", "media_type": "image/jpeg", "data": encoded } },
                { "type": "text", "text": prompt }
            ]
        }]
    });

    let response = http
        .post(API_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body)
        .send()
        .await
        .map_err(|_| VisionError::Unavailable)?;

    if !response.status().is_success() {
        return Err(map_status(response.status()));
    }

    let payload: JsonValue = response
        .json()
        .await
        .map_err(|_| VisionError::Unavailable)?;

    let json_text = payload["content"][0]["text"]
        .as_str()
        .ok_or(VisionError::Unavailable)?
        .to_string();

    let tokens_in = payload["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
    let tokens_out = payload["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;

    Ok(ProviderRaw {
        json_text,
        tokens_in,
        tokens_out,
        model: model.to_string(),
        provider: "claude".to_string(),
    })
}
