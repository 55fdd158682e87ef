use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};

use super::{map_status, ProviderRaw, VisionError};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub(super) async fn read(
    http: &Client,
    api_key: &str,
    image_bytes: &[u8],
    model: &str,
    prompt: &str,
) -> Result<ProviderRaw, VisionError> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
    let url = format!("{API_BASE}/{model}:generateContent?key={api_key}");

    let body = json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                { "inline_data": { "mime_type": "image/jpeg", "data": encoded } }
            ]
        }]
    });

    let response = http
        .post(&url)
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

    let json_text = payload["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or(VisionError::Unavailable)?
        .to_string();

    let tokens_in = payload["usageMetadata"]["promptTokenCount"]
        .as_u64()
        .unwrap_or(0) as u32;
    let tokens_out = payload["usageMetadata"]["candidatesTokenCount"]
        .as_u64()
        .unwrap_or(0) as u32;

    Ok(ProviderRaw {
        json_text,
        tokens_in,
        tokens_out,
        model: model.to_string(),
        provider: "gemini".to_string(),
    })
}
