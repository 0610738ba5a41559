use axum::{
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::auth::AppState;
use crate::error::ApiError;

const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "openai/gpt-oss-120b:free";

/// The fixed prompt: exactly three open-ended questions, `||`-separated, for
/// an anonymous messaging audience. Callers split the relayed text on `||`.
const SUGGESTION_PROMPT: &str = "Create a list of three open-ended and engaging questions \
formatted as a single string. Each question should be separated by '||'. These questions are \
for an anonymous social messaging platform and should be suitable for a diverse audience. \
Avoid personal or sensitive topics, focusing instead on universal themes that encourage \
friendly interaction. For example, your output should be structured like this: \
'What's a hobby you've recently started?||If you could have dinner with any historical \
figure, who would it be?||What's a simple thing that makes you happy?'. Ensure the questions \
are intriguing, foster curiosity, and contribute to a positive and welcoming conversational \
environment.";

/// Streaming client for the OpenRouter chat-completions API.
pub struct Suggester {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl Suggester {
    pub fn new(api_key: Option<String>, model: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        }
    }
}

/// Relays the model's token stream to the caller as plain text, as it
/// arrives. A failure before the first byte is a 503; a mid-stream failure
/// just truncates the output — no retry, no resumption.
pub async fn suggest_messages(State(state): State<AppState>) -> Result<Response, ApiError> {
    let Some(api_key) = state.suggester.api_key.clone() else {
        return Err(ApiError::ServiceUnavailable("Suggestion service is not configured".into()));
    };

    let request = serde_json::json!({
        "model": state.suggester.model,
        "messages": [{ "role": "user", "content": SUGGESTION_PROMPT }],
        "stream": true,
    });

    let resp = state
        .suggester
        .client
        .post(OPENROUTER_ENDPOINT)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| {
            warn!("Suggestion upstream unreachable: {}", e);
            ApiError::ServiceUnavailable("Suggestion service unavailable".into())
        })?;

    if !resp.status().is_success() {
        warn!("Suggestion upstream returned {}", resp.status());
        return Err(ApiError::ServiceUnavailable("Suggestion service unavailable".into()));
    }

    let mut upstream = resp.bytes_stream();

    let stream = async_stream::stream! {
        let mut buf = String::new();
        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    debug!("Suggestion stream ended early: {}", e);
                    return;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited; anything after the last
            // newline stays buffered until the next chunk.
            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim().to_string();
                buf.drain(..=pos);
                if let Some(token) = sse_data_token(&line) {
                    yield Ok::<_, std::convert::Infallible>(Bytes::from(token));
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("response build failed: {e}")))
}

/// Pull the delta text out of one `data: {...}` SSE line. Keep-alives,
/// `[DONE]`, and frames without content yield nothing.
fn sse_data_token(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let token = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;

    if token.is_empty() { None } else { Some(token.to_string()) }
}
