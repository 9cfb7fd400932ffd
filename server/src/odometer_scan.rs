use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use axum::{
    Json,
    extract::{Multipart, State},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use ride_tracker_lib::odometer::{parse_odometer_reply, SCAN_PROMPT};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{auth::AuthUser, error::AppError, server_state::ServerState};

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Something that can look at a dashboard photo and answer with the odometer text.
#[async_trait]
pub trait OdometerReader: Send + Sync {
    async fn read_odometer(&self, image: &[u8], mime_type: &str) -> anyhow::Result<String>;
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[async_trait]
impl OdometerReader for GeminiClient {
    async fn read_odometer(&self, image: &[u8], mime_type: &str) -> anyhow::Result<String> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": SCAN_PROMPT },
                    { "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(image) } }
                ]
            }]
        });

        let response: GenerateResponse = self
            .http
            .post(format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?
            .error_for_status()
            .context("Gemini returned an error")?
            .json()
            .await
            .context("Gemini response was not understood")?;

        response
            .candidates
            .into_iter()
            .flat_map(|candidate| candidate.content.parts)
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("Gemini response had no text"))
    }
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub reading: String,
}

pub async fn scan_odometer(
    State(state): State<Arc<ServerState>>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<ScanResponse>, AppError> {
    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::MalformedPayload(e.to_string()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let mime_type = field.content_type().unwrap_or(DEFAULT_MIME_TYPE).to_string();
        let bytes = field.bytes().await.map_err(|e| AppError::MalformedPayload(e.to_string()))?;
        image = Some((bytes, mime_type));
    }

    let Some((bytes, mime_type)) = image.filter(|(bytes, _)| !bytes.is_empty()) else {
        return Err(AppError::MissingImage);
    };

    let Some(reader) = &state.odometer_reader else {
        tracing::error!("Odometer scan requested but no AI key is configured");
        return Err(AppError::AiService);
    };

    let reply = reader.read_odometer(&bytes, &mime_type).await.map_err(|err| {
        tracing::error!("Odometer scan failed: {:#}", err);
        AppError::AiService
    })?;

    match parse_odometer_reply(&reply) {
        Ok(reading) => {
            tracing::info!("Odometer of {} read as {}", user.owner_id, reading.value);
            Ok(Json(ScanResponse { reading: reading.raw }))
        }
        Err(err) => {
            tracing::warn!("{}", err);
            Err(AppError::UnreadableOdometer)
        }
    }
}
