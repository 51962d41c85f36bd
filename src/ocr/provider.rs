use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

use crate::config::{OcrConfig, OcrProviderType};

/// One line of text detected in a photo, with the provider's confidence.
#[derive(Debug, Clone)]
pub struct TextLine {
    pub text: String,
    pub confidence: f32,
}

/// Trait for OCR providers that can read bib numbers off a photo.
///
/// Implementations are selected at construction time (`create_provider`);
/// callers only see this contract.
pub trait OcrProvider: Send + Sync {
    /// Extract candidate text lines from the image at the given path.
    fn extract_text(&self, image_path: &Path) -> Result<Vec<TextLine>>;

    /// Provider name recorded on each photo for auditing and cost attribution.
    fn name(&self) -> &'static str;
}

const BIB_OCR_PROMPT: &str = r#"Read every race bib number visible in this photo.

A bib number is the large printed number a runner wears on their chest or back.
Ignore sponsor text, finish clocks, distance markers and dates.

Return the results as JSON in this exact format:
{
  "detections": [
    {"text": "<digits>", "confidence": <number 0-1>}
  ]
}

If no bib numbers are visible, return: {"detections": []}

Return ONLY the JSON, no other text."#;

#[derive(Debug, Deserialize)]
struct OcrDetections {
    detections: Vec<OcrDetection>,
}

#[derive(Debug, Deserialize)]
struct OcrDetection {
    text: String,
    #[serde(default = "default_detection_confidence")]
    confidence: f32,
}

fn default_detection_confidence() -> f32 {
    0.5
}

fn parse_detections(content: &str) -> Result<Vec<TextLine>> {
    let json_str = extract_json(content);
    let parsed: OcrDetections = serde_json::from_str(&json_str)
        .map_err(|e| anyhow!("Failed to parse OCR JSON: {} - Response was: {}", e, content))?;
    Ok(parsed
        .detections
        .into_iter()
        .map(|d| TextLine {
            text: d.text,
            confidence: d.confidence.clamp(0.0, 1.0),
        })
        .collect())
}

// ============================================================================
// OpenAI-compatible provider (works with OpenAI, LM Studio, and compatible APIs)
// ============================================================================

pub struct OpenAICompatibleOcr {
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Vec<OpenAIContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum OpenAIContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

impl OpenAICompatibleOcr {
    pub fn new(endpoint: &str, model: &str, api_key: Option<&str>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: api_key.map(|s| s.to_string()),
        }
    }
}

impl OcrProvider for OpenAICompatibleOcr {
    fn extract_text(&self, image_path: &Path) -> Result<Vec<TextLine>> {
        let (base64_image, mime_type) = load_and_encode_image(image_path, 1536)?;
        let data_url = format!("data:{};base64,{}", mime_type, base64_image);

        let request = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: vec![
                    OpenAIContentPart::Text {
                        text: BIB_OCR_PROMPT.to_string(),
                    },
                    OpenAIContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: 500,
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.endpoint);

        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(120))
            .build();

        let mut req = agent.post(&url).set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }

        let response = req
            .send_json(&request)
            .map_err(|e| anyhow!("OCR request failed: {}", e))?;

        let chat_response: OpenAIChatResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse OCR response: {}", e))?;

        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("No response from OCR provider"))?;

        parse_detections(&content)
    }

    fn name(&self) -> &'static str {
        "OpenAI-compatible"
    }
}

// ============================================================================
// Ollama provider (local fallback)
// ============================================================================

pub struct OllamaOcr {
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaOcr {
    pub fn new(endpoint: Option<&str>, model: &str) -> Self {
        Self {
            endpoint: endpoint.unwrap_or("http://localhost:11434").to_string(),
            model: model.to_string(),
        }
    }
}

impl OcrProvider for OllamaOcr {
    fn extract_text(&self, image_path: &Path) -> Result<Vec<TextLine>> {
        let (base64_image, _mime_type) = load_and_encode_image(image_path, 1536)?;

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: BIB_OCR_PROMPT.to_string(),
            images: vec![base64_image],
            stream: false,
        };

        let url = format!("{}/api/generate", self.endpoint);

        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(180))
            .build();

        let response = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_json(&request)
            .map_err(|e| anyhow!("Ollama OCR request failed: {}", e))?;

        let ollama_response: OllamaResponse = response
            .into_json()
            .map_err(|e| anyhow!("Failed to parse Ollama OCR response: {}", e))?;

        parse_detections(&ollama_response.response)
    }

    fn name(&self) -> &'static str {
        "Ollama"
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an OCR provider based on configuration
pub fn create_provider(config: &OcrConfig) -> Box<dyn OcrProvider> {
    match config.provider {
        OcrProviderType::OpenAI => Box::new(OpenAICompatibleOcr::new(
            "https://api.openai.com/v1",
            &config.model,
            config.api_key.as_deref(),
        )),
        OcrProviderType::LmStudio => Box::new(OpenAICompatibleOcr::new(
            &config.endpoint,
            &config.model,
            config.api_key.as_deref(),
        )),
        OcrProviderType::Ollama => Box::new(OllamaOcr::new(Some(&config.endpoint), &config.model)),
    }
}

/// Load an image, resize if either dimension exceeds `max_dimension`, re-encode as JPEG,
/// and return the base64-encoded string along with the MIME type.
fn load_and_encode_image(image_path: &Path, max_dimension: u32) -> Result<(String, &'static str)> {
    let img = image::open(image_path)
        .map_err(|e| anyhow!("Failed to open image {}: {}", image_path.display(), e))?;

    let (width, height) = img.dimensions();
    let img = if width > max_dimension || height > max_dimension {
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Triangle,
        )
    } else {
        img
    };

    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, 85);
    img.write_with_encoder(encoder)
        .map_err(|e| anyhow!("Failed to encode image as JPEG: {}", e))?;

    let base64_image = BASE64.encode(buf.into_inner());
    Ok((base64_image, "image/jpeg"))
}

/// Extract JSON from a string that might contain markdown code blocks
fn extract_json(content: &str) -> String {
    let trimmed = content.trim();

    // Check for markdown code block
    if trimmed.starts_with("```") {
        // Find the end of the code block
        if let Some(start) = trimmed.find('\n') {
            let after_first_line = &trimmed[start + 1..];
            if let Some(end) = after_first_line.rfind("```") {
                return after_first_line[..end].trim().to_string();
            }
        }
    }

    // Already plain JSON
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detections_plain_json() {
        let lines = parse_detections(
            r#"{"detections": [{"text": "101", "confidence": 0.97}, {"text": "2024"}]}"#,
        )
        .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "101");
        assert!((lines[0].confidence - 0.97).abs() < 1e-6);
        // Missing confidence falls back to the default
        assert!((lines[1].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_parse_detections_fenced_json() {
        let content = "```json\n{\"detections\": [{\"text\": \"88\", \"confidence\": 1.4}]}\n```";
        let lines = parse_detections(content).unwrap();
        assert_eq!(lines.len(), 1);
        // Out-of-range confidences are clamped
        assert!((lines[0].confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_detections_garbage_is_error() {
        assert!(parse_detections("I could not find any numbers, sorry!").is_err());
    }
}
