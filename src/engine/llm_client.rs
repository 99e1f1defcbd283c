use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;

use crate::engine::illustration::{AspectRatio, ImageSource};
use crate::model::game_state::ChatMessage;
use crate::ui::settings::EngineSettings;

/// Text fragments of one model response, in arrival order.
pub type TextStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// Something that turns a conversation into a streamed reply.
pub trait TextSource: Send + Sync {
    fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream>;
}

#[derive(Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Serialize)]
pub struct ImageRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub size: &'a str,
    pub response_format: &'a str,
    pub n: u8,
}

#[derive(Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
pub struct ImageDatum {
    #[serde(default)]
    pub b64_json: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Data(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        SseLine::Done
    } else if payload.is_empty() {
        SseLine::Skip
    } else {
        SseLine::Data(payload.to_string())
    }
}

fn chunk_text(payload: &str) -> Result<Option<String>> {
    let chunk: ChatCompletionChunk =
        serde_json::from_str(payload).with_context(|| format!("Invalid stream chunk: {payload}"))?;
    Ok(chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .reduce(|mut a, b| {
            a.push_str(&b);
            a
        })
        .filter(|s| !s.is_empty()))
}

/// Reads server-sent events off a response body.
struct SseStream<R: BufRead> {
    reader: R,
    done: bool,
}

impl<R: BufRead> Iterator for SseStream<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.done = true,
                Ok(_) => match parse_sse_line(line.trim_end()) {
                    SseLine::Done => self.done = true,
                    SseLine::Skip => {}
                    SseLine::Data(payload) => match chunk_text(&payload) {
                        Ok(Some(text)) => return Some(Ok(text)),
                        Ok(None) => {}
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    },
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(anyhow!(e).context("stream read failed")));
                }
            }
        }
        None
    }
}

/// OpenAI-compatible client (LM Studio, llama.cpp server, hosted APIs).
pub struct LlmClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    image_model: String,
    temperature: f32,
    stream_timeout: Duration,
}

impl LlmClient {
    pub fn new(settings: &EngineSettings) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(None::<Duration>)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.llm_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            chat_model: settings.chat_model.clone(),
            image_model: settings.image_model.clone(),
            temperature: settings.temperature,
            // Hard ceiling so an abandoned stream always releases its socket.
            stream_timeout: settings.turn_timeout() + Duration::from_secs(5),
        })
    }

    fn post(&self, path: &str) -> reqwest::blocking::RequestBuilder {
        let req = self.http.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    pub fn test_connection(&self) -> Result<String> {
        let mut req = self.http.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp: serde_json::Value = req
            .timeout(Duration::from_secs(10))
            .send()?
            .error_for_status()?
            .json()?;

        Ok(format!(
            "Connected ({} models available)",
            resp["data"].as_array().map(|a| a.len()).unwrap_or(0)
        ))
    }
}

impl TextSource for LlmClient {
    fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let req = ChatCompletionRequest {
            model: &self.chat_model,
            messages,
            temperature: self.temperature,
            stream: true,
        };

        let resp = self
            .post("/chat/completions")
            .timeout(self.stream_timeout)
            .json(&req)
            .send()
            .context("chat completion request failed")?
            .error_for_status()
            .context("chat completion rejected")?;

        Ok(Box::new(SseStream {
            reader: BufReader::new(resp),
            done: false,
        }))
    }
}

impl ImageSource for LlmClient {
    fn generate(&self, prompt: &str, aspect: AspectRatio) -> Result<Option<String>> {
        let req = ImageRequest {
            model: &self.image_model,
            prompt,
            size: aspect.size(),
            response_format: "b64_json",
            n: 1,
        };

        let resp: ImageResponse = self
            .post("/images/generations")
            .timeout(Duration::from_secs(120))
            .json(&req)
            .send()
            .context("image request failed")?
            .error_for_status()
            .context("image request rejected")?
            .json()
            .context("invalid image response")?;

        Ok(resp
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .map(|b64| format!("data:image/png;base64,{b64}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn sse_lines() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
        assert_eq!(parse_sse_line("data:"), SseLine::Skip);
        assert_eq!(parse_sse_line("data: {}"), SseLine::Data("{}".into()));
    }

    #[test]
    fn stream_yields_deltas_in_order() {
        let body = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"The door \"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"creaks.\"}}]}\n\n\
data: [DONE]\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n";
        let stream = SseStream {
            reader: Cursor::new(body.as_bytes()),
            done: false,
        };
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect();
        assert_eq!(parts, ["The door ", "creaks."]);
    }

    #[test]
    fn malformed_chunk_ends_stream_with_error() {
        let stream = SseStream {
            reader: Cursor::new("data: {not json\n".as_bytes()),
            done: false,
        };
        let items: Vec<_> = stream.collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
