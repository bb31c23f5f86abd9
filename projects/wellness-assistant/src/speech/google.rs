use super::Transcriber;
use crate::audio::AudioClip;
use crate::config::SpeechConfig;
use crate::error::WellnessError;
use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionConfig<'a> {
    encoding: &'static str,
    sample_rate_hertz: u32,
    language_code: &'a str,
}

#[derive(Serialize)]
struct RecognitionAudio {
    content: String,
}

#[derive(Serialize)]
struct RecognizeRequest<'a> {
    config: RecognitionConfig<'a>,
    audio: RecognitionAudio,
}

#[derive(Deserialize, Default)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Google Cloud Speech-to-Text `speech:recognize` over blocking HTTP.
pub struct GoogleTranscriber {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    language: String,
}

impl GoogleTranscriber {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs_f64(config.api_timeout_secs))
            .build()?;
        if config.api_key.is_none() {
            tracing::warn!("No speech API key configured; chant transcription will fail");
        }
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            language: config.language.clone(),
        })
    }
}

impl Transcriber for GoogleTranscriber {
    fn transcribe(&self, clip: &AudioClip) -> Result<String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| WellnessError::SpeechApi("no API key configured".to_string()))?;

        let request = RecognizeRequest {
            config: RecognitionConfig {
                encoding: "LINEAR16",
                sample_rate_hertz: clip.sample_rate,
                language_code: &self.language,
            },
            audio: RecognitionAudio {
                content: STANDARD.encode(clip.to_le_bytes()),
            },
        };

        let body = self
            .client
            .post(&self.endpoint)
            .query(&[("key", key)])
            .json(&request)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| WellnessError::SpeechApi(e.to_string()))?;

        parse_transcript(&body)
    }
}

/// Extracts the top transcript; an empty result set means nothing was understood.
fn parse_transcript(body: &str) -> Result<String> {
    let response: RecognizeResponse = serde_json::from_str(body)
        .map_err(|e| WellnessError::SpeechApi(format!("malformed response: {}", e)))?;

    let transcript = response
        .results
        .iter()
        .filter_map(|r| r.alternatives.first())
        .map(|a| a.transcript.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if transcript.is_empty() {
        Err(WellnessError::SpeechUnintelligible.into())
    } else {
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: &anyhow::Error) -> &WellnessError {
        err.downcast_ref::<WellnessError>().unwrap()
    }

    #[test]
    fn test_parse_transcript() {
        let body = r#"{"results":[{"alternatives":[{"transcript":"om","confidence":0.8}]},
                       {"alternatives":[{"transcript":" shanti "}]}]}"#;
        assert_eq!(parse_transcript(body).unwrap(), "om shanti");
    }

    #[test]
    fn test_parse_empty_is_unintelligible() {
        let err = parse_transcript("{}").unwrap_err();
        assert!(matches!(kind(&err), WellnessError::SpeechUnintelligible));
    }

    #[test]
    fn test_parse_garbage_is_api_error() {
        let err = parse_transcript("<html>").unwrap_err();
        assert!(matches!(kind(&err), WellnessError::SpeechApi(_)));
    }

    #[test]
    fn test_missing_key_is_api_error() {
        let transcriber = GoogleTranscriber::new(&SpeechConfig::default()).unwrap();
        let err = transcriber
            .transcribe(&AudioClip::new(vec![0; 10], 16_000))
            .unwrap_err();
        assert!(matches!(kind(&err), WellnessError::SpeechApi(_)));
    }

    #[test]
    fn test_request_shape() {
        let request = RecognizeRequest {
            config: RecognitionConfig {
                encoding: "LINEAR16",
                sample_rate_hertz: 16_000,
                language_code: "en-US",
            },
            audio: RecognitionAudio {
                content: STANDARD.encode([1u8, 0]),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["config"]["sampleRateHertz"], 16_000);
        assert_eq!(json["config"]["languageCode"], "en-US");
        assert_eq!(json["audio"]["content"], "AQA=");
    }
}
