//! Sentiment and emotion annotation for incoming messages.
//!
//! Two independent text classifiers are queried per message. Any failure,
//! at startup or per call, degrades to [`Annotation::Unavailable`] rather
//! than surfacing an error.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ClassifierConfig;

/// Top label and its confidence for one classification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Label {
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classifier API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected classifier response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("classifier returned no labels")]
    Empty,
    #[error("no inference token configured (set HF_TOKEN)")]
    MissingToken,
}

/// A single-label text classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Label, ClassifierError>;
}

/// Text classification over the Hugging Face inference HTTP API.
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpClassifier {
    pub fn new(client: reqwest::Client, api_base: &str, model: &str, token: String) -> Self {
        Self {
            client,
            url: format!("{}/{model}", api_base.trim_end_matches('/')),
            token,
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Label, ClassifierError> {
        debug!(url = %self.url, "classifying message");
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "inputs": text }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ClassifierError::Status { status, body });
        }
        top_label(&body)
    }
}

/// The inference API answers either `[[{label, score}, ..]]` or
/// `[{label, score}, ..]` depending on the pipeline.
#[derive(Deserialize)]
#[serde(untagged)]
enum LabelsResponse {
    Nested(Vec<Vec<Label>>),
    Flat(Vec<Label>),
}

/// Pick the highest-scoring label out of a raw inference response.
pub fn top_label(body: &str) -> Result<Label, ClassifierError> {
    let labels = match serde_json::from_str::<LabelsResponse>(body)? {
        LabelsResponse::Nested(outer) => outer.into_iter().next().unwrap_or_default(),
        LabelsResponse::Flat(labels) => labels,
    };
    labels
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .ok_or(ClassifierError::Empty)
}

/// Result of analyzing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    Labeled { sentiment: Label, emotion: Label },
    Unavailable,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::Labeled { sentiment, emotion } => write!(
                f,
                "(sentiment: {}: {:.2}%, emotion: {}: {:.2}%)",
                sentiment.label.to_lowercase(),
                sentiment.score * 100.0,
                emotion.label,
                emotion.score * 100.0,
            ),
            Annotation::Unavailable => f.write_str("(sentiment analysis unavailable)"),
        }
    }
}

/// Holds the sentiment and emotion classifiers for the session.
pub struct Annotator {
    classifiers: Option<(Box<dyn Classifier>, Box<dyn Classifier>)>,
}

impl Annotator {
    /// An annotator whose analysis is always unavailable.
    pub fn unavailable() -> Self {
        Self { classifiers: None }
    }

    pub fn with_classifiers(sentiment: Box<dyn Classifier>, emotion: Box<dyn Classifier>) -> Self {
        Self {
            classifiers: Some((sentiment, emotion)),
        }
    }

    /// Build both HTTP classifiers. Failures are logged and leave the
    /// annotator unavailable.
    pub fn initialize(config: &ClassifierConfig) -> Self {
        if !config.enabled {
            debug!("sentiment analysis disabled");
            return Self::unavailable();
        }
        match Self::build(config) {
            Ok(annotator) => annotator,
            Err(e) => {
                warn!("error initializing classifiers: {e}");
                Self::unavailable()
            }
        }
    }

    fn build(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let token = config.resolved_token().ok_or(ClassifierError::MissingToken)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let sentiment =
            HttpClassifier::new(client.clone(), &config.api_base, &config.sentiment_model, token.clone());
        let emotion = HttpClassifier::new(client, &config.api_base, &config.emotion_model, token);
        Ok(Self::with_classifiers(Box::new(sentiment), Box::new(emotion)))
    }

    pub fn is_available(&self) -> bool {
        self.classifiers.is_some()
    }

    /// Run both classifiers on `text`.
    pub async fn analyze(&self, text: &str) -> Annotation {
        let Some((sentiment, emotion)) = &self.classifiers else {
            return Annotation::Unavailable;
        };
        let sentiment = match sentiment.classify(text).await {
            Ok(label) => label,
            Err(e) => {
                debug!("sentiment classification failed: {e}");
                return Annotation::Unavailable;
            }
        };
        match emotion.classify(text).await {
            Ok(emotion) => Annotation::Labeled { sentiment, emotion },
            Err(e) => {
                debug!("emotion classification failed: {e}");
                Annotation::Unavailable
            }
        }
    }
}
