use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default file name looked up in the working directory.
pub const CONFIG_FILE: &str = "companion.toml";

const DEFAULT_PERSONA: &str = "You are a friendly, empathetic AI companion. \
You chat like a caring friend who is always ready to listen, give advice, joke around, \
and provide useful tips in a casual, supportive way. \
You remember the conversation context and respond naturally, warmly, and engagingly. \
Avoid being overly formal; your goal is to make the user feel comfortable, supported, \
and understood, just like a real-life best friend.";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Model identifier sent with every completion request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    /// API key; falls back to the environment when unset.
    pub api_key: Option<String>,
    /// System prompt describing the assistant's persona.
    pub persona: String,
    /// Prepended to the stored assistant reply when turns are consolidated.
    pub identity_prefix: String,
    /// Input that ends the chat loop (compared case-insensitively).
    pub exit_keyword: String,
    /// Where the consolidated conversation memory lives.
    pub memory_path: PathBuf,
    /// Where instruction/input/output records are appended.
    pub dataset_path: PathBuf,
    pub classifiers: ClassifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Set to false to skip sentiment analysis entirely.
    pub enabled: bool,
    /// Base URL of the inference API; the model id is appended.
    pub api_base: String,
    pub sentiment_model: String,
    pub emotion_model: String,
    /// Inference token; falls back to `HF_TOKEN`.
    pub token: Option<String>,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            model: "llama-3.3-70b-versatile".into(),
            temperature: 0.7,
            max_tokens: 800,
            api_base: "https://api.groq.com/openai/v1".into(),
            api_key: None,
            persona: DEFAULT_PERSONA.into(),
            identity_prefix: "I am Jarvis4H. ".into(),
            exit_keyword: "quit".into(),
            memory_path: PathBuf::from("ai_memory.json"),
            dataset_path: PathBuf::from("alpaca_dataset.jsonl"),
            classifiers: ClassifierConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "https://api-inference.huggingface.co/models".into(),
            sentiment_model: "distilbert-base-uncased-finetuned-sst-2-english".into(),
            emotion_model: "bhadresh-savani/distilbert-base-uncased-emotion".into(),
            token: None,
        }
    }
}

/// CLI flags that take precedence over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub memory_path: Option<PathBuf>,
    pub dataset_path: Option<PathBuf>,
    pub no_classifiers: bool,
}

impl CompanionConfig {
    /// Load config from `path`, or from `companion.toml` in `dir` when no
    /// explicit path is given. A missing default file yields the defaults; a
    /// missing explicit file is an error.
    pub fn load(dir: &Path, path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let p = dir.join(CONFIG_FILE);
                if !p.exists() {
                    return Ok(Self::default());
                }
                p
            }
        };
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: CompanionConfig = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        Ok(config)
    }

    /// Apply CLI overrides on top of the loaded config.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if let Some(t) = overrides.temperature {
            self.temperature = t;
        }
        if let Some(n) = overrides.max_tokens {
            self.max_tokens = n;
        }
        if let Some(p) = overrides.memory_path {
            self.memory_path = p;
        }
        if let Some(p) = overrides.dataset_path {
            self.dataset_path = p;
        }
        if overrides.no_classifiers {
            self.classifiers.enabled = false;
        }
        self
    }

    /// API key from the config file, then `GROQ_API_KEY`, then the lowercase
    /// `groq_api_key` older `.env` files use.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| non_empty_env("GROQ_API_KEY"))
            .or_else(|| non_empty_env("groq_api_key"))
    }
}

impl ClassifierConfig {
    pub fn resolved_token(&self) -> Option<String> {
        self.token.clone().or_else(|| non_empty_env("HF_TOKEN"))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
