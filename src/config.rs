use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
    #[error("Invalid tool manifest {path}: {reason}")]
    InvalidManifest { path: String, reason: String },
}

/// Credentials for the realtime service
#[derive(Debug)]
pub struct ApiConfig {
    pub openai_key: SecretBox<String>,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let openai_key = Self::load_api_key("OPENAI_API_KEY", "OpenAI")?;
        Ok(Self { openai_key })
    }

    /// Wrap an already known key, e.g. one passed on the command line
    pub fn from_key(key: String) -> Result<Self, ConfigError> {
        Self::validate_key_format(&key, "OpenAI")?;
        Ok(Self {
            openai_key: SecretBox::new(Box::new(key)),
        })
    }

    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;
        Self::validate_key_format(&key, service_name)?;
        Ok(SecretBox::new(Box::new(key)))
    }

    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }
        if !key.starts_with("sk-") {
            return Err(ConfigError::InvalidKeyFormat {
                service: service.to_string(),
                reason: "OpenAI keys should start with 'sk-'".to_string(),
            });
        }
        Ok(())
    }

    /// Get the OpenAI API key (use only when opening the socket)
    pub fn openai_key(&self) -> &str {
        self.openai_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Server-side voice activity detection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TurnDetectionConfig {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Everything the session controller needs besides credentials
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub model: String,
    pub instructions: String,
    pub voice: String,
    pub temperature: f32,
    pub transcription_model: String,
    pub turn_detection: TurnDetectionConfig,
    /// Capacity of the capture frame buffer in bytes
    pub input_buffer_size: usize,
    pub pump_interval: Duration,
    /// `None` waits for the acknowledgment for as long as the socket stays open
    pub handshake_timeout: Option<Duration>,
    pub max_retained_responses: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            instructions: String::new(),
            voice: "alloy".to_string(),
            temperature: 0.8,
            transcription_model: "whisper-1".to_string(),
            turn_detection: TurnDetectionConfig::default(),
            input_buffer_size: 4096,
            pump_interval: Duration::from_millis(10),
            handshake_timeout: Some(Duration::from_secs(10)),
            max_retained_responses: 64,
        }
    }
}

impl SessionConfig {
    /// Endpoint with the model selector appended as a query parameter
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.url)?;
        if !self.model.is_empty() {
            url.query_pairs_mut().append_pair("model", &self.model);
        }
        Ok(url)
    }
}
