use std::env;

/// Defaults match the upstream TTS's own defaults so a fresh deployment with
/// no per-slot overrides still produces four distinct voices.
const DEFAULT_VOICE_SLOT1: &str = "en-Alice_woman";
const DEFAULT_VOICE_SLOT2: &str = "en-Bob_man";
const DEFAULT_VOICE_SLOT3: &str = "en-Claire_woman";
const DEFAULT_VOICE_SLOT4: &str = "en-David_man";

#[derive(Debug, Clone)]
pub struct Config {
    pub tts_base_url: String,
    pub tts_api_key: Option<String>,
    /// Voice id for Slot 1 (the narrator, and the fallback for unmapped speakers).
    pub default_voice_slot1: String,
    pub default_voice_slot2: String,
    pub default_voice_slot3: String,
    pub default_voice_slot4: String,

    pub storage_root: String,

    pub s3_bucket: String,
    pub s3_base_prefix: String,
    pub aws_region: String,

    pub jwt_secret: String,

    pub server_host: String,
    pub server_port: u16,

    /// Allowed CORS origins (comma-separated). Use "*" for any origin (development only).
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        // JWT_SECRET is required - no insecure defaults
        let jwt_secret = env::var("JWT_SECRET").map_err(|_| {
            anyhow::anyhow!(
                "JWT_SECRET environment variable must be set. \
                Generate a secure secret with: openssl rand -base64 32"
            )
        })?;

        // Validate JWT secret length (at least 32 bytes for HS256)
        if jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long for security. \
                Generate a secure secret with: openssl rand -base64 32"
            ));
        }

        let tts_base_url =
            env::var("TTS_API_URL").map_err(|_| anyhow::anyhow!("TTS_API_URL must be set"))?;

        let s3_bucket = env::var("S3_STORAGE_BUCKET")
            .map_err(|_| anyhow::anyhow!("S3_STORAGE_BUCKET must be set"))?;

        // Parse CORS origins - default to localhost for development
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            tts_base_url,
            tts_api_key: env::var("TTS_API_KEY").ok(),
            default_voice_slot1: env::var("TTS_DEFAULT_VOICE")
                .unwrap_or_else(|_| DEFAULT_VOICE_SLOT1.to_string()),
            default_voice_slot2: env::var("TTS_SPEAKER2")
                .unwrap_or_else(|_| DEFAULT_VOICE_SLOT2.to_string()),
            default_voice_slot3: env::var("TTS_SPEAKER3")
                .unwrap_or_else(|_| DEFAULT_VOICE_SLOT3.to_string()),
            default_voice_slot4: env::var("TTS_SPEAKER4")
                .unwrap_or_else(|_| DEFAULT_VOICE_SLOT4.to_string()),

            storage_root: env::var("STORAGE_ROOT").unwrap_or_else(|_| "./storage".to_string()),

            s3_bucket,
            s3_base_prefix: env::var("S3_BASE_PREFIX")
                .unwrap_or_else(|_| "AIWorkflow".to_string())
                .trim_matches('/')
                .to_string(),
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),

            jwt_secret,

            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),

            cors_origins,
        })
    }

    /// Default voice for a given slot (1-indexed), used when no per-request override applies.
    pub fn default_voice_for_slot(&self, slot: u8) -> &str {
        match slot {
            1 => &self.default_voice_slot1,
            2 => &self.default_voice_slot2,
            3 => &self.default_voice_slot3,
            _ => &self.default_voice_slot4,
        }
    }
}
