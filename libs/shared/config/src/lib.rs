use std::env;
use tracing::warn;

const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub jwt_secret: String,
    pub operation_timeout_ms: u64,
    pub bind_addr: String,
    /// JSON file of doctors and patients loaded into the in-memory directory.
    pub directory_seed_path: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, falling back to in-memory storage");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            jwt_secret: env::var("JWT_SECRET")
                .or_else(|_| env::var("SUPABASE_JWT_SECRET"))
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, every token will be rejected");
                    String::new()
                }),
            operation_timeout_ms: env::var("SCHEDULER_OPERATION_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            directory_seed_path: env::var("SCHEDULER_DIRECTORY_SEED")
                .ok()
                .filter(|path| !path.trim().is_empty()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty()
    }

    /// Supabase-backed collaborators are used only when both the URL and key are present.
    pub fn is_database_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn operation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            jwt_secret: String::new(),
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            directory_seed_path: None,
        }
    }
}
