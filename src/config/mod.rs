//! Configuration module for the voicebridge gateway.
//!
//! Settings come from environment variables (with `.env` support via dotenvy
//! in `main`), validated at startup so a misconfigured gateway fails before
//! it registers with the PBX. Secrets are zeroized on drop and redacted from
//! `Debug` output.
//!
//! # Example
//! ```rust,no_run
//! use voicebridge::config::GatewayConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_env()?;
//! println!("registrar: {}", config.sip.registrar_uri());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroize;

use crate::ai::AiSessionConfig;
use crate::ai::gemini::GeminiVoice;
use crate::audio::{AudioEncoding, ConverterConfig};
use crate::session::{DisconnectPolicy, SessionConfig};
use crate::tools::ToolDeclaration;

/// Fallback system instruction when no persona file is configured.
const DEFAULT_PERSONA: &str = "You are a helpful Hungarian home assistant. \
     You are concise and witty. Always respond in Hungarian.";

/// Default text turn that makes the assistant greet the caller.
const DEFAULT_GREETING_PROMPT: &str = "A hívás most kapcsolódott. Köszöntsd a hívót!";

// =============================================================================
// Error Types
// =============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is unset or empty
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable is set but unusable
    #[error("Invalid value for {name}: {reason}")]
    InvalidVar {
        name: &'static str,
        reason: String,
    },
}

// =============================================================================
// SIP Configuration
// =============================================================================

/// Transport for SIP signaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SipTransport {
    /// UDP (default)
    #[default]
    Udp,
    /// TCP
    Tcp,
    /// TLS
    Tls,
}

impl SipTransport {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "tls" => Ok(Self::Tls),
            other => Err(ConfigError::InvalidVar {
                name: "SIP_TRANSPORT",
                reason: format!("unknown transport '{other}' (udp, tcp, tls)"),
            }),
        }
    }
}

/// SIP/PBX connection settings.
#[derive(Clone)]
pub struct SipConfig {
    /// Extension number registered at the PBX
    pub extension: String,
    /// Registration password (secret)
    pub password: String,
    /// PBX hostname or address
    pub server: String,
    /// Separate authentication id; defaults to the extension
    pub auth_id: String,
    /// Signaling port
    pub port: u16,
    /// Signaling transport
    pub transport: SipTransport,
}

impl SipConfig {
    /// SIP registrar URI.
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}:{}", self.server, self.port)
    }

    /// SIP account URI.
    pub fn account_uri(&self) -> String {
        format!("sip:{}@{}", self.extension, self.server)
    }
}

impl std::fmt::Debug for SipConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SipConfig")
            .field("extension", &self.extension)
            .field("password", &"***")
            .field("server", &self.server)
            .field("auth_id", &self.auth_id)
            .field("port", &self.port)
            .field("transport", &self.transport)
            .finish()
    }
}

// =============================================================================
// Gateway Configuration
// =============================================================================

/// Complete gateway configuration.
#[derive(Clone)]
pub struct GatewayConfig {
    /// SIP/PBX settings
    pub sip: SipConfig,

    /// Gemini API key (secret)
    pub gemini_api_key: String,
    /// Gemini Live model name
    pub gemini_model: String,
    /// Prebuilt voice for speech output
    pub gemini_voice: GeminiVoice,

    /// Optional path to a persona / system-instruction text file
    pub persona_path: Option<PathBuf>,
    /// Text turn sent when a call goes active
    pub greeting_prompt: String,

    /// G.711 variant used on the telephony leg
    pub preferred_codec: AudioEncoding,
    /// Pause before accepting an offered call
    pub answer_delay: Duration,

    /// AI reconnect attempts after mid-call link loss; 0 hangs up immediately
    pub reconnect_attempts: u32,
    /// Pause between reconnect attempts
    pub reconnect_delay: Duration,

    /// Log level filter for tracing-subscriber
    pub log_level: String,
}

impl GatewayConfig {
    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let sip = SipConfig {
            extension: require("SIP_EXTENSION")?,
            password: require("SIP_PASSWORD")?,
            server: require("SIP_SERVER")?,
            auth_id: optional("SIP_AUTH_ID").unwrap_or_default(),
            port: parse_or("SIP_PORT", 5060)?,
            transport: match optional("SIP_TRANSPORT") {
                Some(value) => SipTransport::parse(&value)?,
                None => SipTransport::default(),
            },
        };
        let sip = SipConfig {
            auth_id: if sip.auth_id.is_empty() {
                sip.extension.clone()
            } else {
                sip.auth_id
            },
            ..sip
        };

        let preferred_codec = match optional("PREFERRED_CODEC") {
            None => AudioEncoding::G711Ulaw,
            Some(value) => match value.to_uppercase().as_str() {
                "PCMU" | "ULAW" | "G711U" => AudioEncoding::G711Ulaw,
                "PCMA" | "ALAW" | "G711A" => AudioEncoding::G711Alaw,
                other => {
                    return Err(ConfigError::InvalidVar {
                        name: "PREFERRED_CODEC",
                        reason: format!("unknown codec '{other}' (PCMU, PCMA)"),
                    });
                }
            },
        };

        Ok(Self {
            sip,
            gemini_api_key: require("GEMINI_API_KEY")?,
            gemini_model: optional("GEMINI_MODEL")
                .unwrap_or_else(|| crate::ai::gemini::DEFAULT_GEMINI_MODEL.to_string()),
            gemini_voice: GeminiVoice::from_str_or_default(
                &optional("GEMINI_VOICE_NAME").unwrap_or_else(|| "Aoede".to_string()),
            ),
            persona_path: optional("PERSONA_PATH").map(PathBuf::from),
            greeting_prompt: optional("GREETING_PROMPT")
                .unwrap_or_else(|| DEFAULT_GREETING_PROMPT.to_string()),
            preferred_codec,
            answer_delay: Duration::from_millis(parse_or("ANSWER_DELAY_MS", 200u64)?),
            reconnect_attempts: parse_or("AI_RECONNECT_ATTEMPTS", 0u32)?,
            reconnect_delay: Duration::from_millis(parse_or("AI_RECONNECT_DELAY_MS", 1000u64)?),
            log_level: optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Load the persona text, falling back to the built-in default.
    pub fn load_persona(&self) -> String {
        let Some(path) = &self.persona_path else {
            return DEFAULT_PERSONA.to_string();
        };
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "Persona file is empty, using default");
                DEFAULT_PERSONA.to_string()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e,
                    "Failed to read persona file, using default");
                DEFAULT_PERSONA.to_string()
            }
        }
    }

    /// Build the AI session configuration with the given tool declarations.
    pub fn ai_session_config(&self, tools: Vec<ToolDeclaration>) -> AiSessionConfig {
        AiSessionConfig {
            api_key: self.gemini_api_key.clone(),
            model: self.gemini_model.clone(),
            voice: Some(self.gemini_voice.as_str().to_string()),
            system_instruction: Some(self.load_persona()),
            tools,
            ..Default::default()
        }
    }

    /// Build the per-call session configuration template.
    pub fn session_config(&self, tools: Vec<ToolDeclaration>) -> SessionConfig {
        SessionConfig {
            ai: self.ai_session_config(tools),
            converter: ConverterConfig {
                telephony_encoding: self.preferred_codec,
                ..Default::default()
            },
            greeting_prompt: Some(self.greeting_prompt.clone()),
            answer_delay: self.answer_delay,
            disconnect_policy: if self.reconnect_attempts == 0 {
                DisconnectPolicy::HangupImmediately
            } else {
                DisconnectPolicy::Reconnect {
                    max_attempts: self.reconnect_attempts,
                    delay: self.reconnect_delay,
                }
            },
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("sip", &self.sip)
            .field("gemini_api_key", &"***")
            .field("gemini_model", &self.gemini_model)
            .field("gemini_voice", &self.gemini_voice)
            .field("persona_path", &self.persona_path)
            .field("preferred_codec", &self.preferred_codec)
            .field("answer_delay", &self.answer_delay)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

/// Clear secrets from memory once the config goes away.
impl Drop for GatewayConfig {
    fn drop(&mut self) {
        self.gemini_api_key.zeroize();
        self.sip.password.zeroize();
    }
}

// =============================================================================
// Environment Helpers
// =============================================================================

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            reason: e.to_string(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
