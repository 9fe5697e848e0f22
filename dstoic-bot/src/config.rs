//! Bot configuration
//!
//! Resolved once at startup and passed into constructors. Priority order:
//! command line, environment (both through clap), TOML file, compiled
//! defaults. Credentials come only from the command line or environment.

use crate::cycle::{CycleSettings, RecordPolicy, MAX_IMAGE_CANDIDATES};
use crate::services::{GeminiConfig, TelegramConfig};
use dstoic_common::config::{load_config_or_default, StoreConfig, StoreSection};
use dstoic_common::{Error, Result};
use serde::Deserialize;
use std::path::Path;

pub const TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_CHANNEL_ID: &str = "TELEGRAM_CHANNEL_ID";
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";

/// Contents of `config.toml`; every table and key is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotFileConfig {
    pub store: StoreSection,
    pub cycle: CycleSection,
    pub gemini: GeminiSection,
    pub telegram: TelegramSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CycleSection {
    pub record_policy: Option<RecordPolicy>,
    pub image_candidates: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeminiSection {
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Values given on the command line or through the environment
#[derive(Clone, Default)]
pub struct BotOverrides {
    pub store: StoreSection,
    pub record_policy: Option<RecordPolicy>,
    pub image_candidates: Option<u8>,
    pub telegram_bot_token: Option<String>,
    pub telegram_channel_id: Option<String>,
    pub gemini_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub store: StoreConfig,
    pub cycle: CycleSettings,
    pub gemini: GeminiConfig,
    pub telegram: TelegramConfig,
}

impl BotConfig {
    /// Read the config file (if any) and resolve against `overrides`
    pub fn load(config_path: Option<&Path>, overrides: BotOverrides) -> Result<Self> {
        let file: BotFileConfig = load_config_or_default(config_path)?;
        Self::resolve(overrides, file)
    }

    /// Fails with every missing credential named at once
    pub fn resolve(overrides: BotOverrides, file: BotFileConfig) -> Result<Self> {
        let token = non_blank(overrides.telegram_bot_token);
        let channel = non_blank(overrides.telegram_channel_id);
        let api_key = non_blank(overrides.gemini_api_key);

        let missing: Vec<&str> = [
            (TELEGRAM_BOT_TOKEN, token.is_none()),
            (TELEGRAM_CHANNEL_ID, channel.is_none()),
            (GEMINI_API_KEY, api_key.is_none()),
        ]
        .into_iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| name)
        .collect();

        let (token, channel, api_key) = match (token, channel, api_key) {
            (Some(token), Some(channel), Some(api_key)) => (token, channel, api_key),
            _ => {
                return Err(Error::Config(format!(
                    "missing required settings: {}",
                    missing.join(", ")
                )))
            }
        };

        let image_candidates = overrides
            .image_candidates
            .or(file.cycle.image_candidates)
            .unwrap_or(1);
        if !(1..=MAX_IMAGE_CANDIDATES).contains(&image_candidates) {
            return Err(Error::Config(format!(
                "image_candidates must be between 1 and {}, got {}",
                MAX_IMAGE_CANDIDATES, image_candidates
            )));
        }

        let cycle = CycleSettings {
            destination: channel,
            record_policy: overrides
                .record_policy
                .or(file.cycle.record_policy)
                .unwrap_or_default(),
            image_candidates,
        };

        let mut gemini = GeminiConfig::new(api_key);
        if let Some(model) = file.gemini.text_model {
            gemini.text_model = model;
        }
        if let Some(model) = file.gemini.image_model {
            gemini.image_model = model;
        }
        if let Some(url) = file.gemini.base_url {
            gemini.base_url = url;
        }
        if let Some(secs) = file.gemini.timeout_secs {
            gemini.timeout_secs = secs;
        }

        let mut telegram = TelegramConfig::new(token);
        if let Some(url) = file.telegram.base_url {
            telegram.base_url = url;
        }
        if let Some(secs) = file.telegram.timeout_secs {
            telegram.timeout_secs = secs;
        }

        Ok(Self {
            store: StoreConfig::resolve(&overrides.store, &file.store),
            cycle,
            gemini,
            telegram,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
