//! dstoic-bot library
//!
//! Posting cycle controller and the adapters for the content generator,
//! image composer and messaging channel. The binary wires them together from
//! [`config::BotConfig`].

pub mod config;
pub mod cycle;
pub mod services;

pub use config::{BotConfig, BotOverrides};
pub use cycle::{
    build_caption, CycleController, CycleOutcome, CycleReport, CycleSettings, CycleStep,
    GenerationStage, HaltReason, RecordPolicy,
};
pub use services::{ContentGenerator, ImageComposer, Publisher, RenderedImage};
