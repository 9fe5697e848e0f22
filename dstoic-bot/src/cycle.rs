//! Posting cycle controller
//!
//! One run performs LOAD → SELECT → GENERATE → COMPOSE → PUBLISH → RECORD and
//! stops at the first failing step. The store is only written by the usage
//! recorder; with [`RecordPolicy::AfterPublish`] a halt before PUBLISH leaves
//! the chosen quote exactly as it was.

use crate::services::telegram_client::CAPTION_LIMIT;
use crate::services::{ContentGenerator, ImageComposer, Publisher, RenderedImage};
use dstoic_common::{
    select_least_recently_used, Error, QuoteKey, QuoteRecord, QuoteStore, RecordOutcome, Usage,
    UsageRecorder,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

pub const MAX_IMAGE_CANDIDATES: u8 = 4;

/// When the chosen quote is marked as used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Only after a successful post; a failed run can be retried with the same quote
    #[default]
    AfterPublish,
    /// Right after selection; a failed run still advances the rotation
    AtSelection,
}

impl fmt::Display for RecordPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordPolicy::AfterPublish => f.write_str("after_publish"),
            RecordPolicy::AtSelection => f.write_str("at_selection"),
        }
    }
}

impl FromStr for RecordPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "after_publish" => Ok(RecordPolicy::AfterPublish),
            "at_selection" => Ok(RecordPolicy::AtSelection),
            other => Err(format!(
                "unknown record policy '{}' (expected 'after_publish' or 'at_selection')",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSettings {
    /// Channel or chat the post goes to
    pub destination: String,
    pub record_policy: RecordPolicy,
    /// Images generated per run (1..=4); the generator picks the best
    pub image_candidates: u8,
}

impl CycleSettings {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            record_policy: RecordPolicy::default(),
            image_candidates: 1,
        }
    }
}

/// Step a cycle reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Load,
    Select,
    Generate,
    Compose,
    Publish,
    Record,
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStep::Load => "LOAD",
            CycleStep::Select => "SELECT",
            CycleStep::Generate => "GENERATE",
            CycleStep::Compose => "COMPOSE",
            CycleStep::Publish => "PUBLISH",
            CycleStep::Record => "RECORD",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    ImagePrompt,
    Image,
    ImageChoice,
    Explanation,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationStage::ImagePrompt => "image prompt",
            GenerationStage::Image => "image",
            GenerationStage::ImageChoice => "image choice",
            GenerationStage::Explanation => "explanation",
        };
        f.write_str(name)
    }
}

/// Why a cycle stopped before publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    StoreUnavailable(String),
    MalformedState(String),
    NoEligibleQuote,
    GenerationFailed(GenerationStage),
    CompositionFailed,
    PublishFailed,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::StoreUnavailable(detail) => write!(f, "store unavailable: {}", detail),
            HaltReason::MalformedState(detail) => write!(f, "malformed store state: {}", detail),
            HaltReason::NoEligibleQuote => f.write_str("no eligible quote"),
            HaltReason::GenerationFailed(stage) => write!(f, "{} generation failed", stage),
            HaltReason::CompositionFailed => f.write_str("image composition failed"),
            HaltReason::PublishFailed => f.write_str("publishing failed"),
        }
    }
}

impl From<&Error> for HaltReason {
    fn from(e: &Error) -> Self {
        match e {
            Error::MalformedState { .. } => HaltReason::MalformedState(e.to_string()),
            other => HaltReason::StoreUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Published { usage_recorded: bool },
    Halted(HaltReason),
}

/// What one run did, for logs and the process exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Last step attempted
    pub step: CycleStep,
    pub quote: Option<QuoteKey>,
    pub record: Option<RecordOutcome>,
}

impl CycleReport {
    pub fn is_published(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Published { .. })
    }

    /// 0 for a post or an empty rotation, 1 for any other halt
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            CycleOutcome::Published { .. } | CycleOutcome::Halted(HaltReason::NoEligibleQuote) => 0,
            CycleOutcome::Halted(_) => 1,
        }
    }
}

/// Caption text: explanation, separator, attributed quote
///
/// Kept within `limit` characters by shortening the explanation first; the
/// quote block is only cut when it alone exceeds the limit.
pub fn build_caption(explanation: &str, quote_text: &str, author: &str, limit: usize) -> String {
    let footer = format!("---\nQuote: \"{}\" - {}", quote_text, author);
    let explanation = explanation.trim();
    let full = format!("{}\n\n{}", explanation, footer);
    if full.chars().count() <= limit {
        return full;
    }

    let footer_chars = footer.chars().count();
    // Room for at least a few characters of explanation plus the ellipsis
    if footer_chars + 2 + 4 <= limit {
        let room = limit - footer_chars - 2;
        return format!("{}\n\n{}", truncate_chars(explanation, room), footer);
    }

    truncate_chars(&footer, limit)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars < 3 {
        return text.chars().take(max_chars).collect();
    }
    let head: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", head.trim_end())
}

pub struct CycleController {
    store: Arc<dyn QuoteStore>,
    generator: Arc<dyn ContentGenerator>,
    composer: Arc<dyn ImageComposer>,
    publisher: Arc<dyn Publisher>,
    settings: CycleSettings,
    recorder: UsageRecorder,
    rng: Mutex<StdRng>,
}

impl CycleController {
    pub fn new(
        store: Arc<dyn QuoteStore>,
        generator: Arc<dyn ContentGenerator>,
        composer: Arc<dyn ImageComposer>,
        publisher: Arc<dyn Publisher>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            store,
            generator,
            composer,
            publisher,
            settings,
            recorder: UsageRecorder::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the tie-break RNG with a seeded one
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one posting cycle
    pub async fn run_once(&self) -> CycleReport {
        info!(
            backend = self.store.backend(),
            resource = %self.store.resource(),
            policy = %self.settings.record_policy,
            "Starting posting cycle"
        );

        // LOAD
        let records = match self.store.load_all().await {
            Ok(records) => records,
            Err(e) => return self.halt(CycleStep::Load, HaltReason::from(&e), None, None),
        };
        if records.is_empty() {
            return self.halt(CycleStep::Load, HaltReason::NoEligibleQuote, None, None);
        }
        info!(count = records.len(), "Loaded quotes");

        // SELECT
        let chosen = match self.select(&records) {
            Some(record) => record,
            None => return self.halt(CycleStep::Select, HaltReason::NoEligibleQuote, None, None),
        };
        let key = chosen.key();
        info!(quote = %key, "Selected quote");

        let mut record = None;
        if self.settings.record_policy == RecordPolicy::AtSelection {
            let outcome = self.recorder.record(self.store.as_ref(), &key).await;
            if !outcome.is_recorded() {
                warn!(quote = %key, outcome = ?outcome, "Could not record usage at selection; continuing");
            }
            record = Some(outcome);
        }

        // GENERATE
        let (image, explanation) = match self.generate(&chosen.text).await {
            Ok(content) => content,
            Err(stage) => {
                return self.halt(
                    CycleStep::Generate,
                    HaltReason::GenerationFailed(stage),
                    Some(key),
                    record,
                )
            }
        };

        // COMPOSE
        let rendered: RenderedImage = match self
            .composer
            .embed_text_on_image(&image, &chosen.text, &chosen.author)
            .await
        {
            Some(rendered) => rendered,
            None => {
                return self.halt(CycleStep::Compose, HaltReason::CompositionFailed, Some(key), record)
            }
        };

        // PUBLISH
        let caption = build_caption(&explanation, &chosen.text, &chosen.author, CAPTION_LIMIT);
        if !self
            .publisher
            .publish(&self.settings.destination, &rendered, &caption)
            .await
        {
            return self.halt(CycleStep::Publish, HaltReason::PublishFailed, Some(key), record);
        }
        info!(quote = %key, destination = %self.settings.destination, "Quote published");

        // RECORD
        let (usage_recorded, step) = match self.settings.record_policy {
            RecordPolicy::AtSelection => (
                record.as_ref().map(RecordOutcome::is_recorded).unwrap_or(false),
                CycleStep::Publish,
            ),
            RecordPolicy::AfterPublish => {
                let outcome = self.recorder.record(self.store.as_ref(), &key).await;
                if !outcome.is_recorded() {
                    warn!(quote = %key, outcome = ?outcome, "Post succeeded but usage was not recorded");
                }
                let recorded = outcome.is_recorded();
                record = Some(outcome);
                (recorded, CycleStep::Record)
            }
        };

        info!(quote = %key, usage_recorded, "Posting cycle complete");
        CycleReport {
            outcome: CycleOutcome::Published { usage_recorded },
            step,
            quote: Some(key),
            record,
        }
    }

    fn select<'a>(&self, records: &'a [QuoteRecord]) -> Option<&'a QuoteRecord> {
        if records
            .iter()
            .all(|r| matches!(r.usage, Usage::Cycle { used: true, .. }))
        {
            warn!(
                count = records.len(),
                "Every quote is used in the current cycle (exhausted cycle); \
                 run `dstoic-ingest --reset` to start a new one"
            );
        }

        // A poisoned lock still holds a usable RNG
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        select_least_recently_used(records, &mut *rng)
    }

    /// Image prompt, image (best of N) and explanation, in that order
    async fn generate(&self, quote_text: &str) -> Result<(Vec<u8>, String), GenerationStage> {
        let prompt = self
            .generator
            .generate_image_prompt(quote_text)
            .await
            .ok_or(GenerationStage::ImagePrompt)?;
        info!(prompt = %dstoic_common::models::preview(&prompt, 100), "Image prompt generated");

        let wanted = usize::from(self.settings.image_candidates.clamp(1, MAX_IMAGE_CANDIDATES));
        let mut candidates = Vec::with_capacity(wanted);
        for attempt in 1..=wanted {
            match self.generator.generate_image(&prompt).await {
                Some(image) => candidates.push(image),
                None => warn!(attempt, wanted, "Image candidate generation failed"),
            }
        }

        let image = match candidates.len() {
            0 => return Err(GenerationStage::Image),
            1 => candidates.remove(0),
            n => {
                let index = self
                    .generator
                    .choose_best_image(quote_text, &candidates)
                    .await
                    .filter(|index| *index < n)
                    .ok_or(GenerationStage::ImageChoice)?;
                candidates.swap_remove(index)
            }
        };

        let explanation = self
            .generator
            .generate_explanation(quote_text)
            .await
            .ok_or(GenerationStage::Explanation)?;

        Ok((image, explanation))
    }

    fn halt(
        &self,
        step: CycleStep,
        reason: HaltReason,
        quote: Option<QuoteKey>,
        record: Option<RecordOutcome>,
    ) -> CycleReport {
        match &reason {
            HaltReason::NoEligibleQuote => {
                warn!(step = %step, reason = %reason, "Posting cycle halted")
            }
            _ => error!(step = %step, reason = %reason, "Posting cycle halted"),
        }
        CycleReport {
            outcome: CycleOutcome::Halted(reason),
            step,
            quote,
            record,
        }
    }
}
