//! External collaborators of the posting cycle
//!
//! Every collaborator reports failure with a sentinel (`None` / `false`) and
//! logs its own diagnostics; the cycle controller only decides whether to
//! continue.

pub mod composer;
pub mod gemini_client;
pub mod telegram_client;

pub use composer::PassthroughComposer;
pub use gemini_client::{GeminiClient, GeminiConfig};
pub use telegram_client::{TelegramConfig, TelegramPublisher};

use async_trait::async_trait;

/// Finished image ready for publishing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl RenderedImage {
    /// File extension matching the MIME type, for upload file names
    pub fn extension(&self) -> &str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "bin",
        }
    }
}

/// Generative content provider
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Visual description of the scene for `quote_text`
    async fn generate_image_prompt(&self, quote_text: &str) -> Option<String>;

    /// Raw image bytes for `prompt`
    async fn generate_image(&self, prompt: &str) -> Option<Vec<u8>>;

    /// Short practical explanation of `quote_text`
    async fn generate_explanation(&self, quote_text: &str) -> Option<String>;

    /// Index of the candidate that best fits `quote_text`
    async fn choose_best_image(&self, quote_text: &str, candidates: &[Vec<u8>]) -> Option<usize>;
}

#[async_trait]
pub trait ImageComposer: Send + Sync {
    async fn embed_text_on_image(
        &self,
        image: &[u8],
        quote_text: &str,
        author: &str,
    ) -> Option<RenderedImage>;
}

/// Messaging channel delivery
#[async_trait]
pub trait Publisher: Send + Sync {
    /// `true` only when the channel accepted the post
    async fn publish(&self, destination: &str, image: &RenderedImage, caption: &str) -> bool;
}
