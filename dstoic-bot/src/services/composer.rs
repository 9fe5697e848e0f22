//! Image composition
//!
//! The quote and author travel in the post caption, so composition only has
//! to confirm the generated bytes are an image the channel will accept.

use super::{ImageComposer, RenderedImage};
use async_trait::async_trait;
use tracing::{debug, error};

const ACCEPTED_MIME_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/webp", "image/gif"];

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughComposer;

impl PassthroughComposer {
    pub fn new() -> Self {
        Self
    }
}

/// MIME type of `bytes` when it is an accepted image format
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    let kind = infer::get(bytes)?;
    if kind.matcher_type() != infer::MatcherType::Image {
        return None;
    }
    ACCEPTED_MIME_TYPES
        .iter()
        .copied()
        .find(|accepted| *accepted == kind.mime_type())
}

#[async_trait]
impl ImageComposer for PassthroughComposer {
    async fn embed_text_on_image(
        &self,
        image: &[u8],
        quote_text: &str,
        author: &str,
    ) -> Option<RenderedImage> {
        if image.is_empty() {
            error!("Cannot compose an empty image");
            return None;
        }

        let mime_type = match sniff_image_type(image) {
            Some(mime_type) => mime_type,
            None => {
                let detected = infer::get(image).map(|k| k.mime_type()).unwrap_or("unknown");
                error!(
                    size = image.len(),
                    detected, "Generated content is not a supported image"
                );
                return None;
            }
        };

        debug!(
            mime_type,
            size = image.len(),
            author,
            quote_chars = quote_text.chars().count(),
            "Image accepted for publishing"
        );
        Some(RenderedImage {
            bytes: image.to_vec(),
            mime_type: mime_type.to_string(),
        })
    }
}
