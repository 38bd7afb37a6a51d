use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use archive_contracts::inline_image::InlineImage;

use crate::config::EngineConfig;
use crate::dryrun::DryrunProvider;
use crate::gemini::GeminiProvider;

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    /// Present for edits: the image the instruction applies to.
    pub source: Option<InlineImage>,
}

#[derive(Debug, Clone)]
pub struct TextRequest {
    pub model: String,
    pub prompt: String,
}

/// Synthesizes or edits exactly one image per call.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ImageRequest) -> Result<InlineImage>;
}

/// Returns the model's text answer; an empty string is a valid answer.
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &TextRequest) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// The response carried no candidate parts at all.
    NoContent,
    /// Parts were returned but none held inline image data.
    NoImage,
}

/// The model answered, but not with an image.
#[derive(Debug, Clone)]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    message: String,
}

impl GenerationError {
    pub fn no_content() -> Self {
        Self {
            kind: GenerationErrorKind::NoContent,
            message: "No content generated".to_string(),
        }
    }

    pub fn no_image() -> Self {
        Self {
            kind: GenerationErrorKind::NoImage,
            message: "No image data found in response".to_string(),
        }
    }
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GenerationError {}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    image: BTreeMap<String, Arc<dyn ImageProvider>>,
    text: BTreeMap<String, Arc<dyn TextProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_image<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.image
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn register_text<P: TextProvider + 'static>(&mut self, provider: P) {
        self.text
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn image(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.image.get(name).cloned()
    }

    pub fn text(&self, name: &str) -> Option<Arc<dyn TextProvider>> {
        self.text.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .image
            .keys()
            .chain(self.text.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

pub fn default_provider_registry(config: &EngineConfig) -> Result<ProviderRegistry> {
    let mut providers = ProviderRegistry::new();
    providers.register_image(DryrunProvider);
    providers.register_text(DryrunProvider);
    providers.register_image(GeminiProvider::new(config)?);
    providers.register_text(GeminiProvider::new(config)?);
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_serves_both_capabilities() -> Result<()> {
        let registry = default_provider_registry(&EngineConfig::default())?;
        assert_eq!(registry.names(), vec!["dryrun", "gemini"]);
        assert!(registry.image("gemini").is_some());
        assert!(registry.text("dryrun").is_some());
        assert!(registry.image("openai").is_none());
        Ok(())
    }

    #[test]
    fn generation_error_downcasts_through_anyhow() {
        let err = anyhow::Error::new(GenerationError::no_image()).context("gemini call");
        let cause = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<GenerationError>())
            .map(|cause| cause.kind);
        assert_eq!(cause, Some(GenerationErrorKind::NoImage));
        assert_eq!(
            GenerationError::no_content().to_string(),
            "No content generated"
        );
    }
}
