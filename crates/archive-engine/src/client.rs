use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use archive_contracts::events::{payload, EventWriter};
use archive_contracts::inline_image::InlineImage;
use archive_contracts::models::{
    ModelSelection, ModelSelector, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_TEXT,
};
use archive_contracts::records::{CategorySet, ALL_CATEGORY, FALLBACK_CATEGORY};
use serde_json::json;

use crate::providers::{ImageProvider, ImageRequest, ProviderRegistry, TextProvider, TextRequest};

/// Image synthesis, image edits and prompt classification against the
/// selected models.
#[derive(Clone)]
pub struct GenerationClient {
    image: Arc<dyn ImageProvider>,
    edit: Arc<dyn ImageProvider>,
    text: Arc<dyn TextProvider>,
    image_model: String,
    edit_model: String,
    text_model: String,
    model_notes: Vec<String>,
    events: Option<EventWriter>,
}

impl GenerationClient {
    /// Resolves the requested models against `selector` and binds each one to
    /// its registered provider. Edits use the image request with the edit
    /// capability.
    pub fn from_registry(
        providers: &ProviderRegistry,
        selector: &ModelSelector,
        image_model: Option<&str>,
        text_model: Option<&str>,
    ) -> Result<Self> {
        let image = selector
            .select(image_model, CAPABILITY_IMAGE)
            .map_err(anyhow::Error::msg)?;
        let edit = selector
            .select(image_model, CAPABILITY_EDIT)
            .map_err(anyhow::Error::msg)?;
        let text = selector
            .select(text_model, CAPABILITY_TEXT)
            .map_err(anyhow::Error::msg)?;

        let model_notes = [&image, &text]
            .into_iter()
            .filter(|selection| selection.requested.is_some())
            .filter_map(|selection| selection.fallback_reason.clone())
            .collect();

        Ok(Self {
            image: image_provider(providers, &image)?,
            edit: image_provider(providers, &edit)?,
            text: providers.text(&text.model.provider).with_context(|| {
                format!(
                    "no text provider registered as '{}' for model '{}'",
                    text.model.provider, text.model.name
                )
            })?,
            image_model: image.model.name,
            edit_model: edit.model.name,
            text_model: text.model.name,
            model_notes,
            events: None,
        })
    }

    /// Binds providers directly; edits go through the image provider.
    pub fn with_providers<I, T>(image: I, text: T, image_model: &str, text_model: &str) -> Self
    where
        I: ImageProvider + 'static,
        T: TextProvider + 'static,
    {
        let image: Arc<dyn ImageProvider> = Arc::new(image);
        Self {
            edit: image.clone(),
            image,
            text: Arc::new(text),
            image_model: image_model.to_string(),
            edit_model: image_model.to_string(),
            text_model: text_model.to_string(),
            model_notes: Vec::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    /// Why an explicitly requested model was replaced, if it was.
    pub fn model_notes(&self) -> &[String] {
        &self.model_notes
    }

    pub fn generate(&self, prompt: &str) -> Result<InlineImage> {
        self.image.generate(&ImageRequest {
            model: self.image_model.clone(),
            prompt: prompt.to_string(),
            source: None,
        })
    }

    pub fn edit(&self, source: &InlineImage, instruction: &str) -> Result<InlineImage> {
        self.edit.generate(&ImageRequest {
            model: self.edit_model.clone(),
            prompt: instruction.to_string(),
            source: Some(source.clone()),
        })
    }

    /// One call per prompt, all in flight together. Returns when every call
    /// has settled, results in prompt order.
    pub fn generate_many(&self, prompts: &[String]) -> Vec<Result<InlineImage>> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = prompts
                .iter()
                .map(|prompt| scope.spawn(move || self.generate(prompt)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("generation worker panicked")))
                })
                .collect()
        })
    }

    /// Picks a category label for `prompt`. Never fails: any error or unusable
    /// answer yields [`FALLBACK_CATEGORY`]. Does not touch `categories`.
    pub fn classify(&self, prompt: &str, categories: &CategorySet) -> String {
        let request = TextRequest {
            model: self.text_model.clone(),
            prompt: classification_prompt(prompt, &categories.classifier_labels()),
        };
        let reason = match self.text.complete(&request) {
            Ok(answer) => match normalize_label(&answer) {
                Some(label) => return label,
                None => format!("unusable answer {answer:?}"),
            },
            Err(err) => format!("{err:#}"),
        };
        if let Some(events) = &self.events {
            events.record(
                "classification_fallback",
                payload(json!({
                    "prompt": prompt,
                    "model": self.text_model,
                    "reason": reason,
                    "label": FALLBACK_CATEGORY,
                })),
            );
        }
        FALLBACK_CATEGORY.to_string()
    }
}

fn image_provider(
    providers: &ProviderRegistry,
    selection: &ModelSelection,
) -> Result<Arc<dyn ImageProvider>> {
    providers.image(&selection.model.provider).with_context(|| {
        format!(
            "no image provider registered as '{}' for model '{}'",
            selection.model.provider, selection.model.name
        )
    })
}

fn classification_prompt(prompt: &str, labels: &[&str]) -> String {
    format!(
        "You are an intelligent archive librarian.\n\
Task: Analyze the Main Subject of the image prompt and assign a Category.\n\
\n\
Existing Categories: [{labels}]\n\
\n\
Rules:\n\
1. **Subject Priority**: If the prompt describes a specific noun (e.g., \"A Woman\", \"The Batman\", \"A red Ferrari\", \"A Sushi platter\"), you MUST return that specific Noun as the category (e.g., \"Woman\", \"Batman\", \"Cars\", \"Food\").\n\
2. **Create New**: Do NOT force specific subjects into generic categories like \"Urban\" or \"Nature\" if a specific one fits better. Create the new category.\n\
3. **Existing**: Only use an existing category if it is a perfect fit (e.g. \"Trees in a forest\" -> \"Nature\").\n\
4. **Format**: Return a Single Word (Title Case). Max 2 words if absolutely necessary.\n\
\n\
Prompt: \"{prompt}\"\n\
\n\
Return only the Category Name string.",
        labels = labels.join(", "),
    )
}

/// Trim, drop `"` and `.`, upper-case the first letter. The wildcard is not
/// a real category, so it counts as no answer.
fn normalize_label(answer: &str) -> Option<String> {
    let stripped: String = answer
        .trim()
        .chars()
        .filter(|ch| *ch != '"' && *ch != '.')
        .collect();
    let stripped = stripped.trim();
    let mut chars = stripped.chars();
    let first = chars.next()?;
    let label: String = first.to_uppercase().chain(chars).collect();
    if label == ALL_CATEGORY {
        return None;
    }
    Some(label)
}
