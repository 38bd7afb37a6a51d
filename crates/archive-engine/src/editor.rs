use anyhow::{bail, Result};
use archive_contracts::inline_image::InlineImage;
use archive_contracts::records::ImageRecord;

use crate::client::GenerationClient;

pub const EDIT_FAILED_MESSAGE: &str =
    "Failed to apply adjustments. Please try different parameters.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Blank instruction; nothing was sent.
    Ignored,
    Applied,
    /// The edit call failed; carries the underlying error text for logging.
    Failed(String),
}

/// Retouch flow for one resolved record. Successive edits chain: each one is
/// applied to the previous result.
#[derive(Debug, Clone)]
pub struct EditorSession {
    source: ImageRecord,
    original: InlineImage,
    edited: Option<InlineImage>,
    instruction: String,
    error: Option<String>,
}

impl EditorSession {
    pub fn open(record: &ImageRecord) -> Result<Self> {
        if !record.is_displayable() {
            bail!("image {} has no payload to edit yet", record.id);
        }
        Ok(Self {
            source: record.clone(),
            original: InlineImage::from_data_url(&record.url)?,
            edited: None,
            instruction: String::new(),
            error: None,
        })
    }

    pub fn source(&self) -> &ImageRecord {
        &self.source
    }

    /// What the user currently sees: the latest edit, else the source.
    pub fn working_image(&self) -> &InlineImage {
        self.edited.as_ref().unwrap_or(&self.original)
    }

    pub fn has_edit(&self) -> bool {
        self.edited.is_some()
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Inline message left by the last failed apply.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn apply(&mut self, client: &GenerationClient, instruction: &str) -> ApplyOutcome {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return ApplyOutcome::Ignored;
        }
        self.error = None;
        self.instruction = instruction.to_string();
        match client.edit(self.working_image(), instruction) {
            Ok(image) => {
                self.edited = Some(image);
                ApplyOutcome::Applied
            }
            Err(err) => {
                self.error = Some(EDIT_FAILED_MESSAGE.to_string());
                ApplyOutcome::Failed(format!("{err:#}"))
            }
        }
    }

    pub fn reset(&mut self) {
        self.edited = None;
        self.instruction.clear();
        self.error = None;
    }

    /// New record for the edited result, or `None` when nothing was applied.
    /// The source record is never modified.
    pub fn save(&self, id: String, timestamp: i64) -> Option<ImageRecord> {
        let edited = self.edited.as_ref()?;
        Some(ImageRecord {
            id,
            url: edited.to_data_url(),
            prompt: format!("Retouched: {}", self.instruction),
            timestamp,
            is_loading: false,
            category: self.source.category.clone(),
        })
    }
}
