use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use archive_contracts::inline_image::InlineImage;

use crate::providers::{GenerationError, ImageProvider, ImageRequest, TextProvider, TextRequest};

type Hook = Arc<dyn Fn(&ImageRequest) + Send + Sync>;

/// Image provider that fails for prompts containing any of `failing`.
#[derive(Clone, Default)]
pub(crate) struct ScriptedImages {
    failing: Vec<String>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
    hook: Option<Hook>,
}

impl ScriptedImages {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    /// Runs inside every call, before the result is produced.
    pub(crate) fn on_call(mut self, hook: impl Fn(&ImageRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        let mut prompts = self.prompts.lock().map(|p| p.clone()).unwrap_or_default();
        prompts.sort();
        prompts
    }
}

impl ImageProvider for ScriptedImages {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, request: &ImageRequest) -> Result<InlineImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        if let Some(hook) = &self.hook {
            hook(request);
        }
        if self
            .failing
            .iter()
            .any(|needle| request.prompt.contains(needle.as_str()))
        {
            return Err(GenerationError::no_image().into());
        }
        let data = match &request.source {
            Some(source) => format!("{}+{}", source.data, request.prompt.len()),
            None => format!("img{}", request.prompt.len()),
        };
        Ok(InlineImage::new("image/png", data))
    }
}

/// Text provider with a fixed answer, or a failure when `answer` is `None`.
#[derive(Clone)]
pub(crate) struct ScriptedText {
    answer: Option<String>,
    calls: Arc<AtomicUsize>,
    last_prompt: Arc<Mutex<String>>,
}

impl ScriptedText {
    pub(crate) fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
            last_prompt: Arc::new(Mutex::new(String::new())),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            answer: None,
            ..Self::answering("")
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_prompt(&self) -> String {
        self.last_prompt
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl TextProvider for ScriptedText {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, request: &TextRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = request.prompt.clone();
        }
        self.answer
            .clone()
            .ok_or_else(|| anyhow!("connection reset by peer"))
    }
}
