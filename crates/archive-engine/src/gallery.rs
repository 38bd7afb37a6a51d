use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use archive_contracts::download::download_file_name;
use archive_contracts::events::{payload, EventWriter};
use archive_contracts::inline_image::InlineImage;
use archive_contracts::records::{
    now_millis, AppState, IdSource, ImageRecord, ALL_CATEGORY, FALLBACK_CATEGORY,
};
use archive_contracts::storage::StateStore;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::client::GenerationClient;
use crate::editor::{ApplyOutcome, EditorSession};
use crate::guard::{BatchGuard, BatchToken};

pub const SEARCH_BATCH_SIZE: usize = 3;
pub const FILL_BATCH_SIZE: usize = 2;
pub const LOAD_MORE_BATCH_SIZE: usize = 2;
pub const HOME_RECENT_LIMIT: usize = 5;

pub const STYLE_MODIFIERS: &[&str] = &[
    "cinematic",
    "studio lighting",
    "vibrant",
    "dark atmosphere",
    "pastel",
    "neon",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Home,
    Studio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudioMode {
    Grid,
    Editor,
}

/// Presentation state. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub page: Page,
    pub mode: StudioMode,
    pub active_category: String,
    pub search_text: String,
    pub notification: Option<String>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            page: Page::Home,
            mode: StudioMode::Grid,
            active_category: ALL_CATEGORY.to_string(),
            search_text: String::new(),
            notification: None,
        }
    }
}

/// How one batch settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub ids: Vec<String>,
    pub succeeded: usize,
    pub failed: usize,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Blank query.
    Ignored,
    /// Another batch holds the guard.
    Busy,
    /// The category already had records; switched there without generating.
    Existing { category: String },
    Generated { category: String, batch: BatchReport },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeSummary {
    pub total: usize,
    pub recent: Vec<ImageRecord>,
}

/// Owns the archive state. Every mutation goes through a method here and is
/// mirrored to the store before the method returns.
pub struct GalleryController {
    state: AppState,
    store: StateStore,
    client: GenerationClient,
    events: EventWriter,
    view: ViewState,
    guard: BatchGuard,
    ids: IdSource,
    rng: StdRng,
    editor: Option<EditorSession>,
}

impl GalleryController {
    /// Loads persisted state and drops records left pending by an earlier run.
    pub fn open(store: StateStore, client: GenerationClient, events: EventWriter) -> Self {
        let mut state = store.load();
        let discarded = state.discard_pending();
        events.record(
            "state_loaded",
            payload(json!({
                "key": store.key(),
                "images": state.images.len(),
                "categories": state.categories.len(),
                "discarded_pending": discarded,
            })),
        );
        let mut controller = Self {
            state,
            store,
            client,
            events,
            view: ViewState::default(),
            guard: BatchGuard::new(),
            ids: IdSource::new(),
            rng: StdRng::from_entropy(),
            editor: None,
        };
        controller.persist();
        controller
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    pub fn batch_guard(&self) -> &BatchGuard {
        &self.guard
    }

    pub fn editor(&self) -> Option<&EditorSession> {
        self.editor.as_ref()
    }

    /// Returns the pending notification once.
    pub fn take_notification(&mut self) -> Option<String> {
        self.view.notification.take()
    }

    fn notify(&mut self, message: String) {
        self.view.notification = Some(message);
    }

    /// Save failures are logged and otherwise ignored; memory stays authoritative.
    fn persist(&mut self) {
        if let Err(err) = self.store.save(&self.state) {
            self.events.record(
                "persist_failed",
                payload(json!({
                    "key": self.store.key(),
                    "error": format!("{err:#}"),
                })),
            );
        }
    }

    /// Appends `label` to the category set when new.
    fn register_category(&mut self, label: &str) -> bool {
        if !self.state.categories.insert(label) {
            return false;
        }
        self.notify(format!("New Archive Section Created: {label}"));
        self.events
            .record("category_created", payload(json!({ "category": label })));
        self.persist();
        true
    }

    /// Prepends `count` pending records sharing `prompt` and `category`.
    pub fn insert_placeholders(&mut self, prompt: &str, category: &str, count: usize) -> Vec<String> {
        let ids = self.ids.next_batch(count);
        let timestamp = now_millis();
        let placeholders: Vec<ImageRecord> = ids
            .iter()
            .map(|id| ImageRecord::placeholder(id.clone(), prompt, category, timestamp))
            .collect();
        let mut images = placeholders;
        images.append(&mut self.state.images);
        self.state.images = images;
        self.persist();
        self.events.record(
            "placeholders_inserted",
            payload(json!({
                "ids": ids,
                "prompt": prompt,
                "category": category,
            })),
        );
        ids
    }

    /// Applies a settled batch in one update: failures vanish, successes get
    /// their payload and `category`.
    pub fn resolve_placeholders(
        &mut self,
        ids: &[String],
        results: Vec<Result<InlineImage>>,
        category: &str,
    ) -> BatchReport {
        let mut failed: HashSet<&str> = HashSet::new();
        let mut filled: Vec<(&str, InlineImage)> = Vec::new();
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(image) => filled.push((id.as_str(), image)),
                Err(err) => {
                    self.events.record(
                        "generation_failed",
                        payload(json!({
                            "id": id,
                            "model": self.client.image_model(),
                            "error": format!("{err:#}"),
                        })),
                    );
                    failed.insert(id.as_str());
                }
            }
        }

        self.state
            .images
            .retain(|image| !failed.contains(image.id.as_str()));
        for (id, image) in &filled {
            if let Some(record) = self.state.images.iter_mut().find(|record| record.id == *id) {
                record.url = image.to_data_url();
                record.is_loading = false;
                record.category = category.to_string();
            }
        }
        self.persist();

        let report = BatchReport {
            ids: ids.to_vec(),
            succeeded: filled.len(),
            failed: failed.len(),
            category: category.to_string(),
        };
        self.events.record(
            "batch_settled",
            payload(json!({
                "ids": report.ids,
                "succeeded": report.succeeded,
                "failed": report.failed,
                "category": report.category,
            })),
        );
        report
    }

    /// One generation batch. `None` when the prompt is blank or another batch
    /// is in flight.
    pub fn perform_generation(
        &mut self,
        prompt: &str,
        count: usize,
        forced_category: Option<&str>,
    ) -> Option<BatchReport> {
        let token = self.guard.try_acquire()?;
        self.run_batch(&token, prompt, count, forced_category)
    }

    fn run_batch(
        &mut self,
        _token: &BatchToken,
        prompt: &str,
        count: usize,
        forced_category: Option<&str>,
    ) -> Option<BatchReport> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return None;
        }

        let mut target = forced_category
            .map(str::to_string)
            .unwrap_or_else(|| self.view.active_category.clone());
        let searching = !self.view.search_text.trim().is_empty();
        if forced_category.is_none() && (target == ALL_CATEGORY || searching) {
            let label = self.client.classify(prompt, &self.state.categories);
            self.register_category(&label);
            if searching {
                self.view.active_category = label.clone();
                self.view.search_text.clear();
            }
            target = label;
        }

        let ids = self.insert_placeholders(prompt, &target, count);
        let prompts = variation_prompts(prompt, count);
        let results = self.client.generate_many(&prompts);
        Some(self.resolve_placeholders(&ids, results, &target))
    }

    /// Routes a submitted search: an existing archive is opened as-is, a
    /// missing one is created and filled.
    pub fn submit_search(&mut self, query: &str) -> SearchOutcome {
        let query = query.trim().to_string();
        if query.is_empty() {
            return SearchOutcome::Ignored;
        }
        let Some(token) = self.guard.try_acquire() else {
            return SearchOutcome::Busy;
        };
        self.view.search_text = query.clone();

        let category = self.client.classify(&query, &self.state.categories);
        if self.state.has_category_images(&category) {
            self.view.active_category = category.clone();
            self.view.search_text.clear();
            self.notify(format!("Accessing existing {category} archive..."));
            self.events.record(
                "search_routed",
                payload(json!({ "query": query, "category": category, "route": "existing" })),
            );
            return SearchOutcome::Existing { category };
        }

        self.register_category(&category);
        self.view.active_category = category.clone();
        self.view.search_text.clear();
        self.events.record(
            "search_routed",
            payload(json!({ "query": query, "category": category, "route": "generate" })),
        );
        let batch = self
            .run_batch(&token, &query, SEARCH_BATCH_SIZE, Some(&category))
            .unwrap_or_else(|| BatchReport {
                ids: Vec::new(),
                succeeded: 0,
                failed: 0,
                category: category.clone(),
            });
        SearchOutcome::Generated { category, batch }
    }

    /// Seeds an empty category the studio is looking at.
    pub fn auto_fill(&mut self) -> Option<BatchReport> {
        if self.view.page != Page::Studio
            || self.view.active_category == ALL_CATEGORY
            || !self.view.search_text.trim().is_empty()
            || self.state.has_category_images(&self.view.active_category)
        {
            return None;
        }
        let category = self.view.active_category.clone();
        self.perform_generation(
            &format!("{category} aesthetics, masterpiece"),
            FILL_BATCH_SIZE,
            Some(&category),
        )
    }

    /// Scroll sentinel reached.
    pub fn load_more(&mut self) -> Option<BatchReport> {
        if self.view.page != Page::Studio
            || self.view.mode != StudioMode::Grid
            || self.filtered_images().is_empty()
        {
            return None;
        }
        let token = self.guard.try_acquire()?;

        let active = self.view.active_category.clone();
        let search = self.view.search_text.trim().to_string();
        let base = if active != ALL_CATEGORY {
            format!("Creative {active} art, high quality")
        } else if !search.is_empty() {
            search
        } else {
            let labels = self.state.categories.classifier_labels();
            let pick = labels
                .choose(&mut self.rng)
                .copied()
                .unwrap_or(FALLBACK_CATEGORY);
            format!("Creative {pick} image")
        };
        let modifier = STYLE_MODIFIERS
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(STYLE_MODIFIERS[0]);
        let forced = (active != ALL_CATEGORY).then_some(active);

        self.run_batch(
            &token,
            &format!("{base}, {modifier}"),
            LOAD_MORE_BATCH_SIZE,
            forced.as_deref(),
        )
    }

    /// Switches the filter (case-insensitive match on known labels), clears
    /// the search and auto-fills an empty category.
    pub fn select_category(&mut self, label: &str) -> Result<Option<BatchReport>> {
        let wanted = label.trim();
        let Some(found) = self
            .state
            .categories
            .labels()
            .iter()
            .find(|known| known.eq_ignore_ascii_case(wanted))
            .cloned()
        else {
            bail!("unknown category '{wanted}'");
        };
        self.view.active_category = found;
        self.view.search_text.clear();
        Ok(self.auto_fill())
    }

    /// Live filter text; does not trigger generation.
    pub fn set_search_text(&mut self, text: &str) {
        self.view.search_text = text.trim().to_string();
    }

    pub fn navigate(&mut self, page: Page) -> Option<BatchReport> {
        self.view.page = page;
        if page == Page::Studio {
            return self.auto_fill();
        }
        None
    }

    pub fn filtered_images(&self) -> Vec<&ImageRecord> {
        let search = self.view.search_text.trim().to_lowercase();
        if !search.is_empty() {
            return self
                .state
                .images
                .iter()
                .filter(|image| {
                    image.prompt.to_lowercase().contains(&search)
                        || image.category.to_lowercase().contains(&search)
                })
                .collect();
        }
        let active = self.view.active_category.as_str();
        self.state
            .images
            .iter()
            .filter(|image| active == ALL_CATEGORY || image.category == active)
            .collect()
    }

    pub fn home_summary(&self) -> HomeSummary {
        HomeSummary {
            total: self.state.images.len(),
            recent: self
                .state
                .images
                .iter()
                .filter(|image| image.is_displayable())
                .take(HOME_RECENT_LIMIT)
                .cloned()
                .collect(),
        }
    }

    pub fn preview(&self, id: &str) -> Result<&ImageRecord> {
        let Some(record) = self.state.find(id.trim()) else {
            bail!("no image with id {id}");
        };
        if !record.is_displayable() {
            bail!("image {id} is still generating");
        }
        Ok(record)
    }

    /// Writes the payload of `id` into `dir` and returns the file path.
    pub fn download(&mut self, id: &str, dir: &Path) -> Result<PathBuf> {
        let (record_id, prompt, image) = {
            let record = self.preview(id)?;
            (
                record.id.clone(),
                record.prompt.clone(),
                InlineImage::from_data_url(&record.url)?,
            )
        };
        let bytes = image.decode()?;
        let file_name = download_file_name(&prompt, image.extension(), &mut self.rng);

        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(file_name);
        std::fs::write(&path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;

        self.events.record(
            "image_downloaded",
            payload(json!({
                "id": record_id,
                "path": path.to_string_lossy(),
                "bytes": bytes.len(),
                "sha256": hex::encode(Sha256::digest(&bytes)),
            })),
        );
        Ok(path)
    }

    pub fn start_edit(&mut self, id: &str) -> Result<()> {
        let record = self.preview(id)?;
        let session = EditorSession::open(record)?;
        self.editor = Some(session);
        self.view.page = Page::Studio;
        self.view.mode = StudioMode::Editor;
        Ok(())
    }

    pub fn apply_edit(&mut self, instruction: &str) -> Result<ApplyOutcome> {
        let Some(session) = self.editor.as_mut() else {
            bail!("no image is open in the editor");
        };
        let outcome = session.apply(&self.client, instruction);
        if let ApplyOutcome::Failed(reason) = &outcome {
            self.events.record(
                "edit_failed",
                payload(json!({
                    "source_id": session.source().id,
                    "instruction": instruction.trim(),
                    "error": reason,
                })),
            );
        }
        Ok(outcome)
    }

    pub fn reset_edit(&mut self) -> Result<()> {
        let Some(session) = self.editor.as_mut() else {
            bail!("no image is open in the editor");
        };
        session.reset();
        Ok(())
    }

    /// Prepends the edited result as a new record and returns to the grid.
    /// `None` when no edit has been applied yet; the editor stays open.
    pub fn save_edit(&mut self) -> Result<Option<ImageRecord>> {
        let Some(session) = self.editor.as_ref() else {
            bail!("no image is open in the editor");
        };
        let Some(record) = session.save(self.ids.next_id(), now_millis()) else {
            return Ok(None);
        };
        let source_id = session.source().id.clone();

        self.state.images.insert(0, record.clone());
        self.persist();
        self.events.record(
            "edit_saved",
            payload(json!({
                "id": record.id,
                "source_id": source_id,
                "category": record.category,
            })),
        );
        self.close_editor();
        Ok(Some(record))
    }

    pub fn close_editor(&mut self) {
        self.editor = None;
        self.view.mode = StudioMode::Grid;
    }
}

/// Per-call prompts for a batch. Single calls use the prompt verbatim.
fn variation_prompts(prompt: &str, count: usize) -> Vec<String> {
    if count <= 1 {
        return vec![prompt.to_string(); count];
    }
    (1..=count)
        .map(|idx| format!("{prompt}, variation {idx}, detailed, high quality"))
        .collect()
}
