mod client;
mod config;
mod dryrun;
mod editor;
mod gallery;
mod gemini;
mod guard;
mod providers;
#[cfg(test)]
mod test_support;

pub use client::GenerationClient;
pub use config::{first_non_empty_env, EngineConfig, DEFAULT_GEMINI_API_BASE};
pub use editor::{ApplyOutcome, EditorSession, EDIT_FAILED_MESSAGE};
pub use gallery::{
    BatchReport, GalleryController, HomeSummary, Page, SearchOutcome, StudioMode, ViewState,
    FILL_BATCH_SIZE, HOME_RECENT_LIMIT, LOAD_MORE_BATCH_SIZE, SEARCH_BATCH_SIZE,
    STYLE_MODIFIERS,
};
pub use guard::{BatchGuard, BatchToken};
pub use providers::{
    default_provider_registry, GenerationError, GenerationErrorKind, ImageProvider,
    ImageRequest, ProviderRegistry, TextProvider, TextRequest,
};
