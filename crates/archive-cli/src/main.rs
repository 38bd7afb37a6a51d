use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use archive_contracts::chat::{parse_intent, STUDIO_HELP_COMMANDS};
use archive_contracts::events::{payload, EventWriter};
use archive_contracts::inline_image::InlineImage;
use archive_contracts::models::ModelSelector;
use archive_contracts::records::{ImageRecord, ALL_CATEGORY};
use archive_contracts::storage::StateStore;
use archive_engine::{
    default_provider_registry, first_non_empty_env, ApplyOutcome, BatchReport, EngineConfig,
    GalleryController, GenerationClient, Page, SearchOutcome, EDIT_FAILED_MESSAGE,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

const DEFAULT_STATE_PATH: &str = ".infinite-archive/state.json";
const PROMPT_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Parser)]
#[command(
    name = "infinite-archive",
    version,
    about = "Generated image archive with auto-classified sections"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// State file (env ARCHIVE_STATE_PATH).
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    /// Event log; defaults to events.jsonl next to the state file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true)]
    image_model: Option<String>,
    #[arg(long, global = true)]
    text_model: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive studio (default).
    Studio,
    /// Classify a query and open or create its archive section.
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Open a category; an empty one is filled.
    Browse { category: String },
    /// Extend the grid with another batch.
    More {
        #[arg(long)]
        category: Option<String>,
    },
    List {
        #[arg(long)]
        category: Option<String>,
    },
    Categories,
    /// Apply one edit instruction and save the result as a new image.
    Edit {
        id: String,
        #[arg(required = true, num_args = 1..)]
        instruction: Vec<String>,
    },
    Download {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Home,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("infinite-archive error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut gallery = open_gallery(&cli.global)?;
    match cli.command.unwrap_or(Command::Studio) {
        Command::Studio => {
            run_studio(&mut gallery)?;
            Ok(0)
        }
        Command::Search { query } => {
            gallery.navigate(Page::Studio);
            report_search(&mut gallery, &query.join(" "));
            print_grid(&gallery);
            Ok(0)
        }
        Command::Browse { category } => {
            gallery.navigate(Page::Studio);
            let filled = gallery.select_category(&category)?;
            report_batch(&mut gallery, filled.as_ref());
            print_grid(&gallery);
            Ok(0)
        }
        Command::More { category } => {
            gallery.navigate(Page::Studio);
            if let Some(category) = category {
                let filled = gallery.select_category(&category)?;
                report_batch(&mut gallery, filled.as_ref());
            }
            let batch = gallery.load_more();
            if batch.is_none() {
                println!("Nothing to extend yet. Search or browse a category first.");
            }
            report_batch(&mut gallery, batch.as_ref());
            print_grid(&gallery);
            Ok(0)
        }
        Command::List { category } => {
            if let Some(category) = category {
                gallery.select_category(&category)?;
            }
            print_grid(&gallery);
            Ok(0)
        }
        Command::Categories => {
            print_categories(&gallery);
            Ok(0)
        }
        Command::Edit { id, instruction } => run_edit(&mut gallery, &id, &instruction.join(" ")),
        Command::Download { id, out } => {
            let dir = out.unwrap_or_else(|| PathBuf::from("."));
            let path = gallery.download(&id, &dir)?;
            println!("Saved {}", path.display());
            Ok(0)
        }
        Command::Home => {
            print_home(&gallery);
            Ok(0)
        }
    }
}

fn open_gallery(global: &GlobalArgs) -> Result<GalleryController> {
    let config = EngineConfig::from_env();
    let state_path = global
        .state
        .clone()
        .or_else(|| first_non_empty_env(&["ARCHIVE_STATE_PATH"]).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));
    let events_path = global
        .events
        .clone()
        .unwrap_or_else(|| state_path.with_file_name("events.jsonl"));
    let events = EventWriter::for_new_session(&events_path);

    let providers = default_provider_registry(&config)?;
    let image_model = global.image_model.clone().or(config.image_model.clone());
    let text_model = global.text_model.clone().or(config.text_model.clone());
    let client = GenerationClient::from_registry(
        &providers,
        &ModelSelector::new(None),
        image_model.as_deref(),
        text_model.as_deref(),
    )?
    .with_events(events.clone());
    for note in client.model_notes() {
        eprintln!("{note}");
    }

    events.record(
        "session_started",
        payload(json!({
            "state_path": state_path.to_string_lossy(),
            "image_model": client.image_model(),
            "text_model": client.text_model(),
        })),
    );
    Ok(GalleryController::open(
        StateStore::file(&state_path),
        client,
        events,
    ))
}

fn run_studio(gallery: &mut GalleryController) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();

    println!("Infinite Archive studio. Type to search, /help for commands.");
    let filled = gallery.navigate(Page::Studio);
    report_batch(gallery, filled.as_ref());
    print_grid(gallery);

    loop {
        print!("{}> ", prompt_label(gallery));
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => continue,
            "exit" => break,
            "help" => {
                println!("Commands: {}", STUDIO_HELP_COMMANDS.join(" "));
            }
            "search" => {
                let query = intent.arg("query").unwrap_or_default().to_string();
                report_search(gallery, &query);
                print_grid(gallery);
            }
            "set_filter" => {
                gallery.set_search_text(intent.arg("query").unwrap_or_default());
                print_grid(gallery);
            }
            "select_category" => {
                let Some(category) = intent.arg("category") else {
                    println!("/category requires a name");
                    continue;
                };
                match gallery.select_category(category) {
                    Ok(filled) => {
                        report_batch(gallery, filled.as_ref());
                        print_grid(gallery);
                    }
                    Err(err) => println!("{err:#}"),
                }
            }
            "load_more" => {
                let batch = gallery.load_more();
                if batch.is_none() {
                    println!("Nothing to extend right now.");
                }
                report_batch(gallery, batch.as_ref());
                print_grid(gallery);
            }
            "list" => print_grid(gallery),
            "categories" => print_categories(gallery),
            "preview" => {
                let Some(id) = intent.arg("id") else {
                    println!("/preview requires an image id");
                    continue;
                };
                match gallery.preview(id) {
                    Ok(record) => print_preview(record),
                    Err(err) => println!("{err:#}"),
                }
            }
            "start_edit" => {
                let Some(id) = intent.arg("id") else {
                    println!("/edit requires an image id");
                    continue;
                };
                match gallery.start_edit(id) {
                    Ok(()) => println!("Editing {id}. /apply <instruction>, /reset, /save, /back"),
                    Err(err) => println!("{err:#}"),
                }
            }
            "apply_edit" => {
                let instruction = intent.arg("instruction").unwrap_or_default().to_string();
                match gallery.apply_edit(&instruction) {
                    Ok(ApplyOutcome::Applied) => println!("Adjustments applied. /save to keep them."),
                    Ok(ApplyOutcome::Ignored) => println!("/apply requires an instruction"),
                    Ok(ApplyOutcome::Failed(_)) => println!("{EDIT_FAILED_MESSAGE}"),
                    Err(err) => println!("{err:#}"),
                }
            }
            "reset_edit" => match gallery.reset_edit() {
                Ok(()) => println!("Edits discarded."),
                Err(err) => println!("{err:#}"),
            },
            "save_edit" => match gallery.save_edit() {
                Ok(Some(record)) => println!("Saved as {}", record.id),
                Ok(None) => println!("Nothing to save yet."),
                Err(err) => println!("{err:#}"),
            },
            "close_editor" => {
                gallery.close_editor();
                print_grid(gallery);
            }
            "download" => {
                let Some(id) = intent.arg("id") else {
                    println!("/download requires an image id");
                    continue;
                };
                let dir = PathBuf::from(intent.arg("dir").unwrap_or("."));
                match gallery.download(id, &dir) {
                    Ok(path) => println!("Saved {}", path.display()),
                    Err(err) => println!("{err:#}"),
                }
            }
            "go_home" => {
                gallery.navigate(Page::Home);
                print_home(gallery);
            }
            "go_studio" => {
                let filled = gallery.navigate(Page::Studio);
                report_batch(gallery, filled.as_ref());
                print_grid(gallery);
            }
            "unknown" => {
                let command = intent.arg("command").unwrap_or("unknown");
                println!("Unknown command: /{command}");
            }
            other => println!("Unhandled action: {other}"),
        }
    }
    Ok(())
}

fn run_edit(gallery: &mut GalleryController, id: &str, instruction: &str) -> Result<i32> {
    gallery.start_edit(id)?;
    match gallery.apply_edit(instruction)? {
        ApplyOutcome::Ignored => bail!("edit instruction is empty"),
        ApplyOutcome::Failed(_) => {
            println!("{EDIT_FAILED_MESSAGE}");
            Ok(1)
        }
        ApplyOutcome::Applied => {
            if let Some(record) = gallery.save_edit()? {
                println!("Saved as {}", record.id);
                print_preview(&record);
            }
            Ok(0)
        }
    }
}

fn prompt_label(gallery: &GalleryController) -> String {
    if gallery.editor().is_some() {
        return "edit".to_string();
    }
    let view = gallery.view();
    if !view.search_text.is_empty() {
        return format!("search:{}", view.search_text);
    }
    view.active_category.clone()
}

fn report_search(gallery: &mut GalleryController, query: &str) {
    match gallery.submit_search(query) {
        SearchOutcome::Ignored => {}
        SearchOutcome::Busy => println!("Still generating, try again shortly."),
        SearchOutcome::Existing { .. } => flush_notification(gallery),
        SearchOutcome::Generated { batch, .. } => report_batch(gallery, Some(&batch)),
    }
}

fn report_batch(gallery: &mut GalleryController, batch: Option<&BatchReport>) {
    flush_notification(gallery);
    let Some(batch) = batch else {
        return;
    };
    if batch.failed > 0 {
        println!(
            "{}: {} of {} images generated",
            batch.category,
            batch.succeeded,
            batch.ids.len()
        );
    } else {
        println!("{}: {} images generated", batch.category, batch.succeeded);
    }
}

fn flush_notification(gallery: &mut GalleryController) {
    if let Some(message) = gallery.take_notification() {
        println!("{message}");
    }
}

fn print_grid(gallery: &GalleryController) {
    let view = gallery.view();
    let images = gallery.filtered_images();
    let heading = if view.search_text.is_empty() {
        view.active_category.clone()
    } else {
        format!("\"{}\"", view.search_text)
    };
    println!("{heading} ({} images)", images.len());
    if images.is_empty() {
        if view.active_category == ALL_CATEGORY && view.search_text.is_empty() {
            println!("  The archive is empty. Type a subject to search.");
        } else {
            println!("  No images match.");
        }
        return;
    }
    for image in images {
        println!("  {}", grid_line(image));
    }
}

fn grid_line(image: &ImageRecord) -> String {
    let status = if image.is_pending() { " (generating)" } else { "" };
    format!(
        "{:<15} {:<12} {}{status}",
        image.id,
        image.category,
        shorten(&image.prompt, PROMPT_PREVIEW_CHARS)
    )
}

fn print_categories(gallery: &GalleryController) {
    let view = gallery.view();
    let state = gallery.state();
    for label in state.categories.labels() {
        let count = if label == ALL_CATEGORY {
            state.images.len()
        } else {
            state
                .images
                .iter()
                .filter(|image| &image.category == label)
                .count()
        };
        let marker = if *label == view.active_category { "*" } else { " " };
        println!("{marker} {label:<16} {count}");
    }
}

fn print_home(gallery: &GalleryController) {
    let summary = gallery.home_summary();
    println!("Infinite Archive: {} images archived", summary.total);
    if summary.recent.is_empty() {
        println!("  Nothing archived yet. Enter the studio to start.");
        return;
    }
    println!("Recent:");
    for image in &summary.recent {
        println!("  {}", grid_line(image));
    }
}

fn print_preview(record: &ImageRecord) {
    println!("{}", record.id);
    println!("  category: {}", record.category);
    println!("  prompt:   {}", record.prompt);
    match describe_payload(&record.url) {
        Ok(details) => println!("  image:    {details}"),
        Err(err) => println!("  image:    unreadable ({err:#})"),
    }
}

fn describe_payload(url: &str) -> Result<String> {
    let image = InlineImage::from_data_url(url)?;
    let bytes = image.decode()?;
    let decoded = image::load_from_memory(&bytes)?;
    Ok(format!(
        "{}x{} {} ({} bytes)",
        decoded.width(),
        decoded.height(),
        image.mime_type,
        bytes.len()
    ))
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str, loading: bool) -> ImageRecord {
        ImageRecord {
            id: "17000000000000".to_string(),
            url: url.to_string(),
            prompt: "a very long prompt ".repeat(5),
            timestamp: 1,
            is_loading: loading,
            category: "Nature".to_string(),
        }
    }

    #[test]
    fn cli_defaults_to_studio_and_joins_free_text() -> Result<()> {
        let cli = Cli::try_parse_from(["infinite-archive"])?;
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from([
            "infinite-archive",
            "search",
            "a",
            "red",
            "fox",
            "--state",
            "/tmp/s.json",
        ])?;
        assert_eq!(cli.global.state, Some(PathBuf::from("/tmp/s.json")));
        let Some(Command::Search { query }) = cli.command else {
            bail!("expected search");
        };
        assert_eq!(query.join(" "), "a red fox");

        assert!(Cli::try_parse_from(["infinite-archive", "edit", "42"]).is_err());
        Ok(())
    }

    #[test]
    fn grid_line_marks_pending_and_shortens_prompt() {
        let line = grid_line(&record("", true));
        assert!(line.ends_with("… (generating)"));
        assert!(line.contains("Nature"));
        assert_eq!(shorten("short", 10), "short");
    }

    #[test]
    fn payload_description_reads_dimensions() -> Result<()> {
        let mut bytes = Vec::new();
        image::DynamicImage::new_rgb8(3, 2)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        let url = InlineImage::from_bytes("image/png", &bytes).to_data_url();
        let details = describe_payload(&url)?;
        assert!(details.starts_with("3x2 image/png"));
        assert!(describe_payload("not a data url").is_err());
        Ok(())
    }
}
