use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use skinswap_contracts::history::GeneratedImage;
use skinswap_contracts::presets::PresetCatalog;
use skinswap_contracts::{classify_aspect_ratio, ImageData, ItemStatus, StudioMode};
use skinswap_engine::{default_backend_registry, image_dimensions, Studio, StudioSettings};

#[derive(Debug, Parser)]
#[command(name = "skinswap", version, about = "Restyle, derive and refine images with a generative backend")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Data directory holding history.json and events.jsonl.
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    #[arg(long, global = true)]
    backend: Option<String>,
    #[arg(long, global = true)]
    model: Option<String>,
    #[arg(long, global = true)]
    history_limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    #[command(subcommand)]
    History(HistoryCommand),
    Presets,
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    source: PathBuf,
    #[arg(long)]
    reference: Option<PathBuf>,
    #[arg(long, default_value = "transfer")]
    mode: StudioMode,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    preset: Option<String>,
    #[arg(long, default_value_t = 0.5)]
    intensity: f64,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=4))]
    count: Option<u32>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    List {
        #[arg(long)]
        json: bool,
    },
    Export {
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
    Reuse {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Delete {
        id: String,
    },
    Clear {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Args)]
struct InspectArgs {
    image: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("skinswap error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = resolve_settings(StudioSettings::from_env(), &cli.global);
    run_with(cli.command, &settings)
}

fn resolve_settings(mut settings: StudioSettings, global: &GlobalArgs) -> StudioSettings {
    if let Some(home) = global.home.clone() {
        settings = settings.with_home(home);
    }
    if let Some(backend) = global.backend.clone() {
        settings.backend = backend;
    }
    if let Some(model) = global.model.clone() {
        settings.image_model = model;
    }
    if let Some(limit) = global.history_limit.filter(|limit| *limit >= 1) {
        settings.history_limit = limit;
    }
    settings
}

fn run_with(command: Command, settings: &StudioSettings) -> Result<i32> {
    match command {
        Command::Presets => {
            print_presets();
            Ok(0)
        }
        Command::Inspect(args) => run_inspect(&args),
        Command::Generate(args) => run_generate(&open_studio(settings)?, args),
        Command::History(command) => run_history(&open_studio(settings)?, command),
    }
}

fn open_studio(settings: &StudioSettings) -> Result<Studio> {
    let registry = default_backend_registry(settings);
    let backend = registry.get(&settings.backend).ok_or_else(|| {
        anyhow!(
            "unknown backend '{}' (available: {})",
            settings.backend,
            registry.names().join(", ")
        )
    })?;
    let studio = Studio::open(settings, backend);
    if !studio.history_enabled() {
        eprintln!(
            "skinswap: history unavailable at {}; results will not be kept",
            settings.history_path().display()
        );
    }
    Ok(studio)
}

fn run_generate(studio: &Studio, args: GenerateArgs) -> Result<i32> {
    studio.set_mode(args.mode)?;
    let source = ImageData::from_path(&args.source)?;
    let aspect = studio
        .load_source(source)
        .with_context(|| format!("cannot use {} as source", args.source.display()))?;
    let reference = args
        .reference
        .as_deref()
        .map(ImageData::from_path)
        .transpose()?;
    studio.set_reference(reference)?;

    let annotation = match args.preset.as_deref() {
        Some(preset) => PresetCatalog::default().apply(preset, &args.prompt)?,
        None => args.prompt.clone(),
    };
    let request = studio.batch_request(&annotation, args.intensity, args.count)?;
    println!(
        "Generating {} {} image(s) at {}...",
        request.count, args.mode, aspect
    );
    let outcome = studio.start(request)?;

    for (index, item) in outcome.results.iter().enumerate() {
        match item.status {
            ItemStatus::Succeeded => {
                let saved = match args.out.as_deref() {
                    Some(dir) => Some(save_result(dir, args.mode, item)?),
                    None => None,
                };
                match saved {
                    Some(path) => println!("[{}] succeeded {} -> {}", index + 1, item.id, path.display()),
                    None => println!("[{}] succeeded {}", index + 1, item.id),
                }
            }
            status => println!("[{}] {} {}", index + 1, status, item.id),
        }
    }
    if outcome.persist_failures > 0 {
        eprintln!(
            "skinswap: {} result(s) could not be saved to history",
            outcome.persist_failures
        );
    }
    if !outcome.pruned.is_empty() {
        println!("Pruned {} old history item(s).", outcome.pruned.len());
    }
    if let Some(path) = studio.events().path() {
        println!("Events: {}", path.display());
    }
    Ok(if outcome.succeeded() > 0 { 0 } else { 2 })
}

fn run_history(studio: &Studio, command: HistoryCommand) -> Result<i32> {
    match command {
        HistoryCommand::List { json } => {
            let records = studio.refresh_history()?;
            for record in &records {
                if json {
                    println!(
                        "{}",
                        json!({
                            "id": record.id,
                            "mode": record.mode,
                            "timestamp": record.timestamp,
                            "url_chars": record.url.len(),
                        })
                    );
                } else {
                    println!(
                        "{}  {:<8}  {}",
                        record.id,
                        record.mode.map(StudioMode::as_str).unwrap_or("-"),
                        format_timestamp(record.timestamp)
                    );
                }
            }
            if records.is_empty() && !json {
                println!("History is empty.");
            }
            Ok(0)
        }
        HistoryCommand::Export { id, out } => {
            let record = studio.find_history_record(&id)?;
            ImageData::from_data_url(&record.url)?.write_to(&out)?;
            println!("Exported {} to {}", id, out.display());
            Ok(0)
        }
        HistoryCommand::Reuse { id, out } => {
            let aspect = studio.reuse_history_item(&id)?;
            let source = studio
                .source()
                .ok_or_else(|| anyhow!("history item {id} did not load as source"))?;
            let out = out.unwrap_or_else(|| PathBuf::from(format!("reuse-{id}.{}", source.extension())));
            source.write_to(&out)?;
            println!("Source ready at {} ({aspect})", out.display());
            Ok(0)
        }
        HistoryCommand::Delete { id } => {
            studio.delete_history_item(&id)?;
            println!("Deleted {id}");
            Ok(0)
        }
        HistoryCommand::Clear { yes } => {
            if studio.clear_history(|| yes)? {
                println!("History cleared.");
                Ok(0)
            } else {
                eprintln!("skinswap: refusing to clear history without --yes");
                Ok(1)
            }
        }
    }
}

fn run_inspect(args: &InspectArgs) -> Result<i32> {
    let image = ImageData::from_path(&args.image)?;
    let (width, height) = image_dimensions(&image)?;
    let aspect = classify_aspect_ratio(width, height)?;
    println!("{}: {width}x{height} ({}) -> {aspect}", args.image.display(), image.mime_type);
    Ok(0)
}

fn print_presets() {
    for preset in PresetCatalog::default().list() {
        println!("{:<10}  {:<14}  {}", preset.id, preset.name, preset.description);
    }
}

fn save_result(dir: &Path, mode: StudioMode, item: &GeneratedImage) -> Result<PathBuf> {
    let image = ImageData::from_data_url(&item.url)?;
    let path = dir.join(result_file_name(mode, &item.id, image.extension()));
    image.write_to(&path)?;
    Ok(path)
}

fn result_file_name(mode: StudioMode, id: &str, extension: &str) -> String {
    format!("{}-{}.{}", mode.as_str(), id, extension)
}

fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| millis.to_string())
}
