//! Command-line collaborator for the capture engine.
//!
//! # Responsibility
//! - Translate arguments, stdin and attachment files into a `CaptureRecord`.
//! - Call the engine and print resulting paths; no file invariants live here.

use clap::{Args, Parser, Subcommand};
use kms_capture_core::{
    core_version, default_log_level, init_logging, CaptureEngine, CaptureError, CaptureId,
    CaptureRecord, EngineConfig, MediaAttachment, MediaKind, Modality,
};
use log::info;
use std::error::Error;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Save quick captures into a markdown vault.
#[derive(Parser, Debug)]
#[command(name = "kms-capture", version, about, long_about = None)]
struct Cli {
    /// YAML config file with a `vault:` section
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Vault root (overrides config and KMS_VAULT_PATH)
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// Absolute directory for rolling log files; logging is off without it
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// trace | debug | info | warn | error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save a new capture; never overwrites an existing file
    Save(CaptureArgs),
    /// Overwrite an existing capture after backing it up
    Update {
        id: String,
        #[command(flatten)]
        capture: CaptureArgs,
    },
    /// Print a stored capture
    Show { id: String },
    /// List capture files, newest first
    List,
    /// Print the core version
    Version,
}

#[derive(Args, Debug, Default)]
struct CaptureArgs {
    /// Capture text; read from stdin when omitted or `-`
    content: Option<String>,

    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long = "source")]
    sources: Vec<String>,

    #[arg(long = "context")]
    context: Vec<String>,

    /// Replaces the inferred modality set
    #[arg(long = "modality")]
    modalities: Vec<String>,

    #[arg(long)]
    screenshot: Option<PathBuf>,

    #[arg(long)]
    audio: Option<PathBuf>,

    #[arg(long)]
    image: Option<PathBuf>,

    /// Arbitrary file attachment; repeatable
    #[arg(long = "attach")]
    files: Vec<PathBuf>,

    #[arg(long)]
    clipboard: Option<String>,

    /// Number in [0, 1]
    #[arg(long)]
    importance: Option<f64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<CaptureError>() {
                Some(capture) => eprintln!("error[{}]: {capture}", capture.code()),
                None => eprintln!("error: {err}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    match cli.command {
        Command::Version => {
            println!("kms_capture_core version={}", core_version());
            Ok(())
        }
        Command::Save(args) => {
            let engine = engine(cli.config.as_deref(), cli.vault)?;
            save(&engine, args)
        }
        Command::Update { id, capture } => {
            let engine = engine(cli.config.as_deref(), cli.vault)?;
            update(&engine, &id, capture)
        }
        Command::Show { id } => {
            let engine = engine(cli.config.as_deref(), cli.vault)?;
            show(&engine, &id)
        }
        Command::List => {
            let engine = engine(cli.config.as_deref(), cli.vault)?;
            for path in engine.list_captures()? {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

/// Resolution order: defaults, config file, `KMS_VAULT_PATH`, `--vault`.
fn engine(config_path: Option<&Path>, vault: Option<PathBuf>) -> CliResult<CaptureEngine> {
    let mut config = match config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(vault) = vault {
        config.vault_path = vault;
    }
    Ok(CaptureEngine::new(&config)?)
}

fn save(engine: &CaptureEngine, args: CaptureArgs) -> CliResult<()> {
    let content = read_content(args.content.as_deref())?;
    let mut record = CaptureRecord::now(content);
    let attachments = apply_args(&mut record, &args)?;
    warn_missing_content(&record, &attachments);

    let saved = engine.save(&record, &attachments)?;
    info!(
        "event=cli_save module=cli status=ok id={} media={}",
        saved.id,
        saved.media.len()
    );
    println!("{}", saved.path.display());
    for media in &saved.media {
        println!("{}", engine.layout().media_dir().join(&media.relative_path).display());
    }
    Ok(())
}

fn update(engine: &CaptureEngine, id: &str, args: CaptureArgs) -> CliResult<()> {
    let id = CaptureId::parse(id)?;
    let mut record = match engine.load_record(&id) {
        Ok(record) => record,
        Err(CaptureError::ReadFailed { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            CaptureRecord::with_id(id, chrono::Utc::now(), "")
        }
        Err(err) => return Err(err.into()),
    };
    if args.content.is_some() || !io::stdin().is_terminal() {
        record.content = read_content(args.content.as_deref())?;
    }
    record.last_edited_date = chrono::Utc::now().date_naive();
    let attachments = apply_args(&mut record, &args)?;

    let saved = engine.update(&record, &attachments)?;
    println!("{}", saved.path.display());
    for issue in saved.backup_issues() {
        eprintln!("warning: saved, but backup failed: {issue}");
    }
    Ok(())
}

fn show(engine: &CaptureEngine, id: &str) -> CliResult<()> {
    let record = engine.load_record(&CaptureId::parse(id)?)?;
    println!("id: {}", record.id);
    println!("timestamp: {}", record.timestamp.to_rfc3339());
    let modalities = record
        .modalities
        .iter()
        .map(|modality| modality.as_str())
        .collect::<Vec<_>>();
    println!("modalities: {}", modalities.join(", "));
    println!("tags: {}", record.tags.as_slice().join(", "));
    println!("sources: {}", record.sources.as_slice().join(", "));
    println!("context: {}", record.context.join(", "));
    println!("status: {}", record.status.as_str());
    if let Some(importance) = record.importance {
        println!("importance: {importance}");
    }
    for media in &record.media {
        println!("{}: {}", media.kind.as_str(), media.relative_path);
    }
    if !record.content.is_empty() {
        println!();
        println!("{}", record.content);
    }
    Ok(())
}

fn read_content(arg: Option<&str>) -> io::Result<String> {
    match arg {
        Some(text) if text != "-" => Ok(text.to_string()),
        _ if io::stdin().is_terminal() && arg.is_none() => Ok(String::new()),
        _ => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

/// Copies labels and options onto `record` and loads attachment files.
fn apply_args(record: &mut CaptureRecord, args: &CaptureArgs) -> CliResult<Vec<MediaAttachment>> {
    for tag in &args.tags {
        record.tags.insert(tag);
    }
    for source in &args.sources {
        record.sources.insert(source);
    }
    for entity in &args.context {
        record.add_context(entity);
    }
    if let Some(clipboard) = &args.clipboard {
        record.clipboard = Some(clipboard.clone());
        record.modalities.insert(Modality::Clipboard);
    }
    if args.importance.is_some() {
        record.importance = args.importance;
    }

    let mut attachments = Vec::new();
    let singles = [
        (&args.screenshot, MediaKind::Screenshot, Modality::Screenshot),
        (&args.audio, MediaKind::Audio, Modality::Audio),
        (&args.image, MediaKind::Image, Modality::File),
    ];
    for (path, kind, modality) in singles {
        if let Some(path) = path {
            attachments.push(load_attachment(path, kind)?);
            record.modalities.insert(modality);
        }
    }
    for path in &args.files {
        attachments.push(load_attachment(path, MediaKind::File)?);
        record.modalities.insert(Modality::File);
    }

    if !args.modalities.is_empty() {
        record.modalities.clear();
        for name in &args.modalities {
            let modality = Modality::parse(name)
                .ok_or_else(|| format!("unknown modality `{name}`"))?;
            record.modalities.insert(modality);
        }
    }
    Ok(attachments)
}

fn load_attachment(path: &Path, kind: MediaKind) -> CliResult<MediaAttachment> {
    let bytes = std::fs::read(path)
        .map_err(|err| format!("cannot read attachment `{}`: {err}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| kind.as_str().to_string());
    Ok(MediaAttachment::new(name, kind, bytes))
}

fn warn_missing_content(record: &CaptureRecord, attachments: &[MediaAttachment]) {
    for modality in record.missing_modality_content(attachments) {
        eprintln!("warning: modality `{}` has no content", modality.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_args, CaptureArgs, Cli, Command};
    use clap::Parser;
    use kms_capture_core::{CaptureRecord, Modality};

    #[test]
    fn save_collects_repeated_flags() {
        let cli = Cli::parse_from([
            "kms-capture",
            "save",
            "--tag",
            "ML",
            "--tag",
            "ml",
            "--source",
            "slack",
            "hello",
        ]);
        let Command::Save(args) = cli.command else {
            panic!("expected save");
        };
        assert_eq!(args.content.as_deref(), Some("hello"));

        let mut record = CaptureRecord::now("hello");
        let attachments = apply_args(&mut record, &args).unwrap();
        assert!(attachments.is_empty());
        assert_eq!(record.tags.as_slice(), &["ML".to_string()]);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["kms-capture", "show", "abc", "--vault", "/tmp/v"]);
        assert_eq!(cli.vault.as_deref(), Some(std::path::Path::new("/tmp/v")));
        assert!(matches!(cli.command, Command::Show { .. }));
    }

    #[test]
    fn explicit_modalities_replace_inferred_ones() {
        let args = CaptureArgs {
            clipboard: Some("copied".to_string()),
            modalities: vec!["system-audio".to_string()],
            ..CaptureArgs::default()
        };
        let mut record = CaptureRecord::now("x");
        apply_args(&mut record, &args).unwrap();
        assert_eq!(
            record.modalities.into_iter().collect::<Vec<_>>(),
            vec![Modality::SystemAudio]
        );
        assert_eq!(record.clipboard.as_deref(), Some("copied"));
    }

    #[test]
    fn unknown_modality_is_rejected() {
        let args = CaptureArgs {
            modalities: vec!["smell".to_string()],
            ..CaptureArgs::default()
        };
        assert!(apply_args(&mut CaptureRecord::now("x"), &args).is_err());
    }
}
