use idcapture::{
    camera::{V4lCamera, VideoSource},
    cli::{clear_screen, poll_key, AsciiRenderer, PreviewKey},
    common::{system_config_file, Config, DevMode, IdCaptureError},
    core::{
        compress, select_liveness_detector, CameraState, CaptureStep, CompressionSettings,
        Consent, DocumentType, EventBus, FlowServices, PipelineEvent, ResolvedView, SubjectId,
        VerificationFlow,
    },
    storage::{FsAssetStore, LocalRegistry, ReviewVerdict, VerificationBackend},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "idcapture")]
#[command(about = "Identity document capture and submission")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (defaults to configs/idcapture.toml in dev mode)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show verification status and which view the subject gets
    Status {
        #[arg(short, long)]
        subject: String,
    },
    /// Run the capture flow and submit
    Submit {
        #[arg(short, long)]
        subject: String,
        /// Full legal name as printed on the document
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        country: String,
        #[arg(short = 't', long, value_parser = parse_document_type)]
        document_type: DocumentType,
        /// Document photo; the camera is used when omitted
        #[arg(long)]
        document: Option<PathBuf>,
        /// Selfie photo; the camera is used when omitted
        #[arg(long)]
        selfie: Option<PathBuf>,
        /// Open the capture flow even if a submission is pending review or
        /// has reviewer feedback (the feedback is cleared first)
        #[arg(long)]
        force: bool,
        /// Confirm all review checks without prompting
        #[arg(short, long)]
        yes: bool,
    },
    /// Clear reviewer feedback so a new submission can be made
    Resubmit {
        #[arg(short, long)]
        subject: String,
    },
    /// Record a review outcome (development stand-in for the reviewer)
    Review {
        #[arg(short, long)]
        subject: String,
        #[arg(short, long, value_enum)]
        verdict: VerdictArg,
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// Run the image compressor on a file
    Compress {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Byte budget (defaults to the configured budget)
        #[arg(long)]
        max_bytes: Option<usize>,
    },
    /// List video devices
    DetectCamera,
}

#[derive(Clone, Copy, ValueEnum)]
enum VerdictArg {
    Verified,
    Unverified,
}

fn parse_document_type(s: &str) -> std::result::Result<DocumentType, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = load_config(cli.config.as_deref(), &dev_mode)?;

    match cli.command {
        Commands::Status { subject } => {
            let subject = SubjectId::new(subject)?;
            let registry = open_registry(&config, &dev_mode)?;
            let report = registry.status(&subject).await?;
            let view = idcapture::core::resolve(report.status, report.comment.as_deref(), false);

            if cli.json {
                let record = registry.get_submission(&subject).await?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "subject": subject.as_str(),
                        "status": report.status,
                        "comment": report.comment,
                        "view": view,
                        "submission": record,
                    }))?
                );
            } else {
                println!("Subject:  {}", subject);
                println!("Status:   {}", report.status);
                if let Some(comment) = &report.comment {
                    println!("Comment:  {}", comment);
                }
                println!("View:     {}", describe_view(&view));
            }
        }
        Commands::Submit { subject, name, country, document_type, document, selfie, force, yes } => {
            let subject = SubjectId::new(subject)?;
            let needs_camera = document.is_none() || selfie.is_none();
            let services = build_services(&config, &dev_mode, needs_camera)?;
            let events = services.events.clone();
            let mut flow = VerificationFlow::new(subject, services);

            let mut rx = events.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    if let PipelineEvent::VerificationSubmitted { subject, attempt, .. } = event {
                        tracing::info!("verification submitted: subject={} attempt={}", subject, attempt);
                    }
                }
            });

            let details = Details { name, country, document_type };
            run_submit(&mut flow, &dev_mode, details, document, selfie, force, yes, cli.json).await?;
        }
        Commands::Resubmit { subject } => {
            let subject = SubjectId::new(subject)?;
            let services = build_services(&config, &dev_mode, false)?;
            let mut flow = VerificationFlow::new(subject, services);

            match flow.enter(false).await? {
                ResolvedView::NeedsResubmission(_) => {
                    let view = flow.resubmit().await?;
                    flow.cancel().await;
                    println!("Feedback cleared. {}", describe_view(&view));
                    println!("Run `idcapture submit` to capture new photos.");
                }
                view => println!("Nothing to resubmit. {}", describe_view(&view)),
            }
        }
        Commands::Review { subject, verdict, comment } => {
            if !dev_mode.is_enabled() {
                bail!("review is only available with --dev");
            }
            let subject = SubjectId::new(subject)?;
            let registry = open_registry(&config, &dev_mode)?;
            let verdict = match verdict {
                VerdictArg::Verified => ReviewVerdict::Verified,
                VerdictArg::Unverified => ReviewVerdict::Unverified,
            };
            let record = registry.record_review(&subject, verdict, comment).await?;
            println!("{} is now {}", subject, record.status);
        }
        Commands::Compress { input, output, max_bytes } => {
            let mut settings = CompressionSettings::from(&config.compressor);
            if let Some(max) = max_bytes {
                settings.max_bytes = max;
            }

            let raw = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let result = compress(&raw, &settings)?;

            let output = output.unwrap_or_else(|| input.with_extension("compressed.jpg"));
            std::fs::write(&output, &result.bytes)?;

            println!(
                "{} -> {}: {} -> {} bytes, {}x{}, quality {:.2}, scale {:.3}, {} pass(es){}",
                input.display(),
                output.display(),
                raw.len(),
                result.len(),
                result.width,
                result.height,
                result.quality,
                result.scale,
                result.iterations,
                if result.within_budget(settings.max_bytes) { "" } else { " (over budget)" }
            );
        }
        Commands::DetectCamera => {
            let cameras = V4lCamera::list_all_cameras()?;
            if cameras.is_empty() {
                println!("No cameras found. Check /dev/video* permissions.");
                return Ok(());
            }
            for cam in cameras {
                println!(
                    "/dev/video{}: {} [{}]{}",
                    cam.index,
                    cam.name,
                    cam.formats.join(", "),
                    if cam.can_capture { "" } else { " (no video capture)" }
                );
            }
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(explicit: Option<&Path>, dev_mode: &DevMode) -> Result<Config> {
    if let Some(path) = explicit {
        return Ok(Config::load_from_path(path)?);
    }

    if dev_mode.is_enabled() && Path::new("configs/idcapture.toml").exists() {
        return Ok(Config::load()?);
    }

    let system = system_config_file();
    if system.exists() {
        Ok(Config::load_from_path(&system)?)
    } else {
        tracing::info!("No config at {}, using defaults", system.display());
        Ok(Config::default())
    }
}

/// `(assets, registry)` directories; `storage.data_dir` overrides the defaults.
fn data_dirs(config: &Config, dev_mode: &DevMode) -> Result<(PathBuf, PathBuf)> {
    Ok(match &config.storage.data_dir {
        Some(dir) => (dir.join("assets"), dir.join("registry")),
        None => (dev_mode.assets_dir()?, dev_mode.registry_dir()?),
    })
}

fn open_registry(config: &Config, dev_mode: &DevMode) -> Result<LocalRegistry> {
    let (_, registry) = data_dirs(config, dev_mode)?;
    Ok(LocalRegistry::new(registry)?)
}

fn build_services(config: &Config, dev_mode: &DevMode, with_camera: bool) -> Result<FlowServices> {
    let (assets, registry) = data_dirs(config, dev_mode)?;
    let camera: Option<Arc<dyn VideoSource>> = if with_camera {
        Some(Arc::new(V4lCamera::new(&config.camera)))
    } else {
        None
    };

    Ok(FlowServices {
        backend: Arc::new(LocalRegistry::new(registry)?),
        store: Arc::new(FsAssetStore::new(assets)?),
        camera,
        liveness: select_liveness_detector(&config.liveness, dev_mode.is_enabled()),
        compression: CompressionSettings::from(&config.compressor),
        liveness_interval: Duration::from_millis(config.liveness.frame_interval_ms),
        liveness_max_duration: config.liveness.max_duration_secs.map(Duration::from_secs),
        events: EventBus::default(),
    })
}

fn describe_view(view: &ResolvedView) -> String {
    match view {
        ResolvedView::Verified => "Verified - no further action needed".to_string(),
        ResolvedView::PendingReview => "Pending review - we'll let you know".to_string(),
        ResolvedView::NeedsResubmission(comment) => {
            format!("Not verified: \"{}\" - run `idcapture resubmit` to try again", comment)
        }
        ResolvedView::CaptureFlow => "Ready to capture".to_string(),
    }
}

struct Details {
    name: String,
    country: String,
    document_type: DocumentType,
}

#[allow(clippy::too_many_arguments)]
async fn run_submit(
    flow: &mut VerificationFlow,
    dev_mode: &DevMode,
    details: Details,
    document: Option<PathBuf>,
    selfie: Option<PathBuf>,
    force: bool,
    yes: bool,
    json: bool,
) -> Result<()> {
    let view = flow.enter(force).await?;
    if !view.starts_capture() {
        println!("{}", describe_view(&view));
        return Ok(());
    }

    flow.next().await?;
    flow.set_legal_name(&details.name)?;
    flow.set_country(&details.country)?;
    flow.set_document_type(details.document_type)?;

    let outcome = flow.next().await.map_err(explain)?;
    take_photo(flow, dev_mode, outcome.camera, document.as_deref(), "Fit the whole document inside the frame").await?;

    let outcome = flow.next().await.map_err(explain)?;
    take_photo(flow, dev_mode, outcome.camera, selfie.as_deref(), "").await?;

    flow.next().await.map_err(explain)?;
    debug_assert_eq!(flow.step(), Some(CaptureStep::Review));

    for consent in Consent::ALL {
        let given = yes || confirm(&format!("Confirm that {}?", consent.description()))?;
        flow.set_consent(consent, given)?;
    }
    if !flow.submit_enabled() {
        bail!("Submission needs every confirmation");
    }

    loop {
        match flow.submit().await {
            Ok(receipt) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&receipt.submission)?);
                } else {
                    println!("Submitted for review (attempt {}).", receipt.attempt);
                }
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                eprintln!("{}", e.user_message());
                tracing::error!("Submission failed: {}", e);
                if yes || !confirm("Try submitting again?")? {
                    return Err(e.into());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn explain(e: IdCaptureError) -> anyhow::Error {
    anyhow::anyhow!(e.user_message())
}

async fn take_photo(
    flow: &mut VerificationFlow,
    dev_mode: &DevMode,
    camera: CameraState,
    file: Option<&Path>,
    guide: &str,
) -> Result<()> {
    if let Some(path) = file {
        let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let image = flow.attach_photo(raw).await.map_err(explain)?;
        println!("Loaded {} ({} bytes after compression)", path.display(), image.len());
        return Ok(());
    }

    match camera {
        CameraState::Ready => {}
        CameraState::Denied(reason) => bail!("Camera access denied ({}). Grant access and retry.", reason),
        CameraState::Unavailable(reason) => bail!("Camera unavailable: {}", reason),
        CameraState::NotNeeded => bail!("Camera was not opened for this step"),
    }

    let is_document = flow.step() == Some(CaptureStep::DocumentCapture);
    let renderer = AsciiRenderer::new(None, None);

    crossterm::terminal::enable_raw_mode()?;
    let result = preview_loop(flow, &renderer, is_document, guide).await;
    crossterm::terminal::disable_raw_mode()?;

    if !result? {
        bail!("Capture cancelled");
    }
    let image = flow.capture_photo().await.map_err(explain)?;
    println!("\r\nCaptured ({} bytes)\r", image.len());

    if dev_mode.is_enabled() {
        let prefix = if is_document { "document" } else { "selfie" };
        let path = dev_mode.get_capture_path(prefix)?;
        std::fs::write(&path, &image.bytes)?;
        tracing::debug!("Saved capture to {}", path.display());
    }
    Ok(())
}

/// Returns `true` when the subject asked to capture.
async fn preview_loop(
    flow: &VerificationFlow,
    renderer: &AsciiRenderer,
    is_document: bool,
    guide: &str,
) -> Result<bool> {
    loop {
        match poll_key()? {
            Some(PreviewKey::Capture) => return Ok(true),
            Some(PreviewKey::Cancel) => return Ok(false),
            None => {}
        }

        let frame = flow.preview_frame().await?;
        let caption = if is_document { guide } else { flow.liveness_hint().message() };

        clear_screen()?;
        print!("{}", renderer.render_frame(&frame, caption, is_document));
        print!("\r\n[space] capture   [esc] cancel\r\n");
        io::stdout().flush()?;

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
