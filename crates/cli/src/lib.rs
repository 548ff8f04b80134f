use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use signscan_core::{
    annotate, match_identifier, process_document, BatchConfig, DocumentReport, ExtractionConfig,
    ImagePageSource, NoopBackend, PageOptions, PageSource, PdfPageSource, RecognitionBackend,
    SignPipeline, TesseractCli, TesseractConfig, DEFAULT_DPI, REFERENCE_DPI,
};
use signscan_pdf::{default_engine, OpenSource, PdfEngine};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "signscan")]
#[command(about = "Extract sign identifiers from floor-plan pages")]
pub struct Cli {
    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print page sizes and embedded identifiers as JSON.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Extract sign records from a PDF.
    Extract {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// 1-based page to process; repeatable, all pages when omitted.
        #[arg(long = "page", value_name = "N")]
        pages: Vec<u32>,
        /// Rendering resolution for page rasters.
        #[arg(long, default_value_t = DEFAULT_DPI)]
        dpi: f32,
        /// Pages processed in parallel (0 = one per CPU).
        #[arg(long, default_value_t = 0)]
        workers: usize,
        /// Pre-rendered raster for a page, as `N=PATH` with a 1-based page.
        #[arg(long = "image", value_name = "N=PATH", value_parser = parse_page_image)]
        images: Vec<(u32, PathBuf)>,
        /// Directory for annotated page images.
        #[arg(long, value_name = "DIR")]
        annotate: Option<PathBuf>,
        #[command(flatten)]
        common: ExtractionArgs,
    },
    /// Detect sign records on a single page image.
    Detect {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
        /// Resolution the image was rendered at.
        #[arg(long, default_value_t = REFERENCE_DPI)]
        dpi: f32,
        /// Write an annotated copy of the image here.
        #[arg(long, value_name = "FILE")]
        annotate: Option<PathBuf>,
        #[command(flatten)]
        common: ExtractionArgs,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct ExtractionArgs {
    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Expected number of signs per page.
    #[arg(long, value_name = "N")]
    expected: Option<usize>,
    #[arg(long, value_enum, default_value_t = OcrChoice::Auto)]
    ocr: OcrChoice,
    /// Path to the tesseract binary.
    #[arg(long, value_name = "PATH")]
    tesseract: Option<PathBuf>,
    /// Per-call recognition timeout.
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,
    /// Whole-page time budget.
    #[arg(long, value_name = "MS")]
    page_budget_ms: Option<u64>,
    /// Write JSON here instead of stdout.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OcrChoice {
    /// Tesseract when installed, otherwise no recognition.
    Auto,
    Tesseract,
    None,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    pages: Vec<PageInfoOutput>,
}

#[derive(Debug, Serialize)]
struct PageInfoOutput {
    page_index: u32,
    width_pt: f32,
    height_pt: f32,
    text_spans: usize,
    identifiers: Vec<String>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Extract { file, pages, dpi, workers, images, annotate: dir, common } => {
            run_extract(&file, &pages, dpi, workers, &images, dir.as_deref(), &common)
        }
        Commands::Detect { image, dpi, annotate: path, common } => {
            run_detect(&image, dpi, path.as_deref(), &common)
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

fn run_info(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let mut pages = Vec::with_capacity(page_count as usize);
    for page_index in 0..page_count {
        let text = engine
            .page_text(handle, page_index)
            .with_context(|| format!("failed to read text of page {}", page_index + 1))?;
        let identifiers = text
            .spans
            .iter()
            .filter_map(|span| match_identifier(&span.text))
            .map(|id| id.to_string())
            .collect();
        pages.push(PageInfoOutput {
            page_index,
            width_pt: text.size.width_pt,
            height_pt: text.size.height_pt,
            text_spans: text.spans.len(),
            identifiers,
        });
    }

    let payload = InfoOutput { path: file.display().to_string(), page_count, pages };
    emit(&payload, None)?;

    engine.close(handle)?;

    Ok(())
}

fn load_config(args: &ExtractionArgs, dpi: f32) -> Result<ExtractionConfig> {
    let config = match &args.config {
        Some(path) => ExtractionConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ExtractionConfig::default(),
    };

    let mut config = config.scaled_to_dpi(dpi);
    if args.timeout_ms.is_some() {
        config.locator.timeout_ms = args.timeout_ms;
    }
    if args.page_budget_ms.is_some() {
        config.page_budget_ms = args.page_budget_ms;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_backend(
    args: &ExtractionArgs,
    config: &ExtractionConfig,
) -> Result<Arc<dyn RecognitionBackend>> {
    let timeout = config.locator.timeout_ms.map(Duration::from_millis);
    let tesseract_config = match &args.tesseract {
        Some(path) => TesseractConfig::new().with_binary(path.clone()),
        None => TesseractConfig::new(),
    }
    .with_timeout(timeout);

    let backend: Arc<dyn RecognitionBackend> = match args.ocr {
        OcrChoice::None => return Ok(Arc::new(NoopBackend)),
        OcrChoice::Tesseract => Arc::new(
            TesseractCli::new(tesseract_config).context("tesseract backend unavailable")?,
        ),
        OcrChoice::Auto => match TesseractCli::new(tesseract_config) {
            Ok(cli) => Arc::new(cli),
            Err(err) => {
                tracing::warn!(error = %err, "label recognition disabled");
                return Ok(Arc::new(NoopBackend));
            }
        },
    };

    Ok(backend)
}

fn build_pipeline(args: &ExtractionArgs, dpi: f32) -> Result<SignPipeline> {
    let config = load_config(args, dpi)?;
    let backend = build_backend(args, &config)?;
    tracing::info!(backend = backend.name(), "recognition backend ready");
    SignPipeline::new(config, backend).context("failed to build pipeline")
}

fn run_extract(
    file: &Path,
    pages: &[u32],
    dpi: f32,
    workers: usize,
    images: &[(u32, PathBuf)],
    annotate_dir: Option<&Path>,
    common: &ExtractionArgs,
) -> Result<()> {
    ensure_file_exists(file)?;
    if dpi <= 0.0 {
        anyhow::bail!("--dpi must be positive");
    }
    for &(page, ref path) in images {
        ensure_file_exists(path)?;
        if page == 0 {
            anyhow::bail!("--image page numbers are 1-based and must be >= 1");
        }
    }

    let pipeline = build_pipeline(common, dpi)?;

    #[cfg(feature = "pdfium")]
    let engine = signscan_pdf::pdfium_backend::PdfiumEngine::from_system_library()
        .context("failed to load pdfium")?;
    #[cfg(not(feature = "pdfium"))]
    let engine = default_engine();

    let mut source = PdfPageSource::open(engine, file, dpi).context("failed to open PDF")?;
    for (page, path) in images {
        source = source.with_raster_override(page - 1, path);
    }

    let page_indices = resolve_pages(pages, source.page_count())?;
    let mut batch = BatchConfig::default()
        .with_options(PageOptions::default().with_expected_count(common.expected));
    if workers > 0 {
        batch = batch.with_workers(workers);
    }

    let report = process_document(&pipeline, &source, &page_indices, &batch)
        .with_context(|| format!("failed to extract signs from {}", file.display()))?;

    if let Some(dir) = annotate_dir {
        write_annotations(&source, &report, file, dir)?;
    }

    emit(&report, common.output.as_deref())
}

fn run_detect(
    image: &Path,
    dpi: f32,
    annotate_path: Option<&Path>,
    common: &ExtractionArgs,
) -> Result<()> {
    ensure_file_exists(image)?;
    if dpi <= 0.0 {
        anyhow::bail!("--dpi must be positive");
    }

    let pipeline = build_pipeline(common, dpi)?;
    let source = ImagePageSource::open(image)
        .with_context(|| format!("failed to read image {}", image.display()))?;

    let options = PageOptions::default().with_expected_count(common.expected);
    let result = pipeline.process_page(&source, 0, &options).context("failed to detect signs")?;

    if let Some(path) = annotate_path {
        let raster = source.rasterize(0)?;
        save_image(&annotate(&raster, &result), path)?;
    }

    emit(&result, common.output.as_deref())
}

fn resolve_pages(pages: &[u32], page_count: u32) -> Result<Vec<u32>> {
    if pages.is_empty() {
        return Ok((0..page_count).collect());
    }

    let mut indices = Vec::with_capacity(pages.len());
    for &page in pages {
        if page == 0 {
            anyhow::bail!("--page is 1-based and must be >= 1");
        }
        if page > page_count {
            anyhow::bail!("--page {page} is out of range (document has {page_count} pages)");
        }
        if !indices.contains(&(page - 1)) {
            indices.push(page - 1);
        }
    }
    Ok(indices)
}

fn write_annotations(
    source: &dyn PageSource,
    report: &DocumentReport,
    file: &Path,
    dir: &Path,
) -> Result<()> {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("page");
    for result in &report.pages {
        let page_index = result.page.page_index;
        let raster = source
            .rasterize(page_index)
            .with_context(|| format!("failed to render page {}", page_index + 1))?;
        let path = dir.join(format!("{stem}-page-{}.png", page_index + 1));
        save_image(&annotate(&raster, result), &path)?;
    }
    Ok(())
}

fn save_image(image: &image::RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image.save(path).with_context(|| format!("failed to write image to {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote annotated page");
    Ok(())
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, json + "\n")
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn parse_page_image(value: &str) -> std::result::Result<(u32, PathBuf), String> {
    let (page, path) =
        value.split_once('=').ok_or_else(|| format!("expected N=PATH, got {value:?}"))?;
    let page = page.trim().parse::<u32>().map_err(|err| format!("invalid page {page:?}: {err}"))?;
    if path.is_empty() {
        return Err("image path is empty".to_string());
    }
    Ok((page, PathBuf::from(path)))
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_image_accepts_page_and_path() {
        assert_eq!(
            parse_page_image("2=renders/p2.png"),
            Ok((2, PathBuf::from("renders/p2.png")))
        );
        assert!(parse_page_image("renders/p2.png").is_err());
        assert!(parse_page_image("x=p.png").is_err());
        assert!(parse_page_image("3=").is_err());
    }

    #[test]
    fn resolve_pages_is_one_based_and_deduplicated() {
        assert_eq!(resolve_pages(&[], 3).expect("all pages"), vec![0, 1, 2]);
        assert_eq!(resolve_pages(&[2, 2, 1], 3).expect("pages"), vec![1, 0]);
        assert!(resolve_pages(&[0], 3).is_err());
        assert!(resolve_pages(&[4], 3).is_err());
    }
}
