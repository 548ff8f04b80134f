//! Recognition backends for sign labels
//!
//! The label locator hands small preprocessed grayscale crops to a
//! [`RecognitionBackend`]. Backends are pluggable trait objects; the crate
//! ships a no-op backend, a Tesseract command-line backend and a wrapper that
//! bounds every call with a timeout.

use image::{GrayImage, ImageFormat};
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Text read from one image region
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    /// Raw recognized text
    pub text: String,

    /// Confidence score (0.0 to 1.0)
    pub confidence: f32,
}

impl Recognition {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence: confidence.clamp(0.0, 1.0) }
    }

    pub fn empty() -> Self {
        Self { text: String::new(), confidence: 0.0 }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Recognition backend errors
#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("recognition backend unavailable: {0}")]
    Unavailable(String),

    #[error("recognition failed: {0}")]
    Backend(String),

    #[error("invalid image data: {0}")]
    InvalidImage(String),

    #[error("recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Reads text from a preprocessed grayscale image
pub trait RecognitionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize `image`, restricting output to the characters in `whitelist`
    fn recognize(&self, image: &GrayImage, whitelist: &str) -> Result<Recognition, OcrError>;

    /// Per-call deadline the backend enforces (and cleans up after) itself
    fn call_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Bound every call of `backend` by `timeout_ms`.
///
/// Backends that already stop themselves within the limit are returned as
/// they are; anything else is wrapped in a [`TimeoutBackend`].
pub fn with_call_timeout(
    backend: Arc<dyn RecognitionBackend>,
    timeout_ms: Option<u64>,
) -> Arc<dyn RecognitionBackend> {
    let timeout = match timeout_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms),
        _ => return backend,
    };
    match backend.call_timeout() {
        Some(own) if own <= timeout => backend,
        _ => Arc::new(TimeoutBackend::new(backend, timeout)),
    }
}

/// Backend that never recognizes anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

impl RecognitionBackend for NoopBackend {
    fn name(&self) -> &str {
        "noop"
    }

    fn recognize(&self, _: &GrayImage, _: &str) -> Result<Recognition, OcrError> {
        Ok(Recognition::empty())
    }
}

/// Tesseract invocation settings
#[derive(Debug, Clone)]
pub struct TesseractConfig {
    /// Explicit binary; looked up on `PATH` when unset
    pub binary: Option<PathBuf>,

    /// Path to Tesseract data directory (tessdata)
    pub tessdata_path: Option<PathBuf>,

    pub language: String,

    /// OCR engine mode (0=Original, 1=Neural nets LSTM, 2=Legacy+LSTM, 3=Default)
    pub engine_mode: i32,

    /// Page segmentation mode (8=Single word)
    pub page_segmentation_mode: i32,

    /// Kill the process when a call runs longer than this
    pub timeout: Option<Duration>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: None,
            tessdata_path: None,
            language: "eng".to_string(),
            engine_mode: 3,
            page_segmentation_mode: 8,
            timeout: None,
        }
    }
}

impl TesseractConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, path: PathBuf) -> Self {
        self.binary = Some(path);
        self
    }

    pub fn with_tessdata_path(mut self, path: PathBuf) -> Self {
        self.tessdata_path = Some(path);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_engine_mode(mut self, mode: i32) -> Self {
        self.engine_mode = mode;
        self
    }

    pub fn with_page_segmentation_mode(mut self, mode: i32) -> Self {
        self.page_segmentation_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }
}

/// Runs the `tesseract` binary once per region
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    config: TesseractConfig,
}

impl TesseractCli {
    pub fn new(config: TesseractConfig) -> Result<Self, OcrError> {
        let binary = match &config.binary {
            Some(path) => path.clone(),
            None => which::which("tesseract")
                .map_err(|err| OcrError::Unavailable(format!("tesseract not found: {err}")))?,
        };
        tracing::debug!(binary = %binary.display(), "using tesseract");
        Ok(Self { binary, config })
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    fn command(&self, whitelist: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.language)
            .arg("--oem")
            .arg(self.config.engine_mode.to_string())
            .arg("--psm")
            .arg(self.config.page_segmentation_mode.to_string());
        if let Some(tessdata) = &self.config.tessdata_path {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        if !whitelist.is_empty() {
            command.arg("-c").arg(format!("tessedit_char_whitelist={whitelist}"));
        }
        command.arg("tsv");
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        command
    }

    /// Run one recognition process, feeding `png` and collecting its output
    fn run(
        &self,
        whitelist: &str,
        png: &[u8],
    ) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), OcrError> {
        let mut child = self.command(whitelist).spawn()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(png),
                None => Ok(()),
            });
            let stdout = scope.spawn(move || read_pipe(stdout));
            let stderr = scope.spawn(move || read_pipe(stderr));

            let status = wait_with_deadline(&mut child, self.config.timeout);

            let joined =
                |name: &str| OcrError::backend(format!("tesseract {name} thread panicked"));
            let written = writer.join().map_err(|_| joined("stdin"))?;
            let stdout = stdout.join().map_err(|_| joined("stdout"))??;
            let stderr = stderr.join().map_err(|_| joined("stderr"))??;

            let status = status?;
            if status.success() {
                written?;
            }
            Ok((status, stdout, stderr))
        })
    }
}

fn read_pipe(pipe: Option<impl Read>) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer)?;
    }
    Ok(buffer)
}

/// Wait for `child`, killing and reaping it once `timeout` has passed
fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
) -> Result<ExitStatus, OcrError> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        let now = Instant::now();
        if now >= deadline {
            if let Err(err) = child.kill() {
                tracing::warn!(error = %err, "failed to kill tesseract after timeout");
            }
            let _ = child.wait();
            return Err(OcrError::Timeout(timeout));
        }
        thread::sleep(CHILD_POLL_INTERVAL.min(deadline - now));
    }
}

impl RecognitionBackend for TesseractCli {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &GrayImage, whitelist: &str) -> Result<Recognition, OcrError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(OcrError::InvalidImage("empty region".to_string()));
        }

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|err| OcrError::InvalidImage(err.to_string()))?;

        let (status, stdout, stderr) = self.run(whitelist, &png)?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(OcrError::backend(format!(
                "tesseract exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&stdout)))
    }

    fn call_timeout(&self) -> Option<Duration> {
        self.config.timeout
    }
}

/// Join word-level rows of Tesseract TSV output; confidence is the mean
fn parse_tsv(tsv: &str) -> Recognition {
    let mut words = Vec::new();
    let mut confidences = Vec::new();

    for line in tsv.lines().skip(1) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 12 || columns[0] != "5" {
            continue;
        }
        let text = columns[11].trim();
        let Ok(confidence) = columns[10].trim().parse::<f32>() else {
            continue;
        };
        if text.is_empty() || confidence < 0.0 {
            continue;
        }
        words.push(text);
        confidences.push(confidence);
    }

    if words.is_empty() {
        return Recognition::empty();
    }
    let mean = confidences.iter().sum::<f32>() / confidences.len() as f32;
    Recognition::new(words.join(" "), mean / 100.0)
}

/// Bounds every call to an inner backend by `timeout`
///
/// A call that overruns keeps running on its worker thread; its result is
/// discarded. Backends that can cancel their own work should enforce a
/// deadline themselves instead (see [`RecognitionBackend::call_timeout`]).
pub struct TimeoutBackend {
    inner: Arc<dyn RecognitionBackend>,
    timeout: Duration,
}

impl TimeoutBackend {
    pub fn new(inner: Arc<dyn RecognitionBackend>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl RecognitionBackend for TimeoutBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn recognize(&self, image: &GrayImage, whitelist: &str) -> Result<Recognition, OcrError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let image = image.clone();
        let whitelist = whitelist.to_owned();

        thread::Builder::new()
            .name("signscan-ocr".to_string())
            .spawn(move || {
                let _ = tx.send(inner.recognize(&image, &whitelist));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(OcrError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(OcrError::backend("recognition worker exited without a result"))
            }
        }
    }
}
