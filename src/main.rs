//! Landmark Lens CLI
//!
//! Runs the recognition pipeline from the command line: classify a still
//! image, or run the live camera path for a while and print every view
//! change as JSON.

use clap::{Parser, Subcommand};
use landmark_lens::{
    capture::{CaptureDevice, DeviceClass, Frame},
    inference::{
        Classifier, InferenceError, MockModelLoader, ModelLoader, ModelUnavailable, Prediction,
    },
    pipeline::{GateDecision, GatePath},
    session::{CameraLifecycle, Command, LifecycleClosed, LifecycleHandle, ViewState},
    ConfigError, FileConfig, SessionError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "landmark-lens", version, about = "On-device landmark recognition")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Classify a still image.
    Classify {
        /// Image file (PNG, JPEG, ...).
        image: PathBuf,
    },
    /// Run the live camera pipeline.
    Camera {
        /// How long to run before stopping.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Overrides the configured device class.
        #[arg(long)]
        device_class: Option<DeviceClass>,
    },
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open image: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Model(#[from] ModelUnavailable),
    #[error("classification failed: {0}")]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Closed(#[from] LifecycleClosed),
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!("Landmark Lens v{}", landmark_lens::VERSION);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.mode {
            Mode::Classify { image } => classify(&config, &image).await,
            Mode::Camera {
                seconds,
                device_class,
            } => camera(&config, Duration::from_secs(seconds), device_class).await,
        }
    })
}

fn model_loader(config: &FileConfig) -> Arc<dyn ModelLoader> {
    #[cfg(feature = "onnx")]
    if config.model.path.is_some() {
        return Arc::new(landmark_lens::inference::OnnxModelLoader::new());
    }

    #[cfg(not(feature = "onnx"))]
    if config.model.path.is_some() {
        warn!("Built without the onnx feature, using the mock model");
    }

    Arc::new(MockModelLoader::new())
}

fn capture_device() -> Arc<dyn CaptureDevice> {
    #[cfg(feature = "camera")]
    {
        Arc::new(landmark_lens::capture::NativeCameraDevice::new(0))
    }

    #[cfg(not(feature = "camera"))]
    {
        info!("Built without the camera feature, using the mock camera");
        Arc::new(landmark_lens::capture::MockDevice::new())
    }
}

/// Waits for the model load to settle.
async fn model_ready(view: &mut watch::Receiver<ViewState>) -> Result<(), AppError> {
    let settled = view
        .wait_for(|v| v.model_ready || v.error.is_some())
        .await
        .map_err(|_| LifecycleClosed)?
        .clone();

    match settled.error {
        Some(error) if !settled.model_ready => Err(error.into()),
        _ => Ok(()),
    }
}

fn print_view(view: &ViewState) {
    match serde_json::to_string(view) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(error = %e, "Failed to serialize view"),
    }
}

async fn classify(config: &FileConfig, path: &Path) -> Result<(), AppError> {
    let image = image::open(path)?;
    let frame = Frame::from_image(&image, 0);
    info!(path = %path.display(), width = frame.width(), height = frame.height(), "Image loaded");

    let model = model_loader(config).load(&config.model).await?;
    let classifier = Classifier::new(model, config.model.resize);
    let ranked = classifier.classify(&frame).await?;

    let ranking: Vec<&Prediction> = ranked.iter().collect();
    let shown = match config.gate.decide(GatePath::SingleShot, ranked.top().clone()) {
        GateDecision::Show(prediction) => Some(prediction),
        GateDecision::Clear => None,
    };
    let output = serde_json::json!({
        "prediction": shown,
        "ranking": ranking,
    });
    println!("{}", output);
    Ok(())
}

async fn camera(
    config: &FileConfig,
    duration: Duration,
    device_class: Option<DeviceClass>,
) -> Result<(), AppError> {
    let mut options = config.lifecycle_options();
    if let Some(class) = device_class {
        options.device_class = class;
    }
    info!(device_class = %options.device_class, ?duration, "Starting camera pipeline");

    let handle = CameraLifecycle::new(capture_device(), model_loader(config), options).spawn();
    serve_metrics(config, &handle);

    let mut view = handle.subscribe();
    model_ready(&mut view).await?;
    handle.send(Command::Start).await?;

    let deadline = tokio::time::sleep(duration);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(deadline, interrupt);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut interrupt => {
                info!("Interrupted");
                break;
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                print_view(&view.borrow_and_update());
            }
        }
    }

    if handle.send(Command::Stop).await.is_err() {
        warn!("Lifecycle already closed");
    }
    handle.shutdown().await;
    info!("Camera pipeline stopped");
    Ok(())
}

#[cfg(feature = "metrics")]
fn serve_metrics(config: &FileConfig, handle: &LifecycleHandle) {
    use landmark_lens::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    if config.metrics.port == 0 {
        return;
    }

    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!(error = %e, "Failed to create metrics registry");
            return;
        }
    };

    let server_config = MetricsServerConfig::with_port(config.metrics.port);
    let server = MetricsServer::new(server_config, registry);
    tokio::spawn(MetricsServer::follow(server.state(), handle.metrics()));
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            warn!(error = %e, "Metrics server failed");
        }
    });
}

#[cfg(not(feature = "metrics"))]
fn serve_metrics(config: &FileConfig, _handle: &LifecycleHandle) {
    if config.metrics.port != 0 {
        warn!(
            port = config.metrics.port,
            "Built without the metrics feature, exporter disabled"
        );
    }
}
