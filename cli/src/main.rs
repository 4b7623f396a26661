use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use st_core::domain::error::AppError;
use st_core::domain::settings::Settings;
use st_core::infra::clock::SystemClock;
use st_core::infra::remote::RemoteJobClient;
use st_core::usecase::job_registry::JobRegistry;
use st_core::usecase::subtitle_service::SubtitleService;

/// 分割済み音声セグメントをリモート文字起こしサービスに送り、SRT 字幕を出力する
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 音声セグメント。`path` または `path@offset_seconds`
    #[arg(required = true, value_parser = parse_segment)]
    segments: Vec<Segment>,

    /// 設定 JSON (省略時は設定ディレクトリの subtitler/config.json、無ければ環境変数のみ)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SRT の出力先 (省略時は標準出力)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// デバッグログを有効にする
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    path: PathBuf,
    offset: f64,
}

/// `clip.wav@12.5` → (clip.wav, 12.5)。`@` 以降が数値でなければ全体をパスとみなす。
fn parse_segment(raw: &str) -> Result<Segment, String> {
    if raw.is_empty() {
        return Err("empty segment".into());
    }
    if let Some((path, offset)) = raw.rsplit_once('@') {
        if let Ok(offset) = offset.parse::<f64>() {
            if !offset.is_finite() || offset < 0.0 {
                return Err(format!("offset must be a non-negative number: {offset}"));
            }
            if path.is_empty() {
                return Err(format!("missing path in {raw:?}"));
            }
            return Ok(Segment {
                path: PathBuf::from(path),
                offset,
            });
        }
    }
    Ok(Segment {
        path: PathBuf::from(raw),
        offset: 0.0,
    })
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("subtitler").join("config.json"))
        .filter(|p| p.exists())
}

fn load_settings(config: Option<&Path>) -> Result<Settings, AppError> {
    let settings = match config.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => {
            log::info!("Using config {}", path.display());
            Settings::from_json_file(&path)?
        }
        None => Settings::from_env()?,
    };
    Ok(settings)
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let settings = load_settings(cli.config.as_deref())?;
    log::debug!("{:?}", settings);

    let clock = Arc::new(SystemClock);
    let client = RemoteJobClient::from_settings(&settings, clock.clone())
        .map_err(|e| AppError::internal(format!("HTTP client init failed: {e}")))?;
    let registry = Arc::new(JobRegistry::with_settings(&settings.registry, clock));
    let service = SubtitleService::new(Arc::new(client), registry);

    let mut segments = HashMap::new();
    for seg in cli.segments {
        if segments.insert(seg.path.clone(), seg.offset).is_some() {
            log::warn!("Segment {} given twice, last offset wins", seg.path.display());
        }
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let srt = service.transcribe_to_srt(&segments, &cancel).await?;

    match &cli.output {
        Some(path) => {
            std::fs::write(path, &srt)
                .map_err(|e| AppError::io(format!("failed to write {}: {e}", path.display())))?;
            log::info!("Wrote subtitles to {}", path.display());
        }
        None => print!("{srt}"),
    }

    if let Ok(summary) = serde_json::to_string(&service.metrics()) {
        log::debug!("Metrics: {}", summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", e.to_payload());
            ExitCode::FAILURE
        }
    }
}
