use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use livecheck_core::brightness::mean_luminance;
use livecheck_core::{spectacles, EarReading, EyeState, LandmarkSet};
use livecheck_session::{
    spawn_engine, EngineHandle, FrameSource, HttpTransport, LogObserver, ReplaySource, SessionEvent,
    SessionObserver, SourceError, SourceFrame,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "livecheck", about = "Liveness capture client")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full capture session against a recorded frame directory.
    Replay {
        /// Directory holding manifest.jsonl and the frame images.
        dir: PathBuf,
        /// Upload endpoint, overriding the configuration.
        #[arg(long)]
        endpoint: Option<String>,
        /// Restart the recording when it runs out.
        #[arg(long = "loop")]
        looping: bool,
    },
    /// Print the per-frame analysis of one image as JSON.
    Inspect {
        image: PathBuf,
        /// JSON array of `[x, y]` normalized landmark points for one face.
        #[arg(long)]
        landmarks: PathBuf,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Replay {
            dir,
            endpoint,
            looping,
        } => {
            let mut config = Config::load().context("failed to load configuration")?;
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            replay(&config, &dir, looping).await
        }
        Commands::Inspect { image, landmarks } => inspect(&image, &landmarks),
        Commands::Config => {
            let config = Config::load().context("failed to load configuration")?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Logs every event and forwards it to the command loop.
struct Forward(mpsc::UnboundedSender<SessionEvent>);

impl SessionObserver for Forward {
    fn notify(&self, event: SessionEvent) {
        LogObserver.notify(event.clone());
        let _ = self.0.send(event);
    }
}

async fn replay(config: &Config, dir: &Path, looping: bool) -> Result<()> {
    let settings = config.session_settings()?;
    let mut source = ReplaySource::open(dir, looping)
        .with_context(|| format!("cannot open recording {}; check the path and retry", dir.display()))?;

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let transport = Arc::new(HttpTransport::new(config.endpoint.clone(), config.upload_timeout()));
    let engine = spawn_engine(settings, transport, Arc::new(Forward(event_tx)))?;

    // decoding blocks, so frames are produced on their own thread
    let (frame_tx, mut frames) = mpsc::channel::<Result<SourceFrame, SourceError>>(8);
    std::thread::Builder::new()
        .name("livecheck-replay".into())
        .spawn(move || loop {
            let next = match source.next_frame() {
                Ok(Some(frame)) => Ok(frame),
                Ok(None) => break,
                Err(e) => Err(e),
            };
            let failed = next.is_err();
            if frame_tx.blocking_send(next).is_err() || failed {
                break;
            }
        })
        .context("failed to spawn replay thread")?;

    tokio::time::sleep(config.startup_delay()).await;
    let session_id = engine.start().await?;
    tracing::info!(session = %session_id, endpoint = %config.endpoint, "replay started");

    drive(&engine, &mut events, &mut frames, tokio::time::Instant::now()).await?;
    println!("session {session_id} uploaded");
    Ok(())
}

/// Feed frames at their recorded offsets until the session completes.
async fn drive(
    engine: &EngineHandle,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    frames: &mut mpsc::Receiver<Result<SourceFrame, SourceError>>,
    started: tokio::time::Instant,
) -> Result<()> {
    let mut exhausted = false;
    // next frame, held until its recorded offset
    let mut pending: Option<SourceFrame> = None;
    loop {
        let due = pending.as_ref().map_or(started, |sf| started + sf.offset);
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Completed) => return Ok(()),
                Some(SessionEvent::TransferFailed { reason }) => {
                    bail!("transfer failed: {reason}; run the replay again to retry");
                }
                Some(_) => {}
                None => bail!("engine stopped unexpectedly"),
            },
            _ = tokio::time::sleep_until(due), if pending.is_some() => {
                if let Some(sf) = pending.take() {
                    engine.submit_frame(sf.frame, sf.faces).await?;
                }
            }
            next = frames.recv(), if pending.is_none() && !exhausted => match next {
                Some(Ok(sf)) => pending = Some(sf),
                Some(Err(e)) => {
                    engine.abort().await?;
                    return Err(e).context("frame source failed; check the recording and retry");
                }
                None => {
                    exhausted = true;
                    tracing::info!("recording exhausted, waiting for the session to finish");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                engine.abort().await?;
                bail!("interrupted");
            }
        }
    }
}

fn inspect(image_path: &Path, landmarks_path: &Path) -> Result<()> {
    let image = image::open(image_path)
        .with_context(|| format!("failed to open {}", image_path.display()))?
        .to_rgba8();
    let text = std::fs::read_to_string(landmarks_path)
        .with_context(|| format!("failed to read {}", landmarks_path.display()))?;
    let face: LandmarkSet = serde_json::from_str(&text)
        .with_context(|| format!("malformed landmarks in {}", landmarks_path.display()))?;

    let scores = spectacles::score(&image, &face);
    let detection = spectacles::detect(&image, &face);
    let ear = EarReading::from_landmarks(&face);
    let brightness = mean_luminance(&image);

    let report = serde_json::json!({
        "width": image.width(),
        "height": image.height(),
        "landmarks": face.len(),
        "spectacles": {
            "scores": scores,
            "confidence": detection.confidence,
            "detected": detection.detected,
        },
        "brightness": brightness,
        "ear": {
            "left": ear.left,
            "right": ear.right,
            "mean": ear.mean(),
            "state": ear.mean().map(|v| format!("{:?}", EyeState::from_ear(v))),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use livecheck_core::Frame;
    use livecheck_session::{SessionSettings, Transport, TransportError, UploadPayload, UploadReceipt};
    use std::time::Duration;

    struct NullTransport;

    impl Transport for NullTransport {
        fn upload(&self, _: &UploadPayload) -> Result<UploadReceipt, TransportError> {
            Ok(UploadReceipt::default())
        }
    }

    fn source_frame(offset: Duration) -> SourceFrame {
        SourceFrame {
            frame: Frame::new(RgbaImage::new(4, 4), 0),
            faces: vec![],
            offset,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_completion_not_blocked_by_pending_frame() {
        let engine = spawn_engine(
            SessionSettings::default(),
            Arc::new(NullTransport),
            Arc::new(LogObserver),
        )
        .unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (frame_tx, mut frames) = mpsc::channel(8);
        frame_tx
            .send(Ok(source_frame(Duration::from_secs(3600))))
            .await
            .unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = event_tx.send(SessionEvent::Completed);
        });

        let started = tokio::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            drive(&engine, &mut events, &mut frames, started),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
        drop(frame_tx);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_due_frames_reach_engine() {
        let engine = spawn_engine(
            SessionSettings::default(),
            Arc::new(NullTransport),
            Arc::new(LogObserver),
        )
        .unwrap();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (frame_tx, mut frames) = mpsc::channel(8);
        for ms in [0, 10, 20] {
            frame_tx
                .send(Ok(source_frame(Duration::from_millis(ms))))
                .await
                .unwrap();
        }
        drop(frame_tx);

        let started = tokio::time::Instant::now();
        let driver = drive(&engine, &mut events, &mut frames, started);
        let finish = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = event_tx.send(SessionEvent::Completed);
        };
        let (result, ()) = tokio::join!(driver, finish);
        result.unwrap();
        assert!(frames.try_recv().is_err());
    }
}
