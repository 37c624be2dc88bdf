use rtsp_frames::{Config, FrameReader, VideoStream};
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Pull up to `limit` frames (0 = no limit), stopping early on Ctrl-C.
async fn pull_frames(reader: &mut FrameReader, limit: u64) -> (u64, u64) {
    let mut frames = 0;
    let mut bytes = 0;

    let pull = async {
        while limit == 0 || frames < limit {
            let Some(frame) = reader.next_frame().await else {
                break;
            };
            frames += 1;
            bytes += frame.as_bytes().len() as u64;
            debug!(frame = frames, shape = ?frame.shape(), "Frame received");
        }
    };

    tokio::select! {
        _ = pull => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    (frames, bytes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration from CLI and/or config file
    let config = Config::load()?;
    let source = config.source()?;
    let format = config.format()?;

    let mut stream = VideoStream::new(source, format).with_options(config.options());
    if let Some(filter) = &config.filter {
        stream = stream.with_filter(filter.clone());
    }

    let started = Instant::now();
    stream.open().await?;

    let pulled = match stream.frames().await {
        Ok(mut reader) => Ok(pull_frames(&mut reader, config.frames).await),
        Err(error) => Err(error),
    };
    let outcome = stream.close().await?;
    let (frames, bytes) = pulled?;

    let summary = json!({
        "url": stream.source().redacted_url(),
        "frame_size": stream.format().frame_size(),
        "frames": frames,
        "bytes": bytes,
        "elapsed_ms": started.elapsed().as_millis() as u64,
        "stop": outcome,
    });
    println!("{summary}");

    Ok(())
}
