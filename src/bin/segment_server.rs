//! Segmentation server: receives raw BGRA frames and hue ranges over TCP,
//! runs contour segmentation per query, and answers with per-query 2D
//! positions keyed by request order.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use chroma_tracker::config::{Config, SegmentDefaults};
use chroma_tracker::frame::TrackerQuery;
use chroma_tracker::protocol::{HueRange, RequestMessage, ResponseFrame, ServerCodec};
use chroma_tracker::segment;

const CONFIG_PATH: &str = "chroma_tracker.toml";

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

type LogFile = Arc<Mutex<std::io::BufWriter<std::fs::File>>>;

fn open_log_file() -> Result<LogFile> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = format!("logs/segment_server_{}.log", ts);
    let file = std::fs::File::create(&path)?;
    eprintln!("Log: {}", path);
    Ok(Arc::new(Mutex::new(std::io::BufWriter::new(file))))
}

macro_rules! log {
    ($logfile:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        eprintln!("{}", msg);
        if let Ok(mut f) = $logfile.lock() {
            let _ = writeln!(f, "{}", msg);
            let _ = f.flush();
        }
    }};
}

// ---------------------------------------------------------------------------
// Per-connection session
// ---------------------------------------------------------------------------

/// ワイヤ上のクエリは色相範囲だけなので、残りのしきい値は設定で補完する
fn query_from_range(index: usize, range: &HueRange, defaults: &SegmentDefaults) -> TrackerQuery {
    TrackerQuery {
        id: index as u32,
        min_hue: range.min_hue,
        max_hue: range.max_hue,
        min_saturation: defaults.min_saturation,
        min_brightness: defaults.min_brightness,
        min_region_area: defaults.min_region_area,
        max_misses: 0, // ヒステリシスはホスト側の責務
    }
}

async fn handle_connection(
    stream: TcpStream,
    defaults: SegmentDefaults,
    logfile: LogFile,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, ServerCodec);

    let mut frame_count = 0u32;
    let mut found_count = 0u32;
    let mut segment_sum_ms = 0.0f64;
    let mut stats_timer = Instant::now();

    while let Some(msg) = framed.next().await {
        match msg? {
            RequestMessage::Frame(request) => {
                let t0 = Instant::now();
                let (ranges, timestamp, frame) = request
                    .into_color_frame()
                    .context("malformed frame payload")?;

                let mut results = Vec::with_capacity(ranges.len());
                for (i, range) in ranges.iter().enumerate() {
                    let query = query_from_range(i, range, &defaults);
                    // 反転した色相範囲は設定エラー: 偽の未検出ではなく
                    // セッションエラーとして報告する
                    let result = segment::segment(&frame, &query)
                        .with_context(|| format!("query {} rejected", i))?;
                    if result.is_found() {
                        found_count += 1;
                    }
                    results.push(result.pixel);
                }

                framed
                    .send(ResponseFrame {
                        timestamp_millis: timestamp,
                        results,
                    })
                    .await?;

                frame_count += 1;
                segment_sum_ms += t0.elapsed().as_secs_f64() * 1000.0;

                if stats_timer.elapsed().as_secs() >= 1 {
                    let n = frame_count.max(1) as f64;
                    log!(
                        logfile,
                        "[stats] {} frames/s, {} matches, segment {:.1}ms avg ({}x{})",
                        frame_count,
                        found_count,
                        segment_sum_ms / n,
                        frame.width(),
                        frame.height(),
                    );
                    frame_count = 0;
                    found_count = 0;
                    segment_sum_ms = 0.0;
                    stats_timer = Instant::now();
                }
            }
            RequestMessage::EndOfSession => {
                log!(logfile, "[tcp] end of session");
                break;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH);
    let logfile = open_log_file()?;
    log!(logfile, "Segment Server ({})", env!("GIT_VERSION"));
    log!(
        logfile,
        "[config] listen_addr={}, min_saturation={}, min_brightness={}, min_region_area={}",
        config.server.listen_addr,
        config.segment.min_saturation,
        config.segment.min_brightness,
        config.segment.min_region_area,
    );

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    log!(logfile, "[tcp] listening on {}", config.server.listen_addr);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        log!(logfile, "[tcp] connection from {}", peer);
                        let defaults = config.segment.clone();
                        let lf = logfile.clone();
                        tokio::spawn(async move {
                            match handle_connection(stream, defaults, lf.clone()).await {
                                Ok(()) => log!(lf, "[tcp] {} disconnected", peer),
                                Err(e) => log!(lf, "[tcp] {} session error: {e:#}", peer),
                            }
                        });
                    }
                    Err(e) => {
                        log!(logfile, "[tcp] accept error: {e}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log!(logfile, "[signal] shutting down");
                break;
            }
        }
    }

    Ok(())
}
