//! Status loop: once per second, log FPS and capture counters until Ctrl-C,
//! the configured duration, or the capture thread exiting.

use std::time::{Duration, Instant};

use screencopy_core::CaptureStats;
use tracing::{info, warn};

/// Why the status loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    DurationElapsed,
    CaptureStopped,
}

/// Engine view the monitor needs.
pub trait StatsSource {
    fn stats(&self) -> CaptureStats;
    fn is_running(&self) -> bool;
    /// `(width, height)`, zero before the first frame.
    fn frame_size(&self) -> (u32, u32);
}

pub async fn run<S: StatsSource>(source: &S, duration: Option<Duration>) -> StopReason {
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut fps_counter = FpsCounter::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return StopReason::Interrupted;
            }

            _ = &mut deadline => {
                info!("Capture duration elapsed");
                return StopReason::DurationElapsed;
            }

            _ = ticker.tick() => {
                if !source.is_running() {
                    warn!("Capture thread exited");
                    return StopReason::CaptureStopped;
                }
                let stats = source.stats();
                let fps = fps_counter.update(stats.frames_captured);
                let (width, height) = source.frame_size();
                info!(
                    "{:.1} fps  {}x{}  frames={} failed={} recreated={} overruns={}",
                    fps, width, height,
                    stats.frames_captured, stats.cycles_failed,
                    stats.buffer_recreations, stats.overruns,
                );
            }
        }
    }
}

/// Rolling ~1 second FPS from a monotonically increasing frame count.
struct FpsCounter {
    last_count:   u64,
    window_start: Instant,
    last_fps:     f32,
}

impl FpsCounter {
    fn new() -> Self {
        Self { last_count: 0, window_start: Instant::now(), last_fps: 0.0 }
    }

    /// FPS over the window since the previous update; windows under 0.5 s
    /// keep the previous value.
    fn update(&mut self, total: u64) -> f32 {
        let elapsed = self.window_start.elapsed().as_secs_f32();
        if elapsed >= 0.5 {
            self.last_fps = total.saturating_sub(self.last_count) as f32 / elapsed;
            self.last_count = total;
            self.window_start = Instant::now();
        }
        self.last_fps
    }
}
