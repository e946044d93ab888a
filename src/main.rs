// =============================================================================
// VULKAN TRIANGLE - Minimal real-time renderer
// =============================================================================
//
// Draws a colored triangle (or quad) with Vulkan through ash, keeping two
// frames in flight and rebuilding the swapchain whenever the window changes.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  main loop (poll events, draw, FPS title)                       │
// │    └── Renderer                                                 │
// │          ├── FrameOrchestrator (slot rotation, fence discipline)│
// │          └── FrameResources                                     │
// │                ├── SwapchainManager + RenderPass + Pipeline     │
// │                ├── Command buffers + FrameSync (per slot)       │
// │                └── Vertex buffer + uniform buffers              │
// │                      └── VulkanContext (instance, device)       │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for this slot's fence
// 2. Acquire swapchain image (out of date -> rebuild, skip frame)
// 3. Reset fence, re-record command buffer
// 4. Submit to the graphics queue
// 5. Present, rebuild afterwards if stale or resized
//
// =============================================================================

mod backend;
mod config;
mod geometry;
mod renderer;
mod window;

use anyhow::{Context, Result};
use config::{Config, DEFAULT_CONFIG_PATH};
use renderer::{FrameOutcome, Renderer};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use window::{WindowHost, WinitWindow};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config_path = config_path_from_args(std::env::args().skip(1))?;
    let loaded = Config::load(&config_path);
    let config = &loaded.config;

    init_logging(config)?;
    log::info!("Starting Vulkan renderer");
    loaded.log();
    log::info!(
        "Window: {}x{}, present mode: {}, mesh: {:?}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode,
        config.graphics.mesh
    );

    if let Err(e) = run(config) {
        log::error!("Fatal: {:#}", e);
        return Err(e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// `--config <path>` selects the configuration file
fn config_path_from_args<I>(args: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut path = PathBuf::from(DEFAULT_CONFIG_PATH);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().context("--config requires a path")?;
                path = PathBuf::from(value);
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(path)
}

/// Initialize logging, optionally piping everything into a file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    // RUST_LOG still wins over the config file
    builder.parse_default_env();

    if config.debug.log_to_file {
        let mut file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {}", config.debug.log_file))?;
        writeln!(file, "=== Vulkan Renderer Log ===")?;
        writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
        writeln!(file)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// =============================================================================
// MAIN LOOP
// =============================================================================

fn run(config: &Config) -> Result<()> {
    // Declared first so it outlives the surface owned by the renderer
    let mut window = WinitWindow::open(&config.window)?;
    let mut renderer = Renderer::new(&mut window, config)?;
    let mut fps = FpsCounter::new(Instant::now());

    loop {
        window.poll_events();
        if window.close_requested() {
            log::info!("Window closed after {} frames", renderer.frame_counter());
            break;
        }

        let outcome = renderer
            .draw_frame(&mut window)
            .context("Failed to render frame")?;

        if let FrameOutcome::Presented { .. } = outcome {
            if !config.debug.show_fps {
                continue;
            }
            if let Some(report) = fps.tick(Instant::now()) {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    config.window.title, report.fps, report.frame_ms
                ));
            }
        }
    }

    renderer.wait_idle()?;
    Ok(())
}

// =============================================================================
// FPS TRACKING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct FpsReport {
    fps: f32,
    frame_ms: f32,
}

/// Averages frame rate over roughly one-second windows
struct FpsCounter {
    frame_count: u32,
    last_report: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    const INTERVAL: Duration = Duration::from_secs(1);

    fn new(now: Instant) -> Self {
        Self {
            frame_count: 0,
            last_report: now,
            last_frame: now,
        }
    }

    /// Count a presented frame; returns a report once per interval
    fn tick(&mut self, now: Instant) -> Option<FpsReport> {
        let frame_time = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_report);
        if elapsed < Self::INTERVAL {
            return None;
        }

        let report = FpsReport {
            fps: self.frame_count as f32 / elapsed.as_secs_f32(),
            frame_ms: frame_time.as_secs_f32() * 1000.0,
        };
        self.frame_count = 0;
        self.last_report = now;
        Some(report)
    }
}
