// Window collaborator
//
// The renderer only needs four things from the window system: the current
// framebuffer size, a blocking "wait for the next event", whether the user
// asked to close, and a resize notification. `WindowHost` is that contract;
// `WinitWindow` implements it on top of winit's pump_events API so the main
// loop stays in our hands.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;

/// Resize notification shared between the event handler (producer) and the
/// frame loop (consumer). `take` clears it atomically so a resize is acted
/// on exactly once.
#[derive(Debug, Clone, Default)]
pub struct ResizeFlag(Arc<AtomicBool>);

impl ResizeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the renderer consumes from the window system
pub trait WindowHost {
    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until at least one window event has been processed
    fn wait_events(&mut self);

    fn close_requested(&self) -> bool;

    fn resize_flag(&self) -> &ResizeFlag;
}

/// Block while the framebuffer has a zero dimension (minimized window).
///
/// Returns `None` if the window is closed while waiting.
pub fn wait_for_drawable_extent(window: &mut dyn WindowHost) -> Option<vk::Extent2D> {
    loop {
        let (width, height) = window.framebuffer_size();
        if width > 0 && height > 0 {
            return Some(vk::Extent2D { width, height });
        }
        if window.close_requested() {
            return None;
        }
        log::debug!("Framebuffer is {}x{}, waiting for events", width, height);
        window.wait_events();
    }
}

// =============================================================================
// WINIT IMPLEMENTATION
// =============================================================================

/// Event handler state fed by winit
struct WindowState {
    attributes: WindowAttributes,
    window: Option<Window>,
    created: bool,
    create_error: Option<winit::error::OsError>,
    resize: ResizeFlag,
    close_requested: bool,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.created || self.create_error.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                self.window = Some(window);
                self.created = true;
            }
            Err(e) => {
                self.create_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resize.raise();
            }

            WindowEvent::ScaleFactorChanged { .. } => {
                self.resize.raise();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

/// A single winit window driven by an externally owned loop
pub struct WinitWindow {
    window: Window,
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl WinitWindow {
    /// Create the event loop and pump it until the window exists
    pub fn open(config: &WindowConfig) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("Failed to create event loop")?;

        let attributes = WindowAttributes::default()
            .with_title(config.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let mut state = WindowState {
            attributes,
            window: None,
            created: false,
            create_error: None,
            resize: ResizeFlag::new(),
            close_requested: false,
        };

        // Windows may only be created once the loop reports `resumed`
        let window = loop {
            let status = event_loop.pump_app_events(Some(Duration::from_millis(10)), &mut state);

            if let Some(e) = state.create_error.take() {
                return Err(e).context("Failed to create window");
            }
            if let Some(window) = state.window.take() {
                break window;
            }
            if let PumpStatus::Exit(code) = status {
                anyhow::bail!("Event loop exited with code {} before a window was created", code);
            }
        };

        let size = window.inner_size();
        log::info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window,
            state,
            event_loop,
        })
    }

    /// Process pending events without blocking
    pub fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(_) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            self.state.close_requested = true;
        }
    }
}

impl WindowHost for WinitWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }

    fn resize_flag(&self) -> &ResizeFlag {
        &self.state.resize
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted window: each `wait_events` advances to the next size
    pub(crate) struct MockWindow {
        pub sizes: VecDeque<(u32, u32)>,
        pub current: (u32, u32),
        pub waits: usize,
        pub closed: bool,
        pub resize: ResizeFlag,
    }

    impl MockWindow {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                sizes: VecDeque::new(),
                current: (width, height),
                waits: 0,
                closed: false,
                resize: ResizeFlag::new(),
            }
        }

        pub fn then(mut self, width: u32, height: u32) -> Self {
            self.sizes.push_back((width, height));
            self
        }
    }

    impl WindowHost for MockWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            self.current
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            match self.sizes.pop_front() {
                Some(size) => self.current = size,
                None => self.closed = true,
            }
        }

        fn close_requested(&self) -> bool {
            self.closed
        }

        fn resize_flag(&self) -> &ResizeFlag {
            &self.resize
        }
    }

    #[test]
    fn resize_flag_is_consumed_once() {
        let producer = ResizeFlag::new();
        let consumer = producer.clone();

        assert!(!consumer.take());
        producer.raise();
        producer.raise();
        assert!(consumer.is_raised());
        assert!(consumer.take());
        assert!(!consumer.take());
    }

    #[test]
    fn nonzero_size_returns_immediately() {
        let mut window = MockWindow::new(1024, 768);
        let extent = wait_for_drawable_extent(&mut window).unwrap();
        assert_eq!((extent.width, extent.height), (1024, 768));
        assert_eq!(window.waits, 0);
    }

    #[test]
    fn minimized_window_blocks_until_restored() {
        let mut window = MockWindow::new(0, 0).then(0, 0).then(640, 0).then(640, 480);
        let extent = wait_for_drawable_extent(&mut window).unwrap();
        assert_eq!((extent.width, extent.height), (640, 480));
        assert_eq!(window.waits, 3);
    }

    #[test]
    fn closing_while_minimized_gives_up() {
        let mut window = MockWindow::new(0, 0);
        assert!(wait_for_drawable_extent(&mut window).is_none());
        assert_eq!(window.waits, 1);
    }
}
