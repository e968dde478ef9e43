//! Window, GL context and presentation.
//!
//! Creates a winit window with a current glutin context and implements
//! [`FrameTarget`] on top of it. Window events are pumped after every
//! present so the sampling loop keeps ownership of the main thread; a close
//! request cancels the shared token.

use std::ffi::{c_void, CString};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use glow::HasContext;
use glutin::config::ConfigTemplateBuilder;
use glutin::context::{ContextAttributesBuilder, PossiblyCurrentContext};
use glutin::display::{Display, DisplayApiPreference};
use glutin::prelude::*;
use glutin::surface::{Surface, SurfaceAttributesBuilder, WindowSurface};
use glutin_winit::GlWindow;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowBuilder};

use super::FrameTarget;
use crate::config::WindowConfig;

/// A visible window whose GL context is current on the calling thread.
pub struct RenderWindow {
    // Field order is drop order: context and surface go before the window.
    gl: Rc<glow::Context>,
    context: PossiblyCurrentContext,
    surface: Surface<WindowSurface>,
    display: Display,
    _window: Window,
    event_loop: EventLoop<()>,
    cancel: CancellationToken,
}

#[cfg(target_os = "macos")]
fn display_api_preference() -> DisplayApiPreference {
    DisplayApiPreference::Cgl
}

#[cfg(not(target_os = "macos"))]
fn display_api_preference() -> DisplayApiPreference {
    DisplayApiPreference::Egl
}

/// The candidate with the most multisample samples; earlier wins ties.
fn most_samples<C>(configs: impl Iterator<Item = C>, samples: impl Fn(&C) -> u8) -> Result<C> {
    configs
        .reduce(|accum, config| {
            if samples(&config) > samples(&accum) {
                config
            } else {
                accum
            }
        })
        .context("display offers no GL config for the window")
}

impl RenderWindow {
    /// Open the window and make its context current.
    pub fn create(cfg: &WindowConfig, cancel: CancellationToken) -> Result<Self> {
        let event_loop = EventLoop::new().context("creating event loop")?;

        let window = WindowBuilder::new()
            .with_title(cfg.title.as_str())
            .with_inner_size(LogicalSize::new(cfg.width, cfg.height))
            .build(&event_loop)
            .context("creating window")?;
        let raw_window_handle = window.raw_window_handle();

        // Safety: the display handle belongs to `window`, which outlives the display.
        let display =
            unsafe { Display::new(window.raw_display_handle(), display_api_preference()) }
                .context("opening GL display")?;

        let template = ConfigTemplateBuilder::new()
            .compatible_with_native_window(raw_window_handle)
            .build();
        // Safety: the template only references `window`, which is alive.
        let configs = unsafe { display.find_configs(template) }.context("querying GL configs")?;
        let gl_config = most_samples(configs, |config| config.num_samples())?;

        let context_attributes = ContextAttributesBuilder::new().build(Some(raw_window_handle));

        // Safety: the raw window handle belongs to `window`, which outlives the context.
        let not_current = unsafe { display.create_context(&gl_config, &context_attributes) }
            .context("creating GL context")?;

        let size = window.inner_size();
        let surface_attributes = window.build_surface_attributes(SurfaceAttributesBuilder::new());

        // Safety: the raw window handle belongs to `window`, which outlives the surface.
        let surface = unsafe { display.create_window_surface(&gl_config, &surface_attributes) }
            .context("creating window surface")?;

        let context = not_current
            .make_current(&surface)
            .context("making GL context current")?;

        // Safety: the context is current on this thread.
        let gl = unsafe {
            glow::Context::from_loader_function(|s| match CString::new(s) {
                Ok(name) => display.get_proc_address(&name),
                Err(_) => std::ptr::null(),
            })
        };

        info!(
            width = size.width,
            height = size.height,
            version = ?gl.version(),
            "GL context created",
        );

        Ok(Self {
            gl: Rc::new(gl),
            context,
            surface,
            display,
            _window: window,
            event_loop,
            cancel,
        })
    }

    /// Shared handle to the loaded GL functions.
    pub fn gl(&self) -> Rc<glow::Context> {
        Rc::clone(&self.gl)
    }

    /// Resolve a GL entry point, returning null when unknown.
    pub fn proc_address(&self, name: &str) -> *const c_void {
        match CString::new(name) {
            Ok(name) => self.display.get_proc_address(&name),
            Err(_) => std::ptr::null(),
        }
    }

    fn pump_events(&mut self) {
        let mut close_requested = false;
        let status = self
            .event_loop
            .pump_events(Some(Duration::ZERO), |event, _| {
                if let Event::WindowEvent {
                    event: WindowEvent::CloseRequested,
                    ..
                } = event
                {
                    close_requested = true;
                }
            });

        if close_requested || matches!(status, PumpStatus::Exit(_)) {
            if !self.cancel.is_cancelled() {
                debug!("window closed, cancelling sampling");
            }
            self.cancel.cancel();
        }
    }
}

impl FrameTarget for RenderWindow {
    fn clear(&mut self, color: [f32; 4]) {
        let [r, g, b, a] = color;
        // Safety: the context is current on this thread.
        unsafe {
            self.gl.clear_color(r, g, b, a);
            self.gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        }
    }

    fn present(&mut self) -> Result<()> {
        self.surface
            .swap_buffers(&self.context)
            .context("swapping buffers")?;
        self.pump_events();
        Ok(())
    }
}
