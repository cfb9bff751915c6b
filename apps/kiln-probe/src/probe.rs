//! Device bring-up driven by a winit event loop.

use std::sync::Arc;

use anyhow::{bail, Context};
use ash::vk;
use kiln_gpu::{
    DeviceContextBuilder, DeviceRequirements, InstanceContextBuilder, PresentationSurface,
};
use kiln_platform::{PlatformError, PlatformWindow, WindowConfig};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::WindowId;

/// Probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub window: WindowConfig,
    pub validation: bool,
    pub require_float64: bool,
    pub buffers: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::new("Kiln Probe").with_size(800, 600),
            validation: cfg!(debug_assertions),
            require_float64: true,
            buffers: 1,
        }
    }
}

impl ProbeConfig {
    /// Parse command line arguments (without the program name).
    pub fn from_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--no-validation" => config.validation = false,
                "--allow-no-float64" => config.require_float64 = false,
                "--buffers" => {
                    let value = args.next().context("--buffers needs a value")?;
                    config.buffers = value
                        .parse()
                        .with_context(|| format!("invalid buffer count: {value}"))?;
                }
                other => bail!("unknown argument: {other}"),
            }
        }

        Ok(config)
    }
}

/// What the probe found.
#[derive(Debug)]
struct ProbeReport {
    device_name: String,
    msaa_samples: vk::SampleCountFlags,
    swap_extent: vk::Extent2D,
    graphics_family: u32,
    present_family: u32,
    surface_formats: usize,
    present_modes: usize,
    host_visible_type: Option<u32>,
    submitted_buffers: usize,
}

/// Run the probe until bring-up completes or fails.
pub fn run_probe(config: ProbeConfig) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().map_err(|e| PlatformError::EventLoop(e.to_string()))?;

    let mut runner = ProbeRunner {
        config,
        outcome: None,
    };

    event_loop
        .run_app(&mut runner)
        .map_err(|e| PlatformError::EventLoop(e.to_string()))?;

    match runner.outcome {
        Some(result) => result,
        None => bail!("event loop exited before the window was ready"),
    }
}

struct ProbeRunner {
    config: ProbeConfig,
    outcome: Option<anyhow::Result<()>>,
}

impl ProbeRunner {
    fn bring_up(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<ProbeReport> {
        let window = PlatformWindow::create(event_loop, &self.config.window)?;

        let instance = InstanceContextBuilder::new()
            .app_name(self.config.window.title.clone())
            .validation(self.config.validation)
            .build()?;

        // SAFETY: the window outlives the surface; both are dropped at the end of this function
        let surface = unsafe { PresentationSurface::from_window(Arc::clone(&instance), &window)? };

        let requirements =
            DeviceRequirements::default().with_shader_float64(self.config.require_float64);
        let device = DeviceContextBuilder::new(instance)
            .requirements(requirements)
            .build(&surface, &window)?;

        let mut session =
            device.create_command_session(self.config.buffers, vk::FenceCreateFlags::empty())?;
        let buffers = session.buffers().to_vec();

        // SAFETY: buffers come from this session and record no commands
        unsafe {
            for &buffer in &buffers {
                session.begin(buffer)?;
                session.end(buffer)?;
            }
            session.submit(&buffers)?;
        }

        let host_visible_type = device
            .find_memory_type(
                u32::MAX,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .ok();

        let surface_caps = device.surface_capabilities();
        Ok(ProbeReport {
            device_name: device.device_name().to_string(),
            msaa_samples: device.msaa_samples(),
            swap_extent: device.swap_extent(),
            graphics_family: device.graphics_queue_family(),
            present_family: device.present_queue_family(),
            surface_formats: surface_caps.formats.len(),
            present_modes: surface_caps.present_modes.len(),
            host_visible_type,
            submitted_buffers: buffers.len(),
        })
    }
}

impl ApplicationHandler for ProbeRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.outcome.is_some() {
            return;
        }

        let outcome = match self.bring_up(event_loop) {
            Ok(report) => {
                info!(
                    "{}: {:?} MSAA, {}x{} extent, graphics family {}, present family {}",
                    report.device_name,
                    report.msaa_samples,
                    report.swap_extent.width,
                    report.swap_extent.height,
                    report.graphics_family,
                    report.present_family,
                );
                info!(
                    "{} surface formats, {} present modes, host-visible memory type {:?}",
                    report.surface_formats,
                    report.present_modes,
                    report.host_visible_type,
                );
                info!("{} buffer(s) submitted", report.submitted_buffers);
                Ok(())
            }
            Err(e) => {
                error!("Device bring-up failed: {e:#}");
                Err(e)
            }
        };

        self.outcome = Some(outcome);
        event_loop.exit();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let WindowEvent::CloseRequested = event {
            event_loop.exit();
        }
    }
}
