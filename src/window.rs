//! The demo window and its event loop

use std::sync::Arc;
use winit::dpi::PhysicalSize;
use winit::error::{EventLoopError, OsError};
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::{Window as WinitWindow, WindowBuilder};

pub struct Window {
    inner: Arc<WinitWindow>,
    close_requested: bool,
}

impl Window {
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> Result<Self, OsError> {
        let inner = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)?;
        Ok(Self {
            inner: Arc::new(inner),
            close_requested: false,
        })
    }

    /// Shared handle for surface creation
    pub fn winit(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.inner)
    }

    /// Leave the event loop after the current iteration
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }
}

/// Poll the event loop until the window is closed.
///
/// `on_event` gets every window event, `on_frame` runs once per iteration before a
/// redraw is requested.
pub fn run<E, F>(event_loop: EventLoop<()>, mut window: Window, mut on_event: E, mut on_frame: F) -> Result<(), EventLoopError>
where
    E: FnMut(&mut Window, &WindowEvent),
    F: FnMut(&mut Window),
{
    event_loop.run(move |event, target| {
        target.set_control_flow(ControlFlow::Poll);
        match event {
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } => window.request_close(),
            Event::WindowEvent { event, .. } => on_event(&mut window, &event),
            Event::AboutToWait => {
                on_frame(&mut window);
                window.inner.request_redraw();
            }
            _ => {}
        }
        if window.close_requested {
            target.exit();
        }
    })
}
