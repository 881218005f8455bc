//! Deferred renderer demo
//!
//! Run with:
//!   cargo run --example deferred_demo
//!   cargo run --example deferred_demo -- --mode normals --no-bloom
//!
//! Controls:
//!   Left Mouse        - Drag to orbit
//!   Right Mouse + WASD - Move camera
//!   Right Mouse + T/G  - Move up/down
//!   Shift             - Double speed
//!   M                 - Next render mode
//!   B                 - Toggle bloom
//!   N                 - Toggle normal maps
//!   Escape            - Exit

use clap::Parser;
use deferred_engine::{window, Engine, EngineConfig, RenderConfig, RenderMode, Window};
use std::path::PathBuf;
use std::time::Instant;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};

#[derive(Parser, Debug)]
#[command(name = "deferred_demo", about = "Deferred renderer with a mip-chain bloom")]
struct Args {
    /// Initial render mode: forwardrender, model, normals, albedo, depth or position
    #[arg(long, default_value = "model", value_parser = parse_mode)]
    mode: RenderMode,

    /// Start with bloom disabled
    #[arg(long)]
    no_bloom: bool,

    /// Start with normal maps enabled
    #[arg(long)]
    normal_maps: bool,

    #[arg(long, default_value_t = 800)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Shared shader source of every program
    #[arg(long, default_value = "shaders/shaders.glsl")]
    shaders: PathBuf,

    /// Directory searched for scene textures
    #[arg(long, default_value = "assets")]
    assets: PathBuf,

    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

fn parse_mode(name: &str) -> Result<RenderMode, String> {
    RenderMode::from_name(name).ok_or_else(|| format!("unknown render mode '{}'", name))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("Starting Deferred Renderer Demo");
    println!();
    println!("Controls:");
    println!("  Left Mouse         - Drag to orbit");
    println!("  Right Mouse + WASD - Move camera");
    println!("  Right Mouse + T/G  - Move up/down");
    println!("  Shift              - Double speed");
    println!("  M                  - Next render mode");
    println!("  B                  - Toggle bloom");
    println!("  N                  - Toggle normal maps");
    println!("  Escape             - Exit");
    println!();

    let config = EngineConfig {
        title: "Deferred Renderer Demo".to_string(),
        width: args.width,
        height: args.height,
        vsync: true,
        shader_path: args.shaders,
        asset_dir: args.assets,
        render: RenderConfig {
            mode: args.mode,
            bloom_enabled: !args.no_bloom,
            normal_map_enabled: args.normal_maps,
            ..Default::default()
        },
    };

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            eprintln!("Failed to create event loop: {}", e);
            return;
        }
    };
    let window = match Window::new(&event_loop, &config.title, config.width, config.height) {
        Ok(window) => window,
        Err(e) => {
            eprintln!("Failed to create window: {}", e);
            return;
        }
    };

    let engine = match Engine::new(window.winit(), config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to create engine: {}", e);
            return;
        }
    };
    let engine = std::rc::Rc::new(std::cell::RefCell::new(engine));
    let frame_limit = args.frames;
    let mut last_frame = Instant::now();

    let events = std::rc::Rc::clone(&engine);
    let result = window::run(
        event_loop,
        window,
        move |window: &mut Window, event: &WindowEvent| {
            if let WindowEvent::KeyboardInput { event, .. } = event {
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    window.request_close();
                }
            }
            if let Err(e) = events.borrow_mut().handle_window_event(event) {
                log::error!("{}", e);
            }
        },
        move |window: &mut Window| {
            let now = Instant::now();
            let dt = (now - last_frame).as_secs_f32();
            last_frame = now;

            let mut engine = engine.borrow_mut();
            let frame = engine.update(dt).and_then(|_| engine.render());
            match frame {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    log::error!("Stopping: {}", e);
                    window.request_close();
                }
                Err(e) => log::warn!("Frame failed: {}", e),
            }

            if frame_limit.is_some_and(|limit| engine.frames() >= limit) {
                log::info!("Rendered {} frames, exiting", engine.frames());
                window.request_close();
            }
        },
    );

    if let Err(e) = result {
        eprintln!("Event loop failed: {}", e);
    }
}
