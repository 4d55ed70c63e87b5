//! NES frontend: winit window, pixels surface, keyboard input.
//!
//! Three modes:
//! - local play (default): save states load and persist across runs;
//! - `--listen ADDR`: host a two-player netplay session on port 1;
//! - `--connect ADDR`: join a hosted session on port 2.

#![allow(clippy::cast_possible_truncation)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use netplay::{Game, Session};
use nes_core::controller::button;
use nes_core::{capture, load_rom, ppu, Bus, Port};
use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

const FB_WIDTH: u32 = ppu::FRAME_WIDTH as u32;
const FB_HEIGHT: u32 = ppu::FRAME_HEIGHT as u32;

/// ~60.0988 Hz NTSC field rate.
const FRAME_DURATION: Duration = Duration::from_micros(16_639);

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    rom_path: Option<PathBuf>,
    listen_addr: Option<String>,
    connect_addr: Option<String>,
    scale: u32,
    no_save: bool,
    zapper: bool,
    trace_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        rom_path: None,
        listen_addr: None,
        connect_addr: None,
        scale: 3,
        no_save: false,
        zapper: false,
        trace_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--listen" => {
                i += 1;
                cli.listen_addr = args.get(i).cloned();
            }
            "--connect" => {
                i += 1;
                cli.connect_addr = args.get(i).cloned();
            }
            "--scale" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.scale = s.parse().unwrap_or(3);
                }
            }
            "--no-save" => cli.no_save = true,
            "--zapper" => cli.zapper = true,
            "--trace" => {
                i += 1;
                cli.trace_path = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => {
                eprintln!("Usage: nes-runner [OPTIONS] <rom.nes>");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --listen <addr>   Host a netplay session (player 1)");
                eprintln!("  --connect <addr>  Join a netplay session (player 2)");
                eprintln!("  --scale <n>       Window scale factor [default: 3]");
                eprintln!("  --no-save         Skip save-state load/store");
                eprintln!("  --zapper          Attach a Zapper to port 2");
                eprintln!("  --trace <file>    Write an execution trace of replays");
                process::exit(0);
            }
            other if !other.starts_with('-') => {
                cli.rom_path = Some(PathBuf::from(other));
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

// ---------------------------------------------------------------------------
// Keyboard mapping
// ---------------------------------------------------------------------------

fn map_keycode(keycode: KeyCode) -> Option<u8> {
    match keycode {
        KeyCode::KeyX => Some(button::A),
        KeyCode::KeyZ => Some(button::B),
        KeyCode::ShiftRight => Some(button::SELECT),
        KeyCode::Enter => Some(button::START),
        KeyCode::ArrowUp => Some(button::UP),
        KeyCode::ArrowDown => Some(button::DOWN),
        KeyCode::ArrowLeft => Some(button::LEFT),
        KeyCode::ArrowRight => Some(button::RIGHT),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Runtime modes
// ---------------------------------------------------------------------------

enum Runtime {
    Local { bus: &'static mut Bus },
    Netplay { session: Session<'static> },
}

impl Runtime {
    fn framebuffer(&self) -> &[u32] {
        match self {
            Self::Local { bus } => bus.framebuffer(),
            Self::Netplay { session } => session.game().bus().framebuffer(),
        }
    }

    fn bus_mut(&mut self) -> &mut Bus {
        match self {
            Self::Local { bus } => bus,
            Self::Netplay { session } => session.game_mut().bus_mut(),
        }
    }
}

// ---------------------------------------------------------------------------
// Windowed app
// ---------------------------------------------------------------------------

struct App {
    runtime: Runtime,
    buttons: u8,
    scale: u32,
    save_path: Option<PathBuf>,

    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    last_frame_time: Instant,
    screenshot_seq: u32,
}

impl App {
    fn new(runtime: Runtime, scale: u32, save_path: Option<PathBuf>) -> Self {
        Self {
            runtime,
            buttons: 0,
            scale,
            save_path,
            window: None,
            pixels: None,
            last_frame_time: Instant::now(),
            screenshot_seq: 0,
        }
    }

    fn handle_key(&mut self, keycode: KeyCode, pressed: bool) {
        if keycode == KeyCode::F12 && pressed {
            self.screenshot();
            return;
        }
        if let Some(bit) = map_keycode(keycode) {
            if pressed {
                self.buttons |= 1 << bit;
            } else {
                self.buttons &= !(1 << bit);
            }
        }
    }

    fn screenshot(&mut self) {
        self.screenshot_seq += 1;
        let path = PathBuf::from(format!("screenshot-{:03}.png", self.screenshot_seq));
        match capture::save_screenshot(self.runtime.framebuffer(), &path) {
            Ok(()) => eprintln!("[INFO] screenshot saved: {}", path.display()),
            Err(err) => eprintln!("[ERROR] screenshot failed: {err}"),
        }
    }

    /// Advance one visible frame, honoring the mode.
    fn advance_frame(&mut self, event_loop: &ActiveEventLoop) {
        match &mut self.runtime {
            Runtime::Local { bus } => {
                bus.set_buttons(Port::One, self.buttons);
                bus.run_frame();
                bus.update_zapper_light();
            }
            Runtime::Netplay { session } => {
                // The client idles until the host's Reset arrives.
                if session.game().gen() == 0 {
                    if let Err(err) = session.handle_messages() {
                        eprintln!("[ERROR] {err}");
                        event_loop.exit();
                    }
                    return;
                }

                if session.should_exit() {
                    eprintln!("[INFO] peer disconnected");
                    event_loop.exit();
                    return;
                }

                let result = session
                    .send_input(self.buttons)
                    .and_then(|()| session.run_frame());
                if let Err(err) = result {
                    eprintln!("[ERROR] {err}");
                    event_loop.exit();
                    return;
                }
                session.game_mut().bus_mut().update_zapper_light();
            }
        }
    }

    fn update_pixels(&mut self) {
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };

        let fb = self.runtime.framebuffer();
        let frame = pixels.frame_mut();
        for (src, dst) in fb.iter().zip(frame.chunks_exact_mut(4)) {
            dst.copy_from_slice(&src.to_be_bytes());
        }
    }

    /// End-of-session duties: save state (local), say goodbye (netplay).
    fn finish(self) {
        match self.runtime {
            Runtime::Local { bus } => {
                let Some(path) = self.save_path else { return };
                match emu_state::snapshot_to_vec(&*bus) {
                    Ok(state) => {
                        if let Err(err) = fs::write(&path, state) {
                            eprintln!("[ERROR] failed to save state: {err}");
                        } else {
                            eprintln!("[INFO] state saved: {}", path.display());
                        }
                    }
                    Err(err) => eprintln!("[ERROR] failed to serialize state: {err}"),
                }
            }
            Runtime::Netplay { mut session } => {
                session.send_bye();
                session.close();
            }
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let size = winit::dpi::LogicalSize::new(FB_WIDTH * self.scale, FB_HEIGHT * self.scale);
        let attrs = WindowAttributes::default()
            .with_title("NES")
            .with_inner_size(size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(FB_WIDTH, FB_HEIGHT, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(err) => {
                        eprintln!("[ERROR] failed to create pixel surface: {err}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(err) => {
                eprintln!("[ERROR] failed to create window: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(keycode) = event.physical_key {
                    if keycode == KeyCode::Escape && event.state == ElementState::Pressed {
                        event_loop.exit();
                        return;
                    }
                    self.handle_key(keycode, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let scale = self.scale;
                if let Some(zapper) = self.runtime.bus_mut().zapper_mut() {
                    zapper.aim_x = (position.x as u32 / scale).min(FB_WIDTH - 1) as u16;
                    zapper.aim_y = (position.y as u32 / scale).min(FB_HEIGHT - 1) as u16;
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    if let Some(zapper) = self.runtime.bus_mut().zapper_mut() {
                        zapper.trigger = state == ElementState::Pressed;
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= FRAME_DURATION {
                    self.advance_frame(event_loop);
                    self.update_pixels();
                    self.last_frame_time = now;
                }

                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(err) = pixels.render() {
                        eprintln!("[ERROR] render failed: {err}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn make_bus(cli: &CliArgs) -> &'static mut Bus {
    let rom_path = cli.rom_path.as_ref().unwrap_or_else(|| {
        eprintln!("No ROM file specified. Usage: nes-runner [OPTIONS] <rom.nes>");
        process::exit(1);
    });

    let rom_data = match fs::read(rom_path) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("[ERROR] failed to read {}: {err}", rom_path.display());
            process::exit(1);
        }
    };

    let mapper = match load_rom(&rom_data) {
        Ok(mapper) => mapper,
        Err(err) => {
            eprintln!("[ERROR] failed to load ROM: {err}");
            process::exit(1);
        }
    };

    let mut bus = Bus::new(mapper);
    if cli.zapper {
        bus.attach_zapper();
    }
    if let Some(path) = &cli.trace_path {
        match fs::File::create(path) {
            Ok(file) => bus.set_trace_sink(Box::new(std::io::BufWriter::new(file))),
            Err(err) => {
                eprintln!("[ERROR] failed to create trace file: {err}");
                process::exit(1);
            }
        }
    }
    bus.reset();

    eprintln!("[INFO] loaded ROM: {}", rom_path.display());
    // The window, the session and the game all want process lifetime.
    Box::leak(Box::new(bus))
}

fn save_state_path(rom_path: &Path) -> PathBuf {
    rom_path.with_extension("state")
}

/// Restore a previous save-state file, if one exists.
fn load_saved_state(bus: &mut Bus, path: &Path) {
    let state = match fs::read(path) {
        Ok(state) => state,
        Err(_) => return, // no save file yet
    };
    match emu_state::snapshot_from_slice(bus, &state) {
        Ok(()) => eprintln!("[INFO] state loaded: {}", path.display()),
        Err(err) => {
            // The console is in an undefined state now; give up.
            eprintln!("[ERROR] corrupt save state {}: {err}", path.display());
            process::exit(1);
        }
    }
}

fn main() {
    let cli = parse_args();
    let bus = make_bus(&cli);
    let trace = cli.trace_path.is_some();

    let runtime = if let Some(addr) = &cli.listen_addr {
        let mut game = Game::new(bus, Port::One);
        game.set_trace_replay(trace);
        eprintln!("[INFO] waiting for a peer on {addr}...");
        let mut session = match Session::host(game, addr.as_str()) {
            Ok(session) => session,
            Err(err) => {
                eprintln!("[ERROR] {err}");
                process::exit(1);
            }
        };
        eprintln!("[INFO] peer connected, starting game");
        if let Err(err) = session.send_reset() {
            eprintln!("[ERROR] {err}");
            process::exit(1);
        }
        Runtime::Netplay { session }
    } else if let Some(addr) = &cli.connect_addr {
        let mut game = Game::new(bus, Port::Two);
        game.set_trace_replay(trace);
        eprintln!("[INFO] connecting to {addr}...");
        match Session::join(game, addr.as_str()) {
            Ok(session) => {
                eprintln!("[INFO] connected, waiting for the initial state");
                Runtime::Netplay { session }
            }
            Err(err) => {
                eprintln!("[ERROR] {err}");
                process::exit(1);
            }
        }
    } else {
        if trace {
            bus.set_trace_enabled(true);
        }
        Runtime::Local { bus }
    };

    let save_path = match (&runtime, &cli.rom_path, cli.no_save) {
        (Runtime::Local { .. }, Some(rom_path), false) => Some(save_state_path(rom_path)),
        _ => None,
    };

    let mut app = App::new(runtime, cli.scale.max(1), save_path.clone());
    if let (Runtime::Local { bus }, Some(path)) = (&mut app.runtime, &save_path) {
        load_saved_state(bus, path);
    }

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            eprintln!("[ERROR] failed to create event loop: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = event_loop.run_app(&mut app) {
        eprintln!("[ERROR] event loop error: {err}");
        process::exit(1);
    }

    app.finish();
}
