#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

use anyhow::{bail, Context, Result};
use audio_switcher::session::APP_NAME;
use audio_switcher::{
    store, AppConfig, ControllerClient, DeviceId, EventSink, FileStateStore, IntegrityRecord,
    Session, SessionEvent, SessionOptions, StateStore,
};
#[cfg(windows)]
use audio_switcher::Notification;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "audio-switcher", version, about = "Cycle the default audio output device")]
struct Cli {
    /// Config file to use instead of the per-user default
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Cmd {
    /// Run the tray icon (default)
    Run,
    /// List devices and their rotation membership
    List,
    /// Switch to the next enabled device
    Cycle,
    /// Switch to a specific device
    Select { id: i32 },
    /// Add or remove a device from rotation
    Toggle { id: i32 },
    /// Pin the controller executable currently on disk as trusted
    Trust,
    /// Check the controller executable against the pinned digest
    Verify,
}

type CliSession = Session<ControllerClient, Box<dyn StateStore + Send>>;

/// Prints session events for command-line use.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: SessionEvent) {
        match event {
            SessionEvent::Status(text) => println!("{}", text),
            SessionEvent::Error(text) => eprintln!("error: {}", text),
            SessionEvent::Terminate { reason } => eprintln!("session ended: {}", reason),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Cmd::Run);

    #[cfg(windows)]
    if command != Cmd::Run {
        attach_console();
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting {} ({:?})", APP_NAME, command);

    match command {
        Cmd::Run => run_tray(config),
        Cmd::Verify => verify(&config),
        other => run_once(&config, other),
    }
}

fn open_store(config: &AppConfig) -> Result<Box<dyn StateStore + Send>> {
    match &config.state.file {
        Some(path) => Ok(Box::new(FileStateStore::new(path))),
        None => store::default_store().context("Failed to open state storage"),
    }
}

fn session_options(config: &AppConfig) -> SessionOptions {
    SessionOptions {
        write_through: config.state.write_through,
    }
}

fn open_session(config: &AppConfig) -> Result<CliSession> {
    let client = ControllerClient::from_config(&config.controller);
    let store = open_store(config)?;
    Ok(Session::open(
        client,
        store,
        Box::new(ConsoleSink),
        session_options(config),
    ))
}

fn run_once(config: &AppConfig, command: Cmd) -> Result<()> {
    let mut session = open_session(config)?;

    let outcome = match command {
        Cmd::List => session.try_device_list().map(|entries| {
            for entry in &entries {
                println!(
                    "[{}] {:>4}  {}{}",
                    if entry.enabled { "x" } else { " " },
                    entry.device.id,
                    entry.device.name,
                    if entry.device.active { "  (active)" } else { "" }
                );
            }
        }),
        Cmd::Cycle => session.cycle_to_next().map(drop),
        Cmd::Select { id } => session.select_device(DeviceId(id)).map(drop),
        Cmd::Toggle { id } => session.toggle_enabled(DeviceId(id)).map(|enabled| {
            println!(
                "Device {} {} rotation",
                id,
                if enabled { "added to" } else { "removed from" }
            );
        }),
        Cmd::Trust => session.record_controller_trust().map(|digest| {
            println!("{}", digest);
        }),
        Cmd::Run | Cmd::Verify => Ok(()),
    };

    // Save even when the command failed; shutdown on a terminated session
    // only rewrites what was already saved.
    session.shutdown().context("Failed to save state")?;
    outcome.context("Command failed")?;
    Ok(())
}

fn verify(config: &AppConfig) -> Result<()> {
    let state = open_store(config)?.load().unwrap_or_default();
    let client = ControllerClient::from_config(&config.controller)
        .with_trust(IntegrityRecord::new(state.controller_digest));

    match client.check_trust() {
        Ok(path) => {
            println!("{}: trusted", path.display());
            Ok(())
        }
        Err(reason) => bail!("{}: not trusted ({})", client.path().display(), reason),
    }
}

#[cfg(not(windows))]
fn run_tray(_config: AppConfig) -> Result<()> {
    bail!("the tray host is only available on Windows; use the list, cycle, select or toggle commands")
}

/// Longest a right-click waits for a fresh listing before the menu opens
/// with the previous one.
#[cfg(windows)]
const MENU_REFRESH_WAIT: std::time::Duration = std::time::Duration::from_millis(400);

#[cfg(windows)]
fn run_tray(config: AppConfig) -> Result<()> {
    use audio_switcher::ui::{TrayAction, TrayManager};
    use audio_switcher::{AppHandle, Command};
    use std::time::{Duration, Instant};
    use tracing::debug;
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE, WM_QUIT,
    };

    let client = ControllerClient::from_config(&config.controller);
    let cancel = client.cancel_flag();
    let store = open_store(&config)?;
    let options = session_options(&config);

    let handle = AppHandle::spawn(cancel, move |events| {
        Session::open(client, store, events, options)
    })
    .context("Failed to start session worker")?;

    let mut tray = TrayManager::new();
    tray.create(APP_NAME).context("Failed to create tray icon")?;

    let mut msg = MSG::default();
    'event_loop: loop {
        unsafe {
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    break 'event_loop;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }

        for action in tray.poll() {
            match action {
                TrayAction::Send(Command::RefreshDevices) => {
                    // The menu pops up on button release. Hold the message
                    // pump until the new listing is in the menu.
                    handle.send(Command::RefreshDevices);
                    let deadline = Instant::now() + MENU_REFRESH_WAIT;
                    loop {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        let Some(notification) = handle.recv_timeout(remaining) else {
                            debug!("Opening menu with the previous listing");
                            break;
                        };
                        let is_listing = matches!(notification, Notification::Devices(_));
                        if !dispatch(notification, &mut tray) {
                            break 'event_loop;
                        }
                        if is_listing {
                            break;
                        }
                    }
                }
                TrayAction::Send(command) => {
                    handle.send(command);
                }
                TrayAction::Exit => {
                    handle.cancel_in_flight();
                    handle.send(Command::Shutdown);
                }
            }
        }

        while let Some(notification) = handle.try_recv() {
            if !dispatch(notification, &mut tray) {
                break 'event_loop;
            }
        }

        std::thread::sleep(Duration::from_millis(16));
    }

    tray.destroy();
    handle.shutdown();
    info!("Exiting");
    Ok(())
}

/// Apply a worker notification to the tray. Returns false once the worker
/// has stopped.
#[cfg(windows)]
fn dispatch(notification: Notification, tray: &mut audio_switcher::ui::TrayManager) -> bool {
    use tracing::warn;

    match notification {
        Notification::Devices(devices) => {
            if let Err(e) = tray.set_devices(&devices) {
                warn!("Failed to rebuild menu: {}", e);
            }
        }
        Notification::Event(SessionEvent::Status(text)) => {
            let _ = tray.set_tooltip(&text);
        }
        Notification::Event(SessionEvent::Error(text)) => show_error(&text),
        Notification::Event(SessionEvent::Terminate { reason }) => {
            info!("Session terminated: {}", reason);
        }
        Notification::Stopped => return false,
    }
    true
}

#[cfg(windows)]
fn show_error(msg: &str) {
    use windows::core::PCWSTR;
    use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK};

    let msg_wide: Vec<u16> = msg.encode_utf16().chain(std::iter::once(0)).collect();
    let title_wide: Vec<u16> = APP_NAME.encode_utf16().chain(std::iter::once(0)).collect();
    unsafe {
        MessageBoxW(
            None,
            PCWSTR(msg_wide.as_ptr()),
            PCWSTR(title_wide.as_ptr()),
            MB_OK | MB_ICONERROR,
        );
    }
}

/// Release builds have no console of their own; borrow the caller's so
/// command output is visible.
#[cfg(windows)]
fn attach_console() {
    use windows::Win32::System::Console::{AttachConsole, ATTACH_PARENT_PROCESS};
    unsafe {
        let _ = AttachConsole(ATTACH_PARENT_PROCESS);
    }
}
