//! Application lifecycle: the session worker.
//!
//! Controller calls block until the child exits, so the session lives on its
//! own thread. The UI loop sends [`Command`]s and drains [`Notification`]s;
//! commands queue up and run one at a time.

use crate::controller::{CancelFlag, DeviceController, DeviceEntry, DeviceId};
use crate::session::{EventSink, Session, SessionError, SessionEvent};
use crate::store::StateStore;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requests from the UI glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Re-enumerate devices (menu about to open)
    RefreshDevices,
    /// Activate the next enabled device (tray left-click)
    CycleNext,
    /// Activate a specific device
    Select(DeviceId),
    /// Flip rotation membership of a device
    ToggleEnabled(DeviceId),
    /// Save and stop
    Shutdown,
}

/// Results pushed back to the UI glue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Fresh device listing for the menu
    Devices(Vec<DeviceEntry>),
    /// Status or error text from the session
    Event(SessionEvent),
    /// The worker has exited; no further notifications follow
    Stopped,
}

struct NotificationSink(Sender<Notification>);

impl EventSink for NotificationSink {
    fn emit(&self, event: SessionEvent) {
        let _ = self.0.send(Notification::Event(event));
    }
}

/// Handle to the session worker thread.
pub struct AppHandle {
    commands: Sender<Command>,
    notifications: Receiver<Notification>,
    cancel: CancelFlag,
    worker: Option<JoinHandle<()>>,
}

impl AppHandle {
    /// Start the worker. `build` runs on the worker thread and receives the
    /// sink the session should report through.
    pub fn spawn<C, S, F>(cancel: CancelFlag, build: F) -> std::io::Result<Self>
    where
        C: DeviceController + 'static,
        S: StateStore + 'static,
        F: FnOnce(Box<dyn EventSink + Send>) -> Session<C, S> + Send + 'static,
    {
        let (command_tx, command_rx) = channel();
        let (notify_tx, notify_rx) = channel();

        let worker = std::thread::Builder::new()
            .name("session".to_string())
            .spawn(move || {
                let session = build(Box::new(NotificationSink(notify_tx.clone())));
                run_worker(session, command_rx, &notify_tx);
                let _ = notify_tx.send(Notification::Stopped);
            })?;

        Ok(Self {
            commands: command_tx,
            notifications: notify_rx,
            cancel,
            worker: Some(worker),
        })
    }

    /// Queue a command. Returns false once the worker has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Next pending notification, if any.
    pub fn try_recv(&self) -> Option<Notification> {
        match self.notifications.try_recv() {
            Ok(n) => Some(n),
            Err(TryRecvError::Disconnected) => Some(Notification::Stopped),
            Err(TryRecvError::Empty) => None,
        }
    }

    /// Block until the next notification.
    pub fn recv(&self) -> Notification {
        self.notifications.recv().unwrap_or(Notification::Stopped)
    }

    /// Wait up to `timeout` for the next notification.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        match self.notifications.recv_timeout(timeout) {
            Ok(n) => Some(n),
            Err(RecvTimeoutError::Disconnected) => Some(Notification::Stopped),
            Err(RecvTimeoutError::Timeout) => None,
        }
    }

    /// Abort the controller call in flight, if any.
    pub fn cancel_in_flight(&self) {
        self.cancel.cancel();
    }

    /// Ask the worker to save and stop, then wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Session worker panicked");
            }
        }
    }
}

impl Drop for AppHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<C: DeviceController, S: StateStore>(
    mut session: Session<C, S>,
    commands: Receiver<Command>,
    notify: &Sender<Notification>,
) {
    let devices = session.request_device_list();
    info!("Controller reports {} devices", devices.len());
    let _ = notify.send(Notification::Devices(devices));

    loop {
        if session.is_terminated() {
            debug!("Session ended, stopping worker");
            return;
        }

        // A closed channel is treated as an orderly shutdown.
        let command = commands.recv().unwrap_or(Command::Shutdown);
        debug!("Handling {:?}", command);

        let result = match command {
            Command::RefreshDevices => Ok(()),
            Command::CycleNext => session.cycle_to_next().map(drop),
            Command::Select(id) => session.select_device(id).map(drop),
            Command::ToggleEnabled(id) => session.toggle_enabled(id).map(drop),
            Command::Shutdown => {
                if let Err(e) = session.shutdown() {
                    warn!("Failed to save state at shutdown: {}", e);
                    let _ = notify.send(Notification::Event(SessionEvent::Error(format!(
                        "Could not save settings: {}",
                        e
                    ))));
                }
                return;
            }
        };

        if let Err(e) = result {
            report(&e, notify);
        }

        if !session.is_terminated() {
            let devices = session.request_device_list();
            let _ = notify.send(Notification::Devices(devices));
        }
    }
}

/// Controller failures were already reported by the session itself.
fn report(e: &SessionError, notify: &Sender<Notification>) {
    match e {
        SessionError::Controller(_) | SessionError::NotListed(_) => {}
        SessionError::NothingEnabled => {
            let _ = notify.send(Notification::Event(SessionEvent::Error(
                "No devices are enabled for switching. Tick some in the menu first.".to_string(),
            )));
        }
        other => {
            let _ = notify.send(Notification::Event(SessionEvent::Error(other.to_string())));
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::controller::{ControllerClient, Device};
    use crate::integrity::{compute_digest, IntegrityRecord};
    use crate::session::SessionOptions;
    use crate::store::{MemoryStateStore, PersistedState};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn fake_controller(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("EndPointController");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn spawn(path: PathBuf, store: MemoryStateStore) -> AppHandle {
        let client = ControllerClient::new(
            path,
            vec!["-f".into(), "%d|%ws|%d|%d".into()],
            Duration::from_secs(5),
        );
        let cancel = client.cancel_flag();
        AppHandle::spawn(cancel, move |events| {
            Session::open(client, store, events, SessionOptions::default())
        })
        .unwrap()
    }

    fn next_devices(handle: &AppHandle) -> Vec<DeviceEntry> {
        loop {
            match handle.recv() {
                Notification::Devices(list) => return list,
                Notification::Stopped => panic!("worker stopped"),
                Notification::Event(_) => {}
            }
        }
    }

    #[test]
    fn test_worker_lists_and_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_controller(
            &dir,
            "[ \"$1\" = \"-f\" ] && printf '3|Speakers|0|1\\n5|Headphones|0|0\\n'\nexit 0",
        );
        let store = MemoryStateStore::new(PersistedState {
            controller_digest: compute_digest(&path).unwrap(),
            ..PersistedState::default()
        });
        let handle = spawn(path, store.clone());

        let initial = next_devices(&handle);
        assert_eq!(initial.len(), 2);
        assert!(initial.iter().all(|e| !e.enabled));

        assert!(handle.send(Command::ToggleEnabled(DeviceId(5))));
        let after = next_devices(&handle);
        assert_eq!(
            after[1],
            DeviceEntry {
                device: Device::new(5, "Headphones", false),
                enabled: true
            }
        );

        handle.shutdown();
        assert_eq!(store.snapshot().enabled_devices, vec![DeviceId(5)]);
    }

    #[test]
    fn test_untrusted_controller_stops_worker() {
        let dir = tempfile::tempdir().unwrap();
        let path = fake_controller(&dir, "printf '1|A|0|1'");
        let store = MemoryStateStore::new(PersistedState {
            controller_digest: IntegrityRecord::new("00").expected_hash,
            ..PersistedState::default()
        });
        let handle = spawn(path, store);

        let mut saw_terminate = false;
        loop {
            match handle.recv() {
                Notification::Event(SessionEvent::Terminate { .. }) => saw_terminate = true,
                Notification::Stopped => break,
                _ => {}
            }
        }
        assert!(saw_terminate);
        assert!(!handle.send(Command::CycleNext));
    }

    #[test]
    fn test_refresh_delivers_listing_within_wait() {
        let dir = tempfile::tempdir().unwrap();
        let count = dir.path().join("count");
        let path = fake_controller(
            &dir,
            &format!(
                "echo x >> '{0}'\nn=$(wc -l < '{0}')\nprintf '1|Listing %s|0|1\\n' $n",
                count.display()
            ),
        );
        let store = MemoryStateStore::new(PersistedState {
            controller_digest: compute_digest(&path).unwrap(),
            ..PersistedState::default()
        });
        let handle = spawn(path, store);
        assert_eq!(next_devices(&handle)[0].device.name, "Listing 1");
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_none());

        assert!(handle.send(Command::RefreshDevices));
        match handle.recv_timeout(Duration::from_secs(5)) {
            Some(Notification::Devices(list)) => assert_eq!(list[0].device.name, "Listing 2"),
            other => panic!("unexpected: {:?}", other),
        }
        handle.shutdown();
    }
}
