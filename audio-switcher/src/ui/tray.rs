//! System tray icon management.
//!
//! Owns the tray icon, its tooltip and the device menu, and turns clicks
//! into [`Command`]s for the session worker.

use super::icons;
use crate::app::Command;
use crate::controller::{DeviceEntry, DeviceId};
use std::collections::HashMap;
use thiserror::Error;
use tray_icon::{
    menu::{CheckMenuItem, Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem, Submenu},
    TrayIcon, TrayIconBuilder, TrayIconEvent,
};

/// Tray service error types.
#[derive(Debug, Error)]
pub enum TrayError {
    #[error("Failed to create tray icon: {0}")]
    CreateFailed(String),

    #[error("Failed to load icon resource")]
    IconLoadFailed,

    #[error("Tray icon not initialized")]
    NotInitialized,

    #[error("Failed to create menu: {0}")]
    MenuFailed(String),
}

/// What a clicked menu item stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    Toggle(DeviceId),
    Select(DeviceId),
    Exit,
}

/// What the UI loop should do after polling the tray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayAction {
    Send(Command),
    Exit,
}

/// System tray manager.
pub struct TrayManager {
    tray_icon: Option<TrayIcon>,
    actions: HashMap<MenuId, MenuAction>,
}

impl TrayManager {
    pub fn new() -> Self {
        Self {
            tray_icon: None,
            actions: HashMap::new(),
        }
    }

    /// Create and show the tray icon with an empty device menu.
    pub fn create(&mut self, tooltip: &str) -> Result<(), TrayError> {
        let icon = icons::speaker_icon().map_err(|_| TrayError::IconLoadFailed)?;
        let menu = self.build_menu(&[])?;

        let tray_icon = TrayIconBuilder::new()
            .with_icon(icon)
            .with_tooltip(tooltip)
            .with_menu(Box::new(menu))
            .with_menu_on_left_click(false)
            .build()
            .map_err(|e| TrayError::CreateFailed(e.to_string()))?;

        self.tray_icon = Some(tray_icon);
        Ok(())
    }

    /// Rebuild the menu from a fresh listing.
    pub fn set_devices(&mut self, devices: &[DeviceEntry]) -> Result<(), TrayError> {
        let menu = self.build_menu(devices)?;
        let tray = self.tray_icon.as_mut().ok_or(TrayError::NotInitialized)?;
        tray.set_menu(Some(Box::new(menu)));
        Ok(())
    }

    /// Update the tooltip text.
    pub fn set_tooltip(&mut self, text: &str) -> Result<(), TrayError> {
        let tray = self.tray_icon.as_mut().ok_or(TrayError::NotInitialized)?;
        tray.set_tooltip(Some(text))
            .map_err(|e| TrayError::CreateFailed(e.to_string()))?;
        Ok(())
    }

    /// Drain pending tray and menu events. Call this from the event loop.
    pub fn poll(&self) -> Vec<TrayAction> {
        let mut out = Vec::new();

        while let Ok(event) = TrayIconEvent::receiver().try_recv() {
            match event {
                TrayIconEvent::Click {
                    button: tray_icon::MouseButton::Left,
                    button_state: tray_icon::MouseButtonState::Up,
                    ..
                } => out.push(TrayAction::Send(Command::CycleNext)),
                TrayIconEvent::Click {
                    button: tray_icon::MouseButton::Right,
                    button_state: tray_icon::MouseButtonState::Down,
                    ..
                } => out.push(TrayAction::Send(Command::RefreshDevices)),
                _ => {}
            }
        }

        while let Ok(event) = MenuEvent::receiver().try_recv() {
            match self.actions.get(&event.id) {
                Some(MenuAction::Toggle(id)) => {
                    out.push(TrayAction::Send(Command::ToggleEnabled(*id)))
                }
                Some(MenuAction::Select(id)) => out.push(TrayAction::Send(Command::Select(*id))),
                Some(MenuAction::Exit) => out.push(TrayAction::Exit),
                None => {}
            }
        }

        out
    }

    /// Device checkboxes toggle rotation membership; the submenu switches
    /// directly.
    fn build_menu(&mut self, devices: &[DeviceEntry]) -> Result<Menu, TrayError> {
        let menu_err = |e: tray_icon::menu::Error| TrayError::MenuFailed(e.to_string());
        self.actions.clear();

        let menu = Menu::new();
        for entry in devices {
            let item = CheckMenuItem::new(entry.device.menu_label(), true, entry.enabled, None);
            self.actions
                .insert(item.id().clone(), MenuAction::Toggle(entry.device.id));
            menu.append(&item).map_err(menu_err)?;
        }

        if !devices.is_empty() {
            let switch_to = Submenu::new("Switch to", true);
            for entry in devices {
                let item = CheckMenuItem::new(&entry.device.name, true, entry.device.active, None);
                self.actions
                    .insert(item.id().clone(), MenuAction::Select(entry.device.id));
                switch_to.append(&item).map_err(menu_err)?;
            }
            menu.append(&PredefinedMenuItem::separator()).map_err(menu_err)?;
            menu.append(&switch_to).map_err(menu_err)?;
        }

        menu.append(&PredefinedMenuItem::separator()).map_err(menu_err)?;
        let exit_item = MenuItem::new("Exit", true, None);
        self.actions.insert(exit_item.id().clone(), MenuAction::Exit);
        menu.append(&exit_item).map_err(menu_err)?;

        Ok(menu)
    }

    /// Destroy the tray icon.
    pub fn destroy(&mut self) {
        self.tray_icon = None;
    }
}

impl Default for TrayManager {
    fn default() -> Self {
        Self::new()
    }
}
