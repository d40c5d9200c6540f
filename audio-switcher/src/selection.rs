//! Enabled-device set and rotation.
//!
//! The user opts devices into rotation; insertion order is rotation order.
//! Ids that the controller no longer lists are kept, since controller ids
//! can reappear once the device is reconnected.

use crate::controller::DeviceId;
use tracing::debug;

/// Ordered set of device ids eligible for rotation, plus the rotation cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistry {
    enabled: Vec<DeviceId>,
    current: Option<DeviceId>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a registry from persisted ids, dropping duplicates.
    pub fn from_parts(
        enabled: impl IntoIterator<Item = DeviceId>,
        current: Option<DeviceId>,
    ) -> Self {
        let mut registry = Self {
            enabled: Vec::new(),
            current,
        };
        for id in enabled {
            if !registry.is_enabled(id) {
                registry.enabled.push(id);
            }
        }
        registry
    }

    /// Remove `id` if enabled, otherwise append it. Returns the new membership.
    pub fn toggle(&mut self, id: DeviceId) -> bool {
        if let Some(pos) = self.enabled.iter().position(|&e| e == id) {
            self.enabled.remove(pos);
            debug!("Removed device {} from rotation", id);
            false
        } else {
            self.enabled.push(id);
            debug!("Added device {} to rotation", id);
            true
        }
    }

    pub fn is_enabled(&self, id: DeviceId) -> bool {
        self.enabled.contains(&id)
    }

    /// Enabled ids in rotation order.
    pub fn enabled_order(&self) -> &[DeviceId] {
        &self.enabled
    }

    /// The id following `current` in rotation order.
    ///
    /// Wraps to the first id when `current` is last or not enabled at all.
    /// With nothing enabled, `current` is returned unchanged.
    pub fn next(&self, current: Option<DeviceId>) -> Option<DeviceId> {
        if self.enabled.is_empty() {
            return current;
        }

        let index = current
            .and_then(|id| self.enabled.iter().position(|&e| e == id))
            .map_or(0, |pos| (pos + 1) % self.enabled.len());
        Some(self.enabled[index])
    }

    /// Last id selected by rotation or direct selection.
    pub fn current(&self) -> Option<DeviceId> {
        self.current
    }

    pub fn set_current(&mut self, id: DeviceId) {
        self.current = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[i32]) -> Vec<DeviceId> {
        raw.iter().copied().map(DeviceId).collect()
    }

    fn registry(raw: &[i32]) -> DeviceRegistry {
        DeviceRegistry::from_parts(ids(raw), None)
    }

    #[test]
    fn test_next_follows_insertion_order() {
        let reg = registry(&[5, 3, 9]);
        assert_eq!(reg.next(Some(DeviceId(3))), Some(DeviceId(9)));
        assert_eq!(reg.next(Some(DeviceId(9))), Some(DeviceId(5)));
        assert_eq!(reg.next(Some(DeviceId(5))), Some(DeviceId(3)));
    }

    #[test]
    fn test_removed_current_wraps_to_first() {
        let mut reg = registry(&[5, 3, 9]);
        assert!(!reg.toggle(DeviceId(3)));
        assert_eq!(reg.next(Some(DeviceId(3))), Some(DeviceId(5)));
    }

    #[test]
    fn test_next_without_current_starts_at_first() {
        let reg = registry(&[4, 2]);
        assert_eq!(reg.next(None), Some(DeviceId(4)));
        assert_eq!(reg.next(Some(DeviceId(77))), Some(DeviceId(4)));
    }

    #[test]
    fn test_next_on_empty_set_is_identity() {
        let reg = DeviceRegistry::new();
        assert_eq!(reg.next(None), None);
        assert_eq!(reg.next(Some(DeviceId(8))), Some(DeviceId(8)));
    }

    #[test]
    fn test_next_visits_every_member_once() {
        for raw in [&[1][..], &[5, 3, 9][..], &[10, -2, 7, 0, 33][..]] {
            let reg = registry(raw);
            let n = raw.len();
            for start in raw.iter().copied().chain([1000]) {
                let mut cursor = Some(DeviceId(start));
                let mut visited = Vec::new();
                for _ in 0..n {
                    cursor = reg.next(cursor);
                    visited.push(cursor.unwrap());
                }
                let mut sorted = visited.clone();
                sorted.sort();
                sorted.dedup();
                assert_eq!(sorted.len(), n, "start {} visited {:?}", start, visited);
                assert_eq!(reg.next(cursor), Some(visited[0]));
            }
        }
    }

    #[test]
    fn test_toggle_is_its_own_inverse() {
        let mut reg = registry(&[1, 2]);
        let before = reg.clone();
        reg.toggle(DeviceId(3));
        reg.toggle(DeviceId(3));
        assert_eq!(reg, before);

        reg.toggle(DeviceId(1));
        assert!(!reg.is_enabled(DeviceId(1)));
        reg.toggle(DeviceId(1));
        assert!(reg.is_enabled(DeviceId(1)));
        // Re-enabling appends, so rotation order moves it to the end.
        assert_eq!(reg.enabled_order(), ids(&[2, 1]).as_slice());
    }

    #[test]
    fn test_from_parts_drops_duplicates() {
        let reg = DeviceRegistry::from_parts(ids(&[4, 4, 1, 4]), Some(DeviceId(1)));
        assert_eq!(reg.enabled_order(), ids(&[4, 1]).as_slice());
        assert_eq!(reg.current(), Some(DeviceId(1)));
    }
}
