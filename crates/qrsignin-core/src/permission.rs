//! Runtime permissions gating the camera session

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// A named device permission
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const CAMERA: Permission = Permission(Cow::Borrowed("android.permission.CAMERA"));
    pub const INTERNET: Permission = Permission(Cow::Borrowed("android.permission.INTERNET"));
    pub const VIBRATE: Permission = Permission(Cow::Borrowed("android.permission.VIBRATE"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// The static list of permissions the scanner declares
    pub fn required() -> &'static [Permission] {
        const REQUIRED: &[Permission] = &[Permission::CAMERA, Permission::INTERNET, Permission::VIBRATE];
        REQUIRED
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grant state of a single permission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

/// The permissions a camera session requires and what is known about each
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    states: BTreeMap<Permission, PermissionState>,
}

impl PermissionSet {
    /// Create a set where every required permission is still unknown
    pub fn new(required: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            states: required
                .into_iter()
                .map(|p| (p, PermissionState::Unknown))
                .collect(),
        }
    }

    /// Record the state of a permission; permissions outside the set are ignored
    pub fn set(&mut self, permission: &Permission, state: PermissionState) {
        if let Some(current) = self.states.get_mut(permission) {
            *current = state;
        }
    }

    pub fn state(&self, permission: &Permission) -> Option<PermissionState> {
        self.states.get(permission).copied()
    }

    pub fn all_granted(&self) -> bool {
        self.states.values().all(|s| *s == PermissionState::Granted)
    }

    /// Permissions not yet granted, in a stable order
    pub fn missing(&self) -> Vec<Permission> {
        self.states
            .iter()
            .filter(|(_, s)| **s != PermissionState::Granted)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn denied(&self) -> Vec<Permission> {
        self.states
            .iter()
            .filter(|(_, s)| **s == PermissionState::Denied)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.states.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_set_gating() {
        let mut set = PermissionSet::new(vec![Permission::CAMERA, Permission::VIBRATE]);
        assert!(!set.all_granted());
        assert_eq!(set.missing().len(), 2);

        set.set(&Permission::CAMERA, PermissionState::Granted);
        set.set(&Permission::VIBRATE, PermissionState::Denied);
        assert!(!set.all_granted());
        assert_eq!(set.denied(), vec![Permission::VIBRATE]);

        set.set(&Permission::VIBRATE, PermissionState::Granted);
        assert!(set.all_granted());
        assert!(set.missing().is_empty());
    }

    #[test]
    fn test_unrequired_permission_ignored() {
        let mut set = PermissionSet::new(vec![Permission::CAMERA]);
        set.set(&Permission::INTERNET, PermissionState::Granted);
        assert_eq!(set.state(&Permission::INTERNET), None);
        assert!(set.permissions().eq([Permission::CAMERA].iter()));
    }

    #[test]
    fn test_owned_and_static_names_compare_equal() {
        assert_eq!(Permission::new("android.permission.CAMERA"), Permission::CAMERA);
        let json = serde_json::to_string(&Permission::CAMERA).unwrap();
        assert_eq!(json, "\"android.permission.CAMERA\"");
    }

    #[test]
    fn test_empty_set_is_granted() {
        assert!(PermissionSet::new(Vec::new()).all_granted());
    }
}
