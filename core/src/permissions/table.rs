//! Permission aliases and the decision table selecting them.
//!
//! Everything here is pure: the OS version comes in as an argument so the
//! table is testable without a device.

use serde::{Deserialize, Serialize};
use std::fmt;

/// First Android SDK with the BLUETOOTH_SCAN / BLUETOOTH_CONNECT model (Android 12, S).
pub const MODERN_BLE_PERMISSIONS_SDK: u32 = 31;

/// Last Android SDK where coarse location is enough to scan (Android 9, P).
pub const LEGACY_COARSE_LOCATION_CUTOFF_SDK: u32 = 28;

/// Logical permission names. Several aliases may map to one OS permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionAlias {
    Bluetooth,
    BluetoothScan,
    BluetoothConnect,
    BluetoothAdmin,
    AccessFineLocation,
    AccessCoarseLocation,
}

impl PermissionAlias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bluetooth => "BLUETOOTH",
            Self::BluetoothScan => "BLUETOOTH_SCAN",
            Self::BluetoothConnect => "BLUETOOTH_CONNECT",
            Self::BluetoothAdmin => "BLUETOOTH_ADMIN",
            Self::AccessFineLocation => "ACCESS_FINE_LOCATION",
            Self::AccessCoarseLocation => "ACCESS_COARSE_LOCATION",
        }
    }

    /// OS permission string this alias is declared against.
    pub fn os_permission(&self) -> &'static str {
        match self {
            Self::Bluetooth => "android.permission.BLUETOOTH",
            Self::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            Self::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
            Self::BluetoothAdmin => "android.permission.BLUETOOTH_ADMIN",
            Self::AccessFineLocation | Self::AccessCoarseLocation => {
                "android.permission.ACCESS_FINE_LOCATION"
            }
        }
    }
}

impl fmt::Display for PermissionAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alias → OS permission mapping from the plugin manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionDeclaration {
    pub alias: PermissionAlias,
    pub permission: &'static str,
}

/// Declared once at plugin registration. Both location aliases resolve to the
/// fine location permission.
pub const PERMISSION_DECLARATIONS: &[PermissionDeclaration] = &[
    PermissionDeclaration {
        alias: PermissionAlias::Bluetooth,
        permission: "android.permission.BLUETOOTH",
    },
    PermissionDeclaration {
        alias: PermissionAlias::BluetoothConnect,
        permission: "android.permission.BLUETOOTH_CONNECT",
    },
    PermissionDeclaration {
        alias: PermissionAlias::BluetoothScan,
        permission: "android.permission.BLUETOOTH_SCAN",
    },
    PermissionDeclaration {
        alias: PermissionAlias::BluetoothAdmin,
        permission: "android.permission.BLUETOOTH_ADMIN",
    },
    PermissionDeclaration {
        alias: PermissionAlias::AccessCoarseLocation,
        permission: "android.permission.ACCESS_FINE_LOCATION",
    },
    PermissionDeclaration {
        alias: PermissionAlias::AccessFineLocation,
        permission: "android.permission.ACCESS_FINE_LOCATION",
    },
];

/// Grant state recorded by the OS for one alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not answered yet, or the OS left it indeterminate.
    Prompt,
}

/// Ordered, immutable set of aliases computed for one init call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSet(Vec<PermissionAlias>);

impl PermissionSet {
    fn from_aliases(aliases: Vec<PermissionAlias>) -> Self {
        Self(aliases)
    }

    pub fn as_slice(&self) -> &[PermissionAlias] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = PermissionAlias> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, alias: PermissionAlias) -> bool {
        self.0.contains(&alias)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|alias| alias.as_str()).collect()
    }
}

/// Aliases required to use BLE on `sdk_version`.
///
/// `for_location` only matters on the modern model; older versions always
/// need a location permission to scan.
pub fn required_permissions(sdk_version: u32, for_location: bool) -> PermissionSet {
    use PermissionAlias::*;

    let aliases = if sdk_version >= MODERN_BLE_PERMISSIONS_SDK {
        let mut aliases = vec![BluetoothScan, BluetoothConnect, BluetoothAdmin];
        if for_location {
            aliases.push(AccessFineLocation);
        }
        aliases
    } else if sdk_version > LEGACY_COARSE_LOCATION_CUTOFF_SDK {
        vec![Bluetooth, AccessFineLocation]
    } else {
        vec![Bluetooth, AccessCoarseLocation]
    };

    PermissionSet::from_aliases(aliases)
}
