//! Permission subsystem
//!
//! - **table**: aliases, OS declarations and the pure version → alias-set decision table
//! - **resolver**: the OS request/callback shell around the table

pub mod resolver;
pub mod table;

pub use resolver::{
    PermissionCallback, PermissionError, PermissionPlatform, PermissionRequest,
    PermissionResolver, RequestId,
};
pub use table::{
    required_permissions, PermissionAlias, PermissionDeclaration, PermissionSet,
    PermissionState, LEGACY_COARSE_LOCATION_CUTOFF_SDK, MODERN_BLE_PERMISSIONS_SDK,
    PERMISSION_DECLARATIONS,
};
