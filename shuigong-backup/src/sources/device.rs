//! Device description recorded in archive metadata.

use std::collections::BTreeMap;

use super::DeviceDescriptor;

/// Describes the machine the engine runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDeviceDescriptor;

impl DeviceDescriptor for HostDeviceDescriptor {
    fn describe(&self) -> BTreeMap<String, String> {
        let mut info = BTreeMap::new();
        info.insert("os".to_string(), std::env::consts::OS.to_string());
        info.insert("arch".to_string(), std::env::consts::ARCH.to_string());
        if let Some(host) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
            info.insert("hostname".to_string(), host);
        }
        info
    }
}
