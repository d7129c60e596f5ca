use serde::{Deserialize, Serialize};

/// A mining device (GPU) discovered on a machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub device_id: String,
    pub display_name: String,
    pub hardware_version: String,
    pub driver_version: String,
}
