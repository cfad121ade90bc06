pub const AUTH_USER: &str = "/user";
pub const DEVICE_MANAGER_TEMPLATE: &str = "/template";
pub const DEVICE_MANAGER_DEVICE: &str = "/device";
pub const DATA_BROKER_SOCKETIO: &str = "/socketio";

#[must_use]
pub fn history_of(device_id: &str) -> String {
    format!("/device/{device_id}/history")
}
