pub mod call_permissions;
pub mod plugins;
