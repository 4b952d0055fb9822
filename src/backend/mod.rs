//! DPP stack abstraction layer

pub mod dpp_stack;
pub mod events;
pub mod mock_backend;
pub mod wifi_ctrl_backend;

pub use dpp_stack::{DppStack, EventReceiver};
pub use wifi_ctrl_backend::WifiCtrlBackend;

#[cfg(test)]
pub use mock_backend::MockDppStack;
