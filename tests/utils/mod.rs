pub mod fake_devices;
pub mod mock_relay;

pub use fake_devices::*;
pub use mock_relay::*;
pub use signal_helpers::*;
