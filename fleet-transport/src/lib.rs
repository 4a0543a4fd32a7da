// KlipperFleet bus layer
// Discovery, identity resolution, mode transitions and flashing for the
// serial / CAN / DFU / host-process transports.

pub mod buses;
pub mod canjump;
pub mod discovery;
pub mod error;
pub mod flash;
pub mod identity;
pub mod moonraker;
pub mod process;
pub mod transition;
pub mod types;

pub use buses::BusArbiter;
pub use error::TransportError;
pub use moonraker::MoonrakerClient;
pub use process::LogSink;
pub use types::{
    DeviceKind, DeviceMode, DfuDevice, DiscoveredDevice, FlashMethod, ToolPaths,
};

/// Central handle over the physical buses.
///
/// One instance per process; the arbiter inside enforces the one-holder-per-
/// bus rule for everything spawned from it.
pub struct FlashManager {
    pub paths: ToolPaths,
    pub buses: BusArbiter,
    pub moonraker: MoonrakerClient,
}

impl FlashManager {
    pub fn new(paths: ToolPaths) -> Self {
        Self {
            paths,
            buses: BusArbiter::new(),
            moonraker: MoonrakerClient::default(),
        }
    }
}
