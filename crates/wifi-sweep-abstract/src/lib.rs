pub mod config;
pub mod interface;
pub mod packet;
pub mod position;
pub mod scenario;
pub mod time;

pub use interface::{AppContext, Application};
pub use packet::Packet;
pub use position::Vector3;

pub use config::{
    ConfigError, OutputFormat, PhyConfig, RunNaming, RunTuple, SweepConfig, WifiStandard,
    send_interval,
};
pub use scenario::{PhyOverride, SweepOverride};
pub use time::SimTime;
