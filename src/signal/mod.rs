pub mod aggregator;
pub mod osc;

pub use aggregator::{ChannelAverager, PowerCurve};
pub use osc::{osc_server_task, OscRouter};
