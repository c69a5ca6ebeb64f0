pub mod correlate;
pub mod flow;
pub mod rtt;
pub mod udp;

pub use correlate::*;
pub use flow::*;
pub use rtt::*;
pub use udp::*;
