pub mod command;
pub mod controller;
pub mod demux;
pub mod event;
pub mod response;

pub use command::Command;
pub use controller::{Condition, Controller};
pub use event::{Event, EventKind, PanDesc, RxUdp};
pub use response::Response;
