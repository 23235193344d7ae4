pub mod frame;
pub mod smart_meter;

pub use frame::{EchonetObject, Frame, FrameError, Property, TidSource, esv};
