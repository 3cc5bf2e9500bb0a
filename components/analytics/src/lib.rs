pub mod flow;
pub mod frame;
pub mod metrics;
pub mod reorder;

pub use flow::{ErrorInterval, FlowSignal};
pub use frame::{DropReason, HeaderParseError, PacketHeader, HEADER_LEN, MARKER};
pub use metrics::FlowletMetrics;
pub use reorder::{Admission, ReorderBuffer, DEFAULT_CAPACITY};
