pub mod assembly_ctx;
pub mod assembly_flow;
pub mod formatting;
pub mod shuffle;

pub use assembly_ctx::{AssemblyCtx, BoundaryProfile};
pub use assembly_flow::{AssemblyFlow, NoopProgress, ProgressSink};
