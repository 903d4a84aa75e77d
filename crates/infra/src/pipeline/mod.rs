//! Processing pipeline: the processor registry, dispatch, and the periodic
//! worker that moves events through the status machine.

pub mod dispatch;
pub mod processor;
pub mod registry;
pub mod worker;

pub use dispatch::{DispatchScope, Dispatcher, ProcessorOutcome};
pub use processor::{DispatchContext, DispatchMode, FnProcessor, Processor, ProcessorError};
pub use registry::{NewProcessor, ProcessorRegistry, RegistryError};
pub use worker::{CycleReport, Pipeline, PipelineHandle, PipelineStats};
