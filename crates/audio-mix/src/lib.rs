//! Audio mixing engine for multi-party video mixing.
//!
//! Inbound streams are converted into one destination format, aligned to the video mixer's
//! clock and averaged into fixed-size frames.
//!
//! ## Stages
//! 1. **Convert** (`resample`, `fifo`): format/layout conversion and Rubato rate conversion
//!    into a per-stream timestamped fifo.
//! 2. **Align** (`sync`): per-stream drift decisions against the latest video clock event.
//! 3. **Mix** (`engine`): cadence, mute policy and frame assembly.
//! 4. **Drive** (`pipeline`): a worker thread fed over crossbeam channels.

pub mod config;
pub mod decode;
pub mod engine;
pub mod fifo;
pub mod format;
pub mod pipeline;
pub mod queue;
pub mod resample;
pub mod status;
pub mod sync;
