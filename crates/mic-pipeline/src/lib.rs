//! Capture, repair and play back a raw 16-bit PCM microphone stream from a serial link.
//!
//! Bytes arrive unframed, so the pipeline first recovers sample alignment, then runs each chunk
//! through a continuous filter and a gain stage before handing it to an [`sink::AudioSink`].
//! An [`supervisor::OverloadSupervisor`] watches the raw levels and triggers realignment or a
//! reconnect when the stream goes bad.

pub mod align;
pub mod config;
pub mod device;
pub mod error;
pub mod filter;
pub mod gain;
pub mod pcm;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod resample;
pub mod sink;
pub mod source;
pub mod status;
pub mod supervisor;
pub mod wav;

pub use config::PipelineConfig;
pub use error::{ConnectError, PipelineError};
pub use pipeline::{PipelineDriver, RunSummary};
pub use sink::{AudioSink, CpalSink};
pub use source::{ByteStreamReader, Connector, SerialConnector};
pub use wav::WavSink;
