//! Streams UI generated as markup: every fragment of the generation is
//! re-transformed, re-evaluated and, when it renders, pushed to the client
//! together with the source it came from.

pub mod accumulator;
pub mod config;
pub mod frame;
pub mod generator;
pub mod renderer;
pub mod server;
pub mod session;
pub mod sink;

pub use accumulator::{clean, SourceAccumulator};
pub use config::{CatalogEntry, Config, ConfigError, GeneratorConfig, DEFAULT_CONFIG_NAME};
pub use frame::{decode_frames, encode_frames, OutboundFrame, CONTENT_TYPE};
pub use generator::{FragmentStream, Generator, GeneratorError, SimulatedGenerator, DEMO_SOURCE};
pub use renderer::{render_once, FlightEncoder, RenderError};
pub use server::{router, AppState};
pub use session::{Session, SessionSummary};
pub use sink::{live_tree, LiveTreeSink, RenderedChunk, SinkClosed, TreeStream, TreeUpdate};
