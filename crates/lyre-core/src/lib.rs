//! Lyre Core - Playback session engine
//!
//! This crate provides the core of the player: library scanning, metadata
//! extraction (including a native FLAC reader), the playback state machine,
//! session persistence and the now-playing bridge.

pub mod command;
pub mod decoder;
#[cfg( feature = "device" )]
pub mod device;
pub mod engine;
pub mod flac;
pub mod library;
pub mod metadata;
pub mod mode;
pub mod now_playing;
pub mod output;
pub mod runtime;
pub mod session;
pub mod store;
pub mod track;

pub use command::{ Command, CommandError };
pub use engine::{ Engine, EngineCommand, PlaybackStatus, SessionState };
pub use library::{ LibraryLoader, LibraryScanner };
pub use metadata::{ MetadataExtractor, ParsedMetadata };
pub use mode::{ PlaybackMode, RepeatMode };
pub use now_playing::{ NowPlayingBridge, NowPlayingInfo, NowPlayingSurface, RemoteCommand };
pub use output::{ AudioOutput, ClockOutput, OpenError, PlayerHandle };
pub use runtime::EngineHandle;
pub use session::{ PersistedSnapshot, SessionPersistence };
pub use store::{ DeferredStore, FileStore, KeyValueStore, MemoryStore };
pub use track::{ Artwork, Track };
