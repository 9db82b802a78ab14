//! Session persistence
//!
//! Snapshots of the playback session are stored as JSON under a single key.
//! Saving is best effort and restoring treats anything unreadable as a fresh
//! start; neither ever reports an error to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{ Deserialize, Serialize };

use crate::engine::SessionState;
use crate::mode::{ PlaybackMode, RepeatMode };
use crate::store::{ KeyValueStore, MemoryStore };


/// Storage key holding the snapshot.
pub const SNAPSHOT_KEY: &str = "playbackState";


/// Durable projection of the session.
///
/// The track is identified by its source path so the snapshot survives
/// restarts and rescans.
#[derive( Debug, Clone, Default, PartialEq, Serialize, Deserialize )]
#[serde( rename_all = "camelCase" )]
pub struct PersistedSnapshot {
    pub track_path: Option<PathBuf>,
    pub position: f64,
    pub playing: bool,
    pub shuffle: bool,
    pub repeat: RepeatMode,
}


impl PersistedSnapshot {
    pub fn mode( &self ) -> PlaybackMode {
        PlaybackMode::new( self.shuffle, self.repeat )
    }
}


impl From<&SessionState> for PersistedSnapshot {
    fn from( state: &SessionState ) -> Self {
        Self {
            track_path: state.track.as_ref().map( |t| t.path().to_path_buf() ),
            position: state.position,
            playing: state.playing,
            shuffle: state.mode.shuffle,
            repeat: state.mode.repeat,
        }
    }
}


/// Saves and restores snapshots through a key-value store.
#[derive( Clone )]
pub struct SessionPersistence {
    store: Arc<dyn KeyValueStore>,
}


impl SessionPersistence {
    pub fn new( store: Arc<dyn KeyValueStore> ) -> Self {
        Self { store }
    }


    /// Persistence backed by a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new( Arc::new( MemoryStore::new() ) )
    }


    /// Writes the snapshot. Failures are logged and dropped.
    pub fn save( &self, snapshot: &PersistedSnapshot ) {
        let bytes = match serde_json::to_vec( snapshot ) {
            Ok( bytes ) => bytes,
            Err( e ) => {
                tracing::warn!( "Failed to encode session snapshot: {}", e );
                return;
            }
        };

        if let Err( e ) = self.store.put( SNAPSHOT_KEY, bytes ) {
            tracing::warn!( "Failed to save session snapshot: {}", e );
        }
    }


    /// Reads the last snapshot, or None if there is none or it is unreadable.
    pub fn restore( &self ) -> Option<PersistedSnapshot> {
        let bytes = match self.store.get( SNAPSHOT_KEY ) {
            Ok( Some( bytes ) ) => bytes,
            Ok( None ) => return None,
            Err( e ) => {
                tracing::warn!( "Failed to read session snapshot: {}", e );
                return None;
            }
        };

        match serde_json::from_slice( &bytes ) {
            Ok( snapshot ) => Some( snapshot ),
            Err( e ) => {
                tracing::warn!( "Ignoring unreadable session snapshot: {}", e );
                None
            }
        }
    }


    /// Removes any stored snapshot.
    pub fn clear( &self ) {
        if let Err( e ) = self.store.remove( SNAPSHOT_KEY ) {
            tracing::warn!( "Failed to clear session snapshot: {}", e );
        }
    }
}


impl std::fmt::Debug for SessionPersistence {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        f.debug_struct( "SessionPersistence" ).finish_non_exhaustive()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::store::StoreError;


    struct BrokenStore;


    impl KeyValueStore for BrokenStore {
        fn get( &self, _key: &str ) -> Result<Option<Vec<u8>>, StoreError> {
            Err( StoreError::Closed )
        }

        fn put( &self, _key: &str, _value: Vec<u8> ) -> Result<(), StoreError> {
            Err( StoreError::Closed )
        }

        fn remove( &self, _key: &str ) -> Result<(), StoreError> {
            Err( StoreError::Closed )
        }
    }


    #[test]
    fn test_round_trip() {
        let persistence = SessionPersistence::in_memory();
        let snapshot = PersistedSnapshot {
            track_path: Some( PathBuf::from( "/music/a.flac" ) ),
            position: 45.0,
            playing: false,
            shuffle: true,
            repeat: RepeatMode::All,
        };

        persistence.save( &snapshot );
        assert_eq!( persistence.restore(), Some( snapshot ) );
    }


    #[test]
    fn test_round_trip_without_track() {
        let persistence = SessionPersistence::in_memory();
        persistence.save( &PersistedSnapshot::default() );
        assert_eq!( persistence.restore(), Some( PersistedSnapshot::default() ) );
    }


    #[test]
    fn test_missing_or_corrupt_is_none() {
        let store = Arc::new( MemoryStore::new() );
        let persistence = SessionPersistence::new( store.clone() );
        assert_eq!( persistence.restore(), None );

        store.put( SNAPSHOT_KEY, b"{ not json".to_vec() ).unwrap();
        assert_eq!( persistence.restore(), None );

        // Legacy layout with a different shape
        store.put( SNAPSHOT_KEY, b"{\"currentTrack\":3}".to_vec() ).unwrap();
        assert_eq!( persistence.restore(), None );

        persistence.save( &PersistedSnapshot::default() );
        persistence.clear();
        assert_eq!( persistence.restore(), None );
    }


    #[test]
    fn test_store_failures_are_swallowed() {
        let persistence = SessionPersistence::new( Arc::new( BrokenStore ) );
        persistence.save( &PersistedSnapshot::default() );
        assert_eq!( persistence.restore(), None );
        persistence.clear();
    }


    #[test]
    fn test_json_layout() {
        let snapshot = PersistedSnapshot {
            track_path: Some( PathBuf::from( "/m/x.mp3" ) ),
            position: 1.5,
            playing: true,
            shuffle: false,
            repeat: RepeatMode::One,
        };
        let json: serde_json::Value = serde_json::to_value( &snapshot ).unwrap();
        assert_eq!( json[ "trackPath" ], "/m/x.mp3" );
        assert_eq!( json[ "repeat" ], "one" );
        assert_eq!( json[ "playing" ], true );
    }
}
