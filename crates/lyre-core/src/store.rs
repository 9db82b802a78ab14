//! Durable key-value storage
//!
//! Values are opaque byte blobs. `FileStore` keeps one file per key,
//! `MemoryStore` backs tests, and `DeferredStore` moves writes of any store
//! onto a background thread.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{ Path, PathBuf };
use std::sync::mpsc;
use std::sync::{ Arc, Mutex };
use std::thread;

use thiserror::Error;


/// Errors that can occur with storage operations.
#[derive( Debug, Error )]
pub enum StoreError {
    #[error( "IO error: {0}" )]
    Io( #[from] io::Error ),

    #[error( "Invalid key: {0:?}" )]
    InvalidKey( String ),

    #[error( "Store is closed" )]
    Closed,
}


/// A minimal key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get( &self, key: &str ) -> Result<Option<Vec<u8>>, StoreError>;

    fn put( &self, key: &str, value: Vec<u8> ) -> Result<(), StoreError>;

    fn remove( &self, key: &str ) -> Result<(), StoreError>;
}


/// In-process store.
#[derive( Debug, Default )]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}


impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}


impl KeyValueStore for MemoryStore {
    fn get( &self, key: &str ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok( self.values.lock().unwrap().get( key ).cloned() )
    }


    fn put( &self, key: &str, value: Vec<u8> ) -> Result<(), StoreError> {
        self.values.lock().unwrap().insert( key.to_string(), value );
        Ok(())
    }


    fn remove( &self, key: &str ) -> Result<(), StoreError> {
        self.values.lock().unwrap().remove( key );
        Ok(())
    }
}


/// Stores each key as `<dir>/<key>.json`.
#[derive( Debug, Clone )]
pub struct FileStore {
    dir: PathBuf,
}


impl FileStore {
    pub fn new( dir: PathBuf ) -> Self {
        Self { dir }
    }


    /// Per-user data directory, e.g. `~/.local/share/lyre` on Linux.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map( |d| d.join( "lyre" ) )
    }


    pub fn dir( &self ) -> &Path {
        &self.dir
    }


    fn path_for( &self, key: &str ) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key.chars().all( |c| c.is_ascii_alphanumeric() || c == '_' || c == '-' );
        if !valid {
            return Err( StoreError::InvalidKey( key.to_string() ) );
        }
        Ok( self.dir.join( format!( "{}.json", key ) ) )
    }
}


impl KeyValueStore for FileStore {
    fn get( &self, key: &str ) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read( self.path_for( key )? ) {
            Ok( bytes ) => Ok( Some( bytes ) ),
            Err( e ) if e.kind() == io::ErrorKind::NotFound => Ok( None ),
            Err( e ) => Err( e.into() ),
        }
    }


    /// Writes to a temporary file and renames it over the old value.
    fn put( &self, key: &str, value: Vec<u8> ) -> Result<(), StoreError> {
        let path = self.path_for( key )?;
        fs::create_dir_all( &self.dir )?;

        let tmp = path.with_extension( "json.tmp" );
        fs::write( &tmp, &value )?;
        fs::rename( &tmp, &path )?;
        Ok(())
    }


    fn remove( &self, key: &str ) -> Result<(), StoreError> {
        match fs::remove_file( self.path_for( key )? ) {
            Ok(()) => Ok(()),
            Err( e ) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err( e ) => Err( e.into() ),
        }
    }
}


enum PendingWrite {
    Put( String, Vec<u8> ),
    Remove( String ),
}


/// Fire-and-forget writes on a background thread.
///
/// Reads go straight to the inner store. Queued writes are flushed when the
/// store is dropped.
pub struct DeferredStore {
    inner: Arc<dyn KeyValueStore>,
    sender: Mutex<Option<mpsc::Sender<PendingWrite>>>,
    writer: Option<thread::JoinHandle<()>>,
}


impl DeferredStore {
    pub fn new( inner: Arc<dyn KeyValueStore> ) -> io::Result<Self> {
        let ( sender, receiver ) = mpsc::channel::<PendingWrite>();
        let target = Arc::clone( &inner );

        let writer = thread::Builder::new()
            .name( "lyre-store".into() )
            .spawn( move || Self::write_loop( target.as_ref(), receiver ) )?;

        Ok( Self {
            inner,
            sender: Mutex::new( Some( sender ) ),
            writer: Some( writer ),
        })
    }


    fn write_loop( target: &dyn KeyValueStore, receiver: mpsc::Receiver<PendingWrite> ) {
        while let Ok( first ) = receiver.recv() {
            // Only the newest value per key matters
            let mut batch: Vec<PendingWrite> = vec![ first ];
            batch.extend( receiver.try_iter() );

            let mut latest: HashMap<String, Option<Vec<u8>>> = HashMap::new();
            let mut order = Vec::new();
            for write in batch {
                let ( key, value ) = match write {
                    PendingWrite::Put( key, value ) => ( key, Some( value ) ),
                    PendingWrite::Remove( key ) => ( key, None ),
                };
                if !latest.contains_key( &key ) {
                    order.push( key.clone() );
                }
                latest.insert( key, value );
            }

            for key in order {
                let result = match latest.remove( &key ).flatten() {
                    Some( value ) => target.put( &key, value ),
                    None => target.remove( &key ),
                };
                if let Err( e ) = result {
                    tracing::warn!( "Deferred write of {:?} failed: {}", key, e );
                }
            }
        }
        tracing::debug!( "Store writer: channel closed" );
    }


    fn send( &self, write: PendingWrite ) -> Result<(), StoreError> {
        let sender = self.sender.lock().unwrap();
        sender.as_ref()
            .ok_or( StoreError::Closed )?
            .send( write )
            .map_err( |_| StoreError::Closed )
    }
}


impl KeyValueStore for DeferredStore {
    fn get( &self, key: &str ) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get( key )
    }


    fn put( &self, key: &str, value: Vec<u8> ) -> Result<(), StoreError> {
        self.send( PendingWrite::Put( key.to_string(), value ) )
    }


    fn remove( &self, key: &str ) -> Result<(), StoreError> {
        self.send( PendingWrite::Remove( key.to_string() ) )
    }
}


impl Drop for DeferredStore {
    fn drop( &mut self ) {
        // Closing the channel lets the writer drain and exit
        if let Ok( mut sender ) = self.sender.lock() {
            sender.take();
        }
        if let Some( writer ) = self.writer.take() {
            let _ = writer.join();
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!( store.get( "a" ).unwrap(), None );
        store.put( "a", b"one".to_vec() ).unwrap();
        assert_eq!( store.get( "a" ).unwrap(), Some( b"one".to_vec() ) );
        store.remove( "a" ).unwrap();
        assert_eq!( store.get( "a" ).unwrap(), None );
    }


    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new( dir.path().join( "nested" ) );

        assert_eq!( store.get( "playbackState" ).unwrap(), None );
        store.put( "playbackState", b"{}".to_vec() ).unwrap();
        store.put( "playbackState", b"{\"v\":2}".to_vec() ).unwrap();
        assert_eq!( store.get( "playbackState" ).unwrap(), Some( b"{\"v\":2}".to_vec() ) );
        assert!( dir.path().join( "nested/playbackState.json" ).exists() );
        assert!( !dir.path().join( "nested/playbackState.json.tmp" ).exists() );

        store.remove( "playbackState" ).unwrap();
        store.remove( "playbackState" ).unwrap();
        assert_eq!( store.get( "playbackState" ).unwrap(), None );
    }


    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new( dir.path().to_path_buf() );
        assert!( matches!( store.put( "../escape", vec![] ), Err( StoreError::InvalidKey( _ ) ) ) );
        assert!( matches!( store.get( "" ), Err( StoreError::InvalidKey( _ ) ) ) );
    }


    #[test]
    fn test_deferred_store_flushes_on_drop() {
        let inner = Arc::new( MemoryStore::new() );
        {
            let store = DeferredStore::new( inner.clone() ).unwrap();
            for i in 0..50u8 {
                store.put( "counter", vec![ i ] ).unwrap();
            }
            store.put( "gone", vec![ 1 ] ).unwrap();
            store.remove( "gone" ).unwrap();
        }
        assert_eq!( inner.get( "counter" ).unwrap(), Some( vec![ 49 ] ) );
        assert_eq!( inner.get( "gone" ).unwrap(), None );
    }
}
