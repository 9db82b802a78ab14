//! Library scanning and loading
//!
//! `LibraryScanner` discovers audio files under a set of root directories.
//! `LibraryLoader` fans metadata extraction out over those files and gathers
//! the resulting tracks.

use std::path::{ Path, PathBuf };
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::metadata::MetadataExtractor;
use crate::track::Track;


/// Supported audio file extensions.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "aac", "flac", "ogg",
];


/// Library scanner for discovering audio files.
#[derive( Debug, Clone, Default )]
pub struct LibraryScanner {
    roots: Vec<PathBuf>,
}


impl LibraryScanner {
    /// Creates a new scanner with no root directories.
    pub fn new() -> Self {
        Self { roots: Vec::new() }
    }


    /// Creates a scanner over a single root.
    pub fn with_root( path: PathBuf ) -> Self {
        let mut scanner = Self::new();
        scanner.add_root( path );
        scanner
    }


    /// Adds a root directory to scan. Duplicates are ignored.
    pub fn add_root( &mut self, path: PathBuf ) {
        if !self.roots.contains( &path ) {
            self.roots.push( path );
        }
    }


    /// Removes a root directory.
    pub fn remove_root( &mut self, path: &Path ) -> bool {
        if let Some( pos ) = self.roots.iter().position( |p| p == path ) {
            self.roots.remove( pos );
            true
        } else {
            false
        }
    }


    pub fn roots( &self ) -> &[PathBuf] {
        &self.roots
    }


    /// Scans all roots and returns discovered audio files.
    ///
    /// Directories are walked depth-first with entries in file name order.
    /// Unreadable directories are logged and skipped.
    pub fn scan( &self ) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for root in &self.roots {
            tracing::info!( "Scanning: {:?}", root );
            self.scan_recursive( root, &mut files );
        }

        tracing::info!( "Found {} audio files", files.len() );
        files
    }


    fn scan_recursive( &self, dir: &Path, files: &mut Vec<PathBuf> ) {
        let entries = match std::fs::read_dir( dir ) {
            Ok( e ) => e,
            Err( e ) => {
                tracing::warn!( "Skipping unreadable directory {:?}: {}", dir, e );
                return;
            }
        };

        let mut entries: Vec<_> = entries.flatten().collect();
        entries.sort_by_key( |e| e.file_name() );

        for entry in entries {
            let path = entry.path();

            if path.is_dir() {
                self.scan_recursive( &path, files );
            } else if is_audio_file( &path ) {
                files.push( path );
            }
        }
    }
}


/// Checks if a file has a supported audio extension (case-insensitive).
pub fn is_audio_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| SUPPORTED_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


/// Scans the library and extracts metadata for every file found.
#[derive( Debug, Clone, Default )]
pub struct LibraryLoader {
    scanner: LibraryScanner,
    extractor: MetadataExtractor,
    max_concurrent: Option<usize>,
}


impl LibraryLoader {
    pub fn new( scanner: LibraryScanner, extractor: MetadataExtractor ) -> Self {
        Self {
            scanner,
            extractor,
            max_concurrent: None,
        }
    }


    /// Caps the number of files read at once. `None` or zero means no cap.
    pub fn with_max_concurrent( mut self, limit: Option<usize> ) -> Self {
        self.max_concurrent = limit.filter( |n| *n > 0 );
        self
    }


    pub fn scanner( &self ) -> &LibraryScanner {
        &self.scanner
    }


    pub fn scanner_mut( &mut self ) -> &mut LibraryScanner {
        &mut self.scanner
    }


    /// Scans all roots and builds the track collection.
    pub async fn load( &self ) -> Vec<Arc<Track>> {
        let scanner = self.scanner.clone();
        let paths = match tokio::task::spawn_blocking( move || scanner.scan() ).await {
            Ok( paths ) => paths,
            Err( e ) => {
                tracing::error!( "Library scan task failed: {}", e );
                return Vec::new();
            }
        };

        self.extract_all( paths ).await
    }


    /// Extracts metadata for each path in its own task.
    ///
    /// Tasks finish in any order; the returned tracks are sorted by path.
    pub async fn extract_all( &self, paths: Vec<PathBuf> ) -> Vec<Arc<Track>> {
        let limit = self.max_concurrent.map( |n| Arc::new( Semaphore::new( n ) ) );
        let total = paths.len();
        let mut tasks = JoinSet::new();

        for path in paths {
            let extractor = self.extractor;
            let limit = limit.clone();

            tasks.spawn( async move {
                let _permit = match limit {
                    Some( semaphore ) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };

                tokio::task::spawn_blocking( move || {
                    let metadata = extractor.extract( &path );
                    Arc::new( Track::with_metadata( path, metadata ) )
                }).await
            });
        }

        let mut tracks = Vec::with_capacity( total );
        while let Some( result ) = tasks.join_next().await {
            match result {
                Ok( Ok( track ) ) => tracks.push( track ),
                Ok( Err( e ) ) | Err( e ) => tracing::error!( "Metadata task failed: {}", e ),
            }
        }

        tracks.sort_by( |a, b| a.path().cmp( b.path() ) );
        tracing::info!( "Loaded {} of {} tracks", tracks.len(), total );
        tracks
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::flac::fixtures;
    use std::fs;


    fn touch( path: &Path ) {
        if let Some( parent ) = path.parent() {
            fs::create_dir_all( parent ).unwrap();
        }
        fs::write( path, b"" ).unwrap();
    }


    #[test]
    fn test_scan_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch( &root.join( "b.mp3" ) );
        touch( &root.join( "a.FLAC" ) );
        touch( &root.join( "cover.jpg" ) );
        touch( &root.join( "notes.txt" ) );
        touch( &root.join( "Album/02.ogg" ) );
        touch( &root.join( "Album/01.m4a" ) );
        touch( &root.join( "Album/Disc 2/01.wav" ) );
        touch( &root.join( "Other/song.aac" ) );
        touch( &root.join( "Other/song.opus" ) );

        let found = LibraryScanner::with_root( root.to_path_buf() ).scan();
        let relative: Vec<_> = found.iter()
            .map( |p| p.strip_prefix( root ).unwrap().to_path_buf() )
            .collect();

        assert_eq!( relative, vec![
            PathBuf::from( "Album/01.m4a" ),
            PathBuf::from( "Album/02.ogg" ),
            PathBuf::from( "Album/Disc 2/01.wav" ),
            PathBuf::from( "Other/song.aac" ),
            PathBuf::from( "a.FLAC" ),
            PathBuf::from( "b.mp3" ),
        ]);
    }


    #[test]
    fn test_missing_root_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch( &dir.path().join( "one.mp3" ) );

        let mut scanner = LibraryScanner::new();
        scanner.add_root( dir.path().join( "does-not-exist" ) );
        scanner.add_root( dir.path().to_path_buf() );

        assert_eq!( scanner.scan().len(), 1 );
    }


    #[test]
    fn test_roots() {
        let mut scanner = LibraryScanner::new();
        scanner.add_root( PathBuf::from( "/music" ) );
        scanner.add_root( PathBuf::from( "/music" ) );
        scanner.add_root( PathBuf::from( "/podcasts" ) );
        assert_eq!( scanner.roots().len(), 2 );

        assert!( scanner.remove_root( Path::new( "/music" ) ) );
        assert!( !scanner.remove_root( Path::new( "/music" ) ) );
        assert_eq!( scanner.roots(), &[ PathBuf::from( "/podcasts" ) ] );
    }


    #[test]
    fn test_is_audio_file() {
        assert!( is_audio_file( Path::new( "x/y.Mp3" ) ) );
        assert!( is_audio_file( Path::new( "song.ogg" ) ) );
        assert!( !is_audio_file( Path::new( "song.wma" ) ) );
        assert!( !is_audio_file( Path::new( "flac" ) ) );
    }


    #[tokio::test]
    async fn test_load_extracts_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write( root.join( "z.flac" ), fixtures::stream( &[ "TITLE=Zed" ], None ) ).unwrap();
        fs::write( root.join( "a.mp3" ), b"not audio" ).unwrap();
        fs::create_dir_all( root.join( "sub" ) ).unwrap();
        fs::write( root.join( "sub/m.ogg" ), b"" ).unwrap();

        let loader = LibraryLoader::new( LibraryScanner::with_root( root.to_path_buf() ), MetadataExtractor::new() );
        let tracks = loader.load().await;

        let titles: Vec<_> = tracks.iter().map( |t| t.title().to_string() ).collect();
        assert_eq!( titles, vec![ "a", "m", "Zed" ] );
        assert!( tracks.iter().all( |t| t.details().is_some() ) );
        assert_eq!( tracks[ 2 ].duration(), Some( 10.0 ) );
    }


    #[tokio::test]
    async fn test_load_with_concurrency_cap() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            touch( &dir.path().join( format!( "{:02}.mp3", i ) ) );
        }

        let loader = LibraryLoader::new( LibraryScanner::with_root( dir.path().to_path_buf() ), MetadataExtractor::new() )
            .with_max_concurrent( Some( 2 ) );
        let tracks = loader.load().await;

        assert_eq!( tracks.len(), 12 );
        assert_eq!( tracks[ 0 ].filename(), "00" );
        assert_eq!( tracks[ 11 ].filename(), "11" );
    }


    #[tokio::test]
    async fn test_load_empty_library() {
        let dir = tempfile::tempdir().unwrap();
        let loader = LibraryLoader::new( LibraryScanner::with_root( dir.path().to_path_buf() ), MetadataExtractor::new() );
        assert!( loader.load().await.is_empty() );
    }
}
