//! Library tracks
//!
//! A track pairs a fixed identity (id, source path, filename, extension) with
//! descriptive details that are filled in once, after metadata extraction.

use std::fmt;
use std::hash::{ Hash, Hasher };
use std::path::{ Path, PathBuf };
use std::sync::{ Arc, OnceLock };

use uuid::Uuid;

use crate::metadata::ParsedMetadata;


/// Per-session track identifier.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub struct TrackId( Uuid );


impl TrackId {
    fn new() -> Self {
        Self( Uuid::new_v4() )
    }
}


impl fmt::Display for TrackId {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!( f, "{}", self.0 )
    }
}


/// Embedded cover image, kept as the raw encoded bytes.
#[derive( Clone, PartialEq, Eq )]
pub struct Artwork {
    data: Arc<[u8]>,
}


impl Artwork {
    pub fn new( data: impl Into<Arc<[u8]>> ) -> Self {
        Self { data: data.into() }
    }


    pub fn bytes( &self ) -> &[u8] {
        &self.data
    }


    pub fn len( &self ) -> usize {
        self.data.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.data.is_empty()
    }


    /// Guesses the image MIME type from the leading magic bytes.
    pub fn mime_type( &self ) -> &'static str {
        match &self.data[ .. ] {
            [ 0x89, b'P', b'N', b'G', .. ] => "image/png",
            [ 0xFF, 0xD8, 0xFF, .. ] => "image/jpeg",
            [ b'G', b'I', b'F', b'8', .. ] => "image/gif",
            [ b'B', b'M', .. ] => "image/bmp",
            [ b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', .. ] => "image/webp",
            _ => "application/octet-stream",
        }
    }


    /// File extension matching [`Artwork::mime_type`].
    pub fn extension( &self ) -> &'static str {
        match self.mime_type() {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            "image/webp" => "webp",
            _ => "bin",
        }
    }
}


impl fmt::Debug for Artwork {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!( f, "Artwork({} bytes, {})", self.data.len(), self.mime_type() )
    }
}


/// Descriptive fields resolved by the metadata extractor.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct TrackDetails {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    pub artwork: Option<Artwork>,
}


/// An audio file in the library.
///
/// Equality and hashing use the source path only, so two `Track` values
/// built from the same file are the same entity even if their details differ.
#[derive( Debug )]
pub struct Track {
    id: TrackId,
    path: PathBuf,
    filename: String,
    extension: String,
    details: OnceLock<TrackDetails>,
}


impl Track {
    /// Creates a track with no details yet.
    pub fn new( path: PathBuf ) -> Self {
        let filename = path.file_stem()
            .map( |s| s.to_string_lossy().into_owned() )
            .unwrap_or_default();
        let extension = path.extension()
            .map( |s| s.to_string_lossy().into_owned() )
            .unwrap_or_default();

        Self {
            id: TrackId::new(),
            path,
            filename,
            extension,
            details: OnceLock::new(),
        }
    }


    /// Creates a track and immediately folds in its metadata.
    pub fn with_metadata( path: PathBuf, metadata: ParsedMetadata ) -> Self {
        let track = Self::new( path );
        track.populate( metadata );
        track
    }


    pub fn id( &self ) -> TrackId {
        self.id
    }


    pub fn path( &self ) -> &Path {
        &self.path
    }


    /// File name without extension.
    pub fn filename( &self ) -> &str {
        &self.filename
    }


    pub fn extension( &self ) -> &str {
        &self.extension
    }


    /// Folds extracted metadata into the track.
    ///
    /// Details can only be set once; returns false if they were already set.
    pub fn populate( &self, metadata: ParsedMetadata ) -> bool {
        let details = TrackDetails {
            title: metadata.title.unwrap_or_else( || self.filename.clone() ),
            artist: metadata.artist,
            album: metadata.album,
            duration: metadata.duration,
            artwork: metadata.artwork,
        };
        self.details.set( details ).is_ok()
    }


    pub fn details( &self ) -> Option<&TrackDetails> {
        self.details.get()
    }


    /// Title, falling back to the filename until details are populated.
    pub fn title( &self ) -> &str {
        self.details.get()
            .map( |d| d.title.as_str() )
            .unwrap_or( &self.filename )
    }


    pub fn artist( &self ) -> Option<&str> {
        self.details.get().and_then( |d| d.artist.as_deref() )
    }


    pub fn album( &self ) -> Option<&str> {
        self.details.get().and_then( |d| d.album.as_deref() )
    }


    pub fn duration( &self ) -> Option<f64> {
        self.details.get().and_then( |d| d.duration )
    }


    pub fn artwork( &self ) -> Option<&Artwork> {
        self.details.get().and_then( |d| d.artwork.as_ref() )
    }


    /// "Artist - Title", or just the title when the artist is unknown.
    pub fn display_name( &self ) -> String {
        match self.artist().map( str::trim ).filter( |a| !a.is_empty() ) {
            Some( artist ) => format!( "{} - {}", artist, self.title() ),
            None => self.title().to_string(),
        }
    }
}


impl PartialEq for Track {
    fn eq( &self, other: &Self ) -> bool {
        self.path == other.path
    }
}


impl Eq for Track {}


impl Hash for Track {
    fn hash<H: Hasher>( &self, state: &mut H ) {
        self.path.hash( state );
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_identity_is_derived_from_path() {
        let track = Track::new( PathBuf::from( "/music/Artist/Song Name.FLAC" ) );
        assert_eq!( track.filename(), "Song Name" );
        assert_eq!( track.extension(), "FLAC" );
        assert_eq!( track.title(), "Song Name" );
        assert!( track.details().is_none() );
    }


    #[test]
    fn test_equality_ignores_details_and_id() {
        let a = Track::new( PathBuf::from( "/music/a.mp3" ) );
        let b = Track::with_metadata(
            PathBuf::from( "/music/a.mp3" ),
            ParsedMetadata { title: Some( "Other".into() ), ..Default::default() },
        );
        assert_ne!( a.id(), b.id() );
        assert_eq!( a, b );
        assert_ne!( a, Track::new( PathBuf::from( "/music/b.mp3" ) ) );
    }


    #[test]
    fn test_populate_only_once() {
        let track = Track::new( PathBuf::from( "/music/a.mp3" ) );
        assert!( track.populate( ParsedMetadata {
            title: Some( "First".into() ),
            artist: Some( "Band".into() ),
            duration: Some( 12.5 ),
            ..Default::default()
        }));
        assert!( !track.populate( ParsedMetadata {
            title: Some( "Second".into() ),
            ..Default::default()
        }));
        assert_eq!( track.title(), "First" );
        assert_eq!( track.artist(), Some( "Band" ) );
        assert_eq!( track.duration(), Some( 12.5 ) );
        assert_eq!( track.display_name(), "Band - First" );
    }


    #[test]
    fn test_missing_title_defaults_to_filename() {
        let track = Track::with_metadata( PathBuf::from( "/music/intro.ogg" ), ParsedMetadata::default() );
        assert_eq!( track.details().map( |d| d.title.as_str() ), Some( "intro" ) );
        assert_eq!( track.display_name(), "intro" );
    }


    #[test]
    fn test_artwork_mime_sniffing() {
        let png = Artwork::new( vec![ 0x89, b'P', b'N', b'G', 0x0D, 0x0A ] );
        assert_eq!( png.mime_type(), "image/png" );
        assert_eq!( png.extension(), "png" );

        let jpeg = Artwork::new( vec![ 0xFF, 0xD8, 0xFF, 0xE0 ] );
        assert_eq!( jpeg.mime_type(), "image/jpeg" );

        let unknown = Artwork::new( vec![ 1, 2, 3 ] );
        assert_eq!( unknown.mime_type(), "application/octet-stream" );
        assert_eq!( unknown.len(), 3 );
    }
}
