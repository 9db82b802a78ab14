//! Container metadata extraction
//!
//! Combines two strategies: the FLAC block parser for `.flac` files, then
//! Symphonia's generic container introspection for everything it can open.
//! Whatever the first strategy found is never overwritten by the second.
//! Extraction never fails; a file nothing can be read from still gets its
//! filename as a title.

use std::path::Path;

use symphonia::core::meta::{ MetadataRevision, StandardTagKey, StandardVisualKey, Value };

use crate::decoder;
use crate::flac::FlacMetadata;
use crate::track::Artwork;


/// Tag keys that carry artwork regardless of namespace.
const COMMON_ARTWORK_KEYS: &[&str] = &[ "artwork", "artworkData", "coverArt" ];


/// Metadata resolved for a single file.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct ParsedMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    pub artwork: Option<Artwork>,
}


/// Tag families a container can report.
///
/// Declaration order is the artwork search order.
#[derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash )]
pub enum TagNamespace {
    Id3,
    ITunes,
    Xiph,
    Mp4,
    Generic,
}


impl TagNamespace {
    /// Namespace of tags stored inside a container of the given file type.
    fn for_container( extension: &str, key: &str ) -> Self {
        match extension.to_lowercase().as_str() {
            "flac" | "ogg" | "oga" | "opus" => TagNamespace::Xiph,
            "mp3" | "aac" => TagNamespace::Id3,
            "m4a" | "mp4" | "m4b" => {
                if key.starts_with( '©' ) || key.starts_with( "----" ) || key.eq_ignore_ascii_case( "covr" ) {
                    TagNamespace::ITunes
                } else {
                    TagNamespace::Mp4
                }
            }
            _ => TagNamespace::Generic,
        }
    }


    fn text_keys( self, field: CommonKey ) -> &'static [&'static str] {
        match ( self, field ) {
            ( TagNamespace::Id3, CommonKey::Title ) => &[ "TIT2", "TT2" ],
            ( TagNamespace::Id3, CommonKey::Artist ) => &[ "TPE1", "TP1" ],
            ( TagNamespace::Id3, CommonKey::Album ) => &[ "TALB", "TAL" ],
            ( TagNamespace::ITunes | TagNamespace::Mp4, CommonKey::Title ) => &[ "©nam" ],
            ( TagNamespace::ITunes | TagNamespace::Mp4, CommonKey::Artist ) => &[ "©ART" ],
            ( TagNamespace::ITunes | TagNamespace::Mp4, CommonKey::Album ) => &[ "©alb" ],
            ( TagNamespace::Xiph, CommonKey::Title ) => &[ "TITLE" ],
            ( TagNamespace::Xiph, CommonKey::Artist ) => &[ "ARTIST" ],
            ( TagNamespace::Xiph, CommonKey::Album ) => &[ "ALBUM" ],
            _ => &[],
        }
    }


    fn artwork_keys( self ) -> &'static [&'static str] {
        match self {
            TagNamespace::Id3 => &[ "APIC", "PIC" ],
            TagNamespace::ITunes => &[ "covr" ],
            TagNamespace::Xiph => &[ "METADATA_BLOCK_PICTURE", "PICTURE" ],
            TagNamespace::Mp4 => &[ "covr", "cover" ],
            TagNamespace::Generic => &[],
        }
    }
}


/// Container-independent meaning of a tag.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum CommonKey {
    Title,
    Artist,
    Album,
    Artwork,
}


#[derive( Debug, Clone, PartialEq )]
pub enum TagValue {
    Text( String ),
    Binary( Vec<u8> ),
}


/// A single tag as reported by the container.
#[derive( Debug, Clone, PartialEq )]
pub struct TagItem {
    pub namespace: TagNamespace,
    pub common: Option<CommonKey>,
    pub key: String,
    pub value: TagValue,
}


impl TagItem {
    pub fn text( namespace: TagNamespace, key: &str, value: &str ) -> Self {
        Self {
            namespace,
            common: None,
            key: key.to_string(),
            value: TagValue::Text( value.to_string() ),
        }
    }


    pub fn binary( namespace: TagNamespace, key: &str, data: &[u8] ) -> Self {
        Self {
            namespace,
            common: None,
            key: key.to_string(),
            value: TagValue::Binary( data.to_vec() ),
        }
    }


    pub fn with_common( mut self, common: CommonKey ) -> Self {
        self.common = Some( common );
        self
    }


    fn text_value( &self ) -> Option<&str> {
        match &self.value {
            TagValue::Text( s ) => Some( s.trim() ).filter( |s| !s.is_empty() ),
            TagValue::Binary( _ ) => None,
        }
    }


    /// Artwork search rank, lower wins. None if the item is not an image payload.
    fn artwork_rank( &self ) -> Option<usize> {
        let TagValue::Binary( data ) = &self.value else {
            return None;
        };
        if data.is_empty() {
            return None;
        }

        if self.common == Some( CommonKey::Artwork )
            || COMMON_ARTWORK_KEYS.iter().any( |k| k.eq_ignore_ascii_case( &self.key ) )
        {
            return Some( 0 );
        }

        if self.namespace.artwork_keys().iter().any( |k| k.eq_ignore_ascii_case( &self.key ) ) {
            return Some( 1 + self.namespace as usize );
        }

        // Any other binary payload only counts if it looks like an image
        let looks_like_image = Artwork::new( data.as_slice() ).mime_type() != "application/octet-stream";
        looks_like_image.then_some( 1 + TagNamespace::Generic as usize + 1 )
    }
}


/// Everything generic container introspection could read.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct ContainerTags {
    pub items: Vec<TagItem>,
    pub duration: Option<f64>,
}


/// Reads playback metadata from audio files.
#[derive( Debug, Clone, Copy, Default )]
pub struct MetadataExtractor;


impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }


    /// Extracts metadata from the file at `path`.
    ///
    /// Never fails: unreadable files and missing tags degrade to defaults.
    pub fn extract( &self, path: &Path ) -> ParsedMetadata {
        let extension = path.extension()
            .map( |e| e.to_string_lossy().to_lowercase() )
            .unwrap_or_default();
        let stem = path.file_stem()
            .map( |s| s.to_string_lossy().into_owned() )
            .unwrap_or_default();

        let flac = if extension == "flac" {
            match FlacMetadata::read_path( path ) {
                Ok( meta ) => Some( meta ),
                Err( e ) => {
                    tracing::warn!( "FLAC metadata unreadable for {:?}: {}", path, e );
                    None
                }
            }
        } else {
            None
        };

        let container = read_container( path, &extension );

        merge( flac, container, &stem )
    }
}


/// Runs Symphonia over the file and flattens every tag it reports.
pub fn read_container( path: &Path, extension: &str ) -> Option<ContainerTags> {
    let mut probed = match decoder::probe( path ) {
        Ok( probed ) => probed,
        Err( e ) => {
            tracing::debug!( "No container metadata for {:?}: {}", path, e );
            return None;
        }
    };

    let mut items = Vec::new();

    // Tags found ahead of the stream are ID3 in practice
    if let Some( metadata ) = probed.metadata.get() {
        if let Some( revision ) = metadata.current() {
            collect_revision( revision, |_| TagNamespace::Id3, &mut items );
        }
    }

    if let Some( revision ) = probed.format.metadata().current() {
        collect_revision( revision, |key| TagNamespace::for_container( extension, key ), &mut items );
    }

    let duration = decoder::track_duration( probed.format.as_ref() );

    Some( ContainerTags { items, duration } )
}


fn collect_revision(
    revision: &MetadataRevision,
    namespace_of: impl Fn( &str ) -> TagNamespace,
    items: &mut Vec<TagItem>,
) {
    for tag in revision.tags() {
        let namespace = namespace_of( &tag.key );
        let common = match tag.std_key {
            Some( StandardTagKey::TrackTitle ) => Some( CommonKey::Title ),
            Some( StandardTagKey::Artist ) => Some( CommonKey::Artist ),
            Some( StandardTagKey::Album ) => Some( CommonKey::Album ),
            _ => None,
        };
        let value = match &tag.value {
            Value::Binary( data ) => TagValue::Binary( data.to_vec() ),
            other => TagValue::Text( other.to_string() ),
        };

        items.push( TagItem {
            namespace,
            common,
            key: tag.key.clone(),
            value,
        });
    }

    for visual in revision.visuals() {
        let namespace = namespace_of( "" );
        let key = namespace.artwork_keys().first().copied().unwrap_or_default();
        let common = ( visual.usage == Some( StandardVisualKey::FrontCover ) )
            .then_some( CommonKey::Artwork );

        items.push( TagItem {
            namespace,
            common,
            key: key.to_string(),
            value: TagValue::Binary( visual.data.to_vec() ),
        });
    }
}


/// Resolves the final metadata from both strategies.
///
/// FLAC values win, then container tags fill the gaps: common keys first, then
/// the ID3, iTunes/MP4 and Xiph key names. Title falls back to `stem`.
pub fn merge( flac: Option<FlacMetadata>, container: Option<ContainerTags>, stem: &str ) -> ParsedMetadata {
    let mut meta = ParsedMetadata::default();
    let mut flac_duration = None;

    if let Some( flac ) = flac {
        meta.title = clean( flac.title() );
        meta.artist = clean( flac.artist() );
        meta.album = clean( flac.album() );
        flac_duration = flac.duration();
        meta.artwork = flac.picture
            .filter( |p| !p.data.is_empty() )
            .map( |p| Artwork::new( p.data ) );
    }

    if let Some( container ) = container {
        let items = &container.items;
        fill( &mut meta.title, items, CommonKey::Title );
        fill( &mut meta.artist, items, CommonKey::Artist );
        fill( &mut meta.album, items, CommonKey::Album );

        if meta.artwork.is_none() {
            meta.artwork = select_artwork( items );
        }
        meta.duration = container.duration;
    }

    meta.duration = meta.duration.or( flac_duration );
    if meta.title.is_none() && !stem.is_empty() {
        meta.title = Some( stem.to_string() );
    }

    meta
}


fn clean( value: Option<&str> ) -> Option<String> {
    value.map( str::trim ).filter( |v| !v.is_empty() ).map( str::to_string )
}


fn fill( slot: &mut Option<String>, items: &[TagItem], field: CommonKey ) {
    if slot.is_some() {
        return;
    }
    *slot = find_text( items, field ).map( str::to_string );
}


fn find_text( items: &[TagItem], field: CommonKey ) -> Option<&str> {
    let common = items.iter()
        .filter( |item| item.common == Some( field ) )
        .find_map( TagItem::text_value );
    if common.is_some() {
        return common;
    }

    let passes: [&[TagNamespace]; 3] = [
        &[ TagNamespace::Id3 ],
        &[ TagNamespace::ITunes, TagNamespace::Mp4 ],
        &[ TagNamespace::Xiph ],
    ];

    passes.iter().find_map( |namespaces| {
        items.iter()
            .filter( |item| namespaces.contains( &item.namespace ) )
            .filter( |item| {
                item.namespace.text_keys( field ).iter().any( |k| k.eq_ignore_ascii_case( &item.key ) )
            })
            .find_map( TagItem::text_value )
    })
}


/// First image payload in namespace priority order.
pub fn select_artwork( items: &[TagItem] ) -> Option<Artwork> {
    items.iter()
        .filter_map( |item| item.artwork_rank().map( |rank| ( rank, item ) ) )
        .min_by_key( |( rank, _ )| *rank )
        .and_then( |( _, item )| match &item.value {
            TagValue::Binary( data ) => Some( Artwork::new( data.as_slice() ) ),
            TagValue::Text( _ ) => None,
        })
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::flac::fixtures;

    const PNG: &[u8] = &[ 0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A ];


    #[test]
    fn test_common_keys_win_over_namespaces() {
        let container = ContainerTags {
            items: vec![
                TagItem::text( TagNamespace::Id3, "TIT2", "From ID3" ),
                TagItem::text( TagNamespace::Id3, "", "From common" ).with_common( CommonKey::Title ),
            ],
            duration: Some( 3.0 ),
        };

        let meta = merge( None, Some( container ), "file" );
        assert_eq!( meta.title.as_deref(), Some( "From common" ) );
        assert_eq!( meta.duration, Some( 3.0 ) );
    }


    #[test]
    fn test_namespace_order_for_text() {
        let container = ContainerTags {
            items: vec![
                TagItem::text( TagNamespace::Xiph, "ARTIST", "Xiph artist" ),
                TagItem::text( TagNamespace::ITunes, "©ART", "iTunes artist" ),
                TagItem::text( TagNamespace::Id3, "TAL", "Old ID3 album" ),
                TagItem::text( TagNamespace::Xiph, "album", "Xiph album" ),
                TagItem::text( TagNamespace::Mp4, "©nam", "MP4 title" ),
            ],
            duration: None,
        };

        let meta = merge( None, Some( container ), "file" );
        assert_eq!( meta.artist.as_deref(), Some( "iTunes artist" ) );
        assert_eq!( meta.album.as_deref(), Some( "Old ID3 album" ) );
        assert_eq!( meta.title.as_deref(), Some( "MP4 title" ) );
    }


    #[test]
    fn test_blank_values_are_ignored() {
        let container = ContainerTags {
            items: vec![
                TagItem::text( TagNamespace::Id3, "TIT2", "   " ),
                TagItem::text( TagNamespace::Id3, "TPE1", "  Padded  " ),
            ],
            duration: None,
        };

        let meta = merge( None, Some( container ), "track01" );
        assert_eq!( meta.title.as_deref(), Some( "track01" ) );
        assert_eq!( meta.artist.as_deref(), Some( "Padded" ) );
    }


    #[test]
    fn test_flac_values_are_not_overwritten() {
        let bytes = fixtures::stream( &[ "TITLE=Flac title" ], Some( &b"flac-cover"[ .. ] ) );
        let flac = FlacMetadata::parse( &bytes ).unwrap();
        let container = ContainerTags {
            items: vec![
                TagItem::text( TagNamespace::Xiph, "TITLE", "Container title" ),
                TagItem::text( TagNamespace::Xiph, "ARTIST", "Container artist" ),
                TagItem::binary( TagNamespace::Xiph, "METADATA_BLOCK_PICTURE", PNG ),
            ],
            duration: None,
        };

        let meta = merge( Some( flac ), Some( container ), "file" );
        assert_eq!( meta.title.as_deref(), Some( "Flac title" ) );
        assert_eq!( meta.artist.as_deref(), Some( "Container artist" ) );
        assert_eq!( meta.artwork.unwrap().bytes(), b"flac-cover" );
        // No container duration, so STREAMINFO supplies it
        assert_eq!( meta.duration, Some( 10.0 ) );
    }


    #[test]
    fn test_artwork_priority() {
        let items = vec![
            TagItem::binary( TagNamespace::Mp4, "cover", b"mp4" ),
            TagItem::binary( TagNamespace::Xiph, "PICTURE", b"xiph" ),
            TagItem::binary( TagNamespace::ITunes, "covr", b"itunes" ),
            TagItem::binary( TagNamespace::Id3, "APIC", b"id3" ),
        ];
        assert_eq!( select_artwork( &items ).unwrap().bytes(), b"id3" );
        assert_eq!( select_artwork( &items[ ..3 ] ).unwrap().bytes(), b"itunes" );
        assert_eq!( select_artwork( &items[ ..2 ] ).unwrap().bytes(), b"xiph" );

        let mut with_common = items.clone();
        with_common.push( TagItem::binary( TagNamespace::Generic, "coverArt", b"common" ) );
        assert_eq!( select_artwork( &with_common ).unwrap().bytes(), b"common" );
    }


    #[test]
    fn test_generic_binary_must_look_like_an_image() {
        let items = vec![
            TagItem::binary( TagNamespace::Id3, "PRIV", b"private frame" ),
            TagItem::text( TagNamespace::Id3, "APIC", "not binary" ),
        ];
        assert!( select_artwork( &items ).is_none() );

        let items = vec![ TagItem::binary( TagNamespace::Generic, "blob", PNG ) ];
        assert_eq!( select_artwork( &items ).unwrap().mime_type(), "image/png" );
    }


    #[test]
    fn test_extract_flac_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "01 Song.flac" );
        let cover = vec![ 7u8; 512 ];
        std::fs::write(
            &path,
            fixtures::stream( &[ "TITLE=Song", "ARTIST=Band", "ALBUM=Record" ], Some( cover.as_slice() ) ),
        ).unwrap();

        let meta = MetadataExtractor::new().extract( &path );
        assert_eq!( meta.title.as_deref(), Some( "Song" ) );
        assert_eq!( meta.artist.as_deref(), Some( "Band" ) );
        assert_eq!( meta.album.as_deref(), Some( "Record" ) );
        assert_eq!( meta.artwork.unwrap().bytes(), cover.as_slice() );
        assert_eq!( meta.duration, Some( 10.0 ) );
    }


    #[test]
    fn test_extract_corrupt_flac_falls_back_to_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "broken.flac" );
        let mut bytes = fixtures::stream( &[ "TITLE=Song" ], None );
        bytes.truncate( 20 );
        std::fs::write( &path, bytes ).unwrap();

        let meta = MetadataExtractor::new().extract( &path );
        assert_eq!( meta.title.as_deref(), Some( "broken" ) );
        assert!( meta.artwork.is_none() );
    }


    #[test]
    fn test_extract_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join( "Not Really.mp3" );
        std::fs::write( &garbage, b"plain text pretending to be audio" ).unwrap();

        let extractor = MetadataExtractor::new();
        let meta = extractor.extract( &garbage );
        assert_eq!( meta.title.as_deref(), Some( "Not Really" ) );
        assert_eq!( meta.artist, None );
        assert_eq!( meta.duration, None );

        let missing = extractor.extract( &dir.path().join( "missing.ogg" ) );
        assert_eq!( missing.title.as_deref(), Some( "missing" ) );
    }


    #[test]
    fn test_container_namespace_mapping() {
        assert_eq!( TagNamespace::for_container( "FLAC", "TITLE" ), TagNamespace::Xiph );
        assert_eq!( TagNamespace::for_container( "mp3", "TIT2" ), TagNamespace::Id3 );
        assert_eq!( TagNamespace::for_container( "m4a", "©nam" ), TagNamespace::ITunes );
        assert_eq!( TagNamespace::for_container( "m4a", "cover" ), TagNamespace::Mp4 );
        assert_eq!( TagNamespace::for_container( "wav", "INAM" ), TagNamespace::Generic );
    }
}
