//! FLAC metadata block parser
//!
//! Reads the `fLaC` marker and walks the metadata blocks that follow it,
//! collecting STREAMINFO, the first VORBIS_COMMENT block and the cover
//! PICTURE. Audio frames are never touched.
//!
//! Layout of a block header: one byte holding the last-block flag (high bit)
//! and the block type (low seven bits), then a 24-bit big-endian body length.
//! Vorbis comment lengths are little-endian; every other integer is big-endian.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ self, BufReader, Read };
use std::path::Path;

use thiserror::Error;


const MAGIC: &[u8; 4] = b"fLaC";

const BLOCK_STREAMINFO: u8 = 0;
const BLOCK_VORBIS_COMMENT: u8 = 4;
const BLOCK_PICTURE: u8 = 6;
const BLOCK_INVALID: u8 = 127;

const STREAMINFO_LEN: usize = 34;

/// Picture type for "Cover (front)".
pub const PICTURE_FRONT_COVER: u32 = 3;


/// Errors that can occur while parsing FLAC metadata.
#[derive( Debug, Error )]
pub enum FlacError {
    #[error( "Not a FLAC stream" )]
    BadMagic,

    #[error( "Unexpected end of data" )]
    Truncated,

    #[error( "Invalid metadata block type {0}" )]
    InvalidBlockType( u8 ),

    #[error( "First metadata block is type {0}, expected STREAMINFO" )]
    MissingStreamInfo( u8 ),

    #[error( "Malformed {block} block: {reason}" )]
    Malformed {
        block: &'static str,
        reason: String,
    },

    #[error( "IO error: {0}" )]
    Io( io::Error ),
}


impl From<io::Error> for FlacError {
    fn from( e: io::Error ) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FlacError::Truncated
        } else {
            FlacError::Io( e )
        }
    }
}


/// Stream parameters from the STREAMINFO block.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    /// Zero when the encoder did not know the length.
    pub total_samples: u64,
}


impl StreamInfo {
    fn parse( body: &[u8] ) -> Result<Self, FlacError> {
        if body.len() != STREAMINFO_LEN {
            return Err( FlacError::Malformed {
                block: "STREAMINFO",
                reason: format!( "length {} (expected {})", body.len(), STREAMINFO_LEN ),
            });
        }

        // 20 bits rate, 3 bits channels-1, 5 bits bps-1, 36 bits total samples
        let mut packed = [ 0u8; 8 ];
        packed.copy_from_slice( &body[ 10..18 ] );
        let packed = u64::from_be_bytes( packed );

        Ok( Self {
            sample_rate: ( packed >> 44 ) as u32,
            channels: ( ( packed >> 41 ) & 0x7 ) as u8 + 1,
            bits_per_sample: ( ( packed >> 36 ) & 0x1F ) as u8 + 1,
            total_samples: packed & 0xF_FFFF_FFFF,
        })
    }


    /// Stream length in seconds, if both the rate and sample count are known.
    pub fn duration( &self ) -> Option<f64> {
        if self.sample_rate == 0 || self.total_samples == 0 {
            return None;
        }
        Some( self.total_samples as f64 / self.sample_rate as f64 )
    }
}


/// Vorbis comment block: vendor string plus `KEY=value` fields.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct VorbisComments {
    pub vendor: String,
    /// Keys are uppercased; the first value seen for a key wins.
    fields: HashMap<String, String>,
}


impl VorbisComments {
    fn parse( body: &[u8] ) -> Result<Self, FlacError> {
        let mut cursor = BlockCursor::new( body, "VORBIS_COMMENT" );

        let vendor_len = cursor.u32_le()? as usize;
        let vendor = cursor.string( vendor_len )?;
        let count = cursor.u32_le()?;

        let mut fields = HashMap::new();
        for _ in 0..count {
            let len = cursor.u32_le()? as usize;
            let entry = cursor.string( len )?;

            // Entries without a separator carry no field
            let Some(( key, value )) = entry.split_once( '=' ) else {
                continue;
            };
            fields.entry( key.to_uppercase() ).or_insert_with( || value.to_string() );
        }

        Ok( Self { vendor, fields } )
    }


    /// Looks up a field by name, ignoring case.
    pub fn get( &self, key: &str ) -> Option<&str> {
        self.fields.get( &key.to_uppercase() ).map( String::as_str )
    }


    pub fn len( &self ) -> usize {
        self.fields.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.fields.is_empty()
    }


    pub fn iter( &self ) -> impl Iterator<Item = ( &str, &str )> {
        self.fields.iter().map( |( k, v )| ( k.as_str(), v.as_str() ) )
    }
}


/// An embedded picture.
#[derive( Clone, PartialEq, Eq )]
pub struct Picture {
    pub picture_type: u32,
    pub mime_type: String,
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub colors: u32,
    pub data: Vec<u8>,
}


impl Picture {
    fn parse( body: &[u8] ) -> Result<Self, FlacError> {
        let mut cursor = BlockCursor::new( body, "PICTURE" );

        let picture_type = cursor.u32_be()?;
        let mime_len = cursor.u32_be()? as usize;
        let mime_type = cursor.string( mime_len )?;
        let description_len = cursor.u32_be()? as usize;
        let description = cursor.string( description_len )?;
        let width = cursor.u32_be()?;
        let height = cursor.u32_be()?;
        let depth = cursor.u32_be()?;
        let colors = cursor.u32_be()?;
        let data_len = cursor.u32_be()? as usize;
        let data = cursor.bytes( data_len )?.to_vec();

        Ok( Self {
            picture_type,
            mime_type,
            description,
            width,
            height,
            depth,
            colors,
            data,
        })
    }
}


impl std::fmt::Debug for Picture {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        f.debug_struct( "Picture" )
            .field( "picture_type", &self.picture_type )
            .field( "mime_type", &self.mime_type )
            .field( "width", &self.width )
            .field( "height", &self.height )
            .field( "data_len", &self.data.len() )
            .finish()
    }
}


/// Metadata collected from a FLAC stream header.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct FlacMetadata {
    pub stream_info: StreamInfo,
    pub vorbis_comments: Option<VorbisComments>,
    /// Front cover if present, otherwise the first picture.
    pub picture: Option<Picture>,
}


impl FlacMetadata {
    /// Parses metadata from an in-memory FLAC stream.
    pub fn parse( bytes: &[u8] ) -> Result<Self, FlacError> {
        let mut reader = bytes;
        Self::read_from( &mut reader )
    }


    /// Parses metadata from a file on disk.
    pub fn read_path( path: &Path ) -> Result<Self, FlacError> {
        let file = File::open( path )?;
        Self::read_from( &mut BufReader::new( file ) )
    }


    /// Parses metadata from a reader positioned at the start of the stream.
    ///
    /// Stops after the block flagged as last, leaving the reader at the first
    /// audio frame. Any truncated or inconsistent block fails the whole parse.
    pub fn read_from<R: Read>( reader: &mut R ) -> Result<Self, FlacError> {
        let mut magic = [ 0u8; 4 ];
        reader.read_exact( &mut magic )?;
        if &magic != MAGIC {
            return Err( FlacError::BadMagic );
        }

        let mut stream_info = None;
        let mut vorbis_comments = None;
        let mut pictures: Vec<Picture> = Vec::new();

        loop {
            let mut header = [ 0u8; 4 ];
            reader.read_exact( &mut header )?;

            let is_last = header[ 0 ] & 0x80 != 0;
            let block_type = header[ 0 ] & 0x7F;
            let len = u32::from_be_bytes([ 0, header[ 1 ], header[ 2 ], header[ 3 ] ]) as u64;

            if block_type == BLOCK_INVALID {
                return Err( FlacError::InvalidBlockType( block_type ) );
            }
            if stream_info.is_none() && block_type != BLOCK_STREAMINFO {
                return Err( FlacError::MissingStreamInfo( block_type ) );
            }

            match block_type {
                BLOCK_STREAMINFO if stream_info.is_none() => {
                    let body = read_body( reader, len )?;
                    stream_info = Some( StreamInfo::parse( &body )? );
                }
                BLOCK_VORBIS_COMMENT if vorbis_comments.is_none() => {
                    let body = read_body( reader, len )?;
                    vorbis_comments = Some( VorbisComments::parse( &body )? );
                }
                BLOCK_PICTURE => {
                    let body = read_body( reader, len )?;
                    pictures.push( Picture::parse( &body )? );
                }
                _ => {
                    tracing::trace!( "Skipping FLAC block type {} ({} bytes)", block_type, len );
                    skip_body( reader, len )?;
                }
            }

            if is_last {
                break;
            }
        }

        let stream_info = stream_info.ok_or( FlacError::MissingStreamInfo( BLOCK_INVALID ) )?;

        let front = pictures.iter().position( |p| p.picture_type == PICTURE_FRONT_COVER );
        let picture = match front {
            Some( index ) => Some( pictures.swap_remove( index ) ),
            None if !pictures.is_empty() => Some( pictures.swap_remove( 0 ) ),
            None => None,
        };

        Ok( Self {
            stream_info,
            vorbis_comments,
            picture,
        })
    }


    pub fn title( &self ) -> Option<&str> {
        self.comment( "TITLE" )
    }


    pub fn artist( &self ) -> Option<&str> {
        self.comment( "ARTIST" )
    }


    pub fn album( &self ) -> Option<&str> {
        self.comment( "ALBUM" )
    }


    pub fn duration( &self ) -> Option<f64> {
        self.stream_info.duration()
    }


    fn comment( &self, key: &str ) -> Option<&str> {
        self.vorbis_comments.as_ref().and_then( |c| c.get( key ) )
    }
}


fn read_body<R: Read>( reader: &mut R, len: u64 ) -> Result<Vec<u8>, FlacError> {
    let mut body = Vec::new();
    reader.by_ref().take( len ).read_to_end( &mut body )?;
    if ( body.len() as u64 ) < len {
        return Err( FlacError::Truncated );
    }
    Ok( body )
}


fn skip_body<R: Read>( reader: &mut R, len: u64 ) -> Result<(), FlacError> {
    let skipped = io::copy( &mut reader.by_ref().take( len ), &mut io::sink() )?;
    if skipped < len {
        return Err( FlacError::Truncated );
    }
    Ok(())
}


/// Bounds-checked reads within one block body.
struct BlockCursor<'a> {
    data: &'a [u8],
    pos: usize,
    block: &'static str,
}


impl<'a> BlockCursor<'a> {
    fn new( data: &'a [u8], block: &'static str ) -> Self {
        Self { data, pos: 0, block }
    }


    fn bytes( &mut self, len: usize ) -> Result<&'a [u8], FlacError> {
        let end = self.pos.checked_add( len )
            .filter( |end| *end <= self.data.len() )
            .ok_or_else( || FlacError::Malformed {
                block: self.block,
                reason: format!(
                    "field of {} bytes at offset {} overruns block of {} bytes",
                    len, self.pos, self.data.len()
                ),
            })?;

        let data: &'a [u8] = self.data;
        let slice = &data[ self.pos..end ];
        self.pos = end;
        Ok( slice )
    }


    fn array4( &mut self ) -> Result<[u8; 4], FlacError> {
        let mut out = [ 0u8; 4 ];
        out.copy_from_slice( self.bytes( 4 )? );
        Ok( out )
    }


    fn u32_le( &mut self ) -> Result<u32, FlacError> {
        Ok( u32::from_le_bytes( self.array4()? ) )
    }


    fn u32_be( &mut self ) -> Result<u32, FlacError> {
        Ok( u32::from_be_bytes( self.array4()? ) )
    }


    fn string( &mut self, len: usize ) -> Result<String, FlacError> {
        Ok( String::from_utf8_lossy( self.bytes( len )? ).into_owned() )
    }
}


/// Builders for synthetic FLAC streams used by tests across the crate.
#[cfg( test )]
pub( crate ) mod fixtures {
    use super::*;


    pub fn block( block_type: u8, is_last: bool, body: &[u8] ) -> Vec<u8> {
        let len = body.len() as u32;
        let mut out = vec![ block_type | if is_last { 0x80 } else { 0 } ];
        out.extend_from_slice( &len.to_be_bytes()[ 1.. ] );
        out.extend_from_slice( body );
        out
    }


    pub fn stream_info_body( sample_rate: u32, channels: u8, bits: u8, total_samples: u64 ) -> Vec<u8> {
        let mut body = Vec::with_capacity( STREAMINFO_LEN );
        body.extend_from_slice( &4096u16.to_be_bytes() );
        body.extend_from_slice( &4096u16.to_be_bytes() );
        body.extend_from_slice( &[ 0; 6 ] );
        let packed = ( ( sample_rate as u64 ) << 44 )
            | ( ( ( channels - 1 ) as u64 ) << 41 )
            | ( ( ( bits - 1 ) as u64 ) << 36 )
            | ( total_samples & 0xF_FFFF_FFFF );
        body.extend_from_slice( &packed.to_be_bytes() );
        body.extend_from_slice( &[ 0; 16 ] );
        body
    }


    pub fn vorbis_body( vendor: &str, entries: &[&str] ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice( &( vendor.len() as u32 ).to_le_bytes() );
        body.extend_from_slice( vendor.as_bytes() );
        body.extend_from_slice( &( entries.len() as u32 ).to_le_bytes() );
        for entry in entries {
            body.extend_from_slice( &( entry.len() as u32 ).to_le_bytes() );
            body.extend_from_slice( entry.as_bytes() );
        }
        body
    }


    pub fn picture_body( picture_type: u32, mime: &str, data: &[u8] ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice( &picture_type.to_be_bytes() );
        body.extend_from_slice( &( mime.len() as u32 ).to_be_bytes() );
        body.extend_from_slice( mime.as_bytes() );
        body.extend_from_slice( &0u32.to_be_bytes() ); // description
        for value in [ 300u32, 300, 24, 0 ] {
            body.extend_from_slice( &value.to_be_bytes() );
        }
        body.extend_from_slice( &( data.len() as u32 ).to_be_bytes() );
        body.extend_from_slice( data );
        body
    }


    /// 10 seconds of 44.1 kHz stereo with the given comments and cover.
    pub fn stream( entries: &[&str], cover: Option<&[u8]> ) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        out.extend( block( BLOCK_STREAMINFO, false, &stream_info_body( 44_100, 2, 16, 441_000 ) ) );
        out.extend( block( BLOCK_VORBIS_COMMENT, cover.is_none(), &vorbis_body( "lyre test", entries ) ) );
        if let Some( data ) = cover {
            out.extend( block( BLOCK_PICTURE, true, &picture_body( PICTURE_FRONT_COVER, "image/png", data ) ) );
        }
        out
    }
}


#[cfg( test )]
mod tests {
    use super::fixtures::*;
    use super::*;


    #[test]
    fn test_parse_comments_and_picture() {
        let cover: Vec<u8> = ( 0..=255u8 ).cycle().take( 1000 ).collect();
        let bytes = stream( &[ "TITLE=Song", "artist=Band", "Album=Record" ], Some( cover.as_slice() ) );

        let meta = FlacMetadata::parse( &bytes ).unwrap();
        assert_eq!( meta.title(), Some( "Song" ) );
        assert_eq!( meta.artist(), Some( "Band" ) );
        assert_eq!( meta.album(), Some( "Record" ) );

        let picture = meta.picture.unwrap();
        assert_eq!( picture.data.len(), 1000 );
        assert_eq!( picture.data, cover );
        assert_eq!( picture.mime_type, "image/png" );
        assert_eq!( picture.width, 300 );
    }


    #[test]
    fn test_stream_info_duration() {
        let meta = FlacMetadata::parse( &stream( &[], None ) ).unwrap();
        assert_eq!( meta.stream_info.sample_rate, 44_100 );
        assert_eq!( meta.stream_info.channels, 2 );
        assert_eq!( meta.stream_info.bits_per_sample, 16 );
        assert_eq!( meta.stream_info.total_samples, 441_000 );
        assert_eq!( meta.duration(), Some( 10.0 ) );
    }


    #[test]
    fn test_unknown_length_has_no_duration() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, true, &stream_info_body( 48_000, 1, 24, 0 ) ) );
        let meta = FlacMetadata::parse( &bytes ).unwrap();
        assert_eq!( meta.duration(), None );
        assert!( meta.vorbis_comments.is_none() );
        assert!( meta.picture.is_none() );
    }


    #[test]
    fn test_bad_magic() {
        let mut bytes = stream( &[], None );
        bytes[ 0 ] = b'I';
        assert!( matches!( FlacMetadata::parse( &bytes ), Err( FlacError::BadMagic ) ) );
        assert!( matches!( FlacMetadata::parse( b"fL" ), Err( FlacError::Truncated ) ) );
    }


    #[test]
    fn test_truncated_anywhere_fails() {
        let bytes = stream( &[ "TITLE=Song" ], Some( &[ 1u8, 2, 3, 4, 5 ][ .. ] ) );
        for cut in 0..bytes.len() {
            assert!(
                FlacMetadata::parse( &bytes[ ..cut ] ).is_err(),
                "truncation at {} should fail",
                cut
            );
        }
        assert!( FlacMetadata::parse( &bytes ).is_ok() );
    }


    #[test]
    fn test_picture_length_overruns_block() {
        let mut body = picture_body( PICTURE_FRONT_COVER, "image/jpeg", &[ 9; 16 ] );
        // Claim more picture data than the block holds
        let len_at = body.len() - 16 - 4;
        body[ len_at..len_at + 4 ].copy_from_slice( &1000u32.to_be_bytes() );

        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, false, &stream_info_body( 44_100, 2, 16, 100 ) ) );
        bytes.extend( block( BLOCK_PICTURE, true, &body ) );

        let err = FlacMetadata::parse( &bytes ).unwrap_err();
        assert!( matches!( err, FlacError::Malformed { block: "PICTURE", .. } ) );
    }


    #[test]
    fn test_comment_count_overruns_block() {
        let mut body = vorbis_body( "v", &[ "TITLE=x" ] );
        // Count field sits right after the vendor string
        body[ 5..9 ].copy_from_slice( &5u32.to_le_bytes() );

        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, false, &stream_info_body( 44_100, 2, 16, 100 ) ) );
        bytes.extend( block( BLOCK_VORBIS_COMMENT, true, &body ) );

        assert!( matches!(
            FlacMetadata::parse( &bytes ),
            Err( FlacError::Malformed { block: "VORBIS_COMMENT", .. } )
        ));
    }


    #[test]
    fn test_skips_padding_and_application_blocks() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, false, &stream_info_body( 44_100, 2, 16, 100 ) ) );
        bytes.extend( block( 1, false, &[ 0; 64 ] ) );
        bytes.extend( block( 2, false, b"APPLdata" ) );
        bytes.extend( block( BLOCK_VORBIS_COMMENT, true, &vorbis_body( "v", &[ "TITLE=After padding" ] ) ) );
        // Audio frames after the last block are never read
        bytes.extend_from_slice( &[ 0xFF, 0xF8, 0x00 ] );

        let meta = FlacMetadata::parse( &bytes ).unwrap();
        assert_eq!( meta.title(), Some( "After padding" ) );
    }


    #[test]
    fn test_missing_last_flag_hits_eof() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, false, &stream_info_body( 44_100, 2, 16, 100 ) ) );
        assert!( matches!( FlacMetadata::parse( &bytes ), Err( FlacError::Truncated ) ) );
    }


    #[test]
    fn test_first_block_must_be_stream_info() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_VORBIS_COMMENT, true, &vorbis_body( "v", &[] ) ) );
        assert!( matches!(
            FlacMetadata::parse( &bytes ),
            Err( FlacError::MissingStreamInfo( BLOCK_VORBIS_COMMENT ) )
        ));
    }


    #[test]
    fn test_invalid_block_type() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, false, &stream_info_body( 44_100, 2, 16, 100 ) ) );
        bytes.extend( block( BLOCK_INVALID, true, &[] ) );
        assert!( matches!( FlacMetadata::parse( &bytes ), Err( FlacError::InvalidBlockType( 127 ) ) ) );
    }


    #[test]
    fn test_stream_info_wrong_length() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, true, &[ 0; 20 ] ) );
        assert!( matches!(
            FlacMetadata::parse( &bytes ),
            Err( FlacError::Malformed { block: "STREAMINFO", .. } )
        ));
    }


    #[test]
    fn test_front_cover_preferred() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, false, &stream_info_body( 44_100, 2, 16, 100 ) ) );
        bytes.extend( block( BLOCK_PICTURE, false, &picture_body( 4, "image/png", b"back" ) ) );
        bytes.extend( block( BLOCK_PICTURE, true, &picture_body( PICTURE_FRONT_COVER, "image/png", b"front" ) ) );

        let meta = FlacMetadata::parse( &bytes ).unwrap();
        assert_eq!( meta.picture.unwrap().data, b"front" );
    }


    #[test]
    fn test_first_picture_without_front_cover() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend( block( BLOCK_STREAMINFO, false, &stream_info_body( 44_100, 2, 16, 100 ) ) );
        bytes.extend( block( BLOCK_PICTURE, false, &picture_body( 0, "image/png", b"first" ) ) );
        bytes.extend( block( BLOCK_PICTURE, true, &picture_body( 4, "image/png", b"second" ) ) );

        let meta = FlacMetadata::parse( &bytes ).unwrap();
        assert_eq!( meta.picture.unwrap().data, b"first" );
    }


    #[test]
    fn test_comment_lookup_rules() {
        let bytes = stream( &[ "NOSEPARATOR", "Title=First", "TITLE=Second", "COMMENT=a=b" ], None );
        let comments = FlacMetadata::parse( &bytes ).unwrap().vorbis_comments.unwrap();

        assert_eq!( comments.vendor, "lyre test" );
        assert_eq!( comments.get( "title" ), Some( "First" ) );
        assert_eq!( comments.get( "comment" ), Some( "a=b" ) );
        assert_eq!( comments.len(), 2 );
    }


    #[test]
    fn test_read_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "song.flac" );
        std::fs::write( &path, stream( &[ "ARTIST=Band" ], None ) ).unwrap();

        let meta = FlacMetadata::read_path( &path ).unwrap();
        assert_eq!( meta.artist(), Some( "Band" ) );
        assert!( matches!(
            FlacMetadata::read_path( &dir.path().join( "missing.flac" ) ),
            Err( FlacError::Io( _ ) )
        ));
    }
}
