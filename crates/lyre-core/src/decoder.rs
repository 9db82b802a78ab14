//! Container probing and decoding via Symphonia
//!
//! `probe` opens a file far enough to read its tracks and tags; the metadata
//! extractor and the clock output both rely on it. The full `Decoder` is only
//! built with the `device` feature, where it feeds the sound card.

use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::{ FormatOptions, FormatReader, Track as ContainerTrack };
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::{ Hint, ProbeResult };
use thiserror::Error;


/// Errors that can occur while probing or decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


/// Probes a file and returns the container reader with any leading metadata.
///
/// The file extension is passed to Symphonia as a hint.
pub fn probe( path: &Path ) -> Result<ProbeResult, DecoderError> {
    let file = File::open( path )?;
    let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions::default() );

    let mut hint = Hint::new();
    if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
        hint.with_extension( ext );
    }

    symphonia::default::get_probe()
        .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
        .map_err( |e| {
            tracing::debug!( "Probe failed for {:?}: {}", path, e );
            DecoderError::UnsupportedFormat
        })
}


/// First track carrying a real codec.
pub fn audio_track( format: &dyn FormatReader ) -> Option<&ContainerTrack> {
    format.tracks()
        .iter()
        .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
}


/// Duration in seconds of the first audio track, if the container declares it.
pub fn track_duration( format: &dyn FormatReader ) -> Option<f64> {
    let params = &audio_track( format )?.codec_params;
    let frames = params.n_frames?;

    let seconds = match ( params.time_base, params.sample_rate ) {
        ( Some( tb ), _ ) => {
            let time = tb.calc_time( frames );
            time.seconds as f64 + time.frac
        }
        ( None, Some( rate ) ) if rate > 0 => frames as f64 / rate as f64,
        _ => return None,
    };

    ( seconds.is_finite() && seconds > 0.0 ).then_some( seconds )
}


#[cfg( feature = "device" )]
pub use self::pcm::Decoder;


#[cfg( feature = "device" )]
mod pcm {
    use std::path::Path;

    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions };
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::{ FormatReader, SeekMode, SeekTo };
    use symphonia::core::units::Time;

    use super::{ audio_track, probe, track_duration, DecoderError };


    /// Decodes one audio track into interleaved f32 samples.
    pub struct Decoder {
        format_reader: Box<dyn FormatReader>,
        decoder: Box<dyn SymphoniaDecoder>,
        track_id: u32,
        sample_rate: u32,
        channels: usize,
        sample_buf: Option<SampleBuffer<f32>>,
        duration: Option<f64>,
    }


    impl Decoder {
        /// Opens an audio file for decoding.
        pub fn open( path: &Path ) -> Result<Self, DecoderError> {
            let format_reader = probe( path )?.format;

            let track = audio_track( format_reader.as_ref() ).ok_or( DecoderError::NoAudioTrack )?;
            let track_id = track.id;
            let sample_rate = track.codec_params.sample_rate.unwrap_or( 44100 );
            let channels = track.codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );

            let decoder = symphonia::default::get_codecs()
                .make( &track.codec_params, &DecoderOptions::default() )
                .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

            let duration = track_duration( format_reader.as_ref() );

            tracing::info!(
                "Opened audio: {} Hz, {} channels, duration: {:?}s",
                sample_rate,
                channels,
                duration
            );

            Ok( Self {
                format_reader,
                decoder,
                track_id,
                sample_rate,
                channels,
                sample_buf: None,
                duration,
            })
        }


        pub fn sample_rate( &self ) -> u32 {
            self.sample_rate
        }


        pub fn channels( &self ) -> usize {
            self.channels
        }


        /// Returns the duration in seconds, if known.
        pub fn duration( &self ) -> Option<f64> {
            self.duration
        }


        /// Decodes the next packet and returns interleaved f32 samples.
        ///
        /// Returns None when EOF is reached.
        pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
            loop {
                let packet = match self.format_reader.next_packet() {
                    Ok( packet ) => packet,
                    Err( SymphoniaError::IoError( ref e ) )
                        if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        return Ok( None );
                    }
                    Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
                };

                if packet.track_id() != self.track_id {
                    continue;
                }

                let decoded = match self.decoder.decode( &packet ) {
                    Ok( decoded ) => decoded,
                    // Corrupt packets are skipped
                    Err( SymphoniaError::DecodeError( _ ) ) => continue,
                    Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
                };

                let spec = *decoded.spec();
                let frames = decoded.frames();

                if self.sample_buf.as_ref().map_or( true, |b| b.capacity() < frames ) {
                    self.sample_buf = Some( SampleBuffer::new( frames as u64, spec ) );
                }
                let Some( buf ) = self.sample_buf.as_mut() else {
                    continue;
                };
                buf.copy_interleaved_ref( decoded );

                return Ok( Some( buf.samples().to_vec() ) );
            }
        }


        /// Seeks to a position in seconds.
        pub fn seek( &mut self, position_secs: f64 ) -> Result<(), DecoderError> {
            let seek_to = SeekTo::Time {
                time: Time::from( position_secs ),
                track_id: Some( self.track_id ),
            };

            self.format_reader
                .seek( SeekMode::Accurate, seek_to )
                .map_err( |e| DecoderError::Seek( e.to_string() ) )?;

            self.decoder.reset();
            Ok(())
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_probe_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "noise.mp3" );
        std::fs::write( &path, b"definitely not audio" ).unwrap();

        assert!( matches!( probe( &path ), Err( DecoderError::UnsupportedFormat ) ) );
    }


    #[test]
    fn test_probe_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!( matches!(
            probe( &dir.path().join( "gone.flac" ) ),
            Err( DecoderError::FileOpen( _ ) )
        ));
    }
}
