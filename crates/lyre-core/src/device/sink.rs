//! cpal output stream and the sample queue feeding it

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };

use super::DeviceError;


/// Queue between the decode thread and the audio callback.
///
/// Holds interleaved samples in the source channel layout and converts to
/// the device layout on the way out.
pub struct SampleQueue {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    source_channels: usize,
    output_channels: usize,
}


impl SampleQueue {
    pub fn new( capacity: usize, source_channels: usize, output_channels: usize ) -> Self {
        Self {
            samples: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            source_channels: source_channels.max( 1 ),
            output_channels: output_channels.max( 1 ),
        }
    }


    /// Pushes as many samples as fit. Returns the number accepted.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut queue = self.samples.lock().unwrap();
        let accepted = samples.len().min( self.capacity.saturating_sub( queue.len() ) );
        queue.extend( &samples[ ..accepted ] );
        accepted
    }


    /// Fills `output` with device-layout frames, padding with silence.
    pub fn pop( &self, output: &mut [f32] ) {
        output.fill( 0.0 );
        if self.paused.load( Ordering::Relaxed ) {
            return;
        }

        let src = self.source_channels;
        let out = self.output_channels;
        let mut queue = self.samples.lock().unwrap();
        let frames = ( output.len() / out ).min( queue.len() / src );

        let mut frame = vec![ 0.0f32; src ];
        for target in output.chunks_exact_mut( out ).take( frames ) {
            for slot in frame.iter_mut() {
                *slot = queue.pop_front().unwrap_or( 0.0 );
            }

            if src == 2 && out == 1 {
                target[ 0 ] = ( frame[ 0 ] + frame[ 1 ] ) * 0.5;
            } else {
                // Extra device channels repeat the last source channel
                for ( ch, sample ) in target.iter_mut().enumerate() {
                    *sample = frame[ ch.min( src - 1 ) ];
                }
            }
        }
    }


    pub fn len( &self ) -> usize {
        self.samples.lock().unwrap().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.samples.lock().unwrap().is_empty()
    }


    pub fn clear( &self ) {
        self.samples.lock().unwrap().clear();
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }
}


/// Running cpal stream.
pub struct Sink {
    stream: cpal::Stream,
    sample_rate: u32,
}


// SAFETY: the stream is only started, paused and dropped by the player that
// owns it, one call at a time; cpal drives its callback on its own thread.
unsafe impl Send for Sink {}


impl Sink {
    /// Opens the default device as close as possible to the source format.
    ///
    /// Returns the sink and the queue the decode thread should fill.
    pub fn open( source_rate: u32, source_channels: usize ) -> Result<( Self, Arc<SampleQueue> ), DeviceError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or( DeviceError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| DeviceError::StreamConfig( e.to_string() ) )?
            .collect();

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_rate && c.max_sample_rate().0 >= source_rate
        };

        // Prefer an exact match, then any layout at the source rate
        let config = match supported.iter()
            .find( |c| c.channels() as usize == source_channels && supports_rate( *c ) )
            .or_else( || supported.iter().find( |c| supports_rate( *c ) ) )
        {
            Some( range ) => range.clone().with_sample_rate( cpal::SampleRate( source_rate ) ).config(),
            None => {
                let default = device
                    .default_output_config()
                    .map_err( |e| DeviceError::StreamConfig( e.to_string() ) )?;
                tracing::info!(
                    "Device does not support {} Hz, resampling to {} Hz",
                    source_rate,
                    default.sample_rate().0
                );
                default.config()
            }
        };

        tracing::info!( "Audio output config: {} Hz, {} channels", config.sample_rate.0, config.channels );

        // About half a second of source audio
        let capacity = source_rate as usize * source_channels / 2;
        let queue = Arc::new( SampleQueue::new( capacity, source_channels, config.channels as usize ) );
        let callback_queue = Arc::clone( &queue );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback_queue.pop( data ),
                |err| tracing::error!( "Audio output error: {}", err ),
                None,
            )
            .map_err( |e| DeviceError::BuildStream( e.to_string() ) )?;

        Ok(( Self { stream, sample_rate: config.sample_rate.0 }, queue ))
    }


    pub fn play( &self ) -> Result<(), DeviceError> {
        self.stream.play().map_err( |e| DeviceError::PlayStream( e.to_string() ) )
    }


    /// Device sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_queue_capacity() {
        let queue = SampleQueue::new( 4, 2, 2 );
        assert_eq!( queue.push( &[ 1.0, 2.0, 3.0, 4.0, 5.0, 6.0 ] ), 4 );
        assert_eq!( queue.push( &[ 7.0 ] ), 0 );
        assert_eq!( queue.len(), 4 );
    }


    #[test]
    fn test_mono_to_stereo() {
        let queue = SampleQueue::new( 16, 1, 2 );
        queue.push( &[ 0.1, 0.2 ] );
        let mut out = [ 9.0; 6 ];
        queue.pop( &mut out );
        assert_eq!( out, [ 0.1, 0.1, 0.2, 0.2, 0.0, 0.0 ] );
        assert!( queue.is_empty() );
    }


    #[test]
    fn test_stereo_to_mono() {
        let queue = SampleQueue::new( 16, 2, 1 );
        queue.push( &[ 0.25, 0.75, 1.0, 0.0 ] );
        let mut out = [ 9.0; 2 ];
        queue.pop( &mut out );
        assert_eq!( out, [ 0.5, 0.5 ] );
    }


    #[test]
    fn test_paused_outputs_silence() {
        let queue = SampleQueue::new( 16, 2, 2 );
        queue.push( &[ 0.5, 0.5 ] );
        queue.set_paused( true );
        let mut out = [ 9.0; 2 ];
        queue.pop( &mut out );
        assert_eq!( out, [ 0.0, 0.0 ] );
        assert_eq!( queue.len(), 2 );
    }
}
