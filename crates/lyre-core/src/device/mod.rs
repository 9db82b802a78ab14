//! Audible output through the system audio device
//!
//! Each opened file gets a decode thread that feeds a cpal stream, resampling
//! with rubato when the device cannot run at the file's rate. Seeking rebuilds
//! the pipeline at the new position.

mod sink;

use std::path::{ Path, PathBuf };
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rubato::{ FastFixedOut, PolynomialDegree, Resampler };
use thiserror::Error;

use crate::decoder::Decoder;
use crate::output::{ AudioOutput, CompletionCallback, OpenError, PlayerHandle };

pub use sink::{ SampleQueue, Sink };


/// Errors raised by the audio device.
#[derive( Debug, Error )]
pub enum DeviceError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),

    #[error( "Failed to create resampler: {0}" )]
    Resampler( String ),
}


impl From<DeviceError> for OpenError {
    fn from( e: DeviceError ) -> Self {
        OpenError::Device( e.to_string() )
    }
}


/// Plays files on the default output device.
#[derive( Debug, Clone, Copy, Default )]
pub struct DeviceOutput;


impl DeviceOutput {
    pub fn new() -> Self {
        Self
    }
}


impl AudioOutput for DeviceOutput {
    fn open( &mut self, path: &Path, on_complete: CompletionCallback ) -> Result<Box<dyn PlayerHandle>, OpenError> {
        let pipeline = Pipeline::start( path, 0.0, true, Arc::clone( &on_complete ) )?;
        Ok( Box::new( DevicePlayer {
            path: path.to_path_buf(),
            duration: pipeline.duration,
            playing: false,
            on_complete,
            pipeline: Some( pipeline ),
        }))
    }
}


/// Player for one file on the audio device.
pub struct DevicePlayer {
    path: PathBuf,
    duration: f64,
    playing: bool,
    on_complete: CompletionCallback,
    pipeline: Option<Pipeline>,
}


impl PlayerHandle for DevicePlayer {
    fn play( &mut self ) {
        self.playing = true;
        if let Some( pipeline ) = &self.pipeline {
            pipeline.queue.set_paused( false );
        }
    }


    fn pause( &mut self ) {
        self.playing = false;
        if let Some( pipeline ) = &self.pipeline {
            pipeline.queue.set_paused( true );
        }
    }


    fn current_time( &mut self ) -> f64 {
        self.pipeline.as_ref()
            .map( |p| p.position().min( self.duration ) )
            .unwrap_or( 0.0 )
    }


    fn set_current_time( &mut self, seconds: f64 ) {
        // Old pipeline must release the device before a new one opens
        self.pipeline = None;

        match Pipeline::start( &self.path, seconds, !self.playing, Arc::clone( &self.on_complete ) ) {
            Ok( pipeline ) => self.pipeline = Some( pipeline ),
            Err( e ) => tracing::error!( "Failed to seek {:?} to {:.1}s: {}", self.path, seconds, e ),
        }
    }


    fn duration( &self ) -> f64 {
        self.duration
    }
}


/// Decode thread plus the stream it feeds.
struct Pipeline {
    queue: Arc<SampleQueue>,
    _sink: Sink,
    stop_flag: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    frames_played: Arc<AtomicU64>,
    source_rate: u32,
    duration: f64,
}


impl Pipeline {
    fn start( path: &Path, position: f64, paused: bool, on_complete: CompletionCallback ) -> Result<Self, OpenError> {
        let mut decoder = Decoder::open( path ).map_err( |e| OpenError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let source_rate = decoder.sample_rate();
        let channels = decoder.channels();
        let duration = decoder.duration().unwrap_or( 0.0 );

        if position > 0.0 {
            if let Err( e ) = decoder.seek( position ) {
                tracing::warn!( "Seek to {:.1}s failed: {}", position, e );
            }
        }

        let ( sink, queue ) = Sink::open( source_rate, channels )?;
        queue.set_paused( paused );
        sink.play()?;

        let resampler = if sink.sample_rate() != source_rate {
            tracing::info!( "Resampling: {} Hz -> {} Hz", source_rate, sink.sample_rate() );
            let resampler = FastFixedOut::<f32>::new(
                sink.sample_rate() as f64 / source_rate as f64,
                2.0,
                PolynomialDegree::Cubic,
                1024,
                channels,
            ).map_err( |e| DeviceError::Resampler( e.to_string() ) )?;
            Some( resampler )
        } else {
            None
        };

        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let frames_played = Arc::new( AtomicU64::new( ( position.max( 0.0 ) * source_rate as f64 ) as u64 ) );

        let worker = DecodeWorker {
            decoder,
            queue: Arc::clone( &queue ),
            stop_flag: Arc::clone( &stop_flag ),
            frames_played: Arc::clone( &frames_played ),
            resampler,
            on_complete,
        };
        let thread = thread::Builder::new()
            .name( "lyre-decode".into() )
            .spawn( move || worker.run() )
            .map_err( |e| OpenError::Device( e.to_string() ) )?;

        Ok( Self {
            queue,
            _sink: sink,
            stop_flag,
            thread: Some( thread ),
            frames_played,
            source_rate,
            duration,
        })
    }


    fn position( &self ) -> f64 {
        self.frames_played.load( Ordering::Relaxed ) as f64 / self.source_rate.max( 1 ) as f64
    }
}


impl Drop for Pipeline {
    fn drop( &mut self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        self.queue.clear();
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
    }
}


struct DecodeWorker {
    decoder: Decoder,
    queue: Arc<SampleQueue>,
    stop_flag: Arc<AtomicBool>,
    frames_played: Arc<AtomicU64>,
    resampler: Option<FastFixedOut<f32>>,
    on_complete: CompletionCallback,
}


impl DecodeWorker {
    fn stopped( &self ) -> bool {
        self.stop_flag.load( Ordering::Relaxed )
    }


    fn run( mut self ) {
        let channels = self.decoder.channels().max( 1 );
        let mut pending: Vec<Vec<f32>> = vec![ Vec::new(); channels ];
        // Stay about 50ms ahead of the device
        let target_buffered = self.decoder.sample_rate() as usize * channels / 20;

        while !self.stopped() {
            if self.queue.is_paused() || self.queue.len() > target_buffered {
                thread::sleep( Duration::from_millis( 5 ) );
                continue;
            }

            match self.decoder.decode_next() {
                Ok( Some( samples ) ) => {
                    self.frames_played.fetch_add( ( samples.len() / channels ) as u64, Ordering::Relaxed );
                    let output = self.resample( samples, &mut pending, false );
                    self.push_all( &output );
                }
                Ok( None ) => {
                    let tail = self.resample( Vec::new(), &mut pending, true );
                    self.push_all( &tail );

                    while !self.queue.is_empty() && !self.stopped() {
                        thread::sleep( Duration::from_millis( 10 ) );
                    }
                    if !self.stopped() {
                        tracing::debug!( "Decode loop: reached end of file" );
                        ( self.on_complete )( true );
                    }
                    return;
                }
                Err( e ) => {
                    tracing::error!( "Decode error: {}", e );
                    if !self.stopped() {
                        ( self.on_complete )( false );
                    }
                    return;
                }
            }
        }

        tracing::debug!( "Decode loop: stopped" );
    }


    /// Runs interleaved samples through the resampler, if any.
    fn resample( &mut self, samples: Vec<f32>, pending: &mut [Vec<f32>], flush: bool ) -> Vec<f32> {
        let Some( resampler ) = self.resampler.as_mut() else {
            return samples;
        };

        let channels = pending.len();
        for frame in samples.chunks_exact( channels ) {
            for ( ch, sample ) in frame.iter().enumerate() {
                pending[ ch ].push( *sample );
            }
        }

        let mut out = Vec::new();
        while pending[ 0 ].len() >= resampler.input_frames_next() {
            let needed = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = pending.iter_mut().map( |ch| ch.drain( ..needed ).collect() ).collect();
            match resampler.process( &chunk, None ) {
                Ok( planar ) => out.extend( interleave( &planar ) ),
                Err( e ) => {
                    tracing::error!( "Resample error: {}", e );
                    break;
                }
            }
        }

        if flush && !pending[ 0 ].is_empty() {
            match resampler.process_partial( Some( &*pending ), None ) {
                Ok( planar ) => out.extend( interleave( &planar ) ),
                Err( e ) => tracing::error!( "Final resample error: {}", e ),
            }
            pending.iter_mut().for_each( Vec::clear );
        }

        out
    }


    fn push_all( &self, samples: &[f32] ) {
        let mut offset = 0;
        while offset < samples.len() && !self.stopped() {
            let pushed = self.queue.push( &samples[ offset.. ] );
            offset += pushed;
            if pushed == 0 {
                thread::sleep( Duration::from_millis( 5 ) );
            }
        }
    }
}


/// `[[L0, L1], [R0, R1]]` to `[L0, R0, L1, R1]`.
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    let frames = channels.first().map( Vec::len ).unwrap_or( 0 );
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        out.extend( channels.iter().map( |ch| ch[ f ] ) );
    }
    out
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, 3.0, 2.0, 4.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }
}
