//! Audio output seam
//!
//! The engine never decodes audio itself. It asks an [`AudioOutput`] to open a
//! file and drives the returned [`PlayerHandle`]. When playback reaches the end
//! of the file the output calls the completion callback it was given.

use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::decoder;


/// Called once when a player reaches the end of its file.
///
/// The flag is false when playback stopped early because of a decode failure.
pub type CompletionCallback = Arc<dyn Fn( bool ) + Send + Sync>;


/// Errors that can occur when opening a file for playback.
#[derive( Debug, Error )]
pub enum OpenError {
    #[error( "Cannot play {path:?}: {reason}" )]
    Unreadable {
        path: PathBuf,
        reason: String,
    },

    #[error( "Audio device error: {0}" )]
    Device( String ),
}


/// Opens files for playback.
pub trait AudioOutput: Send {
    /// Opens `path`, returning a paused player positioned at the start.
    fn open( &mut self, path: &Path, on_complete: CompletionCallback ) -> Result<Box<dyn PlayerHandle>, OpenError>;
}


/// A single opened file.
pub trait PlayerHandle: Send {
    fn play( &mut self );

    fn pause( &mut self );

    /// Current position in seconds.
    fn current_time( &mut self ) -> f64;

    fn set_current_time( &mut self, seconds: f64 );

    /// Length in seconds.
    fn duration( &self ) -> f64;
}


/// Output that keeps time without producing sound.
///
/// Files are probed so that unreadable ones fail to open, and the player
/// completes once its wall clock passes the file's duration.
#[derive( Debug, Clone, Copy, Default )]
pub struct ClockOutput;


impl ClockOutput {
    pub fn new() -> Self {
        Self
    }
}


impl AudioOutput for ClockOutput {
    fn open( &mut self, path: &Path, on_complete: CompletionCallback ) -> Result<Box<dyn PlayerHandle>, OpenError> {
        let probed = decoder::probe( path ).map_err( |e| OpenError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let duration = decoder::track_duration( probed.format.as_ref() ).ok_or_else( || OpenError::Unreadable {
            path: path.to_path_buf(),
            reason: "unknown duration".to_string(),
        })?;

        tracing::debug!( "Clock player opened {:?} ({:.1}s)", path, duration );
        Ok( Box::new( ClockPlayer::new( duration, on_complete ) ) )
    }
}


/// Wall-clock player used by [`ClockOutput`].
pub struct ClockPlayer {
    duration: f64,
    /// Position accumulated up to the last pause or seek.
    offset: f64,
    /// Set while playing.
    started: Option<Instant>,
    completed: bool,
    on_complete: CompletionCallback,
}


impl ClockPlayer {
    pub fn new( duration: f64, on_complete: CompletionCallback ) -> Self {
        Self {
            duration: duration.max( 0.0 ),
            offset: 0.0,
            started: None,
            completed: false,
            on_complete,
        }
    }


    pub fn is_playing( &self ) -> bool {
        self.started.is_some()
    }


    fn elapsed( &self ) -> f64 {
        let running = self.started.map( |t| t.elapsed().as_secs_f64() ).unwrap_or( 0.0 );
        ( self.offset + running ).min( self.duration )
    }
}


impl PlayerHandle for ClockPlayer {
    fn play( &mut self ) {
        if self.started.is_none() {
            self.started = Some( Instant::now() );
        }
    }


    fn pause( &mut self ) {
        self.offset = self.elapsed();
        self.started = None;
    }


    fn current_time( &mut self ) -> f64 {
        let now = self.elapsed();

        if self.started.is_some() && now >= self.duration && !self.completed {
            self.completed = true;
            self.offset = self.duration;
            self.started = None;
            ( self.on_complete )( true );
        }

        now
    }


    fn set_current_time( &mut self, seconds: f64 ) {
        let seconds = if seconds.is_finite() { seconds.clamp( 0.0, self.duration ) } else { 0.0 };
        self.offset = seconds;
        if self.started.is_some() {
            self.started = Some( Instant::now() );
        }
        if seconds < self.duration {
            self.completed = false;
        }
    }


    fn duration( &self ) -> f64 {
        self.duration
    }
}


#[cfg( test )]
pub( crate ) mod fixtures {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    /// Length reported by every [`ScriptedPlayer`].
    pub const LENGTH: f64 = 180.0;


    /// Output that records opens and shares one clock with its players.
    #[derive( Clone, Default )]
    pub struct ScriptedOutput {
        pub opened: Arc<Mutex<Vec<PathBuf>>>,
        pub failing: Arc<Mutex<HashSet<PathBuf>>>,
        pub clock: Arc<Mutex<f64>>,
        pub callbacks: Arc<Mutex<Vec<CompletionCallback>>>,
    }


    impl ScriptedOutput {
        pub fn open_count( &self ) -> usize {
            self.opened.lock().unwrap().len()
        }

        pub fn fail( &self, path: &Path ) {
            self.failing.lock().unwrap().insert( path.to_path_buf() );
        }

        pub fn clock( &self ) -> f64 {
            *self.clock.lock().unwrap()
        }

        pub fn set_clock( &self, seconds: f64 ) {
            *self.clock.lock().unwrap() = seconds;
        }

        pub fn last_callback( &self ) -> CompletionCallback {
            Arc::clone( self.callbacks.lock().unwrap().last().unwrap() )
        }
    }


    impl AudioOutput for ScriptedOutput {
        fn open( &mut self, path: &Path, on_complete: CompletionCallback ) -> Result<Box<dyn PlayerHandle>, OpenError> {
            if self.failing.lock().unwrap().contains( path ) {
                return Err( OpenError::Unreadable {
                    path: path.to_path_buf(),
                    reason: "scripted failure".into(),
                });
            }
            self.opened.lock().unwrap().push( path.to_path_buf() );
            self.callbacks.lock().unwrap().push( on_complete );
            self.set_clock( 0.0 );
            Ok( Box::new( ScriptedPlayer { clock: Arc::clone( &self.clock ) } ) )
        }
    }


    pub struct ScriptedPlayer {
        clock: Arc<Mutex<f64>>,
    }


    impl PlayerHandle for ScriptedPlayer {
        fn play( &mut self ) {}

        fn pause( &mut self ) {}

        fn current_time( &mut self ) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn set_current_time( &mut self, seconds: f64 ) {
            *self.clock.lock().unwrap() = seconds;
        }

        fn duration( &self ) -> f64 {
            LENGTH
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::atomic::{ AtomicUsize, Ordering };


    fn counter() -> ( Arc<AtomicUsize>, CompletionCallback ) {
        let count = Arc::new( AtomicUsize::new( 0 ) );
        let inner = Arc::clone( &count );
        ( count, Arc::new( move |ok| {
            assert!( ok );
            inner.fetch_add( 1, Ordering::SeqCst );
        }))
    }


    #[test]
    fn test_clock_player_starts_paused() {
        let ( count, callback ) = counter();
        let mut player = ClockPlayer::new( 120.0, callback );

        assert!( !player.is_playing() );
        assert_eq!( player.current_time(), 0.0 );
        assert_eq!( player.duration(), 120.0 );
        assert_eq!( count.load( Ordering::SeqCst ), 0 );
    }


    #[test]
    fn test_clock_player_seek_while_paused() {
        let ( _, callback ) = counter();
        let mut player = ClockPlayer::new( 120.0, callback );

        player.set_current_time( 45.0 );
        assert_eq!( player.current_time(), 45.0 );

        player.set_current_time( 500.0 );
        assert_eq!( player.current_time(), 120.0 );

        player.set_current_time( -3.0 );
        assert_eq!( player.current_time(), 0.0 );
    }


    #[test]
    fn test_clock_player_completes_once() {
        let ( count, callback ) = counter();
        let mut player = ClockPlayer::new( 30.0, callback );

        player.set_current_time( 30.0 );
        player.play();
        assert_eq!( player.current_time(), 30.0 );
        assert_eq!( player.current_time(), 30.0 );
        assert_eq!( count.load( Ordering::SeqCst ), 1 );
        assert!( !player.is_playing() );

        // Restarting allows another completion
        player.set_current_time( 0.0 );
        player.play();
        player.set_current_time( 30.0 );
        player.current_time();
        assert_eq!( count.load( Ordering::SeqCst ), 2 );
    }


    #[test]
    fn test_clock_player_pause_holds_position() {
        let ( _, callback ) = counter();
        let mut player = ClockPlayer::new( 60.0, callback );

        player.set_current_time( 10.0 );
        player.play();
        player.pause();
        let held = player.current_time();
        assert!( held >= 10.0 && held < 11.0 );
        assert!( !player.is_playing() );
    }


    #[test]
    fn test_clock_output_rejects_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "bad.mp3" );
        std::fs::write( &path, b"nope" ).unwrap();

        let ( _, callback ) = counter();
        let result = ClockOutput::new().open( &path, callback );
        assert!( matches!( result, Err( OpenError::Unreadable { .. } ) ) );
    }
}
