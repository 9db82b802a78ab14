//! Engine thread
//!
//! The engine runs on a dedicated thread that owns it outright. Everything
//! else talks to it through an [`EngineHandle`]: commands go in over a
//! channel, state comes back over a watch channel. The thread also ticks the
//! engine on a fixed interval so observers see the position move.
//!
//! The engine keeps a sender of its own for completion events, so the command
//! channel never disconnects. The thread stops on [`EngineCommand::Shutdown`],
//! which the last [`EngineHandle`] sends when it is dropped.

use std::io;
use std::sync::mpsc::{ self, RecvTimeoutError };
use std::sync::Arc;
use std::thread;
use std::time::{ Duration, Instant };

use tokio::sync::watch;

use crate::engine::{ Engine, EngineCommand, SessionState };


/// Default position refresh interval.
pub const DEFAULT_TICK: Duration = Duration::from_millis( 500 );


/// Cloneable handle to a running engine.
#[derive( Clone )]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    state: watch::Receiver<SessionState>,
    _shutdown: Arc<ShutdownOnDrop>,
}


/// Stops the engine once every handle is gone.
struct ShutdownOnDrop( mpsc::Sender<EngineCommand> );


impl Drop for ShutdownOnDrop {
    fn drop( &mut self ) {
        // Fails harmlessly when the engine already stopped
        let _ = self.0.send( EngineCommand::Shutdown );
    }
}


impl EngineHandle {
    /// Queues a command. Returns false if the engine has stopped.
    pub fn send( &self, command: EngineCommand ) -> bool {
        self.commands.send( command ).is_ok()
    }


    /// Latest published state.
    pub fn state( &self ) -> SessionState {
        self.state.borrow().clone()
    }


    pub fn subscribe( &self ) -> watch::Receiver<SessionState> {
        self.state.clone()
    }


    /// Raw command sender, for callers that only need to submit.
    ///
    /// Raw senders do not keep the engine running.
    pub fn commands( &self ) -> mpsc::Sender<EngineCommand> {
        self.commands.clone()
    }
}


/// Starts `engine` on its own thread.
///
/// The thread exits after processing [`EngineCommand::Shutdown`], sent
/// explicitly or by dropping the last handle.
pub fn spawn( mut engine: Engine, tick: Duration ) -> io::Result<( EngineHandle, thread::JoinHandle<()> )> {
    let ( commands, receiver ) = mpsc::channel();
    engine.attach_events( commands.clone() );
    let state = engine.subscribe();

    let thread = thread::Builder::new()
        .name( "lyre-engine".into() )
        .spawn( move || run( engine, receiver, tick ) )?;

    let shutdown = Arc::new( ShutdownOnDrop( commands.clone() ) );
    Ok(( EngineHandle { commands, state, _shutdown: shutdown }, thread ))
}


fn run( mut engine: Engine, receiver: mpsc::Receiver<EngineCommand>, tick: Duration ) {
    tracing::debug!( "Engine thread started" );
    let mut next_tick = Instant::now() + tick;

    loop {
        let timeout = next_tick.saturating_duration_since( Instant::now() );
        match receiver.recv_timeout( timeout ) {
            Ok( command ) => {
                if !engine.apply( command ) {
                    break;
                }
            }
            Err( RecvTimeoutError::Timeout ) => {}
            // Unreachable while the engine holds its event sender
            Err( RecvTimeoutError::Disconnected ) => {
                engine.shutdown();
                break;
            }
        }

        // A steady stream of commands must not starve the tick
        if Instant::now() >= next_tick {
            engine.tick();
            next_tick = Instant::now() + tick;
        }
    }

    tracing::debug!( "Engine thread stopped" );
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::engine::PlaybackStatus;
    use crate::mode::{ PlaybackMode, RepeatMode };
    use crate::output::fixtures::ScriptedOutput;
    use crate::session::{ PersistedSnapshot, SessionPersistence };
    use crate::store::{ DeferredStore, FileStore };
    use crate::track::Track;


    fn wait_for( handle: &EngineHandle, predicate: impl Fn( &SessionState ) -> bool ) -> SessionState {
        let deadline = Instant::now() + Duration::from_secs( 5 );
        loop {
            let state = handle.state();
            if predicate( &state ) || Instant::now() > deadline {
                return state;
            }
            thread::sleep( Duration::from_millis( 5 ) );
        }
    }


    #[test]
    fn test_commands_and_ticks() {
        let output = ScriptedOutput::default();
        let persistence = SessionPersistence::in_memory();
        let engine = Engine::new( Box::new( output.clone() ), persistence.clone() );
        let ( handle, thread ) = spawn( engine, Duration::from_millis( 10 ) ).unwrap();

        let tracks = vec![
            Arc::new( Track::new( PathBuf::from( "/music/a.mp3" ) ) ),
            Arc::new( Track::new( PathBuf::from( "/music/b.mp3" ) ) ),
        ];
        assert!( handle.send( EngineCommand::ReplaceTracks( tracks ) ) );
        assert!( handle.send( EngineCommand::PlayAt( 1 ) ) );

        let state = wait_for( &handle, |s| s.playing );
        assert_eq!( state.status(), PlaybackStatus::Playing );

        // The tick picks up the player's clock
        output.set_clock( 12.0 );
        let state = wait_for( &handle, |s| s.position == 12.0 );
        assert_eq!( state.position, 12.0 );

        assert!( handle.send( EngineCommand::Shutdown ) );
        thread.join().unwrap();
        assert!( !handle.send( EngineCommand::Next ) );

        let saved = persistence.restore().unwrap();
        assert_eq!( saved.track_path, Some( PathBuf::from( "/music/b.mp3" ) ) );
        assert_eq!( saved.position, 12.0 );
    }


    #[test]
    fn test_completion_reaches_engine_thread() {
        let output = ScriptedOutput::default();
        let engine = Engine::new( Box::new( output.clone() ), SessionPersistence::in_memory() );
        let ( handle, thread ) = spawn( engine, DEFAULT_TICK ).unwrap();

        let tracks = vec![ Arc::new( Track::new( PathBuf::from( "/music/a.mp3" ) ) ) ];
        handle.send( EngineCommand::ReplaceTracks( tracks ) );
        handle.send( EngineCommand::PlayAt( 0 ) );
        wait_for( &handle, |s| s.playing );

        ( output.last_callback() )( true );
        let state = wait_for( &handle, |s| !s.playing );
        assert_eq!( state.status(), PlaybackStatus::Paused );

        handle.send( EngineCommand::Shutdown );
        thread.join().unwrap();
    }


    #[test]
    fn test_dropping_last_handle_stops_engine() {
        let output = ScriptedOutput::default();
        let persistence = SessionPersistence::in_memory();
        let engine = Engine::new( Box::new( output.clone() ), persistence.clone() );
        let ( handle, thread ) = spawn( engine, Duration::from_millis( 10 ) ).unwrap();

        let tracks = vec![ Arc::new( Track::new( PathBuf::from( "/music/a.mp3" ) ) ) ];
        handle.send( EngineCommand::ReplaceTracks( tracks ) );
        handle.send( EngineCommand::PlayAt( 0 ) );
        wait_for( &handle, |s| s.playing );
        output.set_clock( 30.0 );

        let raw = handle.commands();
        let other = handle.clone();
        drop( handle );
        assert!( other.send( EngineCommand::Pause ) );
        drop( other );

        thread.join().unwrap();
        assert!( raw.send( EngineCommand::Next ).is_err() );

        let saved = persistence.restore().unwrap();
        assert_eq!( saved.track_path, Some( PathBuf::from( "/music/a.mp3" ) ) );
        assert_eq!( saved.position, 30.0 );
        assert!( !saved.playing );
    }


    #[test]
    fn test_saved_session_survives_library_load() {
        let dir = tempfile::tempdir().unwrap();
        let saved = PersistedSnapshot {
            track_path: Some( PathBuf::from( "/music/b.mp3" ) ),
            position: 45.0,
            playing: false,
            shuffle: true,
            repeat: RepeatMode::All,
        };
        SessionPersistence::new( Arc::new( FileStore::new( dir.path().to_path_buf() ) ) ).save( &saved );

        let store = DeferredStore::new( Arc::new( FileStore::new( dir.path().to_path_buf() ) ) ).unwrap();
        let persistence = SessionPersistence::new( Arc::new( store ) );

        // Read before the engine can write anything
        let snapshot = persistence.restore();
        assert_eq!( snapshot.as_ref(), Some( &saved ) );

        let output = ScriptedOutput::default();
        let engine = Engine::new( Box::new( output.clone() ), persistence.clone() );
        let ( handle, thread ) = spawn( engine, Duration::from_millis( 10 ) ).unwrap();

        let tracks = vec![
            Arc::new( Track::new( PathBuf::from( "/music/a.mp3" ) ) ),
            Arc::new( Track::new( PathBuf::from( "/music/b.mp3" ) ) ),
        ];
        handle.send( EngineCommand::ReplaceTracks( tracks ) );
        thread::sleep( Duration::from_millis( 50 ) );
        handle.send( EngineCommand::Restore( snapshot.unwrap() ) );

        let state = wait_for( &handle, |s| s.track.is_some() && s.position == 45.0 );
        assert_eq!( state.track.as_ref().map( |t| t.path().to_path_buf() ), Some( PathBuf::from( "/music/b.mp3" ) ) );
        assert_eq!( state.position, 45.0 );
        assert_eq!( state.status(), PlaybackStatus::Paused );
        assert_eq!( state.mode, PlaybackMode::new( true, RepeatMode::All ) );

        handle.send( EngineCommand::Shutdown );
        thread.join().unwrap();
        drop( handle );
        drop( persistence );

        let reread = SessionPersistence::new( Arc::new( FileStore::new( dir.path().to_path_buf() ) ) );
        assert_eq!( reread.restore(), Some( saved ) );
    }
}
