//! Now-playing bridge
//!
//! Mirrors the session outward to an OS media surface and relays remote
//! control events back in as engine commands. The bridge keeps no session
//! state of its own; everything it shows comes from the published
//! [`SessionState`].

use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use tokio::sync::watch;

use crate::engine::{ EngineCommand, SessionState };
use crate::track::Artwork;


pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";


/// What an OS media surface shows for the current track.
#[derive( Debug, Clone, PartialEq )]
pub struct NowPlayingInfo {
    pub track_path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Seconds; zero when unknown.
    pub duration: f64,
    pub elapsed: f64,
    /// 1.0 while playing, 0.0 while paused.
    pub rate: f64,
    pub artwork: Option<Artwork>,
}


impl NowPlayingInfo {
    /// None when nothing is loaded.
    pub fn from_state( state: &SessionState ) -> Option<Self> {
        let track = state.track.as_ref()?;

        let duration = if state.duration > 0.0 {
            state.duration
        } else {
            track.duration().unwrap_or( 0.0 )
        };

        Some( Self {
            track_path: track.path().to_path_buf(),
            title: track.title().to_string(),
            artist: track.artist().unwrap_or( UNKNOWN_ARTIST ).to_string(),
            album: track.album().unwrap_or( UNKNOWN_ALBUM ).to_string(),
            duration,
            elapsed: state.position,
            rate: if state.playing { 1.0 } else { 0.0 },
            artwork: track.artwork().cloned(),
        })
    }


    pub fn is_playing( &self ) -> bool {
        self.rate > 0.0
    }
}


/// An OS facility that displays the current track.
pub trait NowPlayingSurface {
    /// Shows `info`, or clears the display when it is None.
    fn publish( &mut self, info: Option<&NowPlayingInfo> );
}


/// Events arriving from OS media controls.
#[derive( Debug, Clone, Copy, PartialEq )]
pub enum RemoteCommand {
    Play,
    Pause,
    Toggle,
    Next,
    Previous,
    /// Absolute position in seconds.
    SeekTo( f64 ),
}


impl From<RemoteCommand> for EngineCommand {
    fn from( command: RemoteCommand ) -> Self {
        match command {
            RemoteCommand::Play => EngineCommand::Resume,
            RemoteCommand::Pause => EngineCommand::Pause,
            RemoteCommand::Toggle => EngineCommand::TogglePlayPause,
            RemoteCommand::Next => EngineCommand::Next,
            RemoteCommand::Previous => EngineCommand::Previous,
            RemoteCommand::SeekTo( seconds ) => EngineCommand::Seek( seconds ),
        }
    }
}


/// Pushes session state to a surface.
pub struct NowPlayingBridge<S> {
    surface: S,
}


impl<S: NowPlayingSurface> NowPlayingBridge<S> {
    pub fn new( surface: S ) -> Self {
        Self { surface }
    }


    pub fn surface( &self ) -> &S {
        &self.surface
    }


    /// Publishes one state.
    pub fn mirror( &mut self, state: &SessionState ) {
        let info = NowPlayingInfo::from_state( state );
        self.surface.publish( info.as_ref() );
    }


    /// Mirrors every state published on `states` until the engine goes away.
    pub async fn run( mut self, mut states: watch::Receiver<SessionState> ) {
        let initial = states.borrow_and_update().clone();
        self.mirror( &initial );

        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            self.mirror( &state );
        }

        self.surface.publish( None );
        tracing::debug!( "Now-playing bridge stopped" );
    }
}


/// Forwards remote events to the engine on a background thread.
///
/// The thread ends when every remote sender is dropped or the engine stops.
pub fn spawn_relay(
    remote: mpsc::Receiver<RemoteCommand>,
    engine: mpsc::Sender<EngineCommand>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name( "lyre-remote".into() )
        .spawn( move || {
            for command in remote {
                tracing::debug!( "Remote command: {:?}", command );
                if engine.send( command.into() ).is_err() {
                    break;
                }
            }
        })
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::{ Arc, Mutex };

    use crate::metadata::ParsedMetadata;
    use crate::track::Track;


    #[derive( Clone, Default )]
    struct RecordingSurface {
        published: Arc<Mutex<Vec<Option<NowPlayingInfo>>>>,
    }


    impl NowPlayingSurface for RecordingSurface {
        fn publish( &mut self, info: Option<&NowPlayingInfo> ) {
            self.published.lock().unwrap().push( info.cloned() );
        }
    }


    fn playing_state( metadata: ParsedMetadata ) -> SessionState {
        SessionState {
            track: Some( Arc::new( Track::with_metadata( PathBuf::from( "/music/song.mp3" ), metadata ) ) ),
            position: 12.5,
            playing: true,
            duration: 200.0,
            ..SessionState::default()
        }
    }


    #[test]
    fn test_info_defaults() {
        let info = NowPlayingInfo::from_state( &playing_state( ParsedMetadata::default() ) ).unwrap();
        assert_eq!( info.title, "song" );
        assert_eq!( info.artist, UNKNOWN_ARTIST );
        assert_eq!( info.album, UNKNOWN_ALBUM );
        assert_eq!( info.duration, 200.0 );
        assert_eq!( info.elapsed, 12.5 );
        assert!( info.is_playing() );
        assert!( info.artwork.is_none() );
    }


    #[test]
    fn test_info_from_tags() {
        let metadata = ParsedMetadata {
            title: Some( "Song".into() ),
            artist: Some( "Band".into() ),
            album: Some( "Record".into() ),
            duration: Some( 181.0 ),
            artwork: Some( Artwork::new( vec![ 0x89, b'P', b'N', b'G' ] ) ),
        };
        let mut state = playing_state( metadata );
        state.playing = false;
        state.duration = 0.0;

        let info = NowPlayingInfo::from_state( &state ).unwrap();
        assert_eq!( info.title, "Song" );
        assert_eq!( info.artist, "Band" );
        assert_eq!( info.album, "Record" );
        assert_eq!( info.duration, 181.0 );
        assert_eq!( info.rate, 0.0 );
        assert_eq!( info.artwork.unwrap().mime_type(), "image/png" );
    }


    #[test]
    fn test_idle_clears_surface() {
        assert!( NowPlayingInfo::from_state( &SessionState::default() ).is_none() );

        let surface = RecordingSurface::default();
        let mut bridge = NowPlayingBridge::new( surface.clone() );
        bridge.mirror( &SessionState::default() );
        assert_eq!( surface.published.lock().unwrap().as_slice(), &[ None ] );
    }


    #[test]
    fn test_remote_mapping() {
        assert!( matches!( EngineCommand::from( RemoteCommand::Play ), EngineCommand::Resume ) );
        assert!( matches!( EngineCommand::from( RemoteCommand::Pause ), EngineCommand::Pause ) );
        assert!( matches!( EngineCommand::from( RemoteCommand::Toggle ), EngineCommand::TogglePlayPause ) );
        assert!( matches!( EngineCommand::from( RemoteCommand::SeekTo( 30.0 ) ), EngineCommand::Seek( s ) if s == 30.0 ) );
    }


    #[test]
    fn test_relay_forwards_until_closed() {
        let ( remote_tx, remote_rx ) = mpsc::channel();
        let ( engine_tx, engine_rx ) = mpsc::channel();
        let relay = spawn_relay( remote_rx, engine_tx ).unwrap();

        remote_tx.send( RemoteCommand::Next ).unwrap();
        remote_tx.send( RemoteCommand::Previous ).unwrap();
        drop( remote_tx );
        relay.join().unwrap();

        let forwarded: Vec<_> = engine_rx.iter().collect();
        assert_eq!( forwarded.len(), 2 );
        assert!( matches!( forwarded[ 0 ], EngineCommand::Next ) );
        assert!( matches!( forwarded[ 1 ], EngineCommand::Previous ) );
    }


    #[tokio::test]
    async fn test_bridge_follows_state_until_engine_drops() {
        let ( tx, rx ) = watch::channel( SessionState::default() );
        let surface = RecordingSurface::default();
        let task = tokio::spawn( NowPlayingBridge::new( surface.clone() ).run( rx ) );

        tokio::task::yield_now().await;
        tx.send_replace( playing_state( ParsedMetadata::default() ) );
        tokio::task::yield_now().await;
        drop( tx );
        task.await.unwrap();

        let published = surface.published.lock().unwrap();
        assert!( published.iter().any( |info| info.as_ref().is_some_and( |i| i.title == "song" ) ) );
        assert_eq!( published.last(), Some( &None ) );
    }
}
