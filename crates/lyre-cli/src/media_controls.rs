//! System media controls integration
//!
//! Mirrors the session to the OS now-playing surface and relays its transport
//! buttons back to the engine:
//! - Linux: MPRIS over D-Bus (zbus)
//! - macOS: MPNowPlayingInfoCenter
//! - Windows: not available in the console build

use std::io;
use std::sync::mpsc::{ self, Sender };
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::watch;

use lyre_core::now_playing::{ self, NowPlayingBridge, RemoteCommand };
use lyre_core::SessionState;

pub use platform::MediaControlsSurface;


#[cfg( not( target_os = "windows" ) )]
mod platform {
    use std::path::PathBuf;
    use std::sync::mpsc::Sender;
    use std::time::Duration;

    use souvlaki::{ MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, MediaPosition, PlatformConfig };

    use lyre_core::now_playing::{ NowPlayingInfo, NowPlayingSurface, RemoteCommand };
    use lyre_core::Artwork;


    /// Maps a media control event to a remote command.
    pub fn remote_command( event: MediaControlEvent ) -> Option<RemoteCommand> {
        match event {
            MediaControlEvent::Play => Some( RemoteCommand::Play ),
            MediaControlEvent::Pause | MediaControlEvent::Stop => Some( RemoteCommand::Pause ),
            MediaControlEvent::Toggle => Some( RemoteCommand::Toggle ),
            MediaControlEvent::Next => Some( RemoteCommand::Next ),
            MediaControlEvent::Previous => Some( RemoteCommand::Previous ),
            MediaControlEvent::SetPosition( MediaPosition( position ) ) => {
                Some( RemoteCommand::SeekTo( position.as_secs_f64() ) )
            }
            _ => None,
        }
    }


    /// Now-playing surface backed by souvlaki.
    pub struct MediaControlsSurface {
        controls: MediaControls,
        last_track: Option<PathBuf>,
    }


    impl MediaControlsSurface {
        /// Registers with the OS and routes its events to `remote`.
        ///
        /// Returns None if media controls are not available.
        pub fn new( remote: Sender<RemoteCommand> ) -> Option<Self> {
            let config = PlatformConfig {
                dbus_name: "lyre",
                display_name: "Lyre",
                hwnd: None,
            };

            let mut controls = match MediaControls::new( config ) {
                Ok( c ) => c,
                Err( e ) => {
                    tracing::warn!( "Failed to create media controls: {:?}", e );
                    return None;
                }
            };

            if let Err( e ) = controls.attach( move |event: MediaControlEvent| {
                if let Some( command ) = remote_command( event ) {
                    let _ = remote.send( command );
                }
            }) {
                tracing::warn!( "Failed to attach media control handler: {:?}", e );
                return None;
            }

            tracing::info!( "Media controls initialized" );
            Some( Self { controls, last_track: None } )
        }


        fn set_metadata( &mut self, info: &NowPlayingInfo ) {
            let cover_url = info.artwork.as_ref().and_then( write_cover );

            tracing::debug!(
                "Media metadata: title={:?}, artist={:?}, album={:?}, cover_url={:?}",
                info.title, info.artist, info.album, cover_url
            );

            let metadata = MediaMetadata {
                title: Some( info.title.as_str() ),
                artist: Some( info.artist.as_str() ),
                album: Some( info.album.as_str() ),
                cover_url: cover_url.as_deref(),
                duration: to_duration( info.duration ),
            };
            if let Err( e ) = self.controls.set_metadata( metadata ) {
                tracing::warn!( "Media metadata error: {:?}", e );
            }
        }
    }


    impl NowPlayingSurface for MediaControlsSurface {
        fn publish( &mut self, info: Option<&NowPlayingInfo> ) {
            let Some( info ) = info else {
                if self.last_track.take().is_some() {
                    if let Err( e ) = self.controls.set_playback( MediaPlayback::Stopped ) {
                        tracing::debug!( "Failed to set playback state: {:?}", e );
                    }
                }
                return;
            };

            // Metadata and artwork only change with the track
            if self.last_track.as_deref() != Some( info.track_path.as_path() ) {
                self.set_metadata( info );
                self.last_track = Some( info.track_path.clone() );
            }

            let progress = info.elapsed.is_finite()
                .then( || MediaPosition( Duration::from_secs_f64( info.elapsed.max( 0.0 ) ) ) );
            let playback = if info.is_playing() {
                MediaPlayback::Playing { progress }
            } else {
                MediaPlayback::Paused { progress }
            };
            if let Err( e ) = self.controls.set_playback( playback ) {
                tracing::debug!( "Failed to set playback state: {:?}", e );
            }
        }
    }


    fn to_duration( seconds: f64 ) -> Option<Duration> {
        ( seconds.is_finite() && seconds > 0.0 ).then( || Duration::from_secs_f64( seconds ) )
    }


    /// Copies embedded artwork to a temp file and returns its file:// URL.
    fn write_cover( artwork: &Artwork ) -> Option<String> {
        let dir = std::env::temp_dir().join( "lyre" );
        if let Err( e ) = std::fs::create_dir_all( &dir ) {
            tracing::debug!( "Failed to create cover directory: {}", e );
            return None;
        }

        let path = dir.join( format!( "cover.{}", artwork.extension() ) );
        match std::fs::write( &path, artwork.bytes() ) {
            Ok(()) => Some( format!( "file://{}", path.display() ) ),
            Err( e ) => {
                tracing::debug!( "Failed to write cover art: {}", e );
                None
            }
        }
    }


    #[cfg( test )]
    mod tests {
        use super::*;


        #[test]
        fn test_remote_command_mapping() {
            assert_eq!( remote_command( MediaControlEvent::Toggle ), Some( RemoteCommand::Toggle ) );
            assert_eq!( remote_command( MediaControlEvent::Stop ), Some( RemoteCommand::Pause ) );
            assert_eq!(
                remote_command( MediaControlEvent::SetPosition( MediaPosition( Duration::from_secs( 90 ) ) ) ),
                Some( RemoteCommand::SeekTo( 90.0 ) )
            );
            assert_eq!( remote_command( MediaControlEvent::Raise ), None );
        }


        #[test]
        fn test_to_duration() {
            assert_eq!( to_duration( 1.5 ), Some( Duration::from_millis( 1500 ) ) );
            assert_eq!( to_duration( 0.0 ), None );
            assert_eq!( to_duration( f64::NAN ), None );
        }


        #[test]
        fn test_write_cover() {
            let artwork = Artwork::new( vec![ 0x89, b'P', b'N', b'G', 0, 0 ] );
            let url = write_cover( &artwork ).unwrap();
            assert!( url.starts_with( "file://" ) );
            assert!( url.ends_with( "cover.png" ) );
        }
    }
}


// Stub module for platforms without media control support.
#[cfg( target_os = "windows" )]
mod platform {
    use std::sync::mpsc::Sender;

    use lyre_core::now_playing::{ NowPlayingInfo, NowPlayingSurface, RemoteCommand };


    /// Stub for platforms without media control support.
    pub struct MediaControlsSurface;


    impl MediaControlsSurface {
        /// Returns None on unsupported platforms.
        pub fn new( _remote: Sender<RemoteCommand> ) -> Option<Self> {
            tracing::info!( "Media controls are not available on this platform" );
            None
        }
    }


    impl NowPlayingSurface for MediaControlsSurface {
        fn publish( &mut self, _info: Option<&NowPlayingInfo> ) {}
    }
}


/// Starts the now-playing bridge and the remote relay.
///
/// The surface is created on the bridge thread, which then follows `states`
/// until the engine stops. The thread returns early if the OS offers no
/// surface.
pub fn start(
    states: watch::Receiver<SessionState>,
    engine: Sender<lyre_core::EngineCommand>,
    runtime: Handle,
) -> io::Result<thread::JoinHandle<()>> {
    let ( remote_tx, remote_rx ) = mpsc::channel::<RemoteCommand>();
    now_playing::spawn_relay( remote_rx, engine )?;

    thread::Builder::new()
        .name( "lyre-now-playing".into() )
        .spawn( move || {
            let Some( surface ) = MediaControlsSurface::new( remote_tx ) else {
                return;
            };
            runtime.block_on( NowPlayingBridge::new( surface ).run( states ) );
        })
}
