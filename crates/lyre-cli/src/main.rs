//! Lyre CLI - Console music player

mod cli;
mod media_controls;
mod settings;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::sync::{ mpsc, watch };

use cli::Args;
use settings::Settings;

use lyre_core::{
    command::{ self, format_time },
    runtime::{ self, EngineHandle },
    AudioOutput, Command, DeferredStore, Engine, EngineCommand, FileStore, LibraryLoader,
    LibraryScanner, MetadataExtractor, PlaybackStatus, SessionPersistence, SessionState, Track,
};


/// Console front end state.
struct App {
    handle: EngineHandle,
    loader: LibraryLoader,
    tracks: Vec<Arc<Track>>,
}


impl App {
    /// Scans the library and hands the collection to the engine.
    async fn load_library( &mut self ) {
        println!( "Scanning {:?}...", self.loader.scanner().roots() );
        self.tracks = self.loader.load().await;
        println!( "{} tracks", self.tracks.len() );
        self.handle.send( EngineCommand::ReplaceTracks( self.tracks.clone() ) );
    }


    /// Handles one console line. Returns false to quit.
    async fn handle_line( &mut self, line: &str ) -> bool {
        if line.trim().is_empty() {
            return true;
        }

        let cmd = match Command::parse( line ) {
            Ok( cmd ) => cmd,
            Err( e ) => {
                println!( "{}", e );
                return true;
            }
        };

        match cmd {
            Command::Quit => return false,
            Command::Help => println!( "{}", command::help_text() ),
            Command::List => self.print_tracks(),
            Command::Status => println!( "{}", status_line( &self.handle.state() ) ),
            Command::Rescan => self.load_library().await,
            Command::Play { index: Some( n ) } if n > self.tracks.len() => {
                println!( "No track {} (library has {})", n, self.tracks.len() );
            }
            other => {
                if let Some( engine_cmd ) = other.to_engine( &self.handle.state() ) {
                    tracing::debug!( "{}: {:?}", other.description(), engine_cmd );
                    self.handle.send( engine_cmd );
                }
            }
        }
        true
    }


    fn print_tracks( &self ) {
        let current = self.handle.state().track;

        for ( i, track ) in self.tracks.iter().enumerate() {
            let marker = if current.as_ref() == Some( track ) { ">" } else { " " };
            let duration = track.duration().map( format_time ).unwrap_or_else( || "--:--".into() );
            println!( "{} {:>4}. {} [{}]", marker, i + 1, track.display_name(), duration );
        }
    }
}


/// One-line summary of the session.
fn status_line( state: &SessionState ) -> String {
    let Some( track ) = &state.track else {
        return format!( "Stopped ({})", state.mode );
    };

    let status = match state.status() {
        PlaybackStatus::Playing => "Playing",
        _ => "Paused",
    };
    format!(
        "{}: {} {} / {} ({})",
        status,
        track.display_name(),
        format_time( state.position ),
        format_time( state.duration ),
        state.mode
    )
}


/// Prints a line whenever the track or play state changes.
async fn announce( mut states: watch::Receiver<SessionState> ) {
    let mut last: Option<( Option<PathBuf>, bool )> = None;

    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        let key = ( state.track.as_ref().map( |t| t.path().to_path_buf() ), state.playing );
        if last.as_ref() != Some( &key ) {
            if state.track.is_some() {
                println!( "{}", status_line( &state ) );
            }
            last = Some( key );
        }
    }
}


/// Reads stdin on its own thread so a pending read never blocks shutdown.
fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<String>> {
    let ( tx, rx ) = mpsc::unbounded_channel();

    thread::Builder::new()
        .name( "lyre-stdin".into() )
        .spawn( move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok( line ) => {
                        if tx.send( line ).is_err() {
                            break;
                        }
                    }
                    Err( e ) => {
                        tracing::warn!( "Failed to read input: {}", e );
                        break;
                    }
                }
            }
        })
        .context( "failed to start input thread" )?;

    Ok( rx )
}


#[cfg( feature = "device" )]
fn audio_output() -> Box<dyn AudioOutput> {
    Box::new( lyre_core::device::DeviceOutput::new() )
}


#[cfg( not( feature = "device" ) )]
fn audio_output() -> Box<dyn AudioOutput> {
    tracing::info!( "Built without the audio device; playback is silent" );
    Box::new( lyre_core::ClockOutput::new() )
}


fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else( |_| "lyre=info,lyre_core=info".into() ),
        )
        .with_writer( std::io::stderr )
        .init();
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let settings = Settings::load();
    let root = args.path.clone().unwrap_or_else( || settings.library_root() );

    // Session storage
    let data_dir = FileStore::default_dir().unwrap_or_else( || PathBuf::from( ".lyre" ) );
    let store = DeferredStore::new( Arc::new( FileStore::new( data_dir ) ) )
        .context( "failed to start session store" )?;
    let persistence = SessionPersistence::new( Arc::new( store ) );

    // Read before the engine starts; loading the library commits a fresh state
    let snapshot = if args.no_restore { None } else { persistence.restore() };

    // Engine
    let engine = Engine::new( audio_output(), persistence.clone() );
    let ( handle, engine_thread ) = runtime::spawn( engine, settings.tick_interval() )
        .context( "failed to start engine" )?;

    let media_thread = if settings.media_controls_enabled && !args.no_media_controls {
        media_controls::start( handle.subscribe(), handle.commands(), tokio::runtime::Handle::current() )
            .map_err( |e| tracing::warn!( "Media controls unavailable: {}", e ) )
            .ok()
    } else {
        None
    };
    tokio::spawn( announce( handle.subscribe() ) );

    // Library
    let loader = LibraryLoader::new( LibraryScanner::with_root( root ), MetadataExtractor::new() )
        .with_max_concurrent( settings.max_concurrent_extractions );
    let mut app = App { handle: handle.clone(), loader, tracks: Vec::new() };
    app.load_library().await;

    let restored = snapshot.as_ref()
        .and_then( |s| s.track_path.as_ref() )
        .is_some_and( |path| app.tracks.iter().any( |t| t.path() == path.as_path() ) );
    if let Some( snapshot ) = snapshot {
        handle.send( EngineCommand::Restore( snapshot ) );
    }
    if settings.autoplay_on_load && !restored {
        handle.send( EngineCommand::Resume );
    }

    println!( "Type 'help' for commands." );
    let mut lines = spawn_stdin_reader()?;

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some( line ) => {
                    if !app.handle_line( &line ).await {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // The engine writes a final snapshot on shutdown
    handle.send( EngineCommand::Shutdown );
    tokio::task::spawn_blocking( move || {
        let _ = engine_thread.join();
        if let Some( media_thread ) = media_thread {
            let _ = media_thread.join();
        }
    })
    .await?;

    tracing::info!( "Goodbye" );
    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;
    use lyre_core::{ PlaybackMode, RepeatMode };


    #[test]
    fn test_status_line_idle() {
        let state = SessionState {
            mode: PlaybackMode::new( true, RepeatMode::All ),
            ..SessionState::default()
        };
        assert_eq!( status_line( &state ), "Stopped (shuffle on, repeat all)" );
    }


    #[test]
    fn test_status_line_playing() {
        let state = SessionState {
            track: Some( Arc::new( Track::new( PathBuf::from( "/music/intro.ogg" ) ) ) ),
            position: 75.0,
            playing: true,
            duration: 200.0,
            ..SessionState::default()
        };
        assert_eq!( status_line( &state ), "Playing: intro 1:15 / 3:20 (shuffle off, repeat off)" );
    }
}
