//! Playback session engine
//!
//! The engine owns the authoritative session state and runs every command
//! against it. It is driven from a single owner (see [`crate::runtime`]);
//! nothing inside is locked. After each command the state is snapshotted to
//! persistence and published to subscribers.
//!
//! States: `Idle` (no track) and `Loaded`, which is either playing or paused.

use std::sync::mpsc;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{ Rng, SeedableRng };
use tokio::sync::watch;

use crate::mode::{ PlaybackMode, RepeatMode };
use crate::output::{ AudioOutput, CompletionCallback, PlayerHandle };
use crate::session::{ PersistedSnapshot, SessionPersistence };
use crate::track::Track;


/// Coarse playback status derived from [`SessionState`].
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
}


/// Observable session state.
///
/// With no current track, `playing` is false and `position` is zero.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct SessionState {
    pub track: Option<Arc<Track>>,
    /// Seconds into the current track.
    pub position: f64,
    pub playing: bool,
    pub mode: PlaybackMode,
    /// Length of the current track as reported by the player.
    pub duration: f64,
}


impl SessionState {
    pub fn status( &self ) -> PlaybackStatus {
        match ( &self.track, self.playing ) {
            ( None, _ ) => PlaybackStatus::Idle,
            ( Some( _ ), true ) => PlaybackStatus::Playing,
            ( Some( _ ), false ) => PlaybackStatus::Paused,
        }
    }


    pub fn is_idle( &self ) -> bool {
        self.track.is_none()
    }
}


/// Commands accepted by the engine.
#[derive( Debug, Clone )]
pub enum EngineCommand {
    Play( Arc<Track> ),
    /// Play the track at this index of the collection.
    PlayAt( usize ),
    TogglePlayPause,
    /// Resume if paused, or start the first track when idle.
    Resume,
    /// Pause if playing.
    Pause,
    Next,
    Previous,
    Seek( f64 ),
    SetShuffle( bool ),
    SetRepeat( RepeatMode ),
    CycleRepeat,
    CyclePlayMode,
    ReplaceTracks( Vec<Arc<Track>> ),
    Restore( PersistedSnapshot ),
    /// Refresh the position from the player.
    Tick,
    /// Sent by the output when a player reaches the end of its file.
    TrackCompleted { generation: u64, successfully: bool },
    Shutdown,
}


/// Playback session engine.
pub struct Engine {
    tracks: Vec<Arc<Track>>,
    state: SessionState,
    output: Box<dyn AudioOutput>,
    player: Option<Box<dyn PlayerHandle>>,
    /// Bumped every time a new player is opened.
    generation: u64,
    events: Option<mpsc::Sender<EngineCommand>>,
    persistence: SessionPersistence,
    notifier: watch::Sender<SessionState>,
    rng: StdRng,
}


impl Engine {
    pub fn new( output: Box<dyn AudioOutput>, persistence: SessionPersistence ) -> Self {
        let ( notifier, _ ) = watch::channel( SessionState::default() );

        Self {
            tracks: Vec::new(),
            state: SessionState::default(),
            output,
            player: None,
            generation: 0,
            events: None,
            persistence,
            notifier,
            rng: StdRng::from_entropy(),
        }
    }


    /// Uses a fixed seed for shuffle picks.
    pub fn with_seed( mut self, seed: u64 ) -> Self {
        self.rng = StdRng::seed_from_u64( seed );
        self
    }


    /// Routes completion events from future players into `events`.
    pub fn attach_events( &mut self, events: mpsc::Sender<EngineCommand> ) {
        self.events = Some( events );
    }


    /// Receiver that sees every published state.
    pub fn subscribe( &self ) -> watch::Receiver<SessionState> {
        self.notifier.subscribe()
    }


    pub fn state( &self ) -> &SessionState {
        &self.state
    }


    pub fn tracks( &self ) -> &[Arc<Track>] {
        &self.tracks
    }


    /// Generation of the current player; completion events must match it.
    pub fn generation( &self ) -> u64 {
        self.generation
    }


    /// Index of the current track in the collection.
    pub fn current_index( &self ) -> Option<usize> {
        let current = self.state.track.as_ref()?;
        self.tracks.iter().position( |t| t == current )
    }


    /// Runs a command. Returns false once the engine has shut down.
    pub fn apply( &mut self, command: EngineCommand ) -> bool {
        match command {
            EngineCommand::Play( track ) => self.play( track ),
            EngineCommand::PlayAt( index ) => self.play_at( index ),
            EngineCommand::TogglePlayPause => self.toggle_play_pause(),
            EngineCommand::Resume => self.resume(),
            EngineCommand::Pause => self.pause(),
            EngineCommand::Next => self.next(),
            EngineCommand::Previous => self.previous(),
            EngineCommand::Seek( seconds ) => self.seek( seconds ),
            EngineCommand::SetShuffle( enabled ) => self.set_shuffle( enabled ),
            EngineCommand::SetRepeat( mode ) => self.set_repeat( mode ),
            EngineCommand::CycleRepeat => self.cycle_repeat(),
            EngineCommand::CyclePlayMode => self.cycle_play_mode(),
            EngineCommand::ReplaceTracks( tracks ) => self.replace_tracks( tracks ),
            EngineCommand::Restore( snapshot ) => self.restore( &snapshot ),
            EngineCommand::Tick => self.tick(),
            EngineCommand::TrackCompleted { generation, successfully } => {
                self.track_completed( generation, successfully )
            }
            EngineCommand::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }


    /// Plays `track`, or toggles play/pause if it is already current.
    ///
    /// If the output cannot open the track the session is left as it was.
    pub fn play( &mut self, track: Arc<Track> ) {
        self.play_track( track );
        self.commit();
    }


    /// Plays the track at `index`; out of range is a no-op.
    pub fn play_at( &mut self, index: usize ) {
        match self.tracks.get( index ).cloned() {
            Some( track ) => self.play_track( track ),
            None => tracing::warn!( "No track at index {}", index ),
        }
        self.commit();
    }


    /// Flips between playing and paused. No-op when idle.
    pub fn toggle_play_pause( &mut self ) {
        self.toggle();
        self.commit();
    }


    pub fn pause( &mut self ) {
        if self.state.playing {
            self.toggle();
        }
        self.commit();
    }


    pub fn resume( &mut self ) {
        if self.state.is_idle() {
            if let Some( first ) = self.tracks.first().cloned() {
                self.play_track( first );
            }
        } else if !self.state.playing {
            self.toggle();
        }
        self.commit();
    }


    /// Advances to the next track: random with shuffle, otherwise wrapping.
    pub fn next( &mut self ) {
        self.advance();
        self.commit();
    }


    /// Steps back one track, wrapping to the end. Shuffle is ignored.
    pub fn previous( &mut self ) {
        if let Some( index ) = self.current_index() {
            let previous = if index == 0 { self.tracks.len() - 1 } else { index - 1 };
            self.play_track( Arc::clone( &self.tracks[ previous ] ) );
        }
        self.commit();
    }


    /// Moves the playhead, clamped to the track. Does not change playing.
    pub fn seek( &mut self, seconds: f64 ) {
        self.seek_to( seconds );
        self.commit();
    }


    pub fn set_shuffle( &mut self, enabled: bool ) {
        self.state.mode.shuffle = enabled;
        self.commit();
    }


    pub fn set_repeat( &mut self, mode: RepeatMode ) {
        self.state.mode.repeat = mode;
        self.commit();
    }


    pub fn cycle_repeat( &mut self ) {
        self.state.mode.cycle_repeat();
        self.commit();
    }


    pub fn cycle_play_mode( &mut self ) {
        self.state.mode.cycle();
        tracing::info!( "Play mode: {}", self.state.mode );
        self.commit();
    }


    /// Swaps in a freshly loaded collection.
    ///
    /// The current track keeps playing even if the new collection lacks it.
    pub fn replace_tracks( &mut self, tracks: Vec<Arc<Track>> ) {
        tracing::info!( "Track collection replaced ({} tracks)", tracks.len() );
        self.tracks = tracks;
        self.commit();
    }


    /// Applies a saved snapshot against the loaded collection.
    ///
    /// The mode is always applied. The saved track is played, sought and then
    /// paused if it was paused; a track no longer in the collection leaves the
    /// session as it is.
    pub fn restore( &mut self, snapshot: &PersistedSnapshot ) {
        self.state.mode = snapshot.mode();

        let found = snapshot.track_path.as_ref().and_then( |path| {
            self.tracks.iter().find( |t| t.path() == path.as_path() ).cloned()
        });

        match found {
            Some( track ) => {
                if self.state.track.as_ref() != Some( &track ) {
                    self.play_track( Arc::clone( &track ) );
                }
                if self.state.track.as_ref() == Some( &track ) {
                    self.seek_to( snapshot.position );
                    if self.state.playing != snapshot.playing {
                        self.toggle();
                    }
                    tracing::info!( "Restored session at {:.1}s in {}", self.state.position, track.display_name() );
                }
            }
            None => {
                if let Some( path ) = &snapshot.track_path {
                    tracing::info!( "Saved track {:?} is no longer in the library", path );
                }
            }
        }

        self.commit();
    }


    /// Reads the position from the player and republishes it.
    ///
    /// Not persisted; the next command carries the position along.
    pub fn tick( &mut self ) {
        let Some( player ) = self.player.as_mut() else {
            return;
        };
        if self.state.track.is_none() {
            return;
        }

        let duration = player.duration();
        let position = player.current_time();
        self.state.duration = duration;
        self.state.position = clamp_position( position, duration );
        self.notify();
    }


    /// Handles the end of the current track.
    pub fn track_completed( &mut self, generation: u64, successfully: bool ) {
        if generation != self.generation {
            tracing::debug!( "Ignoring completion from replaced player {}", generation );
        } else if !successfully {
            tracing::warn!( "Playback ended unsuccessfully" );
        } else {
            self.on_track_end();
        }
        self.commit();
    }


    /// Records the final position and releases the player.
    pub fn shutdown( &mut self ) {
        if let Some( mut player ) = self.player.take() {
            if self.state.track.is_some() {
                self.state.position = clamp_position( player.current_time(), self.state.duration );
            }
            player.pause();
        }
        self.commit();
        tracing::info!( "Engine stopped" );
    }


    fn play_track( &mut self, track: Arc<Track> ) {
        if self.state.track.as_ref() == Some( &track ) {
            self.toggle();
            return;
        }

        let generation = self.generation + 1;
        let on_complete = self.completion_callback( generation );
        match self.output.open( track.path(), on_complete ) {
            Ok( mut player ) => {
                if let Some( mut old ) = self.player.take() {
                    old.pause();
                }
                player.play();

                tracing::info!( "Playing: {}", track.display_name() );
                self.state.duration = player.duration();
                self.state.position = 0.0;
                self.state.playing = true;
                self.state.track = Some( track );
                self.player = Some( player );
                self.generation = generation;
            }
            Err( e ) => {
                tracing::warn!( "Failed to play {:?}: {}", track.path(), e );
            }
        }
    }


    fn toggle( &mut self ) {
        let Some( player ) = self.player.as_mut() else {
            return;
        };
        if self.state.track.is_none() {
            return;
        }

        if self.state.playing {
            player.pause();
            self.state.position = clamp_position( player.current_time(), self.state.duration );
            self.state.playing = false;
            tracing::info!( "Paused" );
        } else {
            player.play();
            self.state.playing = true;
            tracing::info!( "Resumed" );
        }
    }


    fn advance( &mut self ) {
        let Some( index ) = self.current_index() else {
            return;
        };

        let len = self.tracks.len();
        let next = if self.state.mode.shuffle {
            self.rng.gen_range( 0..len )
        } else {
            ( index + 1 ) % len
        };
        self.play_track( Arc::clone( &self.tracks[ next ] ) );
    }


    fn seek_to( &mut self, seconds: f64 ) {
        let Some( player ) = self.player.as_mut() else {
            return;
        };
        if self.state.track.is_none() {
            return;
        }

        let target = clamp_position( seconds, self.state.duration );
        player.set_current_time( target );
        self.state.position = target;
        tracing::debug!( "Seek to {:.1}s", target );
    }


    fn on_track_end( &mut self ) {
        let mode = self.state.mode;
        match ( mode.repeat, mode.shuffle ) {
            ( RepeatMode::One, _ ) => {
                // Restart in place; the current track is not replaced
                if let Some( player ) = self.player.as_mut() {
                    player.set_current_time( 0.0 );
                    player.play();
                    self.state.position = 0.0;
                    self.state.playing = true;
                }
            }
            ( RepeatMode::All, _ ) | ( RepeatMode::Off, true ) => self.advance(),
            ( RepeatMode::Off, false ) => {
                if let Some( player ) = self.player.as_mut() {
                    player.pause();
                }
                self.state.playing = false;
                tracing::info!( "Reached end of track" );
            }
        }
    }


    fn completion_callback( &self, generation: u64 ) -> CompletionCallback {
        let events = self.events.clone();
        Arc::new( move |successfully| {
            if let Some( events ) = &events {
                let _ = events.send( EngineCommand::TrackCompleted { generation, successfully } );
            }
        })
    }


    fn commit( &mut self ) {
        self.persistence.save( &PersistedSnapshot::from( &self.state ) );
        self.notify();
    }


    fn notify( &self ) {
        self.notifier.send_replace( self.state.clone() );
    }
}


/// Clamps into `[0, duration]`; an unknown duration only bounds below.
fn clamp_position( seconds: f64, duration: f64 ) -> f64 {
    if !seconds.is_finite() {
        return 0.0;
    }
    let seconds = seconds.max( 0.0 );
    if duration > 0.0 {
        seconds.min( duration )
    } else {
        seconds
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    use crate::output::fixtures::{ ScriptedOutput, LENGTH };


    fn tracks( count: usize ) -> Vec<Arc<Track>> {
        ( 0..count )
            .map( |i| Arc::new( Track::new( PathBuf::from( format!( "/music/{:02}.mp3", i ) ) ) ) )
            .collect()
    }


    fn engine( count: usize ) -> ( Engine, ScriptedOutput, SessionPersistence ) {
        let output = ScriptedOutput::default();
        let persistence = SessionPersistence::in_memory();
        let mut engine = Engine::new( Box::new( output.clone() ), persistence.clone() ).with_seed( 7 );
        engine.replace_tracks( tracks( count ) );
        ( engine, output, persistence )
    }


    fn current_path( engine: &Engine ) -> Option<PathBuf> {
        engine.state().track.as_ref().map( |t| t.path().to_path_buf() )
    }


    #[test]
    fn test_idle_commands_are_noops() {
        let ( mut engine, output, persistence ) = engine( 3 );

        engine.toggle_play_pause();
        engine.next();
        engine.previous();
        engine.seek( 30.0 );
        engine.pause();

        assert_eq!( engine.state().status(), PlaybackStatus::Idle );
        assert_eq!( engine.state().position, 0.0 );
        assert!( !engine.state().playing );
        assert_eq!( output.open_count(), 0 );

        // Snapshots are still written
        let saved = persistence.restore().unwrap();
        assert_eq!( saved.track_path, None );
    }


    #[test]
    fn test_play_loads_and_plays() {
        let ( mut engine, output, _ ) = engine( 3 );
        let track = Arc::clone( &engine.tracks()[ 1 ] );

        engine.play( Arc::clone( &track ) );

        assert_eq!( engine.state().status(), PlaybackStatus::Playing );
        assert_eq!( engine.state().track.as_ref(), Some( &track ) );
        assert_eq!( engine.state().position, 0.0 );
        assert_eq!( engine.state().duration, LENGTH );
        assert_eq!( engine.current_index(), Some( 1 ) );
        assert_eq!( output.open_count(), 1 );
        assert_eq!( engine.generation(), 1 );
    }


    #[test]
    fn test_play_same_track_toggles() {
        let ( mut engine, output, _ ) = engine( 2 );
        let track = Arc::clone( &engine.tracks()[ 0 ] );

        engine.play( Arc::clone( &track ) );
        engine.play( Arc::clone( &track ) );
        assert_eq!( engine.state().status(), PlaybackStatus::Paused );

        engine.play( track );
        assert_eq!( engine.state().status(), PlaybackStatus::Playing );
        assert_eq!( output.open_count(), 1 );
    }


    #[test]
    fn test_play_failure_leaves_session_intact() {
        let ( mut engine, output, _ ) = engine( 3 );
        let first = Arc::clone( &engine.tracks()[ 0 ] );
        let broken = Arc::clone( &engine.tracks()[ 1 ] );
        output.fail( broken.path() );

        engine.play( Arc::clone( &first ) );
        output.set_clock( 20.0 );
        engine.tick();
        engine.play( broken );

        assert_eq!( engine.state().track.as_ref(), Some( &first ) );
        assert!( engine.state().playing );
        assert_eq!( engine.state().position, 20.0 );
        assert_eq!( engine.generation(), 1 );
        assert_eq!( output.open_count(), 1 );
    }


    #[test]
    fn test_play_failure_from_idle_stays_idle() {
        let ( mut engine, output, _ ) = engine( 1 );
        let track = Arc::clone( &engine.tracks()[ 0 ] );
        output.fail( track.path() );

        engine.play( track );
        assert_eq!( engine.state().status(), PlaybackStatus::Idle );
    }


    #[test]
    fn test_next_and_previous_wrap() {
        let ( mut engine, _, _ ) = engine( 3 );
        engine.play_at( 2 );

        engine.next();
        assert_eq!( engine.current_index(), Some( 0 ) );
        engine.next();
        assert_eq!( engine.current_index(), Some( 1 ) );

        engine.previous();
        assert_eq!( engine.current_index(), Some( 0 ) );
        engine.previous();
        assert_eq!( engine.current_index(), Some( 2 ) );
        assert!( engine.state().playing );
    }


    #[test]
    fn test_previous_ignores_shuffle() {
        let ( mut engine, _, _ ) = engine( 5 );
        engine.set_shuffle( true );
        engine.play_at( 3 );

        engine.previous();
        assert_eq!( engine.current_index(), Some( 2 ) );
    }


    #[test]
    fn test_shuffle_next_stays_in_collection() {
        let ( mut engine, output, _ ) = engine( 4 );
        engine.set_shuffle( true );
        engine.play_at( 0 );

        for _ in 0..50 {
            engine.next();
            assert!( engine.current_index().is_some() );
        }
        // Picks land on several different tracks
        let distinct: HashSet<_> = output.opened.lock().unwrap().iter().cloned().collect();
        assert!( distinct.len() > 1 );
    }


    #[test]
    fn test_next_without_current_in_collection_is_noop() {
        let ( mut engine, output, _ ) = engine( 3 );
        engine.play_at( 1 );
        engine.replace_tracks( tracks( 0 ) );

        engine.next();
        engine.previous();
        assert_eq!( output.open_count(), 1 );
        assert!( engine.state().playing );
    }


    #[test]
    fn test_seek_clamps_and_keeps_playing_flag() {
        let ( mut engine, output, _ ) = engine( 1 );
        engine.play_at( 0 );

        engine.seek( 60.0 );
        assert_eq!( engine.state().position, 60.0 );
        assert_eq!( output.clock(), 60.0 );
        assert!( engine.state().playing );

        engine.seek( 500.0 );
        assert_eq!( engine.state().position, LENGTH );
        engine.seek( -4.0 );
        assert_eq!( engine.state().position, 0.0 );
        engine.seek( f64::NAN );
        assert_eq!( engine.state().position, 0.0 );

        engine.toggle_play_pause();
        engine.seek( 10.0 );
        assert!( !engine.state().playing );
        assert_eq!( engine.state().position, 10.0 );
    }


    #[test]
    fn test_mode_commands() {
        let ( mut engine, _, _ ) = engine( 1 );

        engine.set_repeat( RepeatMode::One );
        engine.set_shuffle( true );
        assert_eq!( engine.state().mode, PlaybackMode::new( true, RepeatMode::One ) );

        engine.cycle_play_mode();
        assert_eq!( engine.state().mode, PlaybackMode::new( false, RepeatMode::Off ) );
        engine.cycle_play_mode();
        engine.cycle_play_mode();
        engine.cycle_play_mode();
        assert_eq!( engine.state().mode, PlaybackMode::new( true, RepeatMode::Off ) );

        engine.cycle_repeat();
        assert_eq!( engine.state().mode, PlaybackMode::new( true, RepeatMode::All ) );
    }


    #[test]
    fn test_completion_stops_without_repeat() {
        let ( mut engine, output, _ ) = engine( 3 );
        engine.play_at( 0 );
        output.set_clock( 179.5 );
        engine.tick();

        engine.track_completed( engine.generation(), true );

        assert_eq!( engine.state().status(), PlaybackStatus::Paused );
        assert_eq!( engine.state().position, 179.5 );
        assert_eq!( engine.current_index(), Some( 0 ) );
        assert_eq!( output.open_count(), 1 );
    }


    #[test]
    fn test_completion_with_shuffle_advances() {
        let ( mut engine, output, _ ) = engine( 3 );
        engine.set_shuffle( true );
        engine.play_at( 0 );

        engine.track_completed( engine.generation(), true );
        assert!( engine.current_index().is_some() );
        // Either a new track was opened or the same one was toggled
        assert!( output.open_count() == 2 || !engine.state().playing );
    }


    #[test]
    fn test_completion_repeat_all_advances() {
        let ( mut engine, output, _ ) = engine( 3 );
        engine.set_repeat( RepeatMode::All );
        engine.play_at( 2 );

        engine.track_completed( engine.generation(), true );
        assert_eq!( engine.current_index(), Some( 0 ) );
        assert!( engine.state().playing );
        assert_eq!( output.open_count(), 2 );
    }


    #[test]
    fn test_completion_repeat_one_restarts_in_place() {
        let ( mut engine, output, _ ) = engine( 3 );
        engine.set_repeat( RepeatMode::One );
        engine.play_at( 1 );
        let before = engine.state().track.clone().unwrap();
        output.set_clock( LENGTH );
        engine.tick();

        engine.track_completed( engine.generation(), true );

        let after = engine.state().track.clone().unwrap();
        assert!( Arc::ptr_eq( &before, &after ) );
        assert_eq!( engine.state().position, 0.0 );
        assert_eq!( output.clock(), 0.0 );
        assert!( engine.state().playing );
        assert_eq!( output.open_count(), 1 );
        assert_eq!( engine.generation(), 1 );
    }


    #[test]
    fn test_unsuccessful_or_stale_completion_is_ignored() {
        let ( mut engine, output, _ ) = engine( 3 );
        engine.set_repeat( RepeatMode::All );
        engine.play_at( 0 );
        engine.play_at( 1 );

        engine.track_completed( engine.generation(), false );
        engine.track_completed( 1, true );

        assert_eq!( engine.current_index(), Some( 1 ) );
        assert!( engine.state().playing );
        assert_eq!( output.open_count(), 2 );
    }


    #[test]
    fn test_completion_events_are_routed() {
        let ( mut engine, output, _ ) = engine( 2 );
        let ( tx, rx ) = mpsc::channel();
        engine.attach_events( tx );
        engine.set_repeat( RepeatMode::All );
        engine.play_at( 0 );

        ( output.last_callback() )( true );
        let event = rx.try_recv().unwrap();
        assert!( matches!( event, EngineCommand::TrackCompleted { generation: 1, successfully: true } ) );

        assert!( engine.apply( event ) );
        assert_eq!( engine.current_index(), Some( 1 ) );
    }


    #[test]
    fn test_snapshot_round_trip() {
        let ( mut engine, _, persistence ) = engine( 4 );
        engine.play_at( 2 );
        engine.seek( 45.0 );
        engine.toggle_play_pause();
        engine.set_shuffle( true );
        engine.set_repeat( RepeatMode::All );
        drop( engine );

        // Fresh engine over a reloaded collection with new track instances
        let output = ScriptedOutput::default();
        let mut restored = Engine::new( Box::new( output.clone() ), persistence.clone() );
        restored.replace_tracks( tracks( 4 ) );
        let snapshot = persistence.restore().unwrap();
        restored.restore( &snapshot );

        let state = restored.state();
        assert_eq!( current_path( &restored ), Some( PathBuf::from( "/music/02.mp3" ) ) );
        assert!( !state.playing );
        assert_eq!( state.position, 45.0 );
        assert!( state.mode.shuffle );
        assert_eq!( state.mode.repeat, RepeatMode::All );
    }


    #[test]
    fn test_restore_playing_snapshot_keeps_playing() {
        let ( mut engine, _, _ ) = engine( 2 );
        engine.restore( &PersistedSnapshot {
            track_path: Some( PathBuf::from( "/music/01.mp3" ) ),
            position: 12.0,
            playing: true,
            shuffle: false,
            repeat: RepeatMode::One,
        });

        assert_eq!( engine.state().status(), PlaybackStatus::Playing );
        assert_eq!( engine.state().position, 12.0 );
        assert_eq!( engine.state().mode.repeat, RepeatMode::One );
    }


    #[test]
    fn test_restore_missing_track_stays_idle() {
        let ( mut engine, output, _ ) = engine( 2 );
        engine.restore( &PersistedSnapshot {
            track_path: Some( PathBuf::from( "/music/deleted.mp3" ) ),
            position: 30.0,
            playing: true,
            shuffle: true,
            repeat: RepeatMode::All,
        });

        assert_eq!( engine.state().status(), PlaybackStatus::Idle );
        assert_eq!( engine.state().position, 0.0 );
        assert_eq!( output.open_count(), 0 );
        assert_eq!( engine.state().mode, PlaybackMode::new( true, RepeatMode::All ) );
    }


    #[test]
    fn test_every_command_is_persisted() {
        let ( mut engine, _, persistence ) = engine( 2 );

        engine.set_shuffle( true );
        assert!( persistence.restore().unwrap().shuffle );

        engine.play_at( 1 );
        let saved = persistence.restore().unwrap();
        assert_eq!( saved.track_path, Some( PathBuf::from( "/music/01.mp3" ) ) );
        assert!( saved.playing );

        // A no-op still writes the current state
        persistence.clear();
        engine.play_at( 99 );
        assert!( persistence.restore().is_some() );
    }


    #[test]
    fn test_subscribers_see_updates() {
        let ( mut engine, output, _ ) = engine( 2 );
        let mut rx = engine.subscribe();

        engine.play_at( 0 );
        assert!( rx.has_changed().unwrap() );
        assert!( rx.borrow_and_update().playing );

        output.set_clock( 42.0 );
        engine.tick();
        assert_eq!( rx.borrow_and_update().position, 42.0 );
    }


    #[test]
    fn test_resume_and_pause() {
        let ( mut engine, _, _ ) = engine( 3 );

        engine.pause();
        assert_eq!( engine.state().status(), PlaybackStatus::Idle );

        engine.resume();
        assert_eq!( engine.current_index(), Some( 0 ) );
        assert_eq!( engine.state().status(), PlaybackStatus::Playing );

        engine.resume();
        assert_eq!( engine.state().status(), PlaybackStatus::Playing );

        engine.pause();
        engine.pause();
        assert_eq!( engine.state().status(), PlaybackStatus::Paused );
    }


    #[test]
    fn test_shutdown_saves_final_position() {
        let ( mut engine, output, persistence ) = engine( 2 );
        engine.play_at( 1 );
        output.set_clock( 33.0 );

        assert!( !engine.apply( EngineCommand::Shutdown ) );
        assert_eq!( persistence.restore().unwrap().position, 33.0 );
    }


    #[test]
    fn test_clamp_position() {
        assert_eq!( clamp_position( 5.0, 0.0 ), 5.0 );
        assert_eq!( clamp_position( -1.0, 0.0 ), 0.0 );
        assert_eq!( clamp_position( f64::INFINITY, 10.0 ), 0.0 );
        assert_eq!( clamp_position( 11.0, 10.0 ), 10.0 );
    }
}
