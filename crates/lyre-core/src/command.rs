//! Console command parsing.
//!
//! Commands are typed one per line at the console. Engine-bound commands
//! translate to an [`EngineCommand`]; the rest (`list`, `status`, `rescan`,
//! `help`, `quit`) are handled by the front end.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::{ EngineCommand, SessionState };
use crate::mode::RepeatMode;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed console command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Library
    List,
    Rescan,

    // Playback
    /// Track number as listed (1-based). Without one, resumes or starts.
    Play { index: Option<usize> },
    Toggle,
    Pause,
    Resume,
    Next,
    Prev,
    Seek { position: Duration },

    // Mode
    /// Sets shuffle, or flips it when no value is given.
    Shuffle { enabled: Option<bool> },
    /// Sets repeat, or cycles it when no value is given.
    Repeat { mode: Option<RepeatMode> },
    Mode,

    // Other
    Status,
    Help,
    Quit,
}


impl FromStr for Command {
    type Err = CommandError;

    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        Command::parse( s )
    }
}


impl Command {
    /// Parses one line of input. A leading `/` is accepted and ignored.
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let input = input.strip_prefix( '/' ).unwrap_or( input );
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( str::trim ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "list" | "ls" | "l" => Ok( Command::List ),
            "rescan" | "refresh" => Ok( Command::Rescan ),

            "play" | "p" => {
                let index = args.map( parse_index ).transpose()?;
                Ok( Command::Play { index } )
            }
            "toggle" | "t" => Ok( Command::Toggle ),
            "pause" | "pa" => Ok( Command::Pause ),
            "resume" | "r" => Ok( Command::Resume ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "seek" | "sk" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                let position = parse_time( time_str )?;
                Ok( Command::Seek { position } )
            }

            "shuffle" | "sh" => {
                let enabled = args.map( parse_switch ).transpose()?;
                Ok( Command::Shuffle { enabled } )
            }
            "repeat" | "rep" => {
                let mode = args
                    .map( |s| s.parse::<RepeatMode>().map_err( CommandError::InvalidArgument ) )
                    .transpose()?;
                Ok( Command::Repeat { mode } )
            }
            "mode" | "m" => Ok( Command::Mode ),

            "status" | "st" => Ok( Command::Status ),
            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// The engine command this maps to, if any.
    ///
    /// `state` resolves toggles such as a bare `shuffle`.
    pub fn to_engine( &self, state: &SessionState ) -> Option<EngineCommand> {
        let command = match self {
            Command::Play { index: Some( n ) } => EngineCommand::PlayAt( n - 1 ),
            Command::Play { index: None } | Command::Resume => EngineCommand::Resume,
            Command::Toggle => EngineCommand::TogglePlayPause,
            Command::Pause => EngineCommand::Pause,
            Command::Next => EngineCommand::Next,
            Command::Prev => EngineCommand::Previous,
            Command::Seek { position } => EngineCommand::Seek( position.as_secs_f64() ),
            Command::Shuffle { enabled } => EngineCommand::SetShuffle( enabled.unwrap_or( !state.mode.shuffle ) ),
            Command::Repeat { mode: Some( mode ) } => EngineCommand::SetRepeat( *mode ),
            Command::Repeat { mode: None } => EngineCommand::CycleRepeat,
            Command::Mode => EngineCommand::CyclePlayMode,
            Command::List | Command::Rescan | Command::Status | Command::Help | Command::Quit => return None,
        };
        Some( command )
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::List => "List tracks",
            Command::Rescan => "Rescan the library",
            Command::Play { .. } => "Play track by number",
            Command::Toggle => "Toggle play/pause",
            Command::Pause => "Pause playback",
            Command::Resume => "Resume playback",
            Command::Next => "Next track",
            Command::Prev => "Previous track",
            Command::Seek { .. } => "Seek to position",
            Command::Shuffle { .. } => "Set shuffle",
            Command::Repeat { .. } => "Set repeat mode",
            Command::Mode => "Cycle play mode",
            Command::Status => "Show what is playing",
            Command::Help => "Show help",
            Command::Quit => "Quit",
        }
    }
}


fn parse_index( s: &str ) -> Result<usize, CommandError> {
    match s.parse::<usize>() {
        Ok( n ) if n > 0 => Ok( n ),
        _ => Err( CommandError::InvalidArgument( format!( "Invalid track number: {}", s ) ) ),
    }
}


fn parse_switch( s: &str ) -> Result<bool, CommandError> {
    match s.to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok( true ),
        "off" | "false" | "0" | "no" => Ok( false ),
        _ => Err( CommandError::InvalidArgument(
            format!( "Invalid value: '{}'. Use 'on' or 'off'", s )
        )),
    }
}


/// Parses a time string like "1:30" or "90" into a Duration.
///
/// Accepts "M:SS", "MM:SS" or plain seconds.
pub fn parse_time( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();

    if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: u64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        minutes.checked_mul( 60 )
            .and_then( |m| m.checked_add( seconds ) )
            .map( Duration::from_secs )
            .ok_or_else( || CommandError::InvalidArgument( format!( "Time out of range: {}", s ) ) )
    } else {
        let seconds: f64 = s.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        Duration::try_from_secs_f64( seconds )
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )
    }
}


/// Formats seconds as `M:SS`.
pub fn format_time( seconds: f64 ) -> String {
    let total = if seconds.is_finite() { seconds.max( 0.0 ) as u64 } else { 0 };
    format!( "{}:{:02}", total / 60, total % 60 )
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Library:
  list            List tracks with their numbers
  rescan          Rescan the library folder

Playback:
  play [n]        Play track n, or resume
  toggle          Toggle play/pause
  pause           Pause playback
  resume          Resume playback
  next            Next track
  prev            Previous track
  seek <time>     Seek to position (e.g., 1:30)

Mode:
  shuffle [on|off]        Set or flip shuffle
  repeat [off|all|one]    Set or cycle repeat
  mode                    Cycle shuffle/repeat

Other:
  status          Show what is playing
  help            Show this help
  quit            Exit lyre"#
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::mode::PlaybackMode;


    #[test]
    fn test_parse_play_with_index() {
        assert_eq!( Command::parse( "play 3" ).unwrap(), Command::Play { index: Some( 3 ) } );
        assert_eq!( Command::parse( "/p" ).unwrap(), Command::Play { index: None } );
    }


    #[test]
    fn test_parse_play_rejects_zero() {
        let result = Command::parse( "play 0" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( Command::parse( "play x" ).is_err() );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 1:30" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 90 ) } );
    }


    #[test]
    fn test_parse_seek_seconds() {
        let cmd = Command::parse( "seek 45" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 45 ) } );
        assert!( Command::parse( "seek -3" ).is_err() );
    }


    #[test]
    fn test_parse_seek_out_of_range() {
        for input in [ "seek 1e30", "seek inf", "seek NaN", "seek 999999999999999999:0", "seek 1:18446744073709551615" ] {
            let result = Command::parse( input );
            assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ), "{}", input );
        }
        assert_eq!( parse_time( "2.5" ).unwrap(), Duration::from_millis( 2500 ) );
    }


    #[test]
    fn test_parse_repeat_with_mode() {
        let cmd = Command::parse( "repeat all" ).unwrap();
        assert_eq!( cmd, Command::Repeat { mode: Some( RepeatMode::All ) } );
    }


    #[test]
    fn test_parse_repeat_cycle() {
        let cmd = Command::parse( "repeat" ).unwrap();
        assert_eq!( cmd, Command::Repeat { mode: None } );
        assert!( Command::parse( "repeat sometimes" ).is_err() );
    }


    #[test]
    fn test_parse_shuffle() {
        assert_eq!( Command::parse( "shuffle on" ).unwrap(), Command::Shuffle { enabled: Some( true ) } );
        assert_eq!( Command::parse( "sh" ).unwrap(), Command::Shuffle { enabled: None } );
        assert!( Command::parse( "shuffle maybe" ).is_err() );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "   " ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "seek" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_to_engine() {
        let mut state = SessionState::default();

        assert!( matches!( Command::Play { index: Some( 2 ) }.to_engine( &state ), Some( EngineCommand::PlayAt( 1 ) ) ) );
        assert!( matches!( Command::Play { index: None }.to_engine( &state ), Some( EngineCommand::Resume ) ) );
        assert!( matches!( Command::Shuffle { enabled: None }.to_engine( &state ), Some( EngineCommand::SetShuffle( true ) ) ) );

        state.mode = PlaybackMode::new( true, RepeatMode::Off );
        assert!( matches!( Command::Shuffle { enabled: None }.to_engine( &state ), Some( EngineCommand::SetShuffle( false ) ) ) );
        assert!( matches!( Command::Repeat { mode: None }.to_engine( &state ), Some( EngineCommand::CycleRepeat ) ) );
        assert!( Command::Status.to_engine( &state ).is_none() );
        assert!( Command::Rescan.to_engine( &state ).is_none() );
    }


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( 0.0 ), "0:00" );
        assert_eq!( format_time( 95.7 ), "1:35" );
        assert_eq!( format_time( f64::NAN ), "0:00" );
    }
}
