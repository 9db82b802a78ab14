//! Shuffle and repeat modes

use std::fmt;
use std::str::FromStr;

use serde::{ Deserialize, Serialize };


/// Repeat mode for the session.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}


impl RepeatMode {
    /// Next mode in the `off -> all -> one -> off` cycle.
    pub fn cycled( self ) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }


    pub fn as_str( self ) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::All => "all",
            RepeatMode::One => "one",
        }
    }
}


impl fmt::Display for RepeatMode {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.as_str() )
    }
}


impl FromStr for RepeatMode {
    type Err = String;

    /// Accepts the names as well as the numeric encoding 0/1/2.
    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "0" => Ok( RepeatMode::Off ),
            "all" | "1" => Ok( RepeatMode::All ),
            "one" | "2" => Ok( RepeatMode::One ),
            other => Err( format!( "Unknown repeat mode: {}", other ) ),
        }
    }
}


/// Shuffle flag and repeat mode, set independently.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
pub struct PlaybackMode {
    pub shuffle: bool,
    pub repeat: RepeatMode,
}


impl PlaybackMode {
    pub fn new( shuffle: bool, repeat: RepeatMode ) -> Self {
        Self { shuffle, repeat }
    }


    /// Advances repeat by one step; shuffle is left alone.
    pub fn cycle_repeat( &mut self ) {
        self.repeat = self.repeat.cycled();
    }


    /// Steps the combined play-mode control.
    ///
    /// From the default mode this walks `{shuffle} -> {off} -> {all} -> {one} -> {shuffle}`.
    /// Shuffle combined with a repeat mode is only reachable through the direct setters.
    pub fn cycle( &mut self ) {
        if self.shuffle {
            self.shuffle = false;
            self.cycle_repeat();
        } else {
            match self.repeat {
                RepeatMode::Off => self.repeat = RepeatMode::All,
                RepeatMode::All => self.repeat = RepeatMode::One,
                RepeatMode::One => {
                    self.repeat = RepeatMode::Off;
                    self.shuffle = true;
                }
            }
        }
    }
}


impl fmt::Display for PlaybackMode {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!(
            f,
            "shuffle {}, repeat {}",
            if self.shuffle { "on" } else { "off" },
            self.repeat
        )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_cycle_repeat() {
        let mut mode = PlaybackMode::default();
        mode.cycle_repeat();
        assert_eq!( mode.repeat, RepeatMode::All );
        mode.cycle_repeat();
        assert_eq!( mode.repeat, RepeatMode::One );
        mode.cycle_repeat();
        assert_eq!( mode.repeat, RepeatMode::Off );
        assert!( !mode.shuffle );
    }


    #[test]
    fn test_cycle_play_mode_four_states() {
        let mut mode = PlaybackMode::new( true, RepeatMode::Off );
        let start = mode;

        mode.cycle();
        assert_eq!( mode, PlaybackMode::new( false, RepeatMode::All ) );
        mode.cycle();
        assert_eq!( mode, PlaybackMode::new( false, RepeatMode::One ) );
        mode.cycle();
        assert_eq!( mode, PlaybackMode::new( true, RepeatMode::Off ) );
        assert_eq!( mode, start );
    }


    #[test]
    fn test_cycle_from_default_enters_loop() {
        let mut mode = PlaybackMode::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            mode.cycle();
            seen.push( mode );
        }
        assert_eq!( seen, vec![
            PlaybackMode::new( false, RepeatMode::All ),
            PlaybackMode::new( false, RepeatMode::One ),
            PlaybackMode::new( true, RepeatMode::Off ),
            PlaybackMode::new( false, RepeatMode::All ),
        ]);
    }


    #[test]
    fn test_cycle_out_of_shuffle_with_repeat() {
        // Only reachable via direct setters
        let mut mode = PlaybackMode::new( true, RepeatMode::All );
        mode.cycle();
        assert_eq!( mode, PlaybackMode::new( false, RepeatMode::One ) );

        let mut mode = PlaybackMode::new( true, RepeatMode::One );
        mode.cycle();
        assert_eq!( mode, PlaybackMode::new( false, RepeatMode::Off ) );
    }


    #[test]
    fn test_repeat_from_str() {
        assert_eq!( "ALL".parse::<RepeatMode>(), Ok( RepeatMode::All ) );
        assert_eq!( "2".parse::<RepeatMode>(), Ok( RepeatMode::One ) );
        assert_eq!( " off ".parse::<RepeatMode>(), Ok( RepeatMode::Off ) );
        assert!( "sometimes".parse::<RepeatMode>().is_err() );
    }


    #[test]
    fn test_repeat_serde_lowercase() {
        let json = serde_json::to_string( &RepeatMode::One ).unwrap();
        assert_eq!( json, "\"one\"" );
        let back: RepeatMode = serde_json::from_str( "\"all\"" ).unwrap();
        assert_eq!( back, RepeatMode::All );
    }
}
