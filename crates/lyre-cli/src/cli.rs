//! Command-line argument parsing for Lyre.

use std::path::PathBuf;

use clap::Parser;


/// Lyre - A console music player for a local library.
#[derive( Parser, Debug )]
#[command( name = "lyre" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Library folder to scan (overrides the settings file).
    #[arg( short, long )]
    pub path: Option<PathBuf>,

    /// Start fresh instead of restoring the last session.
    #[arg( long )]
    pub no_restore: bool,

    /// Do not register with the OS media controls.
    #[arg( long )]
    pub no_media_controls: bool,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults() {
        let args = Args::parse_from( [ "lyre" ] );
        assert!( args.path.is_none() );
        assert!( !args.no_restore );
        assert!( !args.no_media_controls );
    }


    #[test]
    fn test_flags() {
        let args = Args::parse_from( [ "lyre", "-p", "/srv/music", "--no-restore", "--no-media-controls" ] );
        assert_eq!( args.path, Some( PathBuf::from( "/srv/music" ) ) );
        assert!( args.no_restore );
        assert!( args.no_media_controls );
    }
}
