//! Application settings management
//!
//! Settings live in `<config_dir>/lyre/settings.json`. Missing fields take
//! their defaults and an unreadable file is treated as absent.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Library folder; the OS music folder when unset
    pub library_root: Option<PathBuf>,

    /// Register with the OS media controls (MPRIS, now-playing center)
    pub media_controls_enabled: bool,

    /// Cap on files read at once while loading; unlimited when unset
    pub max_concurrent_extractions: Option<usize>,

    /// How often the position is refreshed, in milliseconds
    pub tick_interval_ms: u64,

    /// Start the first track after loading if nothing was restored
    pub autoplay_on_load: bool,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            library_root: None,
            media_controls_enabled: true,
            max_concurrent_extractions: None,
            tick_interval_ms: 500,
            autoplay_on_load: false,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "lyre" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Ignoring malformed settings {:?}: {}", path, e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to disk.
    pub fn save( &self ) {
        if let Some( path ) = Self::settings_path() {
            self.save_to( &path );
        }
    }


    pub fn save_to( &self, path: &Path ) {
        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Library folder: configured, else the OS music folder, else documents,
    /// else `./Music`.
    pub fn library_root( &self ) -> PathBuf {
        self.library_root.clone()
            .or_else( dirs::audio_dir )
            .or_else( dirs::document_dir )
            .unwrap_or_else( || PathBuf::from( "Music" ) )
    }


    pub fn tick_interval( &self ) -> Duration {
        Duration::from_millis( self.tick_interval_ms.max( 10 ) )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from( &dir.path().join( "settings.json" ) );
        assert_eq!( settings, Settings::default() );
        assert_eq!( settings.tick_interval(), Duration::from_millis( 500 ) );
        assert!( settings.media_controls_enabled );
    }


    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "library_root": "/srv/music", "autoplay_on_load": true }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( settings.library_root(), PathBuf::from( "/srv/music" ) );
        assert!( settings.autoplay_on_load );
        assert_eq!( settings.tick_interval_ms, 500 );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "not json" ).unwrap();
        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );
        let settings = Settings {
            max_concurrent_extractions: Some( 4 ),
            media_controls_enabled: false,
            ..Settings::default()
        };

        settings.save_to( &path );
        assert_eq!( Settings::load_from( &path ), settings );
    }
}
