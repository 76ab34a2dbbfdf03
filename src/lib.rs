pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod playlist;
pub mod progress;
pub mod renderer;
pub mod scheduler;
pub mod slide;
pub mod tasks {
    #[cfg(unix)]
    pub mod control;
    pub mod player;
    pub mod presenter;
    pub mod watch;
}
