pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod library;
pub mod processing;
pub mod render;
pub mod schedule;
pub mod selection;
pub mod source;
pub mod state;
pub mod sync;
pub mod tasks {
    pub mod control;
    pub mod input;
    pub mod timer;
}
