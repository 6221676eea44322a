pub mod bracket;
pub mod models;
pub mod ports;
pub mod sequencer;
pub mod settings;
pub mod stability;
