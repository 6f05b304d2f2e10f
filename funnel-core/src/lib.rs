pub mod ordered_sink;
pub mod sequencer;
pub mod tool;
