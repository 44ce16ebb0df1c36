pub mod config;
pub mod events;
pub mod interval;
pub mod reset;
pub mod run;
pub mod status;
