pub mod calendar;
pub mod config;
pub mod gate;
pub mod orchestration;
pub mod reasoner;
pub mod shared;
