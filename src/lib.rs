#![no_std]

pub mod hardware;
pub mod net;
pub mod settings;
pub mod statistics;
