//! The two thin drivers around the monitor: the forever heartbeat loop and
//! the one-shot snapshot dump.

pub mod recv;
pub mod send;
