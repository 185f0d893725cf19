pub mod account;
pub mod accounting;
pub mod bootstrap;
pub mod clock;
pub mod commands;
pub mod session;
pub mod standby;
pub mod timer_sync;
pub mod username;
