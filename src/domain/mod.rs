pub mod models;
pub mod standby;
pub mod timer;
pub mod view;
