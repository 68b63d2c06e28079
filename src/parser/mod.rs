pub mod frame;
pub mod reply;
