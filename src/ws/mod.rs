pub mod messages;
pub mod viewer;
