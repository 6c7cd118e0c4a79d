pub mod append;
pub mod list;
pub mod read;
pub mod verify;
