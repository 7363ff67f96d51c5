pub mod capabilities;
pub mod drive;
pub mod health;
pub mod permissions;
pub mod proxy;
pub mod thumbnails;
