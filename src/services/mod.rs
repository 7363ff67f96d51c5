pub mod audit;
pub mod broker;
pub mod credentials;
pub mod directory;
pub mod errors;
pub mod permissions;
pub mod providers;
pub mod storage;
pub mod sweeper;
pub mod thumbnails;
pub mod vault;
