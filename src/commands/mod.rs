pub mod capture;
pub mod db;
pub mod export;
pub mod health;
pub mod restore;
pub mod retention;
pub mod settings;
