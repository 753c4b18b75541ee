pub mod contact;
pub mod health;
pub mod pages;
pub mod payload;
pub mod submit;
