pub mod app;
pub mod fakes;
