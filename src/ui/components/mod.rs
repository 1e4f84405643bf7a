pub mod error_dialog;
pub mod loading;
