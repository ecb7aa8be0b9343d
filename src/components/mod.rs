pub mod history;
pub mod interaction;
