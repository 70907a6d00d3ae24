pub mod action;
pub mod error;
pub mod flow;
pub mod interpreter;
pub mod screen;
pub mod storage;
pub mod template;
pub mod validation;
