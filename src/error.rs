use std::io;
use thiserror::Error;

use crate::parser::ParserError;

#[derive(Error, Debug)]
pub enum VehicleError {
    #[error("A vehicle with id={0} not found")]
    NotFound(String),

    #[error("{field} overflow on vehicle with id={id}")]
    Overflow { id: String, field: &'static str },

    #[error("Unknown vehicle field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Unknown command")]
    UnknownCommand,

    #[error("Invalid command arguments")]
    InvalidArguments,
}

impl VehicleError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VehicleError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, VehicleError>;
