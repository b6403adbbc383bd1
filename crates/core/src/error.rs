//! Core error types for tilesync

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Index {index} out of range (capacity {capacity})")]
    IndexOutOfRange { index: usize, capacity: usize },

    #[error("Slot {0} is already occupied")]
    SlotOccupied(usize),

    #[error("Buffer bounds exceeded: requested {requested} bits, {available} available")]
    BufferBounds { requested: usize, available: usize },

    #[error("Extended info error: {0}")]
    ExtendedInfo(String),

    #[error("Packet too large: {size} bytes exceeds the {limit} byte ceiling")]
    PacketTooLarge { size: usize, limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
