pub mod ask;
pub mod chunk;
pub mod embed;
pub mod status;
