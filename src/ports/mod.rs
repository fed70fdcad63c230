//! Router port allocation for exposed services.

pub mod free_ports;
pub mod mapping;

use thiserror::Error;

pub use free_ports::FreePorts;
pub use mapping::PortMapping;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no free ports available")]
    Exhausted,

    #[error("port {port} is outside the managed range {min}-{max}")]
    OutOfRange { port: u16, min: u16, max: u16 },

    #[error("invalid port range {min}-{max}")]
    InvalidRange { min: u16, max: u16 },
}

pub type PortResult<T> = Result<T, PortError>;
