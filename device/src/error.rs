use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Unparseable device string.
    #[snafu(display("invalid device: {device}"))]
    InvalidDevice { device: String },

    /// No allocator has been registered for this device.
    #[snafu(display("no allocator registered for device {device}"))]
    UnregisteredDevice { device: String },

    /// The allocator could not provide memory.
    #[snafu(display("allocation of {size} bytes failed on {allocator}: {reason}"))]
    AllocationFailed { size: usize, allocator: String, reason: String },
}
