pub mod db4iot;
pub mod trimet;

use crate::position::{Source, VehiclePosition};

pub use db4iot::Db4iotAdapter;
pub use trimet::TriMetAdapter;

pub trait PositionAdapter {
    type Error;

    fn source(&self) -> Source;

    /// Returns the source's bus fixes as canonical positions, in source order.
    /// Validation and deduplication are left to `prep`.
    fn positions(&self) -> Result<Vec<VehiclePosition>, Self::Error>;
}
