pub mod correlation;
pub mod roots;

pub use correlation::{CorrelationError, CorrelationMatrix, STELLAR_PARAMETER_COUNT};
pub use roots::{brent_root, RootFindError, RootOptions, RootSolution};
