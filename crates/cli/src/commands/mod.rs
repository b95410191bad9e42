pub mod patterns;
pub mod sbom;
pub mod scan;
pub mod util;

pub use patterns::*;
pub use sbom::*;
pub use scan::*;
pub use util::*;
