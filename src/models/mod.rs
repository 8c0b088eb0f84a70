pub mod enums;
pub mod observation;
pub mod baseline;
pub mod correlation;
pub mod pattern;
pub mod insight;
pub mod cohort;
pub mod care;

pub use observation::*;
pub use baseline::*;
pub use correlation::*;
pub use pattern::*;
pub use insight::*;
pub use cohort::*;
pub use care::*;
