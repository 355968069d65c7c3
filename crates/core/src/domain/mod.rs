pub mod outcome;
pub mod stage;
pub mod submission;

pub use outcome::*;
pub use stage::*;
pub use submission::*;
