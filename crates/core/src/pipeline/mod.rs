pub mod addon;
pub mod estimate;

pub use addon::{AddonAssessment, AddonClassifier};
pub use estimate::{draft_estimate, EstimateTemplate};
