mod analysis;
mod connections;
pub mod edit;
mod graph;
mod inference;
mod layout;
pub mod repair;
pub mod sanitize;
pub mod taxonomy;
mod validation;

pub use analysis::*;
pub use connections::*;
pub use edit::{GraphEdit, PathError, apply_edits, set_parameter};
pub use graph::*;
pub use inference::*;
pub use layout::*;
pub use repair::{
    Defect, DefectKind, RepairAction, RepairPlan, apply_repairs, detect_defects, plan_repairs,
};
pub use sanitize::{InjectedDefault, SanitizedParameters, sanitize_parameters};
pub use taxonomy::{KindFamily, NodeRole, classify};
pub use validation::*;
