//! `receipt-fusion`: cross-frame fusion of OCR output into one stable
//! `Receipt` (spec §1–§5). Parsing (component A–E) is stateless and lives
//! in [`parser::process`]; multi-frame accumulation (components F–H) is
//! owned by [`optimizer::Optimizer`].

pub mod format;
pub mod normalize;
pub mod optimizer;
pub mod options;
pub mod order;
pub mod outlier;
pub mod parser;
pub mod skew;
pub mod threshold;

pub use optimizer::Optimizer;
pub use options::{FieldMergePolicy, MergePolicy, Options, OptionsMap, Tuning};
pub use parser::process;
