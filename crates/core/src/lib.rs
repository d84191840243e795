pub mod confidence;
pub mod date;
pub mod entity;
pub mod geometry;
pub mod group;
pub mod position;
pub mod price;
pub mod product;
pub mod receipt;
pub mod text;
pub mod textline;

pub use confidence::{Confidence, ConfidenceWeights};
pub use date::{DateError, UtcDate};
pub use entity::{EntityValue, RecognizedEntity};
pub use geometry::{Point, Rect};
pub use group::{Group, GroupId};
pub use position::{Operation, Position};
pub use price::{Price, Unit};
pub use product::Product;
pub use receipt::Receipt;
pub use textline::{OcrBlock, OcrResult, TextLine};
