// svd/mod.rs
//
// Singular value decomposition of an experiment's processed data, and the comparison
// of the leading eigengenes with processing dates and experimental factors.

pub mod decomposition;
pub mod service;
pub mod value_object;

pub use decomposition::ExpressionDataSvd;
pub use service::SvdService;
pub use value_object::SvdValueObject;
