mod compiled;
mod error;
mod result;
mod store;
mod value;

pub use compiled::{CompiledSet, RuleGroup};
pub use error::{CompileError, CompileErrorKind, CompileErrors};
pub use result::{ExpressionValue, QueryResult, ResultSet};
pub use store::Store;
pub use value::{Number, Value};
