mod lookup;
mod refund;
mod transaction;

pub use lookup::*;
pub use refund::*;
pub use transaction::*;
