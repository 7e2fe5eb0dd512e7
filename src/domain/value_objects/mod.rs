mod decimal;
pub mod money;
pub mod quantity;
pub mod unit;

pub use money::Money;
pub use quantity::Quantity;
pub use unit::Unit;
