pub mod contract;
pub mod interest;
pub mod product;
pub mod user;

pub use contract::{Contract, ContractStatus, NewContract};
pub use interest::{Interest, InterestOffer, InterestStatus, NegotiationEntry, NewInterest, OfferArrow};
pub use product::{DealStatus, NewProduct, Product, ProductChanges, ProductStatus, StockMode};
pub use user::{AccountStatus, KycStatus, Role, User};
