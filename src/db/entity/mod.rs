pub mod prelude;

pub mod bets;
pub mod rounds;
